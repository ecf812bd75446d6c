// src/decoder/dsp.rs

pub fn append_interleaved_to_planar(interleaved: &[f32], planar: &mut [Vec<f32>]) {
    let channels = planar.len();
    if channels == 0 {
        return;
    }
    for frame in interleaved.chunks_exact(channels) {
        for (ch, &s) in frame.iter().enumerate() {
            planar[ch].push(s);
        }
    }
}

pub fn planar_len(planar: &[Vec<f32>]) -> usize {
    planar.iter().map(|v| v.len()).min().unwrap_or(0)
}

/// Splits the first `frames` off every channel, leaving the remainder in place.
pub fn take_from_planar(planar: &mut [Vec<f32>], frames: usize) -> Vec<Vec<f32>> {
    planar
        .iter_mut()
        .map(|ch| {
            let n = frames.min(ch.len());
            let tail = ch.split_off(n);
            std::mem::replace(ch, tail)
        })
        .collect()
}

pub fn interleave(planar: &[Vec<f32>]) -> Vec<f32> {
    let channels = planar.len();
    let frames = planar_len(planar);
    let mut out = Vec::with_capacity(frames * channels);
    for f in 0..frames {
        for ch in planar {
            out.push(ch[f]);
        }
    }
    out
}

/// Maps interleaved audio from `in_ch` to `out_ch` channels.
/// Mono is duplicated, stereo folds to mono by averaging, anything else
/// averages neighbouring groups (down) or wraps around (up).
pub fn updown_mix_interleaved(input: &[f32], in_ch: usize, out_ch: usize) -> Vec<f32> {
    if in_ch == out_ch || in_ch == 0 || out_ch == 0 {
        return input.to_vec();
    }
    let frames = input.len() / in_ch;
    let mut out = Vec::with_capacity(frames * out_ch);

    for frame in input.chunks_exact(in_ch) {
        match (in_ch, out_ch) {
            (1, _) => out.extend(std::iter::repeat_n(frame[0], out_ch)),
            (_, 1) => out.push(frame.iter().sum::<f32>() / in_ch as f32),
            _ if out_ch < in_ch => {
                let factor = in_ch as f32 / out_ch as f32;
                for oc in 0..out_ch {
                    let start = (oc as f32 * factor).floor() as usize;
                    let end = (((oc + 1) as f32 * factor).ceil() as usize).min(in_ch);
                    let group = &frame[start..end];
                    out.push(group.iter().sum::<f32>() / group.len().max(1) as f32);
                }
            }
            _ => {
                for oc in 0..out_ch {
                    out.push(frame[oc % in_ch]);
                }
            }
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mono_duplicates_to_stereo() {
        let out = updown_mix_interleaved(&[0.1, 0.2, 0.3], 1, 2);
        assert_eq!(out, vec![0.1, 0.1, 0.2, 0.2, 0.3, 0.3]);
    }

    #[test]
    fn stereo_averages_to_mono() {
        let out = updown_mix_interleaved(&[0.2, 0.4, -1.0, 1.0], 2, 1);
        assert!((out[0] - 0.3).abs() < 1e-6);
        assert_eq!(out[1], 0.0);
    }

    #[test]
    fn planar_split_keeps_remainder() {
        let mut planar = vec![Vec::new(), Vec::new()];
        append_interleaved_to_planar(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &mut planar);
        let head = take_from_planar(&mut planar, 2);
        assert_eq!(head, vec![vec![1.0, 3.0], vec![2.0, 4.0]]);
        assert_eq!(planar, vec![vec![5.0], vec![6.0]]);
        assert_eq!(interleave(&head), vec![1.0, 2.0, 3.0, 4.0]);
    }
}
