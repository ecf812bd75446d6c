// src/decoder/resample.rs

use anyhow::Result;
use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
    calculate_cutoff,
};

use crate::decoder::dsp;

pub fn build_resampler(
    src_rate: u32,
    dst_rate: u32,
    channels: usize,
) -> Result<Option<SincFixedIn<f32>>> {
    if src_rate == dst_rate {
        return Ok(None);
    }
    let ratio = dst_rate as f64 / src_rate as f64;
    let sinc_len = 256usize;
    let window = WindowFunction::BlackmanHarris2;
    let f_cutoff = calculate_cutoff(sinc_len, window);
    let params = SincInterpolationParameters {
        sinc_len,
        f_cutoff,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 128,
        window,
    };
    let chunk_size = 1024;
    let r = SincFixedIn::<f32>::new(ratio, 2.0, params, chunk_size, channels)?;
    Ok(Some(r))
}

fn try_process_exact(
    resampler: &mut SincFixedIn<f32>,
    stage_planar: &mut [Vec<f32>],
) -> Result<Option<Vec<Vec<f32>>>> {
    let need = resampler.input_frames_next();
    if dsp::planar_len(stage_planar) < need {
        return Ok(None);
    }
    let in_block = dsp::take_from_planar(stage_planar, need);
    Ok(Some(resampler.process(&in_block, None)?))
}

fn extend_planar(dst: &mut [Vec<f32>], block: Vec<Vec<f32>>) {
    for (d, b) in dst.iter_mut().zip(block) {
        d.extend_from_slice(&b);
    }
}

/// Converts a whole interleaved buffer from `src_rate` to `dst_rate`.
/// The filter delay is trimmed so the output starts at the same instant as
/// the input and holds `frames * dst / src` frames.
pub fn resample_interleaved(
    input: &[f32],
    channels: usize,
    src_rate: u32,
    dst_rate: u32,
) -> Result<Vec<f32>> {
    let Some(mut resampler) = build_resampler(src_rate, dst_rate, channels)? else {
        return Ok(input.to_vec());
    };

    let frames = input.len() / channels.max(1);
    let expected = (frames as f64 * dst_rate as f64 / src_rate as f64).round() as usize;
    let delay = resampler.output_delay();

    let mut stage: Vec<Vec<f32>> = vec![Vec::with_capacity(frames); channels];
    dsp::append_interleaved_to_planar(input, &mut stage);

    let mut out: Vec<Vec<f32>> = vec![Vec::with_capacity(expected + delay); channels];
    while let Some(block) = try_process_exact(&mut resampler, &mut stage)? {
        extend_planar(&mut out, block);
    }

    let remaining = dsp::planar_len(&stage);
    if remaining > 0 {
        let tail = dsp::take_from_planar(&mut stage, remaining);
        let block = resampler.process_partial(Some(tail.as_slice()), None)?;
        extend_planar(&mut out, block);
    }

    // Flush the filter until the delayed tail has come out.
    while dsp::planar_len(&out) < expected + delay {
        let block = resampler.process_partial::<Vec<f32>>(None, None)?;
        if block.first().is_none_or(|b| b.is_empty()) {
            break;
        }
        extend_planar(&mut out, block);
    }

    for ch in &mut out {
        ch.drain(..delay.min(ch.len()));
        ch.truncate(expected);
    }

    Ok(dsp::interleave(&out))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_rate_is_passthrough() {
        let input = vec![0.25f32; 64];
        let out = resample_interleaved(&input, 2, 48_000, 48_000).unwrap();
        assert_eq!(out, input);
    }

    #[test]
    fn upsampling_keeps_duration() {
        let channels = 2;
        let src_frames = 4_410;
        let input: Vec<f32> = (0..src_frames * channels)
            .map(|i| ((i / channels) as f32 * 0.05).sin() * 0.5)
            .collect();
        let out = resample_interleaved(&input, channels, 44_100, 48_000).unwrap();
        assert_eq!(out.len() / channels, 4_800);
    }
}
