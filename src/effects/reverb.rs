// src/effects/reverb.rs

use std::sync::Arc;

use rand::Rng;
use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};

/// Stereo decaying-noise impulse response.
#[derive(Debug, Clone)]
pub struct ReverbImpulse {
    channels: [Vec<f32>; 2],
    sample_rate: u32,
}

impl ReverbImpulse {
    /// `round(sample_rate * seconds)` samples per channel; sample `i` is
    /// uniform noise in [-1, 1) scaled by `(1 - i / len)^decay`.
    pub fn generate(sample_rate: u32, seconds: f64, decay: f64) -> Self {
        Self::generate_with(&mut rand::rng(), sample_rate, seconds, decay)
    }

    pub fn generate_with<R: Rng + ?Sized>(
        rng: &mut R,
        sample_rate: u32,
        seconds: f64,
        decay: f64,
    ) -> Self {
        let len = (sample_rate as f64 * seconds).round() as usize;
        let mut left = Vec::with_capacity(len);
        let mut right = Vec::with_capacity(len);
        for i in 0..len {
            let envelope = Self::envelope(i, len, decay);
            left.push(rng.random_range(-1.0f32..1.0) * envelope);
            right.push(rng.random_range(-1.0f32..1.0) * envelope);
        }
        Self {
            channels: [left, right],
            sample_rate,
        }
    }

    /// Magnitude bound for sample `i`.
    pub fn envelope(i: usize, len: usize, decay: f64) -> f32 {
        (1.0 - i as f64 / len as f64).powf(decay) as f32
    }

    pub fn len(&self) -> usize {
        self.channels[0].len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels[0].is_empty()
    }

    pub fn channel(&self, idx: usize) -> &[f32] {
        &self.channels[idx % 2]
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Unit-power normalisation with the customary -58 dB calibration
    /// (referenced to 44.1 kHz), so a dense tail sits near the dry level.
    pub fn normalization_gain(&self) -> f32 {
        const GAIN_CALIBRATION: f32 = 0.001_25;
        const CALIBRATION_RATE: f32 = 44_100.0;
        const MIN_POWER: f32 = 0.000_125;

        let len = self.len();
        if len == 0 {
            return 0.0;
        }
        let sum_sq: f64 = self
            .channels
            .iter()
            .flat_map(|c| c.iter())
            .map(|&s| (s as f64) * (s as f64))
            .sum();
        let mut power = (sum_sq / (self.channels.len() * len) as f64).sqrt() as f32;
        if !power.is_finite() || power < MIN_POWER {
            power = MIN_POWER;
        }
        (1.0 / power) * GAIN_CALIBRATION * (CALIBRATION_RATE / self.sample_rate as f32)
    }
}

/// Taps handled in direct form at the head of the response.
pub const HEAD_TAPS: usize = 64;
/// Partition length of the long FFT stage.
pub const TAIL_BLOCK: usize = 1024;

/// Zero-latency convolution: a direct-form head covers the first
/// `HEAD_TAPS` taps, a short-block FFT stage the taps up to `TAIL_BLOCK`,
/// and a long-block stage the rest. Each stage starts at the tap offset
/// equal to its own block latency, so the sum is the undelayed response.
pub struct Convolver {
    // Reversed, gain-scaled head taps per lane.
    head: Vec<Vec<f32>>,
    // Per lane: last HEAD_TAPS inputs, stored twice for contiguous reads.
    recent: Vec<Vec<f32>>,
    pos: usize,
    early: UniformConvolver,
    late: UniformConvolver,
    early_out: Vec<f32>,
    late_out: Vec<f32>,
}

impl Convolver {
    /// Convolver for `impulse`, normalised, with one lane per output channel.
    pub fn from_impulse(impulse: &ReverbImpulse, channels: usize) -> Self {
        let irs: Vec<&[f32]> = (0..channels.max(1)).map(|c| impulse.channel(c)).collect();
        Self::new(&irs, impulse.normalization_gain())
    }

    pub fn new(irs: &[&[f32]], gain: f32) -> Self {
        fn segment(ir: &[f32], from: usize, to: usize) -> &[f32] {
            &ir[from.min(ir.len())..to.min(ir.len())]
        }

        let head = irs
            .iter()
            .map(|ir| {
                let mut taps = vec![0.0f32; HEAD_TAPS];
                for (t, &s) in taps.iter_mut().zip(segment(ir, 0, HEAD_TAPS)) {
                    *t = s * gain;
                }
                taps.reverse();
                taps
            })
            .collect::<Vec<_>>();
        let early: Vec<&[f32]> = irs.iter().map(|ir| segment(ir, HEAD_TAPS, TAIL_BLOCK)).collect();
        let late: Vec<&[f32]> = irs.iter().map(|ir| segment(ir, TAIL_BLOCK, usize::MAX)).collect();

        Self {
            recent: vec![vec![0.0; HEAD_TAPS * 2]; head.len()],
            head,
            pos: 0,
            early: UniformConvolver::new(&early, gain, HEAD_TAPS),
            late: UniformConvolver::new(&late, gain, TAIL_BLOCK),
            early_out: Vec::new(),
            late_out: Vec::new(),
        }
    }

    /// Frames between an input sample and its first wet output.
    pub fn latency(&self) -> usize {
        0
    }

    /// Convolves interleaved `input` into `output` (same layout, overwritten).
    pub fn process_interleaved(&mut self, input: &[f32], output: &mut [f32], channels: usize) {
        if self.head.is_empty() || channels == 0 {
            output.fill(0.0);
            return;
        }
        let len = input.len().min(output.len());
        let (input, output) = (&input[..len], &mut output[..len]);
        if self.early_out.len() < len {
            self.early_out.resize(len, 0.0);
            self.late_out.resize(len, 0.0);
        }
        self.early
            .process_interleaved(input, &mut self.early_out[..len], channels);
        self.late
            .process_interleaved(input, &mut self.late_out[..len], channels);

        let lanes = self.head.len();
        for (f, (fin, fout)) in input
            .chunks_exact(channels)
            .zip(output.chunks_exact_mut(channels))
            .enumerate()
        {
            let pos = self.pos;
            for (c, (&x, y)) in fin.iter().zip(fout.iter_mut()).enumerate() {
                let lane = c % lanes;
                let recent = &mut self.recent[lane];
                recent[pos] = x;
                recent[pos + HEAD_TAPS] = x;
                // recent[pos + 1..=pos + HEAD_TAPS] runs oldest to newest.
                let direct: f32 = recent[pos + 1..=pos + HEAD_TAPS]
                    .iter()
                    .zip(&self.head[lane])
                    .map(|(a, b)| a * b)
                    .sum();
                let i = f * channels + c;
                *y = direct + self.early_out[i] + self.late_out[i];
            }
            self.pos = (pos + 1) % HEAD_TAPS;
        }
    }
}

struct Lane {
    partitions: Vec<Vec<Complex<f32>>>,
    history: Vec<Vec<Complex<f32>>>,
    head: usize,
    // [previous block | block being filled]
    window: Vec<f32>,
    output: Vec<f32>,
    acc: Vec<Complex<f32>>,
    work: Vec<Complex<f32>>,
}

/// Uniformly-partitioned overlap-save FFT convolution, one lane per
/// channel. Output for input sample `n` appears at sample `n + block`.
struct UniformConvolver {
    block: usize,
    fft: Arc<dyn Fft<f32>>,
    ifft: Arc<dyn Fft<f32>>,
    scratch: Vec<Complex<f32>>,
    lanes: Vec<Lane>,
    pos: usize,
}

impl UniformConvolver {
    fn new(irs: &[&[f32]], gain: f32, block: usize) -> Self {
        let block = block.max(1);
        let n = block * 2;
        let mut planner = FftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(n);
        let ifft = planner.plan_fft_inverse(n);
        let scratch_len = fft
            .get_inplace_scratch_len()
            .max(ifft.get_inplace_scratch_len());
        let mut scratch = vec![Complex::default(); scratch_len];

        // Fold the IFFT 1/N into the stored spectra.
        let scale = gain / n as f32;
        let lanes = irs
            .iter()
            .map(|ir| {
                let count = ir.len().div_ceil(block).max(1);
                let partitions = (0..count)
                    .map(|k| {
                        let mut spec = vec![Complex::default(); n];
                        let start = (k * block).min(ir.len());
                        let end = ((k + 1) * block).min(ir.len());
                        for (dst, &s) in spec.iter_mut().zip(&ir[start..end]) {
                            *dst = Complex::new(s * scale, 0.0);
                        }
                        fft.process_with_scratch(&mut spec, &mut scratch);
                        spec
                    })
                    .collect();
                Lane {
                    partitions,
                    history: vec![vec![Complex::default(); n]; count],
                    head: 0,
                    window: vec![0.0; n],
                    output: vec![0.0; block],
                    acc: vec![Complex::default(); n],
                    work: vec![Complex::default(); n],
                }
            })
            .collect();

        Self {
            block,
            fft,
            ifft,
            scratch,
            lanes,
            pos: 0,
        }
    }

    fn process_interleaved(&mut self, input: &[f32], output: &mut [f32], channels: usize) {
        if self.lanes.is_empty() || channels == 0 {
            output.fill(0.0);
            return;
        }
        let block = self.block;
        let lane_count = self.lanes.len();
        for (fin, fout) in input.chunks_exact(channels).zip(output.chunks_exact_mut(channels)) {
            for (c, (&x, y)) in fin.iter().zip(fout.iter_mut()).enumerate() {
                let lane = &mut self.lanes[c % lane_count];
                lane.window[block + self.pos] = x;
                *y = lane.output[self.pos];
            }
            self.pos += 1;
            if self.pos == block {
                self.pos = 0;
                for lane in &mut self.lanes {
                    Self::step(lane, block, &*self.fft, &*self.ifft, &mut self.scratch);
                }
            }
        }
    }

    fn step(
        lane: &mut Lane,
        block: usize,
        fft: &dyn Fft<f32>,
        ifft: &dyn Fft<f32>,
        scratch: &mut [Complex<f32>],
    ) {
        for (w, &s) in lane.work.iter_mut().zip(&lane.window) {
            *w = Complex::new(s, 0.0);
        }
        fft.process_with_scratch(&mut lane.work, scratch);
        lane.history[lane.head].copy_from_slice(&lane.work);

        let count = lane.partitions.len();
        lane.acc.fill(Complex::default());
        for k in 0..count {
            let x = &lane.history[(lane.head + count - k) % count];
            let h = &lane.partitions[k];
            for ((a, &xi), &hi) in lane.acc.iter_mut().zip(x).zip(h) {
                *a += xi * hi;
            }
        }
        ifft.process_with_scratch(&mut lane.acc, scratch);

        for (o, a) in lane.output.iter_mut().zip(&lane.acc[block..]) {
            *o = a.re;
        }
        lane.window.copy_within(block.., 0);
        lane.head = (lane.head + 1) % count;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn impulse_length_is_rounded_duration() {
        assert_eq!(ReverbImpulse::generate(48_000, 2.5, 2.0).len(), 120_000);
        assert_eq!(ReverbImpulse::generate(44_100, 2.5, 2.0).len(), 110_250);
        assert_eq!(ReverbImpulse::generate(22_050, 2.5, 2.0).len(), 55_125);
    }

    #[test]
    fn impulse_stays_inside_decaying_envelope() {
        let ir = ReverbImpulse::generate(8_000, 2.5, 2.0);
        let len = ir.len();
        let mut last_bound = f32::INFINITY;
        for i in 0..len {
            let bound = ReverbImpulse::envelope(i, len, 2.0);
            assert!(bound <= last_bound);
            last_bound = bound;
            for c in 0..2 {
                assert!(ir.channel(c)[i].abs() <= bound + 1e-6);
            }
        }
    }

    #[test]
    fn impulse_channels_are_independent_noise() {
        let ir = ReverbImpulse::generate(8_000, 0.5, 2.0);
        assert_ne!(ir.channel(0), ir.channel(1));
        // Early samples are loud; the tail is near silent.
        let head: f32 = ir.channel(0)[..400].iter().map(|s| s.abs()).sum::<f32>() / 400.0;
        let tail: f32 = ir.channel(0)[3_600..].iter().map(|s| s.abs()).sum::<f32>() / 400.0;
        assert!(head > 0.3);
        assert!(tail < 0.01);
    }

    #[test]
    fn partitioned_stage_reproduces_response_after_block() {
        let ir: Vec<f32> = (0..40).map(|i| 1.0 / (i as f32 + 1.0)).collect();
        let block = 16;
        let mut conv = UniformConvolver::new(&[ir.as_slice()], 1.0, block);

        let mut input = vec![0.0f32; 128];
        input[0] = 1.0;
        let mut output = vec![0.0f32; 128];
        conv.process_interleaved(&input, &mut output, 1);

        for &s in &output[..block] {
            assert_eq!(s, 0.0);
        }
        for (k, &h) in ir.iter().enumerate() {
            assert!((output[block + k] - h).abs() < 1e-5, "tap {k}");
        }
        for &s in &output[block + ir.len()..] {
            assert!(s.abs() < 1e-5);
        }
    }

    #[test]
    fn convolution_is_linear_over_blocks() {
        let ir = [0.5f32, 0.25, -0.125];
        let mut conv = UniformConvolver::new(&[&ir[..], &ir[..]], 1.0, 4);
        // Stereo: impulse on the left at frame 2, on the right at frame 5.
        let mut input = vec![0.0f32; 40];
        input[2 * 2] = 1.0;
        input[5 * 2 + 1] = 2.0;
        let mut output = vec![0.0f32; 40];
        conv.process_interleaved(&input, &mut output, 2);

        let left: Vec<f32> = output.iter().step_by(2).copied().collect();
        let right: Vec<f32> = output.iter().skip(1).step_by(2).copied().collect();
        assert!((left[6] - 0.5).abs() < 1e-6);
        assert!((left[8] + 0.125).abs() < 1e-6);
        assert!((right[9] - 1.0).abs() < 1e-6);
        assert!((right[10] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn wet_response_starts_on_the_input_sample() {
        // Crosses the head, the short stage and the long stage.
        let ir: Vec<f32> = (0..3_000).map(|i| ((i as f32) * 0.37).sin() * 0.5).collect();
        let mut conv = Convolver::new(&[ir.as_slice()], 0.5);
        assert_eq!(conv.latency(), 0);

        let mut input = vec![0.0f32; 4_000];
        input[0] = 1.0;
        let mut output = vec![0.0f32; 4_000];
        // Uneven chunks so stage boundaries fall mid-call.
        let mut start = 0;
        for chunk in [7usize, 100, 1_500, 393, 2_000] {
            let end = (start + chunk).min(input.len());
            conv.process_interleaved(&input[start..end], &mut output[start..end], 1);
            start = end;
        }

        for (k, &h) in ir.iter().enumerate() {
            assert!((output[k] - h * 0.5).abs() < 1e-4, "tap {k}");
        }
        for &s in &output[ir.len()..] {
            assert!(s.abs() < 1e-4);
        }
    }

    #[test]
    fn stereo_lanes_stay_separate_without_delay() {
        let left = [1.0f32, 0.5];
        let right = [0.25f32];
        let mut conv = Convolver::new(&[&left[..], &right[..]], 1.0);
        let input = [1.0f32, 0.0, 0.0, 1.0, 0.0, 0.0];
        let mut output = [0.0f32; 6];
        conv.process_interleaved(&input, &mut output, 2);
        let expected = [1.0f32, 0.0, 0.5, 0.25, 0.0, 0.0];
        for (o, e) in output.iter().zip(expected) {
            assert!((o - e).abs() < 1e-6);
        }
    }
}
