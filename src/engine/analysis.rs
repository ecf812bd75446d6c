// src/engine/analysis.rs

use std::f32::consts::PI;
use std::sync::{Arc, Mutex, PoisonError};

use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use serde::Serialize;

pub const MIN_DECIBELS: f32 = -100.0;
pub const MAX_DECIBELS: f32 = -30.0;

/// Frequency-domain view of the master bus for visualisers.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AnalysisFrame {
    pub sample_rate: u32,
    pub fft_size: usize,
    /// Smoothed magnitude per bin (0..=fft_size/2), in dB.
    pub decibels: Vec<f32>,
    /// The same bins mapped from [MIN_DECIBELS, MAX_DECIBELS] onto 0..=255.
    pub bytes: Vec<u8>,
}

impl AnalysisFrame {
    pub fn bin_frequency(&self, bin: usize) -> f32 {
        bin as f32 * self.sample_rate as f32 / self.fft_size.max(1) as f32
    }
}

struct TapState {
    ring: Vec<f32>,
    write: usize,
    smoothed: Vec<f32>,
    window: Vec<f32>,
    fft: Arc<dyn Fft<f32>>,
    work: Vec<Complex<f32>>,
}

/// Read-only observer of the master mix. The render path pushes samples with
/// `try_lock` so a reader never stalls the audio thread.
#[derive(Clone)]
pub struct AnalysisTap {
    inner: Arc<Mutex<TapState>>,
    sample_rate: u32,
    fft_size: usize,
    smoothing: f32,
}

impl AnalysisTap {
    pub fn new(sample_rate: u32, fft_size: usize, smoothing: f32) -> Self {
        let fft_size = fft_size.max(32).next_power_of_two();
        let fft = FftPlanner::<f32>::new().plan_fft_forward(fft_size);
        let window = (0..fft_size)
            .map(|i| 0.5 * (1.0 - (2.0 * PI * i as f32 / (fft_size - 1) as f32).cos()))
            .collect();
        let state = TapState {
            ring: vec![0.0; fft_size],
            write: 0,
            smoothed: vec![0.0; fft_size / 2 + 1],
            window,
            fft,
            work: vec![Complex::default(); fft_size],
        };
        Self {
            inner: Arc::new(Mutex::new(state)),
            sample_rate,
            fft_size,
            smoothing: smoothing.clamp(0.0, 1.0),
        }
    }

    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    /// Appends the block's mono downmix. Skipped when a reader holds the lock.
    pub(crate) fn push(&self, block: &[f32], channels: usize) {
        let Ok(mut state) = self.inner.try_lock() else {
            return;
        };
        let channels = channels.max(1);
        let len = state.ring.len();
        for frame in block.chunks_exact(channels) {
            let mono = frame.iter().sum::<f32>() / channels as f32;
            let w = state.write;
            state.ring[w] = mono;
            state.write = (w + 1) % len;
        }
    }

    /// Analyses the most recent `fft_size` samples. Each call folds the new
    /// spectrum into the running average.
    pub fn frequency_data(&self) -> AnalysisFrame {
        let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let state = &mut *guard;
        let n = self.fft_size;

        for i in 0..n {
            let s = state.ring[(state.write + i) % n];
            state.work[i] = Complex::new(s * state.window[i], 0.0);
        }
        state.fft.process(&mut state.work);

        let tau = self.smoothing;
        let mut decibels = Vec::with_capacity(state.smoothed.len());
        let mut bytes = Vec::with_capacity(state.smoothed.len());
        for (bin, avg) in state.smoothed.iter_mut().enumerate() {
            let magnitude = state.work[bin].norm() / n as f32;
            *avg = tau * *avg + (1.0 - tau) * magnitude;
            let db = if *avg > 0.0 { 20.0 * avg.log10() } else { f32::NEG_INFINITY };
            let scaled = (db - MIN_DECIBELS) / (MAX_DECIBELS - MIN_DECIBELS) * 255.0;
            decibels.push(db);
            bytes.push(scaled.clamp(0.0, 255.0) as u8);
        }

        AnalysisFrame {
            sample_rate: self.sample_rate,
            fft_size: n,
            decibels,
            bytes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silence_reads_as_floor() {
        let tap = AnalysisTap::new(8_000, 256, 0.8);
        let frame = tap.frequency_data();
        assert_eq!(frame.bytes.len(), 129);
        assert!(frame.bytes.iter().all(|&b| b == 0));
    }

    #[test]
    fn sine_peaks_at_its_bin() {
        let sr = 8_000;
        let tap = AnalysisTap::new(sr, 256, 0.0);
        // 1 kHz sits exactly on bin 32.
        let block: Vec<f32> = (0..512)
            .flat_map(|i| {
                let s = (2.0 * PI * 1000.0 * i as f32 / sr as f32).sin();
                [s, s]
            })
            .collect();
        tap.push(&block, 2);
        let frame = tap.frequency_data();
        let peak = frame
            .decibels
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
            .unwrap();
        assert_eq!(peak, 32);
        assert!((frame.bin_frequency(peak) - 1000.0).abs() < 1e-3);
        assert!(frame.bytes[32] > 200);
    }

    #[test]
    fn smoothing_averages_over_reads() {
        let tap = AnalysisTap::new(8_000, 64, 0.8);
        tap.push(&vec![0.5; 64], 1);
        let first = tap.frequency_data().decibels[0];
        let second = tap.frequency_data().decibels[0];
        assert!(second > first);
    }
}
