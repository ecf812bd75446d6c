// src/effects/equalizer.rs

use biquad::*;
use tracing::warn;

use crate::effects::smoothing::SmoothedParam;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EqFilterType {
    LowShelf,
    Peaking,
    HighShelf,
}

/// Retune only when the smoothed gain has moved at least this far (dB).
const RETUNE_THRESHOLD_DB: f32 = 1e-3;

/// One band of the vocal EQ. Frequency and Q are fixed; the gain glides.
pub struct EqBand {
    filter_type: EqFilterType,
    freq: f32,
    q: f32,
    gain_db: SmoothedParam,
    tuned_gain_db: f32,
    filters: Vec<DirectForm2Transposed<f32>>,
    sr: u32,
}

impl EqBand {
    pub fn new(
        filter_type: EqFilterType,
        freq: f32,
        q: f32,
        sr: u32,
        channels: usize,
        smoothing: f64,
    ) -> Self {
        let coeffs = Self::coefficients(filter_type, freq, q, 0.0, sr)
            .unwrap_or_else(Self::passthrough);
        let filters = (0..channels)
            .map(|_| DirectForm2Transposed::<f32>::new(coeffs))
            .collect();

        Self {
            filter_type,
            freq,
            q,
            gain_db: SmoothedParam::new(0.0, smoothing, sr),
            tuned_gain_db: 0.0,
            filters,
            sr,
        }
    }

    pub fn low_shelf(freq: f32, sr: u32, channels: usize, smoothing: f64) -> Self {
        Self::new(EqFilterType::LowShelf, freq, Q_BUTTERWORTH_F32, sr, channels, smoothing)
    }

    pub fn peaking(freq: f32, q: f32, sr: u32, channels: usize, smoothing: f64) -> Self {
        Self::new(EqFilterType::Peaking, freq, q, sr, channels, smoothing)
    }

    pub fn high_shelf(freq: f32, sr: u32, channels: usize, smoothing: f64) -> Self {
        Self::new(EqFilterType::HighShelf, freq, Q_BUTTERWORTH_F32, sr, channels, smoothing)
    }

    pub fn set_gain_target(&mut self, gain_db: f32) {
        self.gain_db.set_target(gain_db);
    }

    pub fn gain(&self) -> &SmoothedParam {
        &self.gain_db
    }

    fn passthrough() -> Coefficients<f32> {
        Coefficients {
            a1: 0.0,
            a2: 0.0,
            b0: 1.0,
            b1: 0.0,
            b2: 0.0,
        }
    }

    fn coefficients(
        filter_type: EqFilterType,
        freq: f32,
        q: f32,
        gain_db: f32,
        sr: u32,
    ) -> Option<Coefficients<f32>> {
        // Freq must stay below Nyquist, Q above zero.
        let safe_freq = freq.clamp(20.0, (sr as f32 / 2.0) - 1.0);
        let safe_q = q.max(0.1);

        let biquad_type = match filter_type {
            EqFilterType::LowShelf => Type::LowShelf(gain_db),
            EqFilterType::Peaking => Type::PeakingEQ(gain_db),
            EqFilterType::HighShelf => Type::HighShelf(gain_db),
        };

        Coefficients::<f32>::from_params(biquad_type, (sr as f32).hz(), safe_freq.hz(), safe_q).ok()
    }

    /// Advances the gain glide by `frames` and retunes the filters when it moved.
    /// Filter state is kept so retuning is click-free.
    pub fn settle(&mut self, frames: usize) {
        let gain = self.gain_db.advance(frames);
        let moved = (gain - self.tuned_gain_db).abs();
        let settled = gain == self.gain_db.target();
        if moved == 0.0 || (moved < RETUNE_THRESHOLD_DB && !settled) {
            return;
        }
        match Self::coefficients(self.filter_type, self.freq, self.q, gain, self.sr) {
            Some(coeffs) => {
                for filter in &mut self.filters {
                    filter.update_coefficients(coeffs);
                }
                self.tuned_gain_db = gain;
            }
            None => warn!(freq = self.freq, gain, "Failed to calculate EQ coefficients."),
        }
    }

    #[inline]
    pub fn process(&mut self, sample: f32, channel_idx: usize) -> f32 {
        match self.filters.get_mut(channel_idx) {
            Some(filter) => {
                let out = filter.run(sample);
                // Denormal protection
                if out.abs() < 1e-20 { 0.0 } else { out }
            }
            None => sample,
        }
    }
}
