// src/effects/mod.rs

pub mod equalizer;
pub mod reverb;
pub mod smoothing;

use serde::{Deserialize, Serialize};
use tracing::debug;

use equalizer::EqBand;
use reverb::{Convolver, ReverbImpulse};
use smoothing::SmoothedParam;

pub const LOW_SHELF_HZ: f32 = 320.0;
pub const PEAKING_HZ: f32 = 1000.0;
pub const PEAKING_Q: f32 = 0.5;
pub const HIGH_SHELF_HZ: f32 = 3200.0;

/// Filter coefficients are recomputed at this frame interval while gliding.
const CONTROL_FRAMES: usize = 32;

/// User-facing vocal controls.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EffectsParameters {
    /// Linear gain, 0..=2.
    pub volume: f32,
    /// dB, -20..=20.
    pub low_gain: f32,
    pub mid_gain: f32,
    pub high_gain: f32,
    /// 0..=1.
    pub reverb_mix: f32,
}

impl Default for EffectsParameters {
    fn default() -> Self {
        Self {
            volume: 1.0,
            low_gain: 0.0,
            mid_gain: 0.0,
            high_gain: 0.0,
            reverb_mix: 0.0,
        }
    }
}

impl EffectsParameters {
    /// Clamps every field into its documented range. Non-finite values fall
    /// back to `fallback`'s field.
    pub fn clamped(self, fallback: &EffectsParameters) -> Self {
        fn fit(v: f32, fallback: f32, lo: f32, hi: f32) -> f32 {
            if v.is_finite() { v.clamp(lo, hi) } else { fallback }
        }
        Self {
            volume: fit(self.volume, fallback.volume, 0.0, 2.0),
            low_gain: fit(self.low_gain, fallback.low_gain, -20.0, 20.0),
            mid_gain: fit(self.mid_gain, fallback.mid_gain, -20.0, 20.0),
            high_gain: fit(self.high_gain, fallback.high_gain, -20.0, 20.0),
            reverb_mix: fit(self.reverb_mix, fallback.reverb_mix, 0.0, 1.0),
        }
    }

    /// Dry level for a reverb mix. Attenuates only partially.
    pub fn dry_gain(&self) -> f32 {
        1.0 - self.reverb_mix * 0.6
    }

    /// Wet level for a reverb mix. Boosted: reaches 2.0 at full mix.
    pub fn wet_gain(&self) -> f32 {
        self.reverb_mix * 2.0
    }
}

/// Current (gliding) levels of every stage, for observation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChainLevels {
    pub volume: f32,
    pub low_gain: f32,
    pub mid_gain: f32,
    pub high_gain: f32,
    pub dry: f32,
    pub wet: f32,
}

/// Fixed vocal topology:
/// gain -> low shelf -> peaking -> high shelf -> { dry, reverb -> wet } -> master.
pub struct EffectsChain {
    channels: usize,
    volume: SmoothedParam,
    bands: [EqBand; 3],
    dry: SmoothedParam,
    wet: SmoothedParam,
    reverb: Convolver,
    params: EffectsParameters,
    wet_out: Vec<f32>,
}

impl EffectsChain {
    pub fn new(
        sample_rate: u32,
        channels: usize,
        smoothing: f64,
        impulse: &ReverbImpulse,
        initial: EffectsParameters,
    ) -> Self {
        let initial = initial.clamped(&EffectsParameters::default());
        let mut bands = [
            EqBand::low_shelf(LOW_SHELF_HZ, sample_rate, channels, smoothing),
            EqBand::peaking(PEAKING_HZ, PEAKING_Q, sample_rate, channels, smoothing),
            EqBand::high_shelf(HIGH_SHELF_HZ, sample_rate, channels, smoothing),
        ];
        // Start at the initial settings rather than gliding into them.
        for (band, gain) in bands
            .iter_mut()
            .zip([initial.low_gain, initial.mid_gain, initial.high_gain])
        {
            band.set_gain_target(gain);
            band.settle(i32::MAX as usize);
        }

        Self {
            channels,
            volume: SmoothedParam::new(initial.volume, smoothing, sample_rate),
            bands,
            dry: SmoothedParam::new(initial.dry_gain(), smoothing, sample_rate),
            wet: SmoothedParam::new(initial.wet_gain(), smoothing, sample_rate),
            reverb: Convolver::from_impulse(impulse, channels),
            params: initial,
            wet_out: Vec::new(),
        }
    }

    /// Retargets every stage. Values glide there with the chain's time
    /// constant; nothing changes instantaneously.
    pub fn apply(&mut self, params: EffectsParameters) {
        let params = params.clamped(&self.params);
        self.volume.set_target(params.volume);
        self.bands[0].set_gain_target(params.low_gain);
        self.bands[1].set_gain_target(params.mid_gain);
        self.bands[2].set_gain_target(params.high_gain);
        self.dry.set_target(params.dry_gain());
        self.wet.set_target(params.wet_gain());
        self.params = params;
        debug!(?params, "Effects retargeted.");
    }

    /// Last applied parameters (the targets).
    pub fn params(&self) -> EffectsParameters {
        self.params
    }

    pub fn levels(&self) -> ChainLevels {
        ChainLevels {
            volume: self.volume.current(),
            low_gain: self.bands[0].gain().current(),
            mid_gain: self.bands[1].gain().current(),
            high_gain: self.bands[2].gain().current(),
            dry: self.dry.current(),
            wet: self.wet.current(),
        }
    }

    pub fn reverb_latency(&self) -> usize {
        self.reverb.latency()
    }

    /// Runs the vocal block through the chain and sums the result into
    /// `master`. `vocal` is used as scratch and holds the post-EQ signal
    /// afterwards. Silence still runs so reverb tails ring out.
    pub fn process(&mut self, vocal: &mut [f32], master: &mut [f32]) {
        let channels = self.channels;
        let len = vocal.len().min(master.len());
        let (vocal, master) = (&mut vocal[..len], &mut master[..len]);

        // Gain + EQ, retuning filters every CONTROL_FRAMES.
        for chunk in vocal.chunks_mut(CONTROL_FRAMES * channels) {
            let frames = chunk.len() / channels;
            for band in &mut self.bands {
                band.settle(frames);
            }
            for frame in chunk.chunks_exact_mut(channels) {
                let g = self.volume.next();
                for (ch, sample) in frame.iter_mut().enumerate() {
                    let mut s = *sample * g;
                    for band in &mut self.bands {
                        s = band.process(s, ch);
                    }
                    *sample = s;
                }
            }
        }

        if self.wet_out.len() < len {
            self.wet_out.resize(len, 0.0);
        }
        let wet_out = &mut self.wet_out[..len];
        self.reverb.process_interleaved(vocal, wet_out, channels);

        for ((out, dry_in), wet_in) in master
            .chunks_exact_mut(channels)
            .zip(vocal.chunks_exact(channels))
            .zip(wet_out.chunks_exact(channels))
        {
            let d = self.dry.next();
            let w = self.wet.next();
            for ((o, &x), &r) in out.iter_mut().zip(dry_in).zip(wet_in) {
                *o += x * d + r * w;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    const SR: u32 = 8_000;

    fn chain(initial: EffectsParameters) -> EffectsChain {
        let impulse = ReverbImpulse::generate(SR, 2.5, 2.0);
        EffectsChain::new(SR, 2, 0.1, &impulse, initial)
    }

    #[test]
    fn mix_mapping_is_asymmetric() {
        let p = EffectsParameters {
            reverb_mix: 1.0,
            ..Default::default()
        };
        assert_abs_diff_eq!(p.dry_gain(), 0.4);
        assert_abs_diff_eq!(p.wet_gain(), 2.0);
        let half = EffectsParameters {
            reverb_mix: 0.5,
            ..Default::default()
        };
        assert_abs_diff_eq!(half.dry_gain(), 0.7);
        assert_abs_diff_eq!(half.wet_gain(), 1.0);
    }

    #[test]
    fn out_of_range_values_are_clamped() {
        let p = EffectsParameters {
            volume: 5.0,
            low_gain: -40.0,
            mid_gain: f32::NAN,
            high_gain: 21.0,
            reverb_mix: -1.0,
        }
        .clamped(&EffectsParameters::default());
        assert_eq!(p.volume, 2.0);
        assert_eq!(p.low_gain, -20.0);
        assert_eq!(p.mid_gain, 0.0);
        assert_eq!(p.high_gain, 20.0);
        assert_eq!(p.reverb_mix, 0.0);
    }

    #[test]
    fn apply_never_jumps() {
        let mut fx = chain(EffectsParameters::default());
        let before = fx.levels();
        fx.apply(EffectsParameters {
            volume: 2.0,
            low_gain: 20.0,
            mid_gain: -20.0,
            high_gain: 20.0,
            reverb_mix: 1.0,
        });
        // Targets move, levels do not.
        assert_eq!(fx.levels(), before);
        assert_eq!(fx.params().reverb_mix, 1.0);

        // One sample later every level has moved by a small step only.
        let mut vocal = vec![0.0f32; 2];
        let mut master = vec![0.0f32; 2];
        fx.process(&mut vocal, &mut master);
        let after = fx.levels();
        assert!((after.volume - before.volume).abs() < 0.01);
        assert!((after.dry - before.dry).abs() < 0.01);
        assert!((after.wet - before.wet).abs() < 0.01);
        assert!((after.low_gain - before.low_gain).abs() < 1.0);
    }

    #[test]
    fn levels_follow_time_constant() {
        let mut fx = chain(EffectsParameters::default());
        fx.apply(EffectsParameters {
            reverb_mix: 1.0,
            ..Default::default()
        });
        // 0.1 s at 8 kHz = one time constant.
        let frames = 800;
        let mut vocal = vec![0.0f32; frames * 2];
        let mut master = vec![0.0f32; frames * 2];
        fx.process(&mut vocal, &mut master);

        let e = (-1.0f32).exp();
        let levels = fx.levels();
        assert_abs_diff_eq!(levels.dry, 0.4 + 0.6 * e, epsilon = 1e-3);
        assert_abs_diff_eq!(levels.wet, 2.0 * (1.0 - e), epsilon = 1e-3);
    }

    #[test]
    fn unity_settings_pass_vocal_through() {
        let mut fx = chain(EffectsParameters::default());
        let mut vocal: Vec<f32> = (0..512).map(|i| ((i / 2) as f32 * 0.1).sin() * 0.3).collect();
        let original = vocal.clone();
        let mut master = vec![0.0f32; 512];
        fx.process(&mut vocal, &mut master);
        for (m, o) in master.iter().zip(&original) {
            assert!((m - o).abs() < 1e-3);
        }
    }

    #[test]
    fn reverb_tail_rings_after_input_stops() {
        let mut fx = chain(EffectsParameters {
            reverb_mix: 1.0,
            ..Default::default()
        });
        let latency = fx.reverb_latency();
        assert_eq!(latency, 0);
        let mut vocal = vec![0.0f32; 64 * 2];
        vocal[0] = 1.0;
        vocal[1] = 1.0;
        let mut master = vec![0.0f32; 64 * 2];
        fx.process(&mut vocal, &mut master);

        let frames = latency + 2_000;
        let mut silence = vec![0.0f32; frames * 2];
        let mut tail = vec![0.0f32; frames * 2];
        fx.process(&mut silence, &mut tail);
        let energy: f32 = tail.iter().map(|s| s * s).sum();
        assert!(energy > 0.0);
    }
}
