// src/config.rs

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::effects::EffectsParameters;

/// Engine-wide settings. Every field has a default, so a config file only
/// needs to name what it overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Rate used when no output device is attached. A device overrides it.
    pub sample_rate: u32,
    pub channels: usize,
    /// Seconds for a parameter to cover ~63% of the way to its target.
    pub smoothing_time_constant: f64,
    pub reverb_seconds: f64,
    pub reverb_decay: f64,
    /// Extra capture time after the track ends so reverb tails and encoder
    /// flush are not truncated.
    pub export_margin_seconds: f64,
    pub export_fps: u32,
    pub export_dir: PathBuf,
    pub analysis_fft_size: usize,
    pub analysis_smoothing: f32,
    pub effects: EffectsParameters,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            channels: 2,
            smoothing_time_constant: 0.1,
            reverb_seconds: 2.5,
            reverb_decay: 2.0,
            export_margin_seconds: 0.5,
            export_fps: 30,
            export_dir: PathBuf::from("."),
            analysis_fft_size: 2048,
            analysis_smoothing: 0.8,
            effects: EffectsParameters::default(),
        }
    }
}

impl EngineConfig {
    pub fn load_from_disk(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        let config: Self = serde_json::from_reader(reader)?;
        Ok(config.normalized())
    }

    pub fn save_to_disk(&self, path: impl AsRef<Path>) -> Result<()> {
        let file = File::create(path)?;
        let writer = BufWriter::new(file);
        serde_json::to_writer_pretty(writer, self)?;
        Ok(())
    }

    /// Replaces values the engine cannot run with by their defaults or the
    /// nearest usable value. Silent: a config file cannot stop the engine.
    pub fn normalized(mut self) -> Self {
        let defaults = Self::default();
        if self.sample_rate == 0 {
            self.sample_rate = defaults.sample_rate;
        }
        self.channels = self.channels.max(1);
        self.export_fps = self.export_fps.max(1);
        if !self.smoothing_time_constant.is_finite() || self.smoothing_time_constant < 0.0 {
            self.smoothing_time_constant = defaults.smoothing_time_constant;
        }
        if !self.reverb_seconds.is_finite() || self.reverb_seconds < 0.0 {
            self.reverb_seconds = defaults.reverb_seconds;
        }
        if !self.reverb_decay.is_finite() || self.reverb_decay < 0.0 {
            self.reverb_decay = defaults.reverb_decay;
        }
        if !self.export_margin_seconds.is_finite() || self.export_margin_seconds < 0.0 {
            self.export_margin_seconds = defaults.export_margin_seconds;
        }
        if !self.analysis_smoothing.is_finite() {
            self.analysis_smoothing = defaults.analysis_smoothing;
        }
        self.analysis_smoothing = self.analysis_smoothing.clamp(0.0, 1.0);
        self.effects = self.effects.clamped(&defaults.effects);
        self
    }

    /// Same settings, running at `sample_rate` (used once the device rate is known).
    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = sample_rate;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let config: EngineConfig =
            serde_json::from_str(r#"{ "sample_rate": 44100, "export_fps": 25 }"#).unwrap();
        assert_eq!(config.sample_rate, 44100);
        assert_eq!(config.export_fps, 25);
        assert_eq!(config.channels, 2);
        assert_eq!(config.export_margin_seconds, 0.5);
        assert_eq!(config.reverb_seconds, 2.5);
    }

    #[test]
    fn save_and_load_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("studiomix.json");
        let mut config = EngineConfig::default();
        config.effects.reverb_mix = 0.25;
        config.save_to_disk(&path).unwrap();

        let loaded = EngineConfig::load_from_disk(&path).unwrap();
        assert_eq!(loaded.effects.reverb_mix, 0.25);
        assert_eq!(loaded.sample_rate, 48_000);
    }

    #[test]
    fn unusable_values_are_replaced_on_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("studiomix.json");
        std::fs::write(
            &path,
            r#"{ "channels": 0, "sample_rate": 0, "export_fps": 0, "reverb_seconds": -1.0,
                 "analysis_smoothing": 3.0, "effects": { "volume": 9.0 } }"#,
        )
        .unwrap();

        let loaded = EngineConfig::load_from_disk(&path).unwrap();
        assert_eq!(loaded.channels, 1);
        assert_eq!(loaded.sample_rate, 48_000);
        assert_eq!(loaded.export_fps, 1);
        assert_eq!(loaded.reverb_seconds, 2.5);
        assert_eq!(loaded.analysis_smoothing, 1.0);
        assert_eq!(loaded.effects.volume, 2.0);
    }
}
