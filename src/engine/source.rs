// src/engine/source.rs

use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::decoder::AudioAsset;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Slot {
    Backing,
    Vocal,
}

impl Slot {
    pub const ALL: [Slot; 2] = [Slot::Backing, Slot::Vocal];

    pub(crate) fn index(self) -> usize {
        match self {
            Slot::Backing => 0,
            Slot::Vocal => 1,
        }
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Slot::Backing => f.write_str("backing"),
            Slot::Vocal => f.write_str("vocal"),
        }
    }
}

/// One-shot playback of an asset from `offset` seconds. Never restarts:
/// a new play or seek builds a new handle.
pub struct SourceHandle {
    asset: Arc<AudioAsset>,
    offset: f64,
    scheduled_at: f64,
    cursor: usize,
}

impl SourceHandle {
    pub fn new(asset: Arc<AudioAsset>, offset: f64, scheduled_at: f64) -> Self {
        let offset = offset.max(0.0);
        let cursor = (offset * asset.sample_rate() as f64).round() as usize;
        Self {
            cursor: cursor.min(asset.frames()),
            asset,
            offset,
            scheduled_at,
        }
    }

    pub fn offset(&self) -> f64 {
        self.offset
    }

    /// Engine-clock instant the handle was started at.
    pub fn scheduled_at(&self) -> f64 {
        self.scheduled_at
    }

    /// Asset time of the next frame to be read.
    pub fn position(&self) -> f64 {
        self.cursor as f64 / self.asset.sample_rate().max(1) as f64
    }

    pub fn is_finished(&self) -> bool {
        self.cursor >= self.asset.frames()
    }

    /// Overwrites `out` (interleaved, `channels` wide) with the next frames.
    /// Past the end of the asset the remainder is silence. Returns the number
    /// of frames that carried audio.
    pub fn read_into(&mut self, out: &mut [f32], channels: usize) -> usize {
        let src_channels = self.asset.channels().max(1);
        let samples = self.asset.samples();
        let frames = out.len() / channels.max(1);
        let available = self.asset.frames().saturating_sub(self.cursor).min(frames);

        if src_channels == channels {
            let start = self.cursor * channels;
            let len = available * channels;
            out[..len].copy_from_slice(&samples[start..start + len]);
        } else {
            // Assets are decoded to the engine layout; this covers a mismatch
            // by repeating or dropping channels.
            for (f, frame) in out.chunks_exact_mut(channels).take(available).enumerate() {
                let base = (self.cursor + f) * src_channels;
                for (c, sample) in frame.iter_mut().enumerate() {
                    *sample = samples[base + c % src_channels];
                }
            }
        }
        out[available * channels..].fill(0.0);
        self.cursor += available;
        available
    }
}
