// src/engine/graph.rs

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, info};

use crate::config::EngineConfig;
use crate::decoder::{AudioAsset, decode_bytes};
use crate::effects::reverb::ReverbImpulse;
use crate::effects::{EffectsChain, EffectsParameters};
use crate::engine::analysis::AnalysisTap;
use crate::engine::bus::{BusSink, MasterBus, SinkId};
use crate::engine::source::{Slot, SourceHandle};
use crate::error::DecodeError;

/// Graph handle shared by the control thread and the device callback.
pub type SharedGraph = Arc<Mutex<SignalGraph>>;

/// Locks the shared graph. A poisoned lock is recovered: the graph holds no
/// invariant a panicking holder could break halfway.
pub fn lock_graph(graph: &Mutex<SignalGraph>) -> MutexGuard<'_, SignalGraph> {
    graph.lock().unwrap_or_else(PoisonError::into_inner)
}

/// The fixed processing topology:
/// backing -> master; vocal -> effects -> master; master -> {output, sinks, analysis}.
pub struct SignalGraph {
    sample_rate: u32,
    channels: usize,
    assets: [Option<Arc<AudioAsset>>; 2],
    sources: [Option<SourceHandle>; 2],
    effects: EffectsChain,
    bus: MasterBus,
    analysis: AnalysisTap,
    vocal_scratch: Vec<f32>,
    backing_scratch: Vec<f32>,
}

impl SignalGraph {
    pub fn new(config: &EngineConfig) -> Self {
        let sample_rate = config.sample_rate;
        let channels = config.channels.max(1);
        let impulse = ReverbImpulse::generate(sample_rate, config.reverb_seconds, config.reverb_decay);
        debug!(sample_rate, ir_len = impulse.len(), "Reverb impulse generated.");

        Self {
            sample_rate,
            channels,
            assets: [None, None],
            sources: [None, None],
            effects: EffectsChain::new(
                sample_rate,
                channels,
                config.smoothing_time_constant,
                &impulse,
                config.effects,
            ),
            bus: MasterBus::new(),
            analysis: AnalysisTap::new(
                sample_rate,
                config.analysis_fft_size,
                config.analysis_smoothing,
            ),
            vocal_scratch: Vec::new(),
            backing_scratch: Vec::new(),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Decodes and installs the backing asset. Returns its duration.
    pub fn load_backing(&mut self, bytes: Vec<u8>) -> Result<f64, DecodeError> {
        let asset = decode_bytes(bytes, self.sample_rate, self.channels)?;
        Ok(self.install(Slot::Backing, asset))
    }

    pub fn load_vocal(&mut self, bytes: Vec<u8>) -> Result<f64, DecodeError> {
        let asset = decode_bytes(bytes, self.sample_rate, self.channels)?;
        Ok(self.install(Slot::Vocal, asset))
    }

    /// Replaces the slot's asset wholesale. A source still playing the old
    /// asset is torn down so it is no longer audible.
    pub fn install(&mut self, slot: Slot, asset: AudioAsset) -> f64 {
        let duration = asset.duration();
        if self.sources[slot.index()].take().is_some() {
            debug!(%slot, "Stopped source of replaced asset.");
        }
        info!(%slot, duration, frames = asset.frames(), "Asset loaded.");
        self.assets[slot.index()] = Some(Arc::new(asset));
        duration
    }

    pub fn clear(&mut self, slot: Slot) {
        self.sources[slot.index()] = None;
        self.assets[slot.index()] = None;
    }

    pub fn asset(&self, slot: Slot) -> Option<&Arc<AudioAsset>> {
        self.assets[slot.index()].as_ref()
    }

    /// Starts `slot` at `offset` seconds into its asset. Any handle already
    /// playing the slot is torn down first. Without an asset this is a no-op
    /// and returns false.
    pub fn start(&mut self, slot: Slot, offset: f64, now: f64) -> bool {
        let Some(asset) = self.assets[slot.index()].clone() else {
            return false;
        };
        self.sources[slot.index()] = None;
        self.sources[slot.index()] = Some(SourceHandle::new(asset, offset, now));
        debug!(%slot, offset, "Source started.");
        true
    }

    pub fn stop(&mut self, slot: Slot) -> bool {
        self.sources[slot.index()].take().is_some()
    }

    /// Tears down every handle. Safe with nothing playing.
    pub fn stop_all(&mut self) -> usize {
        let stopped = Slot::ALL.into_iter().filter(|&s| self.stop(s)).count();
        if stopped > 0 {
            debug!(stopped, "Sources stopped.");
        }
        stopped
    }

    pub fn active_sources(&self) -> usize {
        self.sources.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_active(&self, slot: Slot) -> bool {
        self.sources[slot.index()].is_some()
    }

    pub fn source(&self, slot: Slot) -> Option<&SourceHandle> {
        self.sources[slot.index()].as_ref()
    }

    pub fn master_output_tap(&mut self) -> &mut MasterBus {
        &mut self.bus
    }

    pub fn connect_sink(&mut self, sink: Box<dyn BusSink>) -> SinkId {
        self.bus.connect(sink)
    }

    pub fn disconnect_sink(&mut self, id: SinkId) -> bool {
        self.bus.disconnect(id)
    }

    pub fn analysis_tap(&self) -> AnalysisTap {
        self.analysis.clone()
    }

    pub fn apply_effects(&mut self, params: EffectsParameters) {
        self.effects.apply(params);
    }

    pub fn effects(&self) -> &EffectsChain {
        &self.effects
    }

    /// Renders one interleaved block of the master mix into `out`, feeds the
    /// connected sinks and the analysis tap. Handles that reached the end of
    /// their asset are dropped.
    pub fn render(&mut self, out: &mut [f32]) {
        let channels = self.channels;
        let len = out.len() - out.len() % channels;
        let out = &mut out[..len];
        out.fill(0.0);

        if self.backing_scratch.len() < len {
            self.backing_scratch.resize(len, 0.0);
            self.vocal_scratch.resize(len, 0.0);
        }

        if let Some(src) = self.sources[Slot::Backing.index()].as_mut() {
            let backing = &mut self.backing_scratch[..len];
            src.read_into(backing, channels);
            out.copy_from_slice(backing);
        }

        let vocal = &mut self.vocal_scratch[..len];
        match self.sources[Slot::Vocal.index()].as_mut() {
            Some(src) => {
                src.read_into(vocal, channels);
            }
            None => vocal.fill(0.0),
        }
        // Runs even without a vocal source so the reverb tail decays naturally.
        self.effects.process(vocal, out);

        for slot in Slot::ALL {
            if self.sources[slot.index()]
                .as_ref()
                .is_some_and(SourceHandle::is_finished)
            {
                self.sources[slot.index()] = None;
                debug!(%slot, "Source reached end of asset.");
            }
        }

        self.bus.distribute(out, channels);
        self.analysis.push(out, channels);
    }
}
