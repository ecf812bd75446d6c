// src/engine/bus.rs

use tracing::debug;

/// External consumer of the master mix (the export capture).
pub trait BusSink: Send {
    /// Receives every rendered master block, interleaved.
    fn write(&mut self, block: &[f32], channels: usize);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SinkId(u64);

/// Summing point for backing and processed vocal. Sinks are taps: attaching
/// or removing one never changes what is rendered.
#[derive(Default)]
pub struct MasterBus {
    sinks: Vec<(SinkId, Box<dyn BusSink>)>,
    next_id: u64,
}

impl MasterBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connect(&mut self, sink: Box<dyn BusSink>) -> SinkId {
        let id = SinkId(self.next_id);
        self.next_id += 1;
        self.sinks.push((id, sink));
        debug!(sink = id.0, sinks = self.sinks.len(), "Sink connected to master bus.");
        id
    }

    /// Returns false when `id` was not connected.
    pub fn disconnect(&mut self, id: SinkId) -> bool {
        let before = self.sinks.len();
        self.sinks.retain(|(sid, _)| *sid != id);
        let removed = self.sinks.len() != before;
        if removed {
            debug!(sink = id.0, sinks = self.sinks.len(), "Sink disconnected from master bus.");
        }
        removed
    }

    pub fn is_connected(&self, id: SinkId) -> bool {
        self.sinks.iter().any(|(sid, _)| *sid == id)
    }

    pub fn sink_count(&self) -> usize {
        self.sinks.len()
    }

    pub(crate) fn distribute(&mut self, block: &[f32], channels: usize) {
        for (_, sink) in &mut self.sinks {
            sink.write(block, channels);
        }
    }
}
