// src/engine/transport.rs

use std::sync::Arc;

use tracing::{debug, info};

use crate::engine::clock::EngineClock;
use crate::engine::graph::SignalGraph;
use crate::engine::source::Slot;

/// Which slots a transport run plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceSet {
    /// Recording: the vocal is being captured, not played.
    BackingOnly,
    All,
}

impl SourceSet {
    fn slots(self) -> &'static [Slot] {
        match self {
            SourceSet::BackingOnly => &[Slot::Backing],
            SourceSet::All => &Slot::ALL,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TickOutcome {
    /// Not running; nothing happened.
    Idle,
    Position(f64),
    /// Reached the end this tick. Sources are stopped and the position is
    /// clamped to the duration.
    Finished(f64),
}

struct Run {
    reference_start: f64,
    sources: SourceSet,
}

/// The single writer of timeline position. Position is always derived from
/// the engine clock, never accumulated.
pub struct TransportClock {
    clock: Arc<dyn EngineClock>,
    duration: f64,
    position: f64,
    run: Option<Run>,
}

impl TransportClock {
    pub fn new(clock: Arc<dyn EngineClock>) -> Self {
        Self {
            clock,
            duration: 0.0,
            position: 0.0,
            run: None,
        }
    }

    pub fn clock(&self) -> &Arc<dyn EngineClock> {
        &self.clock
    }

    pub fn duration(&self) -> f64 {
        self.duration
    }

    pub fn set_duration(&mut self, duration: f64) {
        self.duration = duration.max(0.0);
        self.position = self.position.min(self.duration);
    }

    pub fn position(&self) -> f64 {
        self.position
    }

    pub fn is_running(&self) -> bool {
        self.run.is_some()
    }

    /// Engine-clock instant that maps to project time 0 of the current run.
    pub fn reference_start(&self) -> Option<f64> {
        self.run.as_ref().map(|r| r.reference_start)
    }

    /// Starts a run at `at` seconds of project time and starts the sources there.
    pub fn begin(&mut self, at: f64, sources: SourceSet, graph: &mut SignalGraph) {
        let at = at.clamp(0.0, self.duration);
        let now = self.clock.now();
        graph.stop_all();
        for &slot in sources.slots() {
            graph.start(slot, at, now);
        }
        self.position = at;
        self.run = Some(Run {
            reference_start: now - at,
            sources,
        });
        info!(at, ?sources, "Transport started.");
    }

    /// One frame of the update loop.
    pub fn tick(&mut self, graph: &mut SignalGraph) -> TickOutcome {
        let Some(run) = &self.run else {
            return TickOutcome::Idle;
        };
        let elapsed = self.clock.now() - run.reference_start;
        if elapsed >= self.duration {
            self.run = None;
            graph.stop_all();
            self.position = self.duration;
            info!(position = self.position, "Transport reached end.");
            return TickOutcome::Finished(self.position);
        }
        self.position = elapsed.max(0.0);
        TickOutcome::Position(self.position)
    }

    /// Moves to `to`. While running, the reference is rebased and sources are
    /// restarted at the new offset.
    pub fn seek(&mut self, to: f64, graph: &mut SignalGraph) {
        let to = to.clamp(0.0, self.duration);
        self.position = to;
        if let Some(run) = self.run.as_mut() {
            let now = self.clock.now();
            run.reference_start = now - to;
            graph.stop_all();
            for &slot in run.sources.slots() {
                graph.start(slot, to, now);
            }
        }
        debug!(to, running = self.run.is_some(), "Transport seek.");
    }

    /// Ends the run. Idempotent; returns whether a run was active.
    pub fn stop(&mut self, graph: &mut SignalGraph) -> bool {
        graph.stop_all();
        let was_running = self.run.take().is_some();
        if was_running {
            info!(position = self.position, "Transport stopped.");
        }
        was_running
    }

    /// Forgets position and run. Used when the timeline is replaced.
    pub fn rewind(&mut self, graph: &mut SignalGraph) {
        self.stop(graph);
        self.position = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::decoder::AudioAsset;
    use crate::engine::clock::ManualClock;

    fn setup(seconds: f64) -> (Arc<ManualClock>, TransportClock, SignalGraph) {
        let sr = 1_000;
        let mut graph = SignalGraph::new(&EngineConfig::default().with_sample_rate(sr));
        let frames = (seconds * sr as f64) as usize;
        let asset = AudioAsset::from_interleaved(vec![0.1; frames * 2], sr, 2);
        let duration = graph.install(Slot::Backing, asset.clone());
        graph.install(Slot::Vocal, asset);
        let clock = ManualClock::new();
        clock.set(3.0);
        let mut transport = TransportClock::new(clock.clone());
        transport.set_duration(duration);
        (clock, transport, graph)
    }

    #[test]
    fn begin_sets_reference_from_clock() {
        let (clock, mut transport, mut graph) = setup(10.0);
        transport.begin(2.0, SourceSet::All, &mut graph);
        assert_eq!(transport.reference_start(), Some(1.0));
        assert_eq!(graph.active_sources(), 2);
        clock.advance(0.5);
        assert_eq!(transport.tick(&mut graph), TickOutcome::Position(2.5));
    }

    #[test]
    fn backing_only_leaves_vocal_silent() {
        let (_clock, mut transport, mut graph) = setup(10.0);
        transport.begin(0.0, SourceSet::BackingOnly, &mut graph);
        assert!(graph.is_active(Slot::Backing));
        assert!(!graph.is_active(Slot::Vocal));
    }

    #[test]
    fn tick_clamps_at_duration_and_stops() {
        let (clock, mut transport, mut graph) = setup(10.0);
        transport.begin(9.0, SourceSet::All, &mut graph);
        clock.advance(1.5);
        assert_eq!(transport.tick(&mut graph), TickOutcome::Finished(10.0));
        assert!(!transport.is_running());
        assert_eq!(graph.active_sources(), 0);
        // Nothing fires after stop.
        clock.advance(1.0);
        assert_eq!(transport.tick(&mut graph), TickOutcome::Idle);
        assert_eq!(transport.position(), 10.0);
    }

    #[test]
    fn seek_while_running_rebases_without_double_counting() {
        let (clock, mut transport, mut graph) = setup(10.0);
        transport.begin(0.0, SourceSet::All, &mut graph);
        clock.advance(3.0);
        transport.tick(&mut graph);

        transport.seek(5.0, &mut graph);
        assert_eq!(transport.position(), 5.0);
        let src = graph.source(Slot::Backing).unwrap();
        assert_eq!(src.offset(), 5.0);

        clock.advance(0.25);
        assert_eq!(transport.tick(&mut graph), TickOutcome::Position(5.25));
    }

    #[test]
    fn seek_while_stopped_only_moves_position() {
        let (_clock, mut transport, mut graph) = setup(10.0);
        transport.seek(4.0, &mut graph);
        assert_eq!(transport.position(), 4.0);
        assert_eq!(graph.active_sources(), 0);
        transport.seek(42.0, &mut graph);
        assert_eq!(transport.position(), 10.0);
    }

    #[test]
    fn stop_is_idempotent() {
        let (_clock, mut transport, mut graph) = setup(10.0);
        assert!(!transport.stop(&mut graph));
        transport.begin(0.0, SourceSet::All, &mut graph);
        assert!(transport.stop(&mut graph));
        assert!(!transport.stop(&mut graph));
        assert_eq!(graph.active_sources(), 0);
    }
}
