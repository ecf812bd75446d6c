// src/engine/mod.rs

pub mod analysis;
pub mod bus;
pub mod clock;
pub mod graph;
pub mod source;
pub mod transport;

pub use analysis::{AnalysisFrame, AnalysisTap};
pub use bus::{BusSink, MasterBus, SinkId};
pub use clock::{EngineClock, ManualClock, SampleClock};
pub use graph::{SharedGraph, SignalGraph, lock_graph};
pub use source::{Slot, SourceHandle};
pub use transport::{SourceSet, TickOutcome, TransportClock};
