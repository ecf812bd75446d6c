// src/lib.rs

pub mod audio;
pub mod audio_engine;
pub mod capture;
pub mod config;
pub mod decoder;
pub mod effects;
pub mod engine;
pub mod error;
pub mod export;
pub mod studio_controller;

pub use audio_engine::{AudioEngine, EngineSnapshot, TickReport, TransportState};
pub use config::EngineConfig;
pub use effects::EffectsParameters;
pub use engine::{EngineClock, ManualClock, SampleClock};
pub use error::{DecodeError, EngineError};
pub use export::{ExportArtifact, VideoFrame, VisualFrameSource};
