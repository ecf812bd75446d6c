// src/error.rs

use crate::audio_engine::TransportState;

/// Failure to turn encoded bytes into a PCM asset.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("unsupported or malformed audio data: {0}")]
    Format(#[from] symphonia::core::errors::Error),

    #[error("no decodable audio track in stream")]
    NoTrack,

    #[error("audio stream contained no frames")]
    Empty,

    #[error("resampling failed: {0}")]
    Resample(String),
}

/// Errors surfaced to the control surface. None of them are fatal: the
/// engine stays usable after any of these.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("microphone access denied: {0}")]
    PermissionDenied(String),

    #[error("no visual frame source is available for export")]
    CaptureSourceUnavailable,

    #[error("transport busy: engine is {0:?}")]
    ResourceBusy(TransportState),

    #[error("cannot {action} while {state:?}")]
    InvalidTransition {
        action: &'static str,
        state: TransportState,
    },

    #[error("no backing track loaded")]
    NoBackingTrack,

    #[error("audio device error: {0}")]
    Device(#[from] anyhow::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

pub type Result<T, E = EngineError> = std::result::Result<T, E>;
