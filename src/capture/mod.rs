// src/capture/mod.rs

pub mod microphone;
pub mod wav;

pub use microphone::CpalMicrophone;

use anyhow::anyhow;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::error::EngineError;

/// Completion of a stopped capture: the finished encoded blob.
pub type CaptureReceiver = oneshot::Receiver<anyhow::Result<Vec<u8>>>;

/// Platform capture collaborator. Access may be refused.
pub trait Microphone: Send {
    fn request_access(&mut self) -> Result<Box<dyn MicrophoneStream>, EngineError>;
}

/// A granted microphone stream. `stop` releases the device and resolves once
/// the encoded blob is final.
pub trait MicrophoneStream: Send {
    fn start(&mut self) -> anyhow::Result<()>;

    fn stop(self: Box<Self>) -> CaptureReceiver;
}

/// One vocal take. `started_at` is the project time the recorder actually
/// began at, so the decoded take can be aligned to the backing.
pub struct CaptureSession {
    stream: Box<dyn MicrophoneStream>,
    started_at: Option<f64>,
}

impl CaptureSession {
    /// Asks the platform for the microphone. Nothing records yet.
    pub fn request(microphone: &mut dyn Microphone) -> Result<Self, EngineError> {
        let stream = microphone.request_access()?;
        debug!("Microphone access granted.");
        Ok(Self {
            stream,
            started_at: None,
        })
    }

    /// Starts recording. `project_time` is read once the recorder runs.
    pub fn begin(&mut self, project_time: impl FnOnce() -> f64) -> Result<(), EngineError> {
        self.stream.start().map_err(EngineError::Device)?;
        let started_at = project_time();
        self.started_at = Some(started_at);
        info!(started_at, "Capture started.");
        Ok(())
    }

    pub fn is_recording(&self) -> bool {
        self.started_at.is_some()
    }

    pub fn started_at(&self) -> f64 {
        self.started_at.unwrap_or(0.0)
    }

    /// Stops the recorder and waits for the finalized blob.
    pub async fn finish(self) -> Result<Vec<u8>, EngineError> {
        let rx = self.stream.stop();
        let bytes = rx
            .await
            .map_err(|_| anyhow!("capture ended without delivering data"))??;
        debug!(bytes = bytes.len(), "Capture blob received.");
        Ok(bytes)
    }

    /// Stops the recorder and discards whatever it captured.
    pub fn cancel(self) {
        drop(self.stream.stop());
        warn!("Capture cancelled.");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed {
        deny: bool,
        fail_start: bool,
    }

    struct FixedStream {
        fail_start: bool,
    }

    impl Microphone for Fixed {
        fn request_access(&mut self) -> Result<Box<dyn MicrophoneStream>, EngineError> {
            if self.deny {
                return Err(EngineError::PermissionDenied("denied in test".into()));
            }
            Ok(Box::new(FixedStream {
                fail_start: self.fail_start,
            }))
        }
    }

    impl MicrophoneStream for FixedStream {
        fn start(&mut self) -> anyhow::Result<()> {
            if self.fail_start {
                anyhow::bail!("device busy");
            }
            Ok(())
        }

        fn stop(self: Box<Self>) -> CaptureReceiver {
            let (tx, rx) = oneshot::channel();
            let _ = tx.send(Ok(vec![1, 2, 3]));
            rx
        }
    }

    #[tokio::test]
    async fn finish_delivers_blob() {
        let mut mic = Fixed {
            deny: false,
            fail_start: false,
        };
        let mut session = CaptureSession::request(&mut mic).unwrap();
        assert!(!session.is_recording());
        session.begin(|| 0.25).unwrap();
        assert!(session.is_recording());
        assert_eq!(session.started_at(), 0.25);
        assert_eq!(session.finish().await.unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn denied_access_is_surfaced() {
        let mut mic = Fixed {
            deny: true,
            fail_start: false,
        };
        let err = CaptureSession::request(&mut mic).err().unwrap();
        assert!(matches!(err, EngineError::PermissionDenied(_)));
    }

    #[test]
    fn start_failure_is_a_device_error() {
        let mut mic = Fixed {
            deny: false,
            fail_start: true,
        };
        let mut session = CaptureSession::request(&mut mic).unwrap();
        let err = session.begin(|| 0.0).err().unwrap();
        assert!(matches!(err, EngineError::Device(_)));
        assert!(!session.is_recording());
        session.cancel();
    }
}
