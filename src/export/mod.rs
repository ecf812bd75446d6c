// src/export/mod.rs

pub mod avi;
pub mod frame;
pub mod sink;

pub use frame::{VideoFrame, VisualFrameSource};
pub use sink::{BusCapture, CaptureTap};

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use ringbuf::traits::Consumer;
use serde::Serialize;
use tracing::{info, warn};

use crate::config::EngineConfig;
use crate::engine::{SharedGraph, SinkId, lock_graph};
use avi::{AviSpec, AviWriter};

pub const EXPORT_EXTENSION: &str = "avi";

/// `studiomix_export_<unix millis>.avi`
pub fn artifact_name(unix_millis: u128) -> String {
    format!("studiomix_export_{unix_millis}.{EXPORT_EXTENSION}")
}

/// A finished export.
#[derive(Debug, Clone, Serialize)]
pub struct ExportArtifact {
    pub path: PathBuf,
    /// Seconds of wall time captured (track duration plus margin).
    pub duration: f64,
    pub video_frames: u32,
    pub audio_frames: u64,
}

/// Real-time audio+video capture of the master bus. The renderer only
/// encodes; the caller owns the transport and calls `tick` every frame.
/// The graph is locked only to connect and disconnect the capture sink;
/// encoding and file I/O never hold it.
pub struct ExportRenderer {
    graph: SharedGraph,
    writer: AviWriter<BufWriter<File>>,
    path: PathBuf,
    frames: Box<dyn VisualFrameSource>,
    tap: CaptureTap,
    sink: SinkId,
    started_at: f64,
    stop_after: f64,
    fps: u32,
    audio_buf: Vec<f32>,
}

impl ExportRenderer {
    /// Opens the artifact and connects the capture sink to the master bus.
    /// Playback through the device is not affected.
    pub fn start(
        graph: &SharedGraph,
        frames: Box<dyn VisualFrameSource>,
        duration: f64,
        config: &EngineConfig,
        now: f64,
    ) -> Result<Self> {
        let (width, height) = frames.dimensions();
        let (sample_rate, channels) = {
            let graph = lock_graph(graph);
            (graph.sample_rate(), graph.channels())
        };
        let spec = AviSpec {
            width,
            height,
            fps: config.export_fps.max(1),
            sample_rate,
            channels: channels as u16,
        };

        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();
        let path = config.export_dir.join(artifact_name(millis));
        let file = File::create(&path)
            .with_context(|| format!("creating export file {}", path.display()))?;
        let writer = AviWriter::new(BufWriter::new(file), spec)?;

        // Four seconds of headroom between two ticks.
        let capacity = sample_rate as usize * channels * 4;
        let (capture, tap) = BusCapture::new(capacity);
        let sink = lock_graph(graph).connect_sink(Box::new(capture));

        let stop_after = duration.max(0.0) + config.export_margin_seconds.max(0.0);
        info!(path = %path.display(), duration, stop_after, width, height, "Export started.");

        Ok(Self {
            graph: graph.clone(),
            writer,
            path,
            frames,
            tap,
            sink,
            started_at: now,
            stop_after,
            fps: spec.fps,
            audio_buf: vec![0.0; 8192],
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn sink(&self) -> SinkId {
        self.sink
    }

    pub fn elapsed(&self, now: f64) -> f64 {
        (now - self.started_at).max(0.0)
    }

    /// Wall time at which the export stops itself.
    pub fn stop_after(&self) -> f64 {
        self.stop_after
    }

    pub fn is_due(&self, now: f64) -> bool {
        self.elapsed(now) >= self.stop_after
    }

    pub fn progress(&self, now: f64) -> f64 {
        if self.stop_after <= 0.0 {
            return 1.0;
        }
        (self.elapsed(now) / self.stop_after).clamp(0.0, 1.0)
    }

    /// Moves captured audio into the container and adds every video frame
    /// that has come due since the last tick.
    pub fn tick(&mut self, now: f64) -> Result<()> {
        self.drain_audio()?;

        let elapsed = self.elapsed(now).min(self.stop_after);
        let due = (elapsed * self.fps as f64).ceil() as u32;
        if self.writer.video_frames() < due {
            let spec = *self.writer.spec();
            let frame = self.frames.current_frame().fitted(spec.width, spec.height);
            while self.writer.video_frames() < due {
                self.writer.write_video_frame(&frame.rgb)?;
            }
        }
        Ok(())
    }

    fn drain_audio(&mut self) -> Result<()> {
        let channels = self.writer.spec().channels as usize;
        loop {
            // Pop whole frames only.
            let want = self.audio_buf.len() - self.audio_buf.len() % channels;
            let popped = self.tap.consumer.pop_slice(&mut self.audio_buf[..want]);
            if popped == 0 {
                return Ok(());
            }
            self.writer.write_audio(&self.audio_buf[..popped])?;
        }
    }

    /// Disconnects the sink, flushes what it captured, and finalizes the file.
    pub fn finish(mut self, now: f64) -> Result<ExportArtifact> {
        lock_graph(&self.graph).disconnect_sink(self.sink);
        self.tick(now)?;
        let dropped = self.tap.samples_dropped();
        if dropped > 0 {
            warn!(dropped, "Export encoder fell behind, samples were lost.");
        }

        let video_frames = self.writer.video_frames();
        let audio_frames = self.writer.audio_frames();
        self.writer.finalize()?;

        let artifact = ExportArtifact {
            path: self.path,
            duration: self.stop_after,
            video_frames,
            audio_frames,
        };
        info!(
            path = %artifact.path.display(),
            video_frames,
            audio_frames,
            "Export finalized."
        );
        Ok(artifact)
    }

    /// Disconnects the sink and removes the partial file.
    pub fn cancel(self) {
        lock_graph(&self.graph).disconnect_sink(self.sink);
        let path = self.path.clone();
        drop(self.writer);
        if let Err(e) = std::fs::remove_file(&path) {
            warn!(path = %path.display(), error = %e, "Could not remove cancelled export.");
        }
        info!(path = %path.display(), "Export cancelled.");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use crate::decoder::AudioAsset;
    use crate::engine::{SignalGraph, Slot};

    struct Solid;

    impl VisualFrameSource for Solid {
        fn dimensions(&self) -> (u32, u32) {
            (4, 2)
        }

        fn current_frame(&mut self) -> VideoFrame {
            VideoFrame::solid(4, 2, [10, 20, 30])
        }
    }

    /// Counts how often the graph was free while a frame was being drawn.
    struct LockCheck {
        graph: SharedGraph,
        free: Arc<AtomicUsize>,
    }

    impl VisualFrameSource for LockCheck {
        fn dimensions(&self) -> (u32, u32) {
            (4, 2)
        }

        fn current_frame(&mut self) -> VideoFrame {
            let graph = self.graph.clone();
            let free = std::thread::spawn(move || graph.try_lock().is_ok())
                .join()
                .unwrap();
            if free {
                self.free.fetch_add(1, Ordering::SeqCst);
            }
            VideoFrame::solid(4, 2, [0, 0, 0])
        }
    }

    fn setup(dir: &Path) -> (EngineConfig, SharedGraph) {
        let mut config = EngineConfig::default().with_sample_rate(8_000);
        config.export_fps = 10;
        config.export_dir = dir.to_path_buf();
        let mut graph = SignalGraph::new(&config);
        graph.install(
            Slot::Backing,
            AudioAsset::from_interleaved(vec![0.2; 8_000 * 2], 8_000, 2),
        );
        (config, Arc::new(Mutex::new(graph)))
    }

    fn sinks(graph: &SharedGraph) -> usize {
        lock_graph(graph).master_output_tap().sink_count()
    }

    #[test]
    fn artifact_name_follows_pattern() {
        assert_eq!(artifact_name(1_700_000_000_123), "studiomix_export_1700000000123.avi");
    }

    #[test]
    fn export_captures_bus_and_disconnects() {
        let dir = tempfile::tempdir().unwrap();
        let (config, graph) = setup(dir.path());
        let mut export = ExportRenderer::start(&graph, Box::new(Solid), 1.0, &config, 0.0).unwrap();
        assert_eq!(sinks(&graph), 1);
        assert_eq!(export.stop_after(), 1.5);

        let mut block = vec![0.0; 800 * 2];
        {
            let mut g = lock_graph(&graph);
            g.start(Slot::Backing, 0.0, 0.0);
            g.render(&mut block);
        }
        export.tick(0.1).unwrap();
        assert!((export.progress(0.75) - 0.5).abs() < 1e-9);
        assert!(!export.is_due(1.4));
        assert!(export.is_due(1.5));

        let artifact = export.finish(1.5).unwrap();
        assert_eq!(sinks(&graph), 0);
        assert_eq!(artifact.audio_frames, 800);
        assert_eq!(artifact.video_frames, 15);
        assert!(artifact.path.starts_with(dir.path()));
        let name = artifact.path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("studiomix_export_") && name.ends_with(".avi"));
        let bytes = std::fs::read(&artifact.path).unwrap();
        assert_eq!(&bytes[..4], b"RIFF");

        // Later playback no longer reaches the finished export.
        lock_graph(&graph).render(&mut block);
        assert_eq!(std::fs::read(&artifact.path).unwrap().len(), bytes.len());
    }

    #[test]
    fn encoding_does_not_hold_the_graph() {
        let dir = tempfile::tempdir().unwrap();
        let (config, graph) = setup(dir.path());
        let free = Arc::new(AtomicUsize::new(0));
        let frames = LockCheck {
            graph: graph.clone(),
            free: free.clone(),
        };
        let mut export = ExportRenderer::start(&graph, Box::new(frames), 1.0, &config, 0.0).unwrap();
        export.tick(0.35).unwrap();
        assert_eq!(free.load(Ordering::SeqCst), 1);
        export.finish(1.5).unwrap();
        assert_eq!(free.load(Ordering::SeqCst), 2);
        assert_eq!(sinks(&graph), 0);
    }

    #[test]
    fn cancel_removes_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let (config, graph) = setup(dir.path());
        let export = ExportRenderer::start(&graph, Box::new(Solid), 1.0, &config, 0.0).unwrap();
        let path = export.path().to_path_buf();
        assert!(path.exists());
        export.cancel();
        assert!(!path.exists());
        assert_eq!(sinks(&graph), 0);
    }
}
