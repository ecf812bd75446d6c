// src/audio_engine.rs

use std::sync::{Arc, Mutex};

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::capture::{CaptureSession, Microphone};
use crate::config::EngineConfig;
use crate::decoder::decode_bytes;
use crate::effects::EffectsParameters;
use crate::engine::{
    AnalysisFrame, AnalysisTap, EngineClock, SharedGraph, SignalGraph, Slot, SourceSet,
    TickOutcome, TransportClock, lock_graph as lock,
};
use crate::error::{EngineError, Result};
use crate::export::{ExportArtifact, ExportRenderer, VisualFrameSource};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum TransportState {
    Idle,
    ReadyToRecord,
    Recording,
    Reviewing,
    Exporting,
}

impl TransportState {
    /// A capture or export transport owns the timeline.
    pub fn is_busy(self) -> bool {
        matches!(self, TransportState::Recording | TransportState::Exporting)
    }
}

/// Read-only view for the control surface.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineSnapshot {
    pub state: TransportState,
    pub current_time: f64,
    pub duration: f64,
    pub is_playing: bool,
    pub effects: EffectsParameters,
    pub export_progress: Option<f64>,
}

/// What one call to `tick` did.
#[derive(Debug, Clone, Default)]
pub struct TickReport {
    pub position: Option<f64>,
    /// The transport reached the end of the backing this tick.
    pub transport_finished: bool,
    pub export_finished: Option<ExportArtifact>,
}

/// Process-wide engine: one graph, one clock, one transport. Hosts construct
/// it once and hand out `&mut` access to whatever drives the control surface.
pub struct AudioEngine {
    config: EngineConfig,
    clock: Arc<dyn EngineClock>,
    graph: SharedGraph,
    analysis: AnalysisTap,
    transport: TransportClock,
    microphone: Box<dyn Microphone>,
    capture: Option<CaptureSession>,
    export: Option<ExportRenderer>,
    state: TransportState,
}

impl AudioEngine {
    pub fn new(
        config: EngineConfig,
        clock: Arc<dyn EngineClock>,
        microphone: Box<dyn Microphone>,
    ) -> Self {
        let config = config.normalized();
        let graph = SignalGraph::new(&config);
        let analysis = graph.analysis_tap();
        info!(
            sample_rate = config.sample_rate,
            channels = config.channels,
            "Audio engine constructed."
        );
        Self {
            transport: TransportClock::new(clock.clone()),
            graph: Arc::new(Mutex::new(graph)),
            analysis,
            clock,
            microphone,
            capture: None,
            export: None,
            state: TransportState::Idle,
            config,
        }
    }

    /// Shared graph handle for the output device callback.
    pub fn graph(&self) -> SharedGraph {
        self.graph.clone()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn set_state(&mut self, next: TransportState) {
        if self.state != next {
            info!(from = ?self.state, to = ?next, "Transport state changed.");
            self.state = next;
        }
    }

    fn reject_busy(&self, action: &'static str) -> Result<()> {
        if self.state.is_busy() {
            warn!(action, state = ?self.state, "Rejected: transport busy.");
            return Err(EngineError::ResourceBusy(self.state));
        }
        Ok(())
    }

    fn invalid(&self, action: &'static str) -> EngineError {
        warn!(action, state = ?self.state, "Rejected: invalid in this state.");
        EngineError::InvalidTransition {
            action,
            state: self.state,
        }
    }

    async fn decode(&self, bytes: Vec<u8>) -> Result<crate::decoder::AudioAsset> {
        // Decode to the layout the graph actually runs at.
        let (rate, channels) = {
            let graph = lock(&self.graph);
            (graph.sample_rate(), graph.channels())
        };
        let asset = tokio::task::spawn_blocking(move || decode_bytes(bytes, rate, channels)).await??;
        Ok(asset)
    }

    // --- LOADING ---

    /// Decodes and installs a backing track. On failure nothing changes.
    /// Returns the track duration.
    pub async fn load_backing(&mut self, bytes: Vec<u8>) -> Result<f64> {
        self.reject_busy("load backing")?;
        let asset = match self.decode(bytes).await {
            Ok(asset) => asset,
            Err(e) => {
                error!(error = %e, "Backing track failed to decode.");
                return Err(e);
            }
        };

        let duration = {
            let mut graph = lock(&self.graph);
            self.transport.rewind(&mut graph);
            graph.clear(Slot::Vocal);
            graph.install(Slot::Backing, asset)
        };
        self.transport.set_duration(duration);
        self.set_state(TransportState::ReadyToRecord);
        Ok(duration)
    }

    // --- RECORDING ---

    /// Plays the backing from 0 and records the microphone against it.
    /// A refused microphone leaves the engine in `ReadyToRecord`.
    pub fn start_recording(&mut self) -> Result<()> {
        self.reject_busy("start recording")?;
        match self.state {
            TransportState::ReadyToRecord => {}
            TransportState::Idle => return Err(EngineError::NoBackingTrack),
            _ => return Err(self.invalid("start recording")),
        }

        self.clock.resume();
        let mut session = match CaptureSession::request(self.microphone.as_mut()) {
            Ok(session) => session,
            Err(e) => {
                warn!(error = %e, "Microphone unavailable.");
                return Err(e);
            }
        };

        {
            let mut graph = lock(&self.graph);
            self.transport.begin(0.0, SourceSet::BackingOnly, &mut graph);
        }
        let clock = self.clock.clone();
        let reference = self.transport.reference_start().unwrap_or_else(|| clock.now());
        if let Err(e) = session.begin(|| clock.now() - reference) {
            error!(error = %e, "Recorder failed to start.");
            session.cancel();
            self.transport.stop(&mut lock(&self.graph));
            return Err(e);
        }

        self.capture = Some(session);
        self.set_state(TransportState::Recording);
        Ok(())
    }

    /// Stops capture and playback and installs the decoded take. Returns the
    /// vocal duration. On failure the take is discarded and the engine is
    /// back in `ReadyToRecord`.
    pub async fn stop_recording(&mut self) -> Result<f64> {
        if self.state != TransportState::Recording {
            return Err(self.invalid("stop recording"));
        }
        let Some(session) = self.capture.take() else {
            self.set_state(TransportState::ReadyToRecord);
            return Err(self.invalid("stop recording"));
        };
        let offset = session.started_at();
        self.transport.rewind(&mut lock(&self.graph));

        let decoded = match session.finish().await {
            Ok(bytes) => self.decode(bytes).await,
            Err(e) => Err(e),
        };
        let asset = match decoded {
            Ok(asset) => asset.with_leading_silence(offset),
            Err(e) => {
                error!(error = %e, "Vocal take could not be recovered.");
                self.set_state(TransportState::ReadyToRecord);
                return Err(e);
            }
        };

        let duration = lock(&self.graph).install(Slot::Vocal, asset);
        info!(duration, offset, "Vocal take installed.");
        self.set_state(TransportState::Reviewing);
        Ok(duration)
    }

    // --- REVIEW ---

    /// Starts or stops playback. From the end of the track it restarts at 0.
    /// Returns whether playback is now running.
    pub fn toggle_playback(&mut self) -> Result<bool> {
        match self.state {
            TransportState::ReadyToRecord | TransportState::Reviewing => {}
            TransportState::Idle => return Err(EngineError::NoBackingTrack),
            _ => return Err(EngineError::ResourceBusy(self.state)),
        }
        let mut graph = lock(&self.graph);
        if self.transport.stop(&mut graph) {
            return Ok(false);
        }
        self.clock.resume();
        let mut at = self.transport.position();
        if at >= self.transport.duration() {
            at = 0.0;
        }
        self.transport.begin(at, SourceSet::All, &mut graph);
        Ok(true)
    }

    pub fn seek(&mut self, to: f64) -> Result<()> {
        match self.state {
            TransportState::ReadyToRecord | TransportState::Reviewing => {}
            _ => return Err(self.invalid("seek")),
        }
        if !to.is_finite() {
            return Err(self.invalid("seek"));
        }
        self.transport.seek(to, &mut lock(&self.graph));
        Ok(())
    }

    /// Cancels any capture or export, drops the vocal and returns to
    /// `ReadyToRecord`.
    pub fn reset(&mut self) -> Result<()> {
        if self.state == TransportState::Idle {
            return Err(EngineError::NoBackingTrack);
        }
        if let Some(session) = self.capture.take() {
            session.cancel();
        }
        if let Some(export) = self.export.take() {
            export.cancel();
        }
        {
            let mut graph = lock(&self.graph);
            self.transport.rewind(&mut graph);
            graph.clear(Slot::Vocal);
        }
        self.set_state(TransportState::ReadyToRecord);
        Ok(())
    }

    /// Retargets the vocal chain. Safe in every state.
    pub fn apply_effects(&mut self, params: EffectsParameters) {
        let mut graph = lock(&self.graph);
        graph.apply_effects(params);
        self.config.effects = graph.effects().params();
    }

    pub fn effects(&self) -> EffectsParameters {
        self.config.effects
    }

    // --- EXPORT ---

    /// Plays the whole mix from 0 while encoding it with the frame source's
    /// picture. The export stops itself from `tick`.
    pub fn export_video(&mut self, frames: Option<Box<dyn VisualFrameSource>>) -> Result<()> {
        self.reject_busy("export")?;
        if self.state != TransportState::Reviewing {
            return Err(self.invalid("export"));
        }
        let Some(frames) = frames else {
            warn!("Export requested without a frame source.");
            return Err(EngineError::CaptureSourceUnavailable);
        };

        self.clock.resume();
        self.transport.stop(&mut lock(&self.graph));
        let duration = self.transport.duration();
        // The sink is connected before the transport starts so capture begins at 0.
        let export = ExportRenderer::start(&self.graph, frames, duration, &self.config, self.clock.now())
            .inspect_err(|e| error!(error = %e, "Export could not start."))?;
        self.transport.begin(0.0, SourceSet::All, &mut lock(&self.graph));

        self.export = Some(export);
        self.set_state(TransportState::Exporting);
        Ok(())
    }

    pub fn export_progress(&self) -> Option<f64> {
        self.export.as_ref().map(|e| e.progress(self.clock.now()))
    }

    // --- UPDATE LOOP ---

    /// One frame of the cooperative update loop.
    pub fn tick(&mut self) -> Result<TickReport> {
        let mut report = TickReport::default();
        let step = self.transport.tick(&mut lock(&self.graph));
        match step {
            TickOutcome::Idle => {}
            TickOutcome::Position(p) => report.position = Some(p),
            TickOutcome::Finished(p) => {
                report.position = Some(p);
                report.transport_finished = true;
            }
        }

        // Encoding runs without the graph lock; the device callback keeps rendering.
        let now = self.clock.now();
        let ended = match self.export.as_mut() {
            Some(export) => match export.tick(now) {
                Ok(()) if export.is_due(now) => Some(Ok(())),
                Ok(()) => None,
                Err(e) => Some(Err(e)),
            },
            None => None,
        };
        if let Some(outcome) = ended {
            let artifact = self.close_export(outcome, now)?;
            report.export_finished = artifact;
        }

        if report.transport_finished {
            debug!(state = ?self.state, "Transport finished.");
        }
        Ok(report)
    }

    /// Ends the running export: the transport stops, the capture sink is
    /// disconnected, and the state returns to `Reviewing` on every path.
    fn close_export(
        &mut self,
        outcome: anyhow::Result<()>,
        now: f64,
    ) -> Result<Option<ExportArtifact>> {
        let Some(export) = self.export.take() else {
            return Ok(None);
        };
        self.transport.stop(&mut lock(&self.graph));
        let finished = match outcome {
            Ok(()) => export.finish(now),
            Err(e) => {
                export.cancel();
                Err(e)
            }
        };
        self.set_state(TransportState::Reviewing);
        finished.map(Some).map_err(|e| {
            error!(error = %e, "Export failed.");
            EngineError::Device(e)
        })
    }

    // --- OBSERVABLES ---

    pub fn state(&self) -> TransportState {
        self.state
    }

    pub fn current_time(&self) -> f64 {
        self.transport.position()
    }

    pub fn duration(&self) -> f64 {
        self.transport.duration()
    }

    pub fn is_playing(&self) -> bool {
        self.transport.is_running()
    }

    pub fn analysis_data(&self) -> AnalysisFrame {
        self.analysis.frequency_data()
    }

    pub fn analysis_tap(&self) -> AnalysisTap {
        self.analysis.clone()
    }

    pub fn snapshot(&self) -> EngineSnapshot {
        EngineSnapshot {
            state: self.state,
            current_time: self.current_time(),
            duration: self.duration(),
            is_playing: self.is_playing(),
            effects: self.config.effects,
            export_progress: self.export_progress(),
        }
    }
}
