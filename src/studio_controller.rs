// src/studio_controller.rs

use std::fmt::Write as FmtWrite;
use std::io::{Write, stdout};
use std::path::Path;

use crossterm::event::{KeyCode, KeyModifiers};
use crossterm::{
    cursor::MoveTo,
    execute,
    terminal::{
        BeginSynchronizedUpdate, Clear, ClearType, EndSynchronizedUpdate, disable_raw_mode,
        enable_raw_mode,
    },
};
use tokio::runtime::Runtime;
use tracing::{error, info};

use crate::audio::{OutputStream, setup_output_device};
use crate::audio_engine::{AudioEngine, TransportState};
use crate::capture::CpalMicrophone;
use crate::config::EngineConfig;
use crate::effects::EffectsParameters;
use crate::engine::{AnalysisTap, SampleClock};
use crate::error::EngineError;
use crate::export::{VideoFrame, VisualFrameSource};

const SPECTRUM_COLUMNS: usize = 48;
const BAR_GLYPHS: [char; 9] = [' ', '▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];
const SEEK_STEP: f64 = 5.0;

/// Raw terminal mode for as long as the guard lives. Dropping it restores
/// the terminal, also when the frame loop bails out with an error.
pub struct RawModeGuard {
    restore: Option<fn() -> std::io::Result<()>>,
}

impl RawModeGuard {
    pub fn enable() -> std::io::Result<Self> {
        enable_raw_mode()?;
        Ok(Self::restoring_with(disable_raw_mode))
    }

    fn restoring_with(restore: fn() -> std::io::Result<()>) -> Self {
        Self {
            restore: Some(restore),
        }
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        if let Some(restore) = self.restore.take() {
            if let Err(e) = restore() {
                error!(error = %e, "Could not restore the terminal.");
            }
        }
    }
}

/// Groups analysis bins into `columns` bars of 0..=255 (peak per group).
/// The upper half of the spectrum is mostly empty and is skipped.
pub fn spectrum_bars(bytes: &[u8], columns: usize) -> Vec<u8> {
    let usable = bytes.len() / 2;
    if usable == 0 || columns == 0 {
        return vec![0; columns];
    }
    (0..columns)
        .map(|c| {
            let start = c * usable / columns;
            let end = ((c + 1) * usable / columns).max(start + 1).min(usable);
            bytes[start..end].iter().copied().max().unwrap_or(0)
        })
        .collect()
}

/// Export picture: the live spectrum drawn as bars.
pub struct SpectrumFrames {
    tap: AnalysisTap,
    width: u32,
    height: u32,
}

impl SpectrumFrames {
    pub fn new(tap: AnalysisTap, width: u32, height: u32) -> Self {
        Self { tap, width, height }
    }
}

impl VisualFrameSource for SpectrumFrames {
    fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn current_frame(&mut self) -> VideoFrame {
        let (w, h) = (self.width as usize, self.height as usize);
        let mut frame = VideoFrame::solid(self.width, self.height, [12, 10, 24]);
        let bars = spectrum_bars(&self.tap.frequency_data().bytes, SPECTRUM_COLUMNS);
        let bar_w = (w / SPECTRUM_COLUMNS).max(1);
        for (i, &level) in bars.iter().enumerate() {
            let bar_h = level as usize * h / 255;
            let color = [80 + level / 2, 40, 255 - level / 2];
            for y in h - bar_h..h {
                for x in i * bar_w..((i + 1) * bar_w).saturating_sub(1).min(w) {
                    let px = (y * w + x) * 3;
                    frame.rgb[px..px + 3].copy_from_slice(&color);
                }
            }
        }
        frame
    }
}

/// Terminal control surface around one device-backed `AudioEngine`.
pub struct StudioController {
    engine: AudioEngine,
    runtime: Runtime,
    _output: OutputStream,
    message: String,
    draw_buffer: String,
}

impl StudioController {
    pub fn new(backing: &Path, config: EngineConfig) -> anyhow::Result<Self> {
        let output = setup_output_device()?;
        let config = config.with_sample_rate(output.output_sample_rate);
        let clock = SampleClock::new(config.sample_rate);
        let engine = AudioEngine::new(config, clock.clone(), Box::new(CpalMicrophone::new()));
        let output = OutputStream::start(output, engine.graph(), clock)?;

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()?;

        let mut controller = Self {
            engine,
            runtime,
            _output: output,
            message: String::new(),
            draw_buffer: String::with_capacity(4096),
        };
        let bytes = std::fs::read(backing)?;
        let duration = controller
            .runtime
            .block_on(controller.engine.load_backing(bytes))?;
        info!(path = %backing.display(), duration, "Backing track ready.");
        controller.message = format!("Loaded {} ({duration:.1}s)", backing.display());
        Ok(controller)
    }

    pub fn should_quit(&self, key: KeyCode) -> bool {
        matches!(key, KeyCode::Char('q') | KeyCode::Char('Q'))
    }

    fn report<T>(&mut self, result: Result<T, EngineError>) -> Option<T> {
        match result {
            Ok(v) => Some(v),
            Err(e) => {
                error!(error = %e, "Action failed.");
                self.message = e.to_string();
                None
            }
        }
    }

    fn toggle_recording(&mut self) {
        if self.engine.state() == TransportState::Recording {
            let result = self.runtime.block_on(self.engine.stop_recording());
            if let Some(d) = self.report(result) {
                self.message = format!("Take recorded ({d:.1}s)");
            }
        } else {
            let result = self.engine.start_recording();
            if self.report(result).is_some() {
                self.message = "Recording...".into();
            }
        }
    }

    fn seek_by(&mut self, delta: f64) {
        let to = (self.engine.current_time() + delta).max(0.0);
        let result = self.engine.seek(to);
        self.report(result);
    }

    fn adjust(&mut self, f: impl FnOnce(&mut EffectsParameters)) {
        let mut params = self.engine.effects();
        f(&mut params);
        self.engine.apply_effects(params);
    }

    pub fn handle_key(&mut self, key: KeyCode, modifiers: KeyModifiers) {
        let shift = modifiers.contains(KeyModifiers::SHIFT);
        match key {
            KeyCode::Char('r') | KeyCode::Char('R') => self.toggle_recording(),
            KeyCode::Char(' ') => {
                let result = self.engine.toggle_playback();
                self.report(result);
            }
            KeyCode::Left => self.seek_by(-SEEK_STEP),
            KeyCode::Right => self.seek_by(SEEK_STEP),
            KeyCode::Home => {
                let result = self.engine.seek(0.0);
                self.report(result);
            }
            KeyCode::Char('e') | KeyCode::Char('E') => {
                let frames = SpectrumFrames::new(self.engine.analysis_tap(), 320, 180);
                let result = self.engine.export_video(Some(Box::new(frames)));
                if self.report(result).is_some() {
                    self.message = "Exporting...".into();
                }
            }
            KeyCode::Char('x') | KeyCode::Char('X') => {
                let result = self.engine.reset();
                if self.report(result).is_some() {
                    self.message = "Take discarded".into();
                }
            }
            KeyCode::Up => self.adjust(|p| p.volume += 0.1),
            KeyCode::Down => self.adjust(|p| p.volume -= 0.1),
            KeyCode::Char(']') => self.adjust(|p| p.reverb_mix += 0.1),
            KeyCode::Char('[') => self.adjust(|p| p.reverb_mix -= 0.1),
            KeyCode::Char('1') if shift => self.adjust(|p| p.low_gain -= 1.0),
            KeyCode::Char('2') if shift => self.adjust(|p| p.mid_gain -= 1.0),
            KeyCode::Char('3') if shift => self.adjust(|p| p.high_gain -= 1.0),
            KeyCode::Char('!') => self.adjust(|p| p.low_gain -= 1.0),
            KeyCode::Char('@') => self.adjust(|p| p.mid_gain -= 1.0),
            KeyCode::Char('#') => self.adjust(|p| p.high_gain -= 1.0),
            KeyCode::Char('1') => self.adjust(|p| p.low_gain += 1.0),
            KeyCode::Char('2') => self.adjust(|p| p.mid_gain += 1.0),
            KeyCode::Char('3') => self.adjust(|p| p.high_gain += 1.0),
            _ => {}
        }
    }

    pub fn run_tick(&mut self) -> anyhow::Result<()> {
        // 1. Logic tick
        let result = self.engine.tick();
        if let Some(report) = self.report(result) {
            if let Some(artifact) = report.export_finished {
                self.message = format!("Exported {}", artifact.path.display());
            }
            if report.transport_finished && self.engine.state() == TransportState::Recording {
                self.toggle_recording();
            }
        }

        // 2. Build output buffer
        let snapshot = self.engine.snapshot();
        let bars = spectrum_bars(&self.engine.analysis_data().bytes, SPECTRUM_COLUMNS);
        self.draw_buffer.clear();

        let _ = write!(self.draw_buffer, "{}", MoveTo(0, 0));
        let _ = write!(self.draw_buffer, "{}", Clear(ClearType::UntilNewLine));
        for &level in &bars {
            let glyph = BAR_GLYPHS[level as usize * (BAR_GLYPHS.len() - 1) / 255];
            self.draw_buffer.push(glyph);
        }

        let (cur, total) = (snapshot.current_time as u64, snapshot.duration as u64);
        let fx = snapshot.effects;
        let _ = write!(self.draw_buffer, "{}", MoveTo(0, 1));
        let _ = write!(self.draw_buffer, "{}", Clear(ClearType::UntilNewLine));
        let _ = write!(
            self.draw_buffer,
            "Time: {:02}:{:02} / {:02}:{:02} | {:?}{}",
            cur / 60,
            cur % 60,
            total / 60,
            total % 60,
            snapshot.state,
            if snapshot.is_playing { " >" } else { "" }
        );
        if let Some(p) = snapshot.export_progress {
            let _ = write!(self.draw_buffer, " {:3.0}%", p * 100.0);
        }

        let _ = write!(self.draw_buffer, "{}", MoveTo(0, 2));
        let _ = write!(self.draw_buffer, "{}", Clear(ClearType::UntilNewLine));
        let _ = write!(
            self.draw_buffer,
            "Vol {:.1} | Low {:+.0} Mid {:+.0} High {:+.0} dB | Reverb {:.1}",
            fx.volume, fx.low_gain, fx.mid_gain, fx.high_gain, fx.reverb_mix
        );

        let _ = write!(self.draw_buffer, "{}", MoveTo(0, 3));
        let _ = write!(self.draw_buffer, "{}", Clear(ClearType::UntilNewLine));
        let _ = write!(self.draw_buffer, "{}", self.message);

        // 3. Flush to terminal
        let mut stdout = stdout();
        execute!(stdout, BeginSynchronizedUpdate)?;
        stdout.write_all(self.draw_buffer.as_bytes())?;
        execute!(stdout, EndSynchronizedUpdate)?;
        stdout.flush()?;
        Ok(())
    }

    /// Stops whatever is running before the process exits.
    pub fn shutdown(&mut self) {
        if self.engine.state().is_busy() {
            let result = self.engine.reset();
            self.report(result);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    static RESTORED: std::sync::atomic::AtomicUsize = std::sync::atomic::AtomicUsize::new(0);

    fn count_restore() -> std::io::Result<()> {
        RESTORED.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        Ok(())
    }

    fn failing_frame_loop() -> anyhow::Result<()> {
        let _raw = RawModeGuard::restoring_with(count_restore);
        anyhow::bail!("render failed");
    }

    #[test]
    fn terminal_is_restored_when_the_loop_fails() {
        assert!(failing_frame_loop().is_err());
        assert_eq!(RESTORED.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[test]
    fn bars_take_group_peaks() {
        let mut bytes = vec![0u8; 16];
        bytes[1] = 200;
        bytes[6] = 50;
        let bars = spectrum_bars(&bytes, 4);
        assert_eq!(bars, vec![200, 0, 0, 50]);
    }

    #[test]
    fn spectrum_frame_has_requested_size() {
        let tap = AnalysisTap::new(8_000, 256, 0.0);
        let mut frames = SpectrumFrames::new(tap, 96, 20);
        let frame = frames.current_frame();
        assert_eq!((frame.width, frame.height), (96, 20));
        assert_eq!(frame.rgb.len(), 96 * 20 * 3);
    }
}
