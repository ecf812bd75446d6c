// src/main.rs

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, bail};
use crossterm::event::{self, Event, KeyCode, KeyEventKind, KeyModifiers};
use tracing_subscriber::EnvFilter;

use studiomix::config::EngineConfig;
use studiomix::studio_controller::{RawModeGuard, StudioController};

fn usage() -> &'static str {
    "usage: studiomix [--config <engine.json>] <backing-file>"
}

fn main() -> Result<(), anyhow::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("studiomix=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut args = std::env::args().skip(1);
    let mut config_path: Option<PathBuf> = None;
    let mut backing: Option<PathBuf> = None;
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => {
                let path = args.next().context(usage())?;
                config_path = Some(PathBuf::from(path));
            }
            _ if backing.is_none() => backing = Some(PathBuf::from(arg)),
            _ => bail!(usage()),
        }
    }
    let Some(backing) = backing else {
        bail!(usage());
    };

    let config = match config_path {
        Some(path) => EngineConfig::load_from_disk(&path)
            .with_context(|| format!("reading config {}", path.display()))?,
        None => EngineConfig::default(),
    };

    let mut studio = StudioController::new(&backing, config)?;

    println!(
        "[R] Record | [SPACE] Play | [<-/->] Seek | [E] Export | [X] Reset | [Up/Down] Vol | [ ] Reverb | [1-3] EQ | [Q] Quit"
    );

    let raw = RawModeGuard::enable()?;
    let result = frame_loop(&mut studio);
    studio.shutdown();
    drop(raw);
    result?;

    println!("\nExiting studiomix.");
    Ok(())
}

fn frame_loop(studio: &mut StudioController) -> anyhow::Result<()> {
    // 20 FPS
    let frame = Duration::from_millis(50);
    studio.run_tick()?;

    loop {
        if event::poll(frame)? {
            if let Event::Key(ev) = event::read()? {
                if ev.kind == KeyEventKind::Press {
                    if ev.code == KeyCode::Char('c') && ev.modifiers.contains(KeyModifiers::CONTROL) {
                        break;
                    }
                    if studio.should_quit(ev.code) {
                        break;
                    }
                    studio.handle_key(ev.code, ev.modifiers);
                    studio.run_tick()?;
                    continue;
                }
            }
        }
        studio.run_tick()?;
    }
    Ok(())
}
