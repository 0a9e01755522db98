//! `devtalk live`: voice conversation in the terminal until Ctrl-C.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use devtalk_core::{
    CpalHost, GeminiLiveEndpoint, LiveSession, SessionState, SessionStatusEvent,
};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info};

use crate::settings::AppSettings;

const METER_WIDTH: usize = 30;
const METER_INTERVAL: Duration = Duration::from_millis(100);

/// Stops the session on every exit path, including panics in the host loop.
struct StopOnDrop(LiveSession);

impl Drop for StopOnDrop {
    fn drop(&mut self) {
        self.0.stop();
    }
}

pub fn volume_bar(volume: f32, width: usize) -> String {
    let level = if volume.is_finite() {
        volume.clamp(0.0, 1.0)
    } else {
        0.0
    };
    let filled = (level * width as f32).round() as usize;
    format!("[{}{}]", "#".repeat(filled), ".".repeat(width - filled))
}

fn print_status(event: &SessionStatusEvent) {
    // Clear the meter line before writing a status line over it.
    println!("\r\x1b[2K[{:?}] {}", event.state, event.message);
}

pub async fn run_live(settings: &AppSettings, api_key: String) -> anyhow::Result<()> {
    let endpoint = GeminiLiveEndpoint::new(api_key);
    let session = LiveSession::new(
        settings.session_config(),
        settings.live_setup(),
        Arc::new(CpalHost),
        Arc::new(endpoint),
    );
    let _guard = StopOnDrop(session.clone());
    let mut status_rx = session.subscribe_status();

    info!(
        model = %settings.live_model,
        voice = %settings.voice_name,
        "starting live session"
    );
    println!("Press Ctrl-C to end the session.");

    let started = session.start().await;
    while let Ok(event) = status_rx.try_recv() {
        print_status(&event);
    }
    started.context("live session failed to start")?;

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut meter = tokio::time::interval(METER_INTERVAL);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                debug!("ctrl-c received");
                session.stop();
                while let Ok(event) = status_rx.try_recv() {
                    print_status(&event);
                }
                break;
            }
            event = status_rx.recv() => match event {
                Ok(event) => {
                    print_status(&event);
                    if event.state == SessionState::Idle {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => debug!(skipped, "status receiver lagged"),
                Err(RecvError::Closed) => break,
            },
            _ = meter.tick() => {
                if session.is_active() {
                    print!("\r{} ", volume_bar(session.volume(), METER_WIDTH));
                    let _ = std::io::stdout().flush();
                }
            }
        }
    }

    let diagnostics = session.diagnostics_snapshot();
    info!(?diagnostics, "live session finished");
    Ok(())
}
