//! Foreground live coaching session.

use anyhow::{bail, Context, Result};
use hub_core::{
    CpalBackend, DiagnosticsSnapshot, LiveSession, LiveTransport, SessionConfig, SessionState,
    SessionStatusEvent,
};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

/// Run one session until Ctrl+C or until the remote side ends it.
pub async fn run_live(config: SessionConfig, api_key: String) -> Result<()> {
    let voice = config.model.voice_name.clone();
    let session = LiveSession::spawn(
        config,
        Box::new(CpalBackend),
        Box::new(LiveTransport::new(api_key)),
    )
    .context("failed to spawn session actor")?;
    let mut status = session.subscribe_status();

    tokio::task::block_in_place(|| session.start()).context("failed to start live session")?;
    println!("Connecting to your strategy coach ({voice}). Press Ctrl+C to hang up.");

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut ended_with = None;

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("hang-up requested");
                break;
            }
            event = status.recv() => match event {
                Ok(event) => {
                    report(&event);
                    if event.status == SessionState::Idle {
                        ended_with = event.detail;
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "status events lagged"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    tokio::task::block_in_place(|| session.stop()).context("failed to stop live session")?;
    let snapshot = session.diagnostics();
    tokio::task::block_in_place(|| session.shutdown());
    print_summary(&snapshot);

    match ended_with {
        Some(detail) => bail!("session ended: {detail}"),
        None => Ok(()),
    }
}

fn report(event: &SessionStatusEvent) {
    info!(status = ?event.status, detail = ?event.detail, "session status");
    match event.status {
        SessionState::Connecting => println!("… connecting"),
        SessionState::Active => println!("● live, start talking"),
        SessionState::Closing => println!("… hanging up"),
        SessionState::Idle => println!("○ idle"),
    }
}

fn print_summary(snapshot: &DiagnosticsSnapshot) {
    println!(
        "frames sent {}/{} ({} send errors), chunks played {}/{} ({} dropped), interruptions {}",
        snapshot.frames_sent,
        snapshot.frames_captured,
        snapshot.send_errors,
        snapshot.chunks_scheduled,
        snapshot.chunks_received,
        snapshot.chunks_dropped,
        snapshot.interruptions,
    );
}
