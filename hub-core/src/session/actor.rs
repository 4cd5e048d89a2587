//! `LiveSession`: a [`SessionController`] running on its own thread.
//!
//! The actor thread owns the controller and every device stream it opens, so
//! `!Send` cpal streams never cross threads. Commands and transport events are
//! multiplexed with `crossbeam_channel::select!`, which serialises every
//! mutation of the playback schedule.

use std::thread::JoinHandle;

use crossbeam_channel::{bounded, select, Receiver, Sender};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::{DiagnosticsSnapshot, SessionConfig, SessionController, SessionObserver};
use crate::{
    audio::AudioBackend,
    error::{HubError, Result},
    events::{SessionState, SessionStatusEvent},
    transport::Transport,
};

enum Command {
    Start(Sender<Result<()>>),
    Stop(Sender<()>),
    Shutdown,
}

/// Handle to a session actor. Dropping it stops the session and joins the
/// thread.
pub struct LiveSession {
    commands: Sender<Command>,
    observer: SessionObserver,
    thread: Option<JoinHandle<()>>,
}

impl LiveSession {
    /// Spawn the actor thread.
    ///
    /// # Errors
    /// `HubError::Io` if the thread cannot be spawned.
    pub fn spawn(
        config: SessionConfig,
        backend: Box<dyn AudioBackend>,
        transport: Box<dyn Transport>,
    ) -> Result<Self> {
        let observer = SessionObserver::default();
        let (commands, rx) = crossbeam_channel::unbounded();
        let shared = observer.clone();

        let thread = std::thread::Builder::new()
            .name("hub-session".into())
            .spawn(move || {
                let controller =
                    SessionController::with_observer(config, backend, transport, shared);
                run(controller, rx);
            })?;

        Ok(Self {
            commands,
            observer,
            thread: Some(thread),
        })
    }

    /// Start a session and wait until the devices and transport are open.
    ///
    /// # Errors
    /// Whatever the controller's `start` returned, or `HubError::ActorGone`.
    pub fn start(&self) -> Result<()> {
        let (reply, rx) = bounded(1);
        self.commands
            .send(Command::Start(reply))
            .map_err(|_| HubError::ActorGone)?;
        rx.recv().map_err(|_| HubError::ActorGone)?
    }

    /// Stop the session and wait until its resources are released.
    ///
    /// # Errors
    /// `HubError::ActorGone` if the actor thread has exited.
    pub fn stop(&self) -> Result<()> {
        let (reply, rx) = bounded(1);
        self.commands
            .send(Command::Stop(reply))
            .map_err(|_| HubError::ActorGone)?;
        rx.recv().map_err(|_| HubError::ActorGone)
    }

    pub fn state(&self) -> SessionState {
        self.observer.state()
    }

    /// Subscribe to live status change events.
    pub fn subscribe_status(&self) -> broadcast::Receiver<SessionStatusEvent> {
        self.observer.subscribe()
    }

    pub fn diagnostics(&self) -> DiagnosticsSnapshot {
        self.observer.diagnostics()
    }

    /// Stop the session and join the actor thread.
    pub fn shutdown(mut self) {
        self.join();
    }

    fn join(&mut self) {
        let _ = self.commands.send(Command::Shutdown);
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                warn!("session actor panicked");
            }
        }
    }
}

impl Drop for LiveSession {
    fn drop(&mut self) {
        self.join();
    }
}

fn run(mut controller: SessionController, commands: Receiver<Command>) {
    let events = controller.event_receiver();
    info!("session actor started");

    loop {
        select! {
            recv(commands) -> command => match command {
                Ok(Command::Start(reply)) => {
                    let _ = reply.send(controller.start());
                }
                Ok(Command::Stop(reply)) => {
                    controller.stop();
                    let _ = reply.send(());
                }
                Ok(Command::Shutdown) | Err(_) => break,
            },
            recv(events) -> envelope => {
                if let Ok(envelope) = envelope {
                    controller.handle(envelope);
                }
            }
        }
    }

    controller.stop();
    debug!("session actor stopped");
}
