//! Session controller: the state machine that wires capture, transport and
//! playback together.
//!
//! ```text
//!            start()               Opened
//!   Idle ──────────────▶ Connecting ───────▶ Active
//!    ▲                       │                 │
//!    │   open failure        │ stop()/Errored  │ stop()/Errored/Closed
//!    ├───────────────────────┘                 ▼
//!    └──────────────────────────────────── Closing
//! ```
//!
//! The controller is driven from a single thread. Transport events arrive as
//! [`SessionEnvelope`]s on a channel the controller owns; each envelope carries
//! the generation of the session that produced it, and anything from an older
//! generation is ignored.

pub mod actor;
pub mod diagnostics;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::{
    audio::{AudioBackend, InputStream},
    buffering::{create_audio_ring, AudioConsumer},
    capture::{CaptureContext, CapturePipeline},
    error::Result,
    events::{SessionState, SessionStatusEvent},
    playback::PlaybackScheduler,
    transport::{EventSink, LiveModelConfig, SessionEnvelope, SessionEvent, Transport, TransportSession},
};

use self::diagnostics::{DiagnosticsSnapshot, SessionDiagnostics};

/// Status broadcast capacity.
const BROADCAST_CAP: usize = 64;

/// Configuration for a live session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Rate of the frames sent to the model (Hz). Default: 16000.
    pub input_sample_rate: u32,
    /// Rate of the audio the model sends back (Hz). Default: 24000.
    pub output_sample_rate: u32,
    /// Samples per outbound frame. Default: 4096 (256 ms at 16 kHz).
    pub frame_samples: usize,
    /// Input device name; `None` uses the system default.
    pub preferred_input_device: Option<String>,
    pub model: LiveModelConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            input_sample_rate: 16_000,
            output_sample_rate: 24_000,
            frame_samples: 4_096,
            preferred_input_device: None,
            model: LiveModelConfig::default(),
        }
    }
}

impl SessionConfig {
    /// MIME type attached to every outbound frame.
    pub fn input_mime_type(&self) -> String {
        format!("audio/pcm;rate={}", self.input_sample_rate)
    }
}

/// Thread-safe view of a controller: current state, status broadcasts and
/// counters. Cheap to clone.
#[derive(Clone)]
pub struct SessionObserver {
    state: Arc<Mutex<SessionState>>,
    status_tx: broadcast::Sender<SessionStatusEvent>,
    diagnostics: Arc<SessionDiagnostics>,
}

impl Default for SessionObserver {
    fn default() -> Self {
        let (status_tx, _) = broadcast::channel(BROADCAST_CAP);
        Self {
            state: Arc::new(Mutex::new(SessionState::Idle)),
            status_tx,
            diagnostics: Arc::new(SessionDiagnostics::default()),
        }
    }
}

impl SessionObserver {
    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    /// Subscribe to state transitions.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionStatusEvent> {
        self.status_tx.subscribe()
    }

    pub fn diagnostics(&self) -> DiagnosticsSnapshot {
        self.diagnostics.snapshot()
    }

    fn set(&self, status: SessionState, detail: Option<String>) {
        *self.state.lock() = status;
        let _ = self.status_tx.send(SessionStatusEvent { status, detail });
    }
}

/// Resources held while a session is not Idle. Dropping it releases them.
struct ActiveSession {
    transport: Arc<dyn TransportSession>,
    scheduler: PlaybackScheduler,
    input: Option<Box<dyn InputStream>>,
    /// Gates the microphone callback; raised on `Opened`.
    capturing: Arc<AtomicBool>,
    /// Ring consumer, handed to the capture pump on `Opened`.
    consumer: Option<AudioConsumer>,
    capture: Option<CapturePipeline>,
}

/// Drives one session at a time through `Idle → Connecting → Active →
/// Closing → Idle`.
///
/// **Not `Send`** once a session is open: device streams are bound to the
/// thread that opened them. [`actor::LiveSession`] runs a controller on its
/// own thread.
pub struct SessionController {
    config: SessionConfig,
    backend: Box<dyn AudioBackend>,
    transport: Box<dyn Transport>,
    observer: SessionObserver,
    events_tx: Sender<SessionEnvelope>,
    events_rx: Receiver<SessionEnvelope>,
    generation: u64,
    state: SessionState,
    active: Option<ActiveSession>,
}

impl SessionController {
    pub fn new(
        config: SessionConfig,
        backend: Box<dyn AudioBackend>,
        transport: Box<dyn Transport>,
    ) -> Self {
        Self::with_observer(config, backend, transport, SessionObserver::default())
    }

    pub fn with_observer(
        config: SessionConfig,
        backend: Box<dyn AudioBackend>,
        transport: Box<dyn Transport>,
        observer: SessionObserver,
    ) -> Self {
        let (events_tx, events_rx) = crossbeam_channel::unbounded();
        Self {
            config,
            backend,
            transport,
            observer,
            events_tx,
            events_rx,
            generation: 0,
            state: SessionState::Idle,
            active: None,
        }
    }

    /// Open the devices and the transport. A no-op unless Idle.
    ///
    /// # Errors
    /// Device or transport failures. Everything acquired so far is released
    /// and the controller is back to Idle before this returns.
    pub fn start(&mut self) -> Result<()> {
        if self.state != SessionState::Idle {
            debug!(state = ?self.state, "start ignored");
            return Ok(());
        }

        self.generation += 1;
        self.observer.diagnostics.reset();
        self.set_state(SessionState::Connecting, None);
        info!(session = self.generation, "session connecting");

        match self.open_session() {
            Ok(active) => {
                self.active = Some(active);
                Ok(())
            }
            Err(e) => {
                warn!(session = self.generation, "session start failed: {e}");
                self.set_state(SessionState::Idle, Some(e.to_string()));
                Err(e)
            }
        }
    }

    fn open_session(&mut self) -> Result<ActiveSession> {
        let capturing = Arc::new(AtomicBool::new(false));
        let (producer, consumer) = create_audio_ring();

        let input = self.backend.open_input(
            producer,
            Arc::clone(&capturing),
            self.config.preferred_input_device.as_deref(),
        )?;
        let output = self.backend.open_output(self.config.output_sample_rate)?;
        let scheduler = PlaybackScheduler::new(output);

        let sink = EventSink::new(self.generation, self.events_tx.clone());
        let transport = self.transport.connect(&self.config.model, sink)?;

        Ok(ActiveSession {
            transport,
            scheduler,
            input: Some(input),
            capturing,
            consumer: Some(consumer),
            capture: None,
        })
    }

    /// Tear the session down. A no-op from Idle or Closing.
    pub fn stop(&mut self) {
        if !self.state.is_live() {
            debug!(state = ?self.state, "stop ignored");
            return;
        }
        info!(session = self.generation, "session stop requested");
        self.teardown(None);
    }

    /// Apply one transport event.
    pub fn handle(&mut self, envelope: SessionEnvelope) {
        if envelope.session != self.generation || self.active.is_none() {
            debug!(
                session = envelope.session,
                current = self.generation,
                event = ?envelope.event,
                "ignoring stale session event"
            );
            return;
        }

        match envelope.event {
            SessionEvent::Opened => self.on_opened(),
            SessionEvent::AudioReceived(chunk) => self.on_audio(&chunk),
            SessionEvent::Interrupted => self.on_interrupted(),
            SessionEvent::Errored(message) => {
                warn!(session = self.generation, "transport error: {message}");
                self.teardown(Some(message));
            }
            SessionEvent::Closed => {
                info!(session = self.generation, "transport closed");
                self.teardown(None);
            }
        }
    }

    /// Apply every queued transport event without blocking. Returns how many
    /// were handled.
    pub fn pump(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(envelope) = self.events_rx.try_recv() {
            self.handle(envelope);
            handled += 1;
        }
        handled
    }

    /// The channel transports deliver into.
    pub fn event_receiver(&self) -> Receiver<SessionEnvelope> {
        self.events_rx.clone()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Generation of the current (or last) session.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn observer(&self) -> SessionObserver {
        self.observer.clone()
    }

    pub fn diagnostics(&self) -> DiagnosticsSnapshot {
        self.observer.diagnostics()
    }

    /// Playback handles scheduled or sounding.
    pub fn live_playback_count(&mut self) -> usize {
        self.active
            .as_mut()
            .map_or(0, |active| active.scheduler.live_count())
    }

    fn on_opened(&mut self) {
        if self.state != SessionState::Connecting {
            debug!(state = ?self.state, "duplicate open ignored");
            return;
        }
        let Some(active) = self.active.as_mut() else {
            return;
        };
        let (Some(consumer), Some(input)) = (active.consumer.take(), active.input.as_ref()) else {
            return;
        };

        let started = CapturePipeline::start(CaptureContext {
            consumer,
            capture_sample_rate: input.sample_rate(),
            target_sample_rate: self.config.input_sample_rate,
            frame_samples: self.config.frame_samples,
            mime_type: self.config.input_mime_type(),
            session: Arc::clone(&active.transport),
            diagnostics: Arc::clone(&self.observer.diagnostics),
        });

        match started {
            Ok(capture) => {
                active.capture = Some(capture);
                active.capturing.store(true, Ordering::Release);
                info!(session = self.generation, "session active");
                self.set_state(SessionState::Active, None);
            }
            Err(e) => {
                warn!(session = self.generation, "capture failed to start: {e}");
                self.teardown(Some(e.to_string()));
            }
        }
    }

    fn on_audio(&mut self, chunk: &str) {
        if self.state != SessionState::Active {
            debug!(state = ?self.state, "audio before open ignored");
            return;
        }
        let Some(active) = self.active.as_mut() else {
            return;
        };
        let diagnostics = &self.observer.diagnostics;
        diagnostics.record_chunk_received();
        match active.scheduler.enqueue(chunk) {
            Ok(Some(_)) => diagnostics.record_chunk_scheduled(),
            Ok(None) => debug!("empty audio chunk ignored"),
            Err(e) => {
                diagnostics.record_chunk_dropped();
                warn!(session = self.generation, "dropping audio chunk: {e}");
            }
        }
    }

    fn on_interrupted(&mut self) {
        let Some(active) = self.active.as_mut() else {
            return;
        };
        let stopped = active.scheduler.interrupt();
        self.observer.diagnostics.record_interruption();
        debug!(session = self.generation, stopped, "model interrupted playback");
    }

    /// Halt capture and playback together, release the devices, then go Idle.
    fn teardown(&mut self, detail: Option<String>) {
        let Some(mut active) = self.active.take() else {
            return;
        };
        self.set_state(SessionState::Closing, None);

        active.capturing.store(false, Ordering::Release);
        if let Some(capture) = active.capture.take() {
            capture.stop();
        }
        active.transport.close();
        active.scheduler.shutdown();
        if let Some(input) = active.input.take() {
            input.stop();
            if input.dropped_samples() > 0 {
                warn!(dropped = input.dropped_samples(), "microphone samples dropped on full ring");
            }
        }
        drop(active);

        let snap = self.observer.diagnostics();
        info!(
            session = self.generation,
            frames_sent = snap.frames_sent,
            chunks_scheduled = snap.chunks_scheduled,
            chunks_dropped = snap.chunks_dropped,
            interruptions = snap.interruptions,
            "session ended"
        );
        self.set_state(SessionState::Idle, detail);
    }

    fn set_state(&mut self, state: SessionState, detail: Option<String>) {
        self.state = state;
        self.observer.set(state, detail);
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        self.teardown(None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_the_wire_protocol() {
        let config = SessionConfig::default();
        assert_eq!(config.input_sample_rate, 16_000);
        assert_eq!(config.output_sample_rate, 24_000);
        assert_eq!(config.frame_samples, 4_096);
        assert_eq!(config.input_mime_type(), "audio/pcm;rate=16000");
        assert!(config.preferred_input_device.is_none());
    }

    #[test]
    fn observer_broadcasts_every_transition() {
        let observer = SessionObserver::default();
        let mut rx = observer.subscribe();
        observer.set(SessionState::Connecting, None);
        observer.set(SessionState::Idle, Some("boom".into()));

        assert_eq!(observer.state(), SessionState::Idle);
        assert_eq!(
            rx.try_recv().unwrap(),
            SessionStatusEvent::new(SessionState::Connecting)
        );
        assert_eq!(
            rx.try_recv().unwrap(),
            SessionStatusEvent::with_detail(SessionState::Idle, "boom")
        );
    }
}
