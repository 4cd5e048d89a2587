//! Bidirectional streaming transport to the remote conversational model.
//!
//! The controller only sees two traits: `Transport` opens a connection and
//! `TransportSession` sends frames / closes it. Everything the connection
//! reports comes back as a [`SessionEvent`] through an [`EventSink`], stamped
//! with the generation of the session that opened it so that late events from
//! a torn-down connection are recognisable.

pub mod messages;

#[cfg(feature = "live-transport")]
pub mod live;

#[cfg(feature = "live-transport")]
pub use live::LiveTransport;

use std::sync::Arc;

use crossbeam_channel::Sender;
use serde::{Deserialize, Serialize};

use crate::error::Result;

pub use messages::{MediaBlob, OutboundMessage};

/// Default live model (native audio in, native audio out).
pub const DEFAULT_LIVE_MODEL: &str = "gemini-2.5-flash-native-audio-preview-12-2025";
/// Default prebuilt voice.
pub const DEFAULT_VOICE: &str = "Zephyr";
/// Default coaching persona.
pub const DEFAULT_SYSTEM_INSTRUCTION: &str = "You are the Elite Strategy Coach. Speak with energy and insight about YouTube trends and viral growth.";

/// Model-side configuration sent when a connection is opened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveModelConfig {
    pub model: String,
    pub voice_name: String,
    pub system_instruction: String,
}

impl Default for LiveModelConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_LIVE_MODEL.into(),
            voice_name: DEFAULT_VOICE.into(),
            system_instruction: DEFAULT_SYSTEM_INSTRUCTION.into(),
        }
    }
}

/// Everything a transport can report to the session controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The remote side accepted the session; capture may begin.
    Opened,
    /// One base64 PCM16 chunk at the output rate.
    AudioReceived(String),
    /// The model started a new response; discard queued playback.
    Interrupted,
    /// Fatal transport failure.
    Errored(String),
    /// The connection ended. Delivered at most once per connection, and never
    /// after `Errored`.
    Closed,
}

impl SessionEvent {
    /// `Errored` or `Closed`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionEvent::Errored(_) | SessionEvent::Closed)
    }
}

/// A `SessionEvent` tagged with the session generation that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionEnvelope {
    pub session: u64,
    pub event: SessionEvent,
}

/// Where a transport delivers its events. Cheap to clone.
#[derive(Debug, Clone)]
pub struct EventSink {
    session: u64,
    tx: Sender<SessionEnvelope>,
}

impl EventSink {
    pub fn new(session: u64, tx: Sender<SessionEnvelope>) -> Self {
        Self { session, tx }
    }

    pub fn session(&self) -> u64 {
        self.session
    }

    /// Deliver an event. Returns `false` once the controller is gone.
    pub fn emit(&self, event: SessionEvent) -> bool {
        self.tx
            .send(SessionEnvelope {
                session: self.session,
                event,
            })
            .is_ok()
    }
}

/// Opens connections to the remote model.
pub trait Transport: Send {
    /// Open a connection. Returns once the handshake completes; the session
    /// reports `Opened` through `sink` when it is ready for audio.
    ///
    /// # Errors
    /// Any failure to reach or handshake with the remote endpoint.
    fn connect(
        &mut self,
        model: &LiveModelConfig,
        sink: EventSink,
    ) -> Result<Arc<dyn TransportSession>>;
}

/// An open connection. Shared between the controller and the capture pump.
pub trait TransportSession: Send + Sync {
    /// Queue one outbound message. Never waits for the network.
    ///
    /// # Errors
    /// `HubError::TransportClosed` once the connection is gone.
    fn send(&self, message: OutboundMessage) -> Result<()>;

    /// Close the connection. Idempotent.
    fn close(&self);
}
