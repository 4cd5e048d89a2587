//! # hub-core
//!
//! Real-time voice session engine for the Strategy Hub coach.
//!
//! ## Architecture
//!
//! ```text
//! Microphone → AudioCapture → SPSC RingBuffer → CapturePipeline (hub-capture)
//!                                                    │ 16 kHz, 4096-sample frames
//!                                                    ▼
//!                                     TransportSession::send (base64 PCM16)
//!                                                    │
//!                                            remote live model
//!                                                    │
//!                     SessionEvent ◀─────────────────┘
//!                          │
//!                SessionController (hub-session actor)
//!                          │ AudioReceived / Interrupted
//!                          ▼
//!               PlaybackScheduler → Mixer → CpalOutput → Speakers (24 kHz)
//! ```
//!
//! The audio callbacks never allocate once warmed up. Network I/O, resampling
//! and encoding all happen on their own threads.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod audio;
pub mod buffering;
pub mod capture;
pub mod codec;
pub mod error;
pub mod events;
pub mod playback;
pub mod session;
pub mod transport;

// Convenience re-exports for downstream crates
pub use audio::{AudioBackend, CpalBackend, InputStream};
pub use error::{HubError, Result};
pub use events::{SessionState, SessionStatusEvent};
pub use playback::{OutputContext, PlaybackScheduler, SourceId};
pub use session::{
    actor::LiveSession, diagnostics::DiagnosticsSnapshot, SessionConfig, SessionController,
    SessionObserver,
};
pub use transport::{
    EventSink, LiveModelConfig, OutboundMessage, SessionEnvelope, SessionEvent, Transport,
    TransportSession,
};

#[cfg(feature = "live-transport")]
pub use transport::LiveTransport;
