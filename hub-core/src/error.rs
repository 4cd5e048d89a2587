use thiserror::Error;

/// All errors produced by hub-core.
#[derive(Debug, Error)]
pub enum HubError {
    #[error("audio device error: {0}")]
    AudioDevice(String),

    #[error("audio stream error: {0}")]
    AudioStream(String),

    #[error("no default input device found")]
    NoDefaultInputDevice,

    #[error("no default output device found")]
    NoDefaultOutputDevice,

    /// Returned by an `AudioBackend` whose microphone is still held by
    /// another session's input stream.
    #[error("audio device is still held by a previous session")]
    DeviceBusy,

    #[error("decode error: {0}")]
    Decode(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("transport session is closed")]
    TransportClosed,

    #[error("session actor is not running")]
    ActorGone,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, HubError>;
