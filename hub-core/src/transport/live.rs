//! WebSocket transport for the Gemini Live bidirectional endpoint.
//!
//! One I/O thread owns the socket. Each turn of its loop drains the outbound
//! queue, then blocks in `read()` for at most `read_timeout`. Callers never
//! touch the socket: `send` enqueues and returns.

use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, TryRecvError};
use parking_lot::Mutex;
use tracing::{debug, info, warn};
use tungstenite::stream::MaybeTlsStream;
use tungstenite::{Message, WebSocket};

use super::messages::{parse_server_message, setup_message};
use super::{EventSink, LiveModelConfig, OutboundMessage, SessionEvent, Transport, TransportSession};
use crate::error::{HubError, Result};

pub const LIVE_ENDPOINT: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(20);

type Socket = WebSocket<MaybeTlsStream<TcpStream>>;

/// Opens live sessions with an API key.
pub struct LiveTransport {
    api_key: String,
    endpoint: String,
    read_timeout: Duration,
}

impl LiveTransport {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            endpoint: LIVE_ENDPOINT.to_string(),
            read_timeout: DEFAULT_READ_TIMEOUT,
        }
    }

    /// Point at a different endpoint (a local proxy, a test server).
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    fn session_url(&self) -> Result<url::Url> {
        url::Url::parse_with_params(&self.endpoint, &[("key", self.api_key.as_str())])
            .map_err(|e| HubError::Transport(format!("invalid endpoint {}: {e}", self.endpoint)))
    }
}

impl Transport for LiveTransport {
    fn connect(
        &mut self,
        model: &LiveModelConfig,
        sink: EventSink,
    ) -> Result<Arc<dyn TransportSession>> {
        if self.api_key.trim().is_empty() {
            return Err(HubError::Transport("no API key configured".into()));
        }

        let url = self.session_url()?;
        info!(host = url.host_str().unwrap_or_default(), model = %model.model, "connecting live session");

        let (mut socket, _response) = tungstenite::connect(url.as_str())
            .map_err(|e| HubError::Transport(format!("connect failed: {e}")))?;
        set_read_timeout(&socket, self.read_timeout)?;

        socket
            .send(Message::Text(setup_message(model)?))
            .map_err(|e| HubError::Transport(format!("setup failed: {e}")))?;
        debug!("live setup sent");

        let (tx, rx) = crossbeam_channel::unbounded();
        let session = sink.session();
        let io = std::thread::Builder::new()
            .name("hub-live-io".into())
            .spawn(move || io_loop(socket, rx, sink))?;

        Ok(Arc::new(LiveConnection {
            session,
            outgoing: tx,
            closed: AtomicBool::new(false),
            io: Mutex::new(Some(io)),
        }))
    }
}

fn set_read_timeout(socket: &Socket, timeout: Duration) -> Result<()> {
    match socket.get_ref() {
        MaybeTlsStream::Plain(tcp) => tcp.set_read_timeout(Some(timeout))?,
        MaybeTlsStream::Rustls(tls) => tls.get_ref().set_read_timeout(Some(timeout))?,
        _ => warn!("unknown stream type; reads will block"),
    }
    Ok(())
}

enum Outgoing {
    Frame(String),
    Close,
}

struct LiveConnection {
    session: u64,
    outgoing: Sender<Outgoing>,
    closed: AtomicBool,
    io: Mutex<Option<JoinHandle<()>>>,
}

impl TransportSession for LiveConnection {
    fn send(&self, message: OutboundMessage) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(HubError::TransportClosed);
        }
        let frame = message.to_json()?;
        self.outgoing
            .send(Outgoing::Frame(frame))
            .map_err(|_| HubError::TransportClosed)
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.outgoing.send(Outgoing::Close);
        if let Some(handle) = self.io.lock().take() {
            if handle.join().is_err() {
                warn!(session = self.session, "live I/O thread panicked");
            }
        }
        debug!(session = self.session, "live session closed");
    }
}

impl Drop for LiveConnection {
    fn drop(&mut self) {
        self.close();
    }
}

fn is_timeout(err: &tungstenite::Error) -> bool {
    matches!(
        err,
        tungstenite::Error::Io(e)
            if matches!(e.kind(), std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut)
    )
}

fn dispatch(text: &str, sink: &EventSink) {
    match parse_server_message(text) {
        Ok(events) => {
            for event in events {
                sink.emit(event);
            }
        }
        Err(e) => warn!("ignoring unparseable server message: {e}"),
    }
}

fn io_loop(mut socket: Socket, outgoing: Receiver<Outgoing>, sink: EventSink) {
    let terminal = 'io: loop {
        loop {
            match outgoing.try_recv() {
                Ok(Outgoing::Frame(text)) => {
                    if let Err(e) = socket.send(Message::Text(text)) {
                        break 'io SessionEvent::Errored(format!("send failed: {e}"));
                    }
                }
                Ok(Outgoing::Close) | Err(TryRecvError::Disconnected) => {
                    let _ = socket.close(None);
                    let _ = socket.flush();
                    break 'io SessionEvent::Closed;
                }
                Err(TryRecvError::Empty) => break,
            }
        }

        match socket.read() {
            Ok(Message::Text(text)) => dispatch(&text, &sink),
            Ok(Message::Binary(bytes)) => match std::str::from_utf8(&bytes) {
                Ok(text) => dispatch(text, &sink),
                Err(_) => warn!(len = bytes.len(), "ignoring non-UTF-8 binary frame"),
            },
            Ok(Message::Close(frame)) => {
                info!(?frame, "server closed live session");
                break SessionEvent::Closed;
            }
            Ok(_) => {}
            Err(e) if is_timeout(&e) => {}
            Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => {
                break SessionEvent::Closed;
            }
            Err(e) => break SessionEvent::Errored(format!("receive failed: {e}")),
        }
    };

    debug!(session = sink.session(), ?terminal, "live I/O loop finished");
    sink.emit(terminal);
}
