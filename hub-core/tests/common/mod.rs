//! In-memory devices and transport for driving a `SessionController` without
//! audio hardware or network.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use hub_core::buffering::{AudioProducer, Producer};
use hub_core::{
    codec, AudioBackend, EventSink, HubError, InputStream, LiveModelConfig, OutboundMessage,
    OutputContext, Result, SessionEvent, SourceId, Transport, TransportSession,
};
use parking_lot::{Mutex, MutexGuard};

pub const OUTPUT_RATE: u32 = 24_000;

// ---------------------------------------------------------------------------
// Devices
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct DeviceState {
    pub input_opens: usize,
    pub input_held: bool,
    pub output_opens: usize,
    pub output_closes: usize,
    pub fail_input: bool,
    pub fail_output: bool,
    mic: Option<(AudioProducer, Arc<AtomicBool>)>,
    /// Manual output clock (seconds).
    pub clock: f64,
    pub output_rate: u32,
    /// `(id, start_time, samples)` in scheduling order.
    pub started: Vec<(SourceId, f64, usize)>,
    pub stopped: Vec<SourceId>,
    ended: Vec<SourceId>,
    reported: Vec<SourceId>,
}

/// Shared view of the fake devices.
#[derive(Clone, Default)]
pub struct Devices(Arc<Mutex<DeviceState>>);

impl Devices {
    pub fn lock(&self) -> MutexGuard<'_, DeviceState> {
        self.0.lock()
    }

    pub fn backend(&self) -> Box<dyn AudioBackend> {
        Box::new(FakeBackend(self.clone()))
    }

    /// Push microphone samples. Returns how many reached the ring; zero while
    /// the session is not capturing.
    pub fn speak(&self, samples: &[f32]) -> usize {
        let mut state = self.0.lock();
        match state.mic.as_mut() {
            Some((producer, capturing)) if capturing.load(Ordering::Acquire) => {
                producer.push_slice(samples)
            }
            _ => 0,
        }
    }

    /// Move the output clock forward and report sources that finished.
    pub fn advance(&self, seconds: f64) {
        let mut state = self.0.lock();
        state.clock += seconds;
        let now = state.clock;
        let rate = state.output_rate.max(1) as f64;
        let finished: Vec<SourceId> = state
            .started
            .iter()
            .filter(|(id, start, len)| {
                start + *len as f64 / rate <= now
                    && !state.stopped.contains(id)
                    && !state.reported.contains(id)
            })
            .map(|(id, _, _)| *id)
            .collect();
        state.reported.extend(finished.iter().copied());
        state.ended.extend(finished);
    }

    pub fn start_times(&self) -> Vec<f64> {
        self.0.lock().started.iter().map(|(_, t, _)| *t).collect()
    }
}

struct FakeBackend(Devices);

impl AudioBackend for FakeBackend {
    fn open_input(
        &mut self,
        producer: AudioProducer,
        capturing: Arc<AtomicBool>,
        _preferred_device: Option<&str>,
    ) -> Result<Box<dyn InputStream>> {
        let mut state = self.0.lock();
        if state.fail_input {
            return Err(HubError::AudioDevice("microphone unplugged".into()));
        }
        if state.input_held {
            return Err(HubError::DeviceBusy);
        }
        state.input_opens += 1;
        state.input_held = true;
        state.mic = Some((producer, capturing));
        Ok(Box::new(FakeInput(self.0.clone())))
    }

    fn open_output(&mut self, sample_rate: u32) -> Result<Box<dyn OutputContext>> {
        let mut state = self.0.lock();
        if state.fail_output {
            return Err(HubError::NoDefaultOutputDevice);
        }
        state.output_opens += 1;
        state.output_rate = sample_rate;
        Ok(Box::new(FakeOutput(self.0.clone())))
    }
}

struct FakeInput(Devices);

impl InputStream for FakeInput {
    fn sample_rate(&self) -> u32 {
        16_000
    }

    fn dropped_samples(&self) -> usize {
        0
    }

    fn stop(&self) {}
}

impl Drop for FakeInput {
    fn drop(&mut self) {
        let mut state = self.0.lock();
        state.input_held = false;
        state.mic = None;
    }
}

struct FakeOutput(Devices);

impl OutputContext for FakeOutput {
    fn current_time(&self) -> f64 {
        self.0.lock().clock
    }

    fn sample_rate(&self) -> u32 {
        self.0.lock().output_rate
    }

    fn start_source(&mut self, id: SourceId, samples: Arc<[f32]>, start_time: f64) -> Result<f64> {
        self.0.lock().started.push((id, start_time, samples.len()));
        Ok(start_time)
    }

    fn stop_source(&mut self, id: SourceId) {
        self.0.lock().stopped.push(id);
    }

    fn drain_ended(&mut self) -> Vec<SourceId> {
        std::mem::take(&mut self.0.lock().ended)
    }

    fn close(&mut self) {
        self.0.lock().output_closes += 1;
    }
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct RemoteState {
    pub connects: usize,
    pub closes: usize,
    pub fail_connect: bool,
    /// Report `Opened` as soon as `connect` returns.
    pub open_on_connect: bool,
    pub sent: Vec<OutboundMessage>,
    sinks: Vec<EventSink>,
}

/// Shared view of the fake remote model.
#[derive(Clone, Default)]
pub struct Remote(Arc<Mutex<RemoteState>>);

impl Remote {
    pub fn lock(&self) -> MutexGuard<'_, RemoteState> {
        self.0.lock()
    }

    pub fn transport(&self) -> Box<dyn Transport> {
        Box::new(FakeTransport(self.clone()))
    }

    /// Deliver an event on the most recent connection.
    pub fn emit(&self, event: SessionEvent) -> bool {
        let sink = self.0.lock().sinks.last().cloned();
        sink.is_some_and(|s| s.emit(event))
    }

    /// Deliver an event on the `index`-th connection ever opened.
    pub fn emit_on(&self, index: usize, event: SessionEvent) -> bool {
        let sink = self.0.lock().sinks.get(index).cloned();
        sink.is_some_and(|s| s.emit(event))
    }

    pub fn sent_count(&self) -> usize {
        self.0.lock().sent.len()
    }
}

struct FakeTransport(Remote);

impl Transport for FakeTransport {
    fn connect(
        &mut self,
        _model: &LiveModelConfig,
        sink: EventSink,
    ) -> Result<Arc<dyn TransportSession>> {
        let mut state = self.0.lock();
        state.connects += 1;
        if state.fail_connect {
            return Err(HubError::Transport("connection refused".into()));
        }
        if state.open_on_connect {
            sink.emit(SessionEvent::Opened);
        }
        state.sinks.push(sink);
        Ok(Arc::new(FakeSession {
            remote: self.0.clone(),
            closed: AtomicBool::new(false),
        }))
    }
}

struct FakeSession {
    remote: Remote,
    closed: AtomicBool,
}

impl TransportSession for FakeSession {
    fn send(&self, message: OutboundMessage) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(HubError::TransportClosed);
        }
        self.remote.lock().sent.push(message);
        Ok(())
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.remote.lock().closes += 1;
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// A base64 chunk of `seconds` of constant audio at the output rate.
pub fn chunk(seconds: f64) -> String {
    let samples = (seconds * OUTPUT_RATE as f64).round() as usize;
    codec::encode_frame(&vec![0.25; samples])
}

pub fn wait_until(timeout: Duration, mut done: impl FnMut() -> bool) {
    let start = Instant::now();
    while !done() {
        assert!(start.elapsed() < timeout, "condition not reached in {timeout:?}");
        std::thread::sleep(Duration::from_millis(5));
    }
}
