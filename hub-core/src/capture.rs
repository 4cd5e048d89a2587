//! Capture pump: ring buffer → 16 kHz frames → transport.
//!
//! ## Stages (per iteration)
//!
//! ```text
//! 1. Drain the ring buffer (mono f32 at the device rate)
//! 2. Resample to the wire rate (passthrough when rates match)
//! 3. Cut non-overlapping frames of exactly `frame_samples`
//! 4. Encode each frame as base64 PCM16 and hand it to the transport
//! ```
//!
//! `TransportSession::send` only enqueues, so a slow network never stalls the
//! pump. Failed sends are counted and the frame is dropped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::{
    audio::resample::RateConverter,
    buffering::{frame::FrameAssembler, AudioConsumer, Consumer},
    codec,
    error::Result,
    session::diagnostics::SessionDiagnostics,
    transport::{OutboundMessage, TransportSession},
};

/// Samples drained from the ring per iteration; also the resampler block size.
const DRAIN_CHUNK: usize = 960;

const DEFAULT_SLEEP_EMPTY_MS: u64 = 5;

/// Everything the pump thread owns.
pub struct CaptureContext {
    pub consumer: AudioConsumer,
    /// Rate of the samples in the ring (Hz).
    pub capture_sample_rate: u32,
    /// Rate of the frames put on the wire (Hz).
    pub target_sample_rate: u32,
    pub frame_samples: usize,
    pub mime_type: String,
    pub session: Arc<dyn TransportSession>,
    pub diagnostics: Arc<SessionDiagnostics>,
}

/// A running capture pump. Stop it with [`CapturePipeline::stop`].
pub struct CapturePipeline {
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl CapturePipeline {
    /// Spawn the pump thread.
    ///
    /// # Errors
    /// Resampler construction or thread spawn failure.
    pub fn start(ctx: CaptureContext) -> Result<Self> {
        let resampler =
            RateConverter::new(ctx.capture_sample_rate, ctx.target_sample_rate, DRAIN_CHUNK)?;
        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);
        let thread = std::thread::Builder::new()
            .name("hub-capture".into())
            .spawn(move || run(ctx, resampler, flag))?;
        Ok(Self {
            running,
            thread: Some(thread),
        })
    }

    /// Stop the pump and wait for it to exit. A partially filled frame is
    /// discarded.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                warn!("capture thread panicked");
            }
        }
    }
}

impl Drop for CapturePipeline {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run(mut ctx: CaptureContext, mut resampler: RateConverter, running: Arc<AtomicBool>) {
    info!(
        from = ctx.capture_sample_rate,
        to = ctx.target_sample_rate,
        frame = ctx.frame_samples,
        "capture started"
    );

    let mut raw = vec![0f32; DRAIN_CHUNK];
    let mut resampled: Vec<f32> = Vec::with_capacity(DRAIN_CHUNK * 2);
    let mut assembler = FrameAssembler::new(ctx.frame_samples, ctx.target_sample_rate);
    let mut logged_send_error = false;

    while running.load(Ordering::Acquire) {
        let n = ctx.consumer.pop_slice(&mut raw);
        if n == 0 {
            std::thread::sleep(Duration::from_millis(empty_sleep_ms()));
            continue;
        }

        resampled.clear();
        if resampler.process_into(&raw[..n], &mut resampled) == 0 {
            continue;
        }

        for frame in assembler.push(&resampled) {
            ctx.diagnostics.record_frame_captured();
            let message = OutboundMessage::audio(codec::encode_frame(&frame.samples), &ctx.mime_type);
            match ctx.session.send(message) {
                Ok(()) => ctx.diagnostics.record_frame_sent(),
                Err(e) => {
                    ctx.diagnostics.record_send_error();
                    if !logged_send_error {
                        warn!("dropping captured frame: {e}");
                        logged_send_error = true;
                    } else {
                        debug!("dropping captured frame: {e}");
                    }
                }
            }
        }
    }

    let snap = ctx.diagnostics.snapshot();
    info!(
        frames_captured = snap.frames_captured,
        frames_sent = snap.frames_sent,
        send_errors = snap.send_errors,
        pending = assembler.pending(),
        "capture stopped"
    );
}

fn empty_sleep_ms() -> u64 {
    static EMPTY_SLEEP_MS: OnceLock<u64> = OnceLock::new();
    *EMPTY_SLEEP_MS.get_or_init(|| {
        std::env::var("STRATEGYHUB_CAPTURE_EMPTY_SLEEP_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .map(|v| v.clamp(1, 20))
            .unwrap_or(DEFAULT_SLEEP_EMPTY_MS)
    })
}
