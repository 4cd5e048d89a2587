//! Audio devices via the cpal backend.
//!
//! # Design constraints
//!
//! The cpal callbacks run on OS audio threads at elevated priority. They
//! **must not**:
//! - Allocate heap memory once warmed up
//! - Block on a contended mutex or condvar
//! - Perform I/O
//!
//! Capture writes into an SPSC ring buffer producer whose `push_slice` is
//! lock-free; overflow is counted, not logged, inside the callback.
//!
//! # Threading note
//!
//! `cpal::Stream` is `!Send` on most platforms (COM on Windows, CoreAudio on
//! macOS). Streams returned by an [`AudioBackend`] must be created and dropped
//! on the same thread; the session actor satisfies this by owning them.

pub mod device;
#[cfg(feature = "audio-cpal")]
pub mod output;
pub mod resample;

#[cfg(feature = "audio-cpal")]
use cpal::{
    traits::{DeviceTrait, HostTrait, StreamTrait},
    Sample, SampleFormat, SizedSample, Stream, StreamConfig,
};

use crate::{
    buffering::AudioProducer,
    error::{HubError, Result},
    playback::OutputContext,
};
use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc,
};
#[cfg(feature = "audio-cpal")]
use tracing::{error, info, warn};

#[cfg(feature = "audio-cpal")]
pub use output::CpalOutput;

/// An open microphone stream. Dropping it releases the device.
pub trait InputStream {
    /// Native rate of the samples pushed into the ring (Hz, mono).
    fn sample_rate(&self) -> u32;

    /// Samples discarded because the ring was full.
    fn dropped_samples(&self) -> usize;

    /// Stop delivering samples. The device stays open until drop.
    fn stop(&self);
}

/// Opens the input and output devices a session needs.
pub trait AudioBackend: Send {
    /// Open the microphone and push mono f32 samples into `producer` whenever
    /// `capturing` is set.
    ///
    /// The microphone is exclusive: it stays held until the returned stream is
    /// dropped. A backend that tracks ownership must fail a second open with
    /// `HubError::DeviceBusy` instead of sharing the device. The controller
    /// surfaces that error and stays idle.
    ///
    /// # Errors
    /// Device lookup or stream construction failures, or `DeviceBusy` as above.
    fn open_input(
        &mut self,
        producer: AudioProducer,
        capturing: Arc<AtomicBool>,
        preferred_device: Option<&str>,
    ) -> Result<Box<dyn InputStream>>;

    /// Open an output context whose clock runs at `sample_rate`.
    ///
    /// # Errors
    /// Device lookup or stream construction failures.
    fn open_output(&mut self, sample_rate: u32) -> Result<Box<dyn OutputContext>>;
}

/// The default cpal host.
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalBackend;

impl AudioBackend for CpalBackend {
    fn open_input(
        &mut self,
        producer: AudioProducer,
        capturing: Arc<AtomicBool>,
        preferred_device: Option<&str>,
    ) -> Result<Box<dyn InputStream>> {
        let capture = AudioCapture::open_with_preference(producer, capturing, preferred_device)?;
        Ok(Box::new(capture))
    }

    #[cfg(feature = "audio-cpal")]
    fn open_output(&mut self, sample_rate: u32) -> Result<Box<dyn OutputContext>> {
        Ok(Box::new(CpalOutput::open_default(sample_rate)?))
    }

    #[cfg(not(feature = "audio-cpal"))]
    fn open_output(&mut self, _sample_rate: u32) -> Result<Box<dyn OutputContext>> {
        Err(HubError::AudioStream(
            "compiled without audio-cpal feature".into(),
        ))
    }
}

/// Handle to an active microphone stream.
///
/// **Not `Send`**: `cpal::Stream` is bound to its creation thread on
/// Windows/macOS.
pub struct AudioCapture {
    /// Kept alive so the stream is not dropped prematurely.
    #[cfg(feature = "audio-cpal")]
    stream: Stream,
    /// Shared gate; the callback no-ops while it is `false`.
    capturing: Arc<AtomicBool>,
    dropped: Arc<AtomicUsize>,
    /// Actual capture sample rate reported by the device (Hz).
    pub sample_rate: u32,
}

#[cfg(feature = "audio-cpal")]
impl AudioCapture {
    /// Open an input device by preferred name, otherwise fall back to the
    /// default input device and then the first available device.
    ///
    /// # Errors
    /// `HubError::NoDefaultInputDevice` when no microphone is available,
    /// `HubError::AudioStream` if cpal fails to build the stream.
    pub fn open_with_preference(
        producer: AudioProducer,
        capturing: Arc<AtomicBool>,
        preferred_device_name: Option<&str>,
    ) -> Result<Self> {
        let host = cpal::default_host();
        let mut selected_device = None;

        if let Some(preferred_name) = preferred_device_name {
            match host.input_devices() {
                Ok(mut devices) => {
                    selected_device = devices.find(|device| {
                        device
                            .name()
                            .map(|name| name == preferred_name)
                            .unwrap_or(false)
                    });
                    if selected_device.is_none() {
                        warn!(
                            "preferred input device '{}' not found, falling back",
                            preferred_name
                        );
                    }
                }
                Err(e) => warn!("failed to list input devices while resolving preference: {e}"),
            }
        }

        let device = if let Some(device) = selected_device {
            device
        } else if let Some(default) = host.default_input_device() {
            default
        } else {
            let mut devices = host
                .input_devices()
                .map_err(|e| HubError::AudioDevice(e.to_string()))?;
            let fallback = devices.next().ok_or(HubError::NoDefaultInputDevice)?;
            warn!("no default input device, falling back to first available input");
            fallback
        };

        info!(
            device = %device.name().unwrap_or_default(),
            "opening input device"
        );

        let supported = device
            .default_input_config()
            .map_err(|e| HubError::AudioDevice(e.to_string()))?;
        let sample_rate = supported.sample_rate().0;
        let config: StreamConfig = supported.config();
        info!(sample_rate, channels = config.channels, "input config selected");

        let dropped = Arc::new(AtomicUsize::new(0));
        let gate = Arc::clone(&capturing);
        let overflow = Arc::clone(&dropped);

        let stream = match supported.sample_format() {
            SampleFormat::F32 => build_capture_stream::<f32>(&device, &config, producer, gate, overflow),
            SampleFormat::I16 => build_capture_stream::<i16>(&device, &config, producer, gate, overflow),
            SampleFormat::I32 => build_capture_stream::<i32>(&device, &config, producer, gate, overflow),
            SampleFormat::U16 => build_capture_stream::<u16>(&device, &config, producer, gate, overflow),
            SampleFormat::U8 => build_capture_stream::<u8>(&device, &config, producer, gate, overflow),
            fmt => {
                return Err(HubError::AudioStream(format!(
                    "unsupported input sample format: {fmt:?}"
                )))
            }
        }
        .map_err(|e| HubError::AudioStream(e.to_string()))?;

        stream
            .play()
            .map_err(|e| HubError::AudioStream(e.to_string()))?;

        Ok(Self {
            stream,
            capturing,
            dropped,
            sample_rate,
        })
    }
}

/// Down-mix interleaved frames to mono f32 and push them into the ring.
#[cfg(feature = "audio-cpal")]
fn build_capture_stream<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    mut producer: AudioProducer,
    capturing: Arc<AtomicBool>,
    dropped: Arc<AtomicUsize>,
) -> std::result::Result<Stream, cpal::BuildStreamError>
where
    T: SizedSample,
    f32: cpal::FromSample<T>,
{
    use crate::buffering::Producer;

    let channels = config.channels.max(1) as usize;
    let mut mono: Vec<f32> = Vec::with_capacity(8_192);

    device.build_input_stream(
        config,
        move |data: &[T], _info: &cpal::InputCallbackInfo| {
            if !capturing.load(Ordering::Relaxed) {
                return;
            }
            mono.clear();
            mono.extend(data.chunks_exact(channels).map(|frame| {
                frame.iter().map(|s| s.to_sample::<f32>()).sum::<f32>() / channels as f32
            }));
            let written = producer.push_slice(&mono);
            if written < mono.len() {
                dropped.fetch_add(mono.len() - written, Ordering::Relaxed);
            }
        },
        |err| error!("audio input stream error: {err}"),
        None,
    )
}

/// Stub when the `audio-cpal` feature is disabled.
#[cfg(not(feature = "audio-cpal"))]
impl AudioCapture {
    pub fn open_with_preference(
        _producer: AudioProducer,
        _capturing: Arc<AtomicBool>,
        _preferred_device_name: Option<&str>,
    ) -> Result<Self> {
        Err(HubError::AudioStream(
            "compiled without audio-cpal feature".into(),
        ))
    }
}

impl InputStream for AudioCapture {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn dropped_samples(&self) -> usize {
        self.dropped.load(Ordering::Relaxed)
    }

    fn stop(&self) {
        self.capturing.store(false, Ordering::Release);
        self.pause();
    }
}

impl AudioCapture {
    #[cfg(feature = "audio-cpal")]
    fn pause(&self) {
        if let Err(e) = self.stream.pause() {
            warn!("failed to pause input stream: {e}");
        }
    }

    #[cfg(not(feature = "audio-cpal"))]
    fn pause(&self) {}
}
