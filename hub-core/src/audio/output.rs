//! Speaker output: a cpal stream rendering the playback [`Mixer`].
//!
//! The mixer runs at the session output rate (24 kHz). When the device cannot
//! open at that rate, [`RateAdapter`] stretches the mixer output to the device
//! rate by linear interpolation. Mono is duplicated to every device channel.

use std::sync::Arc;

use cpal::{
    traits::{DeviceTrait, HostTrait, StreamTrait},
    FromSample, SampleFormat, SampleRate, SizedSample, Stream, StreamConfig,
    SupportedStreamConfig,
};
use parking_lot::Mutex;
use tracing::{error, info, warn};

use crate::error::{HubError, Result};
use crate::playback::mixer::Mixer;
use crate::playback::{OutputContext, SourceId};

/// Largest block rendered per mixer call inside the device callback. Buffers
/// are sized for it up front so the callback never allocates.
const CALLBACK_BLOCK_FRAMES: usize = 4_096;

/// Hardware output context backed by the default output device.
pub struct CpalOutput {
    /// Kept alive so the stream is not dropped prematurely.
    stream: Option<Stream>,
    mixer: Arc<Mutex<Mixer>>,
    device_rate: u32,
}

impl CpalOutput {
    /// # Errors
    /// `HubError::NoDefaultOutputDevice` when there is no output device,
    /// `HubError::AudioStream` if cpal fails to build or start the stream.
    pub fn open_default(sample_rate: u32) -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or(HubError::NoDefaultOutputDevice)?;

        info!(
            device = %device.name().unwrap_or_default(),
            "opening output device"
        );

        let supported = choose_output_config(&device, sample_rate)?;
        let config: StreamConfig = supported.config();
        let device_rate = config.sample_rate.0;
        if device_rate != sample_rate {
            warn!(
                device_rate,
                sample_rate, "output device cannot run at session rate, interpolating"
            );
        }
        info!(device_rate, channels = config.channels, "output config selected");

        let mixer = Arc::new(Mutex::new(Mixer::new(sample_rate)));
        let shared = Arc::clone(&mixer);

        let stream = match supported.sample_format() {
            SampleFormat::F32 => build_render_stream::<f32>(&device, &config, shared, sample_rate),
            SampleFormat::I16 => build_render_stream::<i16>(&device, &config, shared, sample_rate),
            SampleFormat::I32 => build_render_stream::<i32>(&device, &config, shared, sample_rate),
            SampleFormat::U16 => build_render_stream::<u16>(&device, &config, shared, sample_rate),
            fmt => {
                return Err(HubError::AudioStream(format!(
                    "unsupported output sample format: {fmt:?}"
                )))
            }
        }
        .map_err(|e| HubError::AudioStream(e.to_string()))?;

        stream
            .play()
            .map_err(|e| HubError::AudioStream(e.to_string()))?;

        Ok(Self {
            stream: Some(stream),
            mixer,
            device_rate,
        })
    }

    /// Rate the device actually runs at.
    pub fn device_rate(&self) -> u32 {
        self.device_rate
    }
}

/// Prefer an f32 config that covers `sample_rate`, then any format that does,
/// then the device default.
fn choose_output_config(device: &cpal::Device, sample_rate: u32) -> Result<SupportedStreamConfig> {
    let wanted = SampleRate(sample_rate);
    match device.supported_output_configs() {
        Ok(ranges) => {
            let mut covering: Vec<_> = ranges
                .filter(|r| r.min_sample_rate() <= wanted && wanted <= r.max_sample_rate())
                .collect();
            covering.sort_by_key(|r| (r.sample_format() != SampleFormat::F32, r.channels()));
            if let Some(range) = covering.into_iter().next() {
                return Ok(range.with_sample_rate(wanted));
            }
        }
        Err(e) => warn!("failed to query output configs: {e}"),
    }
    device
        .default_output_config()
        .map_err(|e| HubError::AudioDevice(e.to_string()))
}

fn build_render_stream<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    mixer: Arc<Mutex<Mixer>>,
    mixer_rate: u32,
) -> std::result::Result<Stream, cpal::BuildStreamError>
where
    T: SizedSample + FromSample<f32>,
{
    let channels = config.channels.max(1) as usize;
    let mut adapter = RateAdapter::new(mixer_rate, config.sample_rate.0);
    let mut scratch = vec![0.0f32; CALLBACK_BLOCK_FRAMES];

    device.build_output_stream(
        config,
        move |data: &mut [T], _info: &cpal::OutputCallbackInfo| {
            for block in data.chunks_mut(CALLBACK_BLOCK_FRAMES * channels) {
                let mono = &mut scratch[..block.len() / channels];
                adapter.fill(&mixer, mono);
                for (frame, sample) in block.chunks_exact_mut(channels).zip(mono.iter()) {
                    frame.fill(T::from_sample(*sample));
                }
            }
        },
        |err| error!("audio output stream error: {err}"),
        None,
    )
}

impl OutputContext for CpalOutput {
    fn current_time(&self) -> f64 {
        self.mixer.lock().current_time()
    }

    fn sample_rate(&self) -> u32 {
        self.mixer.lock().sample_rate()
    }

    fn start_source(&mut self, id: SourceId, samples: Arc<[f32]>, start_time: f64) -> Result<f64> {
        self.mixer
            .lock()
            .schedule(id, samples, start_time)
            .ok_or_else(|| HubError::AudioStream("output context is closed".into()))
    }

    fn stop_source(&mut self, id: SourceId) {
        self.mixer.lock().stop(id);
    }

    fn drain_ended(&mut self) -> Vec<SourceId> {
        self.mixer.lock().drain_ended()
    }

    fn close(&mut self) {
        self.mixer.lock().close();
        if let Some(stream) = self.stream.take() {
            if let Err(e) = stream.pause() {
                warn!("failed to pause output stream: {e}");
            }
        }
    }
}

/// Pulls mixer frames at one rate and emits them at another.
struct RateAdapter {
    /// Mixer frames consumed per device frame.
    step: f64,
    /// Fractional read position into `source`.
    pos: f64,
    /// Rendered mixer frames not yet fully consumed. Never outgrows its
    /// initial capacity while `fill` gets at most `CALLBACK_BLOCK_FRAMES`.
    source: Vec<f32>,
}

impl RateAdapter {
    fn new(mixer_rate: u32, device_rate: u32) -> Self {
        let step = mixer_rate as f64 / device_rate.max(1) as f64;
        Self {
            step,
            pos: 0.0,
            source: Vec::with_capacity((CALLBACK_BLOCK_FRAMES as f64 * step).ceil() as usize + 3),
        }
    }

    fn fill(&mut self, mixer: &Mutex<Mixer>, out: &mut [f32]) {
        if out.is_empty() {
            return;
        }
        if self.step == 1.0 {
            mixer.lock().render(out);
            return;
        }

        let end = self.pos + self.step * out.len() as f64;
        let needed = end.ceil() as usize + 1;
        if self.source.len() < needed {
            let have = self.source.len();
            self.source.resize(needed, 0.0);
            mixer.lock().render(&mut self.source[have..]);
        }

        for (i, o) in out.iter_mut().enumerate() {
            let p = self.pos + self.step * i as f64;
            let idx = p.floor() as usize;
            let frac = (p - idx as f64) as f32;
            let a = self.source[idx];
            let b = self.source.get(idx + 1).copied().unwrap_or(a);
            *o = a + (b - a) * frac;
        }

        let consumed = (end.floor() as usize).min(self.source.len());
        self.source.drain(..consumed);
        self.pos = end - consumed as f64;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn equal_rates_render_directly() {
        let mixer = Mutex::new(Mixer::new(1_000));
        mixer.lock().schedule(SourceId(1), vec![0.5; 4].into(), 0.0);
        let mut adapter = RateAdapter::new(1_000, 1_000);
        let mut out = vec![0.0; 6];
        adapter.fill(&mixer, &mut out);
        assert_eq!(out, vec![0.5, 0.5, 0.5, 0.5, 0.0, 0.0]);
        assert_eq!(mixer.lock().frame_clock(), 6);
    }

    #[test]
    fn upsampling_interpolates_between_mixer_frames() {
        let mixer = Mutex::new(Mixer::new(1_000));
        let ramp: Vec<f32> = (0..16).map(|i| i as f32).collect();
        mixer.lock().schedule(SourceId(1), ramp.into(), 0.0);

        let mut adapter = RateAdapter::new(1_000, 2_000);
        let mut out = vec![0.0; 8];
        adapter.fill(&mixer, &mut out);
        for (i, v) in out.iter().enumerate() {
            assert_abs_diff_eq!(*v, i as f32 * 0.5, epsilon = 1e-6);
        }

        // Continues from where the previous callback stopped.
        let mut next = vec![0.0; 4];
        adapter.fill(&mixer, &mut next);
        assert_abs_diff_eq!(next[0], 4.0, epsilon = 1e-6);
        assert_abs_diff_eq!(next[3], 5.5, epsilon = 1e-6);
    }

    #[test]
    fn downsampling_skips_mixer_frames() {
        let mixer = Mutex::new(Mixer::new(2_000));
        let ramp: Vec<f32> = (0..32).map(|i| i as f32).collect();
        mixer.lock().schedule(SourceId(1), ramp.into(), 0.0);

        let mut adapter = RateAdapter::new(2_000, 1_000);
        let mut out = vec![0.0; 4];
        adapter.fill(&mixer, &mut out);
        assert_eq!(out, vec![0.0, 2.0, 4.0, 6.0]);
    }

    #[test]
    fn full_blocks_fit_the_preallocated_source_buffer() {
        let mixer = Mutex::new(Mixer::new(24_000));
        let mut adapter = RateAdapter::new(24_000, 8_000);
        let capacity = adapter.source.capacity();
        let ptr = adapter.source.as_ptr();

        let mut out = vec![0.0; CALLBACK_BLOCK_FRAMES];
        for _ in 0..5 {
            adapter.fill(&mixer, &mut out);
        }
        assert_eq!(adapter.source.capacity(), capacity);
        assert_eq!(adapter.source.as_ptr(), ptr);
        assert_eq!(mixer.lock().frame_clock(), 5 * 3 * CALLBACK_BLOCK_FRAMES as u64 + 1);
    }
}
