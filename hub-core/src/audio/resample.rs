//! Microphone-rate → wire-rate conversion using a rubato `FastFixedIn` resampler.
//!
//! Microphones commonly run at 44.1 or 48 kHz while the live model expects
//! 16 kHz mono. `RateConverter` bridges that gap on the capture pump thread,
//! where allocation is allowed. When both rates match it is a plain copy and
//! no rubato session is created.

use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use tracing::{error, info};

use crate::error::{HubError, Result};

/// Converts f32 mono audio from one fixed sample rate to another.
pub struct RateConverter {
    /// `None` when input rate == output rate.
    resampler: Option<FastFixedIn<f32>>,
    /// Holds partial input blocks between calls.
    input_buf: Vec<f32>,
    /// Input frames rubato consumes per process call.
    block_size: usize,
    /// Pre-allocated `[1][output_frames_max]` scratch.
    output_buf: Vec<Vec<f32>>,
}

impl RateConverter {
    /// # Errors
    /// `HubError::AudioStream` if rubato rejects the ratio or block size.
    pub fn new(input_rate: u32, output_rate: u32, block_size: usize) -> Result<Self> {
        if input_rate == output_rate {
            return Ok(Self {
                resampler: None,
                input_buf: Vec::new(),
                block_size,
                output_buf: Vec::new(),
            });
        }

        let ratio = output_rate as f64 / input_rate as f64;
        let resampler =
            FastFixedIn::<f32>::new(ratio, 1.0, PolynomialDegree::Cubic, block_size, 1)
                .map_err(|e| HubError::AudioStream(format!("resampler init: {e}")))?;

        let max_out = resampler.output_frames_max();
        info!(input_rate, output_rate, block_size, "capture resampling enabled");

        Ok(Self {
            resampler: Some(resampler),
            input_buf: Vec::with_capacity(block_size * 2),
            block_size,
            output_buf: vec![vec![0f32; max_out]; 1],
        })
    }

    /// Convert `samples` and append the result to `out`.
    ///
    /// Returns how many samples were appended; zero while rubato is still
    /// waiting for a full input block.
    pub fn process_into(&mut self, samples: &[f32], out: &mut Vec<f32>) -> usize {
        let Some(resampler) = self.resampler.as_mut() else {
            out.extend_from_slice(samples);
            return samples.len();
        };

        self.input_buf.extend_from_slice(samples);
        let before = out.len();
        let mut consumed_total = 0;

        while self.input_buf.len() - consumed_total >= self.block_size {
            let block = &self.input_buf[consumed_total..consumed_total + self.block_size];
            match resampler.process_into_buffer(&[block], &mut self.output_buf, None) {
                Ok((_consumed, produced)) => {
                    out.extend_from_slice(&self.output_buf[0][..produced]);
                }
                Err(e) => error!("capture resampler error: {e}"),
            }
            consumed_total += self.block_size;
        }

        self.input_buf.drain(..consumed_total);
        out.len() - before
    }

    /// Drop buffered input and rubato's filter history.
    pub fn reset(&mut self) {
        self.input_buf.clear();
        if let Some(resampler) = self.resampler.as_mut() {
            resampler.reset();
        }
    }

    /// `true` when no conversion happens.
    pub fn is_passthrough(&self) -> bool {
        self.resampler.is_none()
    }
}
