//! PCM16 wire codec.
//!
//! ```text
//! f32 [-1, 1] ──×32768, saturate──► i16 ──LE──► bytes ──base64──► text
//! ```
//!
//! The float → i16 step truncates toward zero and saturates at the i16 range,
//! so `1.0` quantizes to `32767` instead of wrapping to `-32768`. Everything
//! after quantization is lossless.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};

use crate::error::{HubError, Result};

/// Scale between normalized float samples and 16-bit integers.
pub const PCM16_SCALE: f32 = 32768.0;

/// Bytes per encoded sample.
pub const PCM16_SAMPLE_BYTES: usize = 2;

/// Quantize float samples to interleaved little-endian i16 bytes.
pub fn float_to_pcm16_bytes(samples: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * PCM16_SAMPLE_BYTES);
    for &sample in samples {
        bytes.extend_from_slice(&quantize(sample).to_le_bytes());
    }
    bytes
}

/// Decode interleaved little-endian i16 bytes into one float vector per channel.
///
/// # Errors
/// `HubError::Decode` when `num_channels` is zero, the byte length is odd,
/// or the sample count does not divide evenly into frames.
pub fn bytes_to_float_pcm16(bytes: &[u8], num_channels: usize) -> Result<Vec<Vec<f32>>> {
    if num_channels == 0 {
        return Err(HubError::Decode("channel count must be at least 1".into()));
    }
    if bytes.len() % PCM16_SAMPLE_BYTES != 0 {
        return Err(HubError::Decode(format!(
            "odd PCM16 byte length: {}",
            bytes.len()
        )));
    }

    let sample_count = bytes.len() / PCM16_SAMPLE_BYTES;
    if sample_count % num_channels != 0 {
        return Err(HubError::Decode(format!(
            "{sample_count} samples do not split into {num_channels} channels"
        )));
    }

    let frame_count = sample_count / num_channels;
    let mut channels = vec![Vec::with_capacity(frame_count); num_channels];
    for (idx, pair) in bytes.chunks_exact(PCM16_SAMPLE_BYTES).enumerate() {
        let value = i16::from_le_bytes([pair[0], pair[1]]);
        channels[idx % num_channels].push(value as f32 / PCM16_SCALE);
    }
    Ok(channels)
}

/// Standard (padded) base64.
pub fn bytes_to_text(bytes: &[u8]) -> String {
    BASE64.encode(bytes)
}

/// Inverse of [`bytes_to_text`].
pub fn text_to_bytes(text: &str) -> Result<Vec<u8>> {
    BASE64
        .decode(text.trim())
        .map_err(|e| HubError::Decode(format!("invalid base64: {e}")))
}

/// Capture frame → transport text.
pub fn encode_frame(samples: &[f32]) -> String {
    bytes_to_text(&float_to_pcm16_bytes(samples))
}

/// Transport text → mono float samples.
pub fn decode_chunk(text: &str) -> Result<Vec<f32>> {
    let bytes = text_to_bytes(text)?;
    let mut channels = bytes_to_float_pcm16(&bytes, 1)?;
    Ok(channels.pop().unwrap_or_default())
}

fn quantize(sample: f32) -> i16 {
    // Float-to-int `as` saturates and maps NaN to 0.
    (sample * PCM16_SCALE) as i16
}
