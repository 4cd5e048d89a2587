//! Fixed-size capture frames.

/// A contiguous block of mono PCM samples at a known sample rate.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    /// Mono f32 samples in [-1.0, 1.0].
    pub samples: Vec<f32>,
    /// Sample rate in Hz.
    pub sample_rate: u32,
}

impl AudioFrame {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// Duration of this frame in seconds.
    pub fn duration_secs(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Cuts an arbitrary stream of samples into non-overlapping frames of
/// exactly `frame_len` samples. Leftover samples wait for the next push.
#[derive(Debug)]
pub struct FrameAssembler {
    frame_len: usize,
    sample_rate: u32,
    pending: Vec<f32>,
}

impl FrameAssembler {
    pub fn new(frame_len: usize, sample_rate: u32) -> Self {
        let frame_len = frame_len.max(1);
        Self {
            frame_len,
            sample_rate,
            pending: Vec::with_capacity(frame_len * 2),
        }
    }

    /// Append `samples` and return every frame that is now complete, in order.
    pub fn push(&mut self, samples: &[f32]) -> Vec<AudioFrame> {
        self.pending.extend_from_slice(samples);
        let complete = self.pending.len() / self.frame_len;
        if complete == 0 {
            return Vec::new();
        }

        let mut frames = Vec::with_capacity(complete);
        let mut rest = self.pending.split_off(complete * self.frame_len);
        std::mem::swap(&mut rest, &mut self.pending);
        for chunk in rest.chunks_exact(self.frame_len) {
            frames.push(AudioFrame::new(chunk.to_vec(), self.sample_rate));
        }
        frames
    }

    /// Samples waiting for the next complete frame.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Drop any partial frame.
    pub fn clear(&mut self) {
        self.pending.clear();
    }
}
