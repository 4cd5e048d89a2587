//! Sample-accurate playback timeline.
//!
//! The mixer owns the output clock: `frame_clock` counts frames rendered since
//! the context opened, and `current_time()` is that count divided by the
//! sample rate. Sources are scheduled at an absolute time, converted to a start
//! frame, and summed into the output while the clock is inside their span.
//!
//! `render` is called from the device callback with the mixer lock held. It
//! does not allocate: `schedule` keeps room in `ended` for every live source,
//! and `drain_ended` hands the ids out without giving that capacity back.

use std::sync::Arc;

use super::SourceId;

#[derive(Debug)]
struct ScheduledSource {
    id: SourceId,
    samples: Arc<[f32]>,
    start_frame: u64,
}

impl ScheduledSource {
    fn end_frame(&self) -> u64 {
        self.start_frame + self.samples.len() as u64
    }
}

/// Mono mixing timeline at a fixed sample rate.
#[derive(Debug)]
pub struct Mixer {
    sample_rate: u32,
    frame_clock: u64,
    sources: Vec<ScheduledSource>,
    ended: Vec<SourceId>,
    closed: bool,
}

impl Mixer {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate: sample_rate.max(1),
            frame_clock: 0,
            sources: Vec::new(),
            ended: Vec::new(),
            closed: false,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Seconds of audio rendered so far.
    pub fn current_time(&self) -> f64 {
        self.frame_clock as f64 / self.sample_rate as f64
    }

    /// Frames rendered so far.
    pub fn frame_clock(&self) -> u64 {
        self.frame_clock
    }

    /// Schedule `samples` to start at `start_time` seconds. A start time in the
    /// past begins at the next rendered frame.
    ///
    /// Returns the start time actually used, or `None` once closed.
    pub fn schedule(&mut self, id: SourceId, samples: Arc<[f32]>, start_time: f64) -> Option<f64> {
        if self.closed {
            return None;
        }
        let requested = (start_time.max(0.0) * self.sample_rate as f64).round() as u64;
        let start_frame = requested.max(self.frame_clock);
        self.sources.push(ScheduledSource {
            id,
            samples,
            start_frame,
        });
        self.ended.reserve(self.sources.len());
        Some(start_frame as f64 / self.sample_rate as f64)
    }

    /// Silence a source immediately. Returns `false` if it already ended.
    pub fn stop(&mut self, id: SourceId) -> bool {
        let before = self.sources.len();
        self.sources.retain(|s| s.id != id);
        self.sources.len() != before
    }

    /// Sources that finished playing since the last call, in completion order.
    pub fn drain_ended(&mut self) -> Vec<SourceId> {
        self.ended.drain(..).collect()
    }

    /// Number of scheduled sources that have not ended.
    pub fn active_sources(&self) -> usize {
        self.sources.len()
    }

    /// Drop every source and render silence from now on.
    pub fn close(&mut self) {
        self.sources.clear();
        self.ended.clear();
        self.closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Fill `out` with the next `out.len()` mono frames and advance the clock.
    pub fn render(&mut self, out: &mut [f32]) {
        out.fill(0.0);
        let window_start = self.frame_clock;
        let window_end = window_start + out.len() as u64;

        for source in &self.sources {
            let from = source.start_frame.max(window_start);
            let to = source.end_frame().min(window_end);
            if from >= to {
                continue;
            }
            let src_offset = (from - source.start_frame) as usize;
            let dst_offset = (from - window_start) as usize;
            let len = (to - from) as usize;
            let src = &source.samples[src_offset..src_offset + len];
            for (dst, s) in out[dst_offset..dst_offset + len].iter_mut().zip(src) {
                *dst += *s;
            }
        }

        self.frame_clock = window_end;

        let ended = &mut self.ended;
        self.sources.retain(|source| {
            if source.end_frame() <= window_end {
                ended.push(source.id);
                false
            } else {
                true
            }
        });
    }
}
