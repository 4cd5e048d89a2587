//! Gapless playback scheduling for inbound model audio.
//!
//! ## Scheduling rule
//!
//! ```text
//! start_i          = max(output.now(), next_start_time)
//! next_start_time  = start_i + duration_i
//! ```
//!
//! The output may still push `start_i` later if its clock moves on before
//! the source lands, so the timeline always advances from the start time the
//! output reports back.
//!
//! Chunks arrive with network jitter but are laid end-to-end on the output
//! clock: a chunk that arrives while the previous one is still playing starts
//! exactly where it ends; a chunk that arrives after a stall starts "now".
//!
//! `PlaybackScheduler` is driven from a single control thread (the session
//! actor), so `next_start_time` and the live set need no lock. Only the
//! `OutputContext` implementation shares state with the audio callback.

pub mod mixer;

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, info};

use crate::codec;
use crate::error::Result;

/// Identifies one scheduled source on an output context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceId(pub u64);

/// Output device abstraction: a clock plus scheduled, stoppable sources.
///
/// Mirrors what the scheduler needs from an audio output and nothing more.
/// `CpalOutput` is the hardware implementation; tests use a manual clock.
pub trait OutputContext {
    /// Current output clock in seconds. Never decreases.
    fn current_time(&self) -> f64;

    /// Sample rate of buffers handed to `start_source`.
    fn sample_rate(&self) -> u32;

    /// Begin playing `samples` at `start_time` on the output clock, or at the
    /// clock itself if it has already passed `start_time`. Returns the start
    /// time actually used, read under the same lock as the schedule.
    fn start_source(&mut self, id: SourceId, samples: Arc<[f32]>, start_time: f64) -> Result<f64>;

    /// Silence a source immediately. Unknown ids are ignored.
    fn stop_source(&mut self, id: SourceId);

    /// Sources that finished naturally since the last call.
    fn drain_ended(&mut self) -> Vec<SourceId>;

    /// Release the output device. Further calls are no-ops.
    fn close(&mut self);
}

/// One scheduled unit of output audio.
#[derive(Debug, Clone)]
pub struct PlaybackHandle {
    pub id: SourceId,
    /// Absolute start time on the output clock (seconds).
    pub start_time: f64,
    /// Buffer length in seconds.
    pub duration: f64,
}

/// Result of a successful `enqueue`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledPlayback {
    pub id: SourceId,
    pub start_time: f64,
    pub duration: f64,
}

/// Owns the live playback set and the "next available start time".
pub struct PlaybackScheduler {
    output: Box<dyn OutputContext>,
    next_start_time: f64,
    live: BTreeMap<SourceId, PlaybackHandle>,
    next_id: u64,
    closed: bool,
}

impl PlaybackScheduler {
    pub fn new(output: Box<dyn OutputContext>) -> Self {
        Self {
            output,
            next_start_time: 0.0,
            live: BTreeMap::new(),
            next_id: 0,
            closed: false,
        }
    }

    /// Decode a base64 PCM16 chunk and schedule it after everything already queued.
    ///
    /// Returns `Ok(None)` for a chunk with no samples.
    ///
    /// # Errors
    /// `HubError::Decode` for malformed chunks. Nothing is scheduled and the
    /// clock is left untouched.
    pub fn enqueue(&mut self, chunk: &str) -> Result<Option<ScheduledPlayback>> {
        let samples = codec::decode_chunk(chunk)?;
        self.enqueue_samples(samples)
    }

    /// Schedule already-decoded mono samples at the output sample rate.
    pub fn enqueue_samples(&mut self, samples: Vec<f32>) -> Result<Option<ScheduledPlayback>> {
        self.reap_finished();
        if self.closed || samples.is_empty() {
            return Ok(None);
        }

        let duration = samples.len() as f64 / self.output.sample_rate() as f64;
        let requested = self.output.current_time().max(self.next_start_time);
        let id = SourceId(self.next_id);

        let start_time = self.output.start_source(id, samples.into(), requested)?;
        self.next_id += 1;
        self.next_start_time = start_time + duration;
        self.live.insert(
            id,
            PlaybackHandle {
                id,
                start_time,
                duration,
            },
        );

        debug!(
            source = id.0,
            start_time,
            duration,
            live = self.live.len(),
            "chunk scheduled"
        );
        Ok(Some(ScheduledPlayback {
            id,
            start_time,
            duration,
        }))
    }

    /// Stop everything that is playing or queued and restart the timeline at
    /// the output clock. Returns how many handles were stopped.
    pub fn interrupt(&mut self) -> usize {
        self.reap_finished();
        let stopped = self.stop_all();
        self.next_start_time = 0.0;
        info!(stopped, "playback interrupted");
        stopped
    }

    /// Stop all handles and release the output device. Idempotent.
    pub fn shutdown(&mut self) {
        if self.closed {
            return;
        }
        let stopped = self.stop_all();
        self.next_start_time = 0.0;
        self.output.close();
        self.closed = true;
        debug!(stopped, "playback scheduler shut down");
    }

    /// Remove handles whose playback completed naturally.
    pub fn reap_finished(&mut self) -> usize {
        let ended = self.output.drain_ended();
        let mut removed = 0;
        for id in ended {
            if self.live.remove(&id).is_some() {
                removed += 1;
            }
        }
        removed
    }

    /// Handles currently scheduled or sounding.
    pub fn live_count(&mut self) -> usize {
        self.reap_finished();
        self.live.len()
    }

    pub fn next_start_time(&self) -> f64 {
        self.next_start_time
    }

    pub fn is_shut_down(&self) -> bool {
        self.closed
    }

    fn stop_all(&mut self) -> usize {
        let stopped = self.live.len();
        for id in self.live.keys() {
            self.output.stop_source(*id);
        }
        self.live.clear();
        stopped
    }
}

impl Drop for PlaybackScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::mixer::Mixer;
    use crate::error::HubError;
    use approx::assert_abs_diff_eq;
    use parking_lot::Mutex;

    #[derive(Debug, Default)]
    struct OutputLog {
        now: f64,
        started: Vec<(SourceId, f64, usize)>,
        stopped: Vec<SourceId>,
        ended: Vec<SourceId>,
        closed: bool,
    }

    struct ManualOutput {
        log: Arc<Mutex<OutputLog>>,
    }

    impl OutputContext for ManualOutput {
        fn current_time(&self) -> f64 {
            self.log.lock().now
        }

        fn sample_rate(&self) -> u32 {
            24_000
        }

        fn start_source(
            &mut self,
            id: SourceId,
            samples: Arc<[f32]>,
            start_time: f64,
        ) -> Result<f64> {
            self.log.lock().started.push((id, start_time, samples.len()));
            Ok(start_time)
        }

        fn stop_source(&mut self, id: SourceId) {
            self.log.lock().stopped.push(id);
        }

        fn drain_ended(&mut self) -> Vec<SourceId> {
            std::mem::take(&mut self.log.lock().ended)
        }

        fn close(&mut self) {
            self.log.lock().closed = true;
        }
    }

    fn scheduler() -> (PlaybackScheduler, Arc<Mutex<OutputLog>>) {
        let log = Arc::new(Mutex::new(OutputLog::default()));
        let output = ManualOutput {
            log: Arc::clone(&log),
        };
        (PlaybackScheduler::new(Box::new(output)), log)
    }

    /// `seconds` of 24 kHz audio as a wire chunk.
    fn chunk(seconds: f64) -> String {
        let len = (seconds * 24_000.0).round() as usize;
        codec::encode_frame(&vec![0.1; len])
    }

    #[test]
    fn first_chunk_starts_at_the_output_clock() {
        let (mut scheduler, log) = scheduler();
        log.lock().now = 1.5;

        let scheduled = scheduler.enqueue(&chunk(0.5)).unwrap().unwrap();
        assert_abs_diff_eq!(scheduled.start_time, 1.5);
        assert_abs_diff_eq!(scheduled.duration, 0.5);
        assert_abs_diff_eq!(scheduler.next_start_time(), 2.0);
    }

    #[test]
    fn promptly_delivered_chunks_play_back_to_back() {
        let (mut scheduler, log) = scheduler();
        let durations = [0.2, 0.35, 0.1, 0.5];
        let arrivals = [0.0, 0.05, 0.3, 0.6];

        let mut scheduled = Vec::new();
        for (duration, arrival) in durations.iter().zip(arrivals) {
            log.lock().now = arrival;
            scheduled.push(scheduler.enqueue(&chunk(*duration)).unwrap().unwrap());
        }

        for pair in scheduled.windows(2) {
            assert_abs_diff_eq!(
                pair[1].start_time,
                pair[0].start_time + pair[0].duration,
                epsilon = 1e-9
            );
        }
        assert_eq!(scheduler.live_count(), 4);
    }

    /// Output whose device callback renders one block between the scheduler
    /// reading the clock and the source landing on the timeline.
    struct RacingOutput {
        mixer: Arc<Mutex<Mixer>>,
        block: Vec<f32>,
    }

    impl OutputContext for RacingOutput {
        fn current_time(&self) -> f64 {
            self.mixer.lock().current_time()
        }

        fn sample_rate(&self) -> u32 {
            self.mixer.lock().sample_rate()
        }

        fn start_source(
            &mut self,
            id: SourceId,
            samples: Arc<[f32]>,
            start_time: f64,
        ) -> Result<f64> {
            let mut mixer = self.mixer.lock();
            mixer.render(&mut self.block);
            mixer
                .schedule(id, samples, start_time)
                .ok_or_else(|| HubError::AudioStream("closed".into()))
        }

        fn stop_source(&mut self, id: SourceId) {
            self.mixer.lock().stop(id);
        }

        fn drain_ended(&mut self) -> Vec<SourceId> {
            self.mixer.lock().drain_ended()
        }

        fn close(&mut self) {
            self.mixer.lock().close();
        }
    }

    #[test]
    fn render_between_clock_read_and_schedule_does_not_overlap_chunks() {
        let mixer = Arc::new(Mutex::new(Mixer::new(24_000)));
        let output = RacingOutput {
            mixer: Arc::clone(&mixer),
            block: vec![0.0; 480],
        };
        let mut scheduler = PlaybackScheduler::new(Box::new(output));

        let first = scheduler.enqueue(&chunk(0.1)).unwrap().unwrap();
        assert_abs_diff_eq!(first.start_time, 0.02, epsilon = 1e-9);
        let second = scheduler.enqueue(&chunk(0.1)).unwrap().unwrap();
        assert!(
            second.start_time >= first.start_time + first.duration - 1e-9,
            "second chunk starts at {} inside the first ({}..{})",
            second.start_time,
            first.start_time,
            first.start_time + first.duration
        );
        assert_abs_diff_eq!(scheduler.next_start_time(), 0.22, epsilon = 1e-9);

        // Every rendered frame holds at most one chunk.
        let mut out = vec![0.0; 24_000];
        mixer.lock().render(&mut out);
        let peak = out.iter().fold(0.0f32, |m, s| m.max(s.abs()));
        assert!(peak < 0.15, "overlapping chunks summed to {peak}");
    }

    #[test]
    fn late_chunk_starts_now_instead_of_in_the_past() {
        let (mut scheduler, log) = scheduler();
        scheduler.enqueue(&chunk(0.25)).unwrap();

        log.lock().now = 2.0;
        let late = scheduler.enqueue(&chunk(0.25)).unwrap().unwrap();
        assert_abs_diff_eq!(late.start_time, 2.0);
        assert_abs_diff_eq!(scheduler.next_start_time(), 2.25);
    }

    #[test]
    fn interrupt_stops_every_live_handle_and_resets_the_timeline() {
        let (mut scheduler, log) = scheduler();
        let ids: Vec<SourceId> = (0..3)
            .map(|_| scheduler.enqueue(&chunk(1.0)).unwrap().unwrap().id)
            .collect();
        assert_abs_diff_eq!(scheduler.next_start_time(), 3.0);

        log.lock().now = 0.4;
        assert_eq!(scheduler.interrupt(), 3);
        assert_eq!(scheduler.live_count(), 0);
        assert_eq!(scheduler.next_start_time(), 0.0);
        assert_eq!(log.lock().stopped, ids);

        let next = scheduler.enqueue(&chunk(0.1)).unwrap().unwrap();
        assert_abs_diff_eq!(next.start_time, 0.4);
    }

    #[test]
    fn naturally_finished_handles_leave_the_live_set() {
        let (mut scheduler, log) = scheduler();
        let first = scheduler.enqueue(&chunk(0.1)).unwrap().unwrap();
        scheduler.enqueue(&chunk(0.1)).unwrap();

        log.lock().ended.push(first.id);
        assert_eq!(scheduler.live_count(), 1);

        scheduler.interrupt();
        assert_eq!(log.lock().stopped.len(), 1, "finished handle is not stopped again");
    }

    #[test]
    fn malformed_chunk_leaves_schedule_untouched() {
        let (mut scheduler, log) = scheduler();
        scheduler.enqueue(&chunk(0.5)).unwrap();
        let before = scheduler.next_start_time();

        let err = scheduler.enqueue("AAAA").unwrap_err();
        assert!(matches!(err, HubError::Decode(_)));
        assert_eq!(scheduler.next_start_time(), before);
        assert_eq!(scheduler.live_count(), 1);
        assert_eq!(log.lock().started.len(), 1);
    }

    #[test]
    fn empty_chunk_is_ignored() {
        let (mut scheduler, _log) = scheduler();
        assert!(scheduler.enqueue("").unwrap().is_none());
        assert_eq!(scheduler.next_start_time(), 0.0);
    }

    #[test]
    fn shutdown_stops_handles_and_closes_output_once() {
        let (mut scheduler, log) = scheduler();
        scheduler.enqueue(&chunk(0.2)).unwrap();
        scheduler.enqueue(&chunk(0.2)).unwrap();

        scheduler.shutdown();
        scheduler.shutdown();
        assert!(scheduler.is_shut_down());
        assert!(log.lock().closed);
        assert_eq!(log.lock().stopped.len(), 2);
        assert!(scheduler.enqueue(&chunk(0.2)).unwrap().is_none());
    }
}
