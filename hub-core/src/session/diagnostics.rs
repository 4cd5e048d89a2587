//! Per-session counters shared between the controller and the capture pump.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

#[derive(Debug, Default)]
pub struct SessionDiagnostics {
    frames_captured: AtomicU64,
    frames_sent: AtomicU64,
    send_errors: AtomicU64,
    chunks_received: AtomicU64,
    chunks_scheduled: AtomicU64,
    chunks_dropped: AtomicU64,
    interruptions: AtomicU64,
}

/// Point-in-time copy of [`SessionDiagnostics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticsSnapshot {
    pub frames_captured: u64,
    pub frames_sent: u64,
    pub send_errors: u64,
    pub chunks_received: u64,
    pub chunks_scheduled: u64,
    pub chunks_dropped: u64,
    pub interruptions: u64,
}

impl SessionDiagnostics {
    pub fn record_frame_captured(&self) {
        self.frames_captured.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_frame_sent(&self) {
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_send_error(&self) {
        self.send_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_chunk_received(&self) {
        self.chunks_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_chunk_scheduled(&self) {
        self.chunks_scheduled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_chunk_dropped(&self) {
        self.chunks_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_interruption(&self) {
        self.interruptions.fetch_add(1, Ordering::Relaxed);
    }

    /// Zero every counter. Called when a new session starts.
    pub fn reset(&self) {
        for counter in [
            &self.frames_captured,
            &self.frames_sent,
            &self.send_errors,
            &self.chunks_received,
            &self.chunks_scheduled,
            &self.chunks_dropped,
            &self.interruptions,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            frames_captured: self.frames_captured.load(Ordering::Relaxed),
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            send_errors: self.send_errors.load(Ordering::Relaxed),
            chunks_received: self.chunks_received.load(Ordering::Relaxed),
            chunks_scheduled: self.chunks_scheduled.load(Ordering::Relaxed),
            chunks_dropped: self.chunks_dropped.load(Ordering::Relaxed),
            interruptions: self.interruptions.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_recorded_counts_until_reset() {
        let diag = SessionDiagnostics::default();
        diag.record_frame_captured();
        diag.record_frame_captured();
        diag.record_frame_sent();
        diag.record_chunk_dropped();

        let snap = diag.snapshot();
        assert_eq!(snap.frames_captured, 2);
        assert_eq!(snap.frames_sent, 1);
        assert_eq!(snap.chunks_dropped, 1);
        assert_eq!(snap.interruptions, 0);

        diag.reset();
        assert_eq!(diag.snapshot(), DiagnosticsSnapshot::default());
    }
}
