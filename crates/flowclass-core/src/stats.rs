//! Pipeline statistics
//!
//! Lock-free counters shared between the ingestion and processing halves.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Pipeline counters
#[derive(Debug, Default)]
pub struct PipelineStats {
    pub packets: AtomicU64,
    pub windows: AtomicU64,
    pub flows_scored: AtomicU64,
    pub flows_skipped: AtomicU64,
    pub flows_pruned: AtomicU64,
    pub inference_timeouts: AtomicU64,
    pub inference_errors: AtomicU64,
}

impl PipelineStats {
    #[inline(always)]
    pub fn record_packet(&self) {
        self.packets.fetch_add(1, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn record_window(&self) {
        self.windows.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_scored(&self, scored: u64, skipped: u64) {
        self.flows_scored.fetch_add(scored, Ordering::Relaxed);
        self.flows_skipped.fetch_add(skipped, Ordering::Relaxed);
    }

    pub fn record_pruned(&self, pruned: u64) {
        self.flows_pruned.fetch_add(pruned, Ordering::Relaxed);
    }

    pub fn record_timeout(&self) {
        self.inference_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.inference_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> PipelineStatsSnapshot {
        PipelineStatsSnapshot {
            packets: self.packets.load(Ordering::Relaxed),
            windows: self.windows.load(Ordering::Relaxed),
            flows_scored: self.flows_scored.load(Ordering::Relaxed),
            flows_skipped: self.flows_skipped.load(Ordering::Relaxed),
            flows_pruned: self.flows_pruned.load(Ordering::Relaxed),
            inference_timeouts: self.inference_timeouts.load(Ordering::Relaxed),
            inference_errors: self.inference_errors.load(Ordering::Relaxed),
        }
    }
}

/// Stats snapshot (non-atomic)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PipelineStatsSnapshot {
    pub packets: u64,
    pub windows: u64,
    pub flows_scored: u64,
    pub flows_skipped: u64,
    pub flows_pruned: u64,
    pub inference_timeouts: u64,
    pub inference_errors: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot() {
        let stats = PipelineStats::default();
        stats.record_packet();
        stats.record_packet();
        stats.record_window();
        stats.record_scored(3, 1);
        stats.record_pruned(2);
        stats.record_timeout();

        let snap = stats.snapshot();
        assert_eq!(snap.packets, 2);
        assert_eq!(snap.windows, 1);
        assert_eq!(snap.flows_scored, 3);
        assert_eq!(snap.flows_skipped, 1);
        assert_eq!(snap.flows_pruned, 2);
        assert_eq!(snap.inference_timeouts, 1);
        assert_eq!(snap.inference_errors, 0);
    }
}
