//! Per-window flow buckets
//!
//! A partitioning structure with no clock of its own: packets go in with
//! [`FlowAggregator::add_packet`], the whole window comes out with
//! [`FlowAggregator::drain_window`]. The bucket map is swapped out under a
//! single lock, so concurrent adds land either in the drained window or in
//! the next one, never both and never neither.

use crate::flow::{FlowKey, PacketRecord};
use parking_lot::Mutex;
use std::collections::HashMap;

/// Packets of one window, grouped by flow in arrival order
pub type WindowBuckets = HashMap<FlowKey, Vec<PacketRecord>>;

#[derive(Default)]
struct Buckets {
    flows: WindowBuckets,
    packets: usize,
}

/// Groups incoming packets into per-flow buckets for the current window
#[derive(Default)]
pub struct FlowAggregator {
    current: Mutex<Buckets>,
}

impl FlowAggregator {
    /// Create empty aggregator
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a packet to its flow's bucket, creating the bucket if needed.
    /// Records are never re-sorted.
    #[inline]
    pub fn add_packet(&self, key: FlowKey, record: PacketRecord) {
        let mut current = self.current.lock();
        current.flows.entry(key).or_default().push(record);
        current.packets += 1;
    }

    /// Take every bucket accumulated since the last drain and start a new,
    /// empty window.
    pub fn drain_window(&self) -> WindowBuckets {
        let drained = std::mem::take(&mut *self.current.lock());
        tracing::trace!(flows = drained.flows.len(), packets = drained.packets, "window drained");
        drained.flows
    }

    /// Flows in the current window
    pub fn flow_count(&self) -> usize {
        self.current.lock().flows.len()
    }

    /// Packets in the current window
    pub fn packet_count(&self) -> usize {
        self.current.lock().packets
    }

    /// True if nothing was added since the last drain
    pub fn is_empty(&self) -> bool {
        self.current.lock().packets == 0
    }
}
