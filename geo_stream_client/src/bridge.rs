// Cross-thread hand-off between the network reader and the render loop.
//
// Three independent lanes carry inbound packets:
// - geometry: mesh / curve / text deltas,
// - summary:  authoritative per-kind object counts,
// - index:    streaming-gate position updates.
//
// Each lane is an unbounded crossbeam channel. The producer half
// (`BridgeSender`) moves onto the transport's reader thread; the consumer
// half (`BridgeReceiver`) stays with the render loop. No lane ever waits on
// another lane, and nothing is held across the application of a packet.
//
// Clear-on-summary: a count summary changes which slots exist, so every
// geometry delta still buffered when a summary arrives refers to a stale
// world. `enqueue_summary` drains the geometry lane before pushing the
// summary. Because there is a single producer, once `enqueue_summary`
// returns no later `drain` can observe a delta that was enqueued before it.
//
// The lanes are unbounded. A server that outruns the render loop forever
// grows them without limit; `pending()` exposes the depths so the session
// can log a growing backlog.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam_channel::{Receiver, Sender, unbounded};
use geo_stream_protocol::{CountSummary, GeometryDelta, IndexUpdate};

/// Build a connected producer/consumer pair.
pub fn bridge() -> (BridgeSender, BridgeReceiver) {
    let (geometry_tx, geometry_rx) = unbounded();
    let (summary_tx, summary_rx) = unbounded();
    let (index_tx, index_rx) = unbounded();
    let purged = Arc::new(AtomicU64::new(0));

    let sender = BridgeSender {
        geometry_tx,
        geometry_purge: geometry_rx.clone(),
        summary_tx,
        index_tx,
        purged: Arc::clone(&purged),
    };
    let receiver = BridgeReceiver {
        geometry_rx,
        summary_rx,
        index_rx,
        purged,
    };
    (sender, receiver)
}

/// Producer half, owned by the network reader.
pub struct BridgeSender {
    geometry_tx: Sender<GeometryDelta>,
    /// Second handle on the geometry lane, used only to purge it.
    geometry_purge: Receiver<GeometryDelta>,
    summary_tx: Sender<CountSummary>,
    index_tx: Sender<IndexUpdate>,
    purged: Arc<AtomicU64>,
}

impl BridgeSender {
    /// Returns false once the consumer half has been dropped.
    pub fn enqueue_geometry(&self, delta: GeometryDelta) -> bool {
        self.geometry_tx.send(delta).is_ok()
    }

    /// Discard all buffered geometry, then enqueue the summary.
    pub fn enqueue_summary(&self, summary: CountSummary) -> bool {
        let dropped = self.purge_geometry();
        if dropped > 0 {
            log::debug!("count summary superseded {dropped} buffered geometry deltas");
        }
        self.summary_tx.send(summary).is_ok()
    }

    pub fn enqueue_index(&self, update: IndexUpdate) -> bool {
        self.index_tx.send(update).is_ok()
    }

    /// Empty the geometry lane. Returns how many deltas were discarded.
    fn purge_geometry(&self) -> usize {
        let dropped = self.geometry_purge.try_iter().count();
        self.purged.fetch_add(dropped as u64, Ordering::Relaxed);
        dropped
    }
}

/// At most one item per lane, as popped by one `drain` call.
#[derive(Debug, Default, PartialEq)]
pub struct Drained {
    pub index: Option<IndexUpdate>,
    pub summary: Option<CountSummary>,
    pub geometry: Option<GeometryDelta>,
}

impl Drained {
    pub fn is_empty(&self) -> bool {
        self.index.is_none() && self.summary.is_none() && self.geometry.is_none()
    }
}

/// Current depth of each lane.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LaneDepths {
    pub geometry: usize,
    pub summary: usize,
    pub index: usize,
}

/// Consumer half, owned by the render loop.
pub struct BridgeReceiver {
    geometry_rx: Receiver<GeometryDelta>,
    summary_rx: Receiver<CountSummary>,
    index_rx: Receiver<IndexUpdate>,
    purged: Arc<AtomicU64>,
}

impl BridgeReceiver {
    /// Pop one summary and one geometry delta, and the newest index update.
    ///
    /// Only the latest streaming position matters, so the index lane is
    /// emptied and every older update in it is discarded. Summary and
    /// geometry lanes give up one item each, bounding per-tick work.
    pub fn drain(&self) -> Drained {
        Drained {
            index: self.index_rx.try_iter().last(),
            summary: pop(&self.summary_rx),
            geometry: pop(&self.geometry_rx),
        }
    }

    pub fn pending(&self) -> LaneDepths {
        LaneDepths {
            geometry: self.geometry_rx.len(),
            summary: self.summary_rx.len(),
            index: self.index_rx.len(),
        }
    }

    /// Total geometry deltas discarded by clear-on-summary so far.
    pub fn purged_total(&self) -> u64 {
        self.purged.load(Ordering::Relaxed)
    }
}

/// Non-blocking pop. A disconnected producer just means nothing more will
/// arrive; whatever is already buffered is still returned.
fn pop<T>(rx: &Receiver<T>) -> Option<T> {
    rx.try_recv().ok()
}
