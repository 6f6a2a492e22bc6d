//! Progress event fan-out.
//!
//! Events broadcast to however many subscribers are attached; `emit`
//! never blocks and never fails. A send with no live receivers drops the
//! event, which is the right behavior for an observability stream.

use std::sync::atomic::{AtomicU64, Ordering};

use metrics::counter;
use tokio::sync::broadcast;

use delver_core::ProgressEvent;

const DEFAULT_CAPACITY: usize = 256;

/// Broadcast fan-out for [`ProgressEvent`]s.
pub struct EventEmitter {
    tx: broadcast::Sender<ProgressEvent>,
    emitted: AtomicU64,
}

impl EventEmitter {
    /// Emitter with the given per-subscriber buffer capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            emitted: AtomicU64::new(0),
        }
    }

    /// Attach a new subscriber; it sees events emitted from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.tx.subscribe()
    }

    /// Emit one event to every live subscriber.
    pub fn emit(&self, event: ProgressEvent) {
        let _ = self.emitted.fetch_add(1, Ordering::Relaxed);
        counter!("delver_events_emitted_total", "type" => event.event_type().to_string())
            .increment(1);
        tracing::trace!(
            event_type = event.event_type(),
            conversation_id = event.conversation_id(),
            run_id = event.run_id(),
            "progress event"
        );
        let _ = self.tx.send(event);
    }

    /// Total events emitted over this emitter's lifetime.
    #[must_use]
    pub fn emitted_count(&self) -> u64 {
        self.emitted.load(Ordering::Relaxed)
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
