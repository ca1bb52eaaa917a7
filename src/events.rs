//! Typed event bus.
//!
//! Each listener gets its own unbounded `tokio::mpsc` channel. `publish`
//! clones the event and sends it to every still-open channel; closed
//! channels are pruned on the next publish. Because each listener owns a
//! single consumer loop draining its own channel, handlers for a given
//! listener are necessarily processed in publish order, and a slow listener
//! only grows its own queue rather than blocking `publish` or other
//! listeners — this is the mechanism behind "FIFO per publisher, sequential
//! per listener, backpressure never reaches the publisher".
//!
//! This mirrors `dash_emulator_quic.beta.beta.BETAManagerImpl`, which
//! enqueues onto its own `asyncio.Queue` from each `on_*` callback and
//! drains it from a single `start()` loop, decoupled from whoever is
//! publishing.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::abr::Selections;
use crate::state::PlayerState;

/// Everything the bus can carry, tagged per
#[derive(Debug, Clone)]
pub enum BusEvent {
    TransferStart {
        url: Arc<str>,
    },
    BytesTransferred {
        url: Arc<str>,
        length: usize,
        position: usize,
        size: usize,
        /// The chunk's own bytes, for external analyzers/listeners. Cheap to
        /// clone (refcounted) so every subscriber gets its own handle on the
        /// same allocation rather than a copy.
        content: Bytes,
    },
    TransferEnd {
        url: Arc<str>,
        size: usize,
    },
    TransferCancel {
        url: Arc<str>,
        position: usize,
        size: usize,
    },
    SegmentDownloadStart {
        index: usize,
        selections: Selections,
    },
    SegmentDownloadComplete {
        index: usize,
    },
    StateChange {
        position: f64,
        old: PlayerState,
        new: PlayerState,
    },
    BufferLevelChange {
        level: f64,
    },
    PositionChange {
        position: f64,
    },
    BandwidthUpdate {
        bw: f64,
        extras: Arc<BandwidthExtras>,
    },
    ContinuousBandwidthUpdate {
        bw: Option<f64>,
    },
}

/// Raw smoothing inputs behind a `BandwidthUpdate`, kept around for an
/// external analyzer — present in `original_source/dash_emulator/bandwidth.py`'s
/// `extra_stats` and restored here.
#[derive(Debug, Clone, Default)]
pub struct BandwidthExtras {
    pub bytes_transferred: u64,
    pub transmission_start: f64,
    pub transmission_end: f64,
}

/// A registered listener's receiving end. Dropping this unsubscribes the
/// listener the next time `publish` prunes closed channels.
pub struct ListenerHandle {
    pub id: u64,
    rx: mpsc::UnboundedReceiver<BusEvent>,
}

impl ListenerHandle {
    pub async fn recv(&mut self) -> Option<BusEvent> {
        self.rx.recv().await
    }
}

#[derive(Default)]
struct Subscribers {
    next_id: u64,
    senders: HashMap<u64, mpsc::UnboundedSender<BusEvent>>,
}

/// The bus itself. Cheaply `Clone`-able (an `Arc` inside), so every
/// component that needs to publish can hold an owned copy.
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<Mutex<Subscribers>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new listener and return its receiving handle.
    pub fn subscribe(&self) -> ListenerHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut subs = self.inner.lock();
        let id = subs.next_id;
        subs.next_id += 1;
        subs.senders.insert(id, tx);
        ListenerHandle { id, rx }
    }

    /// Remove a listener explicitly (the weak-by-convention contract in
    ///: listeners must outlive the bus or deregister).
    pub fn unsubscribe(&self, handle: &ListenerHandle) {
        self.inner.lock().senders.remove(&handle.id);
    }

    /// Deliver `event` to every registered listener, in registration-order
    /// iteration (order among listeners is not itself meaningful — only
    /// per-listener order is guaranteed).
    pub fn publish(&self, event: BusEvent) {
        let mut subs = self.inner.lock();
        subs.senders.retain(|_, tx| tx.send(event.clone()).is_ok());
    }

    pub fn listener_count(&self) -> usize {
        self.inner.lock().senders.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_delivers_in_order_to_each_listener() {
        let bus = EventBus::new();
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();

        bus.publish(BusEvent::BufferLevelChange { level: 1.0 });
        bus.publish(BusEvent::BufferLevelChange { level: 2.0 });

        for listener in [&mut a, &mut b] {
            let first = listener.recv().await.unwrap();
            let second = listener.recv().await.unwrap();
            assert!(matches!(
                first,
                BusEvent::BufferLevelChange { level } if level == 1.0
            ));
            assert!(matches!(
                second,
                BusEvent::BufferLevelChange { level } if level == 2.0
            ));
        }
    }

    #[tokio::test]
    async fn dropping_a_listener_prunes_it_on_next_publish() {
        let bus = EventBus::new();
        let handle = bus.subscribe();
        assert_eq!(bus.listener_count(), 1);
        drop(handle);

        bus.publish(BusEvent::BufferLevelChange { level: 0.0 });
        assert_eq!(bus.listener_count(), 0);
    }

    #[tokio::test]
    async fn a_slow_listener_does_not_block_publish_to_others() {
        let bus = EventBus::new();
        let _slow = bus.subscribe(); // never drained
        let mut fast = bus.subscribe();

        for i in 0..10_000 {
            bus.publish(BusEvent::BufferLevelChange { level: i as f64 });
        }

        let received = fast.recv().await.unwrap();
        assert!(matches!(
            received,
            BusEvent::BufferLevelChange { level } if level == 0.0
        ));
    }
}
