// Event Bus
// Typed fan-out with a bounded history ring and per-subscriber buffered
// channels. Publishing never blocks: a full subscriber buffer drops that
// delivery and increments the drop counter.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tracing::trace;

use gatehouse_types::{Event, EventType};

pub const DEFAULT_HISTORY_CAPACITY: usize = 256;

struct SubscriberEntry {
    id: u64,
    /// None subscribes to every type.
    types: Option<HashSet<EventType>>,
    tx: mpsc::Sender<Event>,
}

struct BusInner {
    history: VecDeque<Event>,
    capacity: usize,
    subscribers: Vec<SubscriberEntry>,
    closed: bool,
}

#[derive(Clone)]
pub struct EventBus {
    inner: Arc<Mutex<BusInner>>,
    next_subscriber_id: Arc<AtomicU64>,
    dropped: Arc<AtomicU64>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_HISTORY_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(BusInner {
                history: VecDeque::with_capacity(capacity),
                capacity: capacity.max(1),
                subscribers: Vec::new(),
                closed: false,
            })),
            next_subscriber_id: Arc::new(AtomicU64::new(1)),
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Append to history and hand the event to every matching subscriber.
    /// Dropped silently once the bus is closed.
    pub fn publish(&self, event: Event) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if inner.closed {
            return;
        }
        if inner.history.len() == inner.capacity {
            inner.history.pop_front();
        }
        inner.history.push_back(event.clone());
        for sub in &inner.subscribers {
            let wants = match &sub.types {
                Some(types) => types.contains(&event.event_type),
                None => true,
            };
            if !wants {
                continue;
            }
            if sub.tx.try_send(event.clone()).is_err() {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                trace!(subscriber = sub.id, event = %event.event_type, "dropped delivery to slow subscriber");
            }
        }
    }

    /// Subscribe with a bounded buffer. An empty type list subscribes to all
    /// event types. The returned subscription unsubscribes on drop.
    pub fn subscribe(&self, buffer_size: usize, types: &[EventType]) -> Subscription {
        let (tx, rx) = mpsc::channel(buffer_size.max(1));
        let id = self.next_subscriber_id.fetch_add(1, Ordering::Relaxed);
        let entry = SubscriberEntry {
            id,
            types: if types.is_empty() {
                None
            } else {
                Some(types.iter().copied().collect())
            },
            tx,
        };
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if !inner.closed {
            inner.subscribers.push(entry);
        }
        Subscription {
            id,
            rx,
            bus: self.clone(),
        }
    }

    /// The most recent <= n events in publish order, oldest first.
    pub fn history(&self, n: usize) -> Vec<Event> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let skip = inner.history.len().saturating_sub(n);
        inner.history.iter().skip(skip).cloned().collect()
    }

    /// Unblock and invalidate all subscribers; subsequent publishes drop.
    pub fn close(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.closed = true;
        inner.subscribers.clear();
    }

    pub fn is_closed(&self) -> bool {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .closed
    }

    /// Deliveries dropped because a subscriber buffer was full.
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn unsubscribe(&self, id: u64) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.subscribers.retain(|sub| sub.id != id);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Receive side of a subscription. Events arrive in publish order.
pub struct Subscription {
    id: u64,
    rx: mpsc::Receiver<Event>,
    bus: EventBus,
}

impl Subscription {
    /// Next event, or `None` once the bus is closed or unsubscribed.
    pub async fn recv(&mut self) -> Option<Event> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Event> {
        self.rx.try_recv().ok()
    }

    /// Detach from the bus. Dropping the subscription does the same.
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.bus.unsubscribe(self.id);
    }
}
