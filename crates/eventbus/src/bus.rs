//! The outbound event bus.
//!
//! The scheduler emits through [`EventBus::emit`], which never blocks: each
//! subscriber owns a bounded queue, and on overflow the oldest droppable
//! (`progress`) event in that queue is evicted first. Node-level events are
//! never dropped; a queue holding only undroppable events grows past its
//! bound instead.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::event::ExecutionEvent;

/// Default per-subscriber queue bound.
pub const DEFAULT_CAPACITY: usize = 1024;

struct Subscriber {
    queue: Mutex<VecDeque<ExecutionEvent>>,
    notify: Notify,
    closed: AtomicBool,
}

impl Subscriber {
    fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
        }
    }

    async fn notified(&self) {
        self.notify.notified().await;
    }
}

/// Per-run, non-blocking event fan-out.
pub struct EventBus {
    subscribers: Mutex<Vec<Arc<Subscriber>>>,
    capacity: usize,
    emitted: AtomicU64,
    progress_dropped: AtomicBool,
    closed: AtomicBool,
}

impl EventBus {
    /// Create a bus with the given per-subscriber queue bound.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
            capacity: capacity.max(1),
            emitted: AtomicU64::new(0),
            progress_dropped: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    /// Emit an event to every subscriber. Never blocks.
    pub fn emit(&self, event: ExecutionEvent) {
        self.emitted.fetch_add(1, Ordering::Relaxed);

        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|s| !s.closed.load(Ordering::Acquire));

        for subscriber in subscribers.iter() {
            let mut queue = subscriber.queue.lock();
            if queue.len() >= self.capacity {
                if let Some(pos) = queue.iter().position(ExecutionEvent::is_droppable) {
                    queue.remove(pos);
                    self.progress_dropped.store(true, Ordering::Release);
                } else if event.is_droppable() {
                    // Queue is all node-level events; shed the new progress
                    // instead.
                    self.progress_dropped.store(true, Ordering::Release);
                    continue;
                }
                // Node-level events push through the bound.
            }
            queue.push_back(event.clone());
            drop(queue);
            subscriber.notify.notify_one();
        }
    }

    /// Whether any `progress` event was dropped since the last call.
    /// Clears the flag; the scheduler emits a synthetic `progress` re-sync
    /// after the current band when this returns `true`.
    pub fn take_progress_dropped(&self) -> bool {
        self.progress_dropped.swap(false, Ordering::AcqRel)
    }

    /// Register a new subscriber with its own queue.
    pub fn subscribe(&self) -> EventSubscriber {
        let subscriber = Arc::new(Subscriber::new());
        if self.closed.load(Ordering::Acquire) {
            subscriber.closed.store(true, Ordering::Release);
        } else {
            self.subscribers.lock().push(Arc::clone(&subscriber));
        }
        EventSubscriber { inner: subscriber }
    }

    /// Close the bus: subscribers drain what is queued, then `recv` returns
    /// `None`.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        let subscribers = self.subscribers.lock();
        for subscriber in subscribers.iter() {
            subscriber.closed.store(true, Ordering::Release);
            subscriber.notify.notify_one();
        }
    }

    /// Total events emitted since creation.
    #[must_use]
    pub fn total_emitted(&self) -> u64 {
        self.emitted.load(Ordering::Relaxed)
    }

    /// Number of live subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|s| !s.closed.load(Ordering::Acquire));
        subscribers.len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("capacity", &self.capacity)
            .field("emitted", &self.total_emitted())
            .finish_non_exhaustive()
    }
}

/// Subscription handle; each holds its own ordered queue.
pub struct EventSubscriber {
    inner: Arc<Subscriber>,
}

impl EventSubscriber {
    /// Receive the next event, waiting asynchronously. Returns `None` once
    /// the bus is closed and the queue is drained.
    pub async fn recv(&mut self) -> Option<ExecutionEvent> {
        loop {
            if let Some(event) = self.inner.queue.lock().pop_front() {
                return Some(event);
            }
            if self.inner.closed.load(Ordering::Acquire) {
                return None;
            }
            self.inner.notified().await;
        }
    }

    /// Receive without blocking; `None` when nothing is queued.
    pub fn try_recv(&mut self) -> Option<ExecutionEvent> {
        self.inner.queue.lock().pop_front()
    }

    /// Drain everything currently queued.
    pub fn drain(&mut self) -> Vec<ExecutionEvent> {
        self.inner.queue.lock().drain(..).collect()
    }
}

impl Drop for EventSubscriber {
    fn drop(&mut self) {
        self.inner.closed.store(true, Ordering::Release);
    }
}

impl std::fmt::Debug for EventSubscriber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSubscriber").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::SkipReason;
    use opsflow_core::NodeId;
    use pretty_assertions::assert_eq;

    fn nid(s: &str) -> NodeId {
        NodeId::new(s).unwrap()
    }

    fn progress(completed: usize) -> ExecutionEvent {
        ExecutionEvent::Progress {
            completed,
            failed: 0,
            skipped: 0,
            total: 10,
            percentage: completed as f64 * 10.0,
            current_level: 0,
            total_levels: 1,
        }
    }

    fn node_start(id: &str) -> ExecutionEvent {
        ExecutionEvent::NodeStart { node_id: nid(id) }
    }

    #[test]
    fn emit_without_subscribers_does_not_panic() {
        let bus = EventBus::default();
        bus.emit(node_start("a"));
        assert_eq!(bus.total_emitted(), 1);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn subscriber_receives_in_order() {
        let bus = EventBus::default();
        let mut sub = bus.subscribe();

        bus.emit(node_start("a"));
        bus.emit(progress(1));
        bus.emit(node_start("b"));

        assert_eq!(sub.try_recv(), Some(node_start("a")));
        assert_eq!(sub.try_recv(), Some(progress(1)));
        assert_eq!(sub.try_recv(), Some(node_start("b")));
        assert_eq!(sub.try_recv(), None);
    }

    #[test]
    fn multiple_subscribers_each_get_a_copy() {
        let bus = EventBus::default();
        let mut sub1 = bus.subscribe();
        let mut sub2 = bus.subscribe();

        bus.emit(node_start("a"));
        assert!(sub1.try_recv().is_some());
        assert!(sub2.try_recv().is_some());
    }

    #[test]
    fn overflow_drops_oldest_progress_first() {
        let bus = EventBus::new(3);
        let mut sub = bus.subscribe();

        bus.emit(progress(1));
        bus.emit(node_start("a"));
        bus.emit(progress(2));
        // Queue full; the oldest progress (1) is evicted for the new event.
        bus.emit(node_start("b"));

        assert!(bus.take_progress_dropped());
        let events = sub.drain();
        assert_eq!(events, vec![node_start("a"), progress(2), node_start("b")]);
        // Flag clears after the take.
        assert!(!bus.take_progress_dropped());
    }

    #[test]
    fn node_events_are_never_dropped() {
        let bus = EventBus::new(2);
        let mut sub = bus.subscribe();

        bus.emit(node_start("a"));
        bus.emit(node_start("b"));
        // No droppable events queued; the bound stretches.
        bus.emit(ExecutionEvent::NodeSkipped {
            node_id: nid("c"),
            reason: SkipReason::Cancelled,
        });

        assert!(!bus.take_progress_dropped());
        assert_eq!(sub.drain().len(), 3);
    }

    #[test]
    fn new_progress_shed_when_queue_is_all_node_events() {
        let bus = EventBus::new(2);
        let mut sub = bus.subscribe();

        bus.emit(node_start("a"));
        bus.emit(node_start("b"));
        bus.emit(progress(1));

        assert!(bus.take_progress_dropped());
        assert_eq!(sub.drain(), vec![node_start("a"), node_start("b")]);
    }

    #[tokio::test]
    async fn async_recv_waits_for_events() {
        let bus = Arc::new(EventBus::default());
        let mut sub = bus.subscribe();

        let emitter = Arc::clone(&bus);
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            emitter.emit(node_start("late"));
        });

        let event = sub.recv().await;
        assert_eq!(event, Some(node_start("late")));
    }

    #[tokio::test]
    async fn recv_returns_none_after_close_and_drain() {
        let bus = EventBus::default();
        let mut sub = bus.subscribe();
        bus.emit(node_start("a"));
        bus.close();

        assert_eq!(sub.recv().await, Some(node_start("a")));
        assert_eq!(sub.recv().await, None);
    }

    #[test]
    fn dropped_subscriber_is_pruned() {
        let bus = EventBus::default();
        let sub = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);
        drop(sub);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn subscribe_after_close_is_immediately_closed() {
        let bus = EventBus::default();
        bus.close();
        let mut sub = bus.subscribe();
        assert!(sub.try_recv().is_none());
    }
}
