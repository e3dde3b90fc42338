//! Structured event bus.
//!
//! One global broadcaster. Subscribers register a callback plus a category
//! bitmask; each subscriber gets its own bounded queue drained by a dedicated
//! dispatch thread, so delivery into a subscriber is always single-threaded
//! and producers never block on slow consumers. When a queue is full,
//! low-severity events are dropped and the drop count is reported to that
//! subscriber as a `dropped_events` event once the queue has room again.
//!
//! Unsubscribe joins the dispatch thread before returning: after it returns,
//! no further callbacks fire for that subscriber. Do not call `unsubscribe`
//! from inside the subscriber's own callback.

use crate::platform;
use crossbeam_channel::{bounded, Sender, TrySendError};
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Event categories. Each maps to one bit in a subscriber's filter mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventCategory {
    Lifecycle,
    Inference,
    Download,
    Memory,
    Voice,
    Error,
    Bus,
}

impl EventCategory {
    pub fn bit(&self) -> u32 {
        match self {
            EventCategory::Lifecycle => 1 << 0,
            EventCategory::Inference => 1 << 1,
            EventCategory::Download => 1 << 2,
            EventCategory::Memory => 1 << 3,
            EventCategory::Voice => 1 << 4,
            EventCategory::Error => 1 << 5,
            EventCategory::Bus => 1 << 6,
        }
    }
}

/// Match-everything filter mask.
pub const ALL_CATEGORIES: u32 = u32::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventSeverity {
    Debug,
    Info,
    Warn,
    Error,
}

/// A structured event. Payloads are JSON objects with fixed keys per kind.
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    pub event_id: u64,
    pub timestamp_ms: i64,
    pub category: EventCategory,
    pub severity: EventSeverity,
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

impl SubscriberId {
    pub fn raw(&self) -> u64 {
        self.0
    }

    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }
}

struct Subscriber {
    mask: u32,
    sender: Sender<Event>,
    /// Events dropped since the last successful dropped_events report.
    dropped: Arc<AtomicU64>,
    thread: Option<JoinHandle<()>>,
}

/// Queue capacity per subscriber.
const QUEUE_CAPACITY: usize = 256;
/// How long a producer will wait for room for a Warn/Error event.
const HIGH_SEVERITY_GRACE: Duration = Duration::from_millis(2);

pub struct EventBus {
    subscribers: RwLock<HashMap<u64, Subscriber>>,
    next_subscriber: AtomicU64,
    next_event: AtomicU64,
}

impl EventBus {
    fn new() -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
            next_subscriber: AtomicU64::new(1),
            next_event: AtomicU64::new(1),
        }
    }

    /// Register a callback with a category filter mask.
    pub fn subscribe<F>(&self, mask: u32, callback: F) -> SubscriberId
    where
        F: Fn(&Event) + Send + 'static,
    {
        let (sender, receiver) = bounded::<Event>(QUEUE_CAPACITY);
        let thread = std::thread::Builder::new()
            .name("event-dispatch".into())
            .spawn(move || {
                // Ends when the sender side is dropped on unsubscribe.
                for event in receiver.iter() {
                    callback(&event);
                }
            })
            .expect("failed to spawn event dispatch thread");

        let id = self.next_subscriber.fetch_add(1, Ordering::Relaxed);
        self.subscribers.write().insert(
            id,
            Subscriber {
                mask,
                sender,
                dropped: Arc::new(AtomicU64::new(0)),
                thread: Some(thread),
            },
        );
        SubscriberId(id)
    }

    /// Remove a subscriber. Guaranteed: no callback fires after this returns.
    pub fn unsubscribe(&self, id: SubscriberId) {
        let sub = self.subscribers.write().remove(&id.0);
        if let Some(mut sub) = sub {
            drop(sub.sender);
            if let Some(handle) = sub.thread.take() {
                let _ = handle.join();
            }
        }
    }

    /// Emit an event to all subscribers whose mask matches its category.
    pub fn publish(
        &self,
        category: EventCategory,
        severity: EventSeverity,
        payload: serde_json::Value,
    ) {
        let event = Event {
            event_id: self.next_event.fetch_add(1, Ordering::Relaxed),
            timestamp_ms: platform::now_ms(),
            category,
            severity,
            payload,
        };

        let subscribers = self.subscribers.read();
        for sub in subscribers.values() {
            if sub.mask & category.bit() == 0 {
                continue;
            }
            self.deliver(sub, event.clone());
        }
    }

    fn deliver(&self, sub: &Subscriber, event: Event) {
        // Report pending drops first so the subscriber learns about the gap
        // in order, before the next live event.
        let pending = sub.dropped.load(Ordering::Relaxed);
        if pending > 0 {
            let report = Event {
                event_id: self.next_event.fetch_add(1, Ordering::Relaxed),
                timestamp_ms: platform::now_ms(),
                category: EventCategory::Bus,
                severity: EventSeverity::Warn,
                payload: serde_json::json!({
                    "kind": "dropped_events",
                    "count": pending,
                }),
            };
            if sub.sender.try_send(report).is_ok() {
                sub.dropped.fetch_sub(pending, Ordering::Relaxed);
            }
        }

        let severity = event.severity;
        match sub.sender.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                if severity >= EventSeverity::Warn {
                    // High-severity events get a brief grace period before
                    // being counted as dropped. Producers are never blocked
                    // for longer than this.
                    if sub.sender.send_timeout(event, HIGH_SEVERITY_GRACE).is_ok() {
                        return;
                    }
                }
                sub.dropped.fetch_add(1, Ordering::Relaxed);
            }
            Err(TrySendError::Disconnected(_)) => {}
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    /// Tear down all subscribers. Used by `shutdown` for test isolation.
    pub fn clear(&self) {
        let ids: Vec<u64> = self.subscribers.read().keys().copied().collect();
        for id in ids {
            self.unsubscribe(SubscriberId(id));
        }
    }
}

static BUS: Lazy<EventBus> = Lazy::new(EventBus::new);

/// The global event bus.
pub fn bus() -> &'static EventBus {
    &BUS
}

/// Shorthand for publishing on the global bus.
pub fn emit(category: EventCategory, severity: EventSeverity, payload: serde_json::Value) {
    bus().publish(category, severity, payload);
}

/// Emit a structured error event. Cancellation is deliberately excluded;
/// it is reported through results, not the error channel.
pub fn emit_error(err: &crate::error::RuntimeError, component: Option<u64>, operation: &str) {
    if err.is_cancellation() {
        return;
    }
    emit(
        EventCategory::Error,
        EventSeverity::Error,
        serde_json::json!({
            "code": err.code(),
            "kind": err.kind(),
            "category": "error",
            "message": err.to_string(),
            "component_handle": component,
            "operation": operation,
        }),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn subscriber_receives_matching_categories_only() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();

        let id = bus.subscribe(EventCategory::Inference.bit(), move |e| {
            seen_clone.lock().unwrap().push(e.category);
        });

        bus.publish(
            EventCategory::Lifecycle,
            EventSeverity::Info,
            serde_json::json!({"kind": "state"}),
        );
        bus.publish(
            EventCategory::Inference,
            EventSeverity::Info,
            serde_json::json!({"kind": "start"}),
        );

        // Unsubscribe joins the dispatch thread, flushing the queue.
        bus.unsubscribe(id);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.as_slice(), &[EventCategory::Inference]);
    }

    #[test]
    fn events_arrive_in_producer_order() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();

        let id = bus.subscribe(ALL_CATEGORIES, move |e| {
            seen_clone
                .lock()
                .unwrap()
                .push(e.payload["seq"].as_u64().unwrap());
        });

        for seq in 0..50u64 {
            bus.publish(
                EventCategory::Inference,
                EventSeverity::Info,
                serde_json::json!({"seq": seq}),
            );
        }
        bus.unsubscribe(id);

        let seen = seen.lock().unwrap();
        let expected: Vec<u64> = (0..50).collect();
        assert_eq!(seen.as_slice(), expected.as_slice());
    }

    #[test]
    fn overflow_drops_and_reports() {
        let bus = EventBus::new();
        let gate = Arc::new(Mutex::new(()));
        let seen = Arc::new(Mutex::new(Vec::new()));

        let blocker = gate.lock().unwrap();
        let gate_clone = gate.clone();
        let seen_clone = seen.clone();
        let id = bus.subscribe(ALL_CATEGORIES, move |e| {
            // Park the dispatch thread until the producer has overflowed.
            let _unblocked = gate_clone.lock().unwrap();
            if let Some(kind) = e.payload.get("kind").and_then(|k| k.as_str()) {
                seen_clone.lock().unwrap().push(kind.to_string());
            }
        });

        // First event occupies the callback; the rest pile into the queue.
        for _ in 0..(QUEUE_CAPACITY + 50) {
            bus.publish(
                EventCategory::Inference,
                EventSeverity::Debug,
                serde_json::json!({"kind": "token"}),
            );
        }
        drop(blocker);

        // Once the queue has drained enough, the next publish is preceded by
        // the dropped_events report.
        for _ in 0..20 {
            std::thread::sleep(Duration::from_millis(10));
            bus.publish(
                EventCategory::Inference,
                EventSeverity::Debug,
                serde_json::json!({"kind": "token"}),
            );
        }
        bus.unsubscribe(id);

        let seen = seen.lock().unwrap();
        assert!(
            seen.iter().any(|k| k == "dropped_events"),
            "expected a dropped_events report, got {seen:?}"
        );
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicU64::new(0));
        let count_clone = count.clone();
        let id = bus.subscribe(ALL_CATEGORIES, move |_| {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });

        bus.publish(
            EventCategory::Inference,
            EventSeverity::Info,
            serde_json::json!({}),
        );
        bus.unsubscribe(id);
        let after_unsubscribe = count.load(Ordering::SeqCst);

        bus.publish(
            EventCategory::Inference,
            EventSeverity::Info,
            serde_json::json!({}),
        );
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(count.load(Ordering::SeqCst), after_unsubscribe);
    }
}
