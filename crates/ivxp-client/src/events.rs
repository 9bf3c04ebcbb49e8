//! Typed in-process event bus.
//!
//! The client emits an [`Event`] at each observable point of an order's
//! life (`order.quoted`, `payment.sent`, ...). Handlers run synchronously
//! in registration order; a panicking handler is caught and logged so it
//! can neither starve later handlers nor fail the emitting operation.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::fmt::Display;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use ivxp_types::timestamp::Timestamp;

/// Event kinds observable on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    #[serde(rename = "order.quoted")]
    OrderQuoted,
    #[serde(rename = "order.paid")]
    OrderPaid,
    #[serde(rename = "order.status_changed")]
    OrderStatusChanged,
    #[serde(rename = "order.delivered")]
    OrderDelivered,
    #[serde(rename = "order.confirmed")]
    OrderConfirmed,
    #[serde(rename = "payment.sent")]
    PaymentSent,
    #[serde(rename = "payment.confirmed")]
    PaymentConfirmed,
    #[serde(rename = "delivery.received")]
    DeliveryReceived,
    #[serde(rename = "delivery.rejected")]
    DeliveryRejected,
    #[serde(rename = "sse_fallback")]
    SseFallback,
    #[serde(rename = "error")]
    Error,
}

impl Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = serde_json::to_string(self).expect("EventType serialization");
        write!(f, "{}", s.trim_matches('"'))
    }
}

/// One emitted event.
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    /// Monotonically increasing per-emitter id.
    pub id: u64,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub payload: serde_json::Value,
    pub received_at: Timestamp,
}

/// Identifies a registered handler for [`EventEmitter::off`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandlerId(u64);

type Handler = Arc<dyn Fn(&Event) + Send + Sync>;

#[derive(Default)]
struct Registry {
    handlers: HashMap<EventType, Vec<(HandlerId, Handler)>>,
}

/// Typed, failure-isolated event bus. Cheap to clone; clones share state.
#[derive(Clone, Default)]
pub struct EventEmitter {
    registry: Arc<Mutex<Registry>>,
    next_handler_id: Arc<AtomicU64>,
    next_event_id: Arc<AtomicU64>,
}

impl EventEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler; returns the id used to detach it.
    pub fn on<F>(&self, event_type: EventType, handler: F) -> HandlerId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let id = HandlerId(self.next_handler_id.fetch_add(1, Ordering::Relaxed));
        let mut registry = self.registry.lock().expect("event registry lock");
        registry
            .handlers
            .entry(event_type)
            .or_default()
            .push((id, Arc::new(handler)));
        id
    }

    /// Detach a handler. A no-op for an unknown id; removing the last
    /// handler of an event reclaims the entry.
    pub fn off(&self, event_type: EventType, id: HandlerId) {
        let mut registry = self.registry.lock().expect("event registry lock");
        if let Some(handlers) = registry.handlers.get_mut(&event_type) {
            handlers.retain(|(handler_id, _)| *handler_id != id);
            if handlers.is_empty() {
                registry.handlers.remove(&event_type);
            }
        }
    }

    /// Emit an event to all handlers registered for its type, in
    /// registration order. Handler panics are logged and swallowed.
    pub fn emit(&self, event_type: EventType, payload: serde_json::Value) {
        let event = Event {
            id: self.next_event_id.fetch_add(1, Ordering::Relaxed),
            event_type,
            payload,
            received_at: Timestamp::now(),
        };
        // Clone the handler list out so a handler can call on/off without
        // deadlocking.
        let handlers: Vec<Handler> = {
            let registry = self.registry.lock().expect("event registry lock");
            registry
                .handlers
                .get(&event_type)
                .map(|handlers| handlers.iter().map(|(_, h)| Arc::clone(h)).collect())
                .unwrap_or_default()
        };
        for handler in handlers {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| handler(&event))) {
                let detail = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "non-string panic".to_string());
                tracing::warn!(event = %event_type, %detail, "Event handler panicked");
            }
        }
    }

    /// Number of handlers currently registered for an event type.
    pub fn handler_count(&self, event_type: EventType) -> usize {
        let registry = self.registry.lock().expect("event registry lock");
        registry
            .handlers
            .get(&event_type)
            .map(Vec::len)
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_handlers_run_in_registration_order() {
        let emitter = EventEmitter::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for tag in ["first", "second", "third"] {
            let seen = Arc::clone(&seen);
            emitter.on(EventType::OrderQuoted, move |_| {
                seen.lock().unwrap().push(tag);
            });
        }
        emitter.emit(EventType::OrderQuoted, json!({}));
        assert_eq!(*seen.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_panicking_handler_does_not_stop_later_ones() {
        let emitter = EventEmitter::new();
        let count = Arc::new(AtomicUsize::new(0));
        emitter.on(EventType::Error, |_| panic!("handler bug"));
        {
            let count = Arc::clone(&count);
            emitter.on(EventType::Error, move |_| {
                count.fetch_add(1, Ordering::SeqCst);
            });
        }
        // Must not propagate to the emitter's caller.
        emitter.emit(EventType::Error, json!({}));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_off_is_noop_for_unknown_and_reclaims_entry() {
        let emitter = EventEmitter::new();
        let id = emitter.on(EventType::PaymentSent, |_| {});
        assert_eq!(emitter.handler_count(EventType::PaymentSent), 1);

        emitter.off(EventType::PaymentSent, id);
        assert_eq!(emitter.handler_count(EventType::PaymentSent), 0);

        // Detaching again, or detaching from an empty event, is fine.
        emitter.off(EventType::PaymentSent, id);
        emitter.off(EventType::OrderPaid, id);
    }

    #[test]
    fn test_event_ids_are_monotonic() {
        let emitter = EventEmitter::new();
        let ids = Arc::new(Mutex::new(Vec::new()));
        {
            let ids = Arc::clone(&ids);
            emitter.on(EventType::OrderStatusChanged, move |event| {
                ids.lock().unwrap().push(event.id);
            });
        }
        for _ in 0..3 {
            emitter.emit(EventType::OrderStatusChanged, json!({}));
        }
        let ids = ids.lock().unwrap();
        assert!(ids.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_wire_names() {
        assert_eq!(EventType::OrderQuoted.to_string(), "order.quoted");
        assert_eq!(EventType::SseFallback.to_string(), "sse_fallback");
        assert_eq!(EventType::DeliveryRejected.to_string(), "delivery.rejected");
    }
}
