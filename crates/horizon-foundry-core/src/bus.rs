//! Completion bus: a small pub/sub mechanism keyed by `(context, event)`.
//!
//! The engine delivers per-task completion notifications through this bus.
//! Every live task owns one event name of the form `"<ctx>_<event>_<id>"`,
//! produced by [`completion_event_name`]; because ids are unique among live
//! tasks, concurrent completions never share a name. After a task's
//! subscribers have been notified, the whole event is unsubscribed so a
//! later task that reacquires the same id starts with a clean slate.
//!
//! Subscribers are invoked in subscription order. Notifying an event with
//! no subscribers is a no-op.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use slotmap::{SlotMap, new_key_type};

new_key_type! {
    /// A unique identifier for a bus subscription.
    ///
    /// Returned by [`CompletionBus::subscribe`]; pass it back to
    /// [`CompletionBus::unsubscribe`] to remove a single subscriber.
    pub struct SubscriptionId;
}

/// The type-erased value delivered to subscribers.
///
/// Task results are typed per submission site; by the time they cross the
/// bus they are erased to `Any` and re-typed on the subscriber side.
pub type Payload = Arc<dyn Any + Send + Sync>;

type Subscriber = Arc<dyn Fn(&Payload) + Send + Sync>;

/// Subscribers of a single event, in subscription order.
#[derive(Default)]
struct EventEntry {
    order: Vec<SubscriptionId>,
    subscribers: SlotMap<SubscriptionId, Subscriber>,
}

/// A thread-safe pub/sub bus keyed by `(context, event)`.
///
/// Multiple subscribers per key are allowed; event names may be arbitrary
/// printable strings.
pub struct CompletionBus {
    contexts: Mutex<HashMap<String, HashMap<String, EventEntry>>>,
}

impl CompletionBus {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self {
            contexts: Mutex::new(HashMap::new()),
        }
    }

    /// Add a subscriber for `(context, event)`.
    pub fn subscribe<F>(&self, context: &str, event: &str, callback: F) -> SubscriptionId
    where
        F: Fn(&Payload) + Send + Sync + 'static,
    {
        let mut contexts = self.contexts.lock();
        let entry = contexts
            .entry(context.to_owned())
            .or_default()
            .entry(event.to_owned())
            .or_default();
        let id = entry.subscribers.insert(Arc::new(callback));
        entry.order.push(id);
        tracing::trace!(target: crate::logging::targets::BUS, context, event, "subscriber added");
        id
    }

    /// Remove a single subscriber. Returns whether it was present.
    pub fn unsubscribe(&self, context: &str, event: &str, id: SubscriptionId) -> bool {
        let mut contexts = self.contexts.lock();
        let Some(events) = contexts.get_mut(context) else {
            return false;
        };
        let Some(entry) = events.get_mut(event) else {
            return false;
        };
        let removed = entry.subscribers.remove(id).is_some();
        if removed {
            entry.order.retain(|existing| *existing != id);
        }
        if entry.subscribers.is_empty() {
            events.remove(event);
        }
        if events.is_empty() {
            contexts.remove(context);
        }
        removed
    }

    /// Remove every subscriber of `(context, event)`.
    pub fn unsubscribe_event(&self, context: &str, event: &str) {
        let mut contexts = self.contexts.lock();
        if let Some(events) = contexts.get_mut(context) {
            events.remove(event);
            if events.is_empty() {
                contexts.remove(context);
            }
        }
    }

    /// The number of subscribers currently registered for `(context, event)`.
    pub fn subscriber_count(&self, context: &str, event: &str) -> usize {
        let contexts = self.contexts.lock();
        contexts
            .get(context)
            .and_then(|events| events.get(event))
            .map_or(0, |entry| entry.subscribers.len())
    }

    /// Invoke every subscriber of `(context, event)` with `payload`, in
    /// subscription order.
    ///
    /// Subscribers run outside the bus lock, so a subscriber may itself
    /// subscribe or unsubscribe.
    pub fn notify(&self, context: &str, event: &str, payload: &Payload) {
        let callbacks: Vec<Subscriber> = {
            let contexts = self.contexts.lock();
            let Some(entry) = contexts.get(context).and_then(|events| events.get(event)) else {
                return;
            };
            entry
                .order
                .iter()
                .filter_map(|id| entry.subscribers.get(*id).cloned())
                .collect()
        };

        tracing::trace!(
            target: crate::logging::targets::BUS,
            context,
            event,
            subscribers = callbacks.len(),
            "notifying"
        );
        for callback in callbacks {
            callback(payload);
        }
    }
}

impl Default for CompletionBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Build the event name a task's completion is published under.
///
/// This format is the only contract between the engine and the bus; no
/// other code assembles or parses these names.
pub fn completion_event_name(context: &str, event: &str, id: crate::ids::TaskId) -> String {
    format!("{context}_{event}_{id}")
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn payload_of(value: i32) -> Payload {
        Arc::new(value)
    }

    #[test]
    fn notify_delivers_in_subscription_order() {
        let bus = CompletionBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for tag in 0..3 {
            let seen = seen.clone();
            bus.subscribe("ctx", "evt", move |_| seen.lock().push(tag));
        }

        bus.notify("ctx", "evt", &payload_of(0));
        assert_eq!(*seen.lock(), vec![0, 1, 2]);
    }

    #[test]
    fn notify_unknown_event_is_noop() {
        let bus = CompletionBus::new();
        bus.notify("ctx", "missing", &payload_of(0));
        assert_eq!(bus.subscriber_count("ctx", "missing"), 0);
    }

    #[test]
    fn payload_roundtrips_through_any() {
        let bus = CompletionBus::new();
        let observed = Arc::new(AtomicUsize::new(0));
        let observed_clone = observed.clone();

        bus.subscribe("ctx", "evt", move |payload| {
            let value = payload.downcast_ref::<i32>().copied().unwrap_or(-1);
            observed_clone.store(value as usize, Ordering::SeqCst);
        });
        bus.notify("ctx", "evt", &payload_of(42));

        assert_eq!(observed.load(Ordering::SeqCst), 42);
    }

    #[test]
    fn unsubscribe_single_subscriber() {
        let bus = CompletionBus::new();
        let counter = Arc::new(AtomicUsize::new(0));

        let counter_a = counter.clone();
        let keep = bus.subscribe("ctx", "evt", move |_| {
            counter_a.fetch_add(1, Ordering::SeqCst);
        });
        let counter_b = counter.clone();
        let drop_me = bus.subscribe("ctx", "evt", move |_| {
            counter_b.fetch_add(10, Ordering::SeqCst);
        });

        assert!(bus.unsubscribe("ctx", "evt", drop_me));
        assert!(!bus.unsubscribe("ctx", "evt", drop_me));
        bus.notify("ctx", "evt", &payload_of(0));

        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(bus.subscriber_count("ctx", "evt"), 1);
        let _ = keep;
    }

    #[test]
    fn unsubscribe_event_clears_all() {
        let bus = CompletionBus::new();
        bus.subscribe("ctx", "evt", |_| {});
        bus.subscribe("ctx", "evt", |_| {});
        assert_eq!(bus.subscriber_count("ctx", "evt"), 2);

        bus.unsubscribe_event("ctx", "evt");
        assert_eq!(bus.subscriber_count("ctx", "evt"), 0);
    }

    #[test]
    fn event_name_format() {
        let mut ids = crate::ids::IdAllocator::new(8);
        let id = ids.acquire().unwrap();
        assert_eq!(completion_event_name("foundry", "on_complete", id), "foundry_on_complete_0");
    }

    #[test]
    fn subscriber_may_resubscribe_during_notify() {
        let bus = Arc::new(CompletionBus::new());
        let bus_clone = bus.clone();
        bus.subscribe("ctx", "evt", move |_| {
            bus_clone.subscribe("ctx", "other", |_| {});
        });

        bus.notify("ctx", "evt", &payload_of(0));
        assert_eq!(bus.subscriber_count("ctx", "other"), 1);
    }
}
