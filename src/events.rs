//! Observer bus for preference lifecycle events.
//!
//! A fixed tagged union instead of a dynamically-keyed emitter: observers
//! match on [`SdkEvent`] variants. Dispatch is synchronous and
//! fire-and-forget; nothing is buffered for late subscribers.

use crate::types::ApiResponse;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Events published by the preference engine.
#[derive(Clone, Debug)]
pub enum SdkEvent {
    /// A remote update round trip completed; carries the whole tree.
    PreferencesUpdated(ApiResponse),
    /// A remote update failed after the triggering call already returned.
    PreferencesError(ApiResponse),
}

/// Observer callback registered with [`EventBus::subscribe`].
pub type EventObserver = Arc<dyn Fn(&SdkEvent) + Send + Sync>;

/// Handle for removing an observer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SubscriptionId(u64);

#[derive(Default)]
pub struct EventBus {
    observers: Mutex<Vec<(u64, EventObserver)>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, observer: F) -> SubscriptionId
    where
        F: Fn(&SdkEvent) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.observers.lock().push((id, Arc::new(observer)));
        SubscriptionId(id)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.observers.lock().retain(|(oid, _)| *oid != id.0);
    }

    /// Dispatch synchronously to every observer, in subscription order.
    pub fn emit(&self, event: &SdkEvent) {
        let observers: Vec<EventObserver> = self
            .observers
            .lock()
            .iter()
            .map(|(_, observer)| observer.clone())
            .collect();
        for observer in observers {
            observer(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_emit_reaches_all_observers() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let count = count.clone();
            bus.subscribe(move |_| {
                count.fetch_add(1, Ordering::SeqCst);
            });
        }

        bus.emit(&SdkEvent::PreferencesUpdated(ApiResponse::success()));
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));

        let count_clone = count.clone();
        let id = bus.subscribe(move |_| {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });

        bus.emit(&SdkEvent::PreferencesError(ApiResponse::success()));
        bus.unsubscribe(id);
        bus.emit(&SdkEvent::PreferencesError(ApiResponse::success()));

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_observers_see_variant() {
        let bus = EventBus::new();
        let saw_error = Arc::new(AtomicUsize::new(0));

        let saw_error_clone = saw_error.clone();
        bus.subscribe(move |event| {
            if matches!(event, SdkEvent::PreferencesError(_)) {
                saw_error_clone.fetch_add(1, Ordering::SeqCst);
            }
        });

        bus.emit(&SdkEvent::PreferencesUpdated(ApiResponse::success()));
        bus.emit(&SdkEvent::PreferencesError(ApiResponse::success()));
        assert_eq!(saw_error.load(Ordering::SeqCst), 1);
    }
}
