//! Subscriber registries for inbound events and connection-state changes.

use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

type Handler<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Identifies one registration. Two `on` calls with the same closure yield
/// two ids and two independent subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Disposer returned by `on`-style registrations.
///
/// Dropping it leaves the handler registered; call [`unsubscribe`](Self::unsubscribe).
#[must_use = "the handler stays registered until unsubscribe() is called"]
pub struct Subscription {
    id: SubscriptionId,
    remove: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Remove exactly this handler. Other handlers are unaffected.
    pub fn unsubscribe(mut self) {
        if let Some(remove) = self.remove.take() {
            remove();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // A handler panicking never happens under the lock, so the data is intact.
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Run one handler, containing a panic so siblings still run.
/// Returns `false` if the handler panicked.
fn invoke_isolated<T>(label: &str, handler: &Handler<T>, payload: &T) -> bool {
    match panic::catch_unwind(AssertUnwindSafe(|| handler(payload))) {
        Ok(()) => true,
        Err(cause) => {
            let message = cause
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| cause.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            crate::log_error!("Handler for '{}' panicked: {}", label, message);
            false
        }
    }
}

struct RegistryState<T> {
    next_id: u64,
    handlers: HashMap<String, Vec<(SubscriptionId, Handler<T>)>>,
}

/// Maps event types to independently registered handlers.
pub struct EventRegistry<T> {
    inner: Arc<Mutex<RegistryState<T>>>,
}

impl<T> Clone for EventRegistry<T> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

impl<T> Default for EventRegistry<T> {
    fn default() -> Self {
        Self {
            inner: Arc::new(Mutex::new(RegistryState {
                next_id: 0,
                handlers: HashMap::new(),
            })),
        }
    }
}

impl<T: 'static> EventRegistry<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(
        &self,
        event_type: &str,
        handler: impl Fn(&T) + Send + Sync + 'static,
    ) -> Subscription {
        let id = {
            let mut state = lock(&self.inner);
            let id = SubscriptionId(state.next_id);
            state.next_id += 1;
            state
                .handlers
                .entry(event_type.to_string())
                .or_default()
                .push((id, Arc::new(handler)));
            id
        };

        let weak: Weak<Mutex<RegistryState<T>>> = Arc::downgrade(&self.inner);
        let event_type = event_type.to_string();
        Subscription {
            id,
            remove: Some(Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    remove_handler(&inner, &event_type, Some(id));
                }
            })),
        }
    }

    /// Remove one handler, or every handler for `event_type` when `id` is
    /// `None`. Returns how many were removed.
    pub fn off(&self, event_type: &str, id: Option<SubscriptionId>) -> usize {
        remove_handler(&self.inner, event_type, id)
    }

    /// Invoke every handler registered for `event_type`.
    ///
    /// Handlers run outside the lock, so they may subscribe or unsubscribe
    /// while being dispatched. Returns the number of handlers that completed
    /// without panicking.
    pub(crate) fn emit(&self, event_type: &str, payload: &T) -> usize {
        let handlers: Vec<Handler<T>> = lock(&self.inner)
            .handlers
            .get(event_type)
            .map(|list| list.iter().map(|(_, h)| h.clone()).collect())
            .unwrap_or_default();

        handlers
            .iter()
            .filter(|handler| invoke_isolated(event_type, handler, payload))
            .count()
    }

    pub fn handler_count(&self, event_type: &str) -> usize {
        lock(&self.inner)
            .handlers
            .get(event_type)
            .map_or(0, Vec::len)
    }
}

fn remove_handler<T>(
    inner: &Mutex<RegistryState<T>>,
    event_type: &str,
    id: Option<SubscriptionId>,
) -> usize {
    let mut state = lock(inner);
    let Some(list) = state.handlers.get_mut(event_type) else {
        return 0;
    };
    let before = list.len();
    match id {
        Some(id) => list.retain(|(existing, _)| *existing != id),
        None => list.clear(),
    }
    let removed = before - list.len();
    if list.is_empty() {
        state.handlers.remove(event_type);
    }
    removed
}

const STATE_KEY: &str = "connection-state";

/// Listeners notified on every connection-state transition.
pub struct StateObservers<T> {
    registry: EventRegistry<T>,
}

impl<T> Clone for StateObservers<T> {
    fn clone(&self) -> Self {
        Self { registry: self.registry.clone() }
    }
}

impl<T> Default for StateObservers<T> {
    fn default() -> Self {
        Self { registry: EventRegistry::default() }
    }
}

impl<T: 'static> StateObservers<T> {
    pub fn subscribe(&self, listener: impl Fn(&T) + Send + Sync + 'static) -> Subscription {
        self.registry.on(STATE_KEY, listener)
    }

    pub(crate) fn notify(&self, state: &T) -> usize {
        self.registry.emit(STATE_KEY, state)
    }

    pub fn len(&self) -> usize {
        self.registry.handler_count(STATE_KEY)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counter() -> (Arc<AtomicUsize>, impl Fn(&u32) + Send + Sync + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        (count, move |_: &u32| {
            c.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn unsubscribe_removes_only_that_handler() {
        let registry = EventRegistry::<u32>::new();
        let (a_count, a) = counter();
        let (b_count, b) = counter();
        let sub_a = registry.on("stock.adjusted", a);
        let _sub_b = registry.on("stock.adjusted", b);

        registry.emit("stock.adjusted", &1);
        sub_a.unsubscribe();
        registry.emit("stock.adjusted", &2);

        assert_eq!(a_count.load(Ordering::SeqCst), 1);
        assert_eq!(b_count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn off_without_id_clears_the_event_type() {
        let registry = EventRegistry::<u32>::new();
        let (count, h) = counter();
        let (other_count, other) = counter();
        let _s1 = registry.on("a", h);
        let _s2 = registry.on("b", other);

        assert_eq!(registry.off("a", None), 1);
        registry.emit("a", &0);
        registry.emit("b", &0);

        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(other_count.load(Ordering::SeqCst), 1);
        assert_eq!(registry.handler_count("a"), 0);
    }

    #[test]
    fn off_by_id_matches_subscription() {
        let registry = EventRegistry::<u32>::new();
        let (count, h) = counter();
        let sub = registry.on("a", h);

        assert_eq!(registry.off("a", Some(sub.id())), 1);
        assert_eq!(registry.off("a", Some(sub.id())), 0);
        registry.emit("a", &0);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn same_closure_registered_twice_is_two_subscriptions() {
        let registry = EventRegistry::<u32>::new();
        let count = Arc::new(AtomicUsize::new(0));
        let handler = {
            let count = count.clone();
            Arc::new(move |_: &u32| {
                count.fetch_add(1, Ordering::SeqCst);
            })
        };
        let h1 = handler.clone();
        let h2 = handler.clone();
        let first = registry.on("a", move |v| h1(v));
        let second = registry.on("a", move |v| h2(v));
        assert_ne!(first.id(), second.id());

        registry.emit("a", &0);
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn panicking_handler_does_not_block_siblings() {
        let registry = EventRegistry::<u32>::new();
        let (before_count, before) = counter();
        let (after_count, after) = counter();
        let _s1 = registry.on("a", before);
        let _s2 = registry.on("a", |_| panic!("boom"));
        let _s3 = registry.on("a", after);

        let completed = registry.emit("a", &7);

        assert_eq!(completed, 2);
        assert_eq!(before_count.load(Ordering::SeqCst), 1);
        assert_eq!(after_count.load(Ordering::SeqCst), 1);

        // The registry stays usable after a fault.
        registry.emit("a", &8);
        assert_eq!(after_count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn handler_may_unsubscribe_itself_during_dispatch() {
        let registry = EventRegistry::<u32>::new();
        let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));
        let (count, _) = counter();
        let c = count.clone();
        let slot_for_handler = slot.clone();
        let sub = registry.on("a", move |_| {
            c.fetch_add(1, Ordering::SeqCst);
            if let Some(sub) = slot_for_handler.lock().unwrap().take() {
                sub.unsubscribe();
            }
        });
        *slot.lock().unwrap() = Some(sub);

        registry.emit("a", &0);
        registry.emit("a", &0);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unsubscribe_after_registry_dropped_is_harmless() {
        let registry = EventRegistry::<u32>::new();
        let sub = registry.on("a", |_| {});
        drop(registry);
        sub.unsubscribe();
    }

    #[test]
    fn observers_fan_out_every_notification() {
        let observers = StateObservers::<u32>::default();
        let (count, h) = counter();
        let sub = observers.subscribe(h);

        observers.notify(&1);
        observers.notify(&1);
        assert_eq!(count.load(Ordering::SeqCst), 2);

        sub.unsubscribe();
        assert!(observers.is_empty());
    }
}
