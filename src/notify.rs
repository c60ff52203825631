//! Typed publish/subscribe bus for state-change announcements.
//!
//! Services publish an [`Event`] after every committed mutation; observers
//! (the CLI, or any view layer) subscribe per [`EventKind`] and re-render.
//!
//! # Invariants
//!
//! 1. Handlers run synchronously inside [`EventBus::publish`], in subscription
//!    order, before `publish` returns.
//! 2. The registry lock is released before handlers run, so a handler may read
//!    services, subscribe, or unsubscribe without deadlocking.
//! 3. Dropping a [`Subscription`] removes its handler before the next publish.
//! 4. There is no cycle detection: a handler that publishes the kind it is
//!    subscribed to will recurse.
//! 5. Delivery order matches commit order only per thread. Services publish
//!    after releasing their own state lock, so on a multi-threaded runtime a
//!    page committed just before a reset may be announced after the
//!    `FeedCleared` that follows it. Handlers should re-read the service
//!    snapshot rather than replay events.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

/// A state change announced on the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A page was appended; `total_count` is the new cache length.
    FeedExtended { total_count: usize },
    /// The photo at `index` was replaced after a confirmed like/unlike.
    ItemUpdated { index: usize, id: String },
    /// The cache was emptied (logout).
    FeedCleared,
    /// A new avatar URL was fetched.
    AvatarChanged { url: String },
    /// A new profile was fetched.
    ProfileChanged,
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::FeedExtended { .. } | Event::ItemUpdated { .. } | Event::FeedCleared => {
                EventKind::FeedChanged
            }
            Event::AvatarChanged { .. } => EventKind::AvatarChanged,
            Event::ProfileChanged => EventKind::ProfileChanged,
        }
    }
}

/// Subscription key; each kind groups related [`Event`] variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    FeedChanged,
    AvatarChanged,
    ProfileChanged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Handler = Arc<dyn Fn(&Event) + Send + Sync>;

struct Entry {
    id: SubscriptionId,
    kind: EventKind,
    handler: Handler,
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    entries: Vec<Entry>,
}

impl Registry {
    fn remove(&mut self, id: SubscriptionId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.id != id);
        self.entries.len() != before
    }
}

/// Shared event bus. Cloning yields another handle to the same registry.
#[derive(Clone, Default)]
pub struct EventBus {
    registry: Arc<Mutex<Registry>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register `handler` for every event of `kind`.
    ///
    /// The handler stays registered until the returned guard is dropped or
    /// [`EventBus::unsubscribe`] is called with its id.
    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> Subscription
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let mut registry = self.registry();
        let id = SubscriptionId(registry.next_id);
        registry.next_id += 1;
        registry.entries.push(Entry {
            id,
            kind,
            handler: Arc::new(handler),
        });
        tracing::trace!(?kind, id = id.0, "Subscribed");

        Subscription {
            id,
            registry: Arc::downgrade(&self.registry),
        }
    }

    /// Remove a handler. Returns `false` if it was already gone.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.registry().remove(id)
    }

    /// Deliver `event` to every handler subscribed to its kind.
    ///
    /// Events from different threads are not ordered against each other;
    /// see invariant 5 in the module docs.
    pub fn publish(&self, event: Event) {
        let kind = event.kind();
        let handlers: Vec<Handler> = self
            .registry()
            .entries
            .iter()
            .filter(|e| e.kind == kind)
            .map(|e| Arc::clone(&e.handler))
            .collect();

        tracing::trace!(?event, handlers = handlers.len(), "Publishing");
        for handler in handlers {
            handler(&event);
        }
    }

    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        self.registry()
            .entries
            .iter()
            .filter(|e| e.kind == kind)
            .count()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.registry().entries.len())
            .finish()
    }
}

/// RAII guard for a registered handler; unsubscribes on drop.
#[must_use = "dropping a Subscription unsubscribes its handler immediately"]
pub struct Subscription {
    id: SubscriptionId,
    registry: Weak<Mutex<Registry>>,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Explicit teardown; equivalent to dropping the guard.
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(self.id);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Subscription").field(&self.id.0).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn recorder() -> (Arc<Mutex<Vec<String>>>, impl Fn(&str) -> Handler) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let make = {
            let log = Arc::clone(&log);
            move |tag: &str| -> Handler {
                let log = Arc::clone(&log);
                let tag = tag.to_string();
                Arc::new(move |event: &Event| {
                    log.lock().unwrap().push(format!("{tag}:{event:?}"));
                })
            }
        };
        (log, make)
    }

    #[test]
    fn test_publish_in_subscription_order() {
        let bus = EventBus::new();
        let (log, make) = recorder();
        let a = make("a");
        let b = make("b");
        let _sa = bus.subscribe(EventKind::FeedChanged, move |e| a(e));
        let _sb = bus.subscribe(EventKind::FeedChanged, move |e| b(e));

        bus.publish(Event::FeedCleared);

        assert_eq!(
            *log.lock().unwrap(),
            vec!["a:FeedCleared".to_string(), "b:FeedCleared".to_string()]
        );
    }

    #[test]
    fn test_publish_filters_by_kind() {
        let bus = EventBus::new();
        let (log, make) = recorder();
        let feed = make("feed");
        let _s = bus.subscribe(EventKind::FeedChanged, move |e| feed(e));

        bus.publish(Event::AvatarChanged {
            url: "https://example.com/a.png".into(),
        });
        bus.publish(Event::ProfileChanged);

        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn test_drop_unsubscribes() {
        let bus = EventBus::new();
        let (log, make) = recorder();
        let h = make("h");
        let sub = bus.subscribe(EventKind::ProfileChanged, move |e| h(e));
        assert_eq!(bus.subscriber_count(EventKind::ProfileChanged), 1);

        drop(sub);
        bus.publish(Event::ProfileChanged);

        assert_eq!(bus.subscriber_count(EventKind::ProfileChanged), 0);
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn test_unsubscribe_by_id() {
        let bus = EventBus::new();
        let sub = bus.subscribe(EventKind::AvatarChanged, |_| {});
        let id = sub.id();

        assert!(bus.unsubscribe(id));
        assert!(!bus.unsubscribe(id));
        // Guard drop after explicit removal is a no-op
        sub.unsubscribe();
        assert_eq!(bus.subscriber_count(EventKind::AvatarChanged), 0);
    }

    #[test]
    fn test_handler_may_subscribe_during_publish() {
        let bus = EventBus::new();
        let inner_bus = bus.clone();
        let spawned = Arc::new(Mutex::new(Vec::new()));
        let spawned_in = Arc::clone(&spawned);
        let _s = bus.subscribe(EventKind::FeedChanged, move |_| {
            let sub = inner_bus.subscribe(EventKind::ProfileChanged, |_| {});
            spawned_in.lock().unwrap().push(sub);
        });

        bus.publish(Event::FeedCleared);

        assert_eq!(bus.subscriber_count(EventKind::ProfileChanged), 1);
        assert_eq!(spawned.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_guard_outliving_bus_is_harmless() {
        let bus = EventBus::new();
        let sub = bus.subscribe(EventKind::FeedChanged, |_| {});
        drop(bus);
        drop(sub);
    }

    #[test]
    fn test_event_kinds() {
        assert_eq!(
            Event::FeedExtended { total_count: 3 }.kind(),
            EventKind::FeedChanged
        );
        assert_eq!(
            Event::ItemUpdated {
                index: 0,
                id: "x".into()
            }
            .kind(),
            EventKind::FeedChanged
        );
        assert_eq!(Event::FeedCleared.kind(), EventKind::FeedChanged);
        assert_eq!(
            Event::AvatarChanged { url: String::new() }.kind(),
            EventKind::AvatarChanged
        );
        assert_eq!(Event::ProfileChanged.kind(), EventKind::ProfileChanged);
    }
}
