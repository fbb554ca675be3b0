use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};

use super::controller::FormId;
use super::tree::NodeId;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum FormSignal {
    SubmitForm,
    ScopeUpdate,
    FieldCreated,
    FieldUpdate,
    FieldDestroyed,
}

/// A broadcast record. `scope` is the node the broadcast originated from and
/// `field` the child name it concerns, if any.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FormEvent {
    pub signal: FormSignal,
    pub scope: NodeId,
    pub field: Option<String>,
}

impl FormEvent {
    pub fn new(signal: FormSignal, scope: NodeId, field: Option<&str>) -> Self {
        Self {
            signal,
            scope,
            field: field.map(str::to_owned),
        }
    }

    /// True for scope-wide events and for events naming `name`.
    pub fn concerns(&self, name: &str) -> bool {
        self.field.as_deref().is_none_or(|field| field == name)
    }
}

pub type Subscriber = Arc<dyn Fn(&FormEvent) + Send + Sync>;

type SubscriberList = RwLock<Vec<Subscriber>>;

/// Fan-out channel shared by every node of one form.
///
/// Delivery is synchronous, in registration order, over a snapshot of the
/// subscriber list; subscribers may listen or unsubscribe while an event is
/// being delivered. Nothing is buffered for subscribers that arrive later.
#[derive(Clone)]
pub struct EventBus {
    id: FormId,
    subscribers: Arc<SubscriberList>,
}

impl EventBus {
    pub fn new(id: FormId) -> Self {
        Self {
            id,
            subscribers: Arc::new(RwLock::new(Vec::new())),
        }
    }

    pub fn id(&self) -> FormId {
        self.id
    }

    /// Registers `subscriber`. Registering the same `Arc` twice keeps a single
    /// entry; dropping any subscription for it removes that entry.
    pub fn listen(&self, subscriber: Subscriber) -> Subscription {
        {
            let mut subscribers = write_list(&self.subscribers);
            if !subscribers
                .iter()
                .any(|existing| Arc::ptr_eq(existing, &subscriber))
            {
                subscribers.push(subscriber.clone());
            }
        }
        Subscription {
            list: Arc::downgrade(&self.subscribers),
            subscriber,
            detached: false,
        }
    }

    pub fn subscribe(&self, f: impl Fn(&FormEvent) + Send + Sync + 'static) -> Subscription {
        self.listen(Arc::new(f))
    }

    pub fn trigger(&self, event: &FormEvent) {
        let snapshot = read_list(&self.subscribers).clone();
        for subscriber in snapshot {
            if catch_unwind(AssertUnwindSafe(|| subscriber(event))).is_err() {
                tracing::error!(
                    form = %self.id,
                    signal = ?event.signal,
                    field = ?event.field,
                    "form event subscriber panicked; continuing delivery"
                );
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        read_list(&self.subscribers).len()
    }

    /// Non-owning reference for subscribers that must not keep the bus
    /// alive from inside its own list.
    pub fn downgrade(&self) -> WeakEventBus {
        WeakEventBus {
            id: self.id,
            subscribers: Arc::downgrade(&self.subscribers),
        }
    }
}

#[derive(Clone)]
pub struct WeakEventBus {
    id: FormId,
    subscribers: Weak<SubscriberList>,
}

impl WeakEventBus {
    pub fn upgrade(&self) -> Option<EventBus> {
        Some(EventBus {
            id: self.id,
            subscribers: self.subscribers.upgrade()?,
        })
    }
}

/// Registration handle returned by [`EventBus::listen`]. Dropping it
/// unsubscribes unless it was [detached](Subscription::detach).
///
/// Subscriptions for the same `Arc` share one list entry. Dropping or
/// unsubscribing any of them removes that entry for all of them, so hold a
/// single subscription per subscriber.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    list: Weak<SubscriberList>,
    subscriber: Subscriber,
    detached: bool,
}

impl Subscription {
    pub fn unsubscribe(self) {
        drop(self);
    }

    /// Keeps the subscriber registered for the lifetime of the bus.
    pub fn detach(mut self) {
        self.detached = true;
    }

    fn remove(&self) {
        let Some(list) = self.list.upgrade() else {
            return;
        };
        let mut subscribers = write_list(&list);
        if let Some(index) = subscribers
            .iter()
            .position(|existing| Arc::ptr_eq(existing, &self.subscriber))
        {
            subscribers.remove(index);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if !self.detached {
            self.remove();
        }
    }
}

fn read_list(list: &SubscriberList) -> RwLockReadGuard<'_, Vec<Subscriber>> {
    match list.read() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn write_list(list: &SubscriberList) -> RwLockWriteGuard<'_, Vec<Subscriber>> {
    match list.write() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::form::tree::ScopeTree;
    use serde_json::json;
    use std::sync::Mutex;

    fn bus_and_root() -> (EventBus, NodeId) {
        let tree = ScopeTree::new(json!({})).expect("object root");
        (tree.events().clone(), tree.root())
    }

    fn recorder(log: &Arc<Mutex<Vec<String>>>, tag: &'static str) -> Subscriber {
        let log = log.clone();
        Arc::new(move |event: &FormEvent| {
            log.lock()
                .expect("log lock")
                .push(format!("{tag}:{}", event.field.as_deref().unwrap_or("*")));
        })
    }

    #[test]
    fn delivers_in_registration_order() {
        let (bus, root) = bus_and_root();
        let log = Arc::new(Mutex::new(Vec::new()));
        let _first = bus.listen(recorder(&log, "s1"));
        let _second = bus.listen(recorder(&log, "s2"));

        bus.trigger(&FormEvent::new(FormSignal::FieldUpdate, root, Some("x")));

        assert_eq!(*log.lock().expect("log lock"), vec!["s1:x", "s2:x"]);
    }

    #[test]
    fn same_subscriber_registers_once() {
        let (bus, root) = bus_and_root();
        let log = Arc::new(Mutex::new(Vec::new()));
        let subscriber = recorder(&log, "s");
        let first = bus.listen(subscriber.clone());
        let second = bus.listen(subscriber);
        assert_eq!(bus.subscriber_count(), 1);

        bus.trigger(&FormEvent::new(FormSignal::ScopeUpdate, root, None));
        assert_eq!(log.lock().expect("log lock").len(), 1);

        first.detach();
        second.unsubscribe();
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn duplicate_subscriptions_share_one_entry() {
        let (bus, root) = bus_and_root();
        let log = Arc::new(Mutex::new(Vec::new()));
        let subscriber = recorder(&log, "s");
        let kept = bus.listen(subscriber.clone());
        let dropped = bus.listen(subscriber);

        drop(dropped);
        assert_eq!(bus.subscriber_count(), 0);
        bus.trigger(&FormEvent::new(FormSignal::ScopeUpdate, root, None));
        assert!(log.lock().expect("log lock").is_empty());

        kept.unsubscribe();
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn weak_bus_does_not_keep_subscribers_alive() {
        let (bus, _root) = bus_and_root();
        let weak = bus.downgrade();
        assert_eq!(weak.upgrade().map(|bus| bus.id()), Some(bus.id()));

        let _noop = bus.subscribe(|_event| {});
        drop(bus);
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn dropping_subscription_unsubscribes() {
        let (bus, root) = bus_and_root();
        let log = Arc::new(Mutex::new(Vec::new()));
        {
            let _sub = bus.listen(recorder(&log, "s"));
        }
        bus.trigger(&FormEvent::new(FormSignal::ScopeUpdate, root, None));
        assert!(log.lock().expect("log lock").is_empty());
    }

    #[test]
    fn subscriber_may_unsubscribe_during_delivery() {
        let (bus, root) = bus_and_root();
        let log = Arc::new(Mutex::new(Vec::new()));
        let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));
        let self_removing = {
            let slot = slot.clone();
            let log = log.clone();
            bus.subscribe(move |_event| {
                log.lock().expect("log lock").push("once".to_owned());
                slot.lock().expect("slot lock").take();
            })
        };
        *slot.lock().expect("slot lock") = Some(self_removing);
        let _tail = bus.listen(recorder(&log, "tail"));

        bus.trigger(&FormEvent::new(FormSignal::FieldUpdate, root, Some("a")));
        bus.trigger(&FormEvent::new(FormSignal::FieldUpdate, root, Some("b")));

        assert_eq!(
            *log.lock().expect("log lock"),
            vec!["once", "tail:a", "tail:b"]
        );
    }

    #[test]
    fn panicking_subscriber_does_not_stop_delivery() {
        let (bus, root) = bus_and_root();
        let log = Arc::new(Mutex::new(Vec::new()));
        let _boom = bus.subscribe(|_event| panic!("subscriber failure"));
        let _after = bus.listen(recorder(&log, "after"));

        bus.trigger(&FormEvent::new(FormSignal::FieldUpdate, root, Some("x")));

        assert_eq!(*log.lock().expect("log lock"), vec!["after:x"]);
    }

    #[test]
    fn late_subscribers_miss_earlier_events() {
        let (bus, root) = bus_and_root();
        bus.trigger(&FormEvent::new(FormSignal::SubmitForm, root, None));
        let log = Arc::new(Mutex::new(Vec::new()));
        let _late = bus.listen(recorder(&log, "late"));
        assert!(log.lock().expect("log lock").is_empty());
    }

    #[test]
    fn event_concerns_named_field_or_everything() {
        let (_bus, root) = bus_and_root();
        let wide = FormEvent::new(FormSignal::ScopeUpdate, root, None);
        let named = FormEvent::new(FormSignal::FieldUpdate, root, Some("email"));
        assert!(wide.concerns("anything"));
        assert!(named.concerns("email"));
        assert!(!named.concerns("password"));
    }
}
