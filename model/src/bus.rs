//! Ordered, synchronous publish/subscribe for model lifecycle events.
//!
//! # Dispatch
//!
//! [`Model::publish`] takes a snapshot of the listeners registered for the
//! event's kind and invokes them in registration order on the calling thread.
//! Each registration carries a liveness flag that is checked right before its
//! callback runs, so:
//!
//! - a listener may unregister itself (or others) mid-round; removed listeners
//!   that have not run yet are skipped, everyone else runs exactly once
//! - listeners registered during a round first see the *next* publish
//! - callbacks receive `&mut Model`, so they may mutate the tree and publish
//!   nested events; those rounds complete before the outer round continues
//!
//! The first listener error aborts the round and is returned to the
//! publisher. Best-effort notifications are the caller's choice to ignore.

use crate::{
    error::Result,
    event::{Event, EventKind},
    node::NodeId,
    tree::Model,
};
use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use std::{cell::Cell, fmt, rc::Rc};
use tracing::trace;

pub type Callback = Rc<dyn Fn(&mut Model, &Event) -> Result<()>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

#[derive(Clone)]
struct Registration {
    id: ListenerId,
    owner: Option<NodeId>,
    callback: Callback,
    live: Rc<Cell<bool>>,
}

#[derive(Default)]
pub struct EventBus {
    next_id: u64,
    listeners: FxHashMap<EventKind, Vec<Registration>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback` for `kind`, optionally owned by a node.
    ///
    /// Owned listeners are dropped when their owner leaves the tree.
    pub fn on(&mut self, kind: EventKind, owner: Option<NodeId>, callback: Callback) -> ListenerId {
        self.next_id += 1;
        let id = ListenerId(self.next_id);
        self.listeners.entry(kind).or_default().push(Registration {
            id,
            owner,
            callback,
            live: Rc::new(Cell::new(true)),
        });
        id
    }

    /// Unregister a listener. Returns `false` when it was already gone.
    pub fn off(&mut self, kind: EventKind, id: ListenerId) -> bool {
        let Some(registrations) = self.listeners.get_mut(&kind) else {
            return false;
        };
        let Some(index) = registrations.iter().position(|r| r.id == id) else {
            return false;
        };
        let registration = registrations.remove(index);
        registration.live.set(false);
        true
    }

    /// Unregister every listener owned by `owner`, returning how many went away.
    pub fn off_owned_by(&mut self, owner: NodeId) -> usize {
        let mut removed = 0;
        for registrations in self.listeners.values_mut() {
            registrations.retain(|r| {
                let keep = r.owner != Some(owner);
                if !keep {
                    r.live.set(false);
                    removed += 1;
                }
                keep
            });
        }
        removed
    }

    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.listeners.get(&kind).map_or(0, Vec::len)
    }

    fn snapshot(&self, kind: EventKind) -> SmallVec<[Registration; 8]> {
        self.listeners
            .get(&kind)
            .map(|registrations| registrations.iter().cloned().collect())
            .unwrap_or_default()
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (kind, registrations) in &self.listeners {
            map.entry(kind, &registrations.len());
        }
        map.finish()
    }
}

impl Model {
    /// Register a listener on this model's bus.
    pub fn on<F>(&mut self, kind: EventKind, owner: Option<NodeId>, callback: F) -> ListenerId
    where
        F: Fn(&mut Model, &Event) -> Result<()> + 'static,
    {
        self.bus.on(kind, owner, Rc::new(callback))
    }

    pub fn off(&mut self, kind: EventKind, id: ListenerId) -> bool {
        self.bus.off(kind, id)
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Deliver `event` to every listener registered for its kind.
    pub fn publish(&mut self, event: &Event) -> Result<()> {
        let kind = event.kind();
        let snapshot = self.bus.snapshot(kind);
        trace!(?kind, listeners = snapshot.len(), "publish");

        for registration in snapshot {
            if !registration.live.get() {
                continue;
            }
            (registration.callback)(self, event)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{error::Error, source::MemorySource};
    use std::cell::RefCell;

    fn model() -> Model {
        Model::new("Root", MemorySource::new())
    }

    fn recorder() -> Rc<RefCell<Vec<&'static str>>> {
        Rc::new(RefCell::new(Vec::new()))
    }

    #[test]
    fn dispatches_in_registration_order() {
        let mut model = model();
        let log = recorder();
        for name in ["a", "b", "c"] {
            let log = log.clone();
            model.on(EventKind::EndEdit, None, move |_, _| {
                log.borrow_mut().push(name);
                Ok(())
            });
        }

        model.publish(&Event::EndEdit).unwrap();
        assert_eq!(*log.borrow(), ["a", "b", "c"]);
    }

    #[test]
    fn self_removal_does_not_skip_or_repeat_others() {
        let mut model = model();
        let log = recorder();

        let first = log.clone();
        model.on(EventKind::EndEdit, None, move |_, _| {
            first.borrow_mut().push("first");
            Ok(())
        });

        let own_id = Rc::new(Cell::new(None));
        let own = own_id.clone();
        let second = log.clone();
        let id = model.on(EventKind::EndEdit, None, move |model, _| {
            second.borrow_mut().push("second");
            if let Some(id) = own.get() {
                model.off(EventKind::EndEdit, id);
            }
            Ok(())
        });
        own_id.set(Some(id));

        let third = log.clone();
        model.on(EventKind::EndEdit, None, move |_, _| {
            third.borrow_mut().push("third");
            Ok(())
        });

        model.publish(&Event::EndEdit).unwrap();
        assert_eq!(*log.borrow(), ["first", "second", "third"]);

        log.borrow_mut().clear();
        model.publish(&Event::EndEdit).unwrap();
        assert_eq!(*log.borrow(), ["first", "third"]);
    }

    #[test]
    fn listener_removed_by_earlier_listener_is_skipped() {
        let mut model = model();
        let log = recorder();
        let victim = Rc::new(Cell::new(None));

        let target = victim.clone();
        model.on(EventKind::EndEdit, None, move |model, _| {
            if let Some(id) = target.get() {
                model.off(EventKind::EndEdit, id);
            }
            Ok(())
        });
        let l = log.clone();
        let id = model.on(EventKind::EndEdit, None, move |_, _| {
            l.borrow_mut().push("victim");
            Ok(())
        });
        victim.set(Some(id));

        model.publish(&Event::EndEdit).unwrap();
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn listeners_added_mid_round_wait_for_next_publish() {
        let mut model = model();
        let log = recorder();

        let l = log.clone();
        model.on(EventKind::EndEdit, None, move |model, _| {
            let inner = l.clone();
            model.on(EventKind::EndEdit, None, move |_, _| {
                inner.borrow_mut().push("late");
                Ok(())
            });
            Ok(())
        });

        model.publish(&Event::EndEdit).unwrap();
        assert!(log.borrow().is_empty());

        model.publish(&Event::EndEdit).unwrap();
        assert_eq!(*log.borrow(), ["late"]);
    }

    #[test]
    fn nested_publish_completes_before_outer_round_continues() {
        let mut model = model();
        let log = recorder();

        let outer = log.clone();
        model.on(EventKind::EndEdit, None, move |model, _| {
            outer.borrow_mut().push("outer-1");
            let root = model.root();
            model.publish(&Event::TreeComplete { root })
        });
        let second = log.clone();
        model.on(EventKind::EndEdit, None, move |_, _| {
            second.borrow_mut().push("outer-2");
            Ok(())
        });
        let nested = log.clone();
        model.on(EventKind::TreeComplete, None, move |_, _| {
            nested.borrow_mut().push("nested");
            Ok(())
        });

        model.publish(&Event::EndEdit).unwrap();
        assert_eq!(*log.borrow(), ["outer-1", "nested", "outer-2"]);
    }

    #[test]
    fn listener_error_propagates_and_stops_round() {
        let mut model = model();
        let log = recorder();

        model.on(EventKind::EndEdit, None, |_, _| {
            Err(Error::Listener {
                message: "boom".into(),
            })
        });
        let l = log.clone();
        model.on(EventKind::EndEdit, None, move |_, _| {
            l.borrow_mut().push("after");
            Ok(())
        });

        let err = model.publish(&Event::EndEdit).unwrap_err();
        assert!(err.to_string().contains("boom"));
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn owned_listeners_are_removed_together() {
        let mut bus = EventBus::new();
        let owner = NodeId(7);
        let noop: Callback = Rc::new(|_, _| Ok(()));
        bus.on(EventKind::EndEdit, Some(owner), noop.clone());
        bus.on(EventKind::TreeComplete, Some(owner), noop.clone());
        bus.on(EventKind::EndEdit, None, noop);

        assert_eq!(bus.off_owned_by(owner), 2);
        assert_eq!(bus.listener_count(EventKind::EndEdit), 1);
        assert_eq!(bus.listener_count(EventKind::TreeComplete), 0);
    }
}
