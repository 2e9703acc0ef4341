//! Lifecycle notifications published on the [`EventBus`](crate::bus::EventBus).
//!
//! Structural changes come as a before/after pair. Before-phase events that
//! can be refused carry a [`Veto`]; once any listener vetoes, the operation
//! is abandoned after the round completes and no after-event is published.

use crate::{node::NodeId, value::Value};
use compact_str::CompactString;
use std::cell::Cell;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    ChildAddBefore,
    ChildAddAfter,
    ChildRemoveBefore,
    ChildRemoveAfter,
    MoveBefore,
    MoveAfter,
    PropertySetBefore,
    PropertySetAfter,
    Materialized,
    TreeComplete,
    EndEdit,
    ActiveChanged,
}

#[derive(Debug)]
pub enum Event {
    ChildAddBefore {
        parent: NodeId,
        child: NodeId,
        before: Option<NodeId>,
        veto: Veto,
    },
    ChildAddAfter {
        parent: NodeId,
        child: NodeId,
    },
    ChildRemoveBefore {
        parent: NodeId,
        child: NodeId,
    },
    /// The child is detached but still readable until the round completes.
    ChildRemoveAfter {
        parent: NodeId,
        child: NodeId,
    },
    MoveBefore {
        child: NodeId,
        old_parent: NodeId,
        new_parent: NodeId,
        before: Option<NodeId>,
    },
    MoveAfter {
        child: NodeId,
        old_parent: NodeId,
        new_parent: NodeId,
    },
    PropertySetBefore {
        node: NodeId,
        property: CompactString,
        value: Value,
        veto: Veto,
    },
    PropertySetAfter {
        node: NodeId,
        property: CompactString,
    },
    Materialized {
        node: NodeId,
    },
    TreeComplete {
        root: NodeId,
    },
    EndEdit,
    ActiveChanged {
        container: NodeId,
        child: Option<NodeId>,
    },
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::ChildAddBefore { .. } => EventKind::ChildAddBefore,
            Event::ChildAddAfter { .. } => EventKind::ChildAddAfter,
            Event::ChildRemoveBefore { .. } => EventKind::ChildRemoveBefore,
            Event::ChildRemoveAfter { .. } => EventKind::ChildRemoveAfter,
            Event::MoveBefore { .. } => EventKind::MoveBefore,
            Event::MoveAfter { .. } => EventKind::MoveAfter,
            Event::PropertySetBefore { .. } => EventKind::PropertySetBefore,
            Event::PropertySetAfter { .. } => EventKind::PropertySetAfter,
            Event::Materialized { .. } => EventKind::Materialized,
            Event::TreeComplete { .. } => EventKind::TreeComplete,
            Event::EndEdit => EventKind::EndEdit,
            Event::ActiveChanged { .. } => EventKind::ActiveChanged,
        }
    }

    /// The veto flag of refusable events.
    pub fn veto(&self) -> Option<&Veto> {
        match self {
            Event::ChildAddBefore { veto, .. } | Event::PropertySetBefore { veto, .. } => {
                Some(veto)
            },
            _ => None,
        }
    }
}

#[derive(Debug, Default)]
pub struct Veto(Cell<bool>);

impl Veto {
    pub fn veto(&self) {
        self.0.set(true);
    }

    pub fn is_vetoed(&self) -> bool {
        self.0.get()
    }
}
