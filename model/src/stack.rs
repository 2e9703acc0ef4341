//! Exclusive-active-child support for tabs, cards and accordions.
//!
//! The active child is never stored on the container. It is derived from a
//! transient flag on each member (see [`StackSpec::active_key`]); members are
//! the container's children that are not companions and that were attached
//! through one of [`StackSpec::methods`].
//!
//! Listeners installed with the policy keep exactly one member active:
//! the first member of an empty container becomes active, removing or
//! moving out the active member elects the first remaining one, and a tree
//! completed with members but no active one gets its first member promoted. The same
//! pass is available for the live instance through [`reconcile_live`], since
//! its notion of "active" can drift from the model through UI interaction.

use crate::{
    error::{NotAChildSnafu, NotAStackSnafu, Result},
    event::{Event, EventKind},
    node::{Association, Node, NodeId},
    tree::Model,
    value::Value,
};
use compact_str::CompactString;
use smallvec::SmallVec;
use snafu::{ensure, OptionExt};
use tracing::debug;

pub const DEFAULT_ACTIVE_KEY: &str = "stack.active";

#[derive(Debug, Clone)]
pub struct StackSpec {
    pub active_key: CompactString,
    /// Attach methods whose children are members. Empty admits every child.
    pub methods: SmallVec<[CompactString; 2]>,
}

impl Default for StackSpec {
    fn default() -> Self {
        Self {
            active_key: DEFAULT_ACTIVE_KEY.into(),
            methods: SmallVec::new(),
        }
    }
}

impl StackSpec {
    pub fn with_methods<I, S>(mut self, methods: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<CompactString>,
    {
        self.methods = methods.into_iter().map(Into::into).collect();
        self
    }

    pub fn admits(&self, association: &Association) -> bool {
        if self.methods.is_empty() {
            return true;
        }
        association
            .method()
            .is_some_and(|m| self.methods.iter().any(|allowed| allowed == m))
    }
}

pub(crate) fn install(model: &mut Model, container: NodeId, spec: StackSpec) {
    let reconcile = move |model: &mut Model, event: &Event| -> Result<()> {
        let touches = match event {
            Event::ChildAddAfter { parent, .. } | Event::ChildRemoveAfter { parent, .. } => {
                *parent == container
            },
            Event::MoveAfter {
                old_parent,
                new_parent,
                ..
            } => old_parent != new_parent && (*old_parent == container || *new_parent == container),
            _ => false,
        };
        if touches && !model.is_deleting(container) {
            model.reconcile_active(container)?;
        }
        Ok(())
    };
    model.on(EventKind::ChildAddAfter, Some(container), reconcile.clone());
    model.on(EventKind::ChildRemoveAfter, Some(container), reconcile.clone());
    model.on(EventKind::MoveAfter, Some(container), reconcile);

    // trees loaded before the policy was installed never saw an add
    model.on(EventKind::TreeComplete, Some(container), move |model, _| {
        if !model.is_deleting(container) && !model.stack_members(container)?.is_empty() {
            model.reconcile_active(container)?;
        }
        Ok(())
    });

    // the flag means nothing outside this container
    let key = spec.active_key;
    model.on(EventKind::MoveBefore, Some(container), move |model, event| {
        if let Event::MoveBefore {
            child,
            old_parent,
            new_parent,
            ..
        } = event
        {
            if *old_parent == container && *new_parent != container {
                model.remove_arbitrary(*child, &key);
            }
        }
        Ok(())
    });
}

impl Model {
    fn stack_key(&self, container: NodeId) -> Result<CompactString> {
        self.node(container)?
            .container()
            .and_then(|policy| policy.stack.as_ref())
            .map(|spec| spec.active_key.clone())
            .context(NotAStackSnafu { id: container })
    }

    /// Children of a stack container that take part in the active election.
    pub fn stack_members(&self, container: NodeId) -> Result<Vec<NodeId>> {
        let spec = self
            .node(container)?
            .container()
            .and_then(|policy| policy.stack.as_ref());
        Ok(self
            .children(container)?
            .iter()
            .copied()
            .filter(|c| {
                self.get(*c).is_some_and(|n| {
                    !n.is_companion() && spec.map_or(true, |spec| spec.admits(n.association()))
                })
            })
            .collect())
    }

    fn is_flagged(&self, child: NodeId, key: &str) -> bool {
        self.get(child)
            .and_then(|node: &Node| node.arbitrary(key))
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// The active child of a stack container, if any.
    pub fn active_child(&self, container: NodeId) -> Option<NodeId> {
        let key = self.stack_key(container).ok()?;
        self.stack_members(container)
            .ok()?
            .into_iter()
            .find(|c| self.is_flagged(*c, &key))
    }

    /// Position of the active child among the stack members.
    pub fn active_index(&self, container: NodeId) -> Option<usize> {
        let active = self.active_child(container)?;
        self.stack_members(container)
            .ok()?
            .iter()
            .position(|c| *c == active)
    }

    /// Make `child` the only active member of `container`.
    pub fn set_active(&mut self, container: NodeId, child: NodeId) -> Result<()> {
        let key = self.stack_key(container)?;
        let members = self.stack_members(container)?;
        ensure!(
            members.contains(&child),
            NotAChildSnafu {
                parent: container,
                child
            }
        );

        let previous = self.active_child(container);
        for member in members {
            if member == child {
                self.set_arbitrary(member, key.clone(), true)?;
            } else {
                self.remove_arbitrary(member, &key);
            }
        }
        if previous != Some(child) {
            debug!(%container, %child, "active child changed");
            self.publish(&Event::ActiveChanged {
                container,
                child: Some(child),
            })?;
        }
        Ok(())
    }

    /// Keep the first active member, demote any others, and promote the first
    /// member when none is active.
    pub fn reconcile_active(&mut self, container: NodeId) -> Result<Option<NodeId>> {
        let key = self.stack_key(container)?;
        let members = self.stack_members(container)?;
        let flagged: Vec<_> = members
            .iter()
            .copied()
            .filter(|c| self.is_flagged(*c, &key))
            .collect();

        let active = match flagged.split_first() {
            Some((first, rest)) => {
                for duplicate in rest {
                    self.remove_arbitrary(*duplicate, &key);
                }
                Some(*first)
            },
            None => {
                let first = members.first().copied();
                if let Some(first) = first {
                    self.set_arbitrary(first, key, true)?;
                    debug!(%container, child = %first, "promoted default active child");
                    self.publish(&Event::ActiveChanged {
                        container,
                        child: Some(first),
                    })?;
                }
                first
            },
        };
        Ok(active)
    }
}

/// A stack as it exists in the live instance.
pub trait LiveStack {
    type Error;

    fn len(&mut self) -> Result<usize, Self::Error>;

    fn is_active(&mut self, index: usize) -> Result<bool, Self::Error>;

    fn set_active(&mut self, index: usize, active: bool) -> Result<(), Self::Error>;
}

/// Run the exactly-one-active pass against a live stack.
///
/// `preferred` (usually the model's [`Model::active_index`]) is promoted when
/// nothing is active; index 0 otherwise. Returns the index left active.
pub fn reconcile_live<L: LiveStack + ?Sized>(
    live: &mut L,
    preferred: Option<usize>,
) -> Result<Option<usize>, L::Error> {
    let len = live.len()?;
    if len == 0 {
        return Ok(None);
    }

    let mut active = None;
    for index in 0..len {
        if live.is_active(index)? {
            if active.is_none() {
                active = Some(index);
            } else {
                live.set_active(index, false)?;
            }
        }
    }

    match active {
        Some(index) => Ok(Some(index)),
        None => {
            let index = preferred.filter(|i| *i < len).unwrap_or(0);
            live.set_active(index, true)?;
            Ok(Some(index))
        },
    }
}
