//! Companion data nodes for children of layout containers.
//!
//! A container whose policy carries a [`CompanionSpec`] keeps exactly one
//! companion under each eligible child. The rule is enforced reactively by
//! listeners owned by the container:
//!
//! | event                              | reaction                          |
//! |------------------------------------|-----------------------------------|
//! | child added to the container       | ensure a companion                |
//! | child moved out                    | delete its companions             |
//! | child moved in                     | ensure a fresh companion          |
//! | companion deleted, child stays     | re-create a virtual one           |
//! | tree complete                      | ensure companions for all children|
//! | end of edit                        | drop materialized defaults        |
//!
//! A freshly ensured companion is always virtual. Re-creation after deletion
//! is skipped while the child carries [`KEY_NO_VIRTUAL_COMPANION`].

use crate::{
    container::ContainerPolicy,
    error::{DuplicateCompanionSnafu, Result},
    event::{Event, EventKind},
    node::{Association, Node, NodeId},
    tree::Model,
    value::{Map, Value},
};
use compact_str::CompactString;
use smallvec::SmallVec;
use snafu::ensure;
use std::rc::Rc;
use tracing::{debug, trace};

/// Transient flag on a child that suppresses virtual companion re-creation.
pub const KEY_NO_VIRTUAL_COMPANION: &str = "companion.no_virtual";

#[derive(Debug, Clone)]
pub struct CompanionSpec {
    pub type_name: CompactString,
    pub defaults: Map,
    /// Attach methods whose children are eligible. Empty accepts every child.
    pub methods: SmallVec<[CompactString; 2]>,
}

impl CompanionSpec {
    pub fn new(type_name: impl Into<CompactString>, defaults: Map) -> Self {
        Self {
            type_name: type_name.into(),
            defaults,
            methods: SmallVec::new(),
        }
    }

    pub fn with_methods<I, S>(mut self, methods: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<CompactString>,
    {
        self.methods = methods.into_iter().map(Into::into).collect();
        self
    }

    pub fn accepts(&self, association: &Association) -> bool {
        if self.methods.is_empty() {
            return true;
        }
        association
            .method()
            .is_some_and(|m| self.methods.iter().any(|allowed| allowed == m))
    }
}

pub(crate) fn install(model: &mut Model, container: NodeId, spec: CompanionSpec) {
    model.on(EventKind::ChildAddAfter, Some(container), move |model, event| {
        if let Event::ChildAddAfter { parent, child } = event {
            if *parent == container {
                model.ensure_companion(*child)?;
            }
        }
        Ok(())
    });

    model.on(EventKind::MoveBefore, Some(container), move |model, event| {
        if let Event::MoveBefore {
            child,
            old_parent,
            new_parent,
            ..
        } = event
        {
            if *old_parent == container && *new_parent != container {
                model.delete_companions(*child)?;
            }
        }
        Ok(())
    });

    model.on(EventKind::MoveAfter, Some(container), move |model, event| {
        if let Event::MoveAfter {
            child,
            old_parent,
            new_parent,
        } = event
        {
            if *new_parent == container && *old_parent != container {
                model.ensure_companion(*child)?;
            }
        }
        Ok(())
    });

    model.on(EventKind::ChildRemoveAfter, Some(container), move |model, event| {
        let Event::ChildRemoveAfter { parent, child } = event else {
            return Ok(());
        };
        let widget = *parent;
        let was_companion = model.get(*child).is_some_and(Node::is_companion);
        let stays = model.parent(widget) == Some(container) && !model.is_deleting(widget);
        if was_companion && stays && model.arbitrary(widget, KEY_NO_VIRTUAL_COMPANION).is_none() {
            trace!(%widget, "re-create companion after delete");
            model.ensure_companion(widget)?;
        }
        Ok(())
    });

    model.on(EventKind::TreeComplete, Some(container), move |model, _| {
        for child in model.children(container)?.to_vec() {
            model.ensure_companion(child)?;
        }
        Ok(())
    });

    let spec = Rc::new(spec);
    model.on(EventKind::EndEdit, Some(container), move |model, _| {
        model.prune_default_companions(container, &spec)
    });
}

/// Drop companions left on children of containers that no longer want them.
pub(crate) fn install_orphan_cleanup(model: &mut Model) {
    model.on(EventKind::TreeComplete, None, |model, _| {
        model.remove_orphan_companions().map(|_| ())
    });
}

impl Model {
    pub fn companions_of(&self, widget: NodeId) -> Vec<NodeId> {
        self.get(widget)
            .map(|node| {
                node.children()
                    .iter()
                    .copied()
                    .filter(|c| self.get(*c).is_some_and(Node::is_companion))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn companion_of(&self, widget: NodeId) -> Option<NodeId> {
        self.companions_of(widget).first().copied()
    }

    /// The policy of `widget`'s parent, if it hands out companions to `widget`.
    fn companion_policy_for(&self, widget: NodeId) -> Option<Rc<ContainerPolicy>> {
        let node = self.get(widget)?;
        if node.is_companion() {
            return None;
        }
        let policy = self.get(node.parent()?)?.container.clone()?;
        let accepts = policy.companion.as_ref()?.accepts(node.association());
        accepts.then_some(policy)
    }

    pub fn is_companion_eligible(&self, widget: NodeId) -> bool {
        self.companion_policy_for(widget).is_some()
    }

    /// Make sure `widget` carries the companion its container asks for.
    ///
    /// Returns the companion, or `None` when the widget is not eligible.
    pub fn ensure_companion(&mut self, widget: NodeId) -> Result<Option<NodeId>> {
        if self.is_deleting(widget) {
            return Ok(None);
        }
        let Some(policy) = self.companion_policy_for(widget) else {
            return Ok(None);
        };
        let Some(spec) = policy.companion.as_ref() else {
            return Ok(None);
        };

        let existing = self.companions_of(widget);
        ensure!(
            existing.len() <= 1,
            DuplicateCompanionSnafu {
                id: widget,
                count: existing.len()
            }
        );
        if let Some(&current) = existing.first() {
            if spec.type_name == self.node(current)?.type_name() {
                return Ok(Some(current));
            }
            debug!(%widget, %current, "replace companion of foreign type");
            self.delete_companions(widget)?;
        }

        let companion = self.create_virtual(&spec.type_name, spec.defaults.clone());
        self.node_mut(companion)?.companion = true;
        if !self.add_child(widget, companion, None)? {
            self.discard(companion);
            return Ok(None);
        }
        trace!(%widget, %companion, "virtual companion created");
        Ok(Some(companion))
    }

    /// Remove every companion of `widget` without re-creating a virtual one.
    pub fn delete_companions(&mut self, widget: NodeId) -> Result<()> {
        let companions = self.companions_of(widget);
        if companions.is_empty() {
            return Ok(());
        }
        self.set_arbitrary(widget, KEY_NO_VIRTUAL_COMPANION, Value::Bool(true))?;
        let result = companions
            .into_iter()
            .try_for_each(|companion| self.remove_child(widget, companion));
        self.remove_arbitrary(widget, KEY_NO_VIRTUAL_COMPANION);
        result
    }

    /// Remove companions whose owner is no longer eligible for one.
    pub fn remove_orphan_companions(&mut self) -> Result<usize> {
        let mut removed = 0;
        for id in self.node_ids() {
            let Some(node) = self.get(id) else { continue };
            if !node.is_companion() {
                continue;
            }
            let Some(widget) = node.parent() else { continue };
            let wanted = self
                .companion_policy_for(widget)
                .and_then(|policy| policy.companion.as_ref().map(|s| s.type_name.clone()));
            if wanted.as_deref() == Some(node.type_name()) {
                continue;
            }
            debug!(%widget, companion = %id, "remove orphaned companion");
            self.set_arbitrary(widget, KEY_NO_VIRTUAL_COMPANION, Value::Bool(true))?;
            let result = self.remove_child(widget, id);
            self.remove_arbitrary(widget, KEY_NO_VIRTUAL_COMPANION);
            result?;
            removed += 1;
        }
        Ok(removed)
    }

    /// Delete materialized companions of `container`'s children whose values
    /// all equal their defaults. A virtual replacement is created for each.
    fn prune_default_companions(&mut self, container: NodeId, spec: &CompanionSpec) -> Result<()> {
        if self.is_deleting(container) {
            return Ok(());
        }
        for widget in self.children(container)?.to_vec() {
            for companion in self.companions_of(widget) {
                let Some(expr) = self.node(companion)?.expr() else {
                    continue;
                };
                let is_default = self
                    .source
                    .values(expr)
                    .is_some_and(|values| values.same_entries(&spec.defaults));
                if is_default {
                    debug!(%widget, %companion, "drop companion holding only defaults");
                    self.remove_child(widget, companion)?;
                }
            }
        }
        Ok(())
    }

    /// Fail if any node carries more than one companion.
    pub fn check_companions(&self) -> Result<()> {
        for id in self.node_ids() {
            let count = self.companions_of(id).len();
            ensure!(count <= 1, DuplicateCompanionSnafu { id, count });
        }
        Ok(())
    }
}
