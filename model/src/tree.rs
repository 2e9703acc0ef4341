//! The design-time object tree.
//!
//! # Architecture
//!
//! [`Model`] owns every [`Node`] in an id-keyed arena together with the
//! [`EventBus`] and the [`Persistence`] collaborator. Parents own children
//! through their ordered child list; a child only records its parent's id.
//!
//! All structural operations publish a before/after event pair. Behavior
//! such as companion data and exclusive-active children is not coded into
//! these operations. It lives in listeners installed by a
//! [`ContainerPolicy`](crate::ContainerPolicy) and runs synchronously inside
//! the same dispatch round as the change that triggered it.
//!
//! # Removal
//!
//! [`Model::remove_child`] marks the whole subtree as deleting first, then
//! removes it depth-first, leaf-first, publishing a remove pair for every node.
//! Listeners see a deleting node through [`Model::is_deleting`] and skip
//! reactions such as re-creating companions for it.

use crate::{
    bus::EventBus,
    companion,
    error::{
        AlreadyAttachedSnafu, AssociationBoundSnafu, CycleSnafu, DetachedSnafu, NotAChildSnafu,
        Result, UnknownNodeSnafu,
    },
    event::{Event, Veto},
    node::{Association, Creation, Node, NodeId},
    source::{AttachPoint, Persistence},
    value::Value,
};
use compact_str::CompactString;
use rustc_hash::FxHashMap;
use snafu::{ensure, OptionExt};
use tracing::{debug, trace};

pub struct Model {
    nodes: FxHashMap<NodeId, Node>,
    root: NodeId,
    next_id: u64,
    pub(crate) bus: EventBus,
    pub(crate) source: Box<dyn Persistence>,
}

impl Model {
    pub fn new(root_type: &str, source: impl Persistence + 'static) -> Self {
        let root = NodeId(1);
        let mut node = Node::new(root, root_type.into(), Creation::Implicit);
        node.association = Association::Empty;

        let mut nodes = FxHashMap::default();
        nodes.insert(root, node);

        let mut model = Self {
            nodes,
            root,
            next_id: root.0,
            bus: EventBus::new(),
            source: Box::new(source),
        };
        companion::install_orphan_cleanup(&mut model);
        model
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    pub fn node(&self, id: NodeId) -> Result<&Node> {
        self.nodes.get(&id).context(UnknownNodeSnafu { id })
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> Result<&mut Node> {
        self.nodes.get_mut(&id).context(UnknownNodeSnafu { id })
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    /// Number of live nodes, attached or not, including the root.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Ids of every live node in creation order.
    pub fn node_ids(&self) -> Vec<NodeId> {
        let mut ids: Vec<_> = self.nodes.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn source(&self) -> &dyn Persistence {
        self.source.as_ref()
    }

    pub fn children(&self, id: NodeId) -> Result<&[NodeId]> {
        Ok(self.node(id)?.children())
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes.get(&id).and_then(|n| n.parent)
    }

    /// Whether `ancestor` is `id` or lies on the path from `id` to the root.
    pub fn is_ancestor(&self, ancestor: NodeId, id: NodeId) -> bool {
        let mut current = Some(id);
        while let Some(node) = current {
            if node == ancestor {
                return true;
            }
            current = self.parent(node);
        }
        false
    }

    /// Whether `id` is part of a subtree currently being removed.
    pub fn is_deleting(&self, id: NodeId) -> bool {
        self.nodes.get(&id).is_some_and(|n| n.deleting)
    }

    /// Create a detached node.
    pub fn create_node(&mut self, type_name: &str, creation: Creation) -> NodeId {
        self.next_id += 1;
        let id = NodeId(self.next_id);
        self.nodes
            .insert(id, Node::new(id, type_name.into(), creation));
        trace!(%id, type_name, "create node");
        id
    }

    /// Create a detached node backed by a fresh construction expression.
    pub fn create_widget(&mut self, type_name: &str) -> NodeId {
        let expr = self.source.construct(type_name);
        self.create_node(type_name, Creation::Constructor { expr })
    }

    /// Drop a node that never made it into the tree.
    pub(crate) fn discard(&mut self, id: NodeId) {
        if id != self.root && self.parent(id).is_none() {
            self.bus.off_owned_by(id);
            self.nodes.remove(&id);
        }
    }

    /// Bind how `id` connects to its parent. Only an unbound node accepts this.
    pub fn bind_association(&mut self, id: NodeId, association: Association) -> Result<()> {
        let node = self.node_mut(id)?;
        ensure!(
            node.association == Association::Unbound,
            AssociationBoundSnafu { id }
        );
        node.association = association;
        Ok(())
    }

    /// Record `parent.method(child)` in the persisted form, bind it as the
    /// child's association and add the child.
    ///
    /// Returns `false` if a listener vetoed the add, in which case nothing is
    /// recorded.
    pub fn attach(
        &mut self,
        parent: NodeId,
        child: NodeId,
        method: &str,
        before: Option<NodeId>,
    ) -> Result<bool> {
        self.node(parent)?;
        ensure!(
            self.node(child)?.association == Association::Unbound,
            AssociationBoundSnafu { id: child }
        );
        let before_point = before.and_then(|b| self.invocation_point(b));
        let attach = self
            .source
            .add_invocation(parent, child, method, before_point)?;
        self.bind_association(
            child,
            Association::Invocation {
                method: method.into(),
                attach,
            },
        )?;

        let added = self.add_child(parent, child, before)?;
        if !added {
            self.source.remove_invocation(attach);
            self.node_mut(child)?.association = Association::Unbound;
        }
        Ok(added)
    }

    fn invocation_point(&self, id: NodeId) -> Option<AttachPoint> {
        match self.nodes.get(&id)?.association {
            Association::Invocation { attach, .. } => Some(attach),
            _ => None,
        }
    }

    /// Insert `child` under `parent`, before `before` or last.
    ///
    /// Returns `false` when a before-listener vetoed the add.
    pub fn add_child(
        &mut self,
        parent: NodeId,
        child: NodeId,
        before: Option<NodeId>,
    ) -> Result<bool> {
        self.node(parent)?;
        if let Some(existing) = self.node(child)?.parent {
            return AlreadyAttachedSnafu {
                child,
                parent: existing,
            }
            .fail();
        }
        ensure!(
            child != self.root && !self.is_ancestor(child, parent),
            CycleSnafu { child }
        );
        if let Some(sibling) = before {
            ensure!(
                self.node(sibling)?.parent == Some(parent),
                NotAChildSnafu {
                    parent,
                    child: sibling
                }
            );
        }

        let event = Event::ChildAddBefore {
            parent,
            child,
            before,
            veto: Veto::default(),
        };
        self.publish(&event)?;
        if event.veto().is_some_and(Veto::is_vetoed) {
            debug!(%parent, %child, "add vetoed");
            return Ok(false);
        }

        self.insert_child(parent, child, before)?;
        trace!(%parent, %child, "child added");
        self.publish(&Event::ChildAddAfter { parent, child })?;
        Ok(true)
    }

    fn insert_child(&mut self, parent: NodeId, child: NodeId, before: Option<NodeId>) -> Result<()> {
        let parent_node = self.node_mut(parent)?;
        let index = before
            .and_then(|b| parent_node.children.iter().position(|c| *c == b))
            .unwrap_or(parent_node.children.len());
        parent_node.children.insert(index, child);
        self.node_mut(child)?.parent = Some(parent);
        Ok(())
    }

    /// Detach and drop `child` together with its whole subtree.
    pub fn remove_child(&mut self, parent: NodeId, child: NodeId) -> Result<()> {
        ensure!(
            self.node(child)?.parent == Some(parent),
            NotAChildSnafu { parent, child }
        );
        for id in self.subtree(child) {
            if let Some(node) = self.nodes.get_mut(&id) {
                node.deleting = true;
            }
        }
        self.remove_marked(parent, child)
    }

    /// Remove `id` from whatever parent it has.
    pub fn delete(&mut self, id: NodeId) -> Result<()> {
        let parent = self.node(id)?.parent.context(DetachedSnafu { id })?;
        self.remove_child(parent, id)
    }

    fn remove_marked(&mut self, parent: NodeId, child: NodeId) -> Result<()> {
        self.publish(&Event::ChildRemoveBefore { parent, child })?;

        let grandchildren = self.node(child)?.children.clone();
        for grandchild in grandchildren {
            // before-listeners may already have taken some of them away
            if self.parent(grandchild) == Some(child) {
                self.remove_marked(child, grandchild)?;
            }
        }

        self.node_mut(parent)?.children.retain(|c| *c != child);
        let node = self.node_mut(child)?;
        node.parent = None;
        let expr = node.expr();
        let association = node.association.clone();
        if let Some(expr) = expr {
            self.source.remove_expr(expr);
        }
        match association {
            Association::Invocation { attach, .. } => self.source.remove_invocation(attach),
            Association::Argument { attach, index } => self.shift_arguments(attach, index),
            _ => {},
        }
        self.bus.off_owned_by(child);
        trace!(%parent, %child, "child removed");

        let result = self.publish(&Event::ChildRemoveAfter { parent, child });
        self.nodes.remove(&child);
        result
    }

    /// Close the gap left by the argument at `removed` of the invocation at `attach`.
    fn shift_arguments(&mut self, attach: AttachPoint, removed: usize) {
        for node in self.nodes.values_mut() {
            if let Association::Argument { attach: at, index } = &mut node.association {
                if *at == attach && *index > removed {
                    *index -= 1;
                }
            }
        }
    }

    /// Relocate `child` under `new_parent` as one atomic operation.
    ///
    /// Listeners see a single move pair rather than a remove followed by an add.
    /// An invocation association is retargeted in the persisted form.
    pub fn move_child(
        &mut self,
        child: NodeId,
        new_parent: NodeId,
        before: Option<NodeId>,
    ) -> Result<()> {
        let old_parent = self.node(child)?.parent.context(DetachedSnafu { id: child })?;
        self.node(new_parent)?;
        ensure!(!self.is_ancestor(child, new_parent), CycleSnafu { child });
        if let Some(sibling) = before {
            ensure!(
                sibling != child && self.node(sibling)?.parent == Some(new_parent),
                NotAChildSnafu {
                    parent: new_parent,
                    child: sibling
                }
            );
        }

        self.publish(&Event::MoveBefore {
            child,
            old_parent,
            new_parent,
            before,
        })?;

        self.node_mut(old_parent)?.children.retain(|c| *c != child);
        self.node_mut(child)?.parent = None;
        self.insert_child(new_parent, child, before)?;

        if let Some(attach) = self.invocation_point(child) {
            let before_point = before.and_then(|b| self.invocation_point(b));
            self.source
                .move_invocation(attach, new_parent, before_point)?;
        }
        debug!(%child, %old_parent, %new_parent, "child moved");

        self.publish(&Event::MoveAfter {
            child,
            old_parent,
            new_parent,
        })
    }

    /// Current value of `property`: defaults for virtual nodes, the persisted
    /// form otherwise.
    pub fn property(&self, id: NodeId, property: &str) -> Result<Option<Value>> {
        let node = self.node(id)?;
        Ok(match &node.creation {
            Creation::Virtual { defaults } => defaults.get(property).cloned(),
            Creation::Constructor { expr } => self.source.evaluate(*expr, property),
            Creation::Implicit => node.values.get(property).cloned(),
        })
    }

    /// Write `property`, materializing a virtual node first.
    ///
    /// Returns `false` when a before-listener vetoed the write.
    pub fn set_property(
        &mut self,
        id: NodeId,
        property: &str,
        value: impl Into<Value>,
    ) -> Result<bool> {
        let value = value.into();
        self.node(id)?;

        let event = Event::PropertySetBefore {
            node: id,
            property: property.into(),
            value: value.clone(),
            veto: Veto::default(),
        };
        self.publish(&event)?;
        if event.veto().is_some_and(Veto::is_vetoed) {
            debug!(%id, property, "write vetoed");
            return Ok(false);
        }

        // before-listeners may have materialized the node already
        let target = if self.node(id)?.is_virtual() {
            Some(self.materialize(id)?)
        } else {
            self.node(id)?.expr()
        };
        match target {
            Some(expr) => self.source.write(expr, property, &value)?,
            None => {
                self.node_mut(id)?.values.insert(property.into(), value);
            },
        }

        self.publish(&Event::PropertySetAfter {
            node: id,
            property: property.into(),
        })?;
        Ok(true)
    }

    pub fn arbitrary(&self, id: NodeId, key: &str) -> Option<&Value> {
        self.nodes.get(&id)?.arbitrary.get(key)
    }

    pub fn set_arbitrary(
        &mut self,
        id: NodeId,
        key: impl Into<CompactString>,
        value: impl Into<Value>,
    ) -> Result<()> {
        self.node_mut(id)?
            .arbitrary
            .insert(key.into(), value.into());
        Ok(())
    }

    pub fn remove_arbitrary(&mut self, id: NodeId, key: &str) -> Option<Value> {
        self.nodes.get_mut(&id)?.arbitrary.remove(key)
    }

    /// Announce that the initial tree has been built.
    pub fn tree_complete(&mut self) -> Result<()> {
        let root = self.root;
        debug!(nodes = self.nodes.len(), "tree complete");
        self.publish(&Event::TreeComplete { root })
    }

    /// Announce the end of an edit, before the live instance is refreshed.
    pub fn end_edit(&mut self) -> Result<()> {
        self.publish(&Event::EndEdit)
    }

    /// `id` and all its descendants, pre-order.
    pub fn subtree(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(next) = stack.pop() {
            if let Some(node) = self.nodes.get(&next) {
                out.push(next);
                stack.extend(node.children.iter().rev().copied());
            }
        }
        out
    }
}
