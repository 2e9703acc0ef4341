use crate::{
    container::ContainerPolicy,
    source::{AttachPoint, ExprId},
    value::{Map, Value},
};
use compact_str::CompactString;
use indexmap::IndexMap;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::{fmt, rc::Rc};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// How a node's persisted form is produced.
#[derive(Debug, Clone, PartialEq)]
pub enum Creation {
    /// Backed by a construction expression in the persisted form.
    Constructor { expr: ExprId },
    /// Exists without any expression of its own, e.g. the root.
    Implicit,
    /// Placeholder whose values come from `defaults` until it is materialized.
    Virtual { defaults: Map },
}

/// How a node connects to its parent in the persisted form.
#[derive(Debug, Clone, PartialEq)]
pub enum Association {
    /// Not bound yet. Binding happens exactly once.
    Unbound,
    /// `parent.method(child)`.
    Invocation {
        method: CompactString,
        attach: AttachPoint,
    },
    /// Extra argument at `index` of the invocation that attaches the parent.
    Argument { attach: AttachPoint, index: usize },
    /// Assigned to a field of the parent.
    Field { name: CompactString },
    /// No persisted link at all.
    Empty,
}

impl Association {
    pub fn attach_point(&self) -> Option<AttachPoint> {
        match self {
            Association::Invocation { attach, .. } | Association::Argument { attach, .. } => {
                Some(*attach)
            },
            _ => None,
        }
    }

    pub fn method(&self) -> Option<&str> {
        match self {
            Association::Invocation { method, .. } => Some(method.as_str()),
            _ => None,
        }
    }
}

/// Element of the design-time tree.
///
/// Nodes are owned by the [`Model`](crate::Model) arena; the parent link is a
/// plain id so ownership flows strictly from parent to child.
#[derive(Debug)]
pub struct Node {
    pub(crate) id: NodeId,
    pub(crate) type_name: CompactString,
    pub(crate) parent: Option<NodeId>,
    pub(crate) children: Vec<NodeId>,
    pub(crate) creation: Creation,
    pub(crate) association: Association,
    /// Values of implicit nodes, which have no expression to write into.
    pub(crate) values: IndexMap<CompactString, Value>,
    /// Transient flags, never persisted.
    pub(crate) arbitrary: FxHashMap<CompactString, Value>,
    pub(crate) container: Option<Rc<ContainerPolicy>>,
    pub(crate) companion: bool,
    pub(crate) deleting: bool,
}

impl Node {
    pub(crate) fn new(id: NodeId, type_name: CompactString, creation: Creation) -> Self {
        Self {
            id,
            type_name,
            parent: None,
            children: Vec::new(),
            creation,
            association: Association::Unbound,
            values: IndexMap::new(),
            arbitrary: FxHashMap::default(),
            container: None,
            companion: false,
            deleting: false,
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub fn creation(&self) -> &Creation {
        &self.creation
    }

    pub fn association(&self) -> &Association {
        &self.association
    }

    pub fn is_virtual(&self) -> bool {
        matches!(self.creation, Creation::Virtual { .. })
    }

    /// Whether this node holds per-child data for its parent's container.
    pub fn is_companion(&self) -> bool {
        self.companion
    }

    pub fn container(&self) -> Option<&ContainerPolicy> {
        self.container.as_deref()
    }

    pub fn arbitrary(&self, key: &str) -> Option<&Value> {
        self.arbitrary.get(key)
    }

    pub fn expr(&self) -> Option<ExprId> {
        match self.creation {
            Creation::Constructor { expr } => Some(expr),
            _ => None,
        }
    }
}
