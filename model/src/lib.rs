//! Design-time object model for the visual designer.
//!
//! The [`Model`] is a tree of [`Node`]s kept in sync with a persisted source
//! form through the [`Persistence`] seam. Every structural change and
//! property write is announced on an ordered [`EventBus`], and container
//! behavior (companion data nodes, exclusive active child) is attached as
//! listeners by a data-driven [`ContainerPolicy`].
//!
//! Nodes may start out *virtual*: they read values from computed defaults and
//! only gain a persisted form on their first write.

pub mod bus;
pub mod companion;
pub mod container;
pub mod error;
pub mod event;
mod materialize;
pub mod node;
pub mod source;
pub mod stack;
pub mod tree;
pub mod value;

pub use bus::{EventBus, ListenerId};
pub use companion::{CompanionSpec, KEY_NO_VIRTUAL_COMPANION};
pub use container::ContainerPolicy;
pub use error::{Error, Result};
pub use event::{Event, EventKind, Veto};
pub use node::{Association, Creation, Node, NodeId};
pub use source::{AttachPoint, ExprId, MemorySource, Persistence};
pub use stack::{reconcile_live, LiveStack, StackSpec};
pub use tree::Model;
pub use value::{Map, Value};
