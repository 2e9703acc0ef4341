//! Data-driven container behavior.
//!
//! A container is an ordinary node carrying a [`ContainerPolicy`]. The policy
//! says whether children receive companion data nodes and whether only one
//! child is shown at a time; installing it registers the matching listeners,
//! owned by the container.

use crate::{
    companion::{self, CompanionSpec},
    error::{PolicyInstalledSnafu, Result},
    node::NodeId,
    stack::{self, StackSpec},
    tree::Model,
    value::Map,
};
use compact_str::CompactString;
use snafu::ensure;
use std::rc::Rc;
use tracing::debug;

#[derive(Debug, Clone, Default)]
pub struct ContainerPolicy {
    pub name: CompactString,
    pub companion: Option<CompanionSpec>,
    pub stack: Option<StackSpec>,
}

impl ContainerPolicy {
    pub fn new(name: impl Into<CompactString>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_companion(mut self, spec: CompanionSpec) -> Self {
        self.companion = Some(spec);
        self
    }

    pub fn with_stack(mut self, spec: StackSpec) -> Self {
        self.stack = Some(spec);
        self
    }

    /// Absolute positioning: each child gets its own offsets.
    pub fn absolute() -> Self {
        Self::new("absolute").with_companion(CompanionSpec::new(
            "AbsoluteData",
            [("left", 0), ("top", 0)].into_iter().collect(),
        ))
    }

    /// Box layout with per-child margins.
    pub fn boxed() -> Self {
        Self::new("box").with_companion(CompanionSpec::new(
            "BoxData",
            [("x", 10), ("y", 10)].into_iter().collect(),
        ))
    }

    /// One visible child at a time, no per-child data.
    pub fn tabs() -> Self {
        Self::new("tabs").with_stack(StackSpec::default())
    }

    /// Cards: one visible child at a time, each with a title.
    pub fn card() -> Self {
        let defaults: Map = [("title", "")].into_iter().collect();
        Self::new("card")
            .with_companion(CompanionSpec::new("CardData", defaults))
            .with_stack(StackSpec::default())
    }

    /// Accordion panes, children attached through `addPane`.
    pub fn accordion() -> Self {
        let defaults: Map = [("collapsed", false)].into_iter().collect();
        Self::new("accordion")
            .with_companion(CompanionSpec::new("PaneData", defaults).with_methods(["addPane"]))
            .with_stack(StackSpec::default().with_methods(["addPane"]))
    }
}

impl Model {
    /// Turn `id` into a container governed by `policy`.
    pub fn install_container(&mut self, id: NodeId, policy: ContainerPolicy) -> Result<()> {
        let node = self.node_mut(id)?;
        ensure!(node.container.is_none(), PolicyInstalledSnafu { id });

        let policy = Rc::new(policy);
        node.container = Some(policy.clone());
        debug!(%id, policy = %policy.name, "install container policy");

        if let Some(spec) = &policy.companion {
            companion::install(self, id, spec.clone());
        }
        if let Some(spec) = &policy.stack {
            stack::install(self, id, spec.clone());
        }
        Ok(())
    }

    /// Create a constructed node and make it a container.
    pub fn create_container(
        &mut self,
        type_name: &str,
        policy: ContainerPolicy,
    ) -> Result<NodeId> {
        let id = self.create_widget(type_name);
        self.install_container(id, policy)?;
        Ok(id)
    }
}
