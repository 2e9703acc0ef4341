//! Virtual nodes and their one-way transition into persisted form.
//!
//! A virtual node reads its values from an in-memory default map. The first
//! write materializes it: the invocation that attaches its parent receives a
//! synthesized construction argument, the node is rebound to that expression
//! and its association becomes a concrete argument position. Materializing a
//! node that already has an expression returns that expression unchanged.

use crate::{
    error::{NoAttachPointSnafu, NotMaterializableSnafu, Result},
    event::{Event, EventKind},
    node::{Association, Creation, NodeId},
    source::ExprId,
    tree::Model,
    value::Map,
};
use snafu::{ensure, OptionExt};
use tracing::debug;

impl Model {
    /// Create a detached virtual node backed by `defaults`.
    ///
    /// The node materializes itself from a property-write before-listener, so
    /// other before-listeners registered later already see the persisted form.
    pub fn create_virtual(&mut self, type_name: &str, defaults: Map) -> NodeId {
        let id = self.create_node(type_name, Creation::Virtual { defaults });
        if let Ok(node) = self.node_mut(id) {
            node.association = Association::Empty;
        }
        self.on(EventKind::PropertySetBefore, Some(id), move |model, event| {
            if let Event::PropertySetBefore { node, .. } = event {
                if *node == id {
                    model.materialize(id)?;
                }
            }
            Ok(())
        });
        id
    }

    /// Give a virtual node its persisted form. No-op once materialized.
    pub fn materialize(&mut self, id: NodeId) -> Result<ExprId> {
        let node = self.node(id)?;
        let defaults = match &node.creation {
            Creation::Constructor { expr } => return Ok(*expr),
            Creation::Implicit => return NotMaterializableSnafu { id }.fail(),
            Creation::Virtual { defaults } => defaults.clone(),
        };
        let type_name = node.type_name.clone();
        let owner = node.parent.context(NoAttachPointSnafu { id })?;

        let attach = match self.node(owner)?.association {
            Association::Invocation { attach, .. } => attach,
            _ => return NoAttachPointSnafu { id }.fail(),
        };
        ensure!(
            self.source.has_attach_point(attach),
            NoAttachPointSnafu { id }
        );

        let (expr, index) = self
            .source
            .synthesize_argument(attach, &type_name, &defaults)?;
        let node = self.node_mut(id)?;
        node.creation = Creation::Constructor { expr };
        node.association = Association::Argument { attach, index };
        debug!(%id, %owner, index, "materialized");

        self.publish(&Event::Materialized { node: id })?;
        Ok(expr)
    }
}
