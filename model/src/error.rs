use crate::node::NodeId;
use snafu::Snafu;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Structural failures of the model tree.
///
/// These indicate a logic error in the caller or in a listener and are never
/// retried.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("Unknown node {id}"))]
    UnknownNode { id: NodeId },

    #[snafu(display("Node {child} is already attached to {parent}"))]
    AlreadyAttached { child: NodeId, parent: NodeId },

    #[snafu(display("Node {id} is not attached to a parent"))]
    Detached { id: NodeId },

    #[snafu(display("Node {child} is not a child of {parent}"))]
    NotAChild { parent: NodeId, child: NodeId },

    #[snafu(display("Cannot place {child} inside its own subtree"))]
    Cycle { child: NodeId },

    #[snafu(display("Association of {id} is already bound"))]
    AssociationBound { id: NodeId },

    #[snafu(display("Node {id} is not virtual and has no persisted form to materialize"))]
    NotMaterializable { id: NodeId },

    #[snafu(display("No attach point for {id} on its parent"))]
    NoAttachPoint { id: NodeId },

    #[snafu(display("Node {id} carries {count} companion nodes"))]
    DuplicateCompanion { id: NodeId, count: usize },

    #[snafu(display("Node {id} is not a stack container"))]
    NotAStack { id: NodeId },

    #[snafu(display("Node {id} already has a container policy"))]
    PolicyInstalled { id: NodeId },

    #[snafu(display("Persistence error: {message}"))]
    Persistence { message: String },

    #[snafu(display("Listener failed: {message}"))]
    Listener { message: String },
}
