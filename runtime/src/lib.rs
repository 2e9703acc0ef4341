//! Runtime bridge between the design model and a live rendered instance.
//!
//! A [`Session`] renders a bootstrap page for a [`ModuleDescriptor`], serves
//! it through the shared [`ResourceServer`] and starts it in an external
//! process behind the [`HostBridge`] seam. Once running, the session answers
//! geometry queries, keeps stack containers in agreement with the model and
//! hot-reloads stylesheets through a marker handshake (see [`styles`]).
//!
//! The host is selected per module runtime version from the installed
//! [`HostFactory`]s. [`ProcessHost`] speaks JSON lines over stdio.

pub mod bootstrap;
pub mod config;
pub mod error;
pub mod geometry;
pub mod host;
pub mod live_stack;
pub mod module;
pub mod server;
pub mod session;
pub mod styles;
pub mod wait;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use config::RuntimeConfig;
pub use error::{Error, HostError, Result};
pub use geometry::{value_px, Insets, Rect};
pub use host::{
    ElementId, GeneratedResources, HostBridge, HostFactory, NativeCall, NativeValue,
    NoGenerated, ProcessHost, ProcessHostFactory, RuntimeInfo,
};
pub use live_stack::LiveStackElement;
pub use module::{DirModule, ModuleDescriptor};
pub use server::{ResourceProvider, ResourceRegistry, ResourceServer};
pub use session::{Session, SessionRegistry};
pub use styles::StyleWait;
pub use wait::poll_until;
