//! The seam between a session and whatever hosts the live instance.
//!
//! A [`HostBridge`] owns one live instance. Everything the session needs from
//! inside that instance goes through [`HostBridge::invoke`] as a typed
//! [`NativeCall`], so a host may be an external process ([`ProcessHost`]), an
//! embedded interpreter, or a simulation in tests.
//!
//! Hosts are chosen by [`HostFactory`]s: each factory is asked in turn and may
//! decline a module whose runtime version it does not speak.

mod process;

pub use process::{ProcessHost, ProcessHostFactory};

use crate::{
    error::{HostError, UnexpectedValueSnafu},
    module::ModuleDescriptor,
};
use serde::{Deserialize, Serialize};
use std::{fmt, sync::Arc, time::Duration};

/// Opaque handle to an element inside the live instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ElementId(pub u64);

impl fmt::Display for ElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "e{}", self.0)
    }
}

/// What the host reports about its embedded runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeInfo {
    pub version: String,
    pub user_agent: String,
}

/// A call into the live instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "call", rename_all = "snake_case")]
pub enum NativeCall {
    /// Re-fetch every stylesheet linked from the page.
    ReloadStyles,
    /// Whether every image in the page has finished loading.
    ImagesComplete,
    /// Fire the window-closed handlers once.
    WindowClosed,
    /// Keep close handlers from firing again.
    DisableCloseHandlers,
    /// Drop window-level listeners installed by the bootstrap page.
    CleanupEvents,
    RootElement,
    EnableScrolling { enabled: bool },
    ComputedStyle { element: ElementId, property: String },
    IntAttribute { element: ElementId, name: String },
    AbsolutePosition { element: ElementId },
    StackLen { element: ElementId },
    StackIsActive { element: ElementId, index: usize },
    StackSetActive { element: ElementId, index: usize, active: bool },
}

impl NativeCall {
    pub fn name(&self) -> &'static str {
        match self {
            NativeCall::ReloadStyles => "reload_styles",
            NativeCall::ImagesComplete => "images_complete",
            NativeCall::WindowClosed => "window_closed",
            NativeCall::DisableCloseHandlers => "disable_close_handlers",
            NativeCall::CleanupEvents => "cleanup_events",
            NativeCall::RootElement => "root_element",
            NativeCall::EnableScrolling { .. } => "enable_scrolling",
            NativeCall::ComputedStyle { .. } => "computed_style",
            NativeCall::IntAttribute { .. } => "int_attribute",
            NativeCall::AbsolutePosition { .. } => "absolute_position",
            NativeCall::StackLen { .. } => "stack_len",
            NativeCall::StackIsActive { .. } => "stack_is_active",
            NativeCall::StackSetActive { .. } => "stack_set_active",
        }
    }
}

/// Result of a [`NativeCall`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum NativeValue {
    Unit,
    Null,
    Bool(bool),
    Int(i64),
    Text(String),
    Element(ElementId),
    Point { x: i64, y: i64 },
}

impl NativeValue {
    pub fn into_bool(self, call: &NativeCall) -> Result<bool, HostError> {
        match self {
            NativeValue::Bool(value) => Ok(value),
            _ => unexpected("a boolean", call),
        }
    }

    pub fn into_int(self, call: &NativeCall) -> Result<i64, HostError> {
        match self {
            NativeValue::Int(value) => Ok(value),
            _ => unexpected("an integer", call),
        }
    }

    /// Text, or `None` when the runtime has no value for it.
    pub fn into_text(self, call: &NativeCall) -> Result<Option<String>, HostError> {
        match self {
            NativeValue::Text(value) => Ok(Some(value)),
            NativeValue::Null => Ok(None),
            _ => unexpected("text", call),
        }
    }

    pub fn into_element(self, call: &NativeCall) -> Result<ElementId, HostError> {
        match self {
            NativeValue::Element(id) => Ok(id),
            _ => unexpected("an element", call),
        }
    }

    pub fn into_point(self, call: &NativeCall) -> Result<(i64, i64), HostError> {
        match self {
            NativeValue::Point { x, y } => Ok((x, y)),
            _ => unexpected("a point", call),
        }
    }
}

fn unexpected<T>(expected: &'static str, call: &NativeCall) -> Result<T, HostError> {
    UnexpectedValueSnafu {
        expected,
        call: call.name(),
    }
    .fail()
}

/// Resources the hosting runtime produces on demand.
///
/// Called from the resource server thread while the session thread may be
/// inside a host call, so implementations must not depend on the session.
pub trait GeneratedResources: Send + Sync {
    fn generated_resource(&self, path: &str) -> Option<Vec<u8>>;
}

/// No generated resources at all.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoGenerated;

impl GeneratedResources for NoGenerated {
    fn generated_resource(&self, _path: &str) -> Option<Vec<u8>> {
        None
    }
}

/// One live instance of the rendered UI.
pub trait HostBridge {
    fn runtime_info(&self) -> &RuntimeInfo;

    fn set_viewport(&mut self, width: u32, height: u32) -> Result<(), HostError>;

    /// Load the bootstrap page at `url` and wait until the module is running.
    ///
    /// `timeout` of `None` waits indefinitely.
    fn startup(
        &mut self,
        url: &str,
        module_id: &str,
        timeout: Option<Duration>,
    ) -> Result<(), HostError>;

    fn activate(&mut self) -> Result<(), HostError>;

    fn invoke(&mut self, call: NativeCall) -> Result<NativeValue, HostError>;

    fn generated_resources(&self) -> Arc<dyn GeneratedResources>;

    /// Let the live instance process pending work.
    fn pump_messages(&mut self);

    /// PNG encoded capture of the current rendering.
    fn screenshot(&mut self) -> Result<Vec<u8>, HostError>;

    /// Errors the runtime logged so far.
    fn error_log(&self) -> String;

    fn is_disposed(&self) -> bool;

    fn dispose(&mut self) -> Result<(), HostError>;
}

pub trait HostFactory {
    /// Create a host for the module, or `None` when `runtime_version` is not
    /// one this factory speaks.
    fn create(
        &self,
        runtime_version: &str,
        module: &dyn ModuleDescriptor,
    ) -> Result<Option<Box<dyn HostBridge>>, HostError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn calls_serialize_with_tag() {
        let call = NativeCall::ComputedStyle {
            element: ElementId(4),
            property: "margin-top".into(),
        };
        let json = serde_json::to_value(&call).unwrap();
        assert_eq!(json["call"], "computed_style");
        assert_eq!(json["element"], 4);
        assert_eq!(call.name(), "computed_style");
    }

    #[test]
    fn unit_calls_serialize() {
        let json = serde_json::to_string(&NativeCall::ReloadStyles).unwrap();
        assert_eq!(json, r#"{"call":"reload_styles"}"#);
    }

    #[test]
    fn values_roundtrip_through_json() {
        let value: NativeValue = serde_json::from_str(r#"{"type":"bool","value":true}"#).unwrap();
        assert!(value.into_bool(&NativeCall::ImagesComplete).unwrap());

        let value: NativeValue = serde_json::from_str(r#"{"type":"null"}"#).unwrap();
        assert_eq!(value.into_text(&NativeCall::RootElement).unwrap(), None);
    }

    #[test]
    fn wrong_value_type_is_reported() {
        let err = NativeValue::Int(1)
            .into_bool(&NativeCall::ImagesComplete)
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Expected a boolean from `images_complete`"
        );
    }
}
