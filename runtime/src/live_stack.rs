//! Exclusive-active pass against a stack element in the live instance.
//!
//! The live instance can flip its active child through user interaction
//! without the model noticing, so the pass runs against both separately. The
//! model's choice is only a preference here: if the live stack already has an
//! active child it wins.

use crate::{
    error::Result,
    host::{ElementId, HostBridge, NativeCall},
    session::Session,
};
use weft_model::{reconcile_live, LiveStack, Model, NodeId};

pub struct LiveStackElement<'a> {
    host: &'a mut dyn HostBridge,
    element: ElementId,
}

impl<'a> LiveStackElement<'a> {
    pub fn new(host: &'a mut dyn HostBridge, element: ElementId) -> Self {
        Self { host, element }
    }
}

impl LiveStack for LiveStackElement<'_> {
    type Error = crate::error::HostError;

    fn len(&mut self) -> Result<usize, Self::Error> {
        let call = NativeCall::StackLen {
            element: self.element,
        };
        let len = self.host.invoke(call.clone())?.into_int(&call)?;
        Ok(usize::try_from(len).unwrap_or(0))
    }

    fn is_active(&mut self, index: usize) -> Result<bool, Self::Error> {
        let call = NativeCall::StackIsActive {
            element: self.element,
            index,
        };
        self.host.invoke(call.clone())?.into_bool(&call)
    }

    fn set_active(&mut self, index: usize, active: bool) -> Result<(), Self::Error> {
        self.host.invoke(NativeCall::StackSetActive {
            element: self.element,
            index,
            active,
        })?;
        Ok(())
    }
}

impl Session {
    /// Leave exactly one child of the live stack `element` active, preferring
    /// `preferred` when none is. Returns the active index.
    pub fn reconcile_live_stack(
        &mut self,
        element: ElementId,
        preferred: Option<usize>,
    ) -> Result<Option<usize>> {
        let mut live = LiveStackElement::new(self.host_mut()?, element);
        Ok(reconcile_live(&mut live, preferred)?)
    }

    /// Reconcile the stack container `container` in both the model and the
    /// live instance, where it is rendered as `element`.
    pub fn sync_stack(
        &mut self,
        model: &mut Model,
        container: NodeId,
        element: ElementId,
    ) -> Result<Option<usize>> {
        if let Err(e) = model.reconcile_active(container) {
            tracing::warn!(%container, "Failed to reconcile model stack: {e}");
        }
        self.reconcile_live_stack(element, model.active_index(container))
    }
}
