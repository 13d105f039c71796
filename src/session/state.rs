//! The active-session value guarded by [`AdapterSession`](super::AdapterSession).

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::model::{AdaptedModel, ModelHandle};
use crate::persona::PersonaDescriptor;

/// A persona together with the adapter that realizes it.
#[derive(Debug)]
pub struct AttachedAdapter {
    pub persona: Arc<PersonaDescriptor>,
    pub model: Box<dyn AdaptedModel>,
    pub handle: ModelHandle,
    pub attached_at: DateTime<Utc>,
}

/// Either nothing, or exactly one attached persona.
///
/// The persona and its adapter live in one value, so one is never present
/// without the other.
#[derive(Debug, Default)]
pub struct ActiveSession(Option<AttachedAdapter>);

impl ActiveSession {
    pub fn empty() -> Self {
        Self(None)
    }

    pub fn current(&self) -> Option<&AttachedAdapter> {
        self.0.as_ref()
    }

    pub fn current_mut(&mut self) -> Option<&mut AttachedAdapter> {
        self.0.as_mut()
    }

    pub fn persona(&self) -> Option<&Arc<PersonaDescriptor>> {
        self.0.as_ref().map(|attached| &attached.persona)
    }

    pub fn adapter_location(&self) -> Option<&Path> {
        self.0.as_ref().map(|attached| attached.model.adapter_location())
    }

    /// Remove the attached adapter, handing ownership to the caller.
    pub(crate) fn take(&mut self) -> Option<AttachedAdapter> {
        self.0.take()
    }

    pub(crate) fn install(&mut self, attached: AttachedAdapter) {
        self.0 = Some(attached);
    }
}
