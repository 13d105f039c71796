//! Swapping the active persona's adapter on the shared base model.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use super::state::{ActiveSession, AttachedAdapter};
use crate::error::ChatError;
use crate::model::{ModelError, ModelHandle, ModelHost};
use crate::persona::{PersonaDescriptor, PersonaRegistry};

/// Owns the single active persona and its adapter.
///
/// The active adapter is one mutually exclusive resource: a switch holds
/// the lock while it swaps, and generation holds it (through
/// [`with_session`](Self::with_session)) for the whole decode, so the two
/// never interleave.
#[derive(Debug)]
pub struct AdapterSession {
    registry: Arc<PersonaRegistry>,
    host: Arc<ModelHost>,
    active: Mutex<ActiveSession>,
}

impl AdapterSession {
    pub fn new(registry: Arc<PersonaRegistry>, host: Arc<ModelHost>) -> Self {
        Self {
            registry,
            host,
            active: Mutex::new(ActiveSession::empty()),
        }
    }

    pub fn registry(&self) -> &PersonaRegistry {
        &self.registry
    }

    pub fn host(&self) -> &ModelHost {
        &self.host
    }

    /// Make `persona_id` the active persona.
    ///
    /// Lookup, adapter presence and the base model load are checked before
    /// the session is touched. The old adapter is released before the new
    /// one is attached. If attaching fails, the previous persona is
    /// re-attached; if that fails too, the session is left empty.
    /// Switching to the already active persona re-attaches it.
    pub fn switch(&self, persona_id: &str) -> Result<Arc<PersonaDescriptor>, ChatError> {
        let persona = self.registry.lookup(persona_id)?;
        if !persona.adapter_available() {
            log::warn!(
                "Adapter for {} not found at {}",
                persona.display_name,
                persona.adapter_location.display()
            );
            return Err(ChatError::AdapterNotFound {
                display_name: persona.display_name.clone(),
                location: persona.adapter_location.clone(),
            });
        }
        let handle = self.host.ensure_loaded()?;

        let mut active = self.active.lock();
        let previous = active.take().map(|old| {
            log::debug!("Releasing adapter for {}", old.persona.display_name);
            (Arc::clone(&old.persona), old.attached_at)
        });

        match attach(&handle, &persona, Utc::now()) {
            Ok(attached) => {
                active.install(attached);
                log::info!("Switched to {}", persona.display_name);
                Ok(persona)
            }
            Err(source) => {
                log::error!(
                    "Failed to attach adapter for {}: {}",
                    persona.display_name,
                    source
                );
                if let Some((previous, since)) = previous {
                    match attach(&handle, &previous, since) {
                        Ok(attached) => {
                            active.install(attached);
                            log::info!("Restored {}", previous.display_name);
                        }
                        Err(e) => log::error!(
                            "Could not restore {}, no persona is active: {}",
                            previous.display_name,
                            e
                        ),
                    }
                }
                Err(ChatError::Load {
                    target: format!("adapter for {}", persona.display_name),
                    source,
                })
            }
        }
    }

    /// The active persona, if any.
    pub fn active_persona(&self) -> Option<Arc<PersonaDescriptor>> {
        self.active.lock().persona().cloned()
    }

    /// Directory of the attached adapter, if any.
    pub fn attached_adapter_location(&self) -> Option<std::path::PathBuf> {
        self.active
            .lock()
            .adapter_location()
            .map(|path| path.to_path_buf())
    }

    /// Run `f` with exclusive access to the active session.
    pub fn with_session<R>(&self, f: impl FnOnce(&mut ActiveSession) -> R) -> R {
        let mut active = self.active.lock();
        f(&mut active)
    }
}

fn attach(
    handle: &ModelHandle,
    persona: &Arc<PersonaDescriptor>,
    attached_at: DateTime<Utc>,
) -> Result<AttachedAdapter, ModelError> {
    let model = handle.model.attach_adapter(&persona.adapter_location)?;
    Ok(AttachedAdapter {
        persona: Arc::clone(persona),
        model,
        handle: handle.clone(),
        attached_at,
    })
}
