//! Character manager: the operations the HTTP layer calls.
//!
//! Every operation returns a serializable response. Failures are reported
//! in the response's `error` / `error_kind` fields, never as a panic.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::GenerationDefaults;
use crate::error::ChatError;
use crate::generation::{Generation, GenerationEngine, GenerationRequest};
use crate::model::ModelHost;
use crate::persona::{PersonaDescriptor, PersonaRegistry};
use crate::prompt::PromptBuilder;
use crate::session::AdapterSession;

/// Result of [`CharacterManager::switch_persona`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SwitchResponse {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
}

/// Result of [`CharacterManager::send_message`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
}

/// Result of [`CharacterManager::get_status`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusResponse {
    pub active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub persona_id: Option<String>,
    /// When the active adapter was attached.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub since: Option<DateTime<Utc>>,
    pub model_loaded: bool,
}

/// Registry entry as shown to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonaSummary {
    pub id: String,
    pub display_name: String,
    pub label: String,
    pub color: String,
    pub description: String,
    /// Whether the adapter is present on disk.
    pub available: bool,
}

impl From<&PersonaDescriptor> for PersonaSummary {
    fn from(persona: &PersonaDescriptor) -> Self {
        Self {
            id: persona.id.clone(),
            display_name: persona.display_name.clone(),
            label: persona.label.clone(),
            color: persona.color.clone(),
            description: persona.description.clone(),
            available: persona.adapter_available(),
        }
    }
}

/// A chat turn with optional sampling overrides.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub max_new_tokens: Option<usize>,
    #[serde(default)]
    pub temperature: Option<f64>,
}

impl ChatRequest {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Self::default()
        }
    }
}

/// Ties the registry, model host, adapter session and generation engine
/// together.
#[derive(Debug)]
pub struct CharacterManager {
    session: AdapterSession,
    engine: GenerationEngine,
    defaults: GenerationDefaults,
}

impl CharacterManager {
    pub fn new(
        registry: Arc<PersonaRegistry>,
        host: Arc<ModelHost>,
        defaults: GenerationDefaults,
    ) -> Self {
        Self {
            session: AdapterSession::new(registry, host),
            engine: GenerationEngine::new(defaults.seed),
            defaults,
        }
    }

    pub fn session(&self) -> &AdapterSession {
        &self.session
    }

    /// Load the base model now instead of on the first switch.
    pub fn preload(&self) -> Result<(), ChatError> {
        self.session.host().ensure_loaded().map(|_| ())
    }

    /// Make `persona_id` the active character.
    pub fn switch_persona(&self, persona_id: &str) -> SwitchResponse {
        match self.session.switch(persona_id) {
            Ok(persona) => SwitchResponse {
                ok: true,
                display_name: Some(persona.display_name.clone()),
                label: Some(persona.label.clone()),
                description: Some(persona.description.clone()),
                ..SwitchResponse::default()
            },
            Err(err) => SwitchResponse {
                ok: false,
                error: Some(err.to_string()),
                error_kind: Some(err.kind().to_string()),
                ..SwitchResponse::default()
            },
        }
    }

    /// Reply to `text` as the active character, with default sampling.
    pub fn send_message(&self, text: &str) -> MessageResponse {
        self.send(ChatRequest::new(text))
    }

    /// Reply to a chat request as the active character.
    pub fn send(&self, request: ChatRequest) -> MessageResponse {
        match self.reply(request) {
            Ok((persona, generation)) => MessageResponse {
                response: Some(generation.text),
                display_name: Some(persona.display_name.clone()),
                label: Some(persona.label.clone()),
                ..MessageResponse::default()
            },
            Err((persona, err)) => MessageResponse {
                display_name: persona.as_ref().map(|p| p.display_name.clone()),
                label: persona.as_ref().map(|p| p.label.clone()),
                error: Some(err.to_string()),
                error_kind: Some(err.kind().to_string()),
                ..MessageResponse::default()
            },
        }
    }

    /// The active character, if any.
    pub fn get_status(&self) -> StatusResponse {
        let model_loaded = self.session.host().is_loaded();
        self.session.with_session(|session| match session.current() {
            Some(attached) => StatusResponse {
                active: true,
                display_name: Some(attached.persona.display_name.clone()),
                label: Some(attached.persona.label.clone()),
                persona_id: Some(attached.persona.id.clone()),
                since: Some(attached.attached_at),
                model_loaded,
            },
            None => StatusResponse {
                model_loaded,
                ..StatusResponse::default()
            },
        })
    }

    /// All configured characters, in configuration order.
    pub fn list_personas(&self) -> Vec<PersonaSummary> {
        self.session
            .registry()
            .list()
            .iter()
            .map(|persona| PersonaSummary::from(&**persona))
            .collect()
    }

    fn reply(
        &self,
        request: ChatRequest,
    ) -> Result<(Arc<PersonaDescriptor>, Generation), (Option<Arc<PersonaDescriptor>>, ChatError)>
    {
        let message = request.message.trim();
        if message.is_empty() {
            return Err((None, ChatError::EmptyMessage));
        }
        let mut params = GenerationRequest::new(message, &self.defaults);
        if let Some(max_new_tokens) = request.max_new_tokens {
            params = params.with_max_new_tokens(max_new_tokens);
        }
        if let Some(temperature) = request.temperature {
            params = params.with_temperature(temperature);
        }

        self.session.with_session(|session| {
            let (persona, template) = match session.current() {
                Some(attached) => (
                    Arc::clone(&attached.persona),
                    Arc::clone(&attached.handle.template),
                ),
                None => return Err((None, ChatError::NoActivePersona)),
            };
            let prompt = PromptBuilder::new(&template)
                .build(&persona, message)
                .map_err(|err| (Some(Arc::clone(&persona)), err))?;
            match self.engine.generate(session, &prompt, &params) {
                Ok(generation) => Ok((persona, generation)),
                Err(err) => Err((Some(persona), err)),
            }
        })
    }
}
