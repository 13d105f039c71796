//! Error taxonomy for the character/session core.
//!
//! Every core operation returns a tagged [`ChatError`] instead of panicking.
//! Lookup and adapter-existence failures are detected before any expensive
//! work; load and generation failures are caught at their boundary and
//! wrapped with the persona or artifact that failed.

use std::path::PathBuf;

use thiserror::Error;

use crate::model::ModelError;

/// Failures reported by the core to its host.
#[derive(Debug, Error)]
pub enum ChatError {
    /// The requested persona id is not in the registry.
    #[error("Unknown character '{0}'")]
    UnknownPersona(String),

    /// The persona exists but its adapter has not been provisioned yet.
    #[error("Failed to load {display_name}: no adapter at {}. Make sure the model is trained!", location.display())]
    AdapterNotFound {
        display_name: String,
        location: PathBuf,
    },

    /// The base model or an adapter could not be initialized.
    #[error("Failed to load {target}: {source}")]
    Load {
        target: String,
        #[source]
        source: ModelError,
    },

    /// Generation attempted before any switch succeeded.
    #[error("Please select a character first!")]
    NoActivePersona,

    /// The message was empty after trimming.
    #[error("Empty message")]
    EmptyMessage,

    /// The chat template could not be rendered.
    #[error("Failed to build prompt: {0}")]
    Prompt(#[from] tera::Error),

    /// Decoding failed part-way (out of memory, bad input, ...).
    #[error("Error generating response as {display_name}: {source}")]
    Generation {
        display_name: String,
        #[source]
        source: ModelError,
    },
}

impl ChatError {
    /// Stable machine-readable tag for this failure.
    pub fn kind(&self) -> &'static str {
        match self {
            ChatError::UnknownPersona(_) => "unknown_persona",
            ChatError::AdapterNotFound { .. } => "adapter_not_found",
            ChatError::Load { .. } => "load_error",
            ChatError::NoActivePersona => "no_active_persona",
            ChatError::EmptyMessage => "empty_message",
            ChatError::Prompt(_) => "prompt_error",
            ChatError::Generation { .. } => "generation_failure",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adapter_not_found_names_persona_and_path() {
        let err = ChatError::AdapterNotFound {
            display_name: "Mickey Mouse".into(),
            location: PathBuf::from("./mickey-lora-adapter"),
        };
        let msg = err.to_string();
        assert!(msg.contains("Mickey Mouse"));
        assert!(msg.contains("mickey-lora-adapter"));
        assert_eq!(err.kind(), "adapter_not_found");
    }

    #[test]
    fn test_generation_failure_wraps_model_error() {
        let err = ChatError::Generation {
            display_name: "Yoda".into(),
            source: ModelError::Candle(candle_core::Error::Msg("out of memory".into())),
        };
        assert!(err.to_string().contains("Yoda"));
        assert!(err.to_string().contains("out of memory"));
        assert_eq!(err.kind(), "generation_failure");
    }

    #[test]
    fn test_kinds_are_distinct() {
        let kinds = [
            ChatError::UnknownPersona("x".into()).kind(),
            ChatError::NoActivePersona.kind(),
            ChatError::EmptyMessage.kind(),
        ];
        assert_ne!(kinds[0], kinds[1]);
        assert_ne!(kinds[1], kinds[2]);
    }
}
