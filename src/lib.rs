//! # persona-chat
//!
//! A single-process character chat server. One base language model stays
//! resident; each character is a LoRA adapter swapped on top of it, and at
//! most one adapter is attached at a time.
//!
//! ```text
//! switch_persona ─► PersonaRegistry ─► ModelHost::ensure_loaded ─► AdapterSession::switch
//! send_message   ─► PromptBuilder   ─► GenerationEngine::generate
//! ```
//!
//! [`manager::CharacterManager`] is the entry point; [`server`] puts it
//! behind HTTP.

pub mod config;
pub mod error;
pub mod generation;
pub mod manager;
pub mod model;
pub mod persona;
pub mod prompt;
pub mod server;
pub mod session;

pub use config::{AppConfig, ConfigError, GenerationDefaults};
pub use error::ChatError;
pub use generation::{Generation, GenerationEngine, GenerationRequest, GenerationResult};
pub use manager::{
    CharacterManager, ChatRequest, MessageResponse, PersonaSummary, StatusResponse,
    SwitchResponse,
};
pub use model::{ModelError, ModelHandle, ModelHost};
pub use persona::{PersonaDescriptor, PersonaRegistry};
pub use prompt::{FormattedPrompt, PromptBuilder};
pub use session::{ActiveSession, AdapterSession};

/// Crate version reported by `/health`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
