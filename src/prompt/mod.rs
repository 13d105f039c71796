//! Prompt construction.

pub mod builder;
pub mod template;

pub use builder::{FormattedPrompt, PromptBuilder};
pub use template::{ChatMessage, ChatTemplate, Role, CHATML_TEMPLATE};
