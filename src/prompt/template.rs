//! Chat templates: how a tokenizer expects role-tagged turns to be laid out.
//!
//! Templates are tera sources rendered with two variables:
//! `messages` (a list of `{role, content}`) and `add_generation_prompt`.

use std::path::Path;

use serde::Serialize;
use tera::{Context, Tera};

use crate::model::ModelError;

const TEMPLATE_NAME: &str = "chat";

/// ChatML, the convention used by the Qwen2 instruct models.
pub const CHATML_TEMPLATE: &str = "{% for message in messages %}<|im_start|>{{ message.role }}
{{ message.content }}<|im_end|>
{% endfor %}{% if add_generation_prompt %}<|im_start|>assistant
{% endif %}";

/// Speaker of a chat turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
}

/// One role-tagged turn.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// A compiled chat template.
#[derive(Debug)]
pub struct ChatTemplate {
    tera: Tera,
}

impl ChatTemplate {
    /// Compile a template from source.
    pub fn new(source: &str) -> Result<Self, tera::Error> {
        let mut tera = Tera::default();
        tera.add_raw_template(TEMPLATE_NAME, source)?;
        Ok(Self { tera })
    }

    /// The built-in ChatML template.
    pub fn chatml() -> Result<Self, tera::Error> {
        Self::new(CHATML_TEMPLATE)
    }

    /// Compile a template stored in a file.
    pub fn from_file(path: &Path) -> Result<Self, ModelError> {
        if !path.exists() {
            return Err(ModelError::MissingArtifact(path.to_path_buf()));
        }
        let source = std::fs::read_to_string(path)?;
        Ok(Self::new(&source)?)
    }

    /// Render `messages`, optionally ending with the assistant-turn cue.
    pub fn render(
        &self,
        messages: &[ChatMessage],
        add_generation_prompt: bool,
    ) -> Result<String, tera::Error> {
        let mut context = Context::new();
        context.insert("messages", messages);
        context.insert("add_generation_prompt", &add_generation_prompt);
        self.tera.render(TEMPLATE_NAME, &context)
    }
}
