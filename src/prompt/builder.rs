//! Persona system instruction plus user message, rendered into a model prompt.

use super::template::{ChatMessage, ChatTemplate, Role};
use crate::error::ChatError;
use crate::persona::PersonaDescriptor;

/// A prompt rendered through the chat template, ending exactly where the
/// assistant's turn begins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormattedPrompt(String);

impl FormattedPrompt {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Composes the two-turn instruction sequence for one chat call.
#[derive(Debug, Clone, Copy)]
pub struct PromptBuilder<'a> {
    template: &'a ChatTemplate,
}

impl<'a> PromptBuilder<'a> {
    pub fn new(template: &'a ChatTemplate) -> Self {
        Self { template }
    }

    /// `[system: persona.system_instruction, user: user_message]`, rendered
    /// with the generation cue appended.
    pub fn build(
        &self,
        persona: &PersonaDescriptor,
        user_message: &str,
    ) -> Result<FormattedPrompt, ChatError> {
        let messages = [
            ChatMessage::new(Role::System, persona.system_instruction.as_str()),
            ChatMessage::new(Role::User, user_message),
        ];
        let rendered = self.template.render(&messages, true)?;
        Ok(FormattedPrompt(rendered))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persona::PersonaRegistry;

    #[test]
    fn test_build_places_system_then_user() {
        let registry = PersonaRegistry::builtin(".");
        let yoda = registry.lookup("yoda").unwrap();
        let template = ChatTemplate::chatml().unwrap();

        let prompt = PromptBuilder::new(&template)
            .build(&yoda, "How are you?")
            .unwrap();
        let text = prompt.as_str();

        let system_at = text.find(yoda.system_instruction.as_str()).unwrap();
        let user_at = text.find("How are you?").unwrap();
        assert!(system_at < user_at);
        assert!(text.starts_with("<|im_start|>system\n"));
        assert!(text.ends_with("<|im_start|>assistant\n"));
    }

    #[test]
    fn test_build_is_pure() {
        let registry = PersonaRegistry::builtin(".");
        let mickey = registry.lookup("mickey").unwrap();
        let template = ChatTemplate::chatml().unwrap();
        let builder = PromptBuilder::new(&template);

        let a = builder.build(&mickey, "hello").unwrap();
        let b = builder.build(&mickey, "hello").unwrap();
        assert_eq!(a, b);
    }
}
