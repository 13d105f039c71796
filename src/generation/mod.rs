//! Sampling decode over the active adapter.
//!
//! Nucleus sampling (`top_p = 0.9`) at the requested temperature, with a
//! 1.1 repetition penalty over the whole sequence, stopping at an
//! end-of-sequence token or after `max_new_tokens`. Only the continuation
//! is decoded.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use candle_transformers::generation::LogitsProcessor;
use candle_transformers::utils::apply_repeat_penalty;
use serde::{Deserialize, Serialize};

use crate::config::GenerationDefaults;
use crate::error::ChatError;
use crate::model::{AdaptedModel, ChatTokenizer, ModelError};
use crate::prompt::FormattedPrompt;
use crate::session::ActiveSession;

/// Nucleus sampling threshold.
pub const TOP_P: f64 = 0.9;
/// Penalty applied to every token already in the sequence.
pub const REPETITION_PENALTY: f32 = 1.1;

/// One chat turn's generation parameters.
///
/// Temperature is passed to the sampler as given; range checking is the
/// caller's business.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub message: String,
    pub max_new_tokens: usize,
    pub temperature: f64,
}

impl GenerationRequest {
    pub fn new(message: impl Into<String>, defaults: &GenerationDefaults) -> Self {
        Self {
            message: message.into(),
            max_new_tokens: defaults.max_new_tokens,
            temperature: defaults.temperature,
        }
    }

    pub fn with_max_new_tokens(mut self, max_new_tokens: usize) -> Self {
        self.max_new_tokens = max_new_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }
}

/// Decoded continuation plus token accounting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Generation {
    pub text: String,
    pub prompt_tokens: usize,
    pub new_tokens: usize,
}

pub type GenerationResult = Result<Generation, ChatError>;

/// Drives decoding for the attached adapter.
///
/// Each call samples with its own seed: the base seed plus the number of
/// generations this engine has run so far.
#[derive(Debug)]
pub struct GenerationEngine {
    seed: u64,
    calls: AtomicU64,
}

impl GenerationEngine {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            calls: AtomicU64::new(0),
        }
    }

    fn next_seed(&self) -> u64 {
        self.seed.wrapping_add(self.calls.fetch_add(1, Ordering::Relaxed))
    }

    /// Generate a reply to `prompt` with the session's adapter.
    ///
    /// Fails with [`ChatError::NoActivePersona`] before touching the model
    /// when nothing is attached. Backend failures come back as
    /// [`ChatError::Generation`]; the session stays usable afterwards.
    pub fn generate(
        &self,
        session: &mut ActiveSession,
        prompt: &FormattedPrompt,
        request: &GenerationRequest,
    ) -> GenerationResult {
        let attached = session
            .current_mut()
            .ok_or(ChatError::NoActivePersona)?;
        let seed = self.next_seed();
        let tokenizer = attached.handle.tokenizer.clone();
        let started = Instant::now();

        let result = decode(
            attached.model.as_mut(),
            tokenizer.as_ref(),
            prompt.as_str(),
            request,
            seed,
        );
        match result {
            Ok(generation) => {
                log::debug!(
                    "{} generated {} tokens ({} prompt) in {:.2}s",
                    attached.persona.display_name,
                    generation.new_tokens,
                    generation.prompt_tokens,
                    started.elapsed().as_secs_f64()
                );
                Ok(generation)
            }
            Err(source) => {
                log::error!(
                    "Generation failed for {}: {}",
                    attached.persona.display_name,
                    source
                );
                Err(ChatError::Generation {
                    display_name: attached.persona.display_name.clone(),
                    source,
                })
            }
        }
    }
}

fn decode(
    model: &mut dyn AdaptedModel,
    tokenizer: &dyn ChatTokenizer,
    prompt: &str,
    request: &GenerationRequest,
    seed: u64,
) -> Result<Generation, ModelError> {
    let mut tokens = tokenizer.encode(prompt)?;
    let prompt_len = tokens.len();
    if prompt_len == 0 {
        return Err(ModelError::tokenizer("prompt encodes to no tokens"));
    }
    let eos = tokenizer.eos_token_ids();
    let mut sampler = LogitsProcessor::new(seed, Some(request.temperature), Some(TOP_P));

    model.clear_kv_cache();
    for step in 0..request.max_new_tokens {
        // The first pass feeds the whole prompt; later passes only the newest token.
        let offset = if step == 0 { 0 } else { tokens.len() - 1 };
        let logits = model.forward(&tokens[offset..], offset)?;
        let logits = apply_repeat_penalty(&logits, REPETITION_PENALTY, &tokens)?;
        let next = sampler.sample(&logits)?;
        if eos.contains(&next) {
            break;
        }
        tokens.push(next);
    }

    let continuation = &tokens[prompt_len..];
    let text = tokenizer.decode(continuation, true)?;
    Ok(Generation {
        text: text.trim().to_string(),
        prompt_tokens: prompt_len,
        new_tokens: continuation.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::mock::{adapter_dir, Counters, MockLoader, DEFAULT_SCRIPT};
    use crate::model::ModelHost;
    use crate::persona::PersonaRegistry;
    use crate::prompt::{ChatTemplate, PromptBuilder};
    use crate::session::AdapterSession;
    use std::sync::Arc;

    fn yoda_session(markers: &[(&str, &str)]) -> (tempfile::TempDir, AdapterSession, Counters) {
        let dir = tempfile::tempdir().unwrap();
        adapter_dir(dir.path(), "yoda-lora-adapter", markers);
        let loader = MockLoader::new();
        let counters = loader.counters();
        let session = AdapterSession::new(
            Arc::new(PersonaRegistry::builtin(dir.path())),
            Arc::new(ModelHost::new(loader)),
        );
        session.switch("yoda").unwrap();
        (dir, session, counters)
    }

    fn prompt_for(session: &AdapterSession, message: &str) -> FormattedPrompt {
        let persona = session.active_persona().unwrap();
        let template = ChatTemplate::chatml().unwrap();
        PromptBuilder::new(&template).build(&persona, message).unwrap()
    }

    fn request(message: &str) -> GenerationRequest {
        GenerationRequest::new(message, &GenerationDefaults::default())
    }

    #[test]
    fn test_continuation_only() {
        let (_dir, session, _) = yoda_session(&[]);
        let prompt = prompt_for(&session, "How are you?");
        let engine = GenerationEngine::new(7);

        let generation = session
            .with_session(|s| engine.generate(s, &prompt, &request("How are you?")))
            .unwrap();
        assert_eq!(generation.text, DEFAULT_SCRIPT);
        assert_eq!(generation.new_tokens, 7);
        assert!(generation.prompt_tokens > 0);
        assert!(!generation.text.contains("im_start"));
        assert!(!generation.text.contains("How are you?"));
    }

    #[test]
    fn test_max_new_tokens_bounds_output() {
        let (_dir, session, counters) = yoda_session(&[]);
        let prompt = prompt_for(&session, "Hi");
        let engine = GenerationEngine::new(7);

        let generation = session
            .with_session(|s| engine.generate(s, &prompt, &request("Hi").with_max_new_tokens(2)))
            .unwrap();
        assert_eq!(generation.text, "Hmm. Strong");
        assert_eq!(generation.new_tokens, 2);
        assert_eq!(
            counters.forwards.load(std::sync::atomic::Ordering::SeqCst),
            2
        );
    }

    #[test]
    fn test_stops_at_end_of_sequence() {
        let (_dir, session, _) = yoda_session(&[("script", "Hot dog!")]);
        let prompt = prompt_for(&session, "Lunch?");
        let engine = GenerationEngine::new(7);

        let generation = session
            .with_session(|s| engine.generate(s, &prompt, &request("Lunch?")))
            .unwrap();
        assert_eq!(generation.text, "Hot dog!");
        assert_eq!(generation.new_tokens, 2);
    }

    #[test]
    fn test_backend_failure_is_reported_and_session_survives() {
        let (_dir, session, _) = yoda_session(&[("oom", "")]);
        let prompt = prompt_for(&session, "Hi");
        let engine = GenerationEngine::new(7);

        let err = session
            .with_session(|s| engine.generate(s, &prompt, &request("Hi")))
            .unwrap_err();
        assert_eq!(err.kind(), "generation_failure");
        assert!(err.to_string().contains("Yoda"));
        assert!(err.to_string().contains("out of memory"));

        assert_eq!(session.active_persona().unwrap().id, "yoda");
        let again = session.with_session(|s| engine.generate(s, &prompt, &request("Hi")));
        assert!(again.is_err());
    }

    #[test]
    fn test_no_active_persona_never_calls_model() {
        let engine = GenerationEngine::new(7);
        let mut empty = ActiveSession::empty();
        let prompt = {
            let registry = PersonaRegistry::builtin(".");
            let template = ChatTemplate::chatml().unwrap();
            PromptBuilder::new(&template)
                .build(&registry.lookup("yoda").unwrap(), "Hi")
                .unwrap()
        };
        let err = engine.generate(&mut empty, &prompt, &request("Hi")).unwrap_err();
        assert!(matches!(err, ChatError::NoActivePersona));
    }

    #[test]
    fn test_each_call_gets_its_own_seed() {
        let engine = GenerationEngine::new(u64::MAX);
        assert_eq!(engine.next_seed(), u64::MAX);
        assert_eq!(engine.next_seed(), 0);
        assert_eq!(engine.next_seed(), 1);

        let other = GenerationEngine::new(u64::MAX);
        assert_eq!(other.next_seed(), u64::MAX);
    }

    #[test]
    fn test_request_overrides() {
        let req = request("Hi").with_max_new_tokens(10).with_temperature(1.3);
        assert_eq!(req.max_new_tokens, 10);
        assert_eq!(req.temperature, 1.3);
        assert_eq!(request("Hi").max_new_tokens, 50);
    }
}
