//! `tokenizers`-backed [`ChatTokenizer`].

use std::path::Path;

use serde_json::Value;
use tokenizers::Tokenizer;

use crate::model::{ChatTokenizer, ModelError};

/// End-of-turn markers tried when `generation_config.json` is absent.
const FALLBACK_EOS_TOKENS: [&str; 3] = ["<|im_end|>", "<|endoftext|>", "</s>"];

pub struct HfTokenizer {
    inner: Tokenizer,
    eos: Vec<u32>,
}

impl HfTokenizer {
    /// Load `tokenizer.json`; end-of-sequence ids come from
    /// `generation_config.json` when given, else from well-known markers.
    pub fn from_files(
        tokenizer_json: &Path,
        generation_config: Option<&Path>,
    ) -> Result<Self, ModelError> {
        let inner = Tokenizer::from_file(tokenizer_json).map_err(ModelError::tokenizer)?;

        let mut eos = match generation_config {
            Some(path) => eos_from_generation_config(path)?,
            None => Vec::new(),
        };
        if eos.is_empty() {
            eos = FALLBACK_EOS_TOKENS
                .iter()
                .filter_map(|token| inner.token_to_id(token))
                .collect();
        }
        if eos.is_empty() {
            return Err(ModelError::Tokenizer(format!(
                "{} defines no end-of-sequence token",
                tokenizer_json.display()
            )));
        }

        Ok(Self { inner, eos })
    }
}

fn eos_from_generation_config(path: &Path) -> Result<Vec<u32>, ModelError> {
    let value: Value = serde_json::from_slice(&std::fs::read(path)?)?;
    let ids: Vec<u64> = match &value["eos_token_id"] {
        Value::Number(n) => n.as_u64().into_iter().collect(),
        Value::Array(items) => items.iter().filter_map(Value::as_u64).collect(),
        _ => Vec::new(),
    };
    Ok(ids.into_iter().map(|id| id as u32).collect())
}

impl ChatTokenizer for HfTokenizer {
    fn encode(&self, text: &str) -> Result<Vec<u32>, ModelError> {
        let encoding = self.inner.encode(text, true).map_err(ModelError::tokenizer)?;
        Ok(encoding.get_ids().to_vec())
    }

    fn decode(&self, ids: &[u32], skip_special_tokens: bool) -> Result<String, ModelError> {
        self.inner
            .decode(ids, skip_special_tokens)
            .map_err(ModelError::tokenizer)
    }

    fn eos_token_ids(&self) -> &[u32] {
        &self.eos
    }
}

impl std::fmt::Debug for HfTokenizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HfTokenizer")
            .field("vocab_size", &self.inner.get_vocab_size(true))
            .field("eos", &self.eos)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generation_config_eos_forms() {
        let dir = tempfile::tempdir().unwrap();
        let single = dir.path().join("single.json");
        std::fs::write(&single, r#"{"eos_token_id": 151645}"#).unwrap();
        assert_eq!(eos_from_generation_config(&single).unwrap(), vec![151645]);

        let list = dir.path().join("list.json");
        std::fs::write(&list, r#"{"eos_token_id": [151645, 151643]}"#).unwrap();
        assert_eq!(
            eos_from_generation_config(&list).unwrap(),
            vec![151645, 151643]
        );

        let none = dir.path().join("none.json");
        std::fs::write(&none, r#"{"do_sample": true}"#).unwrap();
        assert!(eos_from_generation_config(&none).unwrap().is_empty());
    }

    #[test]
    fn test_missing_tokenizer_file() {
        let err = HfTokenizer::from_files(Path::new("/missing/tokenizer.json"), None).unwrap_err();
        assert!(matches!(err, ModelError::Tokenizer(_)));
    }
}
