//! Scripted in-memory backend for unit tests.
//!
//! Adapter directories steer the mock through marker files:
//! - `broken`: attaching fails
//! - `oom`: every forward pass fails
//! - `script`: whitespace-separated words the model will emit, in order

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use candle_core::{Device, Tensor};

use super::{AdaptedModel, BaseModel, ChatTokenizer, ModelError, ModelHandle, ModelLoader};
use crate::prompt::ChatTemplate;

pub(crate) const VOCAB: &[&str] = &[
    "<eos>", "<unk>", "Hmm.", "Strong", "with", "the", "Force,", "you", "are.", "Oh", "boy!",
    "Hot", "dog!",
];
pub(crate) const EOS: u32 = 0;
pub(crate) const DEFAULT_SCRIPT: &str = "Hmm. Strong with the Force, you are.";

fn word_id(word: &str) -> u32 {
    VOCAB.iter().position(|w| *w == word).unwrap_or(1) as u32
}

#[derive(Debug)]
pub(crate) struct MockTokenizer {
    eos: Vec<u32>,
}

impl ChatTokenizer for MockTokenizer {
    fn encode(&self, text: &str) -> Result<Vec<u32>, ModelError> {
        Ok(text.split_whitespace().map(word_id).collect())
    }

    fn decode(&self, ids: &[u32], skip_special_tokens: bool) -> Result<String, ModelError> {
        let mut words = Vec::with_capacity(ids.len());
        for &id in ids {
            if skip_special_tokens && id == EOS {
                continue;
            }
            let word = VOCAB
                .get(id as usize)
                .ok_or_else(|| ModelError::Tokenizer(format!("unknown id {id}")))?;
            words.push(*word);
        }
        Ok(format!(" {} ", words.join(" ")))
    }

    fn eos_token_ids(&self) -> &[u32] {
        &self.eos
    }
}

#[derive(Debug, Default, Clone)]
pub(crate) struct Counters {
    pub loads: Arc<AtomicUsize>,
    pub attaches: Arc<AtomicUsize>,
    pub live_adapters: Arc<AtomicUsize>,
    pub forwards: Arc<AtomicUsize>,
}

#[derive(Debug)]
struct MockBase {
    counters: Counters,
}

impl BaseModel for MockBase {
    fn attach_adapter(&self, adapter_dir: &Path) -> Result<Box<dyn AdaptedModel>, ModelError> {
        if adapter_dir.join("broken").exists() {
            return Err(ModelError::AdapterMismatch(format!(
                "{} does not fit the base model",
                adapter_dir.display()
            )));
        }
        let script = match std::fs::read_to_string(adapter_dir.join("script")) {
            Ok(text) => text,
            Err(_) => DEFAULT_SCRIPT.to_string(),
        };
        self.counters.attaches.fetch_add(1, Ordering::SeqCst);
        self.counters.live_adapters.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockModel {
            location: adapter_dir.to_path_buf(),
            script: script.split_whitespace().map(word_id).collect(),
            step: 0,
            fail: adapter_dir.join("oom").exists(),
            counters: self.counters.clone(),
        }))
    }
}

#[derive(Debug)]
struct MockModel {
    location: PathBuf,
    script: Vec<u32>,
    step: usize,
    fail: bool,
    counters: Counters,
}

impl AdaptedModel for MockModel {
    fn forward(&mut self, _input_ids: &[u32], _seqlen_offset: usize) -> Result<Tensor, ModelError> {
        self.counters.forwards.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(ModelError::Candle(candle_core::Error::Msg(
                "CUDA out of memory".into(),
            )));
        }
        let next = self.script.get(self.step).copied().unwrap_or(EOS);
        self.step += 1;
        let mut logits = vec![0f32; VOCAB.len()];
        logits[next as usize] = 20.0;
        Ok(Tensor::new(logits.as_slice(), &Device::Cpu)?)
    }

    fn clear_kv_cache(&mut self) {
        self.step = 0;
    }

    fn adapter_location(&self) -> &Path {
        &self.location
    }
}

impl Drop for MockModel {
    fn drop(&mut self) {
        self.counters.live_adapters.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Loader producing the mock backend; fails the first `fail_first` loads.
pub(crate) struct MockLoader {
    counters: Counters,
    fail_first: usize,
}

impl MockLoader {
    pub fn new() -> Self {
        Self {
            counters: Counters::default(),
            fail_first: 0,
        }
    }

    pub fn failing_first(mut self, n: usize) -> Self {
        self.fail_first = n;
        self
    }

    pub fn counters(&self) -> Counters {
        self.counters.clone()
    }

    pub fn load_count(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.counters.loads)
    }
}

impl ModelLoader for MockLoader {
    fn load(&self) -> Result<ModelHandle, ModelError> {
        let attempt = self.counters.loads.fetch_add(1, Ordering::SeqCst);
        if attempt < self.fail_first {
            return Err(ModelError::MissingArtifact(PathBuf::from(
                "mock/model.safetensors",
            )));
        }
        Ok(ModelHandle {
            model: Arc::new(MockBase {
                counters: self.counters.clone(),
            }),
            tokenizer: Arc::new(MockTokenizer { eos: vec![EOS] }),
            template: Arc::new(ChatTemplate::chatml()?),
        })
    }

    fn describe(&self) -> String {
        "mock".to_string()
    }
}

/// Create an adapter directory under `root` with optional marker files.
pub(crate) fn adapter_dir(root: &Path, name: &str, markers: &[(&str, &str)]) -> PathBuf {
    let dir = root.join(name);
    std::fs::create_dir_all(&dir).unwrap();
    for (file, content) in markers {
        std::fs::write(dir.join(file), content).unwrap();
    }
    dir
}
