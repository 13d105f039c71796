//! The shared base model, its tokenizer and adapters.
//!
//! The core only talks to the inference backend through the traits below:
//!
//! ```text
//! ModelLoader::load()            (once per process, via ModelHost)
//!   ↓
//! ModelHandle { BaseModel, ChatTokenizer, ChatTemplate }
//!   ↓  BaseModel::attach_adapter(dir)
//! Box<dyn AdaptedModel>          (owned by the active session)
//! ```
//!
//! [`candle`] is the production backend.

pub mod candle;
pub mod error;
pub mod host;

#[cfg(test)]
pub(crate) mod mock;

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use candle_core::Tensor;

pub use error::ModelError;
pub use host::ModelHost;

use crate::prompt::ChatTemplate;

/// Text ↔ token conversion for the base model.
pub trait ChatTokenizer: Send + Sync + fmt::Debug {
    /// Encode text the way the tokenizer's default call does.
    fn encode(&self, text: &str) -> Result<Vec<u32>, ModelError>;

    /// Decode ids back to text.
    fn decode(&self, ids: &[u32], skip_special_tokens: bool) -> Result<String, ModelError>;

    /// Token ids that end the assistant's turn. The first one is the
    /// tokenizer's end-of-sequence marker.
    fn eos_token_ids(&self) -> &[u32];
}

/// The persona-agnostic base model. Read-only once loaded.
pub trait BaseModel: Send + Sync + fmt::Debug {
    /// Apply the adapter stored in `adapter_dir` and return an inference-only
    /// model that owns the adapter's resources. The base weights are left
    /// untouched.
    fn attach_adapter(&self, adapter_dir: &Path) -> Result<Box<dyn AdaptedModel>, ModelError>;
}

/// Base model with one adapter applied. Dropping it releases the adapter.
pub trait AdaptedModel: Send + fmt::Debug {
    /// Run the model over `input_ids`, which start at position
    /// `seqlen_offset` of the sequence, and return the next-token logits as
    /// a 1-D tensor.
    fn forward(&mut self, input_ids: &[u32], seqlen_offset: usize) -> Result<Tensor, ModelError>;

    /// Forget cached attention state from a previous sequence.
    fn clear_kv_cache(&mut self);

    /// Directory the adapter was loaded from.
    fn adapter_location(&self) -> &Path;
}

/// Produces the base model and tokenizer. Called at most once successfully.
pub trait ModelLoader: Send + Sync {
    fn load(&self) -> Result<ModelHandle, ModelError>;

    /// Name used in logs and load errors.
    fn describe(&self) -> String;
}

/// Shared handle to the loaded base model, tokenizer and chat template.
#[derive(Debug, Clone)]
pub struct ModelHandle {
    pub model: Arc<dyn BaseModel>,
    pub tokenizer: Arc<dyn ChatTokenizer>,
    pub template: Arc<ChatTemplate>,
}
