//! Backend errors.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while loading or running the base model and adapters.
#[derive(Debug, Error)]
pub enum ModelError {
    /// Tensor or device failure inside candle.
    #[error("Tensor error: {0}")]
    Candle(#[from] candle_core::Error),

    /// Tokenizer load, encode or decode failure.
    #[error("Tokenizer error: {0}")]
    Tokenizer(String),

    /// Hugging Face hub download failure.
    #[error("Hub error: {0}")]
    Hub(#[from] hf_hub::api::sync::ApiError),

    /// File I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed JSON configuration file.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The chat template does not compile.
    #[error("Chat template error: {0}")]
    Template(#[from] tera::Error),

    /// A required file is missing from a model or adapter directory.
    #[error("Missing artifact: {}", .0.display())]
    MissingArtifact(PathBuf),

    /// Adapter weights that do not line up with the base model.
    #[error("Adapter mismatch: {0}")]
    AdapterMismatch(String),

    /// The requested device is unavailable.
    #[error("Device error: {0}")]
    Device(String),
}

impl ModelError {
    /// Wrap a `tokenizers` error, which is a boxed trait object.
    pub fn tokenizer(err: impl std::fmt::Display) -> Self {
        ModelError::Tokenizer(err.to_string())
    }
}
