//! PEFT LoRA adapters.
//!
//! An adapter directory holds `adapter_config.json` and
//! `adapter_model.safetensors`. Each targeted linear layer contributes a
//! `lora_A` (r × in) and `lora_B` (out × r) pair; applying the adapter
//! yields `W' = W + scale · (B @ A)` with `scale = alpha / r`
//! (`alpha / sqrt(r)` for rsLoRA).

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use candle_core::{DType, Device, Tensor};
use serde::Deserialize;

use crate::model::ModelError;

pub const ADAPTER_CONFIG_FILE: &str = "adapter_config.json";
pub const ADAPTER_WEIGHTS_FILE: &str = "adapter_model.safetensors";

/// The subset of `adapter_config.json` the merge needs.
#[derive(Debug, Clone, Deserialize)]
pub struct LoraConfig {
    #[serde(default = "default_peft_type")]
    pub peft_type: String,
    pub r: usize,
    pub lora_alpha: f64,
    #[serde(default)]
    pub use_rslora: bool,
    #[serde(default)]
    pub use_dora: bool,
    #[serde(default)]
    pub base_model_name_or_path: Option<String>,
}

fn default_peft_type() -> String {
    "LORA".to_string()
}

impl LoraConfig {
    /// The base model named in the adapter config, when it is not `model_id`.
    pub fn foreign_base(&self, model_id: &str) -> Option<&str> {
        self.base_model_name_or_path
            .as_deref()
            .filter(|base| *base != model_id)
    }

    pub fn scale(&self) -> f64 {
        if self.use_rslora {
            self.lora_alpha / (self.r as f64).sqrt()
        } else {
            self.lora_alpha / self.r as f64
        }
    }
}

/// Low-rank update for one base weight.
#[derive(Debug)]
struct LoraPair {
    /// Base weight name, e.g. `model.layers.0.self_attn.q_proj.weight`.
    target: String,
    a: Tensor,
    b: Tensor,
}

/// A LoRA adapter loaded from disk.
#[derive(Debug)]
pub struct LoraAdapter {
    pub location: PathBuf,
    pub config: LoraConfig,
    pairs: Vec<LoraPair>,
}

impl LoraAdapter {
    /// Load an adapter directory onto `device`.
    pub fn load(dir: &Path, device: &Device) -> Result<Self, ModelError> {
        let config_path = dir.join(ADAPTER_CONFIG_FILE);
        if !config_path.exists() {
            return Err(ModelError::MissingArtifact(config_path));
        }
        let weights_path = dir.join(ADAPTER_WEIGHTS_FILE);
        if !weights_path.exists() {
            return Err(ModelError::MissingArtifact(weights_path));
        }

        let config: LoraConfig = serde_json::from_slice(&std::fs::read(&config_path)?)?;
        if !config.peft_type.eq_ignore_ascii_case("lora") {
            return Err(ModelError::AdapterMismatch(format!(
                "unsupported adapter type {}",
                config.peft_type
            )));
        }
        if config.use_dora {
            return Err(ModelError::AdapterMismatch(
                "DoRA adapters are not supported".to_string(),
            ));
        }
        if config.r == 0 {
            return Err(ModelError::AdapterMismatch("adapter rank is 0".to_string()));
        }

        let tensors = candle_core::safetensors::load(&weights_path, device)?;
        let pairs = pair_tensors(tensors)?;
        log::debug!(
            "Loaded adapter {} (r={}, alpha={}, {} layers)",
            dir.display(),
            config.r,
            config.lora_alpha,
            pairs.len()
        );

        Ok(Self {
            location: dir.to_path_buf(),
            config,
            pairs,
        })
    }

    /// Number of base weights this adapter modifies.
    pub fn num_layers(&self) -> usize {
        self.pairs.len()
    }

    /// Return a weight map with the adapter applied. `base` is not modified;
    /// untouched tensors are shared with it.
    pub fn merge_into(
        &self,
        base: &HashMap<String, Tensor>,
    ) -> Result<HashMap<String, Tensor>, ModelError> {
        let scale = self.config.scale();
        let mut merged = base.clone();
        for pair in &self.pairs {
            let weight = base.get(&pair.target).ok_or_else(|| {
                ModelError::AdapterMismatch(format!("base model has no weight {}", pair.target))
            })?;
            let delta = pair
                .b
                .to_dtype(DType::F32)?
                .matmul(&pair.a.to_dtype(DType::F32)?)?;
            if delta.dims() != weight.dims() {
                return Err(ModelError::AdapterMismatch(format!(
                    "{}: adapter shape {:?} vs base shape {:?}",
                    pair.target,
                    delta.dims(),
                    weight.dims()
                )));
            }
            let updated = weight
                .to_dtype(DType::F32)?
                .add(&(delta * scale)?)?
                .to_dtype(weight.dtype())?;
            merged.insert(pair.target.clone(), updated);
        }
        Ok(merged)
    }
}

/// Group `lora_A` / `lora_B` tensors by the layer they target.
fn pair_tensors(tensors: HashMap<String, Tensor>) -> Result<Vec<LoraPair>, ModelError> {
    let mut halves: HashMap<String, (Option<Tensor>, Option<Tensor>)> = HashMap::new();
    for (name, tensor) in tensors {
        let Some((module, is_a)) = split_lora_key(&name) else {
            log::debug!("Ignoring non-LoRA adapter tensor {}", name);
            continue;
        };
        let entry = halves.entry(base_weight_name(module)).or_default();
        if is_a {
            entry.0 = Some(tensor);
        } else {
            entry.1 = Some(tensor);
        }
    }

    let mut pairs = Vec::with_capacity(halves.len());
    for (target, half) in halves {
        match half {
            (Some(a), Some(b)) => pairs.push(LoraPair { target, a, b }),
            _ => {
                return Err(ModelError::AdapterMismatch(format!(
                    "{target} has only one of lora_A/lora_B"
                )))
            }
        }
    }
    pairs.sort_by(|x, y| x.target.cmp(&y.target));
    if pairs.is_empty() {
        return Err(ModelError::AdapterMismatch(
            "adapter contains no LoRA weights".to_string(),
        ));
    }
    Ok(pairs)
}

/// `"...q_proj.lora_A.weight"` → `("...q_proj", true)`.
fn split_lora_key(name: &str) -> Option<(&str, bool)> {
    const SUFFIXES: [(&str, bool); 4] = [
        (".lora_A.weight", true),
        (".lora_B.weight", false),
        (".lora_A.default.weight", true),
        (".lora_B.default.weight", false),
    ];
    SUFFIXES
        .iter()
        .find_map(|(suffix, is_a)| name.strip_suffix(suffix).map(|module| (module, *is_a)))
}

/// Strip PEFT's wrapper prefix: `base_model.model.model.layers.0...` →
/// `model.layers.0....weight`.
fn base_weight_name(module: &str) -> String {
    let module = module
        .strip_prefix("base_model.model.")
        .or_else(|| module.strip_prefix("base_model."))
        .unwrap_or(module);
    format!("{module}.weight")
}
