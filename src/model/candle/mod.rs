//! candle backend: Qwen2 causal LM with merged LoRA adapters.
//!
//! Base weights come from the Hugging Face hub (`hf-hub`) or a local
//! directory holding `config.json`, `tokenizer.json` and
//! `model.safetensors` (or a sharded `model.safetensors.index.json`).
//! Attaching an adapter builds a private model over the base tensors with
//! the adapter's layers merged in; the base tensors are shared, not copied.

pub mod lora;
pub mod tokenizer;

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::qwen2;
use hf_hub::api::sync::Api;
use hf_hub::{Repo, RepoType};

use self::lora::LoraAdapter;
use self::tokenizer::HfTokenizer;
use super::{AdaptedModel, BaseModel, ModelError, ModelHandle, ModelLoader};
use crate::config::{DevicePreference, ModelConfig, WeightPrecision};
use crate::prompt::ChatTemplate;

const WEIGHTS_FILE: &str = "model.safetensors";
const WEIGHTS_INDEX_FILE: &str = "model.safetensors.index.json";

/// Resolved paths of the base model's artifacts.
#[derive(Debug)]
struct ModelFiles {
    config: PathBuf,
    tokenizer: PathBuf,
    generation_config: Option<PathBuf>,
    weights: Vec<PathBuf>,
}

/// Loads the base model described by a [`ModelConfig`].
#[derive(Debug, Clone)]
pub struct CandleLoader {
    config: ModelConfig,
}

impl CandleLoader {
    pub fn new(config: ModelConfig) -> Self {
        Self { config }
    }

    fn fetch_files(&self) -> Result<ModelFiles, ModelError> {
        match &self.config.local_dir {
            Some(dir) => local_files(dir),
            None => self.hub_files(),
        }
    }

    fn hub_files(&self) -> Result<ModelFiles, ModelError> {
        let api = Api::new()?;
        let repo = api.repo(Repo::with_revision(
            self.config.model_id.clone(),
            RepoType::Model,
            self.config.revision.clone(),
        ));
        log::debug!(
            "Fetching {}@{} from the hub",
            self.config.model_id,
            self.config.revision
        );

        let config = repo.get("config.json")?;
        let tokenizer = repo.get("tokenizer.json")?;
        let generation_config = repo.get("generation_config.json").ok();
        let weights = match repo.get(WEIGHTS_FILE) {
            Ok(path) => vec![path],
            Err(_) => {
                let index = repo.get(WEIGHTS_INDEX_FILE)?;
                shard_names(&index)?
                    .iter()
                    .map(|name| repo.get(name))
                    .collect::<Result<Vec<_>, _>>()?
            }
        };

        Ok(ModelFiles {
            config,
            tokenizer,
            generation_config,
            weights,
        })
    }
}

impl ModelLoader for CandleLoader {
    fn load(&self) -> Result<ModelHandle, ModelError> {
        let device = select_device(self.config.device)?;
        let dtype = select_dtype(self.config.precision, &device);
        let files = self.fetch_files()?;

        let config: qwen2::Config = serde_json::from_slice(&std::fs::read(&files.config)?)?;
        let tokenizer = HfTokenizer::from_files(&files.tokenizer, files.generation_config.as_deref())?;
        let template = match &self.config.chat_template_file {
            Some(path) => ChatTemplate::from_file(path)?,
            None => ChatTemplate::chatml()?,
        };

        let mut weights = HashMap::new();
        for file in &files.weights {
            for (name, tensor) in candle_core::safetensors::load(file, &device)? {
                weights.insert(name, tensor.to_dtype(dtype)?);
            }
        }
        log::info!(
            "Base weights: {} tensors, {} layers, {:?} on {:?}",
            weights.len(),
            config.num_hidden_layers,
            dtype,
            device
        );

        Ok(ModelHandle {
            model: Arc::new(CandleBase {
                model_id: self.config.model_id.clone(),
                config,
                weights,
                dtype,
                device,
            }),
            tokenizer: Arc::new(tokenizer),
            template: Arc::new(template),
        })
    }

    fn describe(&self) -> String {
        match &self.config.local_dir {
            Some(dir) => dir.display().to_string(),
            None => format!("{}@{}", self.config.model_id, self.config.revision),
        }
    }
}

fn local_files(dir: &Path) -> Result<ModelFiles, ModelError> {
    let require = |name: &str| {
        let path = dir.join(name);
        if path.exists() {
            Ok(path)
        } else {
            Err(ModelError::MissingArtifact(path))
        }
    };

    let weights = if dir.join(WEIGHTS_FILE).exists() {
        vec![dir.join(WEIGHTS_FILE)]
    } else {
        let index = require(WEIGHTS_INDEX_FILE)
            .map_err(|_| ModelError::MissingArtifact(dir.join(WEIGHTS_FILE)))?;
        shard_names(&index)?
            .iter()
            .map(|name| require(name))
            .collect::<Result<Vec<_>, _>>()?
    };

    Ok(ModelFiles {
        config: require("config.json")?,
        tokenizer: require("tokenizer.json")?,
        generation_config: require("generation_config.json").ok(),
        weights,
    })
}

/// Distinct shard file names listed in a safetensors index.
fn shard_names(index: &Path) -> Result<Vec<String>, ModelError> {
    let value: serde_json::Value = serde_json::from_slice(&std::fs::read(index)?)?;
    let map = value["weight_map"].as_object().ok_or_else(|| {
        ModelError::AdapterMismatch(format!("{} has no weight_map", index.display()))
    })?;
    let names: BTreeSet<String> = map
        .values()
        .filter_map(|v| v.as_str().map(str::to_string))
        .collect();
    Ok(names.into_iter().collect())
}

fn select_device(preference: DevicePreference) -> Result<Device, ModelError> {
    match preference {
        DevicePreference::Cpu => Ok(Device::Cpu),
        DevicePreference::Cuda(ordinal) => Device::new_cuda(ordinal)
            .map_err(|e| ModelError::Device(format!("CUDA device {ordinal}: {e}"))),
        DevicePreference::Metal => {
            Device::new_metal(0).map_err(|e| ModelError::Device(format!("Metal device: {e}")))
        }
        DevicePreference::Auto => {
            if candle_core::utils::cuda_is_available() {
                Ok(Device::new_cuda(0)?)
            } else if candle_core::utils::metal_is_available() {
                Ok(Device::new_metal(0)?)
            } else {
                Ok(Device::Cpu)
            }
        }
    }
}

/// Half precision on accelerators, f32 on CPU, unless configured.
fn select_dtype(precision: Option<WeightPrecision>, device: &Device) -> DType {
    match precision {
        Some(WeightPrecision::F16) => DType::F16,
        Some(WeightPrecision::Bf16) => DType::BF16,
        Some(WeightPrecision::F32) => DType::F32,
        None if device.is_cpu() => DType::F32,
        None => DType::F16,
    }
}

/// Resident base model: architecture config plus the raw weight map.
struct CandleBase {
    model_id: String,
    config: qwen2::Config,
    weights: HashMap<String, Tensor>,
    dtype: DType,
    device: Device,
}

impl BaseModel for CandleBase {
    fn attach_adapter(&self, adapter_dir: &Path) -> Result<Box<dyn AdaptedModel>, ModelError> {
        let adapter = LoraAdapter::load(adapter_dir, &self.device)?;
        if let Some(trained_on) = adapter.config.foreign_base(&self.model_id) {
            log::warn!(
                "Adapter {} was trained on {}, not {}",
                adapter_dir.display(),
                trained_on,
                self.model_id
            );
        }
        let merged = adapter.merge_into(&self.weights)?;
        let vb = VarBuilder::from_tensors(merged, self.dtype, &self.device);
        let model = qwen2::ModelForCausalLM::new(&self.config, vb)?;
        log::debug!(
            "Merged {} adapter layers from {}",
            adapter.num_layers(),
            adapter_dir.display()
        );
        Ok(Box::new(CandleAdapted {
            model,
            location: adapter.location,
            device: self.device.clone(),
        }))
    }
}

impl std::fmt::Debug for CandleBase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CandleBase")
            .field("model_id", &self.model_id)
            .field("tensors", &self.weights.len())
            .field("dtype", &self.dtype)
            .field("device", &self.device)
            .finish()
    }
}

/// Qwen2 with one adapter merged in. Owns the merged tensors and kv cache.
struct CandleAdapted {
    model: qwen2::ModelForCausalLM,
    location: PathBuf,
    device: Device,
}

impl AdaptedModel for CandleAdapted {
    fn forward(&mut self, input_ids: &[u32], seqlen_offset: usize) -> Result<Tensor, ModelError> {
        let input = Tensor::new(input_ids, &self.device)?.unsqueeze(0)?;
        let logits = self.model.forward(&input, seqlen_offset)?;
        Ok(logits.squeeze(0)?.squeeze(0)?.to_dtype(DType::F32)?)
    }

    fn clear_kv_cache(&mut self) {
        self.model.clear_kv_cache();
    }

    fn adapter_location(&self) -> &Path {
        &self.location
    }
}

impl std::fmt::Debug for CandleAdapted {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CandleAdapted")
            .field("adapter", &self.location)
            .finish()
    }
}
