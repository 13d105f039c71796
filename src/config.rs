//! Process configuration, read from environment variables.
//!
//! | Variable              | Default                      |
//! |-----------------------|------------------------------|
//! | `HOST`                | `0.0.0.0`                    |
//! | `PORT`                | `5000`                       |
//! | `BASE_MODEL`          | `Qwen/Qwen2-0.5B-Instruct`   |
//! | `BASE_MODEL_REVISION` | `main`                       |
//! | `BASE_MODEL_DIR`      | unset (download from the hub)|
//! | `MODEL_DEVICE`        | `auto`                       |
//! | `MODEL_DTYPE`         | f16 on accelerators, else f32|
//! | `CHAT_TEMPLATE_FILE`  | unset (ChatML)               |
//! | `PERSONAS_FILE`       | unset (built-in characters)  |
//! | `ADAPTER_ROOT`        | `.`                          |
//! | `SAMPLING_SEED`       | `299792458`                  |
//! | `MAX_NEW_TOKENS`      | `50`                         |
//! | `TEMPERATURE`         | `0.7`                        |
//! | `PRELOAD_MODEL`       | `false`                      |

use std::path::PathBuf;
use std::str::FromStr;

use thiserror::Error;

use crate::persona::PersonaRegistry;

/// Base model used when `BASE_MODEL` is not set.
pub const DEFAULT_BASE_MODEL: &str = "Qwen/Qwen2-0.5B-Instruct";

/// Configuration errors detected at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable holds an unparsable value.
    #[error("Invalid value for {name}: '{value}' ({reason})")]
    InvalidVar {
        name: &'static str,
        value: String,
        reason: String,
    },

    /// A configuration file could not be read.
    #[error("Cannot read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// YAML parsing failed.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Two personas share an id.
    #[error("Duplicate persona id: {0}")]
    DuplicatePersona(String),

    /// The persona table has no entries.
    #[error("Persona registry is empty")]
    EmptyRegistry,
}

/// Where to place the base model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DevicePreference {
    /// CUDA if compiled in and present, then Metal, then CPU.
    #[default]
    Auto,
    Cpu,
    Cuda(usize),
    Metal,
}

impl FromStr for DevicePreference {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "cpu" => Ok(Self::Cpu),
            "cuda" | "gpu" => Ok(Self::Cuda(0)),
            "metal" | "mps" => Ok(Self::Metal),
            other => match other.strip_prefix("cuda:") {
                Some(ordinal) => ordinal
                    .parse()
                    .map(Self::Cuda)
                    .map_err(|_| format!("bad CUDA ordinal '{ordinal}'")),
                None => Err("expected auto, cpu, cuda, cuda:N or metal".to_string()),
            },
        }
    }
}

/// Floating point precision for the base weights.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeightPrecision {
    F16,
    Bf16,
    F32,
}

impl FromStr for WeightPrecision {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "f16" | "float16" | "half" => Ok(Self::F16),
            "bf16" | "bfloat16" => Ok(Self::Bf16),
            "f32" | "float32" => Ok(Self::F32),
            _ => Err("expected f16, bf16 or f32".to_string()),
        }
    }
}

/// Base model location and placement.
#[derive(Debug, Clone)]
pub struct ModelConfig {
    /// Hugging Face repository id.
    pub model_id: String,
    /// Repository revision (branch, tag or commit).
    pub revision: String,
    /// Load from this directory instead of the hub.
    pub local_dir: Option<PathBuf>,
    pub device: DevicePreference,
    /// `None` picks f16 on accelerators and f32 on CPU.
    pub precision: Option<WeightPrecision>,
    /// Tera chat template replacing the built-in ChatML one.
    pub chat_template_file: Option<PathBuf>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model_id: DEFAULT_BASE_MODEL.to_string(),
            revision: "main".to_string(),
            local_dir: None,
            device: DevicePreference::Auto,
            precision: None,
            chat_template_file: None,
        }
    }
}

/// Sampling defaults applied when a chat request does not override them.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationDefaults {
    pub max_new_tokens: usize,
    pub temperature: f64,
    /// Base seed; each generation adds its call sequence number.
    pub seed: u64,
}

impl Default for GenerationDefaults {
    fn default() -> Self {
        Self {
            max_new_tokens: 50,
            temperature: 0.7,
            seed: 299_792_458,
        }
    }
}

/// Everything the server binary needs to start.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub model: ModelConfig,
    /// YAML persona table; the built-in characters are used when unset.
    pub personas_file: Option<PathBuf>,
    /// Directory the built-in characters' adapters live under.
    pub adapter_root: PathBuf,
    pub generation: GenerationDefaults,
    /// Load the base model at startup instead of on the first switch.
    pub preload_model: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
            model: ModelConfig::default(),
            personas_file: None,
            adapter_root: PathBuf::from("."),
            generation: GenerationDefaults::default(),
            preload_model: false,
        }
    }
}

impl AppConfig {
    /// Load from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load from an arbitrary variable source. Unset or blank variables
    /// keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        if let Some(host) = get("HOST") {
            config.host = host;
        }
        if let Some(port) = get("PORT") {
            config.port = parse_var("PORT", &port)?;
        }
        if let Some(model_id) = get("BASE_MODEL") {
            config.model.model_id = model_id;
        }
        if let Some(revision) = get("BASE_MODEL_REVISION") {
            config.model.revision = revision;
        }
        config.model.local_dir = get("BASE_MODEL_DIR").map(PathBuf::from);
        if let Some(device) = get("MODEL_DEVICE") {
            config.model.device = parse_var("MODEL_DEVICE", &device)?;
        }
        if let Some(precision) = get("MODEL_DTYPE") {
            config.model.precision = Some(parse_var("MODEL_DTYPE", &precision)?);
        }
        config.model.chat_template_file = get("CHAT_TEMPLATE_FILE").map(PathBuf::from);
        config.personas_file = get("PERSONAS_FILE").map(PathBuf::from);
        if let Some(root) = get("ADAPTER_ROOT") {
            config.adapter_root = PathBuf::from(root);
        }
        if let Some(seed) = get("SAMPLING_SEED") {
            config.generation.seed = parse_var("SAMPLING_SEED", &seed)?;
        }
        if let Some(max) = get("MAX_NEW_TOKENS") {
            config.generation.max_new_tokens = parse_var("MAX_NEW_TOKENS", &max)?;
        }
        if let Some(temperature) = get("TEMPERATURE") {
            config.generation.temperature = parse_var("TEMPERATURE", &temperature)?;
        }
        if let Some(preload) = get("PRELOAD_MODEL") {
            config.preload_model = parse_flag("PRELOAD_MODEL", &preload)?;
        }

        Ok(config)
    }

    /// `host:port` for the listener.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Build the persona registry this configuration points at.
    pub fn build_registry(&self) -> Result<PersonaRegistry, ConfigError> {
        match &self.personas_file {
            Some(path) => PersonaRegistry::from_yaml_file(path),
            None => Ok(PersonaRegistry::builtin(&self.adapter_root)),
        }
    }
}

fn parse_var<T>(name: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e: T::Err| ConfigError::InvalidVar {
            name,
            value: value.to_string(),
            reason: e.to_string(),
        })
}

fn parse_flag(name: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidVar {
            name,
            value: value.to_string(),
            reason: "expected a boolean".to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults_without_env() {
        let config = AppConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.port, 5000);
        assert_eq!(config.model.model_id, DEFAULT_BASE_MODEL);
        assert_eq!(config.model.device, DevicePreference::Auto);
        assert_eq!(config.generation.max_new_tokens, 50);
        assert_eq!(config.generation.temperature, 0.7);
        assert!(!config.preload_model);
        assert_eq!(config.bind_addr(), "0.0.0.0:5000");
    }

    #[test]
    fn test_overrides() {
        let config = AppConfig::from_lookup(lookup(&[
            ("PORT", "8080"),
            ("MODEL_DEVICE", "cuda:1"),
            ("MODEL_DTYPE", "bf16"),
            ("BASE_MODEL_DIR", "/models/qwen"),
            ("MAX_NEW_TOKENS", "128"),
            ("TEMPERATURE", "1.2"),
            ("PRELOAD_MODEL", "yes"),
            ("ADAPTER_ROOT", "/adapters"),
        ]))
        .unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.model.device, DevicePreference::Cuda(1));
        assert_eq!(config.model.precision, Some(WeightPrecision::Bf16));
        assert_eq!(config.model.local_dir, Some(PathBuf::from("/models/qwen")));
        assert_eq!(config.generation.max_new_tokens, 128);
        assert_eq!(config.generation.temperature, 1.2);
        assert!(config.preload_model);
        assert_eq!(config.adapter_root, PathBuf::from("/adapters"));
    }

    #[test]
    fn test_blank_values_keep_defaults() {
        let config = AppConfig::from_lookup(lookup(&[("PORT", "  ")])).unwrap();
        assert_eq!(config.port, 5000);
    }

    #[test]
    fn test_invalid_values_are_reported() {
        let err = AppConfig::from_lookup(lookup(&[("PORT", "eighty")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidVar { name: "PORT", .. }));

        let err = AppConfig::from_lookup(lookup(&[("MODEL_DEVICE", "tpu")])).unwrap_err();
        assert!(err.to_string().contains("MODEL_DEVICE"));

        let err = AppConfig::from_lookup(lookup(&[("PRELOAD_MODEL", "maybe")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidVar { name: "PRELOAD_MODEL", .. }));
    }

    #[test]
    fn test_registry_defaults_to_builtin() {
        let config = AppConfig::from_lookup(lookup(&[("ADAPTER_ROOT", "/a")])).unwrap();
        let registry = config.build_registry().unwrap();
        assert!(registry.contains("yoda"));
        assert_eq!(
            registry.lookup("mickey").unwrap().adapter_location,
            PathBuf::from("/a/mickey-lora-adapter")
        );
    }
}
