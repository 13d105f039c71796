//! Read-only table of the characters this server offers.
//!
//! The registry is built once at startup from one of:
//! 1. The built-in table ([`PersonaRegistry::builtin`])
//! 2. A YAML file with a `personas:` list ([`PersonaRegistry::from_yaml_file`])
//!
//! After construction it is shared behind `Arc` and never written to.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;

use super::descriptor::PersonaDescriptor;
use crate::config::ConfigError;
use crate::error::ChatError;

/// Immutable persona table, keyed by id, listed in configuration order.
#[derive(Debug, Clone)]
pub struct PersonaRegistry {
    personas: Vec<Arc<PersonaDescriptor>>,
    index: HashMap<String, usize>,
}

#[derive(Debug, Deserialize)]
struct PersonaListWrapper {
    personas: Vec<PersonaDescriptor>,
}

impl PersonaRegistry {
    /// Build a registry from descriptors. Ids must be unique and the table
    /// must not be empty.
    pub fn new(personas: Vec<PersonaDescriptor>) -> Result<Self, ConfigError> {
        if personas.is_empty() {
            return Err(ConfigError::EmptyRegistry);
        }
        let mut index = HashMap::with_capacity(personas.len());
        let mut table = Vec::with_capacity(personas.len());
        for (pos, persona) in personas.into_iter().enumerate() {
            if index.insert(persona.id.clone(), pos).is_some() {
                return Err(ConfigError::DuplicatePersona(persona.id));
            }
            table.push(Arc::new(persona));
        }
        Ok(Self {
            personas: table,
            index,
        })
    }

    /// The three stock characters, with adapters under `adapter_root`.
    pub fn builtin(adapter_root: impl AsRef<Path>) -> Self {
        let root = adapter_root.as_ref();
        let personas: Vec<Arc<PersonaDescriptor>> = builtin_personas()
            .into_iter()
            .map(|mut p| {
                p.rebase(root);
                Arc::new(p)
            })
            .collect();
        let index = personas
            .iter()
            .enumerate()
            .map(|(pos, p)| (p.id.clone(), pos))
            .collect();
        Self { personas, index }
    }

    /// Parse a `personas:` YAML document. Relative adapter locations are
    /// resolved against `base_dir`.
    pub fn from_yaml_str(yaml: &str, base_dir: &Path) -> Result<Self, ConfigError> {
        let list: PersonaListWrapper = serde_yaml::from_str(yaml)?;
        let personas = list
            .personas
            .into_iter()
            .map(|mut p| {
                p.rebase(base_dir);
                p
            })
            .collect();
        Self::new(personas)
    }

    /// Load a `personas:` YAML file.
    pub fn from_yaml_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        let registry = Self::from_yaml_str(&content, base_dir)?;
        log::info!(
            "Loaded {} personas from {}",
            registry.list().len(),
            path.display()
        );
        Ok(registry)
    }

    /// Resolve a persona by id.
    pub fn lookup(&self, id: &str) -> Result<Arc<PersonaDescriptor>, ChatError> {
        self.index
            .get(id)
            .map(|&pos| Arc::clone(&self.personas[pos]))
            .ok_or_else(|| ChatError::UnknownPersona(id.to_string()))
    }

    /// Whether `id` is registered.
    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// All personas in configuration order.
    pub fn list(&self) -> &[Arc<PersonaDescriptor>] {
        &self.personas
    }
}

fn builtin_personas() -> Vec<PersonaDescriptor> {
    vec![
        PersonaDescriptor {
            id: "mickey".into(),
            display_name: "Mickey Mouse".into(),
            adapter_location: PathBuf::from("mickey-lora-adapter"),
            label: "🐭".into(),
            color: "#FF0000".into(),
            description: "Cheerful and optimistic mouse from Toontown".into(),
            system_instruction: "You are Mickey Mouse from Toontown. You are cheerful, \
                upbeat and kind. Keep answers short and friendly, and sprinkle in \
                your catchphrases like \"Oh boy!\" and \"Hot dog!\"."
                .into(),
        },
        PersonaDescriptor {
            id: "yoda".into(),
            display_name: "Yoda".into(),
            adapter_location: PathBuf::from("yoda-lora-adapter"),
            label: "🟢".into(),
            color: "#00FF00".into(),
            description: "Wise Jedi Master who speaks in unique way".into(),
            system_instruction: "You are Yoda, the ancient Jedi Master. Answer with \
                calm wisdom and speak with inverted sentence order, as Yoda does. \
                Keep answers brief."
                .into(),
        },
        PersonaDescriptor {
            id: "spiderman".into(),
            display_name: "Spider-Man".into(),
            adapter_location: PathBuf::from("spiderman-lora-adapter"),
            label: "🕷️".into(),
            color: "#0066FF".into(),
            description: "Friendly neighborhood web-slinging hero".into(),
            system_instruction: "You are Spider-Man, the friendly neighborhood hero from \
                Queens. You are witty and quick with a joke, but you take responsibility \
                seriously. Keep answers short."
                .into(),
        },
    ]
}
