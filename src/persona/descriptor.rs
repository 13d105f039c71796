//! The static metadata of one character.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// One character the server can impersonate.
///
/// Descriptors are immutable once the registry is built; the registry hands
/// them out behind `Arc` so sessions and responses can share them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonaDescriptor {
    /// Unique key, e.g. `"yoda"`.
    pub id: String,
    /// Human-facing name, e.g. `"Yoda"`.
    pub display_name: String,
    /// Directory holding the PEFT adapter (`adapter_config.json` +
    /// `adapter_model.safetensors`).
    pub adapter_location: PathBuf,
    /// Short label shown next to the name (an emoji in the default table).
    #[serde(default)]
    pub label: String,
    /// Accent colour used by front-ends.
    #[serde(default = "default_color")]
    pub color: String,
    /// One-line description.
    #[serde(default)]
    pub description: String,
    /// System-role instruction placed ahead of every user message.
    pub system_instruction: String,
}

fn default_color() -> String {
    "#888888".to_string()
}

impl PersonaDescriptor {
    /// Whether the adapter directory is present on disk.
    pub fn adapter_available(&self) -> bool {
        self.adapter_location.exists()
    }

    /// Resolve a relative adapter location against `root`.
    pub(crate) fn rebase(&mut self, root: &Path) {
        if self.adapter_location.is_relative() {
            self.adapter_location = root.join(&self.adapter_location);
        }
    }
}
