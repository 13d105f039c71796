//! Persona registry and descriptors.
//!
//! A persona bundles display metadata, a system instruction and the location
//! of the LoRA adapter that makes the base model sound like the character.

pub mod descriptor;
pub mod registry;

pub use descriptor::PersonaDescriptor;
pub use registry::PersonaRegistry;
