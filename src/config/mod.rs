//! Configuration source for the reconciliation engine.
//!
//! This module handles all configuration-related functionality:
//! - Parsing and deserializing the `converge.yaml` manifest
//! - Resolving named secrets from the environment
//! - Validating manifest values
//! - Computing deterministic configuration fingerprints

mod manifest;
mod parser;
mod validator;
mod hash;

pub use manifest::{
    EngineConfig, Manifest, ProjectConfig, ResourceManifest, StateBackend, StateConfig,
};
pub use parser::{
    find_manifest_file, EnvSecrets, ManifestParser, SecretSource, StaticSecrets,
    DEFAULT_MANIFEST_FILES,
};
pub use validator::{ManifestValidator, ValidationError, ValidationResult};
pub use hash::InputHasher;
