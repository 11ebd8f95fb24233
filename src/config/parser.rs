//! Manifest parser for loading the desired-state configuration.
//!
//! This module handles loading the manifest from YAML files and environment
//! variables, with proper precedence, and supplies named secrets from the
//! environment. The engine only ever sees secrets through their content
//! hash; plaintext stays inside [`Value`](crate::resource::Value)
//! construction.

use crate::error::{ConfigError, ConvergeError, Result};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info};

use super::manifest::Manifest;

/// Source of named secrets for manifest resolution.
pub trait SecretSource {
    /// Returns the plaintext for a named secret, if known.
    fn get(&self, name: &str) -> Option<String>;
}

/// Secrets resolved from process environment variables.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvSecrets;

impl SecretSource for EnvSecrets {
    fn get(&self, name: &str) -> Option<String> {
        std::env::var(name).ok()
    }
}

/// Fixed in-memory secrets, for tests and embedding callers.
#[derive(Debug, Clone, Default)]
pub struct StaticSecrets(BTreeMap<String, String>);

impl SecretSource for StaticSecrets {
    fn get(&self, name: &str) -> Option<String> {
        self.0.get(name).cloned()
    }
}

impl<const N: usize> From<[(String, String); N]> for StaticSecrets {
    fn from(entries: [(String, String); N]) -> Self {
        Self(BTreeMap::from(entries))
    }
}

/// Parser for loading the manifest.
#[derive(Debug, Default)]
pub struct ManifestParser {
    /// Base path for resolving relative paths.
    base_path: Option<std::path::PathBuf>,
}

impl ManifestParser {
    /// Creates a new manifest parser.
    #[must_use]
    pub const fn new() -> Self {
        Self { base_path: None }
    }

    /// Sets the base path for resolving relative paths.
    #[must_use]
    pub fn with_base_path(mut self, path: impl Into<std::path::PathBuf>) -> Self {
        self.base_path = Some(path.into());
        self
    }

    /// Loads the manifest from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<Manifest> {
        let path = path.as_ref();
        info!("Loading manifest from: {}", path.display());

        if !path.exists() {
            return Err(ConvergeError::Config(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            }));
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            ConvergeError::Config(ConfigError::ParseError {
                message: format!("Failed to read file: {e}"),
                location: Some(path.display().to_string()),
            })
        })?;

        self.parse_yaml(&content, Some(path))
    }

    /// Parses the manifest from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is invalid.
    pub fn parse_yaml(&self, content: &str, source: Option<&Path>) -> Result<Manifest> {
        debug!("Parsing YAML manifest");

        let manifest: Manifest = serde_yaml::from_str(content).map_err(|e| {
            let location = source.map(|p| p.display().to_string());
            ConvergeError::Config(ConfigError::ParseError {
                message: format!("YAML parse error: {e}"),
                location,
            })
        })?;

        debug!(
            "Successfully parsed manifest for project: {}",
            manifest.project.name
        );
        Ok(manifest)
    }

    /// Loads the manifest with environment variable overrides.
    ///
    /// Environment variables are checked in the format:
    /// `CONVERGE_<SECTION>_<KEY>` (e.g., `CONVERGE_PROJECT_NAME`)
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_with_env(&self, path: impl AsRef<Path>) -> Result<Manifest> {
        let mut manifest = self.load_file(path)?;

        // Apply environment overrides
        Self::apply_env_overrides(&mut manifest);

        Ok(manifest)
    }

    /// Applies environment variable overrides to the manifest.
    fn apply_env_overrides(manifest: &mut Manifest) {
        // Project overrides
        if let Ok(name) = std::env::var("CONVERGE_PROJECT_NAME") {
            debug!("Overriding project.name from environment");
            manifest.project.name = name;
        }

        if let Ok(env) = std::env::var("CONVERGE_PROJECT_ENVIRONMENT") {
            debug!("Overriding project.environment from environment");
            manifest.project.environment = env;
        }

        // State overrides
        if let Ok(bucket) = std::env::var("CONVERGE_STATE_BUCKET") {
            debug!("Overriding state.bucket from environment");
            manifest.state.bucket = Some(bucket);
        }

        if let Ok(prefix) = std::env::var("CONVERGE_STATE_PREFIX") {
            debug!("Overriding state.prefix from environment");
            manifest.state.prefix = Some(prefix);
        }
    }

    /// Loads the .env file if present, making its values visible to
    /// [`EnvSecrets`].
    ///
    /// # Errors
    ///
    /// Returns an error if the .env file exists but cannot be loaded.
    pub fn load_dotenv(&self) -> Result<()> {
        let env_path = self
            .base_path
            .as_ref()
            .map_or_else(|| std::path::PathBuf::from(".env"), |p| p.join(".env"));

        if env_path.exists() {
            info!("Loading environment from: {}", env_path.display());
            dotenvy::from_path(&env_path).map_err(|e| {
                ConvergeError::Config(ConfigError::ParseError {
                    message: format!("Failed to load .env file: {e}"),
                    location: Some(env_path.display().to_string()),
                })
            })?;
        } else {
            debug!(".env file not found at: {}", env_path.display());
        }

        Ok(())
    }
}

/// Default manifest file names to search for.
pub const DEFAULT_MANIFEST_FILES: &[&str] = &[
    "converge.yaml",
    "converge.yml",
];

/// Finds the manifest file in the given directory or parent directories.
///
/// # Errors
///
/// Returns an error if no manifest file is found.
pub fn find_manifest_file(start_dir: impl AsRef<Path>) -> Result<std::path::PathBuf> {
    let start = start_dir.as_ref();
    let mut current = start.to_path_buf();

    loop {
        for filename in DEFAULT_MANIFEST_FILES {
            let manifest_path = current.join(filename);
            if manifest_path.exists() {
                info!("Found manifest file: {}", manifest_path.display());
                return Ok(manifest_path);
            }
        }

        if !current.pop() {
            break;
        }
    }

    Err(ConvergeError::Config(ConfigError::FileNotFound {
        path: start.join(DEFAULT_MANIFEST_FILES[0]),
    }))
}
