//! Manifest types for the desired-state configuration file.
//!
//! The manifest is the external configuration source: it names the project,
//! selects a state backend, and lists the desired resources. Resource inputs
//! use three YAML forms:
//!
//! - a plain scalar, sequence, or mapping becomes a literal;
//! - `{ ref: RESOURCE.OUTPUT }` becomes a symbolic reference;
//! - `{ secret: NAME }` names a secret resolved at parse time and reduced
//!   to a content hash inside the model.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{ConfigError, ConvergeError, Result};
use crate::resource::{DesiredSet, Resource, Value};
use crate::state::{LocalStateStore, S3StateStore, StateStore};

use super::parser::SecretSource;

/// The root manifest structure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Manifest {
    /// Project-level configuration.
    pub project: ProjectConfig,
    /// State backend configuration.
    #[serde(default)]
    pub state: StateConfig,
    /// Engine tuning.
    #[serde(default)]
    pub engine: EngineConfig,
    /// Desired resources.
    #[serde(default)]
    pub resources: Vec<ResourceManifest>,
}

/// Project-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProjectConfig {
    /// Unique name for the project.
    pub name: String,
    /// Environment (e.g., "dev", "staging", "prod").
    #[serde(default = "default_environment")]
    pub environment: String,
}

/// State backend configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StateConfig {
    /// Backend type (local or s3).
    #[serde(default)]
    pub backend: StateBackend,
    /// Local state file path (for local backend).
    #[serde(default)]
    pub path: Option<String>,
    /// S3 bucket name (required for s3 backend).
    #[serde(default)]
    pub bucket: Option<String>,
    /// S3 key prefix (optional).
    #[serde(default)]
    pub prefix: Option<String>,
    /// S3 region (optional, uses AWS default if not specified).
    #[serde(default)]
    pub region: Option<String>,
}

/// State backend types.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StateBackend {
    /// Local file-based state storage.
    #[default]
    Local,
    /// AWS S3-based state storage.
    S3,
}

/// Engine tuning knobs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EngineConfig {
    /// Worker bound for applying independent resources; 1 is sequential.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

/// A single resource entry in the manifest.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResourceManifest {
    /// Unique resource id.
    pub id: String,
    /// Resource type, matched against registered providers.
    #[serde(rename = "type")]
    pub type_name: String,
    /// Raw input values; classified during conversion.
    #[serde(default)]
    pub inputs: BTreeMap<String, serde_yaml::Value>,
    /// Explicit dependencies.
    #[serde(default)]
    pub depends_on: Vec<String>,
}

const fn default_concurrency() -> usize {
    1
}

fn default_environment() -> String {
    String::from("dev")
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
        }
    }
}

impl Manifest {
    /// Returns the fully qualified project name including environment.
    #[must_use]
    pub fn qualified_name(&self) -> String {
        format!("{}-{}", self.project.name, self.project.environment)
    }

    /// Returns resource ids in declaration order.
    #[must_use]
    pub fn resource_ids(&self) -> Vec<&str> {
        self.resources.iter().map(|r| r.id.as_str()).collect()
    }

    /// Converts the manifest into a desired set, resolving named secrets.
    ///
    /// # Errors
    ///
    /// Returns a configuration error on duplicate ids, malformed reference
    /// expressions, or secrets missing from the source.
    pub fn desired_set(&self, secrets: &dyn SecretSource) -> Result<DesiredSet> {
        let mut set = DesiredSet::new();

        for manifest in &self.resources {
            let mut resource = Resource::new(&manifest.id, &manifest.type_name);
            for dep in &manifest.depends_on {
                resource = resource.with_dependency(dep);
            }
            for (field, raw) in &manifest.inputs {
                let value = classify_input(&manifest.id, field, raw, secrets)?;
                resource = resource.with_input(field, value);
            }
            set.insert(resource)?;
        }

        Ok(set)
    }
}

impl StateConfig {
    /// Builds the configured state store backend.
    ///
    /// # Errors
    ///
    /// Returns a validation error for an incomplete backend configuration,
    /// or a backend error if initialization fails.
    pub async fn build_store(&self) -> Result<Box<dyn StateStore>> {
        match self.backend {
            StateBackend::Local => {
                let store = self.path.as_ref().map_or_else(
                    LocalStateStore::new,
                    |path| Ok(LocalStateStore::with_state_path(path)),
                )?;
                Ok(Box::new(store))
            }
            StateBackend::S3 => {
                let bucket = self.bucket.as_deref().filter(|b| !b.is_empty()).ok_or_else(|| {
                    ConvergeError::Config(ConfigError::validation(
                        "S3 bucket name is required when using the s3 backend",
                        "state.bucket",
                    ))
                })?;
                let store =
                    S3StateStore::new(bucket, self.prefix.as_deref(), self.region.as_deref())
                        .await?;
                Ok(Box::new(store))
            }
        }
    }
}

/// Classifies one raw manifest input into a model [`Value`].
fn classify_input(
    resource: &str,
    field: &str,
    raw: &serde_yaml::Value,
    secrets: &dyn SecretSource,
) -> Result<Value> {
    if let serde_yaml::Value::Mapping(mapping) = raw
        && mapping.len() == 1
    {
        if let Some(expr) = mapping.get("ref") {
            let expr = expr.as_str().unwrap_or_default();
            let Some((target, output)) = split_reference(expr) else {
                return Err(ConvergeError::Config(ConfigError::InvalidReference {
                    resource: resource.to_string(),
                    field: field.to_string(),
                    value: expr.to_string(),
                }));
            };
            return Ok(Value::reference(target, output));
        }

        if let Some(name) = mapping.get("secret") {
            let name = name.as_str().unwrap_or_default();
            let Some(plaintext) = secrets.get(name) else {
                return Err(ConvergeError::Config(ConfigError::MissingSecret {
                    name: name.to_string(),
                    resource: resource.to_string(),
                }));
            };
            return Ok(Value::secret(plaintext));
        }
    }

    let literal = serde_json::to_value(raw).map_err(|e| {
        ConvergeError::Config(ConfigError::ParseError {
            message: format!("Input {resource}.{field} is not a valid literal: {e}"),
            location: None,
        })
    })?;
    Ok(Value::literal(literal))
}

/// Splits a `RESOURCE.OUTPUT` expression.
fn split_reference(expr: &str) -> Option<(&str, &str)> {
    let (target, output) = expr.split_once('.')?;
    if target.is_empty() || output.is_empty() {
        return None;
    }
    Some((target, output))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parser::StaticSecrets;

    fn secrets() -> StaticSecrets {
        StaticSecrets::from([(String::from("DB_PASSWORD"), String::from("hunter2"))])
    }

    fn manifest(yaml: &str) -> Manifest {
        serde_yaml::from_str(yaml).expect("parse manifest")
    }

    #[test]
    fn test_desired_set_classifies_inputs() {
        let manifest = manifest(
            r#"
project:
  name: app-stack
resources:
  - id: db
    type: database
    inputs:
      engine: postgres
      password:
        secret: DB_PASSWORD
  - id: app
    type: service
    inputs:
      db_host:
        ref: db.endpoint
      replicas: 2
"#,
        );

        let set = manifest.desired_set(&secrets()).expect("convert");
        let db = set.get("db").expect("db");
        assert_eq!(db.inputs["engine"], Value::literal("postgres"));
        assert_eq!(db.inputs["password"], Value::secret("hunter2"));

        let app = set.get("app").expect("app");
        assert_eq!(app.inputs["db_host"], Value::reference("db", "endpoint"));
        assert_eq!(app.inputs["replicas"], Value::literal(2));
    }

    #[test]
    fn test_missing_secret_rejected() {
        let manifest = manifest(
            r"
project:
  name: app-stack
resources:
  - id: db
    type: database
    inputs:
      password:
        secret: NOPE
",
        );

        let err = manifest.desired_set(&secrets()).expect_err("missing secret");
        assert!(matches!(
            err,
            ConvergeError::Config(ConfigError::MissingSecret { .. })
        ));
    }

    #[test]
    fn test_malformed_reference_rejected() {
        let manifest = manifest(
            r"
project:
  name: app-stack
resources:
  - id: app
    type: service
    inputs:
      db_host:
        ref: no-dot-here
",
        );

        let err = manifest.desired_set(&secrets()).expect_err("bad ref");
        assert!(matches!(
            err,
            ConvergeError::Config(ConfigError::InvalidReference { .. })
        ));
    }

    #[tokio::test]
    async fn test_build_store_local() {
        let temp = tempfile::TempDir::new().expect("temp dir");
        let config = StateConfig {
            backend: StateBackend::Local,
            path: Some(
                temp.path()
                    .join("state.json")
                    .to_string_lossy()
                    .into_owned(),
            ),
            ..StateConfig::default()
        };

        let store = config.build_store().await.expect("local store");
        assert_eq!(store.backend_type(), "local");
    }

    #[tokio::test]
    async fn test_build_store_s3_requires_bucket() {
        let config = StateConfig {
            backend: StateBackend::S3,
            ..StateConfig::default()
        };

        let err = config.build_store().await.err().expect("missing bucket");
        assert!(matches!(
            err,
            ConvergeError::Config(ConfigError::ValidationError { .. })
        ));
    }

    #[test]
    fn test_defaults() {
        let manifest = manifest(
            r"
project:
  name: app-stack
",
        );

        assert_eq!(manifest.project.environment, "dev");
        assert_eq!(manifest.state.backend, StateBackend::Local);
        assert_eq!(manifest.engine.concurrency, 1);
        assert_eq!(manifest.qualified_name(), "app-stack-dev");
    }
}
