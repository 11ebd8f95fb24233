//! Manifest validation.
//!
//! Shallow, fail-fast checks on the manifest before it is converted into a
//! desired set: naming, duplicates, self-dependencies, and backend
//! completeness. Graph-level checks (cycles, dangling references across
//! prior state) belong to the graph builder.

use crate::error::{ConfigError, ConvergeError, Result};
use std::collections::HashSet;
use tracing::debug;

use super::manifest::{Manifest, ResourceManifest, StateBackend, StateConfig};

/// Validator for manifests.
#[derive(Debug, Default)]
pub struct ManifestValidator;

/// Validation result containing all errors found.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// List of validation errors.
    pub errors: Vec<ValidationError>,
    /// List of warnings (non-fatal issues).
    pub warnings: Vec<String>,
}

/// A single validation error.
#[derive(Debug)]
pub struct ValidationError {
    /// The field path that failed validation.
    pub field: String,
    /// The error message.
    pub message: String,
}

impl ManifestValidator {
    /// Creates a new validator.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Validates a manifest.
    ///
    /// # Errors
    ///
    /// Returns the first validation error found.
    pub fn validate(&self, manifest: &Manifest) -> Result<ValidationResult> {
        let mut result = ValidationResult::default();

        Self::validate_project(manifest, &mut result);
        Self::validate_state(&manifest.state, &mut result);
        Self::validate_engine(manifest, &mut result);
        Self::validate_resources(&manifest.resources, &mut result);

        if result.errors.is_empty() {
            debug!("Manifest validation passed");
            Ok(result)
        } else {
            let first_error = &result.errors[0];
            Err(ConvergeError::Config(ConfigError::ValidationError {
                message: first_error.message.clone(),
                field: Some(first_error.field.clone()),
            }))
        }
    }

    /// Validates project configuration.
    fn validate_project(manifest: &Manifest, result: &mut ValidationResult) {
        if manifest.project.name.is_empty() {
            result.errors.push(ValidationError {
                field: String::from("project.name"),
                message: String::from("Project name cannot be empty"),
            });
        } else if !is_valid_name(&manifest.project.name) {
            result.errors.push(ValidationError {
                field: String::from("project.name"),
                message: format!(
                    "Project name '{}' is invalid. Must be lowercase alphanumeric with hyphens.",
                    manifest.project.name
                ),
            });
        }

        if manifest.project.environment.is_empty() {
            result.errors.push(ValidationError {
                field: String::from("project.environment"),
                message: String::from("Environment cannot be empty"),
            });
        }
    }

    /// Validates state configuration.
    fn validate_state(state: &StateConfig, result: &mut ValidationResult) {
        match state.backend {
            StateBackend::S3 => {
                if state.bucket.as_ref().is_none_or(String::is_empty) {
                    result.errors.push(ValidationError {
                        field: String::from("state.bucket"),
                        message: String::from("S3 bucket name is required when using S3 backend"),
                    });
                }
            }
            StateBackend::Local => {
                // Local backend is always valid
            }
        }
    }

    /// Validates engine tuning.
    fn validate_engine(manifest: &Manifest, result: &mut ValidationResult) {
        if manifest.engine.concurrency == 0 {
            result.errors.push(ValidationError {
                field: String::from("engine.concurrency"),
                message: String::from("Concurrency must be at least 1"),
            });
        }

        if manifest.engine.concurrency > 16 {
            result.warnings.push(format!(
                "engine.concurrency: {} workers is unusually high for rate-limited provider APIs",
                manifest.engine.concurrency
            ));
        }
    }

    /// Validates all resource entries.
    fn validate_resources(resources: &[ResourceManifest], result: &mut ValidationResult) {
        if resources.is_empty() {
            result.warnings.push(String::from("No resources defined in manifest"));
            return;
        }

        let ids: HashSet<&str> = resources.iter().map(|r| r.id.as_str()).collect();
        let mut seen_ids = HashSet::new();

        for (i, resource) in resources.iter().enumerate() {
            let prefix = format!("resources[{i}]");

            // Validate unique id
            if seen_ids.contains(&resource.id) {
                result.errors.push(ValidationError {
                    field: format!("{prefix}.id"),
                    message: format!("Duplicate resource id: {}", resource.id),
                });
            } else {
                seen_ids.insert(&resource.id);
            }

            // Validate id format
            if resource.id.is_empty() || !is_valid_name(&resource.id) {
                result.errors.push(ValidationError {
                    field: format!("{prefix}.id"),
                    message: format!(
                        "Resource id '{}' is invalid. Must be lowercase alphanumeric with hyphens.",
                        resource.id
                    ),
                });
            }

            if resource.type_name.is_empty() {
                result.errors.push(ValidationError {
                    field: format!("{prefix}.type"),
                    message: String::from("Resource type cannot be empty"),
                });
            }

            Self::validate_dependencies(resource, &ids, &prefix, result);
        }
    }

    /// Validates explicit dependency declarations.
    fn validate_dependencies(
        resource: &ResourceManifest,
        ids: &HashSet<&str>,
        prefix: &str,
        result: &mut ValidationResult,
    ) {
        let mut seen = HashSet::new();

        for (i, dep) in resource.depends_on.iter().enumerate() {
            if dep == &resource.id {
                result.errors.push(ValidationError {
                    field: format!("{prefix}.depends_on[{i}]"),
                    message: format!("Resource '{}' cannot depend on itself", resource.id),
                });
            }

            if !seen.insert(dep.as_str()) {
                result.warnings.push(format!(
                    "{prefix}.depends_on[{i}]: duplicate dependency '{dep}'"
                ));
            }

            // Unknown ids may still resolve against prior state; warn only.
            if !ids.contains(dep.as_str()) {
                result.warnings.push(format!(
                    "{prefix}.depends_on[{i}]: '{dep}' is not declared in this manifest"
                ));
            }
        }
    }
}

/// Checks if a name is valid (lowercase alphanumeric with hyphens and
/// underscores, starting with a letter or digit).
fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
        && name
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ManifestParser;

    fn parse(yaml: &str) -> Manifest {
        ManifestParser::new().parse_yaml(yaml, None).expect("parse")
    }

    #[test]
    fn test_valid_manifest_passes() {
        let manifest = parse(
            r"
project:
  name: app-stack
resources:
  - id: db
    type: database
  - id: app
    type: service
    depends_on: [db]
",
        );

        let result = ManifestValidator::new().validate(&manifest).expect("valid");
        assert!(result.errors.is_empty());
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let manifest = parse(
            r"
project:
  name: app-stack
resources:
  - id: db
    type: database
  - id: db
    type: cache
",
        );

        let err = ManifestValidator::new().validate(&manifest).expect_err("dup");
        assert!(matches!(
            err,
            ConvergeError::Config(ConfigError::ValidationError { .. })
        ));
    }

    #[test]
    fn test_self_dependency_rejected() {
        let manifest = parse(
            r"
project:
  name: app-stack
resources:
  - id: db
    type: database
    depends_on: [db]
",
        );

        assert!(ManifestValidator::new().validate(&manifest).is_err());
    }

    #[test]
    fn test_invalid_name_rejected() {
        let manifest = parse(
            r"
project:
  name: app-stack
resources:
  - id: 'Bad Name'
    type: database
",
        );

        assert!(ManifestValidator::new().validate(&manifest).is_err());
    }

    #[test]
    fn test_unknown_dependency_warns_only() {
        let manifest = parse(
            r"
project:
  name: app-stack
resources:
  - id: app
    type: service
    depends_on: [legacy-db]
",
        );

        let result = ManifestValidator::new().validate(&manifest).expect("valid");
        assert_eq!(result.warnings.len(), 1);
    }

    #[test]
    fn test_s3_backend_requires_bucket() {
        let manifest = parse(
            r"
project:
  name: app-stack
state:
  backend: s3
",
        );

        assert!(ManifestValidator::new().validate(&manifest).is_err());
    }
}
