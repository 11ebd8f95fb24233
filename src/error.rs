//! Error types for the converge reconciliation engine.
//!
//! This module provides a comprehensive error hierarchy for all phases of a
//! reconciliation run: configuration, graph construction, planning,
//! execution, state management, and provider calls.
//!
//! Planning-time errors ([`GraphError`], [`PlanError`]) always fail fast
//! before any remote mutation. Execution-time errors ([`ApplyError`]) leave
//! the state store consistent with reality: no resource is recorded as
//! applied unless the provider call returned success.

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for the converge engine.
#[derive(Debug, Error)]
pub enum ConvergeError {
    /// Configuration-related errors.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Dependency graph construction errors.
    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    /// Planning errors.
    #[error("Planning error: {0}")]
    Plan(#[from] PlanError),

    /// Plan execution errors.
    #[error("Apply error: {0}")]
    Apply(#[from] ApplyError),

    /// State management errors.
    #[error("State error: {0}")]
    State(#[from] StateError),

    /// Provider errors.
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// IO errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The manifest file was not found.
    #[error("Manifest file not found: {path}")]
    FileNotFound {
        /// Path to the missing file.
        path: PathBuf,
    },

    /// The manifest could not be parsed.
    #[error("Failed to parse manifest: {message}")]
    ParseError {
        /// Description of the parse error.
        message: String,
        /// Optional source location.
        location: Option<String>,
    },

    /// Validation failed.
    #[error("Manifest validation failed: {message}")]
    ValidationError {
        /// Description of the validation error.
        message: String,
        /// Resource or field that failed validation.
        field: Option<String>,
    },

    /// Two resources declare the same id.
    #[error("Duplicate resource id: {id}")]
    DuplicateResource {
        /// The duplicated resource id.
        id: String,
    },

    /// A named secret could not be resolved from the environment.
    #[error("Missing secret '{name}' required by resource '{resource}'")]
    MissingSecret {
        /// Name of the secret.
        name: String,
        /// Resource that requires it.
        resource: String,
    },

    /// A reference expression could not be parsed.
    #[error("Invalid reference '{value}' in {resource}.{field}: expected RESOURCE.OUTPUT")]
    InvalidReference {
        /// Resource declaring the reference.
        resource: String,
        /// Input field holding the reference.
        field: String,
        /// The malformed reference expression.
        value: String,
    },
}

/// Dependency graph construction errors.
#[derive(Debug, Error)]
pub enum GraphError {
    /// The dependency graph contains a cycle.
    #[error("Dependency cycle detected: {}", .cycle.join(" -> "))]
    Cycle {
        /// The full cycle, in edge order, closing back on the first entry.
        cycle: Vec<String>,
    },

    /// A reference or explicit dependency points at an unknown resource.
    #[error("Resource '{resource}' depends on '{target}', which is not in the desired set or prior state")]
    DanglingReference {
        /// Resource declaring the dependency.
        resource: String,
        /// The unknown target id.
        target: String,
    },
}

/// Planning errors.
#[derive(Debug, Error)]
pub enum PlanError {
    /// A resource slated for deletion is still referenced by the desired set.
    #[error("Cannot delete '{resource}': still required by {}", .dependents.join(", "))]
    DependencyConflict {
        /// The resource that would be deleted.
        resource: String,
        /// Desired resources that still depend on it.
        dependents: Vec<String>,
    },

    /// No provider is registered for a resource type named by the plan.
    #[error("No provider registered for type '{type_name}' (resource '{resource}')")]
    UnknownType {
        /// The unregistered resource type.
        type_name: String,
        /// The resource that requires it.
        resource: String,
    },
}

/// Plan execution errors.
#[derive(Debug, Error)]
pub enum ApplyError {
    /// The run halted partway through; everything applied so far stays applied.
    ///
    /// The state snapshot reflects exactly the resources that succeeded
    /// before the halt, so a retry computed from a fresh plan resumes at the
    /// failure point.
    #[error("Apply halted at '{failed_at}' after {} resource(s): {cause}", .applied.len())]
    PartialApply {
        /// Ids applied successfully before the halt, in completion order.
        applied: Vec<String>,
        /// Id of the resource whose apply failed.
        failed_at: String,
        /// The underlying failure.
        #[source]
        cause: Box<ConvergeError>,
    },

    /// A reference could not be resolved from recorded outputs.
    ///
    /// With a well-formed plan this indicates state corruption: the ordering
    /// invariant guarantees the dependency was applied first.
    #[error("Resource '{resource}' references missing output {dependency}.{output}")]
    MissingOutput {
        /// Resource being applied.
        resource: String,
        /// The dependency named by the reference.
        dependency: String,
        /// The output field named by the reference.
        output: String,
    },

    /// A secret input has no plaintext available for substitution.
    #[error("Secret plaintext unavailable for {resource}.{field}")]
    SecretUnavailable {
        /// Resource being applied.
        resource: String,
        /// The secret input field.
        field: String,
    },

    /// The run was cancelled between resource applications.
    #[error("Apply cancelled after {} resource(s)", .applied.len())]
    Cancelled {
        /// Ids applied successfully before cancellation.
        applied: Vec<String>,
    },
}

/// State management errors.
#[derive(Debug, Error)]
pub enum StateError {
    /// State document not found.
    #[error("State not found: {path}")]
    NotFound {
        /// Path to the missing state document.
        path: PathBuf,
    },

    /// State is corrupted.
    #[error("State is corrupted: {message}")]
    Corrupted {
        /// Description of the corruption.
        message: String,
    },

    /// State lock acquisition failed.
    #[error("Failed to acquire state lock: {message}")]
    LockFailed {
        /// Description of the lock failure.
        message: String,
    },

    /// State lock is held by another process.
    #[error("State is locked by another process (lock holder: {holder}, since: {since})")]
    LockedByOther {
        /// Identifier of the lock holder.
        holder: String,
        /// When the lock was acquired.
        since: String,
    },

    /// A save raced with another writer.
    ///
    /// The caller must reload the snapshot and recompute the plan.
    #[error("Stale state snapshot: expected version {expected}, found {found}")]
    StaleSnapshot {
        /// Version the store expected to be written next.
        expected: u64,
        /// Version the caller attempted to write.
        found: u64,
    },

    /// Backend storage error.
    #[error("State backend error: {message}")]
    Backend {
        /// Description of the backend error.
        message: String,
    },

    /// Serialization error.
    #[error("State serialization error: {message}")]
    Serialization {
        /// Description of the serialization error.
        message: String,
    },
}

/// Errors surfaced by provider implementations.
///
/// The engine performs no retries of its own; retry policy belongs to the
/// provider, which knows which of its failures are transient.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The remote object does not exist.
    #[error("Resource '{resource}' not found during {operation}")]
    NotFound {
        /// The resource id.
        resource: String,
        /// The operation that observed the absence.
        operation: ProviderOp,
    },

    /// The provider call failed.
    #[error("Provider {operation} failed for '{resource}': {message}")]
    Failed {
        /// The resource id.
        resource: String,
        /// The failing operation.
        operation: ProviderOp,
        /// Error message from the provider.
        message: String,
    },
}

/// Provider operations, for error attribution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderOp {
    /// Resource creation.
    Create,
    /// Remote read.
    Read,
    /// In-place update.
    Update,
    /// Resource deletion.
    Delete,
}

/// Result type alias for converge operations.
pub type Result<T> = std::result::Result<T, ConvergeError>;

impl ConvergeError {
    /// Creates a new internal error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Returns true if this error is retryable after reloading state.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::State(
                StateError::StaleSnapshot { .. }
                    | StateError::LockFailed { .. }
                    | StateError::LockedByOther { .. }
            )
        )
    }
}

impl ConfigError {
    /// Creates a validation error for a specific resource or field.
    #[must_use]
    pub fn validation(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Creates a validation error without a specific field.
    #[must_use]
    pub fn validation_general(message: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: None,
        }
    }
}

impl StateError {
    /// Creates a backend error with the given message.
    #[must_use]
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
        }
    }

    /// Creates a serialization error with the given message.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }
}

impl ProviderError {
    /// Creates a failure for the given resource and operation.
    #[must_use]
    pub fn failed(resource: impl Into<String>, operation: ProviderOp, message: impl Into<String>) -> Self {
        Self::Failed {
            resource: resource.into(),
            operation,
            message: message.into(),
        }
    }

    /// Creates a not-found error for the given resource and operation.
    #[must_use]
    pub fn not_found(resource: impl Into<String>, operation: ProviderOp) -> Self {
        Self::NotFound {
            resource: resource.into(),
            operation,
        }
    }

    /// Returns true if the remote object was missing.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl std::fmt::Display for ProviderOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let op = match self {
            Self::Create => "create",
            Self::Read => "read",
            Self::Update => "update",
            Self::Delete => "delete",
        };
        write!(f, "{op}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_error_names_every_member() {
        let err = GraphError::Cycle {
            cycle: vec![
                String::from("app"),
                String::from("cache"),
                String::from("app"),
            ],
        };
        assert_eq!(
            err.to_string(),
            "Dependency cycle detected: app -> cache -> app"
        );
    }

    #[test]
    fn test_stale_snapshot_is_retryable() {
        let err = ConvergeError::State(StateError::StaleSnapshot {
            expected: 4,
            found: 6,
        });
        assert!(err.is_retryable());
    }

    #[test]
    fn test_provider_error_not_found() {
        let err = ProviderError::not_found("db", ProviderOp::Delete);
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "Resource 'db' not found during delete");
    }
}
