// ============================================================================
// Strict linting - Dangerous or non-idiomatic practices are forbidden
// ============================================================================

#![deny(warnings)]                    // All warnings are treated as errors
#![deny(unsafe_code)]                 // Unsafe code is forbidden
#![deny(missing_docs)]                // All public items must be documented
#![deny(dead_code)]                   // Unused code is forbidden
#![deny(non_camel_case_types)]        // Types must follow CamelCase convention

// Additional strictness - Leave nothing unchecked
#![deny(unused_imports)]              // Unused imports are forbidden
#![deny(unused_variables)]            // Unused variables are forbidden
#![deny(unused_must_use)]             // Must handle Result and Option explicitly
#![deny(non_snake_case)]              // Variables and functions must be snake_case
#![deny(non_upper_case_globals)]      // Constants must be UPPER_CASE
#![deny(nonstandard_style)]           // Non-standard code style is forbidden
#![forbid(unsafe_op_in_unsafe_fn)]    // Unsafe ops in unsafe fns are forbidden

// Clippy lints (warnings only)
#![warn(clippy::all)]                 // All standard Clippy lints
#![warn(clippy::pedantic)]            // Very strict Clippy lints
#![warn(clippy::nursery)]             // Experimental lints
#![warn(clippy::unwrap_used)]         // unwrap() warning
#![warn(clippy::expect_used)]         // expect() warning
#![warn(clippy::panic)]               // panic!() warning
#![warn(clippy::print_stdout)]        // println!() warning
#![warn(clippy::todo)]                // TODO warning
#![warn(clippy::unimplemented)]       // unimplemented!() warning
#![warn(clippy::missing_const_for_fn)] // Force const when possible
#![warn(clippy::unwrap_in_result)]    // unwrap() in Result warning
#![warn(clippy::module_inception)]    // Module with same name as crate warning
#![warn(clippy::redundant_clone)]     // Useless clones warning
#![warn(clippy::shadow_unrelated)]    // Shadowing unrelated variables warning
#![warn(clippy::too_many_arguments)]  // Limit function arguments
#![warn(clippy::cognitive_complexity)] // Limit cognitive complexity

// Safety and robustness lints
#![deny(overflowing_literals)]        // Overflowing literals are forbidden
#![deny(arithmetic_overflow)]         // Arithmetic overflow is forbidden

// ============================================================================
// Crate Documentation
// ============================================================================

//! # Converge
//!
//! A declarative resource-dependency resolver and reconciliation engine.
//!
//! ## Overview
//!
//! Converge takes a desired set of typed resources, derives a dependency
//! DAG from input references and explicit dependencies, diffs the set
//! against the last-applied state snapshot, and applies the resulting
//! ordered plan through a uniform provider interface:
//!
//! - Describe resources declaratively; wire them with symbolic references
//!   to each other's outputs
//! - Plans are deterministic and honor dependency order
//! - Partial failures leave state consistent and runs resumable
//! - Secrets are compared and persisted by content hash, never plaintext
//!
//! ## Architecture
//!
//! The engine is built around **desired state reconciliation**:
//!
//! 1. **Desired State**: the resource set from `converge.yaml`
//! 2. **Recorded State**: the versioned snapshot from the state store
//! 3. **Reconciler**: graph, diff, plan, and apply until they match
//!
//! ## Modules
//!
//! - [`resource`]: resource model (values, references, secrets, policies)
//! - [`config`]: manifest parsing, validation, and secret resolution
//! - [`graph`]: dependency graph construction and deterministic ordering
//! - [`planner`]: diff computation, plan construction, and execution
//! - [`provider`]: the provider interface and registry
//! - [`state`]: state snapshot storage backends (local, S3)
//! - [`reconciler`]: the reconciliation loop
//!
//! ## Example
//!
//! ```yaml
//! project:
//!   name: app-stack
//!   environment: prod
//!
//! resources:
//!   - id: db
//!     type: database
//!     inputs:
//!       engine: postgres
//!       password:
//!         secret: DB_PASSWORD
//!   - id: app
//!     type: service
//!     inputs:
//!       db_host:
//!         ref: db.endpoint
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod config;
pub mod error;
pub mod graph;
pub mod planner;
pub mod provider;
pub mod reconciler;
pub mod resource;
pub mod state;

// ============================================================================
// Re-exports
// ============================================================================

pub use config::{
    EnvSecrets, InputHasher, Manifest, ManifestParser, ManifestValidator, SecretSource,
};
pub use error::{ConvergeError, Result};
pub use graph::DependencyGraph;
pub use planner::{
    Action, ActionKind, ApplyReport, CancelToken, DiffEngine, Executor, Plan, DEFAULT_CONCURRENCY,
};
pub use provider::{MemoryProvider, Outputs, Provider, ProviderRegistry, ResolvedInputs};
pub use reconciler::{DriftReport, ReconcileOutcome, Reconciler};
pub use resource::{DesiredSet, Resource, SecretValue, TypePolicies, TypePolicy, Value};
pub use state::{LocalStateStore, ResourceRecord, S3StateStore, StateSnapshot, StateStore};
