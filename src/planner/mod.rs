//! Planning and execution.
//!
//! This module compares the desired set against recorded state, produces an
//! ordered change-set honoring the dependency graph, and applies it through
//! the provider interface.

mod diff;
mod plan;
mod executor;

pub use diff::{ChangeKind, DiffDetail, DiffEngine, DiffResult, ResourceDiff};
pub use plan::{Action, ActionKind, Plan};
pub use executor::{ApplyReport, CancelToken, Executor, DEFAULT_CONCURRENCY};
