//! The resource model: typed desired-state descriptions.
//!
//! A [`Resource`] declares what should exist: an id, a type, and a mapping of
//! input fields to [`Value`]s. Values are literals, references to outputs of
//! other resources, or secrets reduced to a content hash for comparison.

mod types;
mod value;

pub use types::{DesiredSet, Resource, TypePolicies, TypePolicy};
pub use value::{SecretValue, Value};
