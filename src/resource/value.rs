//! Input values: literals, references, and redacted secrets.
//!
//! A [`Value`] is the tagged union carried by every resource input field.
//! References stay symbolic until apply time; secrets are reduced to a
//! SHA-256 content hash the moment they enter the model, so plaintext never
//! reaches logs, diffs, or persisted state.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A single resource input value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Value {
    /// A concrete scalar or structured literal.
    Literal(serde_json::Value),

    /// A symbolic reference to an output of another resource.
    ///
    /// Resolved only after the target resource reaches the applied state.
    Reference {
        /// Id of the resource whose output is referenced.
        resource: String,
        /// Name of the output field on that resource.
        output: String,
    },

    /// An opaque secret, compared and persisted by content hash only.
    Secret(SecretValue),
}

/// A secret value holding an optional in-memory plaintext and its hash.
///
/// The plaintext is present only on values constructed from configuration in
/// this process; values deserialized from persisted state carry the hash
/// alone. Equality is defined over the hash.
#[derive(Clone, Serialize, Deserialize)]
pub struct SecretValue {
    /// SHA-256 content hash, hex encoded.
    hash: String,
    /// In-memory plaintext, never serialized.
    #[serde(skip)]
    plaintext: Option<String>,
}

impl Value {
    /// Creates a literal value.
    #[must_use]
    pub fn literal(value: impl Into<serde_json::Value>) -> Self {
        Self::Literal(value.into())
    }

    /// Creates a reference to `resource`'s output field `output`.
    #[must_use]
    pub fn reference(resource: impl Into<String>, output: impl Into<String>) -> Self {
        Self::Reference {
            resource: resource.into(),
            output: output.into(),
        }
    }

    /// Creates a secret from plaintext, retaining only the plaintext in
    /// memory and its content hash for comparison.
    #[must_use]
    pub fn secret(plaintext: impl Into<String>) -> Self {
        Self::Secret(SecretValue::new(plaintext))
    }

    /// Returns the `(resource, output)` pair if this value is a reference.
    #[must_use]
    pub fn as_reference(&self) -> Option<(&str, &str)> {
        match self {
            Self::Reference { resource, output } => Some((resource.as_str(), output.as_str())),
            _ => None,
        }
    }

    /// Returns true if this value is a secret.
    #[must_use]
    pub const fn is_secret(&self) -> bool {
        matches!(self, Self::Secret(_))
    }
}

impl SecretValue {
    /// Creates a secret value from plaintext.
    #[must_use]
    pub fn new(plaintext: impl Into<String>) -> Self {
        let plaintext = plaintext.into();
        let hash = hex::encode(Sha256::digest(plaintext.as_bytes()));
        Self {
            hash,
            plaintext: Some(plaintext),
        }
    }

    /// Returns the hex-encoded SHA-256 content hash.
    #[must_use]
    pub fn hash(&self) -> &str {
        &self.hash
    }

    /// Returns the plaintext, if available in this process.
    ///
    /// Values loaded from persisted state have no plaintext.
    #[must_use]
    pub fn reveal(&self) -> Option<&str> {
        self.plaintext.as_deref()
    }

    /// Returns the first 8 characters of the hash for display.
    #[must_use]
    pub fn short_hash(&self) -> &str {
        &self.hash[..self.hash.len().min(8)]
    }
}

impl PartialEq for SecretValue {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash
    }
}

impl std::fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SecretValue(sha256:{})", self.short_hash())
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Literal(value) => write!(f, "{value}"),
            Self::Reference { resource, output } => write!(f, "${{{resource}.{output}}}"),
            Self::Secret(secret) => write!(f, "(secret sha256:{})", secret.short_hash()),
        }
    }
}
