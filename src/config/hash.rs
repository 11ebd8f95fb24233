//! Deterministic hashing of desired configuration.
//!
//! Produces stable fingerprints for resources and whole desired sets, used
//! for run identity in logs and reports. Secrets contribute only their
//! content hash, so two configurations with the same secret plaintext hash
//! equal without the plaintext ever being touched here.

use sha2::{Digest, Sha256};

use crate::resource::{DesiredSet, Resource, Value};

/// Hasher for computing configuration fingerprints.
#[derive(Debug, Default)]
pub struct InputHasher;

impl InputHasher {
    /// Creates a new hasher.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Computes a hash of the entire desired set.
    ///
    /// This hash changes when any resource changes; iteration order is
    /// already deterministic (ascending id).
    #[must_use]
    pub fn hash_desired_set(&self, desired: &DesiredSet) -> String {
        let mut hasher = Sha256::new();

        for resource in desired {
            hasher.update(self.hash_resource(resource).as_bytes());
        }

        hex::encode(hasher.finalize())
    }

    /// Computes a hash for a single resource.
    #[must_use]
    pub fn hash_resource(&self, resource: &Resource) -> String {
        let mut hasher = Sha256::new();

        hasher.update(resource.id.as_bytes());
        hasher.update([0]);
        hasher.update(resource.type_name.as_bytes());
        hasher.update([0]);

        // BTreeMap iteration keeps field order stable.
        for (field, value) in &resource.inputs {
            hasher.update(field.as_bytes());
            hasher.update([0]);
            hash_value(&mut hasher, value);
        }

        for dep in &resource.depends_on {
            hasher.update(dep.as_bytes());
            hasher.update([0]);
        }

        hex::encode(hasher.finalize())
    }

    /// Computes a short hash (first 8 characters) for display purposes.
    #[must_use]
    pub fn short_hash(&self, hash: &str) -> String {
        hash.chars().take(8).collect()
    }

    /// Compares two hashes in constant time.
    #[must_use]
    pub fn hashes_match(hash1: &str, hash2: &str) -> bool {
        if hash1.len() != hash2.len() {
            return false;
        }

        hash1
            .bytes()
            .zip(hash2.bytes())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
    }
}

/// Feeds one value into the hasher.
fn hash_value(hasher: &mut Sha256, value: &Value) {
    match value {
        Value::Literal(json) => {
            hasher.update(b"lit:");
            hash_json(hasher, json);
        }
        Value::Reference { resource, output } => {
            hasher.update(b"ref:");
            hasher.update(resource.as_bytes());
            hasher.update(b".");
            hasher.update(output.as_bytes());
        }
        Value::Secret(secret) => {
            hasher.update(b"secret:");
            hasher.update(secret.hash().as_bytes());
        }
    }
    hasher.update([0]);
}

/// Feeds a JSON value into the hasher with sorted object keys.
fn hash_json(hasher: &mut Sha256, json: &serde_json::Value) {
    match json {
        serde_json::Value::Null => hasher.update(b"null"),
        serde_json::Value::Bool(b) => hasher.update(if *b { b"true" as &[u8] } else { b"false" }),
        serde_json::Value::Number(n) => hasher.update(n.to_string().as_bytes()),
        serde_json::Value::String(s) => {
            hasher.update(b"\"");
            hasher.update(s.as_bytes());
        }
        serde_json::Value::Array(items) => {
            hasher.update(b"[");
            for item in items {
                hash_json(hasher, item);
                hasher.update(b",");
            }
        }
        serde_json::Value::Object(map) => {
            hasher.update(b"{");
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort_unstable();
            for key in keys {
                hasher.update(key.as_bytes());
                hasher.update(b":");
                if let Some(item) = map.get(key) {
                    hash_json(hasher, item);
                }
                hasher.update(b",");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_resource(id: &str) -> Resource {
        Resource::new(id, "database")
            .with_input("engine", Value::literal("postgres"))
            .with_input("password", Value::secret("hunter2"))
    }

    #[test]
    fn test_resource_hash_deterministic() {
        let hasher = InputHasher::new();
        let resource = test_resource("db");

        let hash1 = hasher.hash_resource(&resource);
        let hash2 = hasher.hash_resource(&resource);

        assert_eq!(hash1, hash2);
    }

    #[test]
    fn test_different_resources_different_hash() {
        let hasher = InputHasher::new();

        let hash1 = hasher.hash_resource(&test_resource("db-1"));
        let hash2 = hasher.hash_resource(&test_resource("db-2"));

        assert_ne!(hash1, hash2);
    }

    #[test]
    fn test_secret_plaintext_affects_hash_via_digest_only() {
        let hasher = InputHasher::new();

        let with_one = Resource::new("db", "database").with_input("pw", Value::secret("hunter2"));
        let with_other = Resource::new("db", "database").with_input("pw", Value::secret("hunter3"));
        let with_same = Resource::new("db", "database").with_input("pw", Value::secret("hunter2"));

        assert_ne!(hasher.hash_resource(&with_one), hasher.hash_resource(&with_other));
        assert_eq!(hasher.hash_resource(&with_one), hasher.hash_resource(&with_same));
    }

    #[test]
    fn test_object_key_order_is_irrelevant() {
        let hasher = InputHasher::new();

        let a = Resource::new("db", "database")
            .with_input("opts", Value::literal(serde_json::json!({"a": 1, "b": 2})));
        let b = Resource::new("db", "database")
            .with_input("opts", Value::literal(serde_json::json!({"b": 2, "a": 1})));

        assert_eq!(hasher.hash_resource(&a), hasher.hash_resource(&b));
    }

    #[test]
    fn test_short_hash() {
        let hasher = InputHasher::new();
        let full_hash = "abcdef1234567890abcdef1234567890";
        let short = hasher.short_hash(full_hash);

        assert_eq!(short, "abcdef12");
        assert_eq!(short.len(), 8);
    }

    #[test]
    fn test_hashes_match() {
        assert!(InputHasher::hashes_match("abc123", "abc123"));
        assert!(!InputHasher::hashes_match("abc123", "abc124"));
        assert!(!InputHasher::hashes_match("abc123", "abc12"));
    }
}
