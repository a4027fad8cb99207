//! Canonical descriptor digests
//!
//! Provides [`DescriptorDigest`], a 32-byte Blake3 hash over the canonical
//! JSON form of a descriptor (object keys sorted). Two descriptors with the
//! same digest are structurally equal.

use serde::Serialize;
use serde_json::Value as JsonValue;
use std::fmt::{self, Display, Formatter};

/// Blake3 digest of a descriptor's canonical form
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DescriptorDigest(blake3::Hash);

impl DescriptorDigest {
    /// Hash raw bytes
    #[inline]
    #[must_use]
    pub fn compute(data: &[u8]) -> Self {
        Self(blake3::hash(data))
    }

    /// Hash the canonical JSON form of a serializable value
    ///
    /// # Errors
    /// Returns error if the value cannot be serialized to JSON
    pub fn of<T: Serialize>(value: &T) -> Result<Self, DigestError> {
        let json = serde_json::to_value(value)?;
        Ok(Self::compute(canonical_json(&json).as_bytes()))
    }

    /// First 8 bytes in hex, for logs
    #[must_use]
    pub fn short(&self) -> String {
        hex::encode(&self.0.as_bytes()[..8])
    }
}

impl Display for DescriptorDigest {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0.as_bytes()))
    }
}

/// Descriptor could not be turned into JSON
#[derive(Debug, thiserror::Error)]
#[error("descriptor cannot be serialized: {0}")]
pub struct DigestError(#[from] serde_json::Error);

/// Canonical JSON (sorted keys, escaped strings)
fn canonical_json(value: &JsonValue) -> String {
    match value {
        JsonValue::Object(map) => {
            let mut keys: Vec<_> = map.keys().collect();
            keys.sort();

            let parts: Vec<String> = keys
                .into_iter()
                .filter_map(|key| {
                    map.get(key)
                        .map(|val| format!("{}:{}", JsonValue::String(key.clone()), canonical_json(val)))
                })
                .collect();
            format!("{{{}}}", parts.join(","))
        }
        JsonValue::Array(arr) => {
            let parts: Vec<_> = arr.iter().map(canonical_json).collect();
            format!("[{}]", parts.join(","))
        }
        other => other.to_string(),
    }
}
