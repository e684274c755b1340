use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Cached provider payload sealed with a SHA-256 checksum.
///
/// Entries that fail validation are treated as misses so the caller refetches
/// from the provider instead of scoring a lead on corrupted data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SealedEntry {
    /// JSON of the cached value.
    pub data: String,
    /// Hex SHA-256 of `data`.
    pub checksum: String,
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

impl SealedEntry {
    pub fn new(data: String) -> Self {
        let checksum = sha256_hex(data.as_bytes());
        Self { data, checksum }
    }

    pub fn is_valid(&self) -> bool {
        sha256_hex(self.data.as_bytes()) == self.checksum
    }

    /// Serializes `value` and seals it into a cache string.
    pub fn seal<T: Serialize>(value: &T) -> Option<String> {
        let data = serde_json::to_string(value).ok()?;
        serde_json::to_string(&Self::new(data)).ok()
    }

    /// Opens a sealed cache string. `None` on bad JSON or checksum mismatch.
    pub fn open<T: DeserializeOwned>(sealed: &str) -> Option<T> {
        let entry: SealedEntry = serde_json::from_str(sealed).ok()?;
        if !entry.is_valid() {
            tracing::warn!(
                "Cache validation failed: checksum mismatch. Expected: {}, Data length: {}",
                entry.checksum,
                entry.data.len()
            );
            return None;
        }
        serde_json::from_str(&entry.data).ok()
    }
}

/// Stable cache key for a set of lookup inputs.
///
/// Hashing keeps raw emails and phone numbers out of cache keys.
pub fn fingerprint(namespace: &str, parts: &[Option<&str>]) -> String {
    let joined = parts
        .iter()
        .map(|p| p.unwrap_or(""))
        .collect::<Vec<_>>()
        .join("\u{1f}");
    format!("{}:{}", namespace, sha256_hex(joined.as_bytes()))
}
