//! Query fingerprints.
//!
//! A fingerprint pairs a query's revision with a SHA-256 digest of its
//! canonical JSON. Execution results are tagged with the fingerprint of the
//! query that produced them, so results for a superseded state can be
//! recognized and discarded.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::query::StructuredQuery;
use super::serialize::{self, WireError};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint {
    pub revision: u64,
    /// 64-character lowercase hex digest.
    pub digest: String,
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let short = self.digest.get(..12).unwrap_or(&self.digest);
        write!(f, "r{}:{}", self.revision, short)
    }
}

/// Compute SHA256 hash of a serializable value.
///
/// The value is serialized to JSON before hashing, ensuring deterministic
/// output. Returns a 64-character lowercase hexadecimal string.
pub fn compute_hash<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let json = serde_json::to_string(value)?;
    let mut hasher = Sha256::new();
    hasher.update(json.as_bytes());
    Ok(format!("{:x}", hasher.finalize()))
}

impl StructuredQuery {
    /// The fingerprint of this committed state.
    pub fn fingerprint(&self) -> Result<Fingerprint, WireError> {
        let canonical = serialize::to_value(self)?;
        Ok(Fingerprint {
            revision: self.revision(),
            digest: compute_hash(&canonical)?,
        })
    }
}
