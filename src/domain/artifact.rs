//! Artifact records held by the artifact store.
//!
//! Records are immutable once written. Several records may share a name
//! (and even a key) across runs; lookups pick the most recent one.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// A stored payload plus the run that produced it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRecord {
    /// Logical artifact name (e.g. "baselines")
    pub name: String,

    /// Cache key within the name
    pub key: String,

    /// Run that produced the record
    pub run_id: Uuid,

    /// Branch the producing run executed against
    pub branch: String,

    /// SHA-256 of the payload (hex)
    pub digest: String,

    /// Payload size in bytes
    pub size_bytes: u64,

    /// When the record was written
    pub created_at: DateTime<Utc>,

    /// Payload bytes (not persisted in the index)
    #[serde(skip)]
    pub payload: Vec<u8>,
}

impl ArtifactRecord {
    /// Create a record stamped with the current time
    pub fn new(
        name: impl Into<String>,
        key: impl Into<String>,
        run_id: Uuid,
        branch: impl Into<String>,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            name: name.into(),
            key: key.into(),
            run_id,
            branch: branch.into(),
            digest: payload_digest(&payload),
            size_bytes: payload.len() as u64,
            created_at: Utc::now(),
            payload,
        }
    }

    /// Override the creation time (imports and seeding)
    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }
}

/// Hex SHA-256 of a payload, used as its content address
pub fn payload_digest(payload: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(payload);
    hex::encode(hasher.finalize())
}
