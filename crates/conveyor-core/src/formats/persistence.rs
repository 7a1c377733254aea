//! # Persistence Format
//!
//! Binary serialization for transfer plans.
//!
//! Format: Header (5 bytes) + postcard-serialized plan.
//! - 4 bytes: Magic ("CNVY")
//! - 1 byte: Version
//!
//! Sizes and the header are validated before the payload is decoded, so a
//! truncated or foreign file fails fast with a `SerializationError`.

use crate::plan::TransferPlan;
use crate::primitives;
use crate::types::PlannerError;

/// Maximum accepted size of a persisted plan.
pub const MAX_PERSISTENCE_PAYLOAD_SIZE: usize = 256 * 1024 * 1024; // 256 MB

const HEADER_SIZE: usize = 5;

// =============================================================================
// FILE HEADER
// =============================================================================

/// The header preceding every persisted plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PersistenceHeader {
    pub magic: [u8; 4],
    pub version: u8,
}

impl PersistenceHeader {
    /// A header for the current format version.
    #[must_use]
    pub fn new() -> Self {
        Self {
            magic: *primitives::MAGIC_BYTES,
            version: primitives::FORMAT_VERSION,
        }
    }

    pub fn validate(&self) -> Result<(), PlannerError> {
        if &self.magic != primitives::MAGIC_BYTES {
            return Err(PlannerError::SerializationError(
                "Invalid magic bytes".to_string(),
            ));
        }
        if self.version != primitives::FORMAT_VERSION {
            return Err(PlannerError::SerializationError(format!(
                "Unsupported version: {} (expected {})",
                self.version,
                primitives::FORMAT_VERSION
            )));
        }
        Ok(())
    }

    #[must_use]
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut bytes = [0u8; HEADER_SIZE];
        bytes[0..4].copy_from_slice(&self.magic);
        bytes[4] = self.version;
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PlannerError> {
        let Some(head) = bytes.get(..HEADER_SIZE) else {
            return Err(PlannerError::SerializationError(
                "Header too short".to_string(),
            ));
        };
        let mut magic = [0u8; 4];
        magic.copy_from_slice(&head[0..4]);
        Ok(Self {
            magic,
            version: head[4],
        })
    }
}

impl Default for PersistenceHeader {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// SERIALIZATION FUNCTIONS
// =============================================================================

/// Serialize a plan to bytes (header + payload).
pub fn plan_to_bytes(plan: &TransferPlan) -> Result<Vec<u8>, PlannerError> {
    let payload =
        postcard::to_stdvec(plan).map_err(|e| PlannerError::SerializationError(e.to_string()))?;

    let mut result = Vec::with_capacity(HEADER_SIZE + payload.len());
    result.extend_from_slice(&PersistenceHeader::new().to_bytes());
    result.extend_from_slice(&payload);
    Ok(result)
}

/// Deserialize a plan from bytes.
///
/// Checks the minimum size, the maximum size and the header before the
/// payload is touched.
pub fn plan_from_bytes(bytes: &[u8]) -> Result<TransferPlan, PlannerError> {
    if bytes.len() < HEADER_SIZE {
        return Err(PlannerError::SerializationError(format!(
            "Data too short: minimum {HEADER_SIZE} bytes required"
        )));
    }
    if bytes.len() > MAX_PERSISTENCE_PAYLOAD_SIZE {
        return Err(PlannerError::SerializationError(format!(
            "Data size {} bytes exceeds maximum allowed {} bytes",
            bytes.len(),
            MAX_PERSISTENCE_PAYLOAD_SIZE
        )));
    }

    PersistenceHeader::from_bytes(bytes)?.validate()?;

    postcard::from_bytes(&bytes[HEADER_SIZE..]).map_err(|e| {
        PlannerError::SerializationError(format!("Failed to deserialize plan data: {e}"))
    })
}

// =============================================================================
// CHECKSUMS
// =============================================================================

/// Deterministic checksum of a plan.
///
/// XOR-rotate over the serialized plan. Detects accidental corruption
/// only; use `plan_crypto_hash` when collisions matter.
pub fn plan_checksum(plan: &TransferPlan) -> Result<u64, PlannerError> {
    let payload =
        postcard::to_stdvec(plan).map_err(|e| PlannerError::SerializationError(e.to_string()))?;
    Ok(payload
        .iter()
        .fold(0u64, |hash, byte| hash.rotate_left(7) ^ u64::from(*byte)))
}

/// BLAKE3 digest of the persisted plan, as 64 hex characters.
#[cfg(feature = "crypto-hash")]
pub fn plan_crypto_hash(plan: &TransferPlan) -> Result<String, PlannerError> {
    let bytes = plan_to_bytes(plan)?;
    Ok(blake3::hash(&bytes).to_hex().to_string())
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::WorkflowCache;
    use crate::job::Job;
    use crate::plan::JobTransfers;
    use crate::transfer::TransferDescriptor;
    use crate::types::{JobId, Lfn, SiteHandle};

    fn sample() -> TransferPlan {
        let mut plan = TransferPlan::new("diamond", 0, WorkflowCache::new("diamond-0.cache"));
        let mut batch = JobTransfers::new(JobId::from("b"));
        let mut ft = TransferDescriptor::new("f.a", "b");
        ft.add_source("site-a", "gsiftp://a/scratch/f.a");
        ft.add_destination("site-b", "gsiftp://b/scratch/f.a");
        batch.inter_site_local.push(ft);
        plan.record(Job::new("b", "site-b"), batch);
        plan.planner_cache
            .track_put(&Lfn::from("f.a"), "gsiftp://b/scratch/f.a", &SiteHandle::from("site-b"));
        plan
    }

    #[test]
    fn header_roundtrip() {
        let header = PersistenceHeader::new();
        let restored = PersistenceHeader::from_bytes(&header.to_bytes()).expect("parse header");
        assert_eq!(restored, header);
    }

    #[test]
    fn bytes_roundtrip_bit_exact() {
        let plan = sample();
        let bytes1 = plan_to_bytes(&plan).expect("serialize");
        let restored = plan_from_bytes(&bytes1).expect("deserialize");
        assert_eq!(restored, plan);
        let bytes2 = plan_to_bytes(&restored).expect("serialize again");
        assert_eq!(bytes1, bytes2, "save -> load -> save must produce identical bytes");
    }

    #[test]
    fn invalid_magic_rejected() {
        let mut bytes = vec![0u8; 10];
        bytes[0..4].copy_from_slice(b"XXXX");
        assert!(plan_from_bytes(&bytes).is_err());
    }

    #[test]
    fn future_version_rejected() {
        let mut bytes = plan_to_bytes(&sample()).expect("serialize");
        bytes[4] = primitives::FORMAT_VERSION + 1;
        let err = plan_from_bytes(&bytes).expect_err("version");
        assert!(err.to_string().contains("Unsupported version"));
    }

    #[test]
    fn truncated_data_rejected() {
        assert!(plan_from_bytes(b"CNV").is_err());
    }

    #[test]
    fn checksum_is_stable_and_sensitive() {
        let plan = sample();
        let a = plan_checksum(&plan).expect("checksum");
        assert_eq!(a, plan_checksum(&plan).expect("checksum"));
        let mut other = plan.clone();
        other.label = "other".to_string();
        assert_ne!(a, plan_checksum(&other).expect("checksum"));
    }

    #[cfg(feature = "crypto-hash")]
    #[test]
    fn crypto_hash_is_hex() {
        let hash = plan_crypto_hash(&sample()).expect("hash");
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
