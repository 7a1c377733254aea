//! # Plan Formats
//!
//! Byte-level encodings of a `TransferPlan`. Pure transformations only;
//! reading and writing files is left to the app layer.

pub mod persistence;

pub use persistence::{
    MAX_PERSISTENCE_PAYLOAD_SIZE, PersistenceHeader, plan_checksum, plan_from_bytes, plan_to_bytes,
};

#[cfg(feature = "crypto-hash")]
pub use persistence::plan_crypto_hash;
