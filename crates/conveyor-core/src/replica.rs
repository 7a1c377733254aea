//! # Replica Catalog
//!
//! Candidate physical locations for logical files. Entries are read once
//! from the catalog and consumed read-only by the replica selector.

use crate::types::{Lfn, SiteHandle};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Attribute key under which a recorded checksum value is stored.
pub const CHECKSUM_VALUE_KEY: &str = "checksum.value";

/// Attribute key under which the checksum algorithm is stored.
pub const CHECKSUM_TYPE_KEY: &str = "checksum.type";

// =============================================================================
// REPLICA ENTRY
// =============================================================================

/// One physical replica of a logical file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaEntry {
    /// Physical URL of the replica.
    pub pfn: String,
    /// Site owning the replica.
    pub site: SiteHandle,
    /// Free-form attributes, including checksum information.
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

impl ReplicaEntry {
    /// Create an entry without attributes.
    #[must_use]
    pub fn new(pfn: impl Into<String>, site: impl Into<SiteHandle>) -> Self {
        Self {
            pfn: pfn.into(),
            site: site.into(),
            attributes: BTreeMap::new(),
        }
    }

    /// Builder-style helper to attach an attribute.
    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Check whether the catalog recorded a checksum for this replica.
    #[must_use]
    pub fn has_checksum(&self) -> bool {
        self.attributes.contains_key(CHECKSUM_VALUE_KEY)
    }

    /// Copy of this entry with a different URL, keeping site and attributes.
    #[must_use]
    pub fn with_pfn(&self, pfn: impl Into<String>) -> Self {
        Self {
            pfn: pfn.into(),
            site: self.site.clone(),
            attributes: self.attributes.clone(),
        }
    }
}

impl fmt::Display for ReplicaEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.pfn, self.site)
    }
}

// =============================================================================
// REPLICA LOCATION
// =============================================================================

/// Ordered candidate set of replicas for one logical file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaLocation {
    /// The logical file the replicas belong to.
    pub lfn: Lfn,
    /// Candidates in catalog order.
    pub entries: Vec<ReplicaEntry>,
}

impl ReplicaLocation {
    /// Create a location from entries.
    #[must_use]
    pub fn new(lfn: impl Into<Lfn>, entries: Vec<ReplicaEntry>) -> Self {
        Self {
            lfn: lfn.into(),
            entries,
        }
    }

    /// Number of candidates.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check whether there are no candidates.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Check whether any replica carries a recorded checksum.
    #[must_use]
    pub fn has_checksum(&self) -> bool {
        self.entries.iter().any(ReplicaEntry::has_checksum)
    }

    /// Union of all replica attributes. The first entry wins on conflicts.
    #[must_use]
    pub fn metadata(&self) -> BTreeMap<String, String> {
        let mut merged = BTreeMap::new();
        for entry in &self.entries {
            for (key, value) in &entry.attributes {
                merged.entry(key.clone()).or_insert_with(|| value.clone());
            }
        }
        merged
    }

    /// Candidates rendered for diagnostics.
    #[must_use]
    pub fn describe(&self) -> Vec<String> {
        self.entries.iter().map(ToString::to_string).collect()
    }
}

// =============================================================================
// REPLICA CATALOG
// =============================================================================

/// Read-only access to replica locations for a planning run.
pub trait ReplicaCatalog {
    /// Look up all replicas of a logical file.
    ///
    /// Returns `None` when the catalog has no entry at all.
    fn lookup(&self, lfn: &Lfn) -> Option<ReplicaLocation>;
}

/// A flat catalog record, the serialized form of [`ReplicaStore`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaRecord {
    pub lfn: Lfn,
    pub pfn: String,
    pub site: SiteHandle,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

/// In-memory replica catalog.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<ReplicaRecord>", into = "Vec<ReplicaRecord>")]
pub struct ReplicaStore {
    entries: BTreeMap<Lfn, Vec<ReplicaEntry>>,
}

impl ReplicaStore {
    /// Create an empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a replica for a logical file. Insertion order is preserved.
    pub fn insert(&mut self, lfn: impl Into<Lfn>, entry: ReplicaEntry) {
        self.entries.entry(lfn.into()).or_default().push(entry);
    }

    /// Number of logical files with at least one replica.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check whether the catalog is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl ReplicaCatalog for ReplicaStore {
    fn lookup(&self, lfn: &Lfn) -> Option<ReplicaLocation> {
        self.entries
            .get(lfn)
            .filter(|entries| !entries.is_empty())
            .map(|entries| ReplicaLocation::new(lfn.clone(), entries.clone()))
    }
}

impl From<Vec<ReplicaRecord>> for ReplicaStore {
    fn from(records: Vec<ReplicaRecord>) -> Self {
        let mut store = Self::new();
        for record in records {
            store.insert(
                record.lfn,
                ReplicaEntry {
                    pfn: record.pfn,
                    site: record.site,
                    attributes: record.attributes,
                },
            );
        }
        store
    }
}

impl From<ReplicaStore> for Vec<ReplicaRecord> {
    fn from(store: ReplicaStore) -> Self {
        store
            .entries
            .into_iter()
            .flat_map(|(lfn, entries)| {
                entries.into_iter().map(move |entry| ReplicaRecord {
                    lfn: lfn.clone(),
                    pfn: entry.pfn,
                    site: entry.site,
                    attributes: entry.attributes,
                })
            })
            .collect()
    }
}

// =============================================================================
// TESTS
// =============================================================================
