//! # Logical Files
//!
//! The per-job view of a data file: its logical name plus the attributes the
//! planner reads and updates while deciding how the file moves.

use crate::replica::CHECKSUM_VALUE_KEY;
use crate::types::{Lfn, SiteHandle};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// =============================================================================
// FILE ATTRIBUTES
// =============================================================================

/// What a logical file holds.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "kebab-case")]
pub enum FileType {
    #[default]
    Data,
    Executable,
    Checkpoint,
    Container,
}

/// How strictly a file must be moved.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "kebab-case")]
pub enum TransferMode {
    /// The file must be transferred; a missing replica is fatal.
    #[default]
    Mandatory,
    /// The file is transferred if a replica exists.
    Optional,
    /// The file stays where it is produced.
    NotTransferred,
}

/// A source chosen ahead of planning, e.g. for staged executables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreselectedSource {
    pub site: SiteHandle,
    pub url: String,
}

// =============================================================================
// FILE SPEC
// =============================================================================

/// Named options for building a [`LogicalFile`].
///
/// ```
/// use conveyor_core::file::{FileSpec, LogicalFile, TransferMode};
///
/// let f = LogicalFile::from_spec("f.log", FileSpec {
///     transfer: TransferMode::NotTransferred,
///     register: false,
///     ..FileSpec::default()
/// });
/// assert!(f.is_transient());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSpec {
    pub transfer: TransferMode,
    pub register: bool,
    pub optional: bool,
    pub executable: bool,
}

impl Default for FileSpec {
    fn default() -> Self {
        Self {
            transfer: TransferMode::Mandatory,
            register: true,
            optional: false,
            executable: false,
        }
    }
}

// =============================================================================
// LOGICAL FILE
// =============================================================================

fn yes() -> bool {
    true
}

/// A logical file as used by one job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogicalFile {
    pub lfn: Lfn,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub file_type: FileType,
    #[serde(default)]
    pub transfer_mode: TransferMode,
    /// Register the final location in the output catalog.
    #[serde(default = "yes")]
    pub register: bool,
    /// The staged copy may be removed by cleanup.
    #[serde(default = "yes")]
    pub for_cleanup: bool,
    /// Opt-in before planning; the bypass decision afterwards.
    #[serde(default)]
    pub bypass: bool,
    /// Integrity checking applies to this file.
    #[serde(default = "yes")]
    pub integrity: bool,
    /// The checksum has to be generated inside the workflow.
    #[serde(default)]
    pub checksum_computed: bool,
    /// The file was not produced by any parent job.
    #[serde(default)]
    pub raw_input: bool,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    #[serde(default)]
    pub source: Option<PreselectedSource>,
}

impl LogicalFile {
    /// A mandatory, registered data file.
    #[must_use]
    pub fn new(lfn: impl Into<Lfn>) -> Self {
        Self::from_spec(lfn, FileSpec::default())
    }

    /// Build a file from named options.
    #[must_use]
    pub fn from_spec(lfn: impl Into<Lfn>, spec: FileSpec) -> Self {
        let transfer_mode = match spec.transfer {
            TransferMode::Mandatory if spec.optional => TransferMode::Optional,
            mode => mode,
        };
        Self {
            lfn: lfn.into(),
            size: None,
            file_type: if spec.executable {
                FileType::Executable
            } else {
                FileType::Data
            },
            transfer_mode,
            register: spec.register,
            for_cleanup: true,
            bypass: false,
            integrity: true,
            checksum_computed: false,
            raw_input: false,
            metadata: BTreeMap::new(),
            source: None,
        }
    }

    #[must_use]
    pub fn with_type(mut self, file_type: FileType) -> Self {
        self.file_type = file_type;
        self
    }

    #[must_use]
    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    #[must_use]
    pub fn with_bypass(mut self, bypass: bool) -> Self {
        self.bypass = bypass;
        self
    }

    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Attach a pre-selected source that short-circuits the replica catalog.
    #[must_use]
    pub fn with_source(mut self, site: impl Into<SiteHandle>, url: impl Into<String>) -> Self {
        self.source = Some(PreselectedSource {
            site: site.into(),
            url: url.into(),
        });
        self
    }

    #[must_use]
    pub fn is_optional(&self) -> bool {
        self.transfer_mode == TransferMode::Optional
    }

    /// The file is never moved off the staging site.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        self.transfer_mode == TransferMode::NotTransferred
    }

    #[must_use]
    pub fn is_executable(&self) -> bool {
        self.file_type == FileType::Executable
    }

    #[must_use]
    pub fn is_checkpoint(&self) -> bool {
        self.file_type == FileType::Checkpoint
    }

    /// A checksum was recorded for this file in the replica catalog.
    #[must_use]
    pub fn has_checksum(&self) -> bool {
        self.metadata.contains_key(CHECKSUM_VALUE_KEY)
    }

    /// Merge catalog metadata into the file. Existing keys are kept.
    pub fn merge_metadata(&mut self, metadata: BTreeMap<String, String>) {
        for (key, value) in metadata {
            self.metadata.entry(key).or_insert(value);
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
