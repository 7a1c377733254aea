//! # Core Type Definitions
//!
//! This module contains the identifiers and the error taxonomy shared by every
//! part of the Conveyor planner:
//! - Handles (`SiteHandle`, `JobId`, `Lfn`)
//! - File-server capabilities (`Operation`)
//! - Transfer job kinds (`TransferKind`)
//! - Error types (`PlannerError`)
//!
//! ## Determinism Guarantees
//!
//! All identifiers implement `Ord` so they can key `BTreeMap`/`BTreeSet`
//! collections, which keeps every planning run byte-for-byte reproducible.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

// =============================================================================
// HANDLES
// =============================================================================

macro_rules! string_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            /// Create a new handle from a string.
            #[must_use]
            pub fn new(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            /// Get the handle as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }
    };
}

string_handle!(
    /// Identifier of an execution or storage site in the site catalog.
    SiteHandle
);

string_handle!(
    /// Identifier of a job in the workflow graph.
    JobId
);

string_handle!(
    /// Logical file name: a catalog-independent identifier for a data file.
    Lfn
);

impl SiteHandle {
    /// Case-insensitive comparison, the way site handles are matched in URLs
    /// and catalogs.
    #[must_use]
    pub fn matches(&self, other: &SiteHandle) -> bool {
        self.0.eq_ignore_ascii_case(&other.0)
    }
}

// =============================================================================
// FILE SERVER OPERATIONS
// =============================================================================

/// Operation a file server can be used for.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    /// Read access (source side of a transfer).
    Get,
    /// Write access (destination side of a transfer).
    Put,
    /// Both read and write access.
    #[default]
    All,
}

impl Operation {
    /// The server capabilities that satisfy a request for `self`, in
    /// preference order.
    #[must_use]
    pub fn satisfied_by(self) -> &'static [Operation] {
        match self {
            Operation::Get => &[Operation::Get, Operation::All],
            Operation::Put => &[Operation::Put, Operation::All],
            Operation::All => &[Operation::All],
        }
    }

    /// Check whether a server advertising `self` can serve `requested`.
    #[must_use]
    pub fn serves(self, requested: Operation) -> bool {
        requested.satisfied_by().contains(&self)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Operation::Get => "get",
            Operation::Put => "put",
            Operation::All => "all",
        };
        f.write_str(s)
    }
}

// =============================================================================
// TRANSFER KINDS
// =============================================================================

/// The kind of transfer job a descriptor will end up in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransferKind {
    /// Replica catalog → staging site of a compute job.
    StageIn,
    /// Staging site of a parent → staging site of a child.
    InterSite,
    /// Staging site of a job → output sites.
    StageOut,
}

impl TransferKind {
    /// Short prefix used for naming transfer jobs.
    #[must_use]
    pub const fn prefix(self) -> &'static str {
        match self {
            TransferKind::StageIn => "stage_in",
            TransferKind::InterSite => "stage_inter",
            TransferKind::StageOut => "stage_out",
        }
    }
}

impl fmt::Display for TransferKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransferKind::StageIn => "stage-in",
            TransferKind::InterSite => "inter-site",
            TransferKind::StageOut => "stage-out",
        };
        f.write_str(s)
    }
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Errors that can occur while planning data movement.
///
/// - Every variant except the ambient ones is fatal for the whole run
/// - Use `Result<T, PlannerError>` for fallible operations
/// - The planner never retries; a failed run produces no plan at all
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlannerError {
    /// A site is missing, or has no file server for a required operation.
    #[error("configuration error for job {job}: {reason} (site: {site}, operation: {operation})")]
    Configuration {
        job: JobId,
        site: SiteHandle,
        operation: Operation,
        reason: String,
    },

    /// No replica exists for a mandatory input.
    #[error("unable to determine a location to transfer input file {lfn} for job {job}")]
    Resolution { lfn: Lfn, job: JobId },

    /// Replicas exist but none survived locality/protocol filtering.
    #[error(
        "unable to select a physical filename (PFN) for file with logical filename (LFN) {lfn} for transfer to site {site} (prefer local transfers: {prefer_local}) amongst [{}]{}",
        .candidates.join(", "),
        .hint.as_deref().map(|h| format!("\n{h}")).unwrap_or_default()
    )]
    Selection {
        lfn: Lfn,
        site: SiteHandle,
        prefer_local: bool,
        candidates: Vec<String>,
        hint: Option<String>,
    },

    /// A job referenced by the workflow graph does not exist.
    #[error("job not found: {0}")]
    UnknownJob(JobId),

    /// The workflow graph contains a cycle through the named job.
    #[error("workflow is not acyclic: cycle detected at job {0}")]
    CyclicWorkflow(JobId),

    /// A URL could not be interpreted.
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    /// The planner configuration is unusable.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A serialization or deserialization error occurred.
    #[error("serialization error: {0}")]
    SerializationError(String),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    IoError(String),
}

impl PlannerError {
    /// Convenience constructor for a missing site entry.
    #[must_use]
    pub fn site_not_found(job: &JobId, site: &SiteHandle, operation: Operation) -> Self {
        PlannerError::Configuration {
            job: job.clone(),
            site: site.clone(),
            operation,
            reason: "no matching entry found in the site catalog".to_string(),
        }
    }

    /// Convenience constructor for a missing shared-scratch file server.
    #[must_use]
    pub fn no_file_server(job: &JobId, site: &SiteHandle, operation: Operation) -> Self {
        PlannerError::Configuration {
            job: job.clone(),
            site: site.clone(),
            operation,
            reason: "file server not specified for shared-scratch filesystem".to_string(),
        }
    }
}

impl From<std::io::Error> for PlannerError {
    fn from(e: std::io::Error) -> Self {
        PlannerError::IoError(e.to_string())
    }
}

// =============================================================================
// TESTS
// =============================================================================
