//! # conveyor-core
//!
//! The deterministic data-staging planner for Conveyor - THE LOGIC.
//!
//! Given a workflow of jobs that read and write logical files, a site
//! catalog and a replica catalog, this crate decides which files move
//! where before, between and after jobs, and records every location it
//! creates in two caches.
//!
//! ## Architectural Constraints
//!
//! The CORE:
//! - Is pure: no async, no network, no filesystem access except writing
//!   the workflow cache when asked to
//! - Is deterministic: `BTreeMap`/`BTreeSet` only, no floats, no randomness
//! - Decides, never mutates: planning yields an immutable `TransferPlan`,
//!   and a separate apply step feeds it to a `Refiner`
//! - Has no global state: every knob lives in `PlannerConfig`

// =============================================================================
// MODULES
// =============================================================================

pub mod cache;
pub mod config;
pub mod file;
pub mod formats;
pub mod job;
pub mod mapper;
pub mod plan;
pub mod planner;
pub mod policy;
pub mod primitives;
pub mod refiner;
pub mod replica;
pub mod selector;
pub mod site;
pub mod srm;
pub mod transfer;
pub mod types;
pub mod url;
pub mod workflow;

// =============================================================================
// RE-EXPORTS: Core Types (from types module)
// =============================================================================

pub use types::{JobId, Lfn, Operation, PlannerError, SiteHandle, TransferKind};

// =============================================================================
// RE-EXPORTS: Catalogs and Workflow
// =============================================================================

pub use file::{FileSpec, FileType, LogicalFile, PreselectedSource, TransferMode};
pub use job::{Job, JobKind, OutputLocation};
pub use replica::{ReplicaCatalog, ReplicaEntry, ReplicaLocation, ReplicaRecord, ReplicaStore};
pub use site::{Directory, DirectoryKind, FileServer, Site, SiteCatalog, SiteStore};
pub use workflow::{JobGraph, SerializableWorkflow, Workflow};

// =============================================================================
// RE-EXPORTS: Planning Engine
// =============================================================================

pub use cache::{CacheEntry, PlannerCache, WorkflowCache, cache_file_name};
pub use config::{
    DataConfiguration, IntegrityDial, OutputMapEntry, OutputMapperKind, PlannerConfig,
    RefinerPreferences, SelectorKind,
};
pub use mapper::{
    ChainedOutputMapper, FlatOutputMapper, Layout, MappedLocation, OutputMapper,
    ReplicaOutputMapper, StagingMapper, SubmitDirMapper,
};
pub use plan::{JobTransfers, PlanSummary, StageOut, TransferPlan};
pub use planner::TransferPlanner;
pub use policy::{StagingPolicy, TransferLocationPolicy};
pub use refiner::{GraphRefiner, Refiner};
pub use selector::{DefaultSelector, LocalSelector, ReplicaSelector};
pub use srm::{SrmMount, SrmMountMap};
pub use transfer::{Endpoint, TransferDescriptor};

// =============================================================================
// RE-EXPORTS: Formats (from formats module)
// =============================================================================

pub use formats::{PersistenceHeader, plan_checksum, plan_from_bytes, plan_to_bytes};

#[cfg(feature = "crypto-hash")]
pub use formats::plan_crypto_hash;
