//! # Planner Configuration
//!
//! Everything a planning run can be tuned with, gathered in one explicit
//! struct handed to `TransferPlanner::new`. Nothing here is process-wide:
//! two planners with different configurations can coexist.
//!
//! All fields have defaults, so an empty TOML document is a valid
//! configuration.

use crate::mapper::{Layout, MappedLocation, ReplicaOutputMapper};
use crate::policy::TransferLocationPolicy;
use crate::primitives::DEFAULT_SUBMIT_HOST;
use crate::srm::SrmMountMap;
use crate::types::{Lfn, PlannerError, SiteHandle, TransferKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

// =============================================================================
// DATA CONFIGURATION
// =============================================================================

/// How a job's data reaches the node it runs on.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum DataConfiguration {
    /// Head node and workers share a filesystem.
    #[default]
    SharedFs,
    /// Workers pull their data from a staging site.
    NonSharedFs,
    /// Data is shipped with the job by the batch system.
    CondorIo,
}

impl DataConfiguration {
    /// The running job fetches its own data on the worker node.
    #[must_use]
    pub fn worker_node_execution(self) -> bool {
        matches!(self, Self::NonSharedFs | Self::CondorIo)
    }

    /// Files move through the batch system's file transfer.
    #[must_use]
    pub fn condor_io(self) -> bool {
        self == Self::CondorIo
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SharedFs => "sharedfs",
            Self::NonSharedFs => "nonsharedfs",
            Self::CondorIo => "condorio",
        }
    }
}

impl fmt::Display for DataConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataConfiguration {
    type Err = PlannerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sharedfs" => Ok(Self::SharedFs),
            "nonsharedfs" => Ok(Self::NonSharedFs),
            "condorio" => Ok(Self::CondorIo),
            other => Err(PlannerError::InvalidConfig(format!(
                "unknown data configuration: {other}"
            ))),
        }
    }
}

// =============================================================================
// INTEGRITY, SELECTOR, MAPPER KINDS
// =============================================================================

/// How much integrity checking the plan asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum IntegrityDial {
    /// No checksums anywhere.
    None,
    /// Checksums except for symlinked inputs.
    NoSymlink,
    /// Checksums everywhere.
    #[default]
    Full,
}

impl IntegrityDial {
    #[must_use]
    pub fn enabled(self) -> bool {
        self != Self::None
    }
}

/// Which replica selector the planner uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SelectorKind {
    #[default]
    Default,
    Local,
}

/// Output mappers chained for stage-out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputMapperKind {
    /// Shared storage of each output site.
    Flat,
    /// Explicit `output_locations` table.
    Replica,
}

/// An explicit location for an output file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputMapEntry {
    pub lfn: Lfn,
    pub site: SiteHandle,
    pub url: String,
}

/// Build a table-backed mapper from explicit entries.
#[must_use]
pub fn replica_mapper(entries: &[OutputMapEntry]) -> ReplicaOutputMapper {
    let mut mapper = ReplicaOutputMapper::new();
    for entry in entries {
        mapper.insert(
            entry.lfn.clone(),
            MappedLocation {
                site: entry.site.clone(),
                url: entry.url.clone(),
            },
        );
    }
    mapper
}

// =============================================================================
// REFINER PREFERENCES
// =============================================================================

/// Where the bundled refiner wants its transfer jobs to run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct RefinerPreferences {
    /// When set, transfer jobs of these kinds run on the submit host and
    /// all other kinds run remotely.
    pub local_kinds: Option<Vec<TransferKind>>,
    /// Sites whose stage-in jobs must run on the site itself.
    pub remote_stage_in: Vec<SiteHandle>,
    /// Sites whose inter-site jobs must run on the site itself.
    pub remote_inter_site: Vec<SiteHandle>,
    /// Sites whose stage-out jobs must run on the site itself.
    pub remote_stage_out: Vec<SiteHandle>,
}

impl TransferLocationPolicy for RefinerPreferences {
    fn refiner_preference_for_location(&self) -> bool {
        self.local_kinds.is_some()
    }

    fn prefers_local(&self, kind: TransferKind) -> bool {
        self.local_kinds
            .as_ref()
            .is_none_or(|kinds| kinds.contains(&kind))
    }

    fn run_remotely(&self, site: &SiteHandle, kind: TransferKind) -> bool {
        let sites = match kind {
            TransferKind::StageIn => &self.remote_stage_in,
            TransferKind::InterSite => &self.remote_inter_site,
            TransferKind::StageOut => &self.remote_stage_out,
        };
        sites.iter().any(|s| s.matches(site))
    }
}

// =============================================================================
// PLANNER CONFIG
// =============================================================================

/// Configuration of one planning run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    /// Directory receiving the workflow cache file.
    pub submit_dir: PathBuf,
    /// Basename for generated files; overrides `<label>-<index>`.
    pub basename_prefix: Option<String>,
    /// Handle of the submission host.
    pub submit_host: SiteHandle,
    /// Sites outputs are staged to. Empty disables stage-out.
    pub output_sites: Vec<SiteHandle>,
    /// Symlink replicas that already sit on the staging site.
    pub use_symlinks: bool,
    /// Let jobs fetch their inputs directly where possible.
    pub bypass_staging: bool,
    pub integrity: IntegrityDial,
    /// Default for jobs without a `data.configuration` profile.
    pub data_configuration: DataConfiguration,
    pub staging_layout: Layout,
    pub submit_layout: Layout,
    pub selector: SelectorKind,
    /// SRM service/mount-point properties.
    pub srm: BTreeMap<String, String>,
    pub refiner: RefinerPreferences,
    /// Mappers chained for stage-out, in order.
    pub output_mappers: Vec<OutputMapperKind>,
    /// Entries for the `replica` output mapper.
    pub output_locations: Vec<OutputMapEntry>,
    /// Parent-workflow scratch locations. Non-empty enables the extra
    /// stage-out to the parent workflow.
    pub output_map: Vec<OutputMapEntry>,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            submit_dir: PathBuf::from("."),
            basename_prefix: None,
            submit_host: SiteHandle::from(DEFAULT_SUBMIT_HOST),
            output_sites: Vec::new(),
            use_symlinks: false,
            bypass_staging: false,
            integrity: IntegrityDial::default(),
            data_configuration: DataConfiguration::default(),
            staging_layout: Layout::default(),
            submit_layout: Layout::default(),
            selector: SelectorKind::default(),
            srm: BTreeMap::new(),
            refiner: RefinerPreferences::default(),
            output_mappers: vec![OutputMapperKind::Flat],
            output_locations: Vec::new(),
            output_map: Vec::new(),
        }
    }
}

impl PlannerConfig {
    /// Check the configuration for values the planner cannot work with.
    pub fn validate(&self) -> Result<(), PlannerError> {
        if self.submit_host.as_str().trim().is_empty() {
            return Err(PlannerError::InvalidConfig(
                "submit_host must not be empty".to_string(),
            ));
        }
        if self.output_sites.iter().any(|s| s.as_str().trim().is_empty()) {
            return Err(PlannerError::InvalidConfig(
                "output_sites must not contain empty site names".to_string(),
            ));
        }
        if !self.output_sites.is_empty() && self.output_mappers.is_empty() {
            return Err(PlannerError::InvalidConfig(
                "output staging needs at least one output mapper".to_string(),
            ));
        }
        if self.output_mappers.contains(&OutputMapperKind::Replica)
            && self.output_locations.is_empty()
        {
            tracing::warn!("replica output mapper configured without output locations");
        }
        Ok(())
    }

    /// Outputs are staged to at least one site.
    #[must_use]
    pub fn stages_outputs(&self) -> bool {
        !self.output_sites.is_empty()
    }

    /// The SRM mount table built from `srm`.
    #[must_use]
    pub fn srm_mounts(&self) -> SrmMountMap {
        SrmMountMap::from_properties(&self.srm)
    }
}

// =============================================================================
// TESTS
// =============================================================================
