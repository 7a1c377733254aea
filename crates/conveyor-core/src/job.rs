//! # Jobs
//!
//! A node of the workflow graph: where it runs, where its data is staged,
//! which logical files it reads and writes, and the planner's annotations
//! (level, submit directory, output locations).

use crate::config::DataConfiguration;
use crate::file::LogicalFile;
use crate::primitives::{DATA_CONFIGURATION_KEY, REMOTE_INITIALDIR_KEY};
use crate::transfer::TransferDescriptor;
use crate::types::{JobId, Lfn, SiteHandle, TransferKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// =============================================================================
// JOB KIND
// =============================================================================

/// The payload of a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum JobKind {
    /// A regular compute job.
    #[default]
    Compute,
    /// A job that plans and runs a nested workflow description.
    SubWorkflow { descriptor: Lfn },
    /// A job that runs an externally generated execution graph.
    ExternalGraph { descriptor: Lfn },
    /// A data movement job inserted by a refiner.
    Transfer {
        kind: TransferKind,
        local: bool,
        transfers: Vec<TransferDescriptor>,
    },
}

/// Where a sub-workflow has to place one of its outputs.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OutputLocation {
    pub lfn: Lfn,
    pub site: SiteHandle,
    pub url: String,
}

// =============================================================================
// JOB
// =============================================================================

/// A job in the workflow graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    #[serde(default)]
    pub kind: JobKind,
    /// Site where the job's compute runs.
    pub execution_site: SiteHandle,
    /// Site whose shared scratch holds the job's data. Defaults to the
    /// execution site.
    #[serde(default)]
    pub staging_site: Option<SiteHandle>,
    #[serde(default)]
    pub inputs: Vec<LogicalFile>,
    #[serde(default)]
    pub outputs: Vec<LogicalFile>,
    #[serde(default)]
    pub level: usize,
    #[serde(default)]
    pub relative_submit_dir: String,
    #[serde(default)]
    pub profiles: BTreeMap<String, String>,
    /// Container image the job runs in.
    #[serde(default)]
    pub container: Option<Lfn>,
    #[serde(default)]
    pub arguments: Vec<String>,
    /// Resolved path of an external graph file.
    #[serde(default)]
    pub graph_file: Option<String>,
    /// Working directory of an external graph job.
    #[serde(default)]
    pub directory: Option<String>,
    #[serde(default)]
    pub output_locations: Vec<OutputLocation>,
}

impl Job {
    /// Create a compute job without files.
    #[must_use]
    pub fn new(id: impl Into<JobId>, execution_site: impl Into<SiteHandle>) -> Self {
        Self {
            id: id.into(),
            kind: JobKind::Compute,
            execution_site: execution_site.into(),
            staging_site: None,
            inputs: Vec::new(),
            outputs: Vec::new(),
            level: 0,
            relative_submit_dir: String::new(),
            profiles: BTreeMap::new(),
            container: None,
            arguments: Vec::new(),
            graph_file: None,
            directory: None,
            output_locations: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_kind(mut self, kind: JobKind) -> Self {
        self.kind = kind;
        self
    }

    #[must_use]
    pub fn with_staging_site(mut self, site: impl Into<SiteHandle>) -> Self {
        self.staging_site = Some(site.into());
        self
    }

    #[must_use]
    pub fn with_input(mut self, file: LogicalFile) -> Self {
        self.inputs.push(file);
        self
    }

    #[must_use]
    pub fn with_output(mut self, file: LogicalFile) -> Self {
        self.outputs.push(file);
        self
    }

    #[must_use]
    pub fn with_profile(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.profiles.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_container(mut self, container: impl Into<Lfn>) -> Self {
        self.container = Some(container.into());
        self
    }

    /// The staging site, falling back to the execution site.
    #[must_use]
    pub fn staging_site(&self) -> &SiteHandle {
        self.staging_site.as_ref().unwrap_or(&self.execution_site)
    }

    /// Look up a profile value.
    #[must_use]
    pub fn profile(&self, key: &str) -> Option<&str> {
        self.profiles.get(key).map(String::as_str)
    }

    /// Working directory override on the staging site.
    #[must_use]
    pub fn remote_initialdir(&self) -> Option<&str> {
        self.profile(REMOTE_INITIALDIR_KEY)
    }

    /// The data configuration for this job; the profile overrides `default`.
    #[must_use]
    pub fn data_configuration(&self, default: DataConfiguration) -> DataConfiguration {
        self.profile(DATA_CONFIGURATION_KEY)
            .and_then(|value| value.parse().ok())
            .unwrap_or(default)
    }

    #[must_use]
    pub fn is_sub_workflow(&self) -> bool {
        matches!(self.kind, JobKind::SubWorkflow { .. })
    }

    #[must_use]
    pub fn is_external_graph(&self) -> bool {
        matches!(self.kind, JobKind::ExternalGraph { .. })
    }

    /// Check whether the job reads `lfn`.
    #[must_use]
    pub fn has_input(&self, lfn: &Lfn) -> bool {
        self.inputs.iter().any(|f| &f.lfn == lfn)
    }

    /// Check whether the job writes `lfn`.
    #[must_use]
    pub fn has_output(&self, lfn: &Lfn) -> bool {
        self.outputs.iter().any(|f| &f.lfn == lfn)
    }

    /// Mutable access to an input file.
    pub fn input_mut(&mut self, lfn: &Lfn) -> Option<&mut LogicalFile> {
        self.inputs.iter_mut().find(|f| &f.lfn == lfn)
    }

    /// Remove an input file. Returns whether it was present.
    pub fn remove_input(&mut self, lfn: &Lfn) -> bool {
        let before = self.inputs.len();
        self.inputs.retain(|f| &f.lfn != lfn);
        before != self.inputs.len()
    }

    /// Record where a sub-workflow has to place an output. Duplicates are
    /// ignored.
    pub fn add_output_location(&mut self, location: OutputLocation) {
        if !self.output_locations.contains(&location) {
            self.output_locations.push(location);
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn staging_defaults_to_execution_site() {
        let job = Job::new("a", "cluster");
        assert_eq!(job.staging_site().as_str(), "cluster");
        let job = job.with_staging_site("storage");
        assert_eq!(job.staging_site().as_str(), "storage");
    }

    #[test]
    fn data_configuration_profile_overrides_default() {
        let job = Job::new("a", "cluster");
        assert_eq!(
            job.data_configuration(DataConfiguration::SharedFs),
            DataConfiguration::SharedFs
        );
        let job = job.with_profile(DATA_CONFIGURATION_KEY, "condorio");
        assert_eq!(
            job.data_configuration(DataConfiguration::SharedFs),
            DataConfiguration::CondorIo
        );
    }

    #[test]
    fn unparsable_profile_falls_back() {
        let job = Job::new("a", "cluster").with_profile(DATA_CONFIGURATION_KEY, "bogus");
        assert_eq!(
            job.data_configuration(DataConfiguration::NonSharedFs),
            DataConfiguration::NonSharedFs
        );
    }

    #[test]
    fn remove_input_reports_presence() {
        let mut job = Job::new("a", "cluster").with_input(LogicalFile::new("f.in"));
        assert!(job.remove_input(&Lfn::from("f.in")));
        assert!(!job.remove_input(&Lfn::from("f.in")));
        assert!(job.inputs.is_empty());
    }

    #[test]
    fn output_locations_are_unique() {
        let mut job = Job::new("sub", "local").with_kind(JobKind::SubWorkflow {
            descriptor: Lfn::from("inner.yml"),
        });
        let loc = OutputLocation {
            lfn: Lfn::from("f.b"),
            site: SiteHandle::from("cluster"),
            url: "gsiftp://h/scratch/f.b".to_string(),
        };
        job.add_output_location(loc.clone());
        job.add_output_location(loc);
        assert_eq!(job.output_locations.len(), 1);
        assert!(job.is_sub_workflow());
    }
}
