//! # Staging and Output Mappers
//!
//! Deterministic placement of files:
//! - `StagingMapper`: relative directory and URLs of a file on a staging
//!   site's shared scratch
//! - `SubmitDirMapper`: relative submit directory of a job
//! - `OutputMapper` implementations: final locations on output sites
//!
//! Every mapping is a pure function of its arguments, so repeated calls in
//! one planning run return byte-identical results.

use crate::job::Job;
use crate::primitives::HASHED_FANOUT;
use crate::site::{DirectoryKind, Site, SiteCatalog};
use crate::types::{JobId, Lfn, Operation, PlannerError, SiteHandle};
use crate::url;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// =============================================================================
// DIRECTORY LAYOUTS
// =============================================================================

/// How files or jobs are spread over directories.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum Layout {
    /// Everything in one directory.
    #[default]
    Flat,
    /// Two directory levels chosen by a stable hash of the key.
    Hashed,
}

impl Layout {
    /// The relative directory for `key`.
    #[must_use]
    pub fn relative_directory(self, key: &str) -> String {
        match self {
            Layout::Flat => ".".to_string(),
            Layout::Hashed => {
                let hash = stable_hash(key);
                format!(
                    "{:02x}/{:02x}",
                    hash % HASHED_FANOUT,
                    (hash / HASHED_FANOUT) % HASHED_FANOUT
                )
            }
        }
    }
}

/// FNV-1a over the UTF-8 bytes of `key`. Stable across platforms and runs.
#[must_use]
pub fn stable_hash(key: &str) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    key.bytes()
        .fold(OFFSET, |hash, byte| (hash ^ u64::from(byte)).wrapping_mul(PRIME))
}

// =============================================================================
// STAGING MAPPER
// =============================================================================

/// Places files on the shared scratch of a staging site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StagingMapper {
    layout: Layout,
}

impl StagingMapper {
    #[must_use]
    pub fn new(layout: Layout) -> Self {
        Self { layout }
    }

    /// Relative directory of `lfn` below the job's work directory on `site`.
    #[must_use]
    pub fn relative_directory(&self, _job: &Job, _site: &Site, lfn: &Lfn) -> String {
        self.layout.relative_directory(lfn.as_str())
    }

    /// URL of `lfn` on the shared scratch of `site` through the preferred
    /// file server for `operation`.
    pub fn url_on_shared_scratch(
        &self,
        site: &Site,
        job: &Job,
        operation: Operation,
        relative_dir: &str,
        lfn: &Lfn,
    ) -> Result<String, PlannerError> {
        self.urls_on_shared_scratch(site, job, operation, relative_dir, lfn)?
            .into_iter()
            .next()
            .ok_or_else(|| PlannerError::no_file_server(&job.id, &site.handle, operation))
    }

    /// URLs of `lfn` through every file server on the shared scratch of
    /// `site` that supports `operation`, preferred server first.
    pub fn urls_on_shared_scratch(
        &self,
        site: &Site,
        job: &Job,
        operation: Operation,
        relative_dir: &str,
        lfn: &Lfn,
    ) -> Result<Vec<String>, PlannerError> {
        let scratch = site
            .shared_scratch()
            .ok_or_else(|| PlannerError::no_file_server(&job.id, &site.handle, operation))?;
        let urls: Vec<String> = scratch
            .servers_for(operation)
            .map(|server| {
                let base = match job.remote_initialdir() {
                    Some(dir) if dir.starts_with('/') => url::join(&server.url_prefix, [dir]),
                    Some(dir) => url::join(&scratch.url_through(server), [dir]),
                    None => scratch.url_through(server),
                };
                url::join(&base, [relative_dir, lfn.as_str()])
            })
            .collect();
        if urls.is_empty() {
            return Err(PlannerError::no_file_server(&job.id, &site.handle, operation));
        }
        Ok(urls)
    }

    /// Path of `lfn` on the shared scratch of `site` as seen by jobs
    /// running there.
    pub fn internal_path(
        &self,
        site: &Site,
        job: &Job,
        relative_dir: &str,
        lfn: &Lfn,
    ) -> Result<String, PlannerError> {
        self.internal_directory(site, job, relative_dir)
            .map(|dir| url::join(&dir, [lfn.as_str()]))
    }

    /// Directory holding the job's files on the shared scratch of `site`.
    pub fn internal_directory(
        &self,
        site: &Site,
        job: &Job,
        relative_dir: &str,
    ) -> Result<String, PlannerError> {
        let work_dir = site
            .internal_work_directory(job.remote_initialdir())
            .ok_or_else(|| PlannerError::Configuration {
                job: job.id.clone(),
                site: site.handle.clone(),
                operation: Operation::All,
                reason: "no shared-scratch directory on site".to_string(),
            })?;
        Ok(url::join(&work_dir, [relative_dir]))
    }
}

// =============================================================================
// SUBMIT DIRECTORY MAPPER
// =============================================================================

/// Places job submit files below the submit directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SubmitDirMapper {
    layout: Layout,
}

impl SubmitDirMapper {
    #[must_use]
    pub fn new(layout: Layout) -> Self {
        Self { layout }
    }

    /// Relative submit directory of a job.
    #[must_use]
    pub fn relative_directory(&self, job: &JobId) -> String {
        self.layout.relative_directory(job.as_str())
    }
}

// =============================================================================
// OUTPUT MAPPERS
// =============================================================================

/// A mapped location of a file on some site.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MappedLocation {
    pub site: SiteHandle,
    pub url: String,
}

/// Maps output files to their final locations.
pub trait OutputMapper {
    /// All locations of `lfn` on `site`. With `site == None` the mapper
    /// returns every location it knows, regardless of site.
    fn map_all(
        &self,
        job: &JobId,
        lfn: &Lfn,
        site: Option<&SiteHandle>,
        operation: Operation,
    ) -> Result<Vec<MappedLocation>, PlannerError>;

    /// The primary location of `lfn` on `site`.
    fn map(
        &self,
        job: &JobId,
        lfn: &Lfn,
        site: Option<&SiteHandle>,
        operation: Operation,
    ) -> Result<Option<MappedLocation>, PlannerError> {
        Ok(self.map_all(job, lfn, site, operation)?.into_iter().next())
    }

    /// Short name for logs.
    fn description(&self) -> &'static str;
}

/// Places outputs in the shared-storage directory of the output site.
pub struct FlatOutputMapper<'a> {
    sites: &'a dyn SiteCatalog,
}

impl<'a> FlatOutputMapper<'a> {
    #[must_use]
    pub fn new(sites: &'a dyn SiteCatalog) -> Self {
        Self { sites }
    }
}

impl OutputMapper for FlatOutputMapper<'_> {
    fn map_all(
        &self,
        job: &JobId,
        lfn: &Lfn,
        site: Option<&SiteHandle>,
        operation: Operation,
    ) -> Result<Vec<MappedLocation>, PlannerError> {
        let Some(handle) = site else {
            return Ok(Vec::new());
        };
        let entry = self
            .sites
            .lookup(handle)
            .ok_or_else(|| PlannerError::site_not_found(job, handle, operation))?;
        let storage = entry
            .directory(DirectoryKind::SharedStorage)
            .ok_or_else(|| PlannerError::Configuration {
                job: job.clone(),
                site: handle.clone(),
                operation,
                reason: "no shared-storage directory on output site".to_string(),
            })?;
        let server = storage
            .select_server(operation)
            .ok_or_else(|| PlannerError::Configuration {
                job: job.clone(),
                site: handle.clone(),
                operation,
                reason: "file server not specified for shared-storage filesystem".to_string(),
            })?;
        Ok(vec![MappedLocation {
            site: handle.clone(),
            url: url::join(&storage.url_through(server), [lfn.as_str()]),
        }])
    }

    fn description(&self) -> &'static str {
        "flat"
    }
}

/// Looks locations up in an explicit lfn → locations table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplicaOutputMapper {
    locations: BTreeMap<Lfn, Vec<MappedLocation>>,
}

impl ReplicaOutputMapper {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a location for `lfn`.
    pub fn insert(&mut self, lfn: impl Into<Lfn>, location: MappedLocation) {
        let entries = self.locations.entry(lfn.into()).or_default();
        if !entries.contains(&location) {
            entries.push(location);
        }
    }
}

impl OutputMapper for ReplicaOutputMapper {
    fn map_all(
        &self,
        _job: &JobId,
        lfn: &Lfn,
        site: Option<&SiteHandle>,
        _operation: Operation,
    ) -> Result<Vec<MappedLocation>, PlannerError> {
        Ok(self
            .locations
            .get(lfn)
            .into_iter()
            .flatten()
            .filter(|loc| site.is_none_or(|s| loc.site.matches(s)))
            .cloned()
            .collect())
    }

    fn description(&self) -> &'static str {
        "replica"
    }
}

/// Fans out to several mappers, concatenating their locations.
#[derive(Default)]
pub struct ChainedOutputMapper<'a> {
    mappers: Vec<Box<dyn OutputMapper + 'a>>,
}

impl<'a> ChainedOutputMapper<'a> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            mappers: Vec::new(),
        }
    }

    /// Builder-style helper to append a mapper to the chain.
    #[must_use]
    pub fn with(mut self, mapper: Box<dyn OutputMapper + 'a>) -> Self {
        self.mappers.push(mapper);
        self
    }
}

impl OutputMapper for ChainedOutputMapper<'_> {
    fn map_all(
        &self,
        job: &JobId,
        lfn: &Lfn,
        site: Option<&SiteHandle>,
        operation: Operation,
    ) -> Result<Vec<MappedLocation>, PlannerError> {
        let mut all = Vec::new();
        for mapper in &self.mappers {
            for location in mapper.map_all(job, lfn, site, operation)? {
                if !all.contains(&location) {
                    all.push(location);
                }
            }
        }
        Ok(all)
    }

    fn description(&self) -> &'static str {
        "chained"
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::site::{Directory, FileServer, SiteStore};

    fn cluster() -> Site {
        Site::new("cluster")
            .with_directory(
                Directory::new(DirectoryKind::SharedScratch, "/scratch/run1")
                    .with_server(FileServer::new("gsiftp://se.cluster", "", Operation::All)),
            )
            .with_directory(
                Directory::new(DirectoryKind::SharedStorage, "/storage/out")
                    .with_server(FileServer::new("gsiftp://se.cluster", "", Operation::All)),
            )
    }

    #[test]
    fn flat_layout_keeps_files_together() {
        let mapper = StagingMapper::new(Layout::Flat);
        let job = Job::new("j1", "cluster");
        let site = cluster();
        let lfn = Lfn::from("f.a");
        let rel = mapper.relative_directory(&job, &site, &lfn);
        assert_eq!(rel, ".");
        let url = mapper
            .url_on_shared_scratch(&site, &job, Operation::Put, &rel, &lfn)
            .expect("url");
        assert_eq!(url, "gsiftp://se.cluster/scratch/run1/f.a");
        let path = mapper
            .internal_path(&site, &job, &rel, &lfn)
            .expect("path");
        assert_eq!(path, "/scratch/run1/f.a");
    }

    #[test]
    fn hashed_layout_is_stable() {
        let a = Layout::Hashed.relative_directory("f.a");
        let b = Layout::Hashed.relative_directory("f.a");
        assert_eq!(a, b);
        assert_eq!(a.len(), 5);
        assert_eq!(stable_hash(""), 0xcbf2_9ce4_8422_2325);
    }

    #[test]
    fn remote_initialdir_redirects_urls() {
        let mapper = StagingMapper::default();
        let site = cluster();
        let lfn = Lfn::from("f.a");
        let job = Job::new("j1", "cluster").with_profile("remote_initialdir", "/elsewhere");
        let url = mapper
            .url_on_shared_scratch(&site, &job, Operation::Get, ".", &lfn)
            .expect("url");
        assert_eq!(url, "gsiftp://se.cluster/elsewhere/f.a");
    }

    #[test]
    fn missing_server_is_configuration_error() {
        let mapper = StagingMapper::default();
        let site = Site::new("bare")
            .with_directory(Directory::new(DirectoryKind::SharedScratch, "/scratch"));
        let job = Job::new("j1", "bare");
        let err = mapper
            .url_on_shared_scratch(&site, &job, Operation::Put, ".", &Lfn::from("f.a"))
            .expect_err("no server");
        assert!(matches!(err, PlannerError::Configuration { .. }));
    }

    #[test]
    fn flat_output_mapper_uses_shared_storage() {
        let sites = SiteStore::from(vec![cluster()]);
        let mapper = FlatOutputMapper::new(&sites);
        let loc = mapper
            .map(
                &JobId::from("j1"),
                &Lfn::from("f.out"),
                Some(&SiteHandle::from("cluster")),
                Operation::Put,
            )
            .expect("map")
            .expect("location");
        assert_eq!(loc.url, "gsiftp://se.cluster/storage/out/f.out");
    }

    #[test]
    fn replica_mapper_without_site_returns_everything() {
        let mut mapper = ReplicaOutputMapper::new();
        mapper.insert(
            "f.out",
            MappedLocation {
                site: SiteHandle::from("a"),
                url: "gsiftp://a/f.out".to_string(),
            },
        );
        mapper.insert(
            "f.out",
            MappedLocation {
                site: SiteHandle::from("b"),
                url: "gsiftp://b/f.out".to_string(),
            },
        );
        let job = JobId::from("j1");
        let lfn = Lfn::from("f.out");
        let all = mapper.map_all(&job, &lfn, None, Operation::Put).expect("map");
        assert_eq!(all.len(), 2);
        let only_b = mapper
            .map_all(&job, &lfn, Some(&SiteHandle::from("b")), Operation::Put)
            .expect("map");
        assert_eq!(only_b.len(), 1);
    }

    #[test]
    fn chained_mapper_concatenates() {
        let sites = SiteStore::from(vec![cluster()]);
        let mut extra = ReplicaOutputMapper::new();
        extra.insert(
            "f.out",
            MappedLocation {
                site: SiteHandle::from("cluster"),
                url: "gsiftp://archive/f.out".to_string(),
            },
        );
        let chain = ChainedOutputMapper::new()
            .with(Box::new(FlatOutputMapper::new(&sites)))
            .with(Box::new(extra));
        let all = chain
            .map_all(
                &JobId::from("j1"),
                &Lfn::from("f.out"),
                Some(&SiteHandle::from("cluster")),
                Operation::Put,
            )
            .expect("map");
        assert_eq!(all.len(), 2);
        assert_eq!(all[1].url, "gsiftp://archive/f.out");
    }
}
