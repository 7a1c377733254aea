//! # Site Catalog
//!
//! Immutable description of the execution and storage sites a workflow can
//! use, and the `SiteCatalog` trait through which the planner reads them.
//!
//! Catalog file formats are out of scope: sites arrive already parsed, either
//! built in code or deserialized with serde by the caller.

use crate::types::{Operation, SiteHandle};
use crate::url;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// =============================================================================
// DIRECTORIES & FILE SERVERS
// =============================================================================

/// The role a directory plays on a site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DirectoryKind {
    /// Scratch space shared between the head node and workers.
    SharedScratch,
    /// Long-term storage shared between the head node and workers.
    SharedStorage,
    /// Node-local scratch space.
    LocalScratch,
    /// Node-local storage.
    LocalStorage,
}

/// A file server exposing a directory over some protocol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileServer {
    /// Protocol and host, e.g. `gsiftp://se.example.org`.
    pub url_prefix: String,
    /// Path of the directory as seen through this server. Falls back to
    /// the directory's own path when empty.
    #[serde(default)]
    pub mount_point: String,
    /// Operations this server may be used for.
    #[serde(default)]
    pub operation: Operation,
}

impl FileServer {
    /// Create a new file server.
    #[must_use]
    pub fn new(
        url_prefix: impl Into<String>,
        mount_point: impl Into<String>,
        operation: Operation,
    ) -> Self {
        Self {
            url_prefix: url_prefix.into(),
            mount_point: mount_point.into(),
            operation,
        }
    }
}

/// A directory on a site, reachable through one or more file servers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Directory {
    /// What the directory is used for.
    pub kind: DirectoryKind,
    /// Filesystem path as seen by jobs running on the site.
    pub path: String,
    /// Servers through which the directory is reachable from outside.
    #[serde(default)]
    pub file_servers: Vec<FileServer>,
}

impl Directory {
    /// Create a directory without file servers.
    #[must_use]
    pub fn new(kind: DirectoryKind, path: impl Into<String>) -> Self {
        Self {
            kind,
            path: path.into(),
            file_servers: Vec::new(),
        }
    }

    /// Builder-style helper to attach a file server.
    #[must_use]
    pub fn with_server(mut self, server: FileServer) -> Self {
        self.file_servers.push(server);
        self
    }

    /// All servers that can serve `operation`, exact matches first.
    pub fn servers_for(&self, operation: Operation) -> impl Iterator<Item = &FileServer> + '_ {
        operation.satisfied_by().iter().flat_map(move |op| {
            self.file_servers
                .iter()
                .filter(move |server| server.operation == *op)
        })
    }

    /// The preferred server for `operation`, if any.
    #[must_use]
    pub fn select_server(&self, operation: Operation) -> Option<&FileServer> {
        self.servers_for(operation).next()
    }

    /// The externally visible path of this directory through `server`.
    #[must_use]
    pub fn external_path<'a>(&'a self, server: &'a FileServer) -> &'a str {
        if server.mount_point.is_empty() {
            &self.path
        } else {
            &server.mount_point
        }
    }

    /// URL of the directory root through `server`.
    #[must_use]
    pub fn url_through(&self, server: &FileServer) -> String {
        url::join(&server.url_prefix, [self.external_path(server)])
    }
}

// =============================================================================
// SITE
// =============================================================================

/// An execution or storage site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Site {
    /// Unique handle of the site.
    pub handle: SiteHandle,
    /// Directories available on the site.
    #[serde(default)]
    pub directories: Vec<Directory>,
    /// The site's filesystems are mounted on the submit host as well.
    #[serde(default)]
    pub visible_to_submit_host: bool,
}

impl Site {
    /// Create a site with no directories.
    #[must_use]
    pub fn new(handle: impl Into<SiteHandle>) -> Self {
        Self {
            handle: handle.into(),
            directories: Vec::new(),
            visible_to_submit_host: false,
        }
    }

    /// Builder-style helper to add a directory.
    #[must_use]
    pub fn with_directory(mut self, directory: Directory) -> Self {
        self.directories.push(directory);
        self
    }

    /// Builder-style helper to mark the site as visible to the submit host.
    #[must_use]
    pub fn visible_to_submit_host(mut self, visible: bool) -> Self {
        self.visible_to_submit_host = visible;
        self
    }

    /// The first directory of the given kind.
    #[must_use]
    pub fn directory(&self, kind: DirectoryKind) -> Option<&Directory> {
        self.directories.iter().find(|d| d.kind == kind)
    }

    /// The shared-scratch directory, if the site has one.
    #[must_use]
    pub fn shared_scratch(&self) -> Option<&Directory> {
        self.directory(DirectoryKind::SharedScratch)
    }

    /// URL of the shared-scratch work directory for `operation`.
    ///
    /// Returns `None` when the site has no shared scratch or no server on it
    /// supports the operation.
    #[must_use]
    pub fn shared_scratch_url(&self, operation: Operation) -> Option<String> {
        let scratch = self.shared_scratch()?;
        let server = scratch.select_server(operation)?;
        Some(scratch.url_through(server))
    }

    /// Shared-scratch path as seen by jobs on the site.
    ///
    /// `remote_dir` overrides the work directory: absolute values replace it,
    /// relative values are appended to it.
    #[must_use]
    pub fn internal_work_directory(&self, remote_dir: Option<&str>) -> Option<String> {
        let scratch = self.shared_scratch()?;
        Some(match remote_dir {
            Some(dir) if dir.starts_with('/') => dir.to_string(),
            Some(dir) => url::join(&scratch.path, [dir]),
            None => scratch.path.clone(),
        })
    }
}

// =============================================================================
// SITE CATALOG
// =============================================================================

/// Read-only access to the sites known for a planning run.
pub trait SiteCatalog {
    /// Look up a site by handle.
    fn lookup(&self, handle: &SiteHandle) -> Option<&Site>;
}

/// In-memory site catalog keyed by handle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<Site>", into = "Vec<Site>")]
pub struct SiteStore {
    sites: BTreeMap<SiteHandle, Site>,
}

impl SiteStore {
    /// Create an empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a site.
    pub fn insert(&mut self, site: Site) {
        self.sites.insert(site.handle.clone(), site);
    }

    /// All sites in handle order.
    pub fn sites(&self) -> impl Iterator<Item = &Site> {
        self.sites.values()
    }

    /// Number of sites.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sites.len()
    }

    /// Check whether the catalog is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sites.is_empty()
    }
}

impl SiteCatalog for SiteStore {
    fn lookup(&self, handle: &SiteHandle) -> Option<&Site> {
        self.sites.get(handle)
    }
}

impl From<Vec<Site>> for SiteStore {
    fn from(sites: Vec<Site>) -> Self {
        let mut store = Self::new();
        for site in sites {
            store.insert(site);
        }
        store
    }
}

impl From<SiteStore> for Vec<Site> {
    fn from(store: SiteStore) -> Self {
        store.sites.into_values().collect()
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn cluster() -> Site {
        Site::new("cluster").with_directory(
            Directory::new(DirectoryKind::SharedScratch, "/lustre/scratch")
                .with_server(FileServer::new(
                    "gsiftp://gridftp.cluster.org",
                    "/gpfs/scratch",
                    Operation::Get,
                ))
                .with_server(FileServer::new("gsiftp://gridftp.cluster.org", "", Operation::All)),
        )
    }

    #[test]
    fn exact_operation_preferred_over_all() {
        let site = cluster();
        let scratch = site.shared_scratch().expect("scratch");
        let server = scratch.select_server(Operation::Get).expect("server");
        assert_eq!(server.operation, Operation::Get);
        let put = scratch.select_server(Operation::Put).expect("server");
        assert_eq!(put.operation, Operation::All);
    }

    #[test]
    fn shared_scratch_url_uses_server_mount_point() {
        let site = cluster();
        assert_eq!(
            site.shared_scratch_url(Operation::Get).as_deref(),
            Some("gsiftp://gridftp.cluster.org/gpfs/scratch")
        );
        assert_eq!(
            site.shared_scratch_url(Operation::Put).as_deref(),
            Some("gsiftp://gridftp.cluster.org/lustre/scratch")
        );
    }

    #[test]
    fn missing_server_yields_none() {
        let site = Site::new("bare")
            .with_directory(Directory::new(DirectoryKind::SharedScratch, "/scratch"));
        assert!(site.shared_scratch_url(Operation::Put).is_none());
    }

    #[test]
    fn internal_work_directory_honours_override() {
        let site = cluster();
        assert_eq!(
            site.internal_work_directory(None).as_deref(),
            Some("/lustre/scratch")
        );
        assert_eq!(
            site.internal_work_directory(Some("run0001")).as_deref(),
            Some("/lustre/scratch/run0001")
        );
        assert_eq!(
            site.internal_work_directory(Some("/other")).as_deref(),
            Some("/other")
        );
    }

    #[test]
    fn store_lookup() {
        let store = SiteStore::from(vec![cluster(), Site::new("local")]);
        assert_eq!(store.len(), 2);
        assert!(store.lookup(&SiteHandle::from("cluster")).is_some());
        assert!(store.lookup(&SiteHandle::from("missing")).is_none());
    }
}
