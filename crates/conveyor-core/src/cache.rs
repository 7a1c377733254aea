//! # Location Caches
//!
//! Two append-only ledgers written during planning:
//! - `PlannerCache`: put URLs (and bypassed get URLs) for downstream cleanup
//! - `WorkflowCache`: get URLs, persisted as a catalog file in the submit
//!   directory for later workflow stages
//!
//! Entries are never removed. Exact duplicates collapse so a location is
//! recorded once no matter how many times the planner revisits it.

use crate::primitives::CACHE_FILE_SUFFIX;
use crate::types::{Lfn, Operation, PlannerError, SiteHandle};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

/// One tracked location.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheEntry {
    pub lfn: Lfn,
    pub url: String,
    pub site: SiteHandle,
    pub operation: Operation,
}

impl CacheEntry {
    /// Catalog line: `lfn url site="<site>"`.
    #[must_use]
    pub fn to_catalog_line(&self) -> String {
        format!("{} {} site=\"{}\"", self.lfn, self.url, self.site)
    }
}

fn push_unique(entries: &mut Vec<CacheEntry>, entry: CacheEntry) -> bool {
    if entries.contains(&entry) {
        return false;
    }
    entries.push(entry);
    true
}

// =============================================================================
// PLANNER CACHE
// =============================================================================

/// In-memory ledger handed to the caller for cleanup planning.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannerCache {
    entries: Vec<CacheEntry>,
}

impl PlannerCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a put URL.
    pub fn track_put(&mut self, lfn: &Lfn, url: &str, site: &SiteHandle) {
        self.track(lfn, url, site, Operation::Put);
    }

    /// Track a URL for an arbitrary operation.
    pub fn track(&mut self, lfn: &Lfn, url: &str, site: &SiteHandle, operation: Operation) {
        let inserted = push_unique(
            &mut self.entries,
            CacheEntry {
                lfn: lfn.clone(),
                url: url.to_string(),
                site: site.clone(),
                operation,
            },
        );
        if inserted {
            tracing::trace!(lfn = %lfn, url, site = %site, %operation, "planner cache");
        }
    }

    /// Entries in insertion order.
    #[must_use]
    pub fn entries(&self) -> &[CacheEntry] {
        &self.entries
    }

    /// Entries for one logical file, in insertion order.
    pub fn lookup<'a>(&'a self, lfn: &'a Lfn) -> impl Iterator<Item = &'a CacheEntry> + 'a {
        self.entries.iter().filter(move |e| &e.lfn == lfn)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// =============================================================================
// WORKFLOW CACHE
// =============================================================================

/// Name of the workflow cache file for a workflow.
///
/// The basename prefix wins when given; otherwise `<label>-<index>`.
#[must_use]
pub fn cache_file_name(basename_prefix: Option<&str>, label: &str, index: u32) -> String {
    match basename_prefix {
        Some(prefix) => format!("{prefix}{CACHE_FILE_SUFFIX}"),
        None => format!("{label}-{index}{CACHE_FILE_SUFFIX}"),
    }
}

/// Ledger of get URLs persisted to the submit directory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowCache {
    file_name: String,
    entries: Vec<CacheEntry>,
}

impl WorkflowCache {
    #[must_use]
    pub fn new(file_name: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
            entries: Vec::new(),
        }
    }

    /// Track a get URL.
    pub fn track_get(&mut self, lfn: &Lfn, url: &str, site: &SiteHandle) {
        let inserted = push_unique(
            &mut self.entries,
            CacheEntry {
                lfn: lfn.clone(),
                url: url.to_string(),
                site: site.clone(),
                operation: Operation::Get,
            },
        );
        if inserted {
            tracing::trace!(lfn = %lfn, url, site = %site, "workflow cache");
        }
    }

    #[must_use]
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    #[must_use]
    pub fn entries(&self) -> &[CacheEntry] {
        &self.entries
    }

    /// Entries for one logical file, in insertion order.
    pub fn lookup<'a>(&'a self, lfn: &'a Lfn) -> impl Iterator<Item = &'a CacheEntry> + 'a {
        self.entries.iter().filter(move |e| &e.lfn == lfn)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The catalog text, one line per entry.
    #[must_use]
    pub fn to_catalog_text(&self) -> String {
        let mut text = String::new();
        for entry in &self.entries {
            text.push_str(&entry.to_catalog_line());
            text.push('\n');
        }
        text
    }

    /// Append all entries to the cache file in `submit_dir` and close it.
    ///
    /// Returns the path of the written file.
    pub fn persist(&self, submit_dir: &Path) -> Result<PathBuf, PlannerError> {
        let path = submit_dir.join(&self.file_name);
        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        file.write_all(self.to_catalog_text().as_bytes())?;
        file.flush()?;
        tracing::debug!(path = %path.display(), entries = self.entries.len(), "workflow cache written");
        Ok(path)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_name_prefers_basename_prefix() {
        assert_eq!(cache_file_name(Some("run"), "diamond", 0), "run.cache");
        assert_eq!(cache_file_name(None, "diamond", 3), "diamond-3.cache");
    }

    #[test]
    fn exact_duplicates_collapse() {
        let mut cache = PlannerCache::new();
        let lfn = Lfn::from("f.a");
        let site = SiteHandle::from("cluster");
        cache.track_put(&lfn, "gsiftp://h/f.a", &site);
        cache.track_put(&lfn, "gsiftp://h/f.a", &site);
        cache.track(&lfn, "gsiftp://h/f.a", &site, Operation::Get);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.lookup(&lfn).count(), 2);
    }

    #[test]
    fn catalog_line_format() {
        let mut cache = WorkflowCache::new("w-0.cache");
        cache.track_get(&Lfn::from("f.a"), "gsiftp://h/f.a", &SiteHandle::from("cluster"));
        assert_eq!(cache.to_catalog_text(), "f.a gsiftp://h/f.a site=\"cluster\"\n");
    }

    #[test]
    fn persist_appends_to_submit_dir() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut cache = WorkflowCache::new("w-0.cache");
        cache.track_get(&Lfn::from("f.a"), "gsiftp://h/f.a", &SiteHandle::from("cluster"));
        let path = cache.persist(dir.path()).expect("persist");
        cache.persist(dir.path()).expect("persist again");
        let text = std::fs::read_to_string(path).expect("read");
        assert_eq!(text.lines().count(), 2);
    }
}
