//! # SRM Mount Points
//!
//! Translation of storage-service URLs into local file URLs, used when a
//! replica is symlinked instead of copied.

use crate::primitives::{
    FILE_URL_SCHEME, SRM_MOUNT_POINT_SUFFIX, SRM_PROPERTIES_PREFIX, SRM_SERVICE_URL_SUFFIX,
};
use crate::replica::ReplicaEntry;
use crate::types::SiteHandle;
use crate::url;
use std::collections::BTreeMap;

/// Service URL prefix and local mount point of one site's storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SrmMount {
    pub service_url: String,
    pub mount_point: String,
}

/// Site → SRM mount table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SrmMountMap {
    mounts: BTreeMap<SiteHandle, SrmMount>,
}

impl SrmMountMap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the table from flat properties of the form
    /// `<prefix>.<site>.service.url` and `<prefix>.<site>.mountpoint`.
    ///
    /// Sites with a service URL but no mount point are dropped with a
    /// warning. Keys outside the prefix are ignored.
    #[must_use]
    pub fn from_properties(properties: &BTreeMap<String, String>) -> Self {
        let prefix = format!("{SRM_PROPERTIES_PREFIX}.");
        let mut urls: BTreeMap<&str, &str> = BTreeMap::new();
        let mut mounts: BTreeMap<&str, &str> = BTreeMap::new();

        for (key, value) in properties {
            let Some(rest) = key.strip_prefix(&prefix) else {
                continue;
            };
            let Some((site, suffix)) = rest.split_once('.') else {
                continue;
            };
            if suffix == SRM_SERVICE_URL_SUFFIX {
                urls.insert(site, value);
            } else if suffix == SRM_MOUNT_POINT_SUFFIX {
                mounts.insert(site, value);
            }
        }

        let mut map = Self::new();
        for (site, service_url) in urls {
            let Some(mount_point) = mounts.get(site) else {
                tracing::warn!(site, "mount point for SRM server not specified");
                continue;
            };
            map.insert(
                SiteHandle::from(site),
                SrmMount {
                    service_url: service_url.to_string(),
                    mount_point: (*mount_point).to_string(),
                },
            );
        }
        tracing::debug!(sites = map.len(), "SRM server map built");
        map
    }

    /// Add or replace the mount of a site.
    pub fn insert(&mut self, site: SiteHandle, mount: SrmMount) {
        self.mounts.insert(site, mount);
    }

    #[must_use]
    pub fn get(&self, site: &SiteHandle) -> Option<&SrmMount> {
        self.mounts.get(site)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.mounts.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.mounts.is_empty()
    }

    /// Rewrite a replica into a file URL on its own site.
    ///
    /// File URLs are returned unchanged. A URL under the site's service
    /// prefix is moved under the mount point; any other URL keeps only its
    /// path.
    #[must_use]
    pub fn rewrite_source(&self, entry: &ReplicaEntry) -> ReplicaEntry {
        if url::is_file_url(&entry.pfn) {
            return entry.clone();
        }
        let mounted = self.get(&entry.site).and_then(|mount| {
            entry
                .pfn
                .strip_prefix(mount.service_url.as_str())
                .map(|rest| format!("{FILE_URL_SCHEME}//{}{rest}", mount.mount_point))
        });
        let pfn = mounted.unwrap_or_else(|| url::file_url(url::path_of(&entry.pfn)));
        tracing::trace!(from = %entry.pfn, to = %pfn, "replaced source URL");
        entry.with_pfn(pfn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props() -> BTreeMap<String, String> {
        let mut p = BTreeMap::new();
        p.insert(
            "conveyor.transfer.srm.ligo-cit.service.url".to_string(),
            "srm://osg-se.ligo.caltech.edu:10443/srm/v2/server?SFN=/mnt/hadoop".to_string(),
        );
        p.insert(
            "conveyor.transfer.srm.ligo-cit.mountpoint".to_string(),
            "/mnt/hadoop".to_string(),
        );
        p.insert(
            "conveyor.transfer.srm.orphan.service.url".to_string(),
            "srm://orphan/".to_string(),
        );
        p.insert("unrelated.key".to_string(), "x".to_string());
        p
    }

    #[test]
    fn sites_without_mount_point_are_dropped() {
        let map = SrmMountMap::from_properties(&props());
        assert_eq!(map.len(), 1);
        assert!(map.get(&SiteHandle::from("ligo-cit")).is_some());
        assert!(map.get(&SiteHandle::from("orphan")).is_none());
    }

    #[test]
    fn srm_url_moves_under_mount_point() {
        let map = SrmMountMap::from_properties(&props());
        let entry = ReplicaEntry::new(
            "srm://osg-se.ligo.caltech.edu:10443/srm/v2/server?SFN=/mnt/hadoop/data/f.a",
            "ligo-cit",
        );
        assert_eq!(map.rewrite_source(&entry).pfn, "file:///mnt/hadoop/data/f.a");
    }

    #[test]
    fn unmapped_url_keeps_path_only() {
        let map = SrmMountMap::new();
        let entry = ReplicaEntry::new("gsiftp://host/data/f.a", "cluster");
        let out = map.rewrite_source(&entry);
        assert_eq!(out.pfn, "file:///data/f.a");
        assert_eq!(out.site, entry.site);
    }

    #[test]
    fn file_url_is_untouched() {
        let map = SrmMountMap::new();
        let entry = ReplicaEntry::new("file:///data/f.a", "cluster");
        assert_eq!(map.rewrite_source(&entry), entry);
    }
}
