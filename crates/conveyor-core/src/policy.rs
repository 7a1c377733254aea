//! # Staging Policies
//!
//! The decisions the planner makes per transfer and per candidate replica:
//! - where a transfer job runs (submit host or remote site)
//! - whether first-level staging of an input can be bypassed
//! - whether a replica can be symlinked instead of copied
//!
//! The refiner that will materialize the transfer jobs takes part through
//! the `TransferLocationPolicy` trait.

use crate::config::DataConfiguration;
use crate::file::LogicalFile;
use crate::job::Job;
use crate::replica::ReplicaEntry;
use crate::site::Site;
use crate::transfer::TransferDescriptor;
use crate::types::{SiteHandle, TransferKind};
use crate::url;

// =============================================================================
// TRANSFERLOCATIONPOLICY TRAIT
// =============================================================================

/// Preferences a refiner advertises about where its transfer jobs run.
pub trait TransferLocationPolicy {
    /// The refiner decides the location of transfer jobs by kind alone.
    fn refiner_preference_for_location(&self) -> bool {
        false
    }

    /// With a location preference, whether jobs of `kind` run locally.
    fn prefers_local(&self, _kind: TransferKind) -> bool {
        true
    }

    /// Jobs of `kind` that move data to `site` must run on that site.
    fn run_remotely(&self, _site: &SiteHandle, _kind: TransferKind) -> bool {
        false
    }
}

// =============================================================================
// STAGING POLICY
// =============================================================================

/// The planner's policy decisions, parameterized by configuration and the
/// active refiner.
#[derive(Clone, Copy)]
pub struct StagingPolicy<'a> {
    pub submit_host: &'a SiteHandle,
    pub bypass_staging: bool,
    pub use_symlinks: bool,
    pub data_configuration: DataConfiguration,
    pub refiner: &'a dyn TransferLocationPolicy,
}

impl StagingPolicy<'_> {
    /// Whether a transfer of `kind` into `site` runs on the submit host.
    ///
    /// In order: the submit host itself and sites visible to it run
    /// locally; then the refiner's preferences apply; then file URL
    /// destinations force remote execution; everything else runs locally.
    #[must_use]
    pub fn run_transfer_on_local_site(
        &self,
        site: &Site,
        destination_url: Option<&str>,
        kind: TransferKind,
    ) -> bool {
        if site.handle.matches(self.submit_host) || site.visible_to_submit_host {
            return true;
        }
        if self.refiner.refiner_preference_for_location() {
            return self.refiner.prefers_local(kind);
        }
        if self.refiner.run_remotely(&site.handle, kind) {
            return false;
        }
        !destination_url.is_some_and(url::is_file_url)
    }

    /// Whether a stage-in has to run remotely because one of its file URL
    /// sources only exists on the destination site.
    #[must_use]
    pub fn run_transfer_remotely(&self, staging: &Site, transfer: &TransferDescriptor) -> bool {
        let Some(destination) = transfer.destination() else {
            return false;
        };
        transfer.sources.iter().any(|source| {
            url::is_file_url(&source.url)
                && source.site.matches(&destination.site)
                && !(source.site.matches(&staging.handle) && staging.visible_to_submit_host)
        })
    }

    /// Drop file URL sources that do not live on `site`.
    ///
    /// Returns whether anything was removed.
    pub fn remove_foreign_file_urls(
        &self,
        job: &Job,
        transfer: &mut TransferDescriptor,
        site: &SiteHandle,
    ) -> bool {
        let before = transfer.sources.len();
        transfer.sources.retain(|source| {
            let keep = !url::is_file_url(&source.url) || source.site.matches(site);
            if !keep {
                tracing::trace!(
                    job = %job.id,
                    url = %source.url,
                    site = %source.site,
                    "removing source url"
                );
            }
            keep
        });
        before != transfer.sources.len()
    }

    /// The job's data is fetched by the job itself on the worker node.
    #[must_use]
    pub fn worker_node_execution(&self, job: &Job) -> bool {
        job.data_configuration(self.data_configuration)
            .worker_node_execution()
    }

    /// Whether first-level staging of `file` from `entry` can be skipped.
    #[must_use]
    pub fn bypass_staging_for_input(
        &self,
        entry: &ReplicaEntry,
        file: &LogicalFile,
        job: &Job,
    ) -> bool {
        if !(self.bypass_staging || file.bypass) || !self.worker_node_execution(job) {
            return false;
        }
        let is_file_url = url::is_file_url(&entry.pfn);
        if job.data_configuration(self.data_configuration).condor_io() {
            // the destination cannot be remapped, so the name has to match
            is_file_url
                && entry.site.matches(self.submit_host)
                && url::last_segment(&entry.pfn) == file.lfn.as_str()
        } else if is_file_url {
            entry.site.matches(&job.execution_site)
        } else {
            true
        }
    }

    /// Whether `entry` can be symlinked into the job's staging directory.
    #[must_use]
    pub fn symlink_eligible(&self, entry: &ReplicaEntry, file: &LogicalFile, job: &Job) -> bool {
        self.use_symlinks
            && entry.site.matches(job.staging_site())
            && !file.is_executable()
            && job.container.as_ref().is_none_or(|c| c == &file.lfn)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::DATA_CONFIGURATION_KEY;

    struct NoPreference;
    impl TransferLocationPolicy for NoPreference {}

    struct StageInLocal;
    impl TransferLocationPolicy for StageInLocal {
        fn refiner_preference_for_location(&self) -> bool {
            true
        }
        fn prefers_local(&self, kind: TransferKind) -> bool {
            kind == TransferKind::StageIn
        }
    }

    fn policy<'a>(
        submit: &'a SiteHandle,
        refiner: &'a dyn TransferLocationPolicy,
    ) -> StagingPolicy<'a> {
        StagingPolicy {
            submit_host: submit,
            bypass_staging: true,
            use_symlinks: true,
            data_configuration: DataConfiguration::NonSharedFs,
            refiner,
        }
    }

    #[test]
    fn submit_host_and_visible_sites_run_locally() {
        let submit = SiteHandle::from("local");
        let p = policy(&submit, &NoPreference);
        assert!(p.run_transfer_on_local_site(
            &Site::new("local"),
            Some("file:///x"),
            TransferKind::StageIn
        ));
        let visible = Site::new("cluster").visible_to_submit_host(true);
        assert!(p.run_transfer_on_local_site(&visible, Some("file:///x"), TransferKind::StageIn));
    }

    #[test]
    fn file_url_destination_runs_remotely() {
        let submit = SiteHandle::from("local");
        let p = policy(&submit, &NoPreference);
        let site = Site::new("cluster");
        assert!(!p.run_transfer_on_local_site(&site, Some("file:///x"), TransferKind::StageIn));
        assert!(p.run_transfer_on_local_site(&site, Some("gsiftp://h/x"), TransferKind::StageIn));
        assert!(p.run_transfer_on_local_site(&site, None, TransferKind::StageOut));
    }

    #[test]
    fn refiner_preference_wins_over_url() {
        let submit = SiteHandle::from("local");
        let p = policy(&submit, &StageInLocal);
        let site = Site::new("cluster");
        assert!(p.run_transfer_on_local_site(&site, Some("file:///x"), TransferKind::StageIn));
        assert!(!p.run_transfer_on_local_site(&site, Some("gsiftp://h/x"), TransferKind::StageOut));
    }

    #[test]
    fn file_sources_on_destination_force_remote() {
        let submit = SiteHandle::from("local");
        let p = policy(&submit, &NoPreference);
        let staging = Site::new("cluster");
        let mut ft = TransferDescriptor::new("f.a", "j1");
        ft.add_source("cluster", "file:///lustre/f.a");
        ft.add_destination("cluster", "gsiftp://h/scratch/f.a");
        assert!(p.run_transfer_remotely(&staging, &ft));

        let visible = Site::new("cluster").visible_to_submit_host(true);
        assert!(!p.run_transfer_remotely(&visible, &ft));
    }

    #[test]
    fn foreign_file_urls_are_removed() {
        let submit = SiteHandle::from("local");
        let p = policy(&submit, &NoPreference);
        let job = Job::new("j1", "cluster");
        let mut ft = TransferDescriptor::new("f.a", "j1");
        ft.add_source("local", "file:///home/f.a");
        ft.add_source("remote", "gsiftp://r/f.a");
        ft.add_source("cluster", "file:///lustre/f.a");
        assert!(p.remove_foreign_file_urls(&job, &mut ft, &SiteHandle::from("cluster")));
        assert_eq!(ft.sources.len(), 2);
        assert!(!p.remove_foreign_file_urls(&job, &mut ft, &SiteHandle::from("cluster")));
    }

    #[test]
    fn condorio_bypass_requires_matching_name() {
        let submit = SiteHandle::from("local");
        let p = policy(&submit, &NoPreference);
        let job = Job::new("j1", "cluster").with_profile(DATA_CONFIGURATION_KEY, "condorio");
        let file = LogicalFile::new("f.a");
        let same = ReplicaEntry::new("file:///data/f.a", "local");
        let other = ReplicaEntry::new("file:///data/xf.a", "local");
        let remote = ReplicaEntry::new("gsiftp://h/data/f.a", "remote");
        assert!(p.bypass_staging_for_input(&same, &file, &job));
        assert!(!p.bypass_staging_for_input(&other, &file, &job));
        assert!(!p.bypass_staging_for_input(&remote, &file, &job));
    }

    #[test]
    fn nonsharedfs_bypass_rules() {
        let submit = SiteHandle::from("local");
        let p = policy(&submit, &NoPreference);
        let job = Job::new("j1", "cluster");
        let file = LogicalFile::new("f.a");
        assert!(p.bypass_staging_for_input(
            &ReplicaEntry::new("gsiftp://h/data/f.a", "remote"),
            &file,
            &job
        ));
        assert!(p.bypass_staging_for_input(
            &ReplicaEntry::new("file:///data/f.a", "cluster"),
            &file,
            &job
        ));
        assert!(!p.bypass_staging_for_input(
            &ReplicaEntry::new("file:///data/f.a", "local"),
            &file,
            &job
        ));
    }

    #[test]
    fn sharedfs_never_bypasses() {
        let submit = SiteHandle::from("local");
        let mut p = policy(&submit, &NoPreference);
        p.data_configuration = DataConfiguration::SharedFs;
        let job = Job::new("j1", "cluster");
        let entry = ReplicaEntry::new("gsiftp://h/data/f.a", "remote");
        assert!(!p.bypass_staging_for_input(&entry, &LogicalFile::new("f.a"), &job));
    }

    #[test]
    fn symlink_requires_staging_site_data_and_container_match() {
        let submit = SiteHandle::from("local");
        let p = policy(&submit, &NoPreference);
        let job = Job::new("j1", "cluster");
        let on_site = ReplicaEntry::new("file:///lustre/f.a", "cluster");
        let data = LogicalFile::new("f.a");
        assert!(p.symlink_eligible(&on_site, &data, &job));

        let exe = LogicalFile::new("f.a").with_type(crate::file::FileType::Executable);
        assert!(!p.symlink_eligible(&on_site, &exe, &job));

        let containerized = Job::new("j1", "cluster").with_container("img.sif");
        assert!(!p.symlink_eligible(&on_site, &data, &containerized));
        let image = LogicalFile::new("img.sif");
        let image_entry = ReplicaEntry::new("file:///lustre/img.sif", "cluster");
        assert!(p.symlink_eligible(&image_entry, &image, &containerized));

        let elsewhere = ReplicaEntry::new("file:///lustre/f.a", "remote");
        assert!(!p.symlink_eligible(&elsewhere, &data, &job));
    }
}
