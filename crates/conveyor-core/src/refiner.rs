//! # Refiners
//!
//! The boundary through which planned transfers become jobs in the
//! workflow. The planner never touches graph edges itself; a `Refiner`
//! receives the descriptors of each job and decides how to materialize
//! them.
//!
//! `GraphRefiner` is the bundled implementation: one transfer job per
//! (job, transfer kind, local/remote) bucket, wired into the `Workflow`.

use crate::config::RefinerPreferences;
use crate::job::{Job, JobKind};
use crate::policy::TransferLocationPolicy;
use crate::transfer::TransferDescriptor;
use crate::types::{JobId, PlannerError, SiteHandle, TransferKind};
use crate::workflow::{JobGraph, Workflow};

// =============================================================================
// REFINER TRAIT
// =============================================================================

/// Receives the planned transfers of each job.
///
/// Calls arrive per job in planning order; `done` is called exactly once at
/// the end.
pub trait Refiner: TransferLocationPolicy {
    /// Stage-in transfers of `job`, split by where they run.
    fn add_stage_in_transfers(
        &mut self,
        job: &Job,
        local: &[TransferDescriptor],
        remote: &[TransferDescriptor],
    ) -> Result<(), PlannerError>;

    /// Transfers of parent outputs to the staging site of `job`.
    fn add_inter_site_transfers(
        &mut self,
        job: &Job,
        transfers: &[TransferDescriptor],
        local: bool,
    ) -> Result<(), PlannerError>;

    /// Stage-out transfers of `job`. `deleted` marks jobs removed by
    /// upstream reduction, which are not part of the workflow.
    fn add_stage_out_transfers(
        &mut self,
        job: &Job,
        transfers: &[TransferDescriptor],
        local: bool,
        deleted: bool,
    ) -> Result<(), PlannerError>;

    /// No further transfers will arrive.
    fn done(&mut self) -> Result<(), PlannerError>;

    /// Short name for logs.
    fn description(&self) -> &'static str;
}

// =============================================================================
// GRAPH REFINER
// =============================================================================

/// Inserts transfer jobs into a `Workflow`.
pub struct GraphRefiner<'w> {
    workflow: &'w mut Workflow,
    submit_host: SiteHandle,
    preferences: RefinerPreferences,
    inserted: usize,
}

impl<'w> GraphRefiner<'w> {
    #[must_use]
    pub fn new(
        workflow: &'w mut Workflow,
        submit_host: SiteHandle,
        preferences: RefinerPreferences,
    ) -> Self {
        Self {
            workflow,
            submit_host,
            preferences,
            inserted: 0,
        }
    }

    /// Number of transfer jobs inserted so far.
    #[must_use]
    pub fn inserted(&self) -> usize {
        self.inserted
    }

    /// Name of the transfer job for a bucket.
    #[must_use]
    pub fn transfer_job_id(kind: TransferKind, local: bool, job: &JobId) -> JobId {
        let place = if local { "local" } else { "remote" };
        JobId::new(format!("{}_{place}_{job}", kind.prefix()))
    }

    /// Replace the workflow's copy of `job` with the planner's snapshot.
    fn sync(&mut self, job: &Job) {
        if let Some(existing) = self.workflow.job_mut(&job.id) {
            *existing = job.clone();
        }
    }

    fn insert_transfer_job(
        &mut self,
        job: &Job,
        kind: TransferKind,
        local: bool,
        transfers: &[TransferDescriptor],
    ) -> JobId {
        let id = Self::transfer_job_id(kind, local, &job.id);
        let site = if local {
            self.submit_host.clone()
        } else {
            job.staging_site().clone()
        };
        let mut transfer_job = Job::new(id.clone(), site).with_kind(JobKind::Transfer {
            kind,
            local,
            transfers: transfers.to_vec(),
        });
        transfer_job.level = job.level;
        transfer_job.relative_submit_dir = job.relative_submit_dir.clone();
        self.workflow.add_job(transfer_job);
        self.inserted += 1;
        tracing::debug!(job = %job.id, transfer_job = %id, %kind, files = transfers.len(), "added transfer job");
        id
    }
}

impl TransferLocationPolicy for GraphRefiner<'_> {
    fn refiner_preference_for_location(&self) -> bool {
        self.preferences.refiner_preference_for_location()
    }

    fn prefers_local(&self, kind: TransferKind) -> bool {
        self.preferences.prefers_local(kind)
    }

    fn run_remotely(&self, site: &SiteHandle, kind: TransferKind) -> bool {
        self.preferences.run_remotely(site, kind)
    }
}

impl Refiner for GraphRefiner<'_> {
    fn add_stage_in_transfers(
        &mut self,
        job: &Job,
        local: &[TransferDescriptor],
        remote: &[TransferDescriptor],
    ) -> Result<(), PlannerError> {
        self.sync(job);
        for (set, is_local) in [(local, true), (remote, false)] {
            if set.is_empty() {
                continue;
            }
            let id = self.insert_transfer_job(job, TransferKind::StageIn, is_local, set);
            self.workflow.add_dependency(&id, &job.id)?;
        }
        Ok(())
    }

    fn add_inter_site_transfers(
        &mut self,
        job: &Job,
        transfers: &[TransferDescriptor],
        local: bool,
    ) -> Result<(), PlannerError> {
        self.sync(job);
        if transfers.is_empty() {
            return Ok(());
        }
        // parents whose outputs travel with this transfer job
        let feeding: Vec<JobId> = self
            .workflow
            .parents(&job.id)
            .into_iter()
            .filter(|parent| {
                self.workflow.job(parent).is_some_and(|p| {
                    transfers.iter().any(|ft| p.has_output(&ft.lfn))
                })
            })
            .cloned()
            .collect();
        let id = self.insert_transfer_job(job, TransferKind::InterSite, local, transfers);
        for parent in &feeding {
            self.workflow.add_dependency(parent, &id)?;
        }
        self.workflow.add_dependency(&id, &job.id)
    }

    fn add_stage_out_transfers(
        &mut self,
        job: &Job,
        transfers: &[TransferDescriptor],
        local: bool,
        deleted: bool,
    ) -> Result<(), PlannerError> {
        if transfers.is_empty() {
            return Ok(());
        }
        if deleted {
            // the job itself never runs, so its stage-out job is a root
            self.insert_transfer_job(job, TransferKind::StageOut, local, transfers);
            return Ok(());
        }
        self.sync(job);
        let id = self.insert_transfer_job(job, TransferKind::StageOut, local, transfers);
        self.workflow.add_dependency(&job.id, &id)
    }

    fn done(&mut self) -> Result<(), PlannerError> {
        tracing::debug!(
            workflow = self.workflow.label(),
            inserted = self.inserted,
            "transfer refinement done"
        );
        Ok(())
    }

    fn description(&self) -> &'static str {
        "graph"
    }
}

// =============================================================================
// TESTS
// =============================================================================
