//! # Transfer Plans
//!
//! The immutable result of a planning run: per job, the transfer
//! descriptors grouped the way a refiner consumes them, the annotated job
//! snapshots, and the two location caches.
//!
//! Planning and graph mutation are separate steps. `TransferPlan::apply`
//! replays the batches into a `Refiner`, which alone decides how they turn
//! into jobs and edges.

use crate::cache::{PlannerCache, WorkflowCache};
use crate::job::Job;
use crate::refiner::Refiner;
use crate::transfer::TransferDescriptor;
use crate::types::{JobId, Lfn, PlannerError, TransferKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Stage-out descriptors of one job and where they run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageOut {
    pub transfers: Vec<TransferDescriptor>,
    pub local: bool,
}

/// Everything planned for one job, in the order it is handed to a refiner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobTransfers {
    pub job: JobId,
    /// The job was removed by upstream reduction and only stages out.
    pub deleted: bool,
    pub inter_site_local: Vec<TransferDescriptor>,
    pub inter_site_remote: Vec<TransferDescriptor>,
    pub stage_in_local: Vec<TransferDescriptor>,
    pub stage_in_remote: Vec<TransferDescriptor>,
    pub stage_out: Option<StageOut>,
}

impl JobTransfers {
    #[must_use]
    pub fn new(job: JobId) -> Self {
        Self {
            job,
            deleted: false,
            inter_site_local: Vec::new(),
            inter_site_remote: Vec::new(),
            stage_in_local: Vec::new(),
            stage_in_remote: Vec::new(),
            stage_out: None,
        }
    }

    /// All descriptors of the batch with their kind.
    pub fn descriptors(&self) -> impl Iterator<Item = (TransferKind, &TransferDescriptor)> {
        let inter = self
            .inter_site_local
            .iter()
            .chain(&self.inter_site_remote)
            .map(|ft| (TransferKind::InterSite, ft));
        let stage_in = self
            .stage_in_local
            .iter()
            .chain(&self.stage_in_remote)
            .map(|ft| (TransferKind::StageIn, ft));
        let stage_out = self
            .stage_out
            .iter()
            .flat_map(|so| so.transfers.iter())
            .map(|ft| (TransferKind::StageOut, ft));
        inter.chain(stage_in).chain(stage_out)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.descriptors().next().is_none()
    }
}

/// Descriptor counts of a plan, by kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PlanSummary {
    pub jobs: usize,
    pub deleted_jobs: usize,
    pub stage_in: usize,
    pub inter_site: usize,
    pub stage_out: usize,
    pub planner_cache: usize,
    pub workflow_cache: usize,
}

// =============================================================================
// TRANSFER PLAN
// =============================================================================

/// The outcome of one planning run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferPlan {
    pub label: String,
    pub index: u32,
    /// Job snapshots as annotated by the planner.
    pub jobs: BTreeMap<JobId, Job>,
    /// One batch per planned job, in planning order.
    pub batches: Vec<JobTransfers>,
    pub planner_cache: PlannerCache,
    pub workflow_cache: WorkflowCache,
}

impl TransferPlan {
    #[must_use]
    pub fn new(label: impl Into<String>, index: u32, workflow_cache: WorkflowCache) -> Self {
        Self {
            label: label.into(),
            index,
            jobs: BTreeMap::new(),
            batches: Vec::new(),
            planner_cache: PlannerCache::new(),
            workflow_cache,
        }
    }

    /// Store a planned job and its batch.
    pub fn record(&mut self, job: Job, batch: JobTransfers) {
        self.jobs.insert(job.id.clone(), job);
        self.batches.push(batch);
    }

    #[must_use]
    pub fn job(&self, id: &JobId) -> Option<&Job> {
        self.jobs.get(id)
    }

    #[must_use]
    pub fn batch(&self, id: &JobId) -> Option<&JobTransfers> {
        self.batches.iter().find(|b| &b.job == id)
    }

    /// Every descriptor of the plan with its kind, in planning order.
    pub fn descriptors(&self) -> impl Iterator<Item = (TransferKind, &TransferDescriptor)> {
        self.batches.iter().flat_map(JobTransfers::descriptors)
    }

    /// Descriptors of one kind moving `lfn`.
    pub fn descriptors_for<'a>(
        &'a self,
        lfn: &'a Lfn,
        kind: TransferKind,
    ) -> impl Iterator<Item = &'a TransferDescriptor> + 'a {
        self.descriptors()
            .filter(move |(k, ft)| *k == kind && &ft.lfn == lfn)
            .map(|(_, ft)| ft)
    }

    #[must_use]
    pub fn summary(&self) -> PlanSummary {
        let mut summary = PlanSummary {
            jobs: self.jobs.len(),
            deleted_jobs: self.batches.iter().filter(|b| b.deleted).count(),
            planner_cache: self.planner_cache.len(),
            workflow_cache: self.workflow_cache.len(),
            ..PlanSummary::default()
        };
        for (kind, _) in self.descriptors() {
            match kind {
                TransferKind::StageIn => summary.stage_in += 1,
                TransferKind::InterSite => summary.inter_site += 1,
                TransferKind::StageOut => summary.stage_out += 1,
            }
        }
        summary
    }

    /// Replay the plan into a refiner, then signal that nothing else follows.
    pub fn apply(&self, refiner: &mut dyn Refiner) -> Result<(), PlannerError> {
        tracing::debug!(refiner = refiner.description(), batches = self.batches.len(), "applying plan");
        for batch in &self.batches {
            let job = self
                .jobs
                .get(&batch.job)
                .ok_or_else(|| PlannerError::UnknownJob(batch.job.clone()))?;
            if batch.deleted {
                if let Some(stage_out) = &batch.stage_out {
                    refiner.add_stage_out_transfers(job, &stage_out.transfers, stage_out.local, true)?;
                }
                continue;
            }
            if !batch.inter_site_local.is_empty() {
                refiner.add_inter_site_transfers(job, &batch.inter_site_local, true)?;
            }
            if !batch.inter_site_remote.is_empty() {
                refiner.add_inter_site_transfers(job, &batch.inter_site_remote, false)?;
            }
            if !batch.stage_in_local.is_empty() || !batch.stage_in_remote.is_empty() {
                refiner.add_stage_in_transfers(job, &batch.stage_in_local, &batch.stage_in_remote)?;
            }
            if let Some(stage_out) = &batch.stage_out {
                refiner.add_stage_out_transfers(job, &stage_out.transfers, stage_out.local, false)?;
            }
        }
        refiner.done()
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::TransferLocationPolicy;

    #[derive(Default)]
    struct Recorder {
        calls: Vec<String>,
    }

    impl TransferLocationPolicy for Recorder {}

    impl Refiner for Recorder {
        fn add_stage_in_transfers(
            &mut self,
            job: &Job,
            local: &[TransferDescriptor],
            remote: &[TransferDescriptor],
        ) -> Result<(), PlannerError> {
            self.calls
                .push(format!("in {} {} {}", job.id, local.len(), remote.len()));
            Ok(())
        }

        fn add_inter_site_transfers(
            &mut self,
            job: &Job,
            transfers: &[TransferDescriptor],
            local: bool,
        ) -> Result<(), PlannerError> {
            self.calls
                .push(format!("inter {} {} {local}", job.id, transfers.len()));
            Ok(())
        }

        fn add_stage_out_transfers(
            &mut self,
            job: &Job,
            transfers: &[TransferDescriptor],
            local: bool,
            deleted: bool,
        ) -> Result<(), PlannerError> {
            self.calls.push(format!(
                "out {} {} {local} {deleted}",
                job.id,
                transfers.len()
            ));
            Ok(())
        }

        fn done(&mut self) -> Result<(), PlannerError> {
            self.calls.push("done".to_string());
            Ok(())
        }

        fn description(&self) -> &'static str {
            "recorder"
        }
    }

    fn descriptor(lfn: &str, job: &str) -> TransferDescriptor {
        let mut ft = TransferDescriptor::new(lfn, job);
        ft.add_source("a", format!("gsiftp://a/{lfn}"));
        ft.add_destination("b", format!("gsiftp://b/{lfn}"));
        ft
    }

    fn sample() -> TransferPlan {
        let mut plan = TransferPlan::new("w", 0, WorkflowCache::new("w-0.cache"));
        let mut batch = JobTransfers::new(JobId::from("b"));
        batch.inter_site_remote.push(descriptor("f.a", "b"));
        batch.stage_in_local.push(descriptor("f.in", "b"));
        batch.stage_out = Some(StageOut {
            transfers: vec![descriptor("f.b", "b")],
            local: true,
        });
        plan.record(Job::new("b", "cluster"), batch);

        let mut deleted = JobTransfers::new(JobId::from("x"));
        deleted.deleted = true;
        deleted.stage_out = Some(StageOut {
            transfers: vec![descriptor("f.x", "x")],
            local: true,
        });
        plan.record(Job::new("x", "local"), deleted);
        plan
    }

    #[test]
    fn apply_replays_batches_in_order_then_done() {
        let plan = sample();
        let mut recorder = Recorder::default();
        plan.apply(&mut recorder).expect("apply");
        assert_eq!(
            recorder.calls,
            vec![
                "inter b 1 false",
                "in b 1 0",
                "out b 1 true false",
                "out x 1 true true",
                "done",
            ]
        );
    }

    #[test]
    fn summary_counts_by_kind() {
        let summary = sample().summary();
        assert_eq!(summary.jobs, 2);
        assert_eq!(summary.deleted_jobs, 1);
        assert_eq!(summary.inter_site, 1);
        assert_eq!(summary.stage_in, 1);
        assert_eq!(summary.stage_out, 2);
    }

    #[test]
    fn descriptors_for_filters_by_file_and_kind() {
        let plan = sample();
        let lfn = Lfn::from("f.a");
        assert_eq!(plan.descriptors_for(&lfn, TransferKind::InterSite).count(), 1);
        assert_eq!(plan.descriptors_for(&lfn, TransferKind::StageIn).count(), 0);
        assert!(!plan.batch(&JobId::from("b")).is_some_and(JobTransfers::is_empty));
    }

    #[test]
    fn apply_fails_on_missing_snapshot() {
        let mut plan = sample();
        plan.jobs.clear();
        let mut recorder = Recorder::default();
        assert!(matches!(
            plan.apply(&mut recorder),
            Err(PlannerError::UnknownJob(_))
        ));
    }
}
