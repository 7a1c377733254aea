//! # Transfer Planner
//!
//! Walks the workflow in dependency order and decides, for every job:
//! - which parent outputs must move between staging sites (inter-site)
//! - which inputs come from the replica catalog (stage-in), and whether
//!   they are copied, symlinked, bypassed or already in place
//! - where its outputs go (stage-out)
//!
//! Jobs removed by upstream reduction are walked afterwards and only stage
//! their outputs from the replica catalog to the output sites.
//!
//! ## Determinism
//!
//! The walk is single-threaded and follows `JobGraph::topological_order`.
//! A child is only planned after all its parents, because inter-site
//! sources are read from the parents' planned snapshots. Any error aborts
//! the whole run; no partial plan is returned.

use crate::cache::{WorkflowCache, cache_file_name};
use crate::config::{IntegrityDial, OutputMapperKind, PlannerConfig, SelectorKind, replica_mapper};
use crate::file::{LogicalFile, TransferMode};
use crate::job::{Job, JobKind, OutputLocation};
use crate::mapper::{
    ChainedOutputMapper, FlatOutputMapper, OutputMapper, ReplicaOutputMapper, StagingMapper,
    SubmitDirMapper,
};
use crate::plan::{JobTransfers, StageOut, TransferPlan};
use crate::policy::{StagingPolicy, TransferLocationPolicy};
use crate::primitives::{DAGMAN_DIRECTORY_KEY, DELETED_JOBS_LEVEL};
use crate::replica::{ReplicaCatalog, ReplicaEntry, ReplicaLocation};
use crate::selector::{DefaultSelector, LocalSelector, ReplicaSelector, selection_error};
use crate::site::{Site, SiteCatalog};
use crate::srm::SrmMountMap;
use crate::transfer::{Endpoint, TransferDescriptor};
use crate::types::{JobId, Lfn, Operation, PlannerError, SiteHandle, TransferKind};
use crate::url;
use crate::workflow::JobGraph;
use std::collections::BTreeSet;

// =============================================================================
// TRANSFER PLANNER
// =============================================================================

/// The planning engine. Catalogs are borrowed read-only for its lifetime.
pub struct TransferPlanner<'a> {
    config: PlannerConfig,
    sites: &'a dyn SiteCatalog,
    replicas: &'a dyn ReplicaCatalog,
    staging: StagingMapper,
    submit_dirs: SubmitDirMapper,
    selector: Box<dyn ReplicaSelector>,
    srm: SrmMountMap,
}

impl<'a> TransferPlanner<'a> {
    /// Build a planner. Fails when the configuration does not validate.
    pub fn new(
        config: PlannerConfig,
        sites: &'a dyn SiteCatalog,
        replicas: &'a dyn ReplicaCatalog,
    ) -> Result<Self, PlannerError> {
        config.validate()?;
        let selector: Box<dyn ReplicaSelector> = match config.selector {
            SelectorKind::Default => Box::new(DefaultSelector::new(config.submit_host.clone())),
            SelectorKind::Local => Box::new(LocalSelector::new(config.submit_host.clone())),
        };
        Ok(Self {
            staging: StagingMapper::new(config.staging_layout),
            submit_dirs: SubmitDirMapper::new(config.submit_layout),
            srm: config.srm_mounts(),
            selector,
            config,
            sites,
            replicas,
        })
    }

    #[must_use]
    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    /// Plan all transfers of `graph`, then the stage-out of `deleted` jobs.
    pub fn plan<'r>(
        &'r self,
        graph: &dyn JobGraph,
        deleted: &[Job],
        refiner: &'r dyn TransferLocationPolicy,
    ) -> Result<TransferPlan, PlannerError> {
        let cache_name = cache_file_name(
            self.config.basename_prefix.as_deref(),
            graph.label(),
            graph.index(),
        );
        let mut run = PlanningRun {
            planner: self,
            policy: StagingPolicy {
                submit_host: &self.config.submit_host,
                bypass_staging: self.config.bypass_staging,
                use_symlinks: self.config.use_symlinks,
                data_configuration: self.config.data_configuration,
                refiner,
            },
            outputs: self.output_mapper(),
            parent_scratch: (!self.config.output_map.is_empty())
                .then(|| replica_mapper(&self.config.output_map)),
            plan: TransferPlan::new(graph.label(), graph.index(), WorkflowCache::new(cache_name)),
        };

        tracing::debug!(
            workflow = graph.label(),
            selector = self.selector.description(),
            output_mapper = run.outputs.description(),
            "planning transfers"
        );
        for (id, level) in graph.topological_order()? {
            run.plan_job(graph, &id, level)?;
        }
        for job in deleted {
            run.plan_deleted_job(job)?;
        }
        Ok(run.plan)
    }

    fn output_mapper(&self) -> ChainedOutputMapper<'a> {
        let sites = self.sites;
        self.config
            .output_mappers
            .iter()
            .fold(ChainedOutputMapper::new(), |chain, kind| match kind {
                OutputMapperKind::Flat => chain.with(Box::new(FlatOutputMapper::new(sites))),
                OutputMapperKind::Replica => {
                    chain.with(Box::new(replica_mapper(&self.config.output_locations)))
                }
            })
    }
}

/// Path of the first replica that is a local file, if any.
fn local_path_of(candidates: &ReplicaLocation) -> Option<String> {
    candidates
        .entries
        .iter()
        .find(|e| e.pfn.starts_with('/') || url::is_file_url(&e.pfn))
        .map(|e| url::path_of(&e.pfn).to_string())
}

/// The outcome of planning one raw input.
enum StageIn {
    Local(TransferDescriptor),
    Remote(TransferDescriptor),
    /// Nothing to move: already in place, bypassed, or an absent checkpoint.
    Nothing,
    /// Optional input without a replica; removed from the job.
    Dropped,
}

// =============================================================================
// PLANNING RUN
// =============================================================================

struct PlanningRun<'r, 'a> {
    planner: &'r TransferPlanner<'a>,
    policy: StagingPolicy<'r>,
    outputs: ChainedOutputMapper<'a>,
    parent_scratch: Option<ReplicaOutputMapper>,
    plan: TransferPlan,
}

impl<'a> PlanningRun<'_, 'a> {
    fn site(&self, job: &Job, handle: &SiteHandle, operation: Operation) -> Result<&'a Site, PlannerError> {
        let sites: &'a dyn SiteCatalog = self.planner.sites;
        sites
            .lookup(handle)
            .ok_or_else(|| PlannerError::site_not_found(&job.id, handle, operation))
    }

    fn plan_job(&mut self, graph: &dyn JobGraph, id: &JobId, level: usize) -> Result<(), PlannerError> {
        let mut job = graph
            .job(id)
            .cloned()
            .ok_or_else(|| PlannerError::UnknownJob(id.clone()))?;
        job.level = level;
        job.relative_submit_dir = self.planner.submit_dirs.relative_directory(&job.id);
        tracing::debug!(job = %job.id, level, staging_site = %job.staging_site(), "planning job");

        match job.kind.clone() {
            JobKind::SubWorkflow { descriptor } => self.resolve_sub_workflow(&mut job, &descriptor),
            JobKind::ExternalGraph { descriptor } => {
                self.resolve_external_graph(&mut job, &descriptor)?;
            }
            JobKind::Compute | JobKind::Transfer { .. } => {}
        }

        let staging = self.site(&job, job.staging_site(), Operation::All)?;
        let parents: Vec<JobId> = graph.parents(id).into_iter().cloned().collect();
        let mut batch = JobTransfers::new(job.id.clone());

        let produced = self.inter_site_transfers(&mut job, staging, &parents, &mut batch)?;
        self.stage_in_transfers(&mut job, staging, &produced, &mut batch)?;
        self.stage_out_transfers(&mut job, staging, &mut batch)?;

        self.plan.record(job, batch);
        Ok(())
    }

    // =========================================================================
    // SUB-WORKFLOW AND EXTERNAL GRAPH DESCRIPTORS
    // =========================================================================

    fn resolve_sub_workflow(&self, job: &mut Job, descriptor: &Lfn) {
        if !job.has_input(descriptor) {
            job.inputs.push(LogicalFile::new(descriptor.clone()));
        }
        let local = self
            .planner
            .replicas
            .lookup(descriptor)
            .and_then(|rl| local_path_of(&rl));
        match local {
            Some(path) => {
                tracing::debug!(job = %job.id, %path, "sub-workflow descriptor is local");
                job.remove_input(descriptor);
                job.arguments.push(path);
            }
            None => job.arguments.push(descriptor.to_string()),
        }
    }

    fn resolve_external_graph(&self, job: &mut Job, descriptor: &Lfn) -> Result<(), PlannerError> {
        job.inputs.clear();
        let candidates = self
            .planner
            .replicas
            .lookup(descriptor)
            .filter(|rl| !rl.is_empty())
            .ok_or_else(|| PlannerError::Resolution {
                lfn: descriptor.clone(),
                job: job.id.clone(),
            })?;
        let path = local_path_of(&candidates).ok_or_else(|| PlannerError::Configuration {
            job: job.id.clone(),
            site: job.staging_site().clone(),
            operation: Operation::Get,
            reason: format!("graph file {descriptor} does not resolve to a local path"),
        })?;
        job.graph_file = Some(path);
        job.directory = job.profile(DAGMAN_DIRECTORY_KEY).map(str::to_string);
        Ok(())
    }

    // =========================================================================
    // INTER-SITE
    // =========================================================================

    /// Plan transfers of parent outputs and return the inputs the parents
    /// produce.
    fn inter_site_transfers(
        &mut self,
        job: &mut Job,
        staging: &'a Site,
        parents: &[JobId],
        batch: &mut JobTransfers,
    ) -> Result<BTreeSet<Lfn>, PlannerError> {
        let mapper = self.planner.staging;
        let mut produced = BTreeSet::new();

        for parent_id in parents {
            let parent = self
                .plan
                .job(parent_id)
                .cloned()
                .ok_or_else(|| PlannerError::UnknownJob(parent_id.clone()))?;
            let shared: Vec<Lfn> = parent
                .outputs
                .iter()
                .filter(|f| job.has_input(&f.lfn))
                .map(|f| f.lfn.clone())
                .collect();
            produced.extend(shared.iter().cloned());
            let sub_workflow = parent.is_sub_workflow();
            if shared.is_empty() || (parent.staging_site().matches(job.staging_site()) && !sub_workflow) {
                continue;
            }
            let parent_site = self.site(&parent, parent.staging_site(), Operation::Get)?;

            for lfn in &shared {
                let rel = mapper.relative_directory(job, staging, lfn);
                let dest_put = mapper.url_on_shared_scratch(staging, job, Operation::Put, &rel, lfn)?;
                let local = self.policy.run_transfer_on_local_site(
                    staging,
                    Some(&dest_put),
                    TransferKind::InterSite,
                );
                let dest_url = if local {
                    dest_put.clone()
                } else {
                    url::file_url(&mapper.internal_path(staging, job, &rel, lfn)?)
                };
                self.plan.planner_cache.track_put(lfn, &dest_put, &staging.handle);

                if sub_workflow {
                    // the sub-workflow writes the file straight to the child's site
                    if let Some(p) = self.plan.jobs.get_mut(parent_id) {
                        p.add_output_location(OutputLocation {
                            lfn: lfn.clone(),
                            site: staging.handle.clone(),
                            url: dest_put.clone(),
                        });
                    }
                    if let Some(input) = job.input_mut(lfn) {
                        input.integrity = false;
                    }
                    continue;
                }

                let dest_get = mapper.url_on_shared_scratch(staging, job, Operation::Get, &rel, lfn)?;
                self.plan.workflow_cache.track_get(lfn, &dest_get, &staging.handle);

                let Some(input) = job.inputs.iter().find(|f| &f.lfn == lfn) else {
                    continue;
                };
                let mut ft = TransferDescriptor::for_file(input, &job.id);
                let parent_rel = mapper.relative_directory(&parent, parent_site, lfn);
                for source in
                    mapper.urls_on_shared_scratch(parent_site, &parent, Operation::Get, &parent_rel, lfn)?
                {
                    if url::same_location(&source, &dest_put) {
                        continue;
                    }
                    ft.add_source(parent_site.handle.clone(), source);
                }
                ft.add_destination(staging.handle.clone(), dest_url);
                if !ft.is_valid() {
                    continue;
                }
                tracing::debug!(job = %job.id, parent = %parent.id, %lfn, local, "inter-site transfer");
                if local {
                    batch.inter_site_local.push(ft);
                } else {
                    batch.inter_site_remote.push(ft);
                }
            }
        }
        Ok(produced)
    }

    // =========================================================================
    // STAGE-IN
    // =========================================================================

    fn stage_in_transfers(
        &mut self,
        job: &mut Job,
        staging: &'a Site,
        produced: &BTreeSet<Lfn>,
        batch: &mut JobTransfers,
    ) -> Result<(), PlannerError> {
        let raw: Vec<Lfn> = job
            .inputs
            .iter()
            .filter(|f| !produced.contains(&f.lfn))
            .map(|f| f.lfn.clone())
            .collect();

        for lfn in raw {
            let Some(mut file) = job.inputs.iter().find(|f| f.lfn == lfn).cloned() else {
                continue;
            };
            file.raw_input = true;
            match self.stage_in_file(job, staging, &mut file)? {
                StageIn::Dropped => {
                    job.remove_input(&lfn);
                    continue;
                }
                StageIn::Local(ft) => batch.stage_in_local.push(ft),
                StageIn::Remote(ft) => batch.stage_in_remote.push(ft),
                StageIn::Nothing => {}
            }
            if let Some(slot) = job.input_mut(&lfn) {
                *slot = file;
            }
        }
        Ok(())
    }

    fn stage_in_file(
        &mut self,
        job: &Job,
        staging: &'a Site,
        file: &mut LogicalFile,
    ) -> Result<StageIn, PlannerError> {
        let mapper = self.planner.staging;
        let rel = mapper.relative_directory(job, staging, &file.lfn);
        let dest_put = mapper.url_on_shared_scratch(staging, job, Operation::Put, &rel, &file.lfn)?;
        let dest_get = mapper.url_on_shared_scratch(staging, job, Operation::Get, &rel, &file.lfn)?;
        let local =
            self.policy
                .run_transfer_on_local_site(staging, Some(&dest_put), TransferKind::StageIn);

        if let Some(source) = file.source.clone() {
            let put = if local {
                dest_put
            } else {
                url::file_url(&mapper.internal_path(staging, job, &rel, &file.lfn)?)
            };
            self.plan.planner_cache.track_put(&file.lfn, &put, &staging.handle);
            self.plan.workflow_cache.track_get(&file.lfn, &put, &staging.handle);
            let mut ft = TransferDescriptor::for_file(file, &job.id);
            ft.add_source(source.site, source.url);
            ft.add_destination(staging.handle.clone(), put);
            return Ok(if local { StageIn::Local(ft) } else { StageIn::Remote(ft) });
        }

        let candidates = match self.planner.replicas.lookup(&file.lfn) {
            Some(rl) if !rl.is_empty() => rl,
            _ if file.is_optional() => {
                tracing::debug!(job = %job.id, lfn = %file.lfn, "optional input has no replica, dropping it");
                return Ok(if file.is_checkpoint() {
                    StageIn::Nothing
                } else {
                    StageIn::Dropped
                });
            }
            _ => {
                return Err(PlannerError::Resolution {
                    lfn: file.lfn.clone(),
                    job: job.id.clone(),
                });
            }
        };

        file.merge_metadata(candidates.metadata());
        if self.planner.config.integrity.enabled() && file.integrity && !file.has_checksum() {
            file.checksum_computed = true;
        }
        let staging_dir = mapper.internal_directory(staging, job, &rel)?;
        let ordered = self
            .planner
            .selector
            .select_and_order(&candidates, &job.execution_site, local)?;

        let mut sources: Vec<Endpoint> = Vec::new();
        let mut symlinked = false;
        let mut bypassed = false;
        let mut tracked_get = false;

        for candidate in &ordered.entries {
            let symlink = self.policy.symlink_eligible(candidate, file, job);
            let entry = if symlink {
                self.planner.srm.rewrite_source(candidate)
            } else {
                candidate.clone()
            };
            let put = if symlink {
                url::to_symlink_url(&dest_put)
            } else {
                dest_put.clone()
            };

            if already_in_place(&entry, &put, staging, &file.lfn, &staging_dir) {
                tracing::debug!(job = %job.id, lfn = %file.lfn, url = %entry.pfn, "input already in place on staging site");
                continue;
            }

            if self.policy.bypass_staging_for_input(candidate, file, job) {
                if !file.has_checksum() {
                    file.checksum_computed = false;
                }
                self.plan.planner_cache.track(
                    &file.lfn,
                    &candidate.pfn,
                    &job.execution_site,
                    Operation::Get,
                );
                if !tracked_get {
                    self.plan
                        .workflow_cache
                        .track_get(&file.lfn, &candidate.pfn, &candidate.site);
                }
                file.for_cleanup = false;
                bypassed = true;
                tracing::debug!(job = %job.id, lfn = %file.lfn, url = %candidate.pfn, "bypassing first level staging");
                break;
            }

            // a symlink transfer only carries symlink sources and vice versa
            if sources.is_empty() {
                symlinked = symlink;
            } else if symlink != symlinked {
                continue;
            }
            if symlink && self.planner.config.integrity == IntegrityDial::NoSymlink {
                file.integrity = false;
                file.checksum_computed = false;
            }
            self.plan.planner_cache.track_put(&file.lfn, &put, &staging.handle);
            if !tracked_get {
                self.plan
                    .workflow_cache
                    .track_get(&file.lfn, &dest_get, &staging.handle);
                tracked_get = true;
            }
            sources.push(Endpoint::new(entry.site, entry.pfn));
        }

        file.bypass = bypassed;
        if bypassed || sources.is_empty() {
            return Ok(StageIn::Nothing);
        }

        let destination = if symlinked {
            url::to_symlink_url(&dest_put)
        } else {
            dest_put
        };
        let mut ft = TransferDescriptor::for_file(file, &job.id);
        for source in sources {
            ft.add_source(source.site, source.url);
        }
        ft.add_destination(staging.handle.clone(), destination);

        if symlinked || !local || self.policy.run_transfer_remotely(staging, &ft) {
            self.policy
                .remove_foreign_file_urls(job, &mut ft, &staging.handle);
            if ft.sources.is_empty() {
                return Err(selection_error(
                    &candidates,
                    &job.execution_site,
                    local,
                    &self.planner.config.submit_host,
                ));
            }
            Ok(StageIn::Remote(ft))
        } else {
            Ok(StageIn::Local(ft))
        }
    }

    // =========================================================================
    // STAGE-OUT
    // =========================================================================

    fn stage_out_transfers(
        &mut self,
        job: &mut Job,
        staging: &'a Site,
        batch: &mut JobTransfers,
    ) -> Result<(), PlannerError> {
        let mapper = self.planner.staging;
        let stages_out = self.planner.config.stages_outputs() || self.parent_scratch.is_some();
        let local = self.policy.run_transfer_on_local_site(
            staging,
            staging.shared_scratch_url(Operation::Get).as_deref(),
            TransferKind::StageOut,
        );
        let checksum = self.planner.config.integrity.enabled()
            && self.policy.worker_node_execution(job)
            && !job.is_sub_workflow();

        let mut transfers = Vec::new();
        for file in job.outputs.clone() {
            let rel = mapper.relative_directory(job, staging, &file.lfn);
            let get = mapper.url_on_shared_scratch(staging, job, Operation::Get, &rel, &file.lfn)?;
            let put = mapper.url_on_shared_scratch(staging, job, Operation::Put, &rel, &file.lfn)?;
            self.plan.planner_cache.track_put(&file.lfn, &put, &staging.handle);
            self.plan.workflow_cache.track_get(&file.lfn, &get, &staging.handle);
            if !stages_out {
                continue;
            }

            if job.is_sub_workflow() && !file.is_transient() {
                job.add_output_location(OutputLocation {
                    lfn: file.lfn.clone(),
                    site: staging.handle.clone(),
                    url: put,
                });
            }
            let source = if local {
                get.clone()
            } else {
                url::file_url(&mapper.internal_path(staging, job, &rel, &file.lfn)?)
            };
            let compute = checksum && !file.is_checkpoint();
            transfers.extend(self.stage_out_descriptors(job, &file, staging, &get, &source, compute)?);
            transfers.extend(self.parent_scratch_descriptor(job, &file, staging, &get, &source, compute)?);
        }

        if !transfers.is_empty() {
            tracing::debug!(job = %job.id, files = transfers.len(), local, "stage-out");
            batch.stage_out = Some(StageOut { transfers, local });
        }
        Ok(())
    }

    /// One descriptor per output site. A site whose location already is
    /// the file on the staging site only gets a registration.
    fn stage_out_descriptors(
        &self,
        job: &Job,
        file: &LogicalFile,
        staging: &Site,
        get: &str,
        source: &str,
        checksum: bool,
    ) -> Result<Vec<TransferDescriptor>, PlannerError> {
        if file.is_transient() {
            return Ok(file
                .register
                .then(|| noop_descriptor(job, file, &staging.handle, get))
                .into_iter()
                .collect());
        }

        let mut transfers = Vec::new();
        for site in &self.planner.config.output_sites {
            let destinations = self.outputs.map_all(&job.id, &file.lfn, Some(site), Operation::Put)?;
            if destinations.is_empty() {
                continue;
            }
            if destinations.iter().any(|d| url::same_location(&d.url, get)) {
                transfers.push(noop_descriptor(job, file, &staging.handle, get));
                continue;
            }

            let mut ft = TransferDescriptor::for_file(file, &job.id);
            ft.checksum_computed |= checksum;
            ft.add_source(staging.handle.clone(), source);
            for destination in destinations {
                ft.add_destination(destination.site, destination.url);
            }
            if file.register {
                ft.registration_url = self.registration_url(&job.id, &file.lfn, site)?;
            }
            transfers.push(ft);
        }
        Ok(transfers)
    }

    /// Extra stage-out into the scratch of the parent workflow. Never
    /// registered.
    fn parent_scratch_descriptor(
        &self,
        job: &Job,
        file: &LogicalFile,
        staging: &Site,
        get: &str,
        source: &str,
        checksum: bool,
    ) -> Result<Option<TransferDescriptor>, PlannerError> {
        let Some(scratch) = &self.parent_scratch else {
            return Ok(None);
        };
        if file.is_transient() {
            return Ok(None);
        }
        let locations = scratch.map_all(&job.id, &file.lfn, None, Operation::Put)?;
        if locations.is_empty() {
            return Ok(None);
        }
        if locations.iter().any(|l| url::same_location(&l.url, get)) {
            let mut ft = noop_descriptor(job, file, &staging.handle, get);
            ft.register = false;
            ft.registration_url = None;
            return Ok(Some(ft));
        }
        let mut ft = TransferDescriptor::for_file(file, &job.id);
        ft.transfer_mode = TransferMode::Mandatory;
        ft.register = false;
        ft.checksum_computed |= checksum;
        ft.add_source(staging.handle.clone(), source);
        for location in locations {
            ft.add_destination(location.site, location.url);
        }
        Ok(Some(ft))
    }

    /// Where the file is registered once it reached `site`.
    fn registration_url(
        &self,
        job: &JobId,
        lfn: &Lfn,
        site: &SiteHandle,
    ) -> Result<Option<String>, PlannerError> {
        Ok(self
            .outputs
            .map(job, lfn, Some(site), Operation::Get)?
            .map(|location| location.url))
    }

    // =========================================================================
    // DELETED JOBS
    // =========================================================================

    fn plan_deleted_job(&mut self, original: &Job) -> Result<(), PlannerError> {
        let submit_host = self.planner.config.submit_host.clone();
        let mut job = original.clone();
        job.level = DELETED_JOBS_LEVEL;
        job.execution_site = submit_host.clone();
        job.staging_site = Some(submit_host);
        job.relative_submit_dir = self.planner.submit_dirs.relative_directory(&job.id);
        for file in &mut job.outputs {
            file.for_cleanup = false;
        }

        let mut transfers = Vec::new();
        if self.planner.config.stages_outputs() {
            for file in &job.outputs {
                if file.is_transient() {
                    continue;
                }
                transfers.extend(self.deleted_output_descriptors(&job, file)?);
            }
        }

        tracing::info!(job = %job.id, files = transfers.len(), "stage-out for deleted job");
        let mut batch = JobTransfers::new(job.id.clone());
        batch.deleted = true;
        if !transfers.is_empty() {
            batch.stage_out = Some(StageOut {
                transfers,
                local: true,
            });
        }
        self.plan.record(job, batch);
        Ok(())
    }

    /// One descriptor per output site, each with the replicas selected for
    /// that site.
    fn deleted_output_descriptors(
        &self,
        job: &Job,
        file: &LogicalFile,
    ) -> Result<Vec<TransferDescriptor>, PlannerError> {
        let candidates = self
            .planner
            .replicas
            .lookup(&file.lfn)
            .filter(|rl| !rl.is_empty())
            .ok_or_else(|| PlannerError::Resolution {
                lfn: file.lfn.clone(),
                job: job.id.clone(),
            })?;

        let mut transfers = Vec::new();
        for handle in &self.planner.config.output_sites {
            let output_site = self.site(job, handle, Operation::Put)?;
            let Some(put) = self.outputs.map(&job.id, &file.lfn, Some(handle), Operation::Put)? else {
                continue;
            };
            let prefer_local = self.policy.run_transfer_on_local_site(
                output_site,
                Some(&put.url),
                TransferKind::StageOut,
            );
            let ordered = self
                .planner
                .selector
                .select_and_order(&candidates, handle, prefer_local)?;
            if let Some(present) = ordered.entries.iter().find(|e| url::same_location(&e.pfn, &put.url)) {
                tracing::info!(job = %job.id, lfn = %file.lfn, url = %present.pfn, "file already present at output site");
                continue;
            }

            let mut ft = TransferDescriptor::for_file(file, &job.id);
            for entry in ordered.entries {
                ft.add_source(entry.site, entry.pfn);
            }
            ft.add_destination(put.site, put.url);
            if !ft.is_valid() {
                continue;
            }
            if file.register {
                ft.registration_url = self.registration_url(&job.id, &file.lfn, handle)?;
            }
            transfers.push(ft);
        }
        Ok(transfers)
    }
}

/// The candidate already is the destination, or sits in the job's staging
/// directory under the file's own name.
fn already_in_place(entry: &ReplicaEntry, put: &str, staging: &Site, lfn: &Lfn, staging_dir: &str) -> bool {
    if url::same_location(&entry.pfn, put) {
        return true;
    }
    let path = url::path_of(&entry.pfn);
    entry.site.matches(&staging.handle)
        && url::last_segment(path) == lfn.as_str()
        && url::normalize_path(url::parent_of(path)) == url::normalize_path(staging_dir)
}

/// Registration-only descriptor: the file stays where it is.
fn noop_descriptor(job: &Job, file: &LogicalFile, site: &SiteHandle, get: &str) -> TransferDescriptor {
    let mut ft = TransferDescriptor::for_file(file, &job.id);
    ft.transfer_mode = TransferMode::NotTransferred;
    ft.add_source(site.clone(), get);
    ft.add_destination(site.clone(), get);
    ft.registration_url = Some(get.to_string());
    ft
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::{FileSpec, FileType};
    use crate::replica::ReplicaStore;
    use crate::site::{Directory, DirectoryKind, FileServer, SiteStore};
    use crate::workflow::Workflow;

    struct NoPreference;
    impl TransferLocationPolicy for NoPreference {}

    fn site(name: &str) -> Site {
        Site::new(name)
            .with_directory(
                Directory::new(DirectoryKind::SharedScratch, format!("/scratch/{name}"))
                    .with_server(FileServer::new(format!("gsiftp://{name}.org"), "", Operation::All)),
            )
            .with_directory(
                Directory::new(DirectoryKind::SharedStorage, format!("/storage/{name}"))
                    .with_server(FileServer::new(format!("gsiftp://{name}.org"), "", Operation::All)),
            )
    }

    fn sites() -> SiteStore {
        SiteStore::from(vec![site("local"), site("cluster"), site("output")])
    }

    fn single(job: Job) -> Workflow {
        let mut wf = Workflow::new("w");
        wf.add_job(job);
        wf
    }

    #[test]
    fn stage_in_from_remote_replica() {
        let sites = sites();
        let mut replicas = ReplicaStore::new();
        replicas.insert("f.in", ReplicaEntry::new("gsiftp://remote.org/data/f.in", "remote"));
        let planner = TransferPlanner::new(PlannerConfig::default(), &sites, &replicas).expect("planner");
        let wf = single(Job::new("j1", "cluster").with_input(LogicalFile::new("f.in")));
        let plan = planner.plan(&wf, &[], &NoPreference).expect("plan");

        let batch = plan.batch(&JobId::from("j1")).expect("batch");
        assert_eq!(batch.stage_in_local.len(), 1);
        let ft = &batch.stage_in_local[0];
        assert_eq!(ft.sources[0].url, "gsiftp://remote.org/data/f.in");
        assert_eq!(
            ft.destination().map(|d| d.url.as_str()),
            Some("gsiftp://cluster.org/scratch/cluster/f.in")
        );
        assert!(ft.checksum_computed);
        let input = &plan.job(&JobId::from("j1")).expect("job").inputs[0];
        assert!(input.raw_input);
    }

    #[test]
    fn optional_checkpoint_without_replica_is_kept() {
        let sites = sites();
        let replicas = ReplicaStore::new();
        let planner = TransferPlanner::new(PlannerConfig::default(), &sites, &replicas).expect("planner");
        let checkpoint = LogicalFile::from_spec(
            "ckpt",
            FileSpec {
                optional: true,
                ..FileSpec::default()
            },
        )
        .with_type(FileType::Checkpoint);
        let wf = single(Job::new("j1", "cluster").with_input(checkpoint));
        let plan = planner.plan(&wf, &[], &NoPreference).expect("plan");
        assert!(plan.job(&JobId::from("j1")).expect("job").has_input(&Lfn::from("ckpt")));
        assert_eq!(plan.summary().stage_in, 0);
    }

    #[test]
    fn symlink_for_replica_on_staging_site() {
        let sites = sites();
        let mut replicas = ReplicaStore::new();
        replicas.insert("f.in", ReplicaEntry::new("file:///lustre/f.in", "cluster"));
        let config = PlannerConfig {
            use_symlinks: true,
            integrity: IntegrityDial::NoSymlink,
            ..PlannerConfig::default()
        };
        let planner = TransferPlanner::new(config, &sites, &replicas).expect("planner");
        let wf = single(Job::new("j1", "cluster").with_input(LogicalFile::new("f.in")));
        let plan = planner.plan(&wf, &[], &NoPreference).expect("plan");

        let batch = plan.batch(&JobId::from("j1")).expect("batch");
        assert_eq!(batch.stage_in_remote.len(), 1);
        let ft = &batch.stage_in_remote[0];
        assert_eq!(
            ft.destination().map(|d| d.url.as_str()),
            Some("symlink:///scratch/cluster/f.in")
        );
        assert!(!ft.integrity);
        assert!(!ft.checksum_computed);
    }

    #[test]
    fn preselected_source_skips_catalog() {
        let sites = sites();
        let replicas = ReplicaStore::new();
        let planner = TransferPlanner::new(PlannerConfig::default(), &sites, &replicas).expect("planner");
        let exe = LogicalFile::new("keg")
            .with_type(FileType::Executable)
            .with_source("local", "file:///usr/bin/keg");
        let wf = single(Job::new("j1", "cluster").with_input(exe));
        let plan = planner.plan(&wf, &[], &NoPreference).expect("plan");
        let batch = plan.batch(&JobId::from("j1")).expect("batch");
        assert_eq!(batch.stage_in_local.len(), 1);
        assert_eq!(batch.stage_in_local[0].sources[0].url, "file:///usr/bin/keg");
    }

    #[test]
    fn transient_registered_output_is_a_noop() {
        let sites = sites();
        let replicas = ReplicaStore::new();
        let config = PlannerConfig {
            output_sites: vec![SiteHandle::from("output")],
            ..PlannerConfig::default()
        };
        let planner = TransferPlanner::new(config, &sites, &replicas).expect("planner");
        let transient = LogicalFile::from_spec(
            "f.tmp",
            FileSpec {
                transfer: TransferMode::NotTransferred,
                ..FileSpec::default()
            },
        );
        let unregistered = LogicalFile::from_spec(
            "f.gone",
            FileSpec {
                transfer: TransferMode::NotTransferred,
                register: false,
                ..FileSpec::default()
            },
        );
        let wf = single(
            Job::new("j1", "cluster")
                .with_output(transient)
                .with_output(unregistered)
                .with_output(LogicalFile::new("f.out")),
        );
        let plan = planner.plan(&wf, &[], &NoPreference).expect("plan");
        let stage_out = plan
            .batch(&JobId::from("j1"))
            .and_then(|b| b.stage_out.clone())
            .expect("stage-out");
        assert_eq!(stage_out.transfers.len(), 2);
        let noop = &stage_out.transfers[0];
        assert!(noop.is_noop());
        assert_eq!(noop.sources, noop.destinations);
        let real = &stage_out.transfers[1];
        assert_eq!(
            real.destination().map(|d| d.url.as_str()),
            Some("gsiftp://output.org/storage/output/f.out")
        );
        assert_eq!(
            real.registration_url.as_deref(),
            Some("gsiftp://output.org/storage/output/f.out")
        );
        // every output is tracked even without a transfer
        assert_eq!(plan.planner_cache.len(), 3);
    }

    #[test]
    fn sub_workflow_with_local_descriptor() {
        let sites = sites();
        let mut replicas = ReplicaStore::new();
        replicas.insert("inner.yml", ReplicaEntry::new("file:///home/u/inner.yml", "local"));
        let planner = TransferPlanner::new(PlannerConfig::default(), &sites, &replicas).expect("planner");
        let job = Job::new("sub", "local").with_kind(JobKind::SubWorkflow {
            descriptor: Lfn::from("inner.yml"),
        });
        let plan = planner.plan(&single(job), &[], &NoPreference).expect("plan");
        let job = plan.job(&JobId::from("sub")).expect("job");
        assert!(job.inputs.is_empty());
        assert_eq!(job.arguments, vec!["/home/u/inner.yml".to_string()]);
    }

    #[test]
    fn sub_workflow_with_remote_descriptor_stages_it() {
        let sites = sites();
        let mut replicas = ReplicaStore::new();
        replicas.insert("inner.yml", ReplicaEntry::new("gsiftp://remote.org/inner.yml", "remote"));
        let planner = TransferPlanner::new(PlannerConfig::default(), &sites, &replicas).expect("planner");
        let job = Job::new("sub", "local").with_kind(JobKind::SubWorkflow {
            descriptor: Lfn::from("inner.yml"),
        });
        let plan = planner.plan(&single(job), &[], &NoPreference).expect("plan");
        let job = plan.job(&JobId::from("sub")).expect("job");
        assert!(job.has_input(&Lfn::from("inner.yml")));
        assert_eq!(job.arguments, vec!["inner.yml".to_string()]);
        assert_eq!(plan.summary().stage_in, 1);
    }

    #[test]
    fn external_graph_needs_local_file() {
        let sites = sites();
        let mut replicas = ReplicaStore::new();
        replicas.insert("run.dag", ReplicaEntry::new("gsiftp://remote.org/run.dag", "remote"));
        let planner = TransferPlanner::new(PlannerConfig::default(), &sites, &replicas).expect("planner");
        let job = Job::new("dag", "local").with_kind(JobKind::ExternalGraph {
            descriptor: Lfn::from("run.dag"),
        });
        let err = planner.plan(&single(job), &[], &NoPreference).expect_err("remote graph file");
        assert!(matches!(err, PlannerError::Configuration { .. }));
    }

    #[test]
    fn external_graph_sets_graph_file_and_directory() {
        let sites = sites();
        let mut replicas = ReplicaStore::new();
        replicas.insert("run.dag", ReplicaEntry::new("/home/u/run.dag", "local"));
        let planner = TransferPlanner::new(PlannerConfig::default(), &sites, &replicas).expect("planner");
        let job = Job::new("dag", "local")
            .with_kind(JobKind::ExternalGraph {
                descriptor: Lfn::from("run.dag"),
            })
            .with_input(LogicalFile::new("ignored"))
            .with_profile(DAGMAN_DIRECTORY_KEY, "/home/u/run");
        let plan = planner.plan(&single(job), &[], &NoPreference).expect("plan");
        let job = plan.job(&JobId::from("dag")).expect("job");
        assert!(job.inputs.is_empty());
        assert_eq!(job.graph_file.as_deref(), Some("/home/u/run.dag"));
        assert_eq!(job.directory.as_deref(), Some("/home/u/run"));
    }

    #[test]
    fn missing_staging_site_is_a_configuration_error() {
        let sites = sites();
        let replicas = ReplicaStore::new();
        let planner = TransferPlanner::new(PlannerConfig::default(), &sites, &replicas).expect("planner");
        let wf = single(Job::new("j1", "nowhere"));
        let err = planner.plan(&wf, &[], &NoPreference).expect_err("unknown site");
        assert!(err.to_string().contains("nowhere"));
    }

    #[test]
    fn parent_scratch_mapper_adds_unregistered_transfer() {
        let sites = sites();
        let replicas = ReplicaStore::new();
        let config = PlannerConfig {
            output_map: vec![crate::config::OutputMapEntry {
                lfn: Lfn::from("f.out"),
                site: SiteHandle::from("parent"),
                url: "gsiftp://parent.org/scratch/f.out".to_string(),
            }],
            ..PlannerConfig::default()
        };
        let planner = TransferPlanner::new(config, &sites, &replicas).expect("planner");
        let wf = single(Job::new("j1", "cluster").with_output(LogicalFile::new("f.out")));
        let plan = planner.plan(&wf, &[], &NoPreference).expect("plan");
        let stage_out = plan
            .batch(&JobId::from("j1"))
            .and_then(|b| b.stage_out.clone())
            .expect("stage-out");
        assert_eq!(stage_out.transfers.len(), 1);
        assert!(!stage_out.transfers[0].register);
        assert!(!stage_out.transfers[0].checksum_computed);
    }

    fn parent_scratch_config(url: &str, site: &str) -> PlannerConfig {
        PlannerConfig {
            output_map: vec![crate::config::OutputMapEntry {
                lfn: Lfn::from("f.out"),
                site: SiteHandle::from(site),
                url: url.to_string(),
            }],
            ..PlannerConfig::default()
        }
    }

    #[test]
    fn parent_scratch_transfer_computes_checksum_on_worker_nodes() {
        let sites = sites();
        let replicas = ReplicaStore::new();
        let config = PlannerConfig {
            data_configuration: crate::config::DataConfiguration::CondorIo,
            ..parent_scratch_config("gsiftp://parent.org/scratch/f.out", "parent")
        };
        let planner = TransferPlanner::new(config, &sites, &replicas).expect("planner");
        let wf = single(Job::new("j1", "cluster").with_output(LogicalFile::new("f.out")));
        let plan = planner.plan(&wf, &[], &NoPreference).expect("plan");
        let stage_out = plan
            .batch(&JobId::from("j1"))
            .and_then(|b| b.stage_out.clone())
            .expect("stage-out");
        assert_eq!(stage_out.transfers.len(), 1);
        let ft = &stage_out.transfers[0];
        assert!(ft.checksum_computed);
        assert!(!ft.register);
        assert_eq!(
            ft.destination().map(|d| d.url.as_str()),
            Some("gsiftp://parent.org/scratch/f.out")
        );
    }

    #[test]
    fn parent_scratch_equal_to_staging_scratch_is_a_noop() {
        let sites = sites();
        let replicas = ReplicaStore::new();
        let config = parent_scratch_config("gsiftp://cluster.org/scratch/cluster/f.out", "cluster");
        let planner = TransferPlanner::new(config, &sites, &replicas).expect("planner");
        let wf = single(Job::new("j1", "cluster").with_output(LogicalFile::new("f.out")));
        let plan = planner.plan(&wf, &[], &NoPreference).expect("plan");
        let stage_out = plan
            .batch(&JobId::from("j1"))
            .and_then(|b| b.stage_out.clone())
            .expect("stage-out");
        assert_eq!(stage_out.transfers.len(), 1);
        let ft = &stage_out.transfers[0];
        assert!(ft.is_noop());
        assert_eq!(ft.sources, ft.destinations);
        assert!(!ft.register);
        assert!(ft.registration_url.is_none());
    }
}
