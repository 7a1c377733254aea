//! # Workflow Graph
//!
//! The job DAG the planner walks.
//!
//! This module defines the `JobGraph` trait the planner consumes and the
//! in-memory `Workflow` that implements it. All structures use `BTreeMap`
//! and `BTreeSet` so traversal order is deterministic.

use crate::job::Job;
use crate::types::{JobId, PlannerError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

// =============================================================================
// JOBGRAPH TRAIT
// =============================================================================

/// Read access to a job graph during planning.
pub trait JobGraph {
    /// Label of the workflow, used for naming generated artifacts.
    fn label(&self) -> &str;

    /// Index of the workflow among workflows sharing a label.
    fn index(&self) -> u32;

    /// Look up a job by id.
    fn job(&self, id: &JobId) -> Option<&Job>;

    /// Parents of a job in id order. Unknown jobs have no parents.
    fn parents(&self, id: &JobId) -> Vec<&JobId>;

    /// Every job in dependency order, each paired with its depth.
    ///
    /// Depth is the length of the longest path from any root, so a job is
    /// always deeper than each of its parents. Ties are broken by job id.
    fn topological_order(&self) -> Result<Vec<(JobId, usize)>, PlannerError>;
}

// =============================================================================
// WORKFLOW IMPLEMENTATION
// =============================================================================

/// In-memory workflow graph.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "SerializableWorkflow", into = "SerializableWorkflow")]
pub struct Workflow {
    label: String,
    index: u32,
    jobs: BTreeMap<JobId, Job>,
    /// parent -> children
    children: BTreeMap<JobId, BTreeSet<JobId>>,
    /// child -> parents
    parents: BTreeMap<JobId, BTreeSet<JobId>>,
}

impl Workflow {
    /// Create an empty workflow.
    #[must_use]
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            ..Self::default()
        }
    }

    /// Builder-style helper to set the workflow index.
    #[must_use]
    pub fn with_index(mut self, index: u32) -> Self {
        self.index = index;
        self
    }

    /// Add or replace a job. Existing edges are kept.
    pub fn add_job(&mut self, job: Job) {
        self.jobs.insert(job.id.clone(), job);
    }

    /// Add a parent -> child edge between two existing jobs.
    pub fn add_dependency(&mut self, parent: &JobId, child: &JobId) -> Result<(), PlannerError> {
        for id in [parent, child] {
            if !self.jobs.contains_key(id) {
                return Err(PlannerError::UnknownJob(id.clone()));
            }
        }
        if parent == child {
            return Err(PlannerError::CyclicWorkflow(parent.clone()));
        }
        self.children
            .entry(parent.clone())
            .or_default()
            .insert(child.clone());
        self.parents
            .entry(child.clone())
            .or_default()
            .insert(parent.clone());
        Ok(())
    }

    /// Mutable access to a job.
    pub fn job_mut(&mut self, id: &JobId) -> Option<&mut Job> {
        self.jobs.get_mut(id)
    }

    /// All jobs in id order.
    pub fn jobs(&self) -> impl Iterator<Item = &Job> {
        self.jobs.values()
    }

    /// Children of a job in id order.
    pub fn children(&self, id: &JobId) -> impl Iterator<Item = &JobId> {
        self.children.get(id).into_iter().flatten()
    }

    /// All edges as (parent, child) pairs in deterministic order.
    pub fn dependencies(&self) -> impl Iterator<Item = (&JobId, &JobId)> + '_ {
        self.children
            .iter()
            .flat_map(|(parent, children)| children.iter().map(move |child| (parent, child)))
    }

    /// Check if the graph contains an edge.
    #[must_use]
    pub fn contains_dependency(&self, parent: &JobId, child: &JobId) -> bool {
        self.children
            .get(parent)
            .is_some_and(|children| children.contains(child))
    }

    /// Number of jobs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    /// Check whether the workflow has no jobs.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Number of edges.
    #[must_use]
    pub fn dependency_count(&self) -> usize {
        self.children.values().map(BTreeSet::len).sum()
    }
}

impl JobGraph for Workflow {
    fn label(&self) -> &str {
        &self.label
    }

    fn index(&self) -> u32 {
        self.index
    }

    fn job(&self, id: &JobId) -> Option<&Job> {
        self.jobs.get(id)
    }

    fn parents(&self, id: &JobId) -> Vec<&JobId> {
        self.parents.get(id).into_iter().flatten().collect()
    }

    fn topological_order(&self) -> Result<Vec<(JobId, usize)>, PlannerError> {
        // Kahn's algorithm over an ordered ready set.
        let mut in_degree: BTreeMap<&JobId, usize> = self
            .jobs
            .keys()
            .map(|id| (id, self.parents.get(id).map_or(0, BTreeSet::len)))
            .collect();
        let mut depth: BTreeMap<&JobId, usize> = BTreeMap::new();
        let mut ready: BTreeSet<&JobId> = in_degree
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(id, _)| *id)
            .collect();
        let mut order = Vec::with_capacity(self.jobs.len());

        while let Some(current) = ready.pop_first() {
            let current_depth = depth.get(current).copied().unwrap_or(0);
            order.push((current.clone(), current_depth));

            for child in self.children(current) {
                let child_depth = depth.entry(child).or_insert(0);
                *child_depth = (*child_depth).max(current_depth.saturating_add(1));
                if let Some(degree) = in_degree.get_mut(child) {
                    *degree = degree.saturating_sub(1);
                    if *degree == 0 {
                        ready.insert(child);
                    }
                }
            }
        }

        if order.len() != self.jobs.len() {
            let stuck = in_degree
                .into_iter()
                .find(|(_, degree)| *degree > 0)
                .map(|(id, _)| id.clone());
            return Err(PlannerError::CyclicWorkflow(
                stuck.unwrap_or_else(|| JobId::from("")),
            ));
        }
        Ok(order)
    }
}

// =============================================================================
// SERIALIZATION SUPPORT
// =============================================================================

/// Serializable representation of a workflow: jobs plus an edge list.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SerializableWorkflow {
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub index: u32,
    #[serde(default)]
    pub jobs: Vec<Job>,
    #[serde(default)]
    pub dependencies: Vec<(JobId, JobId)>,
}

impl From<Workflow> for SerializableWorkflow {
    fn from(workflow: Workflow) -> Self {
        let dependencies = workflow
            .dependencies()
            .map(|(p, c)| (p.clone(), c.clone()))
            .collect();
        Self {
            label: workflow.label,
            index: workflow.index,
            jobs: workflow.jobs.into_values().collect(),
            dependencies,
        }
    }
}

impl TryFrom<SerializableWorkflow> for Workflow {
    type Error = PlannerError;

    fn try_from(sw: SerializableWorkflow) -> Result<Self, Self::Error> {
        let mut workflow = Workflow::new(sw.label).with_index(sw.index);
        for job in sw.jobs {
            workflow.add_job(job);
        }
        for (parent, child) in &sw.dependencies {
            workflow.add_dependency(parent, child)?;
        }
        Ok(workflow)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn diamond() -> Workflow {
        let mut wf = Workflow::new("diamond");
        for id in ["a", "b", "c", "d"] {
            wf.add_job(Job::new(id, "cluster"));
        }
        for (p, c) in [("a", "b"), ("a", "c"), ("b", "d"), ("c", "d")] {
            wf.add_dependency(&JobId::from(p), &JobId::from(c))
                .expect("edge");
        }
        wf
    }

    #[test]
    fn topological_order_respects_edges_and_depth() {
        let wf = diamond();
        let order = wf.topological_order().expect("acyclic");
        let ids: Vec<_> = order.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c", "d"]);
        let depths: Vec<_> = order.iter().map(|(_, d)| *d).collect();
        assert_eq!(depths, vec![0, 1, 1, 2]);
    }

    #[test]
    fn depth_is_longest_path() {
        let mut wf = diamond();
        wf.add_job(Job::new("e", "cluster"));
        wf.add_dependency(&JobId::from("a"), &JobId::from("e"))
            .expect("edge");
        wf.add_dependency(&JobId::from("d"), &JobId::from("e"))
            .expect("edge");
        let order = wf.topological_order().expect("acyclic");
        assert_eq!(order.last(), Some(&(JobId::from("e"), 3)));
    }

    #[test]
    fn cycle_is_rejected() {
        let mut wf = diamond();
        wf.add_dependency(&JobId::from("d"), &JobId::from("a"))
            .expect("edge");
        assert!(matches!(
            wf.topological_order(),
            Err(PlannerError::CyclicWorkflow(_))
        ));
    }

    #[test]
    fn unknown_job_edge_is_rejected() {
        let mut wf = diamond();
        let err = wf
            .add_dependency(&JobId::from("a"), &JobId::from("zz"))
            .expect_err("unknown");
        assert_eq!(err, PlannerError::UnknownJob(JobId::from("zz")));
    }

    #[test]
    fn parents_are_sorted() {
        let wf = diamond();
        let parents: Vec<_> = wf
            .parents(&JobId::from("d"))
            .into_iter()
            .map(JobId::as_str)
            .collect();
        assert_eq!(parents, vec!["b", "c"]);
        assert!(wf.parents(&JobId::from("a")).is_empty());
    }

    #[test]
    fn serializable_roundtrip() {
        let wf = diamond().with_index(3);
        let sw = SerializableWorkflow::from(wf.clone());
        assert_eq!(sw.dependencies.len(), 4);
        let back = Workflow::try_from(sw).expect("valid");
        assert_eq!(back, wf);
        assert_eq!(back.index(), 3);
    }
}
