//! # Replica Selection
//!
//! Orders and filters the candidate replicas of a file for a target site.
//! Selection is a pure function of its inputs; an empty result is always
//! reported as a `PlannerError::Selection`, never returned silently.

use crate::primitives::LOCAL_VISIBLE_KEY;
use crate::replica::{ReplicaEntry, ReplicaLocation};
use crate::types::{PlannerError, SiteHandle};
use crate::url;

// =============================================================================
// REPLICASELECTOR TRAIT
// =============================================================================

/// Replica selection policy.
pub trait ReplicaSelector {
    /// Keep the usable candidates for a transfer to `target`, best first.
    fn select_and_order(
        &self,
        candidates: &ReplicaLocation,
        target: &SiteHandle,
        prefer_local: bool,
    ) -> Result<ReplicaLocation, PlannerError>;

    /// The single best candidate.
    fn select_one(
        &self,
        candidates: &ReplicaLocation,
        target: &SiteHandle,
        prefer_local: bool,
    ) -> Result<ReplicaEntry, PlannerError> {
        let ordered = self.select_and_order(candidates, target, prefer_local)?;
        ordered
            .entries
            .into_iter()
            .next()
            .ok_or_else(|| self.no_candidates(candidates, target, prefer_local))
    }

    /// The error raised when nothing survives selection.
    fn no_candidates(
        &self,
        candidates: &ReplicaLocation,
        target: &SiteHandle,
        prefer_local: bool,
    ) -> PlannerError;

    /// Short name for logs.
    fn description(&self) -> &'static str;
}

/// Build a selection error, with a hint when submit-host file URLs were
/// among the candidates.
#[must_use]
pub fn selection_error(
    candidates: &ReplicaLocation,
    target: &SiteHandle,
    prefer_local: bool,
    submit_host: &SiteHandle,
) -> PlannerError {
    let local_files: Vec<String> = candidates
        .entries
        .iter()
        .filter(|e| e.site.matches(submit_host) && url::is_file_url(&e.pfn))
        .map(ToString::to_string)
        .collect();
    let hint = (!local_files.is_empty()).then(|| {
        format!(
            "If any of the following file URLs are also accessible on the site ({target}) \
             consider setting the profile \"{LOCAL_VISIBLE_KEY}\" to true in the site catalog \
             for site: {target}\n[{}]",
            local_files.join(", ")
        )
    });
    PlannerError::Selection {
        lfn: candidates.lfn.clone(),
        site: target.clone(),
        prefer_local,
        candidates: candidates.describe(),
        hint,
    }
}

// =============================================================================
// DEFAULT SELECTOR
// =============================================================================

/// Prefers replicas on the target site and drops file URLs that the
/// transfer could not dereference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefaultSelector {
    submit_host: SiteHandle,
}

impl DefaultSelector {
    #[must_use]
    pub fn new(submit_host: SiteHandle) -> Self {
        Self { submit_host }
    }
}

impl ReplicaSelector for DefaultSelector {
    fn select_and_order(
        &self,
        candidates: &ReplicaLocation,
        target: &SiteHandle,
        prefer_local: bool,
    ) -> Result<ReplicaLocation, PlannerError> {
        let mut preferred = Vec::new();
        let mut others = Vec::new();
        for entry in &candidates.entries {
            let on_target = entry.site.matches(target);
            if url::is_file_url(&entry.pfn) {
                if on_target {
                    preferred.push(entry.clone());
                } else if prefer_local && entry.site.matches(&self.submit_host) {
                    others.push(entry.clone());
                }
            } else if on_target {
                preferred.push(entry.clone());
            } else {
                others.push(entry.clone());
            }
        }
        preferred.extend(others);
        if preferred.is_empty() {
            return Err(self.no_candidates(candidates, target, prefer_local));
        }
        Ok(ReplicaLocation::new(candidates.lfn.clone(), preferred))
    }

    fn no_candidates(
        &self,
        candidates: &ReplicaLocation,
        target: &SiteHandle,
        prefer_local: bool,
    ) -> PlannerError {
        selection_error(candidates, target, prefer_local, &self.submit_host)
    }

    fn description(&self) -> &'static str {
        "default"
    }
}

// =============================================================================
// LOCAL SELECTOR
// =============================================================================

/// Only keeps replicas on the submit host. Meant for transfers that run
/// there.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalSelector {
    submit_host: SiteHandle,
}

impl LocalSelector {
    #[must_use]
    pub fn new(submit_host: SiteHandle) -> Self {
        Self { submit_host }
    }
}

impl ReplicaSelector for LocalSelector {
    fn select_and_order(
        &self,
        candidates: &ReplicaLocation,
        target: &SiteHandle,
        prefer_local: bool,
    ) -> Result<ReplicaLocation, PlannerError> {
        let kept: Vec<ReplicaEntry> = candidates
            .entries
            .iter()
            .filter(|e| e.site.matches(&self.submit_host))
            .cloned()
            .collect();
        if kept.is_empty() {
            return Err(self.no_candidates(candidates, target, prefer_local));
        }
        Ok(ReplicaLocation::new(candidates.lfn.clone(), kept))
    }

    fn no_candidates(
        &self,
        candidates: &ReplicaLocation,
        target: &SiteHandle,
        prefer_local: bool,
    ) -> PlannerError {
        selection_error(candidates, target, prefer_local, &self.submit_host)
    }

    fn description(&self) -> &'static str {
        "local"
    }
}

// =============================================================================
// TESTS
// =============================================================================
