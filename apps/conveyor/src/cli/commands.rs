//! # CLI Command Implementations
//!
//! This module contains the actual implementations of CLI commands.

use crate::request::{PlanRequest, load_request};
use conveyor_core::formats::MAX_PERSISTENCE_PAYLOAD_SIZE;
use conveyor_core::{
    GraphRefiner, PlannerError, TransferPlan, TransferPlanner, plan_checksum, plan_crypto_hash,
    plan_from_bytes, plan_to_bytes,
};
use std::path::{Path, PathBuf};

// =============================================================================
// PATH VALIDATION
// =============================================================================

/// Canonicalize an input path and make sure it is a regular file.
fn validate_file_path(path: &Path) -> Result<PathBuf, PlannerError> {
    let canonical = path.canonicalize().map_err(|e| {
        PlannerError::IoError(format!("Invalid file path '{}': {}", path.display(), e))
    })?;

    if !canonical.is_file() {
        return Err(PlannerError::IoError(format!(
            "Path '{}' is not a regular file",
            path.display()
        )));
    }

    Ok(canonical)
}

/// Canonicalize the parent directory of an output path.
fn validate_output_path(path: &Path) -> Result<PathBuf, PlannerError> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };

    let canonical_parent = parent.canonicalize().map_err(|e| {
        PlannerError::IoError(format!(
            "Invalid output directory '{}': {}",
            parent.display(),
            e
        ))
    })?;

    if !canonical_parent.is_dir() {
        return Err(PlannerError::IoError(format!(
            "Output directory '{}' is not a valid directory",
            parent.display()
        )));
    }

    let filename = path
        .file_name()
        .ok_or_else(|| PlannerError::IoError("Output path has no filename".to_string()))?;

    Ok(canonical_parent.join(filename))
}

/// Read a persisted plan, rejecting oversized files before reading them.
fn read_plan(path: &Path) -> Result<TransferPlan, PlannerError> {
    let path = validate_file_path(path)?;
    let metadata = std::fs::metadata(&path)
        .map_err(|e| PlannerError::IoError(format!("Cannot read file metadata: {}", e)))?;
    if metadata.len() > MAX_PERSISTENCE_PAYLOAD_SIZE as u64 {
        return Err(PlannerError::SerializationError(format!(
            "File size {} bytes exceeds maximum allowed {} bytes",
            metadata.len(),
            MAX_PERSISTENCE_PAYLOAD_SIZE
        )));
    }
    let bytes = std::fs::read(&path)
        .map_err(|e| PlannerError::IoError(format!("Read file: {}", e)))?;
    plan_from_bytes(&bytes)
}

// =============================================================================
// PLAN COMMAND
// =============================================================================

/// Plan a request, refine its workflow and write the artifacts.
///
/// The workflow cache always lands in the configured submit directory; the
/// binary plan and the refined workflow are written only when asked for.
pub fn cmd_plan(
    request_path: &Path,
    config_path: Option<&Path>,
    output: Option<&Path>,
    refined: Option<&Path>,
    json_mode: bool,
) -> Result<TransferPlan, PlannerError> {
    let request_path = validate_file_path(request_path)?;
    let request = load_request(&request_path)?;
    let base_dir = request_path.parent().unwrap_or(Path::new("."));
    let config = request.resolve_config(config_path, base_dir)?;

    let PlanRequest {
        sites,
        replicas,
        mut workflow,
        deleted,
        ..
    } = request;

    let planner = TransferPlanner::new(config.clone(), &sites, &replicas)?;
    let plan = planner.plan(&workflow, &deleted, &config.refiner)?;

    let inserted = {
        let mut refiner =
            GraphRefiner::new(&mut workflow, config.submit_host.clone(), config.refiner.clone());
        plan.apply(&mut refiner)?;
        refiner.inserted()
    };

    std::fs::create_dir_all(&config.submit_dir)?;
    let cache_path = plan.workflow_cache.persist(&config.submit_dir)?;

    if let Some(output) = output {
        let path = validate_output_path(output)?;
        let bytes = plan_to_bytes(&plan)?;
        std::fs::write(&path, &bytes)
            .map_err(|e| PlannerError::IoError(format!("Write file: {}", e)))?;
        tracing::info!(path = %path.display(), bytes = bytes.len(), "plan written");
    }
    if let Some(refined) = refined {
        let path = validate_output_path(refined)?;
        let json = serde_json::to_vec_pretty(&workflow)
            .map_err(|e| PlannerError::SerializationError(e.to_string()))?;
        std::fs::write(&path, json)
            .map_err(|e| PlannerError::IoError(format!("Write file: {}", e)))?;
        tracing::info!(path = %path.display(), jobs = workflow.len(), "refined workflow written");
    }

    let summary = plan.summary();
    if json_mode {
        let output = serde_json::json!({
            "workflow": plan.label,
            "summary": summary,
            "transfer_jobs": inserted,
            "workflow_cache": cache_path.to_string_lossy(),
            "checksum": plan_checksum(&plan)?,
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&output).unwrap_or_default()
        );
        return Ok(plan);
    }

    println!("Conveyor Plan");
    println!("=============");
    println!("Workflow:       {}-{}", plan.label, plan.index);
    println!();
    println!("Jobs:           {}", summary.jobs);
    println!("Deleted Jobs:   {}", summary.deleted_jobs);
    println!("Stage-in:       {}", summary.stage_in);
    println!("Inter-site:     {}", summary.inter_site);
    println!("Stage-out:      {}", summary.stage_out);
    println!("Transfer Jobs:  {}", inserted);
    println!("Workflow Cache: {}", cache_path.display());

    Ok(plan)
}

// =============================================================================
// INSPECT COMMAND
// =============================================================================

/// Show the summary of a persisted plan.
pub fn cmd_inspect(path: &Path, json_mode: bool) -> Result<(), PlannerError> {
    let plan = read_plan(path)?;
    let summary = plan.summary();
    let checksum = plan_checksum(&plan)?;

    if json_mode {
        let batches: Vec<serde_json::Value> = plan
            .batches
            .iter()
            .map(|batch| {
                serde_json::json!({
                    "job": batch.job,
                    "deleted": batch.deleted,
                    "transfers": batch.descriptors().count(),
                })
            })
            .collect();
        let output = serde_json::json!({
            "workflow": plan.label,
            "index": plan.index,
            "summary": summary,
            "checksum": checksum,
            "batches": batches,
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&output).unwrap_or_default()
        );
        return Ok(());
    }

    println!("Conveyor Plan: {}-{}", plan.label, plan.index);
    println!("Checksum: {}", checksum);
    println!();
    for batch in &plan.batches {
        if batch.is_empty() {
            continue;
        }
        let marker = if batch.deleted { " (deleted)" } else { "" };
        println!("{}{}", batch.job, marker);
        for (kind, ft) in batch.descriptors() {
            let destination = ft.destination().map(|d| d.url.as_str()).unwrap_or("-");
            println!("  {:<10} {} -> {}", kind.to_string(), ft.lfn, destination);
        }
    }
    println!();
    println!(
        "{} jobs, {} stage-in, {} inter-site, {} stage-out",
        summary.jobs, summary.stage_in, summary.inter_site, summary.stage_out
    );

    Ok(())
}

// =============================================================================
// HASH COMMAND
// =============================================================================

/// Compute the BLAKE3 digest of a persisted plan.
pub fn cmd_hash(path: &Path, json_mode: bool) -> Result<(), PlannerError> {
    let plan = read_plan(path)?;
    let hash = plan_crypto_hash(&plan)?;

    if json_mode {
        let output = serde_json::json!({
            "workflow": plan.label,
            "algorithm": "blake3",
            "hash": hash,
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&output).unwrap_or_default()
        );
    } else {
        println!("BLAKE3: {}", hash);
    }

    Ok(())
}
