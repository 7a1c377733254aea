//! # Planning Requests
//!
//! Everything one planning run needs, as read from disk: the site and
//! replica catalogs, the workflow, jobs removed by upstream reduction and
//! the planner configuration.
//!
//! Requests are JSON (`serde_json`); configuration files are TOML.

use conveyor_core::{Job, PlannerConfig, PlannerError, ReplicaStore, SiteStore, Workflow};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Maximum size of a request or configuration file (100 MB).
///
/// Catalogs are read whole, so anything larger is rejected before reading.
pub const MAX_REQUEST_FILE_SIZE: u64 = 100 * 1024 * 1024;

// =============================================================================
// REQUEST
// =============================================================================

/// A complete planning request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanRequest {
    #[serde(default)]
    pub sites: SiteStore,
    #[serde(default)]
    pub replicas: ReplicaStore,
    pub workflow: Workflow,
    /// Jobs removed from the workflow whose outputs still go to the output
    /// sites.
    #[serde(default)]
    pub deleted: Vec<Job>,
    /// Inline configuration.
    #[serde(default)]
    pub config: Option<PlannerConfig>,
    /// TOML configuration file, relative to the request file.
    #[serde(default)]
    pub config_file: Option<PathBuf>,
}

impl PlanRequest {
    /// The configuration for this request.
    ///
    /// Precedence: `override_file`, then the inline `config`, then
    /// `config_file` resolved against `base_dir`, then defaults. An
    /// `override_file` must exist.
    pub fn resolve_config(
        &self,
        override_file: Option<&Path>,
        base_dir: &Path,
    ) -> Result<PlannerConfig, PlannerError> {
        if let Some(path) = override_file {
            if !path.is_file() {
                return Err(PlannerError::InvalidConfig(format!(
                    "configuration file '{}' does not exist",
                    path.display()
                )));
            }
            return load_config(path);
        }
        if let Some(config) = &self.config {
            return Ok(config.clone());
        }
        match &self.config_file {
            Some(path) => load_config(&base_dir.join(path)),
            None => Ok(PlannerConfig::default()),
        }
    }
}

// =============================================================================
// LOADING
// =============================================================================

fn read_bounded(path: &Path) -> Result<Vec<u8>, PlannerError> {
    let metadata = std::fs::metadata(path).map_err(|e| {
        PlannerError::IoError(format!("Cannot read metadata of '{}': {e}", path.display()))
    })?;
    if metadata.len() > MAX_REQUEST_FILE_SIZE {
        return Err(PlannerError::SerializationError(format!(
            "File size {} bytes exceeds maximum allowed {} bytes",
            metadata.len(),
            MAX_REQUEST_FILE_SIZE
        )));
    }
    std::fs::read(path)
        .map_err(|e| PlannerError::IoError(format!("Cannot read '{}': {e}", path.display())))
}

/// Load a planning request from a JSON file.
pub fn load_request(path: &Path) -> Result<PlanRequest, PlannerError> {
    let bytes = read_bounded(path)?;
    let request: PlanRequest = serde_json::from_slice(&bytes)
        .map_err(|e| PlannerError::SerializationError(format!("Invalid request: {e}")))?;
    tracing::debug!(
        path = %path.display(),
        sites = request.sites.len(),
        replicas = request.replicas.len(),
        jobs = request.workflow.len(),
        deleted = request.deleted.len(),
        "request loaded"
    );
    Ok(request)
}

/// Load a planner configuration from a TOML file.
///
/// A missing file yields the defaults.
pub fn load_config(path: &Path) -> Result<PlannerConfig, PlannerError> {
    if !path.exists() {
        tracing::debug!(path = %path.display(), "no configuration file, using defaults");
        return Ok(PlannerConfig::default());
    }
    let bytes = read_bounded(path)?;
    let text = String::from_utf8(bytes)
        .map_err(|e| PlannerError::InvalidConfig(format!("{}: {e}", path.display())))?;
    let config: PlannerConfig = toml::from_str(&text)
        .map_err(|e| PlannerError::InvalidConfig(format!("{}: {e}", path.display())))?;
    config.validate()?;
    Ok(config)
}

// =============================================================================
// TESTS
// =============================================================================
