//! # Planning Primitives
//!
//! Hardcoded constants for the Conveyor planner.
//!
//! These values are compiled into the binary and are immutable at runtime.
//! Anything a user may want to change lives in `PlannerConfig` instead.

/// URL scheme prefix for raw file-path URLs.
///
/// File URLs are only dereferenceable on the host that owns the filesystem,
/// which is why they drive most locality decisions.
pub const FILE_URL_SCHEME: &str = "file:";

/// URL scheme prefix for symlink "transfers".
pub const SYMLINK_URL_SCHEME: &str = "symlink:";

/// Level assigned to jobs removed by upstream reduction.
///
/// It only has to sort after every real level; workflows rarely exceed a
/// thousand levels.
pub const DELETED_JOBS_LEVEL: usize = 1000;

/// Default handle of the submission host.
pub const DEFAULT_SUBMIT_HOST: &str = "local";

/// Suffix of the workflow cache file written to the submit directory.
pub const CACHE_FILE_SUFFIX: &str = ".cache";

// =============================================================================
// SRM MOUNT POINT PROPERTIES
// =============================================================================

/// Property prefix for SRM service/mount-point pairs.
pub const SRM_PROPERTIES_PREFIX: &str = "conveyor.transfer.srm";

/// Property suffix holding the SRM service URL prefix of a site.
pub const SRM_SERVICE_URL_SUFFIX: &str = "service.url";

/// Property suffix holding the local mount point of a site's SRM storage.
pub const SRM_MOUNT_POINT_SUFFIX: &str = "mountpoint";

// =============================================================================
// JOB PROFILE KEYS
// =============================================================================

/// Profile key overriding the working directory of a job on its staging site.
pub const REMOTE_INITIALDIR_KEY: &str = "remote_initialdir";

/// Profile key overriding the data configuration for a single job.
pub const DATA_CONFIGURATION_KEY: &str = "data.configuration";

/// Profile key holding the working directory of an external-graph job.
pub const DAGMAN_DIRECTORY_KEY: &str = "dagman.dir";

/// Name of the site-catalog attribute that marks a site as visible to the
/// submit host. Used in remediation hints.
pub const LOCAL_VISIBLE_KEY: &str = "auxillary.local";

// =============================================================================
// PLAN PERSISTENCE
// =============================================================================

/// Magic bytes for the Conveyor binary plan format.
///
/// - File Header = Magic Bytes ("CNVY") + Version (u8) before payload.
pub const MAGIC_BYTES: &[u8; 4] = b"CNVY";

/// Current plan serialization format version.
///
/// Increment this when making breaking changes to the serialization format.
pub const FORMAT_VERSION: u8 = 1;

// =============================================================================
// MAPPER LIMITS
// =============================================================================

/// Number of buckets per level for hashed directory layouts.
pub const HASHED_FANOUT: u64 = 256;
