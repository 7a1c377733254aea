//! # Transfer Descriptors
//!
//! One planned movement of a logical file: candidate sources, destinations,
//! and the flags the execution layer needs to carry it out and register
//! the result.

use crate::file::{FileType, LogicalFile, TransferMode};
use crate::types::{JobId, Lfn, SiteHandle};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A site-qualified URL.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    pub site: SiteHandle,
    pub url: String,
}

impl Endpoint {
    #[must_use]
    pub fn new(site: impl Into<SiteHandle>, url: impl Into<String>) -> Self {
        Self {
            site: site.into(),
            url: url.into(),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.url, self.site)
    }
}

/// A planned transfer of one file on behalf of one job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferDescriptor {
    pub lfn: Lfn,
    /// Job the transfer is planned for.
    pub job: JobId,
    /// Candidate sources in preference order.
    pub sources: Vec<Endpoint>,
    pub destinations: Vec<Endpoint>,
    /// URL to register in the output catalog once the transfer completes.
    pub registration_url: Option<String>,
    pub transfer_mode: TransferMode,
    pub register: bool,
    pub checksum_computed: bool,
    pub integrity: bool,
    pub for_cleanup: bool,
    pub file_type: FileType,
    pub size: Option<u64>,
    pub metadata: BTreeMap<String, String>,
}

impl TransferDescriptor {
    /// An empty descriptor for `lfn` with no file attributes.
    #[must_use]
    pub fn new(lfn: impl Into<Lfn>, job: impl Into<JobId>) -> Self {
        Self {
            lfn: lfn.into(),
            job: job.into(),
            sources: Vec::new(),
            destinations: Vec::new(),
            registration_url: None,
            transfer_mode: TransferMode::Mandatory,
            register: true,
            checksum_computed: false,
            integrity: true,
            for_cleanup: true,
            file_type: FileType::Data,
            size: None,
            metadata: BTreeMap::new(),
        }
    }

    /// An empty descriptor carrying the attributes of `file`.
    #[must_use]
    pub fn for_file(file: &LogicalFile, job: &JobId) -> Self {
        Self {
            transfer_mode: file.transfer_mode,
            register: file.register,
            checksum_computed: file.checksum_computed,
            integrity: file.integrity,
            for_cleanup: file.for_cleanup,
            file_type: file.file_type,
            size: file.size,
            metadata: file.metadata.clone(),
            ..Self::new(file.lfn.clone(), job.clone())
        }
    }

    /// Add a source. Exact duplicates are ignored.
    pub fn add_source(&mut self, site: impl Into<SiteHandle>, url: impl Into<String>) {
        let endpoint = Endpoint::new(site, url);
        if !self.sources.contains(&endpoint) {
            self.sources.push(endpoint);
        }
    }

    /// Add a destination. Exact duplicates are ignored.
    pub fn add_destination(&mut self, site: impl Into<SiteHandle>, url: impl Into<String>) {
        let endpoint = Endpoint::new(site, url);
        if !self.destinations.contains(&endpoint) {
            self.destinations.push(endpoint);
        }
    }

    /// The primary destination.
    #[must_use]
    pub fn destination(&self) -> Option<&Endpoint> {
        self.destinations.first()
    }

    /// A descriptor is usable once it has a source and a destination.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        !self.sources.is_empty() && !self.destinations.is_empty()
    }

    /// Source and destination coincide; only registration remains.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.transfer_mode == TransferMode::NotTransferred
    }
}

impl fmt::Display for TransferDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.lfn, self.job)?;
        for source in &self.sources {
            write!(f, "\n  src  {source}")?;
        }
        for destination in &self.destinations {
            write!(f, "\n  dest {destination}")?;
        }
        Ok(())
    }
}
