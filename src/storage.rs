//! Storage adapter seam.
//!
//! The engine never performs I/O itself. It reads immutable snapshots through
//! [`SubjectStore::load`] and commits new ones through
//! [`SubjectStore::compare_and_swap`], which must succeed only when the stored
//! version still equals the version the caller read.

use std::fmt::{Display, Formatter, Result as FmtResult};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::PermissionsError;
use crate::types::{SubjectData, SubjectIdentity};

mod memory;

pub use memory::MemoryStore;

/// Opaque version token. Every committed write produces a new one.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version(u64);

impl Version {
    /// Version reported for a subject that has never been written.
    pub const INITIAL: Version = Version(0);

    pub fn from_raw(raw: u64) -> Self {
        Version(raw)
    }

    pub fn as_raw(self) -> u64 {
        self.0
    }

    pub fn next(self) -> Self {
        Version(self.0.wrapping_add(1))
    }
}

impl Display for Version {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "v{}", self.0)
    }
}

/// A snapshot together with the version it was read at.
#[derive(Debug, Clone)]
pub struct VersionedData {
    pub data: Arc<SubjectData>,
    pub version: Version,
}

impl VersionedData {
    pub fn new(data: Arc<SubjectData>, version: Version) -> Self {
        VersionedData { data, version }
    }

    /// The empty snapshot served for subjects with no stored data.
    pub fn initial() -> Self {
        VersionedData {
            data: Arc::new(SubjectData::empty()),
            version: Version::INITIAL,
        }
    }
}

/// Result of a conditional write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CasOutcome {
    /// The write was applied; the subject is now at this version.
    Committed(Version),
    /// Another writer committed first; the subject is at `current`.
    Conflict { current: Version },
}

/// Key-value store of immutable subject snapshots.
///
/// Implementations must be thread-safe and must apply `compare_and_swap` atomically:
/// either the whole snapshot replaces the stored one or nothing changes.
#[async_trait]
pub trait SubjectStore: Send + Sync {
    /// Fetch the current snapshot. Subjects without stored data yield
    /// [`VersionedData::initial`].
    async fn load(&self, subject: &SubjectIdentity) -> Result<VersionedData, PermissionsError>;

    /// Replace the snapshot if the stored version still equals `expected`.
    async fn compare_and_swap(
        &self,
        subject: &SubjectIdentity,
        expected: Version,
        data: Arc<SubjectData>,
    ) -> Result<CasOutcome, PermissionsError>;
}
