//! In-process store backed by a lock-protected map of versioned slots.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tracing::trace;

use super::{CasOutcome, SubjectStore, Version, VersionedData};
use crate::error::PermissionsError;
use crate::types::{SubjectData, SubjectIdentity};

/// Reference [`SubjectStore`] keeping every snapshot in memory.
///
/// The lock guards only the slot map and is never held across an await point.
#[derive(Debug, Default)]
pub struct MemoryStore {
    slots: RwLock<HashMap<SubjectIdentity, VersionedData>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store, e.g. from fixtures. Each seeded subject starts at version 1.
    pub fn with_subjects<I>(subjects: I) -> Self
    where
        I: IntoIterator<Item = (SubjectIdentity, SubjectData)>,
    {
        let slots = subjects
            .into_iter()
            .map(|(subject, data)| {
                (
                    subject,
                    VersionedData::new(Arc::new(data), Version::INITIAL.next()),
                )
            })
            .collect();
        MemoryStore {
            slots: RwLock::new(slots),
        }
    }

    /// Identities with stored data.
    pub fn subjects(&self) -> Result<Vec<SubjectIdentity>, PermissionsError> {
        let slots = self.slots.read()?;
        let mut subjects: Vec<SubjectIdentity> = slots.keys().cloned().collect();
        subjects.sort();
        Ok(subjects)
    }

    pub fn len(&self) -> Result<usize, PermissionsError> {
        Ok(self.slots.read()?.len())
    }

    pub fn is_empty(&self) -> Result<bool, PermissionsError> {
        Ok(self.slots.read()?.is_empty())
    }
}

#[async_trait]
impl SubjectStore for MemoryStore {
    async fn load(&self, subject: &SubjectIdentity) -> Result<VersionedData, PermissionsError> {
        let slots = self.slots.read()?;
        Ok(slots
            .get(subject)
            .cloned()
            .unwrap_or_else(VersionedData::initial))
    }

    async fn compare_and_swap(
        &self,
        subject: &SubjectIdentity,
        expected: Version,
        data: Arc<SubjectData>,
    ) -> Result<CasOutcome, PermissionsError> {
        let mut slots = self.slots.write()?;
        let current = slots
            .get(subject)
            .map_or(Version::INITIAL, |slot| slot.version);
        if current != expected {
            trace!(event = "Store", phase = "Conflict", subject = %subject, %expected, %current);
            return Ok(CasOutcome::Conflict { current });
        }

        let next = current.next();
        slots.insert(subject.clone(), VersionedData::new(data, next));
        trace!(event = "Store", phase = "Committed", subject = %subject, version = %next);
        Ok(CasOutcome::Committed(next))
    }
}
