//! Per-subject handle implementing the optimistic update protocol.
//!
//! [`SubjectRef::update`] loops: load the current snapshot, apply the transform,
//! compare-and-swap the result against the version that was loaded. A conflict
//! means another writer committed first, so the loop reloads and tries again, up
//! to the configured number of retries. The transform may therefore run several
//! times for one logical update and must be free of side effects.
//!
//! The returned future completes once, after the commit and the cache
//! invalidation. Dropping it abandons the update without touching the store
//! beyond attempts that already committed or failed atomically.

use std::convert::Infallible;
use std::fmt::Display;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, trace, warn};

use crate::cache::ResolutionCache;
use crate::error::PermissionsError;
use crate::metrics;
use crate::storage::{CasOutcome, SubjectStore};
use crate::types::{SubjectData, SubjectIdentity};

/// Bound on compare-and-swap retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdatePolicy {
    /// Retries after the first attempt.
    pub max_retries: usize,
}

impl Default for UpdatePolicy {
    fn default() -> Self {
        UpdatePolicy {
            max_retries: crate::config::DEFAULT_MAX_UPDATE_RETRIES,
        }
    }
}

impl UpdatePolicy {
    pub fn max_attempts(&self) -> usize {
        self.max_retries.saturating_add(1)
    }
}

/// Cloneable handle to one subject's data in a [`SubjectStore`].
#[derive(Clone)]
pub struct SubjectRef {
    identity: SubjectIdentity,
    store: Arc<dyn SubjectStore>,
    cache: Option<Arc<ResolutionCache>>,
    policy: UpdatePolicy,
}

impl std::fmt::Debug for SubjectRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubjectRef")
            .field("identity", &self.identity)
            .field("cached", &self.cache.is_some())
            .field("policy", &self.policy)
            .finish()
    }
}

impl SubjectRef {
    pub fn new(identity: SubjectIdentity, store: Arc<dyn SubjectStore>) -> Self {
        SubjectRef {
            identity,
            store,
            cache: None,
            policy: UpdatePolicy::default(),
        }
    }

    /// Invalidate `cache` for this subject after every committed write.
    pub fn with_cache(mut self, cache: Arc<ResolutionCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_policy(mut self, policy: UpdatePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn identity(&self) -> &SubjectIdentity {
        &self.identity
    }

    /// Current snapshot.
    pub async fn get(&self) -> Result<Arc<SubjectData>, PermissionsError> {
        Ok(self.store.load(&self.identity).await?.data)
    }

    /// Atomically replace this subject's data with `transform(current)`.
    pub async fn update<F>(&self, transform: F) -> Result<Arc<SubjectData>, PermissionsError>
    where
        F: Fn(&SubjectData) -> SubjectData + Send + Sync,
    {
        self.try_update(|data| Ok::<_, Infallible>(transform(data)))
            .await
    }

    /// Like [`SubjectRef::update`] for transforms that can reject the data they see.
    /// A rejection fails the update with [`PermissionsError::InvalidTransform`]
    /// and commits nothing.
    pub async fn try_update<F, E>(&self, transform: F) -> Result<Arc<SubjectData>, PermissionsError>
    where
        F: Fn(&SubjectData) -> Result<SubjectData, E> + Send + Sync,
        E: Display,
    {
        let started = Instant::now();
        let mut attempts = 0;
        let result = self.run_update(&transform, &mut attempts).await;
        metrics::record_update(
            self.identity.to_string(),
            attempts,
            result.is_ok(),
            started.elapsed(),
        );
        result
    }

    async fn run_update<F, E>(
        &self,
        transform: &F,
        attempts: &mut usize,
    ) -> Result<Arc<SubjectData>, PermissionsError>
    where
        F: Fn(&SubjectData) -> Result<SubjectData, E> + Send + Sync,
        E: Display,
    {
        let max_attempts = self.policy.max_attempts();
        while *attempts < max_attempts {
            *attempts += 1;
            trace!(event = "Update", phase = "Attempt", subject = %self.identity, attempt = *attempts);
            let current = self.store.load(&self.identity).await?;
            let next = transform(&current.data)
                .map_err(|e| PermissionsError::InvalidTransform(e.to_string()))?;

            if next == *current.data {
                debug!(event = "Update", phase = "Unchanged", subject = %self.identity, version = %current.version);
                return Ok(current.data);
            }

            let next = Arc::new(next);
            match self
                .store
                .compare_and_swap(&self.identity, current.version, Arc::clone(&next))
                .await?
            {
                CasOutcome::Committed(version) => {
                    debug!(
                        event = "Update",
                        phase = "Committed",
                        subject = %self.identity,
                        %version,
                        attempts = *attempts
                    );
                    if let Some(cache) = &self.cache {
                        cache.invalidate(&self.identity);
                    }
                    return Ok(next);
                }
                CasOutcome::Conflict { current: winner } => {
                    debug!(
                        event = "Update",
                        phase = "Conflict",
                        subject = %self.identity,
                        expected = %current.version,
                        current = %winner,
                        attempt = *attempts
                    );
                    tokio::task::yield_now().await;
                }
            }
        }

        warn!(event = "Update", phase = "Exhausted", subject = %self.identity, attempts = *attempts);
        Err(PermissionsError::ConcurrentModificationExceeded {
            subject: self.identity.to_string(),
            attempts: *attempts,
        })
    }
}
