use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::cache::{CacheKey, Query, Resolved, ResolutionCache};
use crate::commands::{CommandOutcome, Issuer, SubjectCommand};
use crate::config::EngineConfig;
use crate::error::PermissionsError;
use crate::metrics::{self, ResolutionPhases, ResolutionStats};
use crate::reference::{SubjectRef, UpdatePolicy};
use crate::resolver::{Resolver, SubjectGraph};
use crate::storage::SubjectStore;
use crate::timers::{PhaseTimer, as_millis_f64};
use crate::types::{ContextSet, SubjectData, SubjectIdentity, Weight};

struct EngineInner {
    store: Arc<dyn SubjectStore>,
    cache: Option<Arc<ResolutionCache>>,
    config: EngineConfig,
}

/// The query facade. Cloneable and thread-safe; clones share the store and cache.
#[derive(Clone)]
pub struct PermissionEngine {
    inner: Arc<EngineInner>,
}

impl Debug for PermissionEngine {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("PermissionEngine")
            .field("config", &self.inner.config)
            .field("cached_entries", &self.cache_len())
            .finish()
    }
}

impl PermissionEngine {
    pub fn new(store: Arc<dyn SubjectStore>) -> Self {
        Self::with_config(store, EngineConfig::default())
    }

    pub fn with_config(store: Arc<dyn SubjectStore>, config: EngineConfig) -> Self {
        let cache = config
            .cache_enabled
            .then(|| Arc::new(ResolutionCache::new(config.cache_max_entries)));
        PermissionEngine {
            inner: Arc::new(EngineInner {
                store,
                cache,
                config,
            }),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Handle for reading and updating one subject through this engine.
    pub fn subject(&self, identity: SubjectIdentity) -> SubjectRef {
        let reference = SubjectRef::new(identity, Arc::clone(&self.inner.store)).with_policy(
            UpdatePolicy {
                max_retries: self.inner.config.max_update_retries,
            },
        );
        match &self.inner.cache {
            Some(cache) => reference.with_cache(Arc::clone(cache)),
            None => reference,
        }
    }

    /// Raw stored data of `subject`, without inheritance.
    pub async fn data(&self, subject: &SubjectIdentity) -> Result<Arc<SubjectData>, PermissionsError> {
        self.subject(subject.clone()).get().await
    }

    /// See [`SubjectRef::update`].
    pub async fn update<F>(
        &self,
        subject: &SubjectIdentity,
        transform: F,
    ) -> Result<Arc<SubjectData>, PermissionsError>
    where
        F: Fn(&SubjectData) -> SubjectData + Send + Sync,
    {
        self.subject(subject.clone()).update(transform).await
    }

    /// See [`SubjectRef::try_update`].
    pub async fn try_update<F, E>(
        &self,
        subject: &SubjectIdentity,
        transform: F,
    ) -> Result<Arc<SubjectData>, PermissionsError>
    where
        F: Fn(&SubjectData) -> Result<SubjectData, E> + Send + Sync,
        E: std::fmt::Display,
    {
        self.subject(subject.clone()).try_update(transform).await
    }

    /// Effective weight of `key` for `subject` under `active`.
    pub async fn resolve(
        &self,
        subject: &SubjectIdentity,
        key: &str,
        active: &ContextSet,
    ) -> Result<Weight, PermissionsError> {
        let resolved = self
            .query(subject, active, Query::Permission(key.to_string()))
            .await?;
        Ok(resolved.into_permission().unwrap_or(0))
    }

    /// Host convention: granted only when the effective weight is positive.
    pub async fn has_permission(
        &self,
        subject: &SubjectIdentity,
        key: &str,
        active: &ContextSet,
    ) -> Result<bool, PermissionsError> {
        Ok(self.resolve(subject, key, active).await? > 0)
    }

    pub async fn resolve_option(
        &self,
        subject: &SubjectIdentity,
        key: &str,
        active: &ContextSet,
    ) -> Result<Option<String>, PermissionsError> {
        let resolved = self
            .query(subject, active, Query::Option(key.to_string()))
            .await?;
        Ok(resolved.into_option().flatten())
    }

    /// Every ancestor of `subject` under `active`, in resolution priority order.
    pub async fn resolve_parents(
        &self,
        subject: &SubjectIdentity,
        active: &ContextSet,
    ) -> Result<Vec<SubjectIdentity>, PermissionsError> {
        let resolved = self.query(subject, active, Query::Parents).await?;
        Ok(resolved.into_parents().unwrap_or_default())
    }

    /// Run `command` against `target` on behalf of `issuer`.
    ///
    /// With an issuer, the command's permission is checked first under the
    /// issuer's active contexts: `<permission>.<type>.<identifier>` of the target
    /// when set, else `<permission>` itself. A missing issuer means the host
    /// itself is acting and skips the check.
    pub async fn execute(
        &self,
        issuer: Option<&Issuer>,
        target: &SubjectIdentity,
        command: SubjectCommand,
    ) -> Result<CommandOutcome, PermissionsError> {
        if let Some(issuer) = issuer {
            self.check_issuer(issuer, target, command.required_permission())
                .await?;
        }

        let data = self.update(target, |data| command.apply(data)).await?;
        info!(event = "Command", phase = "Committed", subject = %target, command = %command);
        Ok(CommandOutcome {
            subject: target.clone(),
            command,
            data,
        })
    }

    async fn check_issuer(
        &self,
        issuer: &Issuer,
        target: &SubjectIdentity,
        permission: &str,
    ) -> Result<(), PermissionsError> {
        let scoped = format!("{permission}.{}.{}", target.kind(), target.identifier());
        let mut weight = self.resolve(&issuer.identity, &scoped, &issuer.active).await?;
        if weight == 0 {
            weight = self
                .resolve(&issuer.identity, permission, &issuer.active)
                .await?;
        }

        if weight > 0 {
            return Ok(());
        }
        warn!(event = "Command", phase = "Denied", issuer = %issuer.identity, subject = %target, permission);
        Err(PermissionsError::PermissionDenied {
            subject: issuer.identity.to_string(),
            permission: permission.to_string(),
        })
    }

    /// Drop every cached result, e.g. after the backing store was changed out of band.
    pub fn invalidate_all(&self) {
        if let Some(cache) = &self.inner.cache {
            cache.clear();
            debug!(event = "Cache", phase = "Clear");
        }
    }

    /// Number of cached results; always `0` with caching disabled.
    pub fn cache_len(&self) -> usize {
        self.inner.cache.as_ref().map_or(0, |cache| cache.len())
    }

    async fn query(
        &self,
        subject: &SubjectIdentity,
        active: &ContextSet,
        query: Query,
    ) -> Result<Resolved, PermissionsError> {
        let started = Instant::now();
        let subject_id = subject.to_string();
        let query_id = query.to_string();
        let key = CacheKey::new(subject.clone(), active.clone(), query);

        if let Some(hit) = self.inner.cache.as_ref().and_then(|cache| cache.get(&key)) {
            debug!(event = "Resolve", phase = "Cache", subject = %subject, query = %key.query, hit = true);
            metrics::record_resolution(
                ResolutionStats {
                    duration: started.elapsed(),
                    cache_hit: true,
                    subject_id,
                    query: query_id,
                },
                None,
            );
            return Ok(hit);
        }

        // read before loading anything, so an invalidation racing this
        // resolution keeps its result out of the cache
        let observed = self.inner.cache.as_ref().map(|cache| cache.generation());

        let mut load_graph = Duration::ZERO;
        let mut walk = Duration::ZERO;
        let graph = {
            let _timer = PhaseTimer::new(&mut load_graph);
            SubjectGraph::load(self.inner.store.as_ref(), subject, active).await?
        };
        let resolved = {
            let _timer = PhaseTimer::new(&mut walk);
            Resolver::new(&graph, active).answer(&key.query)
        };

        debug!(
            event = "Resolve",
            phase = "Walk",
            subject = %subject,
            contexts = %active,
            query = %key.query,
            result = ?resolved
        );

        if let (Some(cache), Some(observed)) = (&self.inner.cache, observed) {
            if graph.is_degraded() {
                debug!(event = "Resolve", phase = "Cache", subject = %subject, "not caching degraded result");
            } else {
                cache.insert(
                    key,
                    resolved.clone(),
                    graph.dependencies().iter().cloned(),
                    observed,
                );
            }
        }

        let duration = started.elapsed();
        metrics::record_resolution(
            ResolutionStats {
                duration,
                cache_hit: false,
                subject_id,
                query: query_id,
            },
            Some(ResolutionPhases {
                load_graph_ms: as_millis_f64(load_graph),
                walk_ms: as_millis_f64(walk),
                subjects_loaded: graph.len(),
                total_ms: as_millis_f64(duration),
            }),
        );
        Ok(resolved)
    }
}

#[cfg(test)]
mod tests;
