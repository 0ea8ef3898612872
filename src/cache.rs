//! Memoized resolution results with a reverse dependency index.
//!
//! Each entry records every subject the resolver visited while computing it.
//! Invalidating a subject drops every entry that depended on it, directly or
//! as an ancestor. The cache is a pure performance layer: a miss always falls
//! back to a full resolution.
//!
//! A resolution that started before an invalidation must not repopulate the
//! cache with a result computed from older snapshots. Callers read
//! [`ResolutionCache::generation`] before loading data and hand it back to
//! [`ResolutionCache::insert`]; any invalidation in between bumps the
//! generation and the insert is discarded.

use std::collections::{HashMap, HashSet};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::Serialize;
use tracing::debug;

use crate::types::{ContextSet, SubjectIdentity, Weight};

/// What was asked about a subject.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "kind", content = "key", rename_all = "lowercase")]
pub enum Query {
    Permission(String),
    Option(String),
    Parents,
}

impl Display for Query {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Query::Permission(key) => write!(f, "permission:{key}"),
            Query::Option(key) => write!(f, "option:{key}"),
            Query::Parents => write!(f, "parents"),
        }
    }
}

/// The answer to a [`Query`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolved {
    Permission(Weight),
    Option(Option<String>),
    Parents(Vec<SubjectIdentity>),
}

impl Resolved {
    pub fn into_permission(self) -> Option<Weight> {
        match self {
            Resolved::Permission(weight) => Some(weight),
            _ => None,
        }
    }

    pub fn into_option(self) -> Option<Option<String>> {
        match self {
            Resolved::Option(value) => Some(value),
            _ => None,
        }
    }

    pub fn into_parents(self) -> Option<Vec<SubjectIdentity>> {
        match self {
            Resolved::Parents(parents) => Some(parents),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub subject: SubjectIdentity,
    pub contexts: ContextSet,
    pub query: Query,
}

impl CacheKey {
    pub fn new(subject: SubjectIdentity, contexts: ContextSet, query: Query) -> Self {
        CacheKey {
            subject,
            contexts,
            query,
        }
    }
}

/// Token observed before a resolution; see the module docs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Generation(u64);

#[derive(Debug)]
struct Entry {
    value: Resolved,
    dependencies: Vec<SubjectIdentity>,
}

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<CacheKey, Entry>,
    dependents: HashMap<SubjectIdentity, HashSet<CacheKey>>,
}

impl CacheState {
    fn remove(&mut self, key: &CacheKey) -> bool {
        let Some(entry) = self.entries.remove(key) else {
            return false;
        };
        for dependency in &entry.dependencies {
            if let Some(keys) = self.dependents.get_mut(dependency) {
                keys.remove(key);
                if keys.is_empty() {
                    self.dependents.remove(dependency);
                }
            }
        }
        true
    }
}

#[derive(Debug)]
pub struct ResolutionCache {
    state: RwLock<CacheState>,
    generation: AtomicU64,
    max_entries: usize,
}

impl ResolutionCache {
    pub fn new(max_entries: usize) -> Self {
        ResolutionCache {
            state: RwLock::new(CacheState::default()),
            generation: AtomicU64::new(0),
            max_entries: max_entries.max(1),
        }
    }

    // Lock poisoning only means another thread panicked mid-update of a
    // performance layer; the maps stay structurally valid.
    fn read(&self) -> RwLockReadGuard<'_, CacheState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, CacheState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn generation(&self) -> Generation {
        Generation(self.generation.load(Ordering::Acquire))
    }

    pub fn get(&self, key: &CacheKey) -> Option<Resolved> {
        self.read().entries.get(key).map(|entry| entry.value.clone())
    }

    /// Store `value` unless an invalidation happened since `observed` was read.
    /// Returns whether the entry was stored.
    pub fn insert<I>(
        &self,
        key: CacheKey,
        value: Resolved,
        dependencies: I,
        observed: Generation,
    ) -> bool
    where
        I: IntoIterator<Item = SubjectIdentity>,
    {
        let mut state = self.write();
        if self.generation() != observed {
            debug!(event = "Cache", phase = "StaleInsert", subject = %key.subject, query = %key.query);
            return false;
        }

        if state.entries.len() >= self.max_entries && !state.entries.contains_key(&key) {
            debug!(event = "Cache", phase = "Overflow", entries = state.entries.len());
            state.entries.clear();
            state.dependents.clear();
        }

        state.remove(&key);
        let mut dependencies: Vec<SubjectIdentity> = dependencies.into_iter().collect();
        if !dependencies.contains(&key.subject) {
            dependencies.push(key.subject.clone());
        }
        for dependency in &dependencies {
            state
                .dependents
                .entry(dependency.clone())
                .or_default()
                .insert(key.clone());
        }
        state.entries.insert(
            key,
            Entry {
                value,
                dependencies,
            },
        );
        true
    }

    /// Drop every entry that depended on `subject`. Returns the number dropped.
    pub fn invalidate(&self, subject: &SubjectIdentity) -> usize {
        let mut state = self.write();
        self.generation.fetch_add(1, Ordering::AcqRel);

        let keys = state.dependents.remove(subject).unwrap_or_default();
        let dropped = keys.iter().filter(|key| state.remove(key)).count();
        debug!(event = "Cache", phase = "Invalidate", subject = %subject, dropped);
        dropped
    }

    pub fn clear(&self) {
        let mut state = self.write();
        self.generation.fetch_add(1, Ordering::AcqRel);
        state.entries.clear();
        state.dependents.clear();
    }

    pub fn len(&self) -> usize {
        self.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().entries.is_empty()
    }
}

impl Default for ResolutionCache {
    fn default() -> Self {
        ResolutionCache::new(crate::config::DEFAULT_CACHE_MAX_ENTRIES)
    }
}
