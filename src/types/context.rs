//! Context values and canonical context sets.
//!
//! A stored [`ContextSet`] applies under an active set when it is a subset of it.
//! The empty set is the global context and always applies.

use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

use itertools::Itertools;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::PermissionsError;

static CONTEXT_KEY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_.\-]+$").expect("context key pattern is valid"));

/// A single `key=value` condition, e.g. `world=nether`.
#[derive(
    Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
pub struct ContextValue {
    key: String,
    value: String,
}

impl ContextValue {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        ContextValue {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn value(&self) -> &str {
        &self.value
    }
}

impl Display for ContextValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}={}", self.key, self.value)
    }
}

impl FromStr for ContextValue {
    type Err = PermissionsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let Some((key, value)) = s.trim().split_once('=') else {
            return Err(PermissionsError::InvalidFormat(format!(
                "Failed to parse context '{s}' (expected format: key=value)"
            )));
        };
        let (key, value) = (key.trim(), value.trim());
        if !CONTEXT_KEY.is_match(key) {
            return Err(PermissionsError::InvalidFormat(format!(
                "Invalid context key '{key}' in '{s}'"
            )));
        }
        if value.is_empty() {
            return Err(PermissionsError::InvalidFormat(format!(
                "Missing context value in '{s}'"
            )));
        }
        Ok(ContextValue::new(key, value))
    }
}

/// A canonical (sorted, deduplicated) set of context values.
///
/// Structurally equal sets compare, hash and order identically, so they can be used
/// directly as map keys.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(from = "Vec<ContextValue>", into = "Vec<ContextValue>")]
pub struct ContextSet(Vec<ContextValue>);

impl ContextSet {
    /// The global context: no conditions.
    pub fn global() -> Self {
        Self::default()
    }

    pub fn canonicalize<I>(raw: I) -> Self
    where
        I: IntoIterator<Item = ContextValue>,
    {
        ContextSet(raw.into_iter().sorted().dedup().collect())
    }

    /// Subset test: every value of `other` is also present in `self`.
    pub fn contains(&self, other: &ContextSet) -> bool {
        other.0.len() <= self.0.len() && other.0.iter().all(|v| self.0.binary_search(v).is_ok())
    }

    /// Whether a set stored on subject data applies while `active` holds.
    pub fn applies_under(&self, active: &ContextSet) -> bool {
        active.contains(self)
    }

    /// Number of conditions; more conditions means more specific.
    pub fn specificity(&self) -> usize {
        self.0.len()
    }

    pub fn is_global(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ContextValue> {
        self.0.iter()
    }

    /// Return a new set with `value` added.
    pub fn with(&self, value: ContextValue) -> Self {
        Self::canonicalize(self.0.iter().cloned().chain(std::iter::once(value)))
    }
}

impl From<Vec<ContextValue>> for ContextSet {
    fn from(value: Vec<ContextValue>) -> Self {
        Self::canonicalize(value)
    }
}

impl From<ContextSet> for Vec<ContextValue> {
    fn from(value: ContextSet) -> Self {
        value.0
    }
}

impl FromIterator<ContextValue> for ContextSet {
    fn from_iter<T: IntoIterator<Item = ContextValue>>(iter: T) -> Self {
        Self::canonicalize(iter)
    }
}

impl<'a> IntoIterator for &'a ContextSet {
    type Item = &'a ContextValue;
    type IntoIter = std::slice::Iter<'a, ContextValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl Display for ContextSet {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        if self.is_global() {
            return write!(f, "global");
        }
        write!(f, "{{{}}}", self.0.iter().join(", "))
    }
}

impl FromStr for ContextSet {
    type Err = PermissionsError;

    /// Parse a comma-separated list of `key=value` pairs. An empty string or
    /// `global` yields the global set.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim().trim_start_matches('{').trim_end_matches('}').trim();
        if trimmed.is_empty() || trimmed == "global" {
            return Ok(ContextSet::global());
        }
        trimmed
            .split(',')
            .map(ContextValue::from_str)
            .collect::<Result<Vec<_>, _>>()
            .map(ContextSet::from)
    }
}
