//! Permission values at the command boundary and their canonical integer weights.
//!
//! Weights are signed: `0` is unset, positive allows, negative denies, and the
//! magnitude is the priority.

use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};
use strum_macros::{Display as StrumDisplay, EnumString};
use utoipa::ToSchema;

use crate::error::PermissionsError;

/// Canonical stored representation of a permission value.
pub type Weight = i32;

/// The outcome a weight encodes.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, ToSchema, PartialEq, Eq, Hash, StrumDisplay, EnumString,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Effect {
    Allow,
    Deny,
    Unset,
}

impl Effect {
    pub fn of(weight: Weight) -> Self {
        match weight {
            0 => Effect::Unset,
            w if w > 0 => Effect::Allow,
            _ => Effect::Deny,
        }
    }

    /// Host convention: only a positive weight grants.
    pub fn is_allowed(self) -> bool {
        self == Effect::Allow
    }
}

/// A permission value as typed by a command argument.
///
/// Serializes as a bare integer, boolean or `null`. Deserializing also accepts
/// any string [`FromStr`] accepts, such as `"true"`, `"5"` or `"unset"`.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Hash)]
#[serde(untagged)]
pub enum PermissionValue {
    Integer(Weight),
    Bool(bool),
    Unset,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawPermissionValue {
    Integer(Weight),
    Bool(bool),
    Text(String),
    Unset,
}

impl<'de> Deserialize<'de> for PermissionValue {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        match RawPermissionValue::deserialize(deserializer)? {
            RawPermissionValue::Integer(n) => Ok(PermissionValue::Integer(n)),
            RawPermissionValue::Bool(b) => Ok(PermissionValue::Bool(b)),
            RawPermissionValue::Text(text) => text.parse().map_err(serde::de::Error::custom),
            RawPermissionValue::Unset => Ok(PermissionValue::Unset),
        }
    }
}

impl PermissionValue {
    /// Resolve into the canonical weight: `true -> 1`, `false -> -1`, unset `-> 0`.
    pub fn weight(self) -> Weight {
        match self {
            PermissionValue::Integer(n) => n,
            PermissionValue::Bool(true) => 1,
            PermissionValue::Bool(false) => -1,
            PermissionValue::Unset => 0,
        }
    }

    /// Inverse of [`PermissionValue::weight`], preferring the boolean form for `±1`.
    pub fn from_weight(weight: Weight) -> Self {
        match weight {
            0 => PermissionValue::Unset,
            1 => PermissionValue::Bool(true),
            -1 => PermissionValue::Bool(false),
            n => PermissionValue::Integer(n),
        }
    }

    pub fn effect(self) -> Effect {
        Effect::of(self.weight())
    }
}

impl From<Weight> for PermissionValue {
    fn from(value: Weight) -> Self {
        PermissionValue::Integer(value)
    }
}

impl From<bool> for PermissionValue {
    fn from(value: bool) -> Self {
        PermissionValue::Bool(value)
    }
}

impl Display for PermissionValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        let weight = self.weight();
        match weight.unsigned_abs() {
            0 | 1 => write!(f, "{}", self.effect()),
            magnitude => write!(f, "{}({magnitude})", self.effect()),
        }
    }
}

impl FromStr for PermissionValue {
    type Err = PermissionsError;

    /// Integers first, then booleans, then the unset literals.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if let Ok(n) = trimmed.parse::<Weight>() {
            return Ok(PermissionValue::Integer(n));
        }
        match trimmed.to_ascii_lowercase().as_str() {
            "true" | "t" | "yes" | "y" => Ok(PermissionValue::Bool(true)),
            "false" | "f" | "no" | "n" => Ok(PermissionValue::Bool(false)),
            "none" | "null" | "unset" => Ok(PermissionValue::Unset),
            _ => Err(PermissionsError::InvalidFormat(format!(
                "Invalid permission value '{s}' (expected an integer, true/false, or none/null/unset)"
            ))),
        }
    }
}
