//! Subject identities.

use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::PermissionsError;

/// Names one subject, e.g. `user:alice` or `group:admins`.
#[derive(
    Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
pub struct SubjectIdentity {
    #[serde(rename = "type")]
    kind: String,
    identifier: String,
}

impl SubjectIdentity {
    pub fn new(kind: impl Into<String>, identifier: impl Into<String>) -> Self {
        SubjectIdentity {
            kind: kind.into(),
            identifier: identifier.into(),
        }
    }

    /// The subject type, e.g. `user` or `group`.
    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }
}

impl Display for SubjectIdentity {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}:{}", self.kind, self.identifier)
    }
}

impl FromStr for SubjectIdentity {
    type Err = PermissionsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().split_once(':') {
            Some((kind, identifier)) if !kind.is_empty() && !identifier.is_empty() => {
                Ok(SubjectIdentity::new(kind, identifier))
            }
            _ => Err(PermissionsError::InvalidFormat(format!(
                "Failed to parse subject '{s}' (expected format: type:identifier)"
            ))),
        }
    }
}
