//! Typed subject commands as delivered by a host's command dispatcher.
//!
//! Argument parsing happens in the host; a [`SubjectCommand`] arrives with its
//! arguments already typed. Each command knows the permission guarding it and
//! the pure transform it applies to subject data.

use std::fmt::{Display, Formatter, Result as FmtResult};
use std::sync::Arc;

use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::types::{ContextSet, PermissionValue, SubjectData, SubjectIdentity};

pub const PERMISSION_SET: &str = "permissionsex.permission.set";
pub const PERMISSION_SET_DEFAULT: &str = "permissionsex.permission.set-default";
pub const PERMISSION_CLEAR: &str = "permissionsex.permission.clear";
pub const OPTION_SET: &str = "permissionsex.option.set";
pub const OPTION_CLEAR: &str = "permissionsex.option.clear";
pub const PARENT_ADD: &str = "permissionsex.parent.add";
pub const PARENT_REMOVE: &str = "permissionsex.parent.remove";
pub const PARENT_SET: &str = "permissionsex.parent.set";
pub const PARENT_CLEAR: &str = "permissionsex.parent.clear";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum SubjectCommand {
    SetPermission {
        #[serde(default)]
        contexts: ContextSet,
        key: String,
        value: PermissionValue,
    },
    SetDefault {
        #[serde(default)]
        contexts: ContextSet,
        value: PermissionValue,
    },
    /// `value: None` removes the option.
    SetOption {
        #[serde(default)]
        contexts: ContextSet,
        key: String,
        #[serde(default)]
        value: Option<String>,
    },
    AddParent {
        #[serde(default)]
        contexts: ContextSet,
        parent: SubjectIdentity,
    },
    RemoveParent {
        #[serde(default)]
        contexts: ContextSet,
        parent: SubjectIdentity,
    },
    SetParents {
        #[serde(default)]
        contexts: ContextSet,
        parents: Vec<SubjectIdentity>,
    },
    ClearPermissions {
        #[serde(default)]
        contexts: ContextSet,
    },
    ClearOptions {
        #[serde(default)]
        contexts: ContextSet,
    },
    ClearParents {
        #[serde(default)]
        contexts: ContextSet,
    },
}

impl SubjectCommand {
    /// Permission an issuer must hold to run this command.
    pub fn required_permission(&self) -> &'static str {
        match self {
            SubjectCommand::SetPermission { .. } => PERMISSION_SET,
            SubjectCommand::SetDefault { .. } => PERMISSION_SET_DEFAULT,
            SubjectCommand::SetOption { .. } => OPTION_SET,
            SubjectCommand::AddParent { .. } => PARENT_ADD,
            SubjectCommand::RemoveParent { .. } => PARENT_REMOVE,
            SubjectCommand::SetParents { .. } => PARENT_SET,
            SubjectCommand::ClearPermissions { .. } => PERMISSION_CLEAR,
            SubjectCommand::ClearOptions { .. } => OPTION_CLEAR,
            SubjectCommand::ClearParents { .. } => PARENT_CLEAR,
        }
    }

    /// The context set this command writes under.
    pub fn contexts(&self) -> &ContextSet {
        match self {
            SubjectCommand::SetPermission { contexts, .. }
            | SubjectCommand::SetDefault { contexts, .. }
            | SubjectCommand::SetOption { contexts, .. }
            | SubjectCommand::AddParent { contexts, .. }
            | SubjectCommand::RemoveParent { contexts, .. }
            | SubjectCommand::SetParents { contexts, .. }
            | SubjectCommand::ClearPermissions { contexts }
            | SubjectCommand::ClearOptions { contexts }
            | SubjectCommand::ClearParents { contexts } => contexts,
        }
    }

    pub fn apply(&self, data: &SubjectData) -> SubjectData {
        match self {
            SubjectCommand::SetPermission {
                contexts,
                key,
                value,
            } => data.set_permission(contexts, key, value.weight()),
            SubjectCommand::SetDefault { contexts, value } => {
                data.set_default_value(contexts, value.weight())
            }
            SubjectCommand::SetOption {
                contexts,
                key,
                value,
            } => data.set_option(contexts, key, value.as_deref()),
            SubjectCommand::AddParent { contexts, parent } => data.add_parent(contexts, parent),
            SubjectCommand::RemoveParent { contexts, parent } => {
                data.remove_parent(contexts, parent)
            }
            SubjectCommand::SetParents { contexts, parents } => data.set_parents(contexts, parents),
            SubjectCommand::ClearPermissions { contexts } => data.clear_permissions(contexts),
            SubjectCommand::ClearOptions { contexts } => data.clear_options(contexts),
            SubjectCommand::ClearParents { contexts } => data.clear_parents(contexts),
        }
    }
}

impl Display for SubjectCommand {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            SubjectCommand::SetPermission { key, value, .. } => {
                write!(f, "set permission {key} to {value}")?
            }
            SubjectCommand::SetDefault { value, .. } => write!(f, "set default to {value}")?,
            SubjectCommand::SetOption {
                key,
                value: Some(value),
                ..
            } => write!(f, "set option {key} to {value:?}")?,
            SubjectCommand::SetOption {
                key, value: None, ..
            } => write!(f, "unset option {key}")?,
            SubjectCommand::AddParent { parent, .. } => write!(f, "add parent {parent}")?,
            SubjectCommand::RemoveParent { parent, .. } => write!(f, "remove parent {parent}")?,
            SubjectCommand::SetParents { parents, .. } => {
                write!(f, "set parents [{}]", parents.iter().join(", "))?
            }
            SubjectCommand::ClearPermissions { .. } => write!(f, "clear permissions")?,
            SubjectCommand::ClearOptions { .. } => write!(f, "clear options")?,
            SubjectCommand::ClearParents { .. } => write!(f, "clear parents")?,
        }
        write!(f, " in {} context", self.contexts())
    }
}

/// Who runs a command, and under which contexts their own permissions are checked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issuer {
    pub identity: SubjectIdentity,
    #[serde(default)]
    pub active: ContextSet,
}

impl Issuer {
    pub fn new(identity: SubjectIdentity, active: ContextSet) -> Self {
        Issuer { identity, active }
    }
}

/// A committed command, handed back for the host to report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutcome {
    pub subject: SubjectIdentity,
    pub command: SubjectCommand,
    pub data: Arc<SubjectData>,
}
