//! Data model types: contexts, subject identities, permission values and snapshots.
//!
//! Canonical string forms:
//! - Context value: `key=value`, e.g. `world=nether`
//! - Context set: comma-separated context values, or `global` for the empty set
//! - Subject: `type:identifier`, e.g. `user:alice` or `group:admins`
//! - Permission value: an integer, `true`/`false`, or `none`/`null`/`unset`

mod context;
mod permission_value;
mod subject;
mod subject_data;

pub use context::{ContextSet, ContextValue};
pub use permission_value::{Effect, PermissionValue, Weight};
pub use subject::SubjectIdentity;
pub use subject_data::{Segment, SubjectData};
