// src/lib.rs
pub use commands::{CommandOutcome, Issuer, SubjectCommand};
pub use config::EngineConfig;
pub use engine::PermissionEngine;
pub use error::PermissionsError;
pub use reference::{SubjectRef, UpdatePolicy};
pub use storage::{CasOutcome, MemoryStore, SubjectStore, Version, VersionedData};
pub use types::{
    ContextSet, ContextValue, Effect, PermissionValue, Segment, SubjectData, SubjectIdentity,
    Weight,
};

pub mod cache;
pub mod commands;
pub mod config;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod reference;
pub mod resolver;
pub mod storage;
pub mod types;

mod timers;
