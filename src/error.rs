use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub enum PermissionsError {
    /// Every compare-and-swap attempt lost against a concurrent writer.
    /// The caller may retry the whole update.
    #[error("concurrent modification of {subject}: gave up after {attempts} attempts")]
    ConcurrentModificationExceeded { subject: String, attempts: usize },

    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("transform rejected subject data: {0}")]
    InvalidTransform(String),

    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    #[error("{subject} lacks permission {permission}")]
    PermissionDenied { subject: String, permission: String },

    #[error("Poisoned lock error: {0}")]
    PoisonedLockError(String),
}

impl PermissionsError {
    /// Whether repeating the same request may succeed without any other change.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PermissionsError::ConcurrentModificationExceeded { .. }
                | PermissionsError::StorageUnavailable(_)
        )
    }
}

impl<T> From<std::sync::PoisonError<T>> for PermissionsError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        PermissionsError::PoisonedLockError(err.to_string())
    }
}

impl From<serde_json::Error> for PermissionsError {
    fn from(err: serde_json::Error) -> Self {
        PermissionsError::InvalidFormat(err.to_string())
    }
}
