use std::fmt;

/// Unified error taxonomy for the client core.
///
/// Lookups that simply find nothing are `Ok(None)`, never an error. Backend
/// failures carry enough shape for the UI boundary to pick the right
/// guidance: permission denials point at backend configuration, transport
/// failures suggest a retry, reauth failures ask the user to sign in again.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Authentication failed: {0}")]
    AuthError(String),

    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("Recent sign-in required for this operation")]
    ReauthRequired,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Permission denied: {0}. Check the backend security-rule configuration.")]
    PermissionDenied(String),

    #[error("Query requires a backend index: {0}")]
    MissingIndex(String),

    #[error("Network error: {0}. Please try again.")]
    Transport(String),

    #[error("Cleared {deleted} messages but {} deletions failed", failed.len())]
    ClearFailed { deleted: usize, failed: Vec<String> },

    #[error("Internal error")]
    Internal(#[from] anyhow::Error),
}

pub type AppResult<T> = Result<T, AppError>;

/// Error kinds emitted by a [`crate::store::DocumentStore`].
///
/// Kept separate from [`AppError`] so callers can match on the store-level
/// kind (the registry's fallback logic depends on it) before the error is
/// widened at the component boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The backend's security rules rejected the operation.
    PermissionDenied(String),
    /// The query needs a composite index that is not provisioned.
    MissingIndex(String),
    /// The round trip to the backend failed.
    Transport(String),
    /// Malformed path or payload.
    InvalidArgument(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::PermissionDenied(msg) => write!(f, "permission denied: {msg}"),
            StoreError::MissingIndex(msg) => write!(f, "missing index: {msg}"),
            StoreError::Transport(msg) => write!(f, "transport failure: {msg}"),
            StoreError::InvalidArgument(msg) => write!(f, "invalid argument: {msg}"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::PermissionDenied(msg) => AppError::PermissionDenied(msg),
            StoreError::MissingIndex(msg) => AppError::MissingIndex(msg),
            StoreError::Transport(msg) => AppError::Transport(msg),
            StoreError::InvalidArgument(msg) => AppError::Validation(msg),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
