//! Top-level error types.

use std::sync::Arc;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the voice profile engine.
///
/// Validation and not-found errors are caller mistakes and surface directly.
/// Everything else belongs to the asynchronous learning pipeline, where
/// `is_transient` decides whether the queue retries.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("profile for {user_id} changed concurrently (expected version {expected_version})")]
    Conflict {
        user_id: String,
        expected_version: i64,
    },

    #[error("store unavailable: {0}")]
    TransientStore(#[from] sqlx::Error),

    #[error("cache unavailable: {0}")]
    TransientCache(String),

    #[error("gave up after {attempts} attempts: {last_error}")]
    ExhaustedRetries { attempts: u32, last_error: String },

    #[error("failed to (de)serialize profile document: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Shared(Arc<Error>),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Whether the learning queue should retry the job that produced this error.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Conflict { .. } | Self::TransientStore(_) | Self::TransientCache(_) => true,
            Self::Shared(inner) => inner.is_transient(),
            _ => false,
        }
    }

    pub fn is_conflict(&self) -> bool {
        match self {
            Self::Conflict { .. } => true,
            Self::Shared(inner) => inner.is_conflict(),
            _ => false,
        }
    }
}

impl From<Arc<Error>> for Error {
    fn from(error: Arc<Error>) -> Self {
        Self::Shared(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_and_store_errors_are_transient() {
        let conflict = Error::Conflict {
            user_id: "u1".into(),
            expected_version: 3,
        };
        assert!(conflict.is_transient());
        assert!(conflict.is_conflict());
        assert!(Error::TransientCache("redis down".into()).is_transient());
        assert!(Error::TransientStore(sqlx::Error::PoolTimedOut).is_transient());
    }

    #[test]
    fn validation_is_not_transient() {
        assert!(!Error::validation("empty edit").is_transient());
        assert!(!Error::NotFound("archetype x".into()).is_transient());
    }

    #[test]
    fn shared_errors_keep_their_classification() {
        let shared = Error::from(Arc::new(Error::TransientCache("timeout".into())));
        assert!(shared.is_transient());
        assert_eq!(shared.to_string(), "cache unavailable: timeout");
    }
}
