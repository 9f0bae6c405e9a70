//! Error types for storage operations.
//!
//! [`StorageError`] is returned both when opening a bucket cursor and for
//! each element it yields. Callers use [`StorageError::is_transient`] to
//! decide whether re-running later may succeed.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors returned by [`StorageAdapter`](crate::StorageAdapter) operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The requested bucket does not exist in the backend.
    #[error("bucket `{bucket}` not found under {}", root.display())]
    BucketNotFound {
        /// The bucket that was requested.
        bucket: String,
        /// The backend root that was searched.
        root: PathBuf,
    },

    /// The bucket name cannot be used with this backend.
    #[error("invalid bucket `{bucket}`: {reason}")]
    InvalidBucket {
        /// The rejected bucket name.
        bucket: String,
        /// Why it was rejected.
        reason: String,
    },

    /// An object name cannot be used as a storage id in this backend.
    #[error("invalid object name `{name}`: {reason}")]
    InvalidObjectName {
        /// The rejected name.
        name: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The subject is not allowed to read the bucket.
    #[error("subject `{subject}` may not read bucket `{bucket}`")]
    PermissionDenied {
        /// The principal the request ran as.
        subject: String,
        /// The bucket that was refused.
        bucket: String,
    },

    /// An I/O error while listing or reading an object.
    #[error("I/O error at {}: {source}", path.display())]
    Io {
        /// The path being accessed.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: io::Error,
    },
}

impl StorageError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// `true` when retrying the whole run later may succeed without operator
    /// intervention.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Io { source, .. } => matches!(
                source.kind(),
                io::ErrorKind::Interrupted
                    | io::ErrorKind::TimedOut
                    | io::ErrorKind::WouldBlock
                    | io::ErrorKind::ResourceBusy
            ),
            Self::BucketNotFound { .. }
            | Self::InvalidBucket { .. }
            | Self::InvalidObjectName { .. }
            | Self::PermissionDenied { .. } => false,
        }
    }
}

#[cfg(test)]
#[allow(clippy::all, clippy::pedantic, clippy::nursery)]
mod tests {
    use super::*;

    #[test]
    fn timeouts_are_transient() {
        let err = StorageError::io("/x", io::Error::new(io::ErrorKind::TimedOut, "slow"));
        assert!(err.is_transient());
    }

    #[test]
    fn missing_bucket_is_permanent() {
        let err = StorageError::BucketNotFound {
            bucket: "b0".into(),
            root: PathBuf::from("/srv"),
        };
        assert!(!err.is_transient());
        let msg = err.to_string();
        assert!(msg.contains("b0"));
        assert!(msg.contains("/srv"));
    }

    #[test]
    fn permission_errors_are_permanent() {
        let err = StorageError::io("/x", io::Error::new(io::ErrorKind::PermissionDenied, "no"));
        assert!(!err.is_transient());
    }
}
