//! Error type for a reconciliation run.
//!
//! [`ReconcileError`] is what [`engine::run`](crate::engine::run) and
//! [`BucketReconciler::run`](crate::bucket::BucketReconciler::run) return.
//! Every variant terminates the run; none is retried internally. The caller
//! decides whether to schedule another run using
//! [`ReconcileError::is_transient`].

use std::fmt;
use std::io;

use tally_core::{ArtifactId, StorageLocation};
use tally_storage::StorageError;
use thiserror::Error;

use crate::inventory::InventoryError;
use crate::sink::SinkError;

/// Which input sequence an element came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Side {
    /// The inventory database cursor.
    Inventory,
    /// The storage backend cursor.
    Storage,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inventory => write!(f, "inventory"),
            Self::Storage => write!(f, "storage"),
        }
    }
}

/// Errors that abort a reconciliation run.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// `resolve` was called with neither an artifact nor a storage record.
    /// Indicates a defect in the merge loop.
    #[error("resolve called with neither an artifact nor a storage record")]
    NothingToResolve,

    /// A sequence produced a key that does not sort after its predecessor.
    #[error(
        "{side} sequence is not in ascending order: {current} follows {previous}\n  \
         Both sources must sort by the same byte-wise storage location order."
    )]
    OutOfOrder {
        /// The offending sequence.
        side: Side,
        /// The previously pulled key.
        previous: StorageLocation,
        /// The key that broke the order.
        current: StorageLocation,
    },

    /// A sequence produced the same key twice.
    #[error("{side} sequence yielded duplicate storage location {location}")]
    DuplicateKey {
        /// The offending sequence.
        side: Side,
        /// The repeated key.
        location: StorageLocation,
    },

    /// The inventory cursor yielded an artifact with no storage location.
    #[error("inventory yielded artifact {id} without a storage location")]
    MissingLocation {
        /// The artifact lacking a location.
        id: ArtifactId,
    },

    /// A policy met a combination it cannot classify.
    #[error("policy {policy} cannot resolve: {detail}")]
    Policy {
        /// The policy name.
        policy: &'static str,
        /// What was unexpected.
        detail: String,
    },

    /// Pulling from the storage backend failed.
    #[error("storage backend: {0}")]
    Storage(#[from] StorageError),

    /// Pulling from the inventory database failed.
    #[error("inventory database: {0}")]
    Inventory(#[from] InventoryError),

    /// Applying a correction failed. Earlier corrections remain committed.
    #[error("applying correction: {0}")]
    Sink(#[from] SinkError),

    /// Writing the audit report failed.
    #[error("writing audit report: {0}")]
    Report(#[source] io::Error),
}

impl ReconcileError {
    /// `true` when a later run may succeed without operator intervention.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Storage(e) => e.is_transient(),
            Self::Inventory(e) => e.is_transient(),
            Self::Sink(e) => e.is_transient(),
            Self::NothingToResolve
            | Self::OutOfOrder { .. }
            | Self::DuplicateKey { .. }
            | Self::MissingLocation { .. }
            | Self::Policy { .. }
            | Self::Report(_) => false,
        }
    }

    /// `true` for integration defects: broken ordering, duplicate keys, or
    /// impossible resolve calls.
    #[must_use]
    pub const fn is_precondition_violation(&self) -> bool {
        matches!(
            self,
            Self::NothingToResolve
                | Self::OutOfOrder { .. }
                | Self::DuplicateKey { .. }
                | Self::MissingLocation { .. }
        )
    }
}

#[cfg(test)]
#[allow(clippy::all, clippy::pedantic, clippy::nursery)]
mod tests {
    use super::*;

    fn loc(id: &str) -> StorageLocation {
        StorageLocation::new("b0", id).unwrap()
    }

    #[test]
    fn out_of_order_names_side_and_keys() {
        let err = ReconcileError::OutOfOrder {
            side: Side::Storage,
            previous: loc("b"),
            current: loc("a"),
        };
        let msg = err.to_string();
        assert!(msg.contains("storage sequence"));
        assert!(msg.contains("b0/a follows b0/b"));
        assert!(err.is_precondition_violation());
        assert!(!err.is_transient());
    }

    #[test]
    fn storage_transience_is_delegated() {
        let err = ReconcileError::from(StorageError::Io {
            path: "/x".into(),
            source: io::Error::new(io::ErrorKind::TimedOut, "slow"),
        });
        assert!(err.is_transient());
        assert!(!err.is_precondition_violation());
    }
}
