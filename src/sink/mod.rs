//! Corrective actions a policy can request.
//!
//! A policy never touches the inventory directly; it calls the five
//! operations of [`EventSink`]. Each operation is one atomic unit against
//! the inventory: every row it writes commits together or not at all.
//!
//! [`GatedSink`] wraps any sink and turns every operation into a no-op when
//! the run is report-only. [`InventorySink`] is the SQLite implementation.

mod inventory;

use tally_core::{Artifact, StorageLocation, StorageMetadata};
use thiserror::Error;
use tracing::trace;

use crate::inventory::InventoryError;

pub use inventory::InventorySink;

// ---------------------------------------------------------------------------
// SinkError
// ---------------------------------------------------------------------------

/// Errors from applying a correction. The failed operation left no partial
/// state behind.
#[derive(Debug, Error)]
pub enum SinkError {
    /// The database rejected or failed the transaction.
    #[error(transparent)]
    Inventory(#[from] InventoryError),

    /// A write would violate a uniqueness rule (duplicate uri or location).
    #[error(
        "{operation} at {location} conflicts with an existing row: {source}\n  \
         Resolve the duplicate in the inventory, then re-run."
    )]
    Conflict {
        /// The sink operation that failed.
        operation: &'static str,
        /// The location being corrected.
        location: StorageLocation,
        /// The constraint error.
        #[source]
        source: InventoryError,
    },
}

impl SinkError {
    /// `true` when re-running later may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Inventory(e) => e.is_transient(),
            Self::Conflict { .. } => false,
        }
    }
}

// ---------------------------------------------------------------------------
// EventSink
// ---------------------------------------------------------------------------

/// The five corrections a policy may apply.
///
/// Implementations must make each call atomic: a failure leaves the
/// inventory exactly as it was before the call.
pub trait EventSink {
    /// Keep the artifact but clear its storage location and stamp a new
    /// timestamp, recording a deleted-storage-location event.
    ///
    /// # Errors
    /// Returns an error if the transaction fails.
    fn reset_artifact(&mut self, artifact: &Artifact) -> Result<(), SinkError>;

    /// Remove the obsolete-location marker for the record's location, if
    /// any.
    ///
    /// # Errors
    /// Returns an error if the transaction fails.
    fn delete_obsolete_location(&mut self, storage: &StorageMetadata) -> Result<(), SinkError>;

    /// Remove the artifact and record a deleted-artifact event.
    ///
    /// # Errors
    /// Returns an error if the transaction fails.
    fn delete_artifact(&mut self, artifact: &Artifact) -> Result<(), SinkError>;

    /// Insert a new artifact describing the stored object. A record without
    /// an artifact uri is skipped with a warning.
    ///
    /// # Errors
    /// Returns an error if the transaction fails or the uri is taken.
    fn create_artifact(&mut self, storage: &StorageMetadata) -> Result<(), SinkError>;

    /// Retire `artifact` (tombstone its location, delete it, record a
    /// deleted-artifact event) and insert a replacement built from
    /// `storage`, all in one transaction.
    ///
    /// # Errors
    /// Returns an error if the transaction fails.
    fn replace_artifact(&mut self, artifact: &Artifact, storage: &StorageMetadata) -> Result<(), SinkError>;
}

impl<S: EventSink + ?Sized> EventSink for &mut S {
    fn reset_artifact(&mut self, artifact: &Artifact) -> Result<(), SinkError> {
        (**self).reset_artifact(artifact)
    }

    fn delete_obsolete_location(&mut self, storage: &StorageMetadata) -> Result<(), SinkError> {
        (**self).delete_obsolete_location(storage)
    }

    fn delete_artifact(&mut self, artifact: &Artifact) -> Result<(), SinkError> {
        (**self).delete_artifact(artifact)
    }

    fn create_artifact(&mut self, storage: &StorageMetadata) -> Result<(), SinkError> {
        (**self).create_artifact(storage)
    }

    fn replace_artifact(&mut self, artifact: &Artifact, storage: &StorageMetadata) -> Result<(), SinkError> {
        (**self).replace_artifact(artifact, storage)
    }
}

// ---------------------------------------------------------------------------
// GatedSink
// ---------------------------------------------------------------------------

/// Forwards to `inner` unless the run is report-only, in which case every
/// operation returns `Ok(())` without touching it.
#[derive(Debug)]
pub struct GatedSink<S> {
    inner: S,
    report_only: bool,
    suppressed: u64,
}

impl<S: EventSink> GatedSink<S> {
    /// Wrap `inner`. With `report_only` set nothing reaches it.
    #[must_use]
    pub const fn new(inner: S, report_only: bool) -> Self {
        Self {
            inner,
            report_only,
            suppressed: 0,
        }
    }

    /// Whether mutations are being suppressed.
    #[must_use]
    pub const fn report_only(&self) -> bool {
        self.report_only
    }

    /// Number of operations suppressed so far.
    #[must_use]
    pub const fn suppressed(&self) -> u64 {
        self.suppressed
    }

    /// Unwrap the inner sink.
    #[must_use]
    pub fn into_inner(self) -> S {
        self.inner
    }

    fn gate(&mut self, op: &'static str) -> bool {
        if self.report_only {
            self.suppressed += 1;
            trace!(op, "report-only: suppressed");
        }
        !self.report_only
    }
}

impl<S: EventSink> EventSink for GatedSink<S> {
    fn reset_artifact(&mut self, artifact: &Artifact) -> Result<(), SinkError> {
        if self.gate("reset_artifact") {
            self.inner.reset_artifact(artifact)?;
        }
        Ok(())
    }

    fn delete_obsolete_location(&mut self, storage: &StorageMetadata) -> Result<(), SinkError> {
        if self.gate("delete_obsolete_location") {
            self.inner.delete_obsolete_location(storage)?;
        }
        Ok(())
    }

    fn delete_artifact(&mut self, artifact: &Artifact) -> Result<(), SinkError> {
        if self.gate("delete_artifact") {
            self.inner.delete_artifact(artifact)?;
        }
        Ok(())
    }

    fn create_artifact(&mut self, storage: &StorageMetadata) -> Result<(), SinkError> {
        if self.gate("create_artifact") {
            self.inner.create_artifact(storage)?;
        }
        Ok(())
    }

    fn replace_artifact(&mut self, artifact: &Artifact, storage: &StorageMetadata) -> Result<(), SinkError> {
        if self.gate("replace_artifact") {
            self.inner.replace_artifact(artifact, storage)?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// RecordingSink
// ---------------------------------------------------------------------------

/// One call observed by a [`RecordingSink`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SinkCall {
    /// `reset_artifact`.
    Reset(Artifact),
    /// `delete_obsolete_location`.
    DeleteObsoleteLocation(StorageMetadata),
    /// `delete_artifact`.
    Delete(Artifact),
    /// `create_artifact`.
    Create(StorageMetadata),
    /// `replace_artifact`.
    Replace(Artifact, StorageMetadata),
}

/// A sink that records calls instead of applying them.
#[derive(Clone, Debug, Default)]
pub struct RecordingSink {
    /// Calls in the order received.
    pub calls: Vec<SinkCall>,
}

impl EventSink for RecordingSink {
    fn reset_artifact(&mut self, artifact: &Artifact) -> Result<(), SinkError> {
        self.calls.push(SinkCall::Reset(artifact.clone()));
        Ok(())
    }

    fn delete_obsolete_location(&mut self, storage: &StorageMetadata) -> Result<(), SinkError> {
        self.calls.push(SinkCall::DeleteObsoleteLocation(storage.clone()));
        Ok(())
    }

    fn delete_artifact(&mut self, artifact: &Artifact) -> Result<(), SinkError> {
        self.calls.push(SinkCall::Delete(artifact.clone()));
        Ok(())
    }

    fn create_artifact(&mut self, storage: &StorageMetadata) -> Result<(), SinkError> {
        self.calls.push(SinkCall::Create(storage.clone()));
        Ok(())
    }

    fn replace_artifact(&mut self, artifact: &Artifact, storage: &StorageMetadata) -> Result<(), SinkError> {
        self.calls
            .push(SinkCall::Replace(artifact.clone(), storage.clone()));
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::all, clippy::pedantic, clippy::nursery)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tally_core::{ArtifactUri, ContentChecksum};

    fn artifact() -> Artifact {
        Artifact::new(
            ArtifactUri::new("test:x").unwrap(),
            ContentChecksum::new("md5:01").unwrap(),
            Utc::now(),
            1,
        )
    }

    fn storage() -> StorageMetadata {
        StorageMetadata::invalid(StorageLocation::new("b0", "x").unwrap())
    }

    fn exercise(sink: &mut impl EventSink) {
        let a = artifact();
        let s = storage();
        sink.reset_artifact(&a).unwrap();
        sink.delete_obsolete_location(&s).unwrap();
        sink.delete_artifact(&a).unwrap();
        sink.create_artifact(&s).unwrap();
        sink.replace_artifact(&a, &s).unwrap();
    }

    #[test]
    fn report_only_gate_blocks_every_operation() {
        let mut gated = GatedSink::new(RecordingSink::default(), true);
        exercise(&mut gated);
        assert_eq!(gated.suppressed(), 5);
        assert!(gated.into_inner().calls.is_empty());
    }

    #[test]
    fn open_gate_forwards_every_operation() {
        let mut gated = GatedSink::new(RecordingSink::default(), false);
        exercise(&mut gated);
        assert_eq!(gated.suppressed(), 0);
        let calls = gated.into_inner().calls;
        assert_eq!(calls.len(), 5);
        assert!(matches!(calls[0], SinkCall::Reset(_)));
        assert!(matches!(calls[4], SinkCall::Replace(_, _)));
    }

    #[test]
    fn mutable_reference_is_a_sink() {
        let mut recorder = RecordingSink::default();
        {
            let mut by_ref = &mut recorder;
            exercise(&mut by_ref);
        }
        assert_eq!(recorder.calls.len(), 5);
    }
}
