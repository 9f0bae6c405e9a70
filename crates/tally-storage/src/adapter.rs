//! The [`StorageAdapter`] trait and the identity passed to it.

use std::fmt;

use tally_core::StorageMetadata;

use crate::error::StorageError;

/// A forward-only stream of one bucket's objects, ascending by
/// [`StorageLocation`](tally_core::StorageLocation).
pub type StorageIter<'a> = Box<dyn Iterator<Item = Result<StorageMetadata, StorageError>> + 'a>;

/// The identity a storage request runs as.
///
/// Opaque to the reconciler: it is built once from configuration and handed
/// unchanged to [`StorageAdapter::iterate`]. There is no ambient identity.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Subject {
    principal: Option<String>,
}

impl Subject {
    /// The anonymous subject.
    #[must_use]
    pub const fn anonymous() -> Self {
        Self { principal: None }
    }

    /// A subject authenticated as `principal`.
    #[must_use]
    pub fn named(principal: impl Into<String>) -> Self {
        Self {
            principal: Some(principal.into()),
        }
    }

    /// The principal name, if any.
    #[must_use]
    pub fn principal(&self) -> Option<&str> {
        self.principal.as_deref()
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.principal.as_deref().unwrap_or("anonymous"))
    }
}

/// A content-storage backend.
///
/// # Key invariants
///
/// - **Sorted**: [`iterate`](Self::iterate) yields records in strictly
///   ascending location order, using the same comparator as the inventory.
///   The reconciler treats any violation as fatal.
/// - **Located**: every yielded record carries the location it was found at.
/// - **Lazy**: records are produced as the caller pulls; a bucket with
///   millions of objects must not be materialised.
/// - **Validity**: the adapter, not the reconciler, decides whether an
///   object can be trusted and reports that through
///   [`StorageMetadata::valid`].
pub trait StorageAdapter {
    /// Short name used in logs (e.g. `"filesystem"`).
    fn name(&self) -> &'static str;

    /// Open a cursor over `bucket`, running as `subject`.
    ///
    /// # Errors
    /// Fails if the bucket does not exist, is malformed, or the subject may
    /// not read it. Errors while pulling are yielded by the iterator.
    fn iterate<'a>(&'a self, subject: &Subject, bucket: &str) -> Result<StorageIter<'a>, StorageError>;
}
