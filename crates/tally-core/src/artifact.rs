//! The records being reconciled and the rows written alongside corrections.
//!
//! An [`Artifact`] is the inventory's claim that a logical object exists; a
//! [`StorageMetadata`] is the backend's observation of stored bytes. The
//! reconciliation engine pairs them by [`StorageLocation`].

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{ArtifactId, ArtifactUri, ContentChecksum, StorageLocation};

// ---------------------------------------------------------------------------
// Artifact
// ---------------------------------------------------------------------------

/// An inventory record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    /// Durable identity, stable across location changes.
    pub id: ArtifactId,
    /// Logical, namespace-unique name.
    pub uri: ArtifactUri,
    /// Last known good checksum.
    pub content_checksum: ContentChecksum,
    /// Last known good length in bytes.
    pub content_length: u64,
    /// Optional MIME type.
    pub content_type: Option<String>,
    /// Optional content encoding (e.g. `gzip`).
    pub content_encoding: Option<String>,
    /// When this record's metadata last changed.
    pub last_modified: DateTime<Utc>,
    /// Where the bytes live. `None` means the inventory believes no bytes are
    /// stored for this record (e.g. after a reset).
    pub storage_location: Option<StorageLocation>,
}

impl Artifact {
    /// Create a new artifact with a fresh id and no storage location.
    #[must_use]
    pub fn new(
        uri: ArtifactUri,
        content_checksum: ContentChecksum,
        last_modified: DateTime<Utc>,
        content_length: u64,
    ) -> Self {
        Self {
            id: ArtifactId::generate(),
            uri,
            content_checksum,
            content_length,
            content_type: None,
            content_encoding: None,
            last_modified,
            storage_location: None,
        }
    }

    /// Derive a new artifact from a storage observation.
    ///
    /// Returns `None` when the observation lacks the checksum or length
    /// needed to describe the content. The caller supplies the uri (which may
    /// come from the observation's back-reference or from the record being
    /// replaced) and the timestamp.
    #[must_use]
    pub fn from_storage(
        uri: ArtifactUri,
        storage: &StorageMetadata,
        last_modified: DateTime<Utc>,
    ) -> Option<Self> {
        let checksum = storage.content_checksum.clone()?;
        let length = storage.content_length?;
        let mut artifact = Self::new(uri, checksum, last_modified, length);
        artifact.content_type.clone_from(&storage.content_type);
        artifact.content_encoding.clone_from(&storage.content_encoding);
        artifact.storage_location = Some(storage.storage_location.clone());
        Some(artifact)
    }

    /// Fields whose values differ between this record and a storage
    /// observation. Empty means the two agree.
    ///
    /// A missing checksum or length on the observation counts as a
    /// difference.
    #[must_use]
    pub fn differences(&self, storage: &StorageMetadata) -> Vec<MetadataField> {
        let mut diff = Vec::new();
        if storage.content_checksum.as_ref() != Some(&self.content_checksum) {
            diff.push(MetadataField::ContentChecksum);
        }
        if storage.content_length != Some(self.content_length) {
            diff.push(MetadataField::ContentLength);
        }
        if storage.content_type != self.content_type {
            diff.push(MetadataField::ContentType);
        }
        if storage.content_encoding != self.content_encoding {
            diff.push(MetadataField::ContentEncoding);
        }
        diff
    }
}

/// A metadata field compared between inventory and storage.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MetadataField {
    /// `content_checksum`.
    ContentChecksum,
    /// `content_length`.
    ContentLength,
    /// `content_type`.
    ContentType,
    /// `content_encoding`.
    ContentEncoding,
}

impl fmt::Display for MetadataField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ContentChecksum => write!(f, "checksum"),
            Self::ContentLength => write!(f, "length"),
            Self::ContentType => write!(f, "type"),
            Self::ContentEncoding => write!(f, "encoding"),
        }
    }
}

// ---------------------------------------------------------------------------
// StorageMetadata
// ---------------------------------------------------------------------------

/// A storage backend's observation of one stored object.
///
/// Produced on demand by a storage cursor, never persisted by tally.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageMetadata {
    /// Where the object is stored. Always present.
    pub storage_location: StorageLocation,
    /// Checksum observed by the backend. `None` only on invalid records.
    pub content_checksum: Option<ContentChecksum>,
    /// Length observed by the backend. `None` only on invalid records.
    pub content_length: Option<u64>,
    /// When the stored bytes last changed, if the backend knows.
    pub content_last_modified: Option<DateTime<Utc>>,
    /// Back-reference to the owning artifact, embedded in backend metadata.
    pub artifact_uri: Option<ArtifactUri>,
    /// Mirror of [`Artifact::content_type`].
    pub content_type: Option<String>,
    /// Mirror of [`Artifact::content_encoding`].
    pub content_encoding: Option<String>,
    /// `false` when the backend has flagged this object as untrustworthy.
    pub valid: bool,
}

impl StorageMetadata {
    /// A valid observation with the given checksum and length.
    #[must_use]
    pub const fn new(
        storage_location: StorageLocation,
        content_checksum: ContentChecksum,
        content_length: u64,
    ) -> Self {
        Self {
            storage_location,
            content_checksum: Some(content_checksum),
            content_length: Some(content_length),
            content_last_modified: None,
            artifact_uri: None,
            content_type: None,
            content_encoding: None,
            valid: true,
        }
    }

    /// An observation of an object the backend does not trust.
    #[must_use]
    pub const fn invalid(storage_location: StorageLocation) -> Self {
        Self {
            storage_location,
            content_checksum: None,
            content_length: None,
            content_last_modified: None,
            artifact_uri: None,
            content_type: None,
            content_encoding: None,
            valid: false,
        }
    }

    /// `true` if the backend vouches for this object and it carries the
    /// checksum and length needed to compare it.
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.valid && self.content_checksum.is_some() && self.content_length.is_some()
    }
}

// ---------------------------------------------------------------------------
// Tombstones and deletion events
// ---------------------------------------------------------------------------

/// Marks a storage location as retired, pending physical cleanup.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObsoleteStorageLocation {
    /// Row identity.
    pub id: uuid::Uuid,
    /// The retired location.
    pub location: StorageLocation,
    /// When the marker was written.
    pub last_modified: DateTime<Utc>,
}

impl ObsoleteStorageLocation {
    /// A fresh marker for `location`, stamped now.
    #[must_use]
    pub fn new(location: StorageLocation) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            location,
            last_modified: Utc::now(),
        }
    }
}

/// Audit event: an artifact was removed from the inventory.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletedArtifactEvent {
    /// The removed artifact.
    pub id: ArtifactId,
    /// When it was removed.
    pub last_modified: DateTime<Utc>,
}

impl DeletedArtifactEvent {
    /// Event for `id`, stamped now.
    #[must_use]
    pub fn new(id: ArtifactId) -> Self {
        Self {
            id,
            last_modified: Utc::now(),
        }
    }
}

/// Audit event: an artifact's storage location was cleared.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletedStorageLocationEvent {
    /// The artifact whose location was cleared.
    pub id: ArtifactId,
    /// When it was cleared.
    pub last_modified: DateTime<Utc>,
}

impl DeletedStorageLocationEvent {
    /// Event for `id`, stamped now.
    #[must_use]
    pub fn new(id: ArtifactId) -> Self {
        Self {
            id,
            last_modified: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
