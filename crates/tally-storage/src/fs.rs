//! Directory-tree storage backend.
//!
//! # Layout
//!
//! ```text
//! <root>/<bucket>/data/<storage_id>        ← object bytes
//! <root>/<bucket>/meta/<storage_id>.json   ← optional sidecar metadata
//! ```
//!
//! The sidecar carries what a real object store keeps in object tags: the
//! owning artifact's uri, content type and encoding, and the checksum and
//! length recorded when the object was written.
//!
//! # Validity
//!
//! The cursor hashes every object (SHA-256) and marks it invalid when:
//!
//! - it is zero-length (an abandoned placeholder);
//! - its sidecar exists but cannot be parsed;
//! - its sidecar records a checksum or length that no longer matches.
//!
//! Objects that disappear between listing and reading are skipped.

use std::fs;
use std::io::{self, Write as _};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tally_core::{ArtifactUri, ContentChecksum, StorageLocation, StorageMetadata};
use tracing::{debug, warn};

use crate::adapter::{StorageAdapter, StorageIter, Subject};
use crate::error::StorageError;

const DATA_DIR: &str = "data";
const META_DIR: &str = "meta";
const SIDECAR_SUFFIX: &str = ".json";
const CHECKSUM_ALGORITHM: &str = "sha256";

// ---------------------------------------------------------------------------
// ObjectSidecar
// ---------------------------------------------------------------------------

/// Backend-side metadata stored next to an object.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ObjectSidecar {
    /// Back-reference to the owning artifact.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_uri: Option<ArtifactUri>,
    /// MIME type.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    /// Content encoding.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_encoding: Option<String>,
    /// Checksum recorded at write time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_checksum: Option<ContentChecksum>,
    /// Length recorded at write time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_length: Option<u64>,
}

impl ObjectSidecar {
    /// Sidecar that only carries the artifact back-reference.
    #[must_use]
    pub fn for_artifact(uri: ArtifactUri) -> Self {
        Self {
            artifact_uri: Some(uri),
            ..Self::default()
        }
    }
}

// ---------------------------------------------------------------------------
// FileSystemStorage
// ---------------------------------------------------------------------------

/// A storage backend rooted at a local directory.
#[derive(Clone, Debug)]
pub struct FileSystemStorage {
    root: PathBuf,
    readers: Option<Vec<String>>,
}

impl FileSystemStorage {
    /// A backend rooted at `root`, readable by any subject.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            readers: None,
        }
    }

    /// Restrict reads to the named principals.
    #[must_use]
    pub fn with_readers(mut self, readers: Vec<String>) -> Self {
        self.readers = Some(readers);
        self
    }

    /// The backend root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Store `bytes` as `storage_id` in `bucket`, replacing any existing
    /// object. The sidecar (if any) is written before the data so a cursor
    /// never sees new bytes paired with stale metadata.
    ///
    /// # Errors
    /// Fails on an invalid bucket or object name, or on I/O errors.
    pub fn put_object(
        &self,
        bucket: &str,
        storage_id: &str,
        bytes: &[u8],
        sidecar: Option<&ObjectSidecar>,
    ) -> Result<StorageLocation, StorageError> {
        let bucket_dir = self.bucket_dir(bucket)?;
        validate_object_name(storage_id)?;
        let location = StorageLocation::new(bucket, storage_id).map_err(|e| {
            StorageError::InvalidObjectName {
                name: storage_id.to_owned(),
                reason: e.reason,
            }
        })?;

        let data_dir = bucket_dir.join(DATA_DIR);
        let meta_dir = bucket_dir.join(META_DIR);
        fs::create_dir_all(&data_dir).map_err(|e| StorageError::io(&data_dir, e))?;
        fs::create_dir_all(&meta_dir).map_err(|e| StorageError::io(&meta_dir, e))?;

        let meta_path = sidecar_path(&meta_dir, storage_id);
        match sidecar {
            Some(sidecar) => {
                let json = serde_json::to_vec_pretty(sidecar)
                    .map_err(|e| StorageError::io(&meta_path, io::Error::other(e)))?;
                write_atomic(&bucket_dir, &meta_path, &json)?;
            }
            None => match fs::remove_file(&meta_path) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(StorageError::io(&meta_path, e)),
            },
        }

        write_atomic(&bucket_dir, &data_dir.join(storage_id), bytes)?;
        debug!(%location, len = bytes.len(), "stored object");
        Ok(location)
    }

    /// Remove an object and its sidecar. Missing files are ignored.
    ///
    /// # Errors
    /// Fails on an invalid bucket or on I/O errors other than not-found.
    pub fn remove_object(&self, location: &StorageLocation) -> Result<(), StorageError> {
        let bucket_dir = self.bucket_dir(location.bucket())?;
        let id = location.storage_id();
        for path in [
            bucket_dir.join(DATA_DIR).join(id),
            sidecar_path(&bucket_dir.join(META_DIR), id),
        ] {
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(StorageError::io(path, e)),
            }
        }
        Ok(())
    }

    fn bucket_dir(&self, bucket: &str) -> Result<PathBuf, StorageError> {
        StorageLocation::validate_bucket(bucket).map_err(|e| StorageError::InvalidBucket {
            bucket: bucket.to_owned(),
            reason: e.reason,
        })?;
        if bucket == "." || bucket == ".." {
            return Err(StorageError::InvalidBucket {
                bucket: bucket.to_owned(),
                reason: "must not be a relative path component".to_owned(),
            });
        }
        Ok(self.root.join(bucket))
    }

    fn authorize(&self, subject: &Subject, bucket: &str) -> Result<(), StorageError> {
        let Some(readers) = &self.readers else {
            return Ok(());
        };
        let allowed = subject
            .principal()
            .is_some_and(|p| readers.iter().any(|r| r == p));
        if allowed {
            Ok(())
        } else {
            Err(StorageError::PermissionDenied {
                subject: subject.to_string(),
                bucket: bucket.to_owned(),
            })
        }
    }
}

impl StorageAdapter for FileSystemStorage {
    fn name(&self) -> &'static str {
        "filesystem"
    }

    fn iterate<'a>(&'a self, subject: &Subject, bucket: &str) -> Result<StorageIter<'a>, StorageError> {
        let bucket_dir = self.bucket_dir(bucket)?;
        self.authorize(subject, bucket)?;
        if !bucket_dir.is_dir() {
            return Err(StorageError::BucketNotFound {
                bucket: bucket.to_owned(),
                root: self.root.clone(),
            });
        }

        let data_dir = bucket_dir.join(DATA_DIR);
        let names = list_object_names(&data_dir)?;
        debug!(bucket, %subject, objects = names.len(), "listed bucket");

        Ok(Box::new(FsCursor {
            bucket: bucket.to_owned(),
            data_dir,
            meta_dir: bucket_dir.join(META_DIR),
            names: names.into_iter(),
        }))
    }
}

// ---------------------------------------------------------------------------
// Cursor
// ---------------------------------------------------------------------------

/// Lazily observes each listed object in name order.
struct FsCursor {
    bucket: String,
    data_dir: PathBuf,
    meta_dir: PathBuf,
    names: std::vec::IntoIter<String>,
}

impl Iterator for FsCursor {
    type Item = Result<StorageMetadata, StorageError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let name = self.names.next()?;
            match self.observe(&name) {
                Ok(Some(meta)) => return Some(Ok(meta)),
                Ok(None) => {}
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

impl FsCursor {
    /// Build the observation for one object. `Ok(None)` means the object
    /// vanished after listing.
    fn observe(&self, name: &str) -> Result<Option<StorageMetadata>, StorageError> {
        let Ok(location) = StorageLocation::new(&self.bucket, name) else {
            warn!(bucket = %self.bucket, name, "skipping object with unusable name");
            return Ok(None);
        };

        let path = self.data_dir.join(name);
        let mut file = match fs::File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(%location, "object vanished after listing");
                return Ok(None);
            }
            Err(e) => return Err(StorageError::io(path, e)),
        };
        let stat = file.metadata().map_err(|e| StorageError::io(&path, e))?;
        let modified = stat.modified().ok().map(DateTime::<Utc>::from);

        let mut hasher = Sha256::new();
        let length = io::copy(&mut file, &mut hasher).map_err(|e| StorageError::io(&path, e))?;
        let checksum = ContentChecksum::from_digest(CHECKSUM_ALGORITHM, &hasher.finalize()).ok();

        let (sidecar, sidecar_ok) = self.read_sidecar(&location)?;

        let mut valid = length > 0 && sidecar_ok && checksum.is_some();
        if let Some(expected) = sidecar.content_checksum.as_ref() {
            if checksum.as_ref() != Some(expected) {
                warn!(%location, %expected, "stored bytes do not match recorded checksum");
                valid = false;
            }
        }
        if let Some(expected) = sidecar.content_length {
            if expected != length {
                warn!(%location, expected, actual = length, "stored length does not match recorded length");
                valid = false;
            }
        }

        Ok(Some(StorageMetadata {
            storage_location: location,
            content_checksum: checksum,
            content_length: Some(length),
            content_last_modified: modified,
            artifact_uri: sidecar.artifact_uri,
            content_type: sidecar.content_type,
            content_encoding: sidecar.content_encoding,
            valid,
        }))
    }

    /// Returns the sidecar (default when absent) and whether it was usable.
    fn read_sidecar(&self, location: &StorageLocation) -> Result<(ObjectSidecar, bool), StorageError> {
        let path = sidecar_path(&self.meta_dir, location.storage_id());
        let bytes = match fs::read(&path) {
            Ok(b) => b,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok((ObjectSidecar::default(), true)),
            Err(e) => return Err(StorageError::io(path, e)),
        };
        match serde_json::from_slice(&bytes) {
            Ok(sidecar) => Ok((sidecar, true)),
            Err(e) => {
                warn!(%location, error = %e, "unreadable object sidecar");
                Ok((ObjectSidecar::default(), false))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Regular-file names in `data_dir`, sorted bytewise. A bucket that has
/// never held an object has no `data/` directory and lists as empty.
fn list_object_names(data_dir: &Path) -> Result<Vec<String>, StorageError> {
    let entries = match fs::read_dir(data_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(StorageError::io(data_dir, e)),
    };

    let mut names = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| StorageError::io(data_dir, e))?;
        let file_type = entry.file_type().map_err(|e| StorageError::io(entry.path(), e))?;
        if !file_type.is_file() {
            continue;
        }
        match entry.file_name().into_string() {
            Ok(name) => names.push(name),
            Err(raw) => warn!(name = ?raw, "skipping object with non-UTF-8 name"),
        }
    }
    names.sort_unstable();
    Ok(names)
}

fn validate_object_name(name: &str) -> Result<(), StorageError> {
    let reason = if name.is_empty() {
        "must not be empty"
    } else if name.contains('/') || name.contains('\\') {
        "must not contain path separators"
    } else if name == "." || name == ".." {
        "must not be a relative path component"
    } else {
        return Ok(());
    };
    Err(StorageError::InvalidObjectName {
        name: name.to_owned(),
        reason: reason.to_owned(),
    })
}

fn sidecar_path(meta_dir: &Path, storage_id: &str) -> PathBuf {
    meta_dir.join(format!("{storage_id}{SIDECAR_SUFFIX}"))
}

/// Write via a temp file in `staging_dir` and rename into place.
fn write_atomic(staging_dir: &Path, dest: &Path, bytes: &[u8]) -> Result<(), StorageError> {
    let mut tmp =
        tempfile::NamedTempFile::new_in(staging_dir).map_err(|e| StorageError::io(staging_dir, e))?;
    tmp.write_all(bytes).map_err(|e| StorageError::io(tmp.path(), e))?;
    tmp.as_file().sync_all().map_err(|e| StorageError::io(tmp.path(), e))?;
    tmp.persist(dest).map_err(|e| StorageError::io(dest, e.error))?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
#[allow(clippy::all, clippy::pedantic, clippy::nursery)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (TempDir, FileSystemStorage) {
        let dir = TempDir::new().unwrap();
        let storage = FileSystemStorage::new(dir.path());
        (dir, storage)
    }

    fn collect(storage: &FileSystemStorage, bucket: &str) -> Vec<StorageMetadata> {
        storage
            .iterate(&Subject::anonymous(), bucket)
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap()
    }

    fn sha256_of(bytes: &[u8]) -> ContentChecksum {
        ContentChecksum::from_digest("sha256", &Sha256::digest(bytes)).unwrap()
    }

    // -- listing --

    #[test]
    fn lists_objects_in_byte_order() {
        let (_dir, storage) = setup();
        for name in ["b", "a", "C", "aa"] {
            storage.put_object("b0", name, b"x", None).unwrap();
        }
        let ids: Vec<_> = collect(&storage, "b0")
            .into_iter()
            .map(|m| m.storage_location.storage_id().to_owned())
            .collect();
        assert_eq!(ids, vec!["C", "a", "aa", "b"]);
    }

    #[test]
    fn empty_bucket_without_data_dir_lists_nothing() {
        let (dir, storage) = setup();
        fs::create_dir_all(dir.path().join("b0")).unwrap();
        assert!(collect(&storage, "b0").is_empty());
    }

    #[test]
    fn missing_bucket_is_an_error() {
        let (_dir, storage) = setup();
        let err = storage.iterate(&Subject::anonymous(), "nope").err().unwrap();
        assert!(matches!(err, StorageError::BucketNotFound { .. }));
    }

    #[test]
    fn traversal_bucket_is_rejected() {
        let (_dir, storage) = setup();
        for bad in ["..", "a/b", ""] {
            let err = storage.iterate(&Subject::anonymous(), bad).err().unwrap();
            assert!(matches!(err, StorageError::InvalidBucket { .. }), "{bad:?}");
        }
    }

    #[test]
    fn subdirectories_in_data_are_ignored() {
        let (dir, storage) = setup();
        storage.put_object("b0", "obj", b"x", None).unwrap();
        fs::create_dir_all(dir.path().join("b0").join(DATA_DIR).join("nested")).unwrap();
        assert_eq!(collect(&storage, "b0").len(), 1);
    }

    // -- observation --

    #[test]
    fn observation_carries_checksum_length_and_sidecar() {
        let (_dir, storage) = setup();
        let sidecar = ObjectSidecar {
            artifact_uri: Some(ArtifactUri::new("test:obj").unwrap()),
            content_type: Some("text/plain".into()),
            content_encoding: None,
            content_checksum: Some(sha256_of(b"hello")),
            content_length: Some(5),
        };
        storage.put_object("b0", "obj", b"hello", Some(&sidecar)).unwrap();

        let [meta]: [StorageMetadata; 1] = collect(&storage, "b0").try_into().unwrap();
        assert!(meta.is_valid());
        assert_eq!(meta.content_checksum, Some(sha256_of(b"hello")));
        assert_eq!(meta.content_length, Some(5));
        assert_eq!(meta.artifact_uri.unwrap().as_str(), "test:obj");
        assert_eq!(meta.content_type.as_deref(), Some("text/plain"));
        assert!(meta.content_last_modified.is_some());
    }

    #[test]
    fn object_without_sidecar_is_valid_without_uri() {
        let (_dir, storage) = setup();
        storage.put_object("b0", "obj", b"data", None).unwrap();
        let [meta]: [StorageMetadata; 1] = collect(&storage, "b0").try_into().unwrap();
        assert!(meta.is_valid());
        assert!(meta.artifact_uri.is_none());
    }

    #[test]
    fn zero_length_object_is_invalid() {
        let (_dir, storage) = setup();
        storage.put_object("b0", "empty", b"", None).unwrap();
        let [meta]: [StorageMetadata; 1] = collect(&storage, "b0").try_into().unwrap();
        assert!(!meta.is_valid());
    }

    #[test]
    fn checksum_mismatch_is_invalid() {
        let (_dir, storage) = setup();
        let sidecar = ObjectSidecar {
            content_checksum: Some(sha256_of(b"original")),
            ..ObjectSidecar::default()
        };
        storage.put_object("b0", "obj", b"corrupted", Some(&sidecar)).unwrap();
        let [meta]: [StorageMetadata; 1] = collect(&storage, "b0").try_into().unwrap();
        assert!(!meta.valid);
        assert_eq!(meta.content_checksum, Some(sha256_of(b"corrupted")));
    }

    #[test]
    fn length_mismatch_is_invalid() {
        let (_dir, storage) = setup();
        let sidecar = ObjectSidecar {
            content_length: Some(99),
            ..ObjectSidecar::default()
        };
        storage.put_object("b0", "obj", b"abc", Some(&sidecar)).unwrap();
        let [meta]: [StorageMetadata; 1] = collect(&storage, "b0").try_into().unwrap();
        assert!(!meta.valid);
    }

    #[test]
    fn unparseable_sidecar_is_invalid() {
        let (dir, storage) = setup();
        storage.put_object("b0", "obj", b"abc", None).unwrap();
        fs::write(dir.path().join("b0").join(META_DIR).join("obj.json"), b"{not json").unwrap();
        let [meta]: [StorageMetadata; 1] = collect(&storage, "b0").try_into().unwrap();
        assert!(!meta.valid);
    }

    #[test]
    fn vanished_object_is_skipped() {
        let (_dir, storage) = setup();
        storage.put_object("b0", "a", b"1", None).unwrap();
        let gone = storage.put_object("b0", "b", b"2", None).unwrap();
        storage.put_object("b0", "c", b"3", None).unwrap();

        let mut iter = storage.iterate(&Subject::anonymous(), "b0").unwrap();
        let first = iter.next().unwrap().unwrap();
        assert_eq!(first.storage_location.storage_id(), "a");
        storage.remove_object(&gone).unwrap();
        let next = iter.next().unwrap().unwrap();
        assert_eq!(next.storage_location.storage_id(), "c");
        assert!(iter.next().is_none());
    }

    // -- writes --

    #[test]
    fn put_replaces_and_clears_sidecar() {
        let (_dir, storage) = setup();
        let sidecar = ObjectSidecar::for_artifact(ArtifactUri::new("test:obj").unwrap());
        storage.put_object("b0", "obj", b"v1", Some(&sidecar)).unwrap();
        storage.put_object("b0", "obj", b"v2", None).unwrap();
        let [meta]: [StorageMetadata; 1] = collect(&storage, "b0").try_into().unwrap();
        assert_eq!(meta.content_checksum, Some(sha256_of(b"v2")));
        assert!(meta.artifact_uri.is_none());
    }

    #[test]
    fn put_rejects_path_like_names() {
        let (_dir, storage) = setup();
        for bad in ["a/b", "..", ""] {
            let err = storage.put_object("b0", bad, b"x", None).unwrap_err();
            assert!(matches!(err, StorageError::InvalidObjectName { .. }), "{bad:?}");
        }
    }

    // -- authorization --

    #[test]
    fn readers_restrict_iteration() {
        let (_dir, storage) = setup();
        let storage = storage.with_readers(vec!["svc-tally".into()]);
        storage.put_object("b0", "obj", b"x", None).unwrap();

        let denied = storage.iterate(&Subject::anonymous(), "b0").err().unwrap();
        assert!(matches!(denied, StorageError::PermissionDenied { .. }));
        let denied = storage.iterate(&Subject::named("mallory"), "b0").err().unwrap();
        assert!(matches!(denied, StorageError::PermissionDenied { .. }));

        let allowed = storage.iterate(&Subject::named("svc-tally"), "b0").unwrap();
        assert_eq!(allowed.count(), 1);
    }
}
