//! Validated value types shared by the inventory and the storage backend.
//!
//! All constructors validate their input; a value of one of these types is
//! always well-formed. Serde round-trips go through the same validation.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// ValidationError
// ---------------------------------------------------------------------------

/// Which value type failed validation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// A [`StorageLocation`] bucket component.
    Bucket,
    /// A [`StorageLocation`] storage-id component.
    StorageId,
    /// An [`ArtifactUri`].
    ArtifactUri,
    /// A [`ContentChecksum`].
    Checksum,
    /// An [`ArtifactId`].
    ArtifactId,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bucket => write!(f, "bucket"),
            Self::StorageId => write!(f, "storage id"),
            Self::ArtifactUri => write!(f, "artifact uri"),
            Self::Checksum => write!(f, "content checksum"),
            Self::ArtifactId => write!(f, "artifact id"),
        }
    }
}

/// A value failed validation.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("invalid {kind} {value:?}: {reason}")]
pub struct ValidationError {
    /// Which type rejected the value.
    pub kind: ErrorKind,
    /// The rejected input.
    pub value: String,
    /// Why it was rejected.
    pub reason: String,
}

impl ValidationError {
    fn new(kind: ErrorKind, value: &str, reason: impl Into<String>) -> Self {
        Self {
            kind,
            value: value.to_owned(),
            reason: reason.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// StorageLocation
// ---------------------------------------------------------------------------

/// The comparable key identifying one stored object within one bucket.
///
/// Ordering is byte-lexicographic on `bucket`, then on `storage_id`. Both
/// sequence sources must produce locations in exactly this order; the
/// inventory database relies on SQLite's `BINARY` collation, which compares
/// UTF-8 bytes the same way `str::cmp` does.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawLocation", into = "RawLocation")]
pub struct StorageLocation {
    bucket: String,
    storage_id: String,
}

#[derive(Serialize, Deserialize)]
struct RawLocation {
    bucket: String,
    storage_id: String,
}

impl StorageLocation {
    /// Create a location, validating both components.
    ///
    /// # Errors
    /// Returns an error if either component is empty or contains control
    /// characters, or if the bucket contains a `/`.
    pub fn new(bucket: &str, storage_id: &str) -> Result<Self, ValidationError> {
        Self::validate_bucket(bucket)?;
        Self::validate_storage_id(storage_id)?;
        Ok(Self {
            bucket: bucket.to_owned(),
            storage_id: storage_id.to_owned(),
        })
    }

    /// The bucket this location belongs to.
    #[must_use]
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// The object's identifier within its bucket.
    #[must_use]
    pub fn storage_id(&self) -> &str {
        &self.storage_id
    }

    /// Validate a bucket name on its own (used by config and adapters).
    ///
    /// # Errors
    /// Returns an error if the bucket is empty, contains `/`, or contains
    /// whitespace or control characters.
    pub fn validate_bucket(bucket: &str) -> Result<(), ValidationError> {
        if bucket.is_empty() {
            return Err(ValidationError::new(ErrorKind::Bucket, bucket, "must not be empty"));
        }
        if bucket.contains('/') {
            return Err(ValidationError::new(
                ErrorKind::Bucket,
                bucket,
                "must not contain '/'",
            ));
        }
        if bucket.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(ValidationError::new(
                ErrorKind::Bucket,
                bucket,
                "must not contain whitespace or control characters",
            ));
        }
        Ok(())
    }

    fn validate_storage_id(storage_id: &str) -> Result<(), ValidationError> {
        if storage_id.is_empty() {
            return Err(ValidationError::new(
                ErrorKind::StorageId,
                storage_id,
                "must not be empty",
            ));
        }
        if storage_id.chars().any(char::is_control) {
            return Err(ValidationError::new(
                ErrorKind::StorageId,
                storage_id,
                "must not contain control characters",
            ));
        }
        Ok(())
    }
}

impl fmt::Display for StorageLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.bucket, self.storage_id)
    }
}

impl TryFrom<RawLocation> for StorageLocation {
    type Error = ValidationError;
    fn try_from(raw: RawLocation) -> Result<Self, Self::Error> {
        Self::new(&raw.bucket, &raw.storage_id)
    }
}

impl From<StorageLocation> for RawLocation {
    fn from(loc: StorageLocation) -> Self {
        Self {
            bucket: loc.bucket,
            storage_id: loc.storage_id,
        }
    }
}

// ---------------------------------------------------------------------------
// ArtifactId
// ---------------------------------------------------------------------------

/// Durable identity of an inventory record, independent of its location.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtifactId(Uuid);

impl ArtifactId {
    /// Generate a fresh random id.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap an existing UUID.
    #[must_use]
    pub const fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// The underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl FromStr for ArtifactId {
    type Err = ValidationError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| ValidationError::new(ErrorKind::ArtifactId, s, e.to_string()))
    }
}

// ---------------------------------------------------------------------------
// ArtifactUri
// ---------------------------------------------------------------------------

/// Logical, namespace-unique name of an artifact, e.g. `cadc:TEST/file.fits`.
///
/// Must be `scheme:rest` where the scheme starts with an ASCII letter and
/// contains only letters, digits, `+`, `-` or `.`, and `rest` is non-empty
/// with no whitespace.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ArtifactUri(String);

impl ArtifactUri {
    /// Parse and validate a URI.
    ///
    /// # Errors
    /// Returns an error if the value does not have the `scheme:rest` shape.
    pub fn new(s: &str) -> Result<Self, ValidationError> {
        Self::validate(s)?;
        Ok(Self(s.to_owned()))
    }

    /// The full URI string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The scheme, without the trailing `:`.
    #[must_use]
    pub fn scheme(&self) -> &str {
        self.0.split_once(':').map_or("", |(scheme, _)| scheme)
    }

    fn validate(s: &str) -> Result<(), ValidationError> {
        let Some((scheme, rest)) = s.split_once(':') else {
            return Err(ValidationError::new(
                ErrorKind::ArtifactUri,
                s,
                "expected scheme:path",
            ));
        };
        let mut chars = scheme.chars();
        let scheme_ok = chars.next().is_some_and(|c| c.is_ascii_alphabetic())
            && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
        if !scheme_ok {
            return Err(ValidationError::new(
                ErrorKind::ArtifactUri,
                s,
                format!("invalid scheme {scheme:?}"),
            ));
        }
        if rest.is_empty() {
            return Err(ValidationError::new(ErrorKind::ArtifactUri, s, "empty path"));
        }
        if s.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(ValidationError::new(
                ErrorKind::ArtifactUri,
                s,
                "must not contain whitespace",
            ));
        }
        Ok(())
    }
}

impl fmt::Display for ArtifactUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ArtifactUri {
    type Err = ValidationError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for ArtifactUri {
    type Error = ValidationError;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::validate(&s)?;
        Ok(Self(s))
    }
}

impl From<ArtifactUri> for String {
    fn from(uri: ArtifactUri) -> Self {
        uri.0
    }
}

// ---------------------------------------------------------------------------
// ContentChecksum
// ---------------------------------------------------------------------------

/// A content checksum in `algorithm:hex` form, e.g. `sha256:9f86d0…`.
///
/// The hex digest is normalised to lowercase so that checksums produced by
/// different backends compare equal.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentChecksum(String);

impl ContentChecksum {
    /// Parse and normalise a checksum URI.
    ///
    /// # Errors
    /// Returns an error if the algorithm is missing or not lowercase
    /// alphanumeric, or the digest is empty or not hex.
    pub fn new(s: &str) -> Result<Self, ValidationError> {
        let Some((algorithm, digest)) = s.split_once(':') else {
            return Err(ValidationError::new(
                ErrorKind::Checksum,
                s,
                "expected algorithm:hex",
            ));
        };
        if algorithm.is_empty()
            || !algorithm
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
        {
            return Err(ValidationError::new(
                ErrorKind::Checksum,
                s,
                format!("invalid algorithm {algorithm:?}"),
            ));
        }
        if digest.is_empty() || !digest.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(ValidationError::new(
                ErrorKind::Checksum,
                s,
                "digest must be non-empty hex",
            ));
        }
        Ok(Self(format!("{algorithm}:{}", digest.to_ascii_lowercase())))
    }

    /// Build a checksum from an algorithm name and raw digest bytes.
    ///
    /// # Errors
    /// Returns an error if the algorithm name is invalid or `digest` is empty.
    pub fn from_digest(algorithm: &str, digest: &[u8]) -> Result<Self, ValidationError> {
        use std::fmt::Write as _;
        let mut hex = String::with_capacity(digest.len() * 2);
        for b in digest {
            let _ = write!(hex, "{b:02x}");
        }
        Self::new(&format!("{algorithm}:{hex}"))
    }

    /// The algorithm component (e.g. `sha256`).
    #[must_use]
    pub fn algorithm(&self) -> &str {
        self.0.split_once(':').map_or("", |(a, _)| a)
    }

    /// The full `algorithm:hex` string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentChecksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ContentChecksum {
    type Err = ValidationError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for ContentChecksum {
    type Error = ValidationError;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(&s)
    }
}

impl From<ContentChecksum> for String {
    fn from(c: ContentChecksum) -> Self {
        c.0
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
