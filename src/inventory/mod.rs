//! The SQLite-backed inventory database.
//!
//! The inventory is the catalogue of [`Artifact`] records plus the rows
//! written alongside corrections: obsolete-location markers and the two
//! deletion event streams.
//!
//! # Connections
//!
//! [`Inventory`] owns the write connection used by the sink. Each
//! [`ArtifactCursor`] opens its own read-only connection and pages through
//! one bucket by keyset (`storage_id > last seen`), so commits made while a
//! run is in flight never cause a location to be yielded twice or skipped.
//! Both connections run in WAL mode with a busy timeout.

mod cursor;
pub(crate) mod dao;

use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::{Connection, ErrorCode, OpenFlags, OptionalExtension, Transaction, TransactionBehavior};
use tally_core::{
    Artifact, ArtifactId, ArtifactUri, DeletedArtifactEvent, DeletedStorageLocationEvent,
    ObsoleteStorageLocation, StorageLocation,
};
use thiserror::Error;
use tracing::debug;

pub use cursor::ArtifactCursor;

/// Schema version written to the `meta` table on creation.
pub const SCHEMA_VERSION: u32 = 1;

/// Default number of rows fetched per cursor page.
pub const DEFAULT_PAGE_SIZE: usize = 1000;

const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

const SCHEMA: &str = r"
    CREATE TABLE IF NOT EXISTS meta (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS artifact (
        id TEXT PRIMARY KEY,
        uri TEXT NOT NULL UNIQUE,
        content_checksum TEXT NOT NULL,
        content_length INTEGER NOT NULL,
        content_type TEXT,
        content_encoding TEXT,
        last_modified TEXT NOT NULL,
        storage_bucket TEXT,
        storage_id TEXT,
        UNIQUE (storage_bucket, storage_id)
    );
    CREATE INDEX IF NOT EXISTS artifact_by_location
        ON artifact (storage_bucket, storage_id);
    CREATE TABLE IF NOT EXISTS obsolete_storage_location (
        id TEXT PRIMARY KEY,
        storage_bucket TEXT NOT NULL,
        storage_id TEXT NOT NULL,
        last_modified TEXT NOT NULL,
        UNIQUE (storage_bucket, storage_id)
    );
    CREATE TABLE IF NOT EXISTS deleted_artifact_event (
        id TEXT PRIMARY KEY,
        last_modified TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS deleted_storage_location_event (
        id TEXT PRIMARY KEY,
        last_modified TEXT NOT NULL
    );
";

// ---------------------------------------------------------------------------
// InventoryError
// ---------------------------------------------------------------------------

/// Errors from the inventory database.
#[derive(Debug, Error)]
pub enum InventoryError {
    /// The database file could not be opened or initialised.
    #[error("cannot open inventory at {}: {source}", path.display())]
    Open {
        /// The database path.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: rusqlite::Error,
    },

    /// A query or statement failed.
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    /// A row holds a value that does not parse into the domain type.
    #[error("corrupt inventory row {row}: {detail}")]
    Corrupt {
        /// Identifies the row (usually the artifact id).
        row: String,
        /// What failed to parse.
        detail: String,
    },
}

impl InventoryError {
    fn sqlite_code(&self) -> Option<ErrorCode> {
        match self {
            Self::Open { source, .. } | Self::Sqlite(source) => source.sqlite_error_code(),
            Self::Corrupt { .. } => None,
        }
    }

    /// `true` when the database was busy or locked by another writer.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self.sqlite_code(),
            Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
        )
    }

    /// `true` when a UNIQUE, NOT NULL, or trigger constraint rejected a write.
    #[must_use]
    pub fn is_constraint_violation(&self) -> bool {
        self.sqlite_code() == Some(ErrorCode::ConstraintViolation)
    }
}

// ---------------------------------------------------------------------------
// Inventory
// ---------------------------------------------------------------------------

/// Handle on an inventory database file.
pub struct Inventory {
    path: PathBuf,
    conn: Connection,
}

impl std::fmt::Debug for Inventory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Inventory").field("path", &self.path).finish_non_exhaustive()
    }
}

impl Inventory {
    /// Open the database at `path`, creating the file and schema if needed.
    ///
    /// # Errors
    /// Returns [`InventoryError::Open`] if the file cannot be opened, WAL
    /// cannot be enabled, or the schema cannot be created.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, InventoryError> {
        let path = path.as_ref().to_path_buf();
        let wrap = |source| InventoryError::Open {
            path: path.clone(),
            source,
        };
        let mut conn = Connection::open(&path).map_err(wrap)?;
        conn.busy_timeout(BUSY_TIMEOUT).map_err(wrap)?;
        conn.pragma_update(None, "journal_mode", "WAL").map_err(wrap)?;
        conn.execute_batch(SCHEMA).map_err(wrap)?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(wrap)?;
        tx.execute(
            "INSERT OR IGNORE INTO meta (key, value) VALUES ('schema_version', ?1)",
            [SCHEMA_VERSION.to_string()],
        )
        .map_err(wrap)?;
        tx.commit().map_err(wrap)?;
        debug!(path = %path.display(), "inventory opened");
        Ok(Self { path, conn })
    }

    /// The database file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open a cursor over every located artifact in `bucket`, ascending by
    /// storage id.
    ///
    /// The cursor reads on its own connection and fetches `page_size` rows
    /// at a time.
    ///
    /// # Errors
    /// Returns an error if the read connection cannot be opened.
    pub fn iter_bucket(&self, bucket: &str, page_size: usize) -> Result<ArtifactCursor, InventoryError> {
        let conn = Connection::open_with_flags(
            &self.path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|source| InventoryError::Open {
            path: self.path.clone(),
            source,
        })?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Ok(ArtifactCursor::new(conn, bucket, page_size))
    }

    /// Begin an immediate write transaction. Rolls back on drop unless
    /// committed.
    pub(crate) fn transaction(&mut self) -> Result<Transaction<'_>, InventoryError> {
        Ok(self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?)
    }

    /// Run `f` inside one immediate transaction, committing on `Ok`.
    ///
    /// # Errors
    /// Returns whatever `f` returns, or the commit error. Nothing `f` wrote
    /// is kept on any error path.
    pub fn with_transaction<T, E, F>(&mut self, f: F) -> Result<T, E>
    where
        E: From<InventoryError>,
        F: FnOnce(&Transaction<'_>) -> Result<T, E>,
    {
        let tx = self.transaction()?;
        let value = f(&tx)?;
        tx.commit().map_err(InventoryError::from)?;
        Ok(value)
    }

    /// Insert or update an artifact.
    ///
    /// # Errors
    /// Fails on a uri or location conflict with another row.
    pub fn put_artifact(&mut self, artifact: &Artifact) -> Result<(), InventoryError> {
        self.with_transaction(|tx| dao::put_artifact(tx, artifact))
    }

    /// Look up an artifact by id.
    ///
    /// # Errors
    /// Fails on a query error or a corrupt row.
    pub fn get_artifact(&self, id: ArtifactId) -> Result<Option<Artifact>, InventoryError> {
        self.conn
            .query_row(
                &format!("SELECT {} FROM artifact WHERE id = ?1", dao::ARTIFACT_COLUMNS),
                [id.to_string()],
                dao::ArtifactRow::read,
            )
            .optional()?
            .map(dao::ArtifactRow::into_artifact)
            .transpose()
    }

    /// Look up an artifact by uri.
    ///
    /// # Errors
    /// Fails on a query error or a corrupt row.
    pub fn get_by_uri(&self, uri: &ArtifactUri) -> Result<Option<Artifact>, InventoryError> {
        self.conn
            .query_row(
                &format!("SELECT {} FROM artifact WHERE uri = ?1", dao::ARTIFACT_COLUMNS),
                [uri.as_str()],
                dao::ArtifactRow::read,
            )
            .optional()?
            .map(dao::ArtifactRow::into_artifact)
            .transpose()
    }

    /// Look up the artifact recorded at `location`.
    ///
    /// # Errors
    /// Fails on a query error or a corrupt row.
    pub fn get_by_location(&self, location: &StorageLocation) -> Result<Option<Artifact>, InventoryError> {
        self.conn
            .query_row(
                &format!(
                    "SELECT {} FROM artifact WHERE storage_bucket = ?1 AND storage_id = ?2",
                    dao::ARTIFACT_COLUMNS
                ),
                [location.bucket(), location.storage_id()],
                dao::ArtifactRow::read,
            )
            .optional()?
            .map(dao::ArtifactRow::into_artifact)
            .transpose()
    }

    /// Number of artifact rows, located or not.
    ///
    /// # Errors
    /// Fails on a query error.
    pub fn count_artifacts(&self) -> Result<u64, InventoryError> {
        dao::count(&self.conn, "artifact")
    }

    /// The obsolete-location marker for `location`, if one exists.
    ///
    /// # Errors
    /// Fails on a query error or a corrupt row.
    pub fn obsolete_location(
        &self,
        location: &StorageLocation,
    ) -> Result<Option<ObsoleteStorageLocation>, InventoryError> {
        dao::get_obsolete(&self.conn, location)
    }

    /// Record an obsolete-location marker outside of a correction.
    ///
    /// # Errors
    /// Fails on a write error.
    pub fn put_obsolete_location(&mut self, marker: &ObsoleteStorageLocation) -> Result<(), InventoryError> {
        self.with_transaction(|tx| dao::put_obsolete(tx, marker))
    }

    /// Every deleted-artifact event, oldest first.
    ///
    /// # Errors
    /// Fails on a query error or a corrupt row.
    pub fn deleted_artifact_events(&self) -> Result<Vec<DeletedArtifactEvent>, InventoryError> {
        dao::list_events(&self.conn, dao::EventTable::DeletedArtifact).map(|rows| {
            rows.into_iter()
                .map(|(id, last_modified)| DeletedArtifactEvent { id, last_modified })
                .collect()
        })
    }

    /// Every deleted-storage-location event, oldest first.
    ///
    /// # Errors
    /// Fails on a query error or a corrupt row.
    pub fn deleted_storage_location_events(
        &self,
    ) -> Result<Vec<DeletedStorageLocationEvent>, InventoryError> {
        dao::list_events(&self.conn, dao::EventTable::DeletedStorageLocation).map(|rows| {
            rows.into_iter()
                .map(|(id, last_modified)| DeletedStorageLocationEvent { id, last_modified })
                .collect()
        })
    }

    /// Raw access for tests that need to install triggers or inspect rows.
    #[doc(hidden)]
    #[must_use]
    pub const fn connection(&self) -> &Connection {
        &self.conn
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
