//! Row mapping and the statements shared by the inventory and the sink.
//!
//! Functions take `&Connection` so they run equally on a plain connection or
//! inside a [`rusqlite::Transaction`].

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use tally_core::{
    Artifact, ArtifactId, ArtifactUri, ContentChecksum, ObsoleteStorageLocation, StorageLocation,
};

use super::InventoryError;

pub const ARTIFACT_COLUMNS: &str = "id, uri, content_checksum, content_length, \
     content_type, content_encoding, last_modified, storage_bucket, storage_id";

/// An `artifact` row as stored, before domain validation.
pub struct ArtifactRow {
    id: String,
    uri: String,
    content_checksum: String,
    content_length: i64,
    content_type: Option<String>,
    content_encoding: Option<String>,
    last_modified: DateTime<Utc>,
    storage_bucket: Option<String>,
    pub storage_id: Option<String>,
}

impl ArtifactRow {
    /// Read the columns listed in [`ARTIFACT_COLUMNS`], in order.
    pub fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            uri: row.get(1)?,
            content_checksum: row.get(2)?,
            content_length: row.get(3)?,
            content_type: row.get(4)?,
            content_encoding: row.get(5)?,
            last_modified: row.get(6)?,
            storage_bucket: row.get(7)?,
            storage_id: row.get(8)?,
        })
    }

    pub fn into_artifact(self) -> Result<Artifact, InventoryError> {
        let corrupt = |detail: String| InventoryError::Corrupt {
            row: self.id.clone(),
            detail,
        };
        let id: ArtifactId = self.id.parse().map_err(|e| corrupt(format!("{e}")))?;
        let uri = ArtifactUri::new(&self.uri).map_err(|e| corrupt(e.to_string()))?;
        let content_checksum =
            ContentChecksum::new(&self.content_checksum).map_err(|e| corrupt(e.to_string()))?;
        let content_length = u64::try_from(self.content_length)
            .map_err(|_| corrupt(format!("negative content_length {}", self.content_length)))?;
        let storage_location = match (&self.storage_bucket, &self.storage_id) {
            (Some(bucket), Some(storage_id)) => {
                Some(StorageLocation::new(bucket, storage_id).map_err(|e| corrupt(e.to_string()))?)
            }
            (None, None) => None,
            _ => return Err(corrupt("storage location is half null".to_owned())),
        };
        Ok(Artifact {
            id,
            uri,
            content_checksum,
            content_length,
            content_type: self.content_type,
            content_encoding: self.content_encoding,
            last_modified: self.last_modified,
            storage_location,
        })
    }
}

fn length_to_sql(artifact: &Artifact) -> Result<i64, InventoryError> {
    i64::try_from(artifact.content_length).map_err(|_| InventoryError::Corrupt {
        row: artifact.id.to_string(),
        detail: format!("content_length {} exceeds i64", artifact.content_length),
    })
}

/// Insert a new row. Fails on any uri, location, or id conflict.
pub fn insert_artifact(conn: &Connection, artifact: &Artifact) -> Result<(), InventoryError> {
    let loc = artifact.storage_location.as_ref();
    conn.execute(
        &format!("INSERT INTO artifact ({ARTIFACT_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"),
        params![
            artifact.id.to_string(),
            artifact.uri.as_str(),
            artifact.content_checksum.as_str(),
            length_to_sql(artifact)?,
            artifact.content_type,
            artifact.content_encoding,
            artifact.last_modified,
            loc.map(StorageLocation::bucket),
            loc.map(StorageLocation::storage_id),
        ],
    )?;
    Ok(())
}

/// Insert a row, or update every column of the row with the same id.
/// A uri or location held by a different row is still a conflict.
pub fn put_artifact(conn: &Connection, artifact: &Artifact) -> Result<(), InventoryError> {
    let loc = artifact.storage_location.as_ref();
    conn.execute(
        &format!(
            "INSERT INTO artifact ({ARTIFACT_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT (id) DO UPDATE SET
                 uri = excluded.uri,
                 content_checksum = excluded.content_checksum,
                 content_length = excluded.content_length,
                 content_type = excluded.content_type,
                 content_encoding = excluded.content_encoding,
                 last_modified = excluded.last_modified,
                 storage_bucket = excluded.storage_bucket,
                 storage_id = excluded.storage_id"
        ),
        params![
            artifact.id.to_string(),
            artifact.uri.as_str(),
            artifact.content_checksum.as_str(),
            length_to_sql(artifact)?,
            artifact.content_type,
            artifact.content_encoding,
            artifact.last_modified,
            loc.map(StorageLocation::bucket),
            loc.map(StorageLocation::storage_id),
        ],
    )?;
    Ok(())
}

/// Delete by id. Returns the number of rows removed.
pub fn delete_artifact(conn: &Connection, id: ArtifactId) -> Result<usize, InventoryError> {
    Ok(conn.execute("DELETE FROM artifact WHERE id = ?1", [id.to_string()])?)
}

pub fn put_obsolete(conn: &Connection, marker: &ObsoleteStorageLocation) -> Result<(), InventoryError> {
    conn.execute(
        "INSERT INTO obsolete_storage_location (id, storage_bucket, storage_id, last_modified)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT (storage_bucket, storage_id) DO UPDATE SET last_modified = excluded.last_modified",
        params![
            marker.id.to_string(),
            marker.location.bucket(),
            marker.location.storage_id(),
            marker.last_modified,
        ],
    )?;
    Ok(())
}

/// Remove the marker at `location`. Returns the number of rows removed.
pub fn delete_obsolete(conn: &Connection, location: &StorageLocation) -> Result<usize, InventoryError> {
    Ok(conn.execute(
        "DELETE FROM obsolete_storage_location WHERE storage_bucket = ?1 AND storage_id = ?2",
        [location.bucket(), location.storage_id()],
    )?)
}

pub fn get_obsolete(
    conn: &Connection,
    location: &StorageLocation,
) -> Result<Option<ObsoleteStorageLocation>, InventoryError> {
    let row = conn
        .query_row(
            "SELECT id, last_modified FROM obsolete_storage_location
             WHERE storage_bucket = ?1 AND storage_id = ?2",
            [location.bucket(), location.storage_id()],
            |row| Ok((row.get::<_, String>(0)?, row.get::<_, DateTime<Utc>>(1)?)),
        )
        .optional()?;
    row.map(|(id, last_modified)| {
        let id = uuid::Uuid::parse_str(&id).map_err(|e| InventoryError::Corrupt {
            row: id.clone(),
            detail: e.to_string(),
        })?;
        Ok(ObsoleteStorageLocation {
            id,
            location: location.clone(),
            last_modified,
        })
    })
    .transpose()
}

/// Append a deletion event to `table`. A repeated id overwrites its
/// timestamp.
pub fn put_event(
    conn: &Connection,
    table: EventTable,
    id: ArtifactId,
    at: DateTime<Utc>,
) -> Result<(), InventoryError> {
    conn.execute(
        &format!("INSERT OR REPLACE INTO {} (id, last_modified) VALUES (?1, ?2)", table.name()),
        params![id.to_string(), at],
    )?;
    Ok(())
}

/// The two deletion event tables.
#[derive(Clone, Copy, Debug)]
pub enum EventTable {
    DeletedArtifact,
    DeletedStorageLocation,
}

impl EventTable {
    pub const fn name(self) -> &'static str {
        match self {
            Self::DeletedArtifact => "deleted_artifact_event",
            Self::DeletedStorageLocation => "deleted_storage_location_event",
        }
    }
}

pub fn list_events(
    conn: &Connection,
    table: EventTable,
) -> Result<Vec<(ArtifactId, DateTime<Utc>)>, InventoryError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT id, last_modified FROM {} ORDER BY last_modified, id",
        table.name()
    ))?;
    let rows = stmt
        .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, DateTime<Utc>>(1)?)))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    rows.into_iter()
        .map(|(id, at)| {
            let parsed = id.parse::<ArtifactId>().map_err(|e| InventoryError::Corrupt {
                row: id.clone(),
                detail: e.to_string(),
            })?;
            Ok((parsed, at))
        })
        .collect()
}

pub fn count(conn: &Connection, table: &str) -> Result<u64, InventoryError> {
    let n: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))?;
    Ok(u64::try_from(n).unwrap_or_default())
}
