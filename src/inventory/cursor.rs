use std::collections::VecDeque;

use rusqlite::{Connection, params};
use tally_core::Artifact;
use tracing::trace;

use super::InventoryError;
use super::dao::{ARTIFACT_COLUMNS, ArtifactRow};

/// Forward-only cursor over one bucket's located artifacts, ascending by
/// storage id.
///
/// Rows are fetched a page at a time on a dedicated read connection. Each
/// page starts strictly after the last storage id already yielded, so rows
/// inserted or deleted by concurrent commits can only affect locations the
/// cursor has not reached yet. After the first error the cursor is fused.
pub struct ArtifactCursor {
    conn: Connection,
    bucket: String,
    page_size: usize,
    page: VecDeque<ArtifactRow>,
    after: Option<String>,
    done: bool,
}

impl ArtifactCursor {
    pub(super) fn new(conn: Connection, bucket: &str, page_size: usize) -> Self {
        Self {
            conn,
            bucket: bucket.to_owned(),
            page_size: page_size.max(1),
            page: VecDeque::new(),
            after: None,
            done: false,
        }
    }

    fn fetch_page(&mut self) -> Result<(), InventoryError> {
        let limit = i64::try_from(self.page_size).unwrap_or(i64::MAX);
        let mut stmt = self.conn.prepare_cached(&format!(
            "SELECT {ARTIFACT_COLUMNS} FROM artifact
             WHERE storage_bucket = ?1 AND (?2 IS NULL OR storage_id > ?2)
             ORDER BY storage_id
             LIMIT ?3"
        ))?;
        let rows = stmt
            .query_map(params![self.bucket, self.after, limit], ArtifactRow::read)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        trace!(bucket = %self.bucket, after = ?self.after, rows = rows.len(), "inventory page");

        if rows.len() < self.page_size {
            self.done = true;
        }
        if let Some(last) = rows.last() {
            self.after.clone_from(&last.storage_id);
        }
        self.page.extend(rows);
        Ok(())
    }
}

impl Iterator for ArtifactCursor {
    type Item = Result<Artifact, InventoryError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.page.is_empty() && !self.done {
            if let Err(e) = self.fetch_page() {
                self.done = true;
                return Some(Err(e));
            }
        }
        let row = self.page.pop_front()?;
        let artifact = row.into_artifact();
        if artifact.is_err() {
            self.done = true;
            self.page.clear();
        }
        Some(artifact)
    }
}

impl std::fmt::Debug for ArtifactCursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArtifactCursor")
            .field("bucket", &self.bucket)
            .field("after", &self.after)
            .field("buffered", &self.page.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::all, clippy::pedantic, clippy::nursery)]
mod tests {
    use crate::inventory::Inventory;
    use chrono::Utc;
    use tally_core::{Artifact, ArtifactUri, ContentChecksum, StorageLocation};
    use tempfile::TempDir;

    fn seed(inv: &mut Inventory, bucket: &str, id: &str) -> Artifact {
        let mut a = Artifact::new(
            ArtifactUri::new(&format!("test:{bucket}/{id}")).unwrap(),
            ContentChecksum::new("md5:01").unwrap(),
            Utc::now(),
            1,
        );
        a.storage_location = Some(StorageLocation::new(bucket, id).unwrap());
        inv.put_artifact(&a).unwrap();
        a
    }

    fn ids(cursor: crate::inventory::ArtifactCursor) -> Vec<String> {
        cursor
            .map(|a| {
                a.unwrap()
                    .storage_location
                    .unwrap()
                    .storage_id()
                    .to_owned()
            })
            .collect()
    }

    #[test]
    fn yields_one_bucket_in_byte_order_across_pages() {
        let dir = TempDir::new().unwrap();
        let mut inv = Inventory::open(dir.path().join("i.db")).unwrap();
        for id in ["d", "B", "a", "c", "e", "Z"] {
            seed(&mut inv, "b0", id);
        }
        seed(&mut inv, "b1", "a");
        let got = ids(inv.iter_bucket("b0", 2).unwrap());
        assert_eq!(got, vec!["B", "Z", "a", "c", "d", "e"]);
    }

    #[test]
    fn skips_unlocated_artifacts() {
        let dir = TempDir::new().unwrap();
        let mut inv = Inventory::open(dir.path().join("i.db")).unwrap();
        let mut a = seed(&mut inv, "b0", "a");
        seed(&mut inv, "b0", "b");
        a.storage_location = None;
        inv.put_artifact(&a).unwrap();
        assert_eq!(ids(inv.iter_bucket("b0", 10).unwrap()), vec!["b"]);
    }

    #[test]
    fn empty_bucket_yields_nothing() {
        let dir = TempDir::new().unwrap();
        let inv = Inventory::open(dir.path().join("i.db")).unwrap();
        assert!(inv.iter_bucket("nope", 10).unwrap().next().is_none());
    }

    #[test]
    fn commits_behind_the_cursor_do_not_cause_re_yield() {
        let dir = TempDir::new().unwrap();
        let mut inv = Inventory::open(dir.path().join("i.db")).unwrap();
        let a = seed(&mut inv, "b0", "a");
        seed(&mut inv, "b0", "c");
        seed(&mut inv, "b0", "e");

        let mut cursor = inv.iter_bucket("b0", 1).unwrap();
        let first = cursor.next().unwrap().unwrap();
        assert_eq!(first.id, a.id);

        // Replace "a" with a new row at the same location, and add one
        // ahead of the cursor.
        let mut moved = a.clone();
        moved.storage_location = None;
        inv.put_artifact(&moved).unwrap();
        let mut fresh = seed(&mut inv, "b0", "0");
        fresh.storage_location = Some(StorageLocation::new("b0", "a").unwrap());
        fresh.uri = ArtifactUri::new("test:fresh").unwrap();
        inv.put_artifact(&fresh).unwrap();
        seed(&mut inv, "b0", "d");

        let rest: Vec<String> = ids(cursor);
        assert_eq!(rest, vec!["c", "d", "e"]);
    }

    #[test]
    fn corrupt_row_fuses_the_cursor() {
        let dir = TempDir::new().unwrap();
        let mut inv = Inventory::open(dir.path().join("i.db")).unwrap();
        seed(&mut inv, "b0", "a");
        inv.connection()
            .execute(
                "INSERT INTO artifact (id, uri, content_checksum, content_length, last_modified, storage_bucket, storage_id)
                 VALUES ('not-a-uuid', 'test:bad', 'md5:00', 1, ?1, 'b0', 'b')",
                [Utc::now()],
            )
            .unwrap();
        let mut cursor = inv.iter_bucket("b0", 10).unwrap();
        assert!(cursor.next().unwrap().is_ok());
        assert!(cursor.next().unwrap().is_err());
        assert!(cursor.next().is_none());
    }
}
