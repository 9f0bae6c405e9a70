use chrono::Utc;
use tally_core::{Artifact, ObsoleteStorageLocation, StorageLocation, StorageMetadata};
use tracing::{debug, warn};

use super::{EventSink, SinkError};
use crate::inventory::dao::{self, EventTable};
use crate::inventory::{Inventory, InventoryError};

/// Applies corrections to the SQLite inventory, one immediate transaction
/// per operation.
#[derive(Debug)]
pub struct InventorySink<'a> {
    inventory: &'a mut Inventory,
}

impl<'a> InventorySink<'a> {
    /// Write corrections through `inventory`'s connection.
    pub const fn new(inventory: &'a mut Inventory) -> Self {
        Self { inventory }
    }
}

/// Map a constraint violation to [`SinkError::Conflict`].
fn classify(operation: &'static str, location: &StorageLocation, err: InventoryError) -> SinkError {
    if err.is_constraint_violation() {
        SinkError::Conflict {
            operation,
            location: location.clone(),
            source: err,
        }
    } else {
        SinkError::Inventory(err)
    }
}

fn require_location<'b>(artifact: &'b Artifact, fallback: &'b StorageLocation) -> &'b StorageLocation {
    artifact.storage_location.as_ref().unwrap_or(fallback)
}

impl EventSink for InventorySink<'_> {
    fn reset_artifact(&mut self, artifact: &Artifact) -> Result<(), SinkError> {
        let mut reset = artifact.clone();
        reset.storage_location = None;
        reset.last_modified = Utc::now();
        let at = reset.last_modified;
        self.inventory
            .with_transaction(|tx| {
                dao::put_artifact(tx, &reset)?;
                dao::put_event(tx, EventTable::DeletedStorageLocation, reset.id, at)
            })
            .map_err(SinkError::from)?;
        debug!(id = %artifact.id, "artifact reset");
        Ok(())
    }

    fn delete_obsolete_location(&mut self, storage: &StorageMetadata) -> Result<(), SinkError> {
        let removed = self
            .inventory
            .with_transaction(|tx| dao::delete_obsolete(tx, &storage.storage_location))?;
        debug!(loc = %storage.storage_location, removed, "obsolete marker cleared");
        Ok(())
    }

    fn delete_artifact(&mut self, artifact: &Artifact) -> Result<(), SinkError> {
        let at = Utc::now();
        self.inventory.with_transaction(|tx| {
            dao::delete_artifact(tx, artifact.id)?;
            dao::put_event(tx, EventTable::DeletedArtifact, artifact.id, at)
        })?;
        debug!(id = %artifact.id, "artifact deleted");
        Ok(())
    }

    fn create_artifact(&mut self, storage: &StorageMetadata) -> Result<(), SinkError> {
        let loc = &storage.storage_location;
        let Some(uri) = storage.artifact_uri.clone() else {
            warn!(
                loc = %loc,
                "cannot create artifact: stored object carries no artifact uri; \
                 it will be seen again on later runs and likely needs manual attention"
            );
            return Ok(());
        };
        let last_modified = storage.content_last_modified.unwrap_or_else(Utc::now);
        let Some(artifact) = Artifact::from_storage(uri, storage, last_modified) else {
            warn!(loc = %loc, "cannot create artifact: stored object has no checksum or length");
            return Ok(());
        };
        self.inventory
            .with_transaction(|tx| dao::insert_artifact(tx, &artifact))
            .map_err(|e| classify("create_artifact", loc, e))?;
        debug!(id = %artifact.id, uri = %artifact.uri, loc = %loc, "artifact created");
        Ok(())
    }

    fn replace_artifact(&mut self, artifact: &Artifact, storage: &StorageMetadata) -> Result<(), SinkError> {
        let loc = &storage.storage_location;
        let Some(replacement) = Artifact::from_storage(artifact.uri.clone(), storage, Utc::now()) else {
            warn!(loc = %loc, id = %artifact.id, "cannot replace artifact: stored object has no checksum or length");
            return Ok(());
        };
        let marker = ObsoleteStorageLocation::new(require_location(artifact, loc).clone());
        let at = Utc::now();
        self.inventory
            .with_transaction(|tx| {
                dao::put_obsolete(tx, &marker)?;
                dao::delete_artifact(tx, artifact.id)?;
                dao::put_event(tx, EventTable::DeletedArtifact, artifact.id, at)?;
                dao::insert_artifact(tx, &replacement)
            })
            .map_err(|e| classify("replace_artifact", loc, e))?;
        debug!(old = %artifact.id, new = %replacement.id, loc = %loc, "artifact replaced");
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::all, clippy::pedantic, clippy::nursery)]
mod tests {
    use super::*;
    use tally_core::{ArtifactUri, ContentChecksum};
    use tempfile::TempDir;

    fn loc(id: &str) -> StorageLocation {
        StorageLocation::new("b0", id).unwrap()
    }

    fn sum(hex: &str) -> ContentChecksum {
        ContentChecksum::new(&format!("md5:{hex}")).unwrap()
    }

    fn seeded(id: &str) -> (TempDir, Inventory, Artifact) {
        let dir = TempDir::new().unwrap();
        let mut inv = Inventory::open(dir.path().join("i.db")).unwrap();
        let mut a = Artifact::new(
            ArtifactUri::new(&format!("test:{id}")).unwrap(),
            sum("aa"),
            Utc::now(),
            10,
        );
        a.storage_location = Some(loc(id));
        inv.put_artifact(&a).unwrap();
        (dir, inv, a)
    }

    #[test]
    fn reset_clears_location_and_records_event() {
        let (_dir, mut inv, a) = seeded("x");
        InventorySink::new(&mut inv).reset_artifact(&a).unwrap();
        let row = inv.get_artifact(a.id).unwrap().unwrap();
        assert!(row.storage_location.is_none());
        assert_eq!(row.uri, a.uri);
        assert!(row.last_modified >= a.last_modified);
        let events = inv.deleted_storage_location_events().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].id, a.id);
    }

    #[test]
    fn delete_removes_row_and_records_event() {
        let (_dir, mut inv, a) = seeded("x");
        InventorySink::new(&mut inv).delete_artifact(&a).unwrap();
        assert!(inv.get_artifact(a.id).unwrap().is_none());
        assert_eq!(inv.deleted_artifact_events().unwrap()[0].id, a.id);
    }

    #[test]
    fn create_uses_backreference_and_storage_timestamp() {
        let dir = TempDir::new().unwrap();
        let mut inv = Inventory::open(dir.path().join("i.db")).unwrap();
        let mut s = StorageMetadata::new(loc("y"), sum("bb"), 3);
        s.artifact_uri = Some(ArtifactUri::new("test:y").unwrap());
        let stamp = Utc::now() - chrono::Duration::days(2);
        s.content_last_modified = Some(stamp);
        InventorySink::new(&mut inv).create_artifact(&s).unwrap();
        let row = inv.get_by_location(&loc("y")).unwrap().unwrap();
        assert_eq!(row.uri.as_str(), "test:y");
        assert_eq!(row.content_checksum, sum("bb"));
        assert_eq!(row.last_modified, stamp);
    }

    #[test]
    fn create_without_uri_is_a_no_op() {
        let dir = TempDir::new().unwrap();
        let mut inv = Inventory::open(dir.path().join("i.db")).unwrap();
        let s = StorageMetadata::new(loc("y"), sum("bb"), 3);
        InventorySink::new(&mut inv).create_artifact(&s).unwrap();
        assert_eq!(inv.count_artifacts().unwrap(), 0);
    }

    #[test]
    fn create_with_taken_uri_is_a_conflict() {
        let (_dir, mut inv, a) = seeded("x");
        let mut s = StorageMetadata::new(loc("y"), sum("bb"), 3);
        s.artifact_uri = Some(a.uri.clone());
        let err = InventorySink::new(&mut inv).create_artifact(&s).unwrap_err();
        assert!(matches!(err, SinkError::Conflict { operation: "create_artifact", .. }), "{err}");
        assert!(!err.is_transient());
        assert_eq!(inv.count_artifacts().unwrap(), 1);
    }

    #[test]
    fn replace_swaps_rows_atomically() {
        let (_dir, mut inv, a) = seeded("x");
        let mut s = StorageMetadata::new(loc("x"), sum("cc"), 11);
        s.content_type = Some("text/plain".into());
        InventorySink::new(&mut inv).replace_artifact(&a, &s).unwrap();

        assert!(inv.get_artifact(a.id).unwrap().is_none());
        let new = inv.get_by_location(&loc("x")).unwrap().unwrap();
        assert_ne!(new.id, a.id);
        assert_eq!(new.uri, a.uri);
        assert_eq!(new.content_checksum, sum("cc"));
        assert_eq!(new.content_length, 11);
        assert_eq!(new.content_type.as_deref(), Some("text/plain"));
        assert!(inv.obsolete_location(&loc("x")).unwrap().is_some());
        assert_eq!(inv.deleted_artifact_events().unwrap()[0].id, a.id);
    }

    #[test]
    fn delete_obsolete_location_clears_marker() {
        let (_dir, mut inv, _a) = seeded("x");
        inv.put_obsolete_location(&ObsoleteStorageLocation::new(loc("z")))
            .unwrap();
        let s = StorageMetadata::invalid(loc("z"));
        InventorySink::new(&mut inv)
            .delete_obsolete_location(&s)
            .unwrap();
        assert!(inv.obsolete_location(&loc("z")).unwrap().is_none());
        // No marker present is fine too.
        InventorySink::new(&mut inv)
            .delete_obsolete_location(&s)
            .unwrap();
    }
}
