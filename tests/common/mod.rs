//! Shared helpers for tally integration tests.
//!
//! Every fixture lives in its own temp directory: a filesystem storage root
//! with a single bucket and an inventory database next to it.

#![allow(dead_code)]

use chrono::Utc;
use tally::core::{Artifact, ArtifactUri, ContentChecksum, StorageLocation, StorageMetadata};
use tally::inventory::Inventory;
use tally::policy::PolicyKind;
use tally::storage::{FileSystemStorage, ObjectSidecar, StorageAdapter, Subject};
use tally::{BucketReconciler, ReconcileError, RunSummary};
use tempfile::TempDir;

/// The bucket every fixture reconciles.
pub const BUCKET: &str = "b0";

/// A storage root plus an inventory, both under one temp dir.
pub struct Fixture {
    _dir: TempDir,
    pub storage: FileSystemStorage,
    pub inventory: Inventory,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = TempDir::new().expect("failed to create temp dir");
        let root = dir.path().join("store");
        std::fs::create_dir_all(root.join(BUCKET)).expect("failed to create bucket dir");
        let storage = FileSystemStorage::new(root);
        let inventory = Inventory::open(dir.path().join("inventory.db")).expect("failed to open inventory");
        Self {
            _dir: dir,
            storage,
            inventory,
        }
    }

    /// Store `bytes` as `id`, with a back-reference to `uri` when given, and
    /// return the backend's observation of it.
    pub fn store(&self, id: &str, bytes: &[u8], uri: Option<&str>) -> StorageMetadata {
        let sidecar = uri.map(|u| ObjectSidecar::for_artifact(self::uri(u)));
        self.storage
            .put_object(BUCKET, id, bytes, sidecar.as_ref())
            .expect("put_object failed");
        self.observe(id)
    }

    /// The backend's current observation of `id`.
    pub fn observe(&self, id: &str) -> StorageMetadata {
        let target = loc(id);
        self.storage
            .iterate(&Subject::anonymous(), BUCKET)
            .expect("iterate failed")
            .map(|r| r.expect("storage cursor failed"))
            .find(|m| m.storage_location == target)
            .unwrap_or_else(|| panic!("object {id} not found"))
    }

    /// Record an artifact that agrees with `stored`.
    pub fn track(&mut self, uri: &str, stored: &StorageMetadata) -> Artifact {
        let artifact = Artifact::from_storage(self::uri(uri), stored, Utc::now())
            .expect("observation has no checksum or length");
        self.inventory.put_artifact(&artifact).expect("put_artifact failed");
        artifact
    }

    /// Record an artifact claiming `id` with made-up content.
    pub fn track_unbacked(&mut self, uri: &str, id: &str) -> Artifact {
        let mut artifact = Artifact::new(self::uri(uri), checksum("0123abcd"), Utc::now(), 8);
        artifact.storage_location = Some(loc(id));
        self.inventory.put_artifact(&artifact).expect("put_artifact failed");
        artifact
    }

    /// Run one reconciliation and collect its audit lines.
    pub fn try_reconcile(
        &mut self,
        policy: PolicyKind,
        report_only: bool,
    ) -> (Result<RunSummary, ReconcileError>, Vec<String>) {
        let mut lines = Vec::new();
        let result = BucketReconciler::new(&self.storage, &mut self.inventory, BUCKET, policy)
            .report_only(report_only)
            .page_size(2)
            .run(&mut lines);
        (result, lines)
    }

    pub fn reconcile(&mut self, policy: PolicyKind, report_only: bool) -> (RunSummary, Vec<String>) {
        let (result, lines) = self.try_reconcile(policy, report_only);
        (result.expect("reconcile failed"), lines)
    }
}

pub fn loc(id: &str) -> StorageLocation {
    StorageLocation::new(BUCKET, id).expect("invalid location")
}

pub fn uri(s: &str) -> ArtifactUri {
    ArtifactUri::new(s).expect("invalid uri")
}

pub fn checksum(hex: &str) -> ContentChecksum {
    ContentChecksum::new(&format!("sha256:{hex}")).expect("invalid checksum")
}

/// The action word of an audit line (the token after the policy name).
pub fn action(line: &str) -> &str {
    line.split(' ').nth(1).unwrap_or("")
}
