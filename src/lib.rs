//! tally: reconcile an artifact inventory against a storage backend.
//!
//! A run walks one bucket of a storage backend and the matching slice of
//! the inventory database in lock-step, both sorted by storage location, and
//! hands every pair to a resolution policy. The policy reports one audit
//! line per pair and asks an event sink to correct the inventory.
//!
//! # Crate layout
//!
//! - [`engine`]: the sorted two-pointer merge and the [`Resolve`](engine::Resolve) seam.
//! - [`policy`]: decision functions and the resolver that applies them.
//! - [`sink`]: the five transactional corrections, plus the report-only gate.
//! - [`inventory`]: the SQLite inventory database and its keyset cursor.
//! - [`bucket`]: the run driver and its summary.
//! - [`config`]: `tally.toml` and command-line overrides.
//! - [`report`]: the audit line stream.
//! - [`error`]: [`ReconcileError`].
//!
//! Value types live in `tally-core`; storage adapters in `tally-storage`.

pub mod bucket;
pub mod config;
pub mod engine;
pub mod error;
pub mod inventory;
pub mod policy;
pub mod report;
pub mod sink;

pub use bucket::{BucketReconciler, RunSummary};
pub use error::ReconcileError;
pub use tally_core as core;
pub use tally_storage as storage;
