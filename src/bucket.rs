//! One reconciliation run over one bucket.
//!
//! [`BucketReconciler`] wires a storage adapter, the inventory, a policy,
//! and a report stream into [`engine::run`](crate::engine::run) and returns
//! a [`RunSummary`].

use std::fmt::Write as _;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tally_storage::{StorageAdapter, Subject};
use tracing::{info, warn};

use crate::engine::{self, MergeStats};
use crate::error::ReconcileError;
use crate::inventory::{DEFAULT_PAGE_SIZE, Inventory};
use crate::policy::{DecisionCounts, PolicyKind, PolicyResolver};
use crate::report::Report;
use crate::sink::{GatedSink, InventorySink};

/// Outcome of a completed run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    /// The bucket reconciled.
    pub bucket: String,
    /// The policy applied.
    pub policy: PolicyKind,
    /// Whether corrections were suppressed.
    pub report_only: bool,
    /// When the run started.
    pub started: DateTime<Utc>,
    /// Wall-clock duration.
    pub elapsed_ms: u64,
    /// Merge counters.
    pub merge: MergeStats,
    /// Decision counters.
    pub decisions: DecisionCounts,
    /// Corrections that were decided but not applied (report-only).
    pub suppressed: u64,
}

impl RunSummary {
    /// Multi-line human-readable rendering.
    #[must_use]
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let mode = if self.report_only { " (report-only)" } else { "" };
        let _ = writeln!(out, "bucket {} reconciled with {}{mode}", self.bucket, self.policy);
        let _ = writeln!(
            out,
            "  pulled: {} inventory, {} storage",
            self.merge.inventory_pulled, self.merge.storage_pulled
        );
        let _ = writeln!(
            out,
            "  paired: {} matched, {} inventory-only, {} storage-only",
            self.merge.matched, self.merge.inventory_only, self.merge.storage_only
        );
        let d = &self.decisions;
        let _ = writeln!(out, "  valid: {}  no-action: {}", d.valid, d.no_action);
        let _ = writeln!(
            out,
            "  created: {}  replaced: {}  deleted: {}  reset: {}  markers cleared: {}",
            d.create_artifact, d.replace_artifact, d.delete_artifact, d.reset_artifact, d.delete_obsolete_location
        );
        if self.suppressed > 0 {
            let _ = writeln!(out, "  suppressed: {}", self.suppressed);
        }
        let _ = write!(out, "  elapsed: {} ms", self.elapsed_ms);
        out
    }
}

/// Reconciles one bucket of a storage backend against the inventory.
pub struct BucketReconciler<'a, A: ?Sized> {
    storage: &'a A,
    inventory: &'a mut Inventory,
    bucket: String,
    policy: PolicyKind,
    report_only: bool,
    subject: Subject,
    page_size: usize,
}

impl<'a, A> BucketReconciler<'a, A>
where
    A: StorageAdapter + ?Sized,
{
    /// A live run (corrections applied) as the anonymous subject. The bucket
    /// is trimmed.
    pub fn new(storage: &'a A, inventory: &'a mut Inventory, bucket: &str, policy: PolicyKind) -> Self {
        Self {
            storage,
            inventory,
            bucket: bucket.trim().to_owned(),
            policy,
            report_only: false,
            subject: Subject::anonymous(),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    /// Suppress corrections; decisions are still reported.
    #[must_use]
    pub const fn report_only(mut self, report_only: bool) -> Self {
        self.report_only = report_only;
        self
    }

    /// Run storage requests as `subject`.
    #[must_use]
    pub fn run_as(mut self, subject: Subject) -> Self {
        self.subject = subject;
        self
    }

    /// Inventory cursor page size.
    #[must_use]
    pub const fn page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    /// Run to completion, writing one audit line per comparison to `report`.
    ///
    /// # Errors
    /// Returns the first error; corrections committed before it remain.
    pub fn run<R: Report>(self, report: R) -> Result<RunSummary, ReconcileError> {
        let started = Utc::now();
        let timer = Instant::now();
        info!(
            bucket = %self.bucket,
            policy = %self.policy,
            adapter = self.storage.name(),
            subject = %self.subject,
            report_only = self.report_only,
            "reconcile started"
        );
        if self.report_only {
            warn!(bucket = %self.bucket, "REPORT-ONLY: decisions are reported but no corrections are applied");
        }

        let storage = self.storage.iterate(&self.subject, &self.bucket)?;
        let inventory = self.inventory.iter_bucket(&self.bucket, self.page_size)?;
        let sink = GatedSink::new(InventorySink::new(self.inventory), self.report_only);
        let mut resolver = PolicyResolver::new(self.policy.build(), sink, report);

        let mut merge = MergeStats::default();
        if let Err(e) = engine::run_into(storage, inventory, &mut resolver, &mut merge) {
            warn!(
                bucket = %self.bucket,
                resolved = merge.resolved(),
                inventory_pulled = merge.inventory_pulled,
                storage_pulled = merge.storage_pulled,
                error = %e,
                "reconcile aborted"
            );
            return Err(e);
        }
        let (sink, _report, decisions) = resolver.into_parts();

        let summary = RunSummary {
            bucket: self.bucket,
            policy: self.policy,
            report_only: self.report_only,
            started,
            elapsed_ms: u64::try_from(timer.elapsed().as_millis()).unwrap_or(u64::MAX),
            merge,
            decisions,
            suppressed: sink.suppressed(),
        };
        info!(
            bucket = %summary.bucket,
            resolved = summary.merge.resolved(),
            corrections = summary.decisions.corrections(),
            suppressed = summary.suppressed,
            elapsed_ms = summary.elapsed_ms,
            "reconcile finished"
        );
        Ok(summary)
    }
}

#[cfg(test)]
#[allow(clippy::all, clippy::pedantic, clippy::nursery)]
mod tests {
    use super::*;

    fn summary() -> RunSummary {
        RunSummary {
            bucket: "a1".into(),
            policy: PolicyKind::StorageIsAlwaysRight,
            report_only: true,
            started: Utc::now(),
            elapsed_ms: 12,
            merge: MergeStats {
                inventory_pulled: 3,
                storage_pulled: 2,
                matched: 2,
                inventory_only: 1,
                storage_only: 0,
            },
            decisions: DecisionCounts {
                valid: 1,
                replace_artifact: 1,
                delete_artifact: 1,
                ..DecisionCounts::default()
            },
            suppressed: 2,
        }
    }

    #[test]
    fn text_summary_mentions_mode_and_counts() {
        let text = summary().render_text();
        assert!(text.starts_with("bucket a1 reconciled with storage-is-always-right (report-only)"));
        assert!(text.contains("2 matched, 1 inventory-only, 0 storage-only"));
        assert!(text.contains("suppressed: 2"));
    }

    #[test]
    fn json_summary_uses_config_names() {
        let json = serde_json::to_value(summary()).unwrap();
        assert_eq!(json["policy"], "storage-is-always-right");
        assert_eq!(json["merge"]["matched"], 2);
        assert_eq!(json["decisions"]["replace_artifact"], 1);
    }
}
