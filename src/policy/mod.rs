//! Resolution policies: what to do with each pair the engine produces.
//!
//! A [`ResolutionPolicy`] is a pure decision function from
//! `(Option<&Artifact>, Option<&StorageMetadata>)` to a [`Decision`].
//! [`PolicyResolver`] binds a policy to an [`EventSink`] and a [`Report`]
//! stream and implements the engine's [`Resolve`] seam: for every call it
//! decides, writes one audit line, then applies the decision through the
//! sink. The audit line is written even when the sink is gated off.
//!
//! Two policies are built in, selected by [`PolicyKind`]:
//!
//! - [`StorageIsAlwaysRight`]: the backend is authoritative; the inventory
//!   is corrected to match it.
//! - [`InventoryIsAlwaysRight`]: the inventory is authoritative; artifacts
//!   whose bytes are missing or wrong are reset for re-ingest.

mod inventory_is_always_right;
mod storage_is_always_right;

use std::fmt::{self, Write as _};

use serde::{Deserialize, Serialize};
use tally_core::{Artifact, MetadataField, StorageMetadata};
use tracing::debug;

use crate::engine::Resolve;
use crate::error::ReconcileError;
use crate::report::Report;
use crate::sink::EventSink;

pub use inventory_is_always_right::InventoryIsAlwaysRight;
pub use storage_is_always_right::StorageIsAlwaysRight;

// ---------------------------------------------------------------------------
// Decision
// ---------------------------------------------------------------------------

/// The single corrective action chosen for one comparison.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Action {
    /// Both sides agree; nothing to do.
    Valid,
    /// Nothing to do, but the comparison is still reported.
    NoAction,
    /// [`EventSink::delete_artifact`].
    DeleteArtifact,
    /// [`EventSink::create_artifact`].
    CreateArtifact,
    /// [`EventSink::replace_artifact`].
    ReplaceArtifact,
    /// [`EventSink::reset_artifact`].
    ResetArtifact,
    /// [`EventSink::delete_obsolete_location`].
    DeleteObsoleteLocation,
}

impl Action {
    /// Name used in audit lines.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Valid => "valid",
            Self::NoAction => "no-action",
            Self::DeleteArtifact => "delete-artifact",
            Self::CreateArtifact => "create-artifact",
            Self::ReplaceArtifact => "replace-artifact",
            Self::ResetArtifact => "reset-artifact",
            Self::DeleteObsoleteLocation => "delete-obsolete-location",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why an action was chosen.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Reason {
    /// An artifact has no storage record at its location.
    NoMatchingStorageLocation,
    /// The storage record at the location is not trustworthy.
    InvalidStorageLocation,
    /// A storage record has no artifact at its location.
    NoMatchingArtifact,
    /// Both exist but these fields disagree.
    MetadataMismatch(Vec<MetadataField>),
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoMatchingStorageLocation => f.write_str("no-matching-storage-location"),
            Self::InvalidStorageLocation => f.write_str("invalid-storage-location"),
            Self::NoMatchingArtifact => f.write_str("no-matching-artifact"),
            Self::MetadataMismatch(fields) => {
                f.write_str("metadata-mismatch")?;
                for (i, field) in fields.iter().enumerate() {
                    f.write_char(if i == 0 { ':' } else { ',' })?;
                    write!(f, "{field}")?;
                }
                Ok(())
            }
        }
    }
}

/// A policy's verdict on one comparison.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Decision {
    /// What to do.
    pub action: Action,
    /// Why, when there is something to explain.
    pub reason: Option<Reason>,
}

impl Decision {
    /// A decision with a reason.
    #[must_use]
    pub const fn because(action: Action, reason: Reason) -> Self {
        Self {
            action,
            reason: Some(reason),
        }
    }

    /// The "both sides agree" decision.
    #[must_use]
    pub const fn valid() -> Self {
        Self {
            action: Action::Valid,
            reason: None,
        }
    }
}

// ---------------------------------------------------------------------------
// ResolutionPolicy
// ---------------------------------------------------------------------------

/// A decision function over one comparison.
pub trait ResolutionPolicy {
    /// Name used in audit lines and configuration.
    fn name(&self) -> &'static str;

    /// Choose exactly one action.
    ///
    /// # Errors
    /// Returns [`ReconcileError::NothingToResolve`] when both arguments are
    /// `None`.
    fn decide(
        &self,
        artifact: Option<&Artifact>,
        storage: Option<&StorageMetadata>,
    ) -> Result<Decision, ReconcileError>;
}

/// Built-in policy selector.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum PolicyKind {
    /// [`StorageIsAlwaysRight`].
    StorageIsAlwaysRight,
    /// [`InventoryIsAlwaysRight`].
    InventoryIsAlwaysRight,
}

impl PolicyKind {
    /// Instantiate the policy.
    #[must_use]
    pub fn build(self) -> Box<dyn ResolutionPolicy> {
        match self {
            Self::StorageIsAlwaysRight => Box::new(StorageIsAlwaysRight),
            Self::InventoryIsAlwaysRight => Box::new(InventoryIsAlwaysRight),
        }
    }

    /// The configuration name (`storage-is-always-right`, …).
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::StorageIsAlwaysRight => StorageIsAlwaysRight::NAME,
            Self::InventoryIsAlwaysRight => InventoryIsAlwaysRight::NAME,
        }
    }
}

impl fmt::Display for PolicyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl<P: ResolutionPolicy + ?Sized> ResolutionPolicy for Box<P> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn decide(
        &self,
        artifact: Option<&Artifact>,
        storage: Option<&StorageMetadata>,
    ) -> Result<Decision, ReconcileError> {
        (**self).decide(artifact, storage)
    }
}

// ---------------------------------------------------------------------------
// Audit line
// ---------------------------------------------------------------------------

/// Format the audit line for one decision.
///
/// `<policy> <action> [id=<artifact id>] [uri=<artifact uri>] [loc=<location>] [reason=<code>]`
///
/// The uri comes from the artifact, or from the storage record's
/// back-reference when there is no artifact. The location comes from the
/// storage record, or from the artifact when there is no storage record.
#[must_use]
pub fn report_line(
    policy: &str,
    decision: &Decision,
    artifact: Option<&Artifact>,
    storage: Option<&StorageMetadata>,
) -> String {
    let mut line = format!("{policy} {}", decision.action);
    if let Some(a) = artifact {
        let _ = write!(line, " id={} uri={}", a.id, a.uri);
    } else if let Some(uri) = storage.and_then(|s| s.artifact_uri.as_ref()) {
        let _ = write!(line, " uri={uri}");
    }
    let loc = storage
        .map(|s| &s.storage_location)
        .or_else(|| artifact.and_then(|a| a.storage_location.as_ref()));
    if let Some(loc) = loc {
        let _ = write!(line, " loc={loc}");
    }
    if let Some(reason) = &decision.reason {
        let _ = write!(line, " reason={reason}");
    }
    line
}

// ---------------------------------------------------------------------------
// DecisionCounts
// ---------------------------------------------------------------------------

/// Number of decisions of each kind made during a run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[allow(missing_docs)]
pub struct DecisionCounts {
    pub valid: u64,
    pub no_action: u64,
    pub delete_artifact: u64,
    pub create_artifact: u64,
    pub replace_artifact: u64,
    pub reset_artifact: u64,
    pub delete_obsolete_location: u64,
}

impl DecisionCounts {
    fn record(&mut self, action: Action) {
        let slot = match action {
            Action::Valid => &mut self.valid,
            Action::NoAction => &mut self.no_action,
            Action::DeleteArtifact => &mut self.delete_artifact,
            Action::CreateArtifact => &mut self.create_artifact,
            Action::ReplaceArtifact => &mut self.replace_artifact,
            Action::ResetArtifact => &mut self.reset_artifact,
            Action::DeleteObsoleteLocation => &mut self.delete_obsolete_location,
        };
        *slot += 1;
    }

    /// Decisions that requested a mutation.
    #[must_use]
    pub const fn corrections(&self) -> u64 {
        self.delete_artifact
            + self.create_artifact
            + self.replace_artifact
            + self.reset_artifact
            + self.delete_obsolete_location
    }
}

// ---------------------------------------------------------------------------
// PolicyResolver
// ---------------------------------------------------------------------------

/// Binds a policy to a sink and a report stream.
pub struct PolicyResolver<P, S, R> {
    policy: P,
    sink: S,
    report: R,
    counts: DecisionCounts,
}

impl<P, S, R> PolicyResolver<P, S, R>
where
    P: ResolutionPolicy,
    S: EventSink,
    R: Report,
{
    /// Decide with `policy`, apply through `sink`, report to `report`.
    #[must_use]
    pub fn new(policy: P, sink: S, report: R) -> Self {
        Self {
            policy,
            sink,
            report,
            counts: DecisionCounts::default(),
        }
    }

    /// Decisions made so far.
    #[must_use]
    pub const fn counts(&self) -> &DecisionCounts {
        &self.counts
    }

    /// Release the sink and report stream.
    #[must_use]
    pub fn into_parts(self) -> (S, R, DecisionCounts) {
        (self.sink, self.report, self.counts)
    }

    fn apply(
        &mut self,
        action: Action,
        artifact: Option<&Artifact>,
        storage: Option<&StorageMetadata>,
    ) -> Result<(), ReconcileError> {
        let policy = self.policy.name();
        let need_artifact = || {
            artifact.ok_or_else(|| ReconcileError::Policy {
                policy,
                detail: format!("{action} chosen without an artifact"),
            })
        };
        let need_storage = || {
            storage.ok_or_else(|| ReconcileError::Policy {
                policy,
                detail: format!("{action} chosen without a storage record"),
            })
        };
        match action {
            Action::Valid | Action::NoAction => {}
            Action::DeleteArtifact => self.sink.delete_artifact(need_artifact()?)?,
            Action::CreateArtifact => self.sink.create_artifact(need_storage()?)?,
            Action::ReplaceArtifact => self
                .sink
                .replace_artifact(need_artifact()?, need_storage()?)?,
            Action::ResetArtifact => self.sink.reset_artifact(need_artifact()?)?,
            Action::DeleteObsoleteLocation => {
                self.sink.delete_obsolete_location(need_storage()?)?;
            }
        }
        Ok(())
    }
}

impl<P, S, R> Resolve for PolicyResolver<P, S, R>
where
    P: ResolutionPolicy,
    S: EventSink,
    R: Report,
{
    fn resolve(
        &mut self,
        artifact: Option<&Artifact>,
        storage: Option<&StorageMetadata>,
    ) -> Result<(), ReconcileError> {
        if artifact.is_none() && storage.is_none() {
            return Err(ReconcileError::NothingToResolve);
        }
        let decision = self.policy.decide(artifact, storage)?;
        let line = report_line(self.policy.name(), &decision, artifact, storage);
        self.report.report(&line).map_err(ReconcileError::Report)?;
        debug!(action = %decision.action, "decided");
        self.apply(decision.action, artifact, storage)?;
        self.counts.record(decision.action);
        Ok(())
    }
}

impl<P, S, R> fmt::Debug for PolicyResolver<P, S, R>
where
    P: ResolutionPolicy,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PolicyResolver")
            .field("policy", &self.policy.name())
            .field("counts", &self.counts)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
