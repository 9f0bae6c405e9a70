use tally_core::{Artifact, StorageMetadata};

use super::{Action, Decision, Reason, ResolutionPolicy};
use crate::error::ReconcileError;

/// The storage backend is authoritative.
///
/// Evaluated in order:
///
/// | artifact | storage           | action                               |
/// |----------|-------------------|--------------------------------------|
/// | present  | absent or invalid | delete the artifact                  |
/// | absent   | absent or invalid | nothing (still reported)             |
/// | absent   | valid             | create an artifact from the record   |
/// | present  | valid, different  | replace the artifact                 |
/// | present  | valid, equal      | nothing, `valid`                     |
#[derive(Clone, Copy, Debug, Default)]
pub struct StorageIsAlwaysRight;

impl StorageIsAlwaysRight {
    /// Configuration and report name.
    pub const NAME: &'static str = "storage-is-always-right";
}

impl ResolutionPolicy for StorageIsAlwaysRight {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn decide(
        &self,
        artifact: Option<&Artifact>,
        storage: Option<&StorageMetadata>,
    ) -> Result<Decision, ReconcileError> {
        let Some(s) = storage.filter(|s| s.is_valid()) else {
            let reason = if storage.is_some() {
                Reason::InvalidStorageLocation
            } else {
                Reason::NoMatchingStorageLocation
            };
            return match (artifact, storage) {
                (None, None) => Err(ReconcileError::NothingToResolve),
                (Some(_), _) => Ok(Decision::because(Action::DeleteArtifact, reason)),
                (None, Some(_)) => Ok(Decision::because(Action::NoAction, reason)),
            };
        };
        let Some(a) = artifact else {
            return Ok(Decision::because(Action::CreateArtifact, Reason::NoMatchingArtifact));
        };
        let diff = a.differences(s);
        if diff.is_empty() {
            Ok(Decision::valid())
        } else {
            Ok(Decision::because(Action::ReplaceArtifact, Reason::MetadataMismatch(diff)))
        }
    }
}
