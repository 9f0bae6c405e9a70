use tally_core::{Artifact, StorageMetadata};

use super::{Action, Decision, Reason, ResolutionPolicy};
use crate::error::ReconcileError;

/// The inventory is authoritative.
///
/// An artifact whose bytes are missing, untrustworthy, or different is kept
/// but reset (its location cleared) so it can be re-ingested. A stored
/// object nobody claims only has its obsolete-location marker cleared; the
/// bytes themselves are left for a separate cleanup pass.
#[derive(Clone, Copy, Debug, Default)]
pub struct InventoryIsAlwaysRight;

impl InventoryIsAlwaysRight {
    /// Configuration and report name.
    pub const NAME: &'static str = "inventory-is-always-right";
}

impl ResolutionPolicy for InventoryIsAlwaysRight {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn decide(
        &self,
        artifact: Option<&Artifact>,
        storage: Option<&StorageMetadata>,
    ) -> Result<Decision, ReconcileError> {
        match (artifact, storage) {
            (None, None) => Err(ReconcileError::NothingToResolve),
            (None, Some(_)) => Ok(Decision::because(
                Action::DeleteObsoleteLocation,
                Reason::NoMatchingArtifact,
            )),
            (Some(_), None) => Ok(Decision::because(
                Action::ResetArtifact,
                Reason::NoMatchingStorageLocation,
            )),
            (Some(_), Some(s)) if !s.is_valid() => Ok(Decision::because(
                Action::ResetArtifact,
                Reason::InvalidStorageLocation,
            )),
            (Some(a), Some(s)) => {
                let diff = a.differences(s);
                if diff.is_empty() {
                    Ok(Decision::valid())
                } else {
                    Ok(Decision::because(Action::ResetArtifact, Reason::MetadataMismatch(diff)))
                }
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::all, clippy::pedantic, clippy::nursery)]
mod tests {
    use super::*;
    use crate::engine::tests::{artifact, loc, stored};

    fn decide(a: Option<&Artifact>, s: Option<&StorageMetadata>) -> Decision {
        InventoryIsAlwaysRight.decide(a, s).unwrap()
    }

    #[test]
    fn missing_bytes_reset_the_artifact() {
        assert_eq!(
            decide(Some(&artifact("a")), None),
            Decision::because(Action::ResetArtifact, Reason::NoMatchingStorageLocation)
        );
        assert_eq!(
            decide(Some(&artifact("a")), Some(&StorageMetadata::invalid(loc("a")))),
            Decision::because(Action::ResetArtifact, Reason::InvalidStorageLocation)
        );
    }

    #[test]
    fn unclaimed_object_clears_marker_regardless_of_validity() {
        for s in [stored("a"), StorageMetadata::invalid(loc("a"))] {
            assert_eq!(
                decide(None, Some(&s)),
                Decision::because(Action::DeleteObsoleteLocation, Reason::NoMatchingArtifact)
            );
        }
    }

    #[test]
    fn drift_resets_and_agreement_is_valid() {
        let mut s = stored("a");
        s.content_length = Some(99);
        assert_eq!(decide(Some(&artifact("a")), Some(&s)).action, Action::ResetArtifact);
        assert_eq!(decide(Some(&artifact("a")), Some(&stored("a"))), Decision::valid());
    }

    #[test]
    fn nothing_is_an_error() {
        assert!(InventoryIsAlwaysRight.decide(None, None).is_err());
    }
}
