//! Core data model for tally.
//!
//! Everything the reconciliation engine compares lives here:
//!
//! - [`types`]: validated value types ([`StorageLocation`], [`ArtifactId`],
//!   [`ArtifactUri`], [`ContentChecksum`]) and the [`ValidationError`] they
//!   return.
//! - [`artifact`]: the two record shapes being reconciled ([`Artifact`] from
//!   the inventory, [`StorageMetadata`] from the backend) plus the tombstone
//!   and deletion-event rows written alongside corrections.
//!
//! This crate performs no I/O.

pub mod artifact;
pub mod types;

pub use artifact::{
    Artifact, DeletedArtifactEvent, DeletedStorageLocationEvent, MetadataField,
    ObsoleteStorageLocation, StorageMetadata,
};
pub use types::{
    ArtifactId, ArtifactUri, ContentChecksum, ErrorKind, StorageLocation, ValidationError,
};
