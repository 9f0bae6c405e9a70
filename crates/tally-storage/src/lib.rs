//! Storage backend abstraction for tally.
//!
//! This crate defines the [`StorageAdapter`] trait, the single interface
//! through which the reconciler pulls a bucket's stored objects as a sorted
//! stream of [`StorageMetadata`](tally_core::StorageMetadata).
//!
//! # Crate layout
//!
//! - [`adapter`]: the [`StorageAdapter`] trait and the [`Subject`] passed to it.
//! - [`fs`]: [`FileSystemStorage`], a directory-tree backend.
//! - [`error`]: the [`StorageError`] enum returned by adapters and cursors.

pub mod adapter;
pub mod error;
pub mod fs;

pub use adapter::{StorageAdapter, StorageIter, Subject};
pub use error::StorageError;
pub use fs::{FileSystemStorage, ObjectSidecar};
