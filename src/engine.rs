//! The sorted two-pointer merge that pairs inventory records with storage
//! observations.
//!
//! Both inputs are forward-only sequences in strictly ascending
//! [`StorageLocation`] order. The engine holds at most one pulled-but-not-yet
//! resolved element per side and hands every element to a [`Resolve`]
//! implementation exactly once:
//!
//! | inventory key vs storage key | call                      | advances  |
//! |------------------------------|---------------------------|-----------|
//! | equal                        | `resolve(Some(a), Some(s))` | both      |
//! | less                         | `resolve(Some(a), None)`    | inventory |
//! | greater                      | `resolve(None, Some(s))`    | storage   |
//!
//! Once one side is exhausted the other is drained against `None`.
//!
//! # Fail-stop
//!
//! The first error (a failed pull, an order violation, or an error from the
//! resolver) ends the run. Nothing is retried and no further element is
//! pulled from either side.

use std::cmp::Ordering;
use std::iter::Fuse;

use serde::Serialize;
use tally_core::{Artifact, StorageLocation, StorageMetadata};
use tracing::debug;

use crate::error::{ReconcileError, Side};

// ---------------------------------------------------------------------------
// Resolve
// ---------------------------------------------------------------------------

/// Receives each paired (or unpaired) element from [`run`].
///
/// The engine guarantees that at least one argument is `Some` and that calls
/// arrive in ascending location order.
pub trait Resolve {
    /// Handle one comparison.
    ///
    /// # Errors
    /// Any error aborts the run.
    fn resolve(
        &mut self,
        artifact: Option<&Artifact>,
        storage: Option<&StorageMetadata>,
    ) -> Result<(), ReconcileError>;
}

impl<F> Resolve for F
where
    F: FnMut(Option<&Artifact>, Option<&StorageMetadata>) -> Result<(), ReconcileError>,
{
    fn resolve(
        &mut self,
        artifact: Option<&Artifact>,
        storage: Option<&StorageMetadata>,
    ) -> Result<(), ReconcileError> {
        self(artifact, storage)
    }
}

// ---------------------------------------------------------------------------
// MergeStats
// ---------------------------------------------------------------------------

/// Counters for one merge.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct MergeStats {
    /// Elements pulled from the inventory sequence.
    pub inventory_pulled: u64,
    /// Elements pulled from the storage sequence.
    pub storage_pulled: u64,
    /// Calls with both sides present.
    pub matched: u64,
    /// Calls with only an artifact.
    pub inventory_only: u64,
    /// Calls with only a storage record.
    pub storage_only: u64,
}

impl MergeStats {
    /// Total number of resolve calls.
    #[must_use]
    pub const fn resolved(&self) -> u64 {
        self.matched + self.inventory_only + self.storage_only
    }
}

// ---------------------------------------------------------------------------
// Lookahead
// ---------------------------------------------------------------------------

/// An element that carries its merge key.
trait Keyed {
    fn location(&self) -> Result<&StorageLocation, ReconcileError>;
}

impl Keyed for Artifact {
    fn location(&self) -> Result<&StorageLocation, ReconcileError> {
        self.storage_location
            .as_ref()
            .ok_or(ReconcileError::MissingLocation { id: self.id })
    }
}

impl Keyed for StorageMetadata {
    fn location(&self) -> Result<&StorageLocation, ReconcileError> {
        Ok(&self.storage_location)
    }
}

/// One side of the merge: the source plus a single pending slot.
///
/// `last` is the key of the most recently pulled element, which is also the
/// key of `pending` whenever `pending` is occupied.
struct Lookahead<It, T> {
    side: Side,
    iter: Fuse<It>,
    pending: Option<T>,
    last: Option<StorageLocation>,
    pulled: u64,
}

impl<It, T, E> Lookahead<It, T>
where
    It: Iterator<Item = Result<T, E>>,
    T: Keyed,
    E: Into<ReconcileError>,
{
    fn new(side: Side, iter: It) -> Self {
        Self {
            side,
            iter: iter.fuse(),
            pending: None,
            last: None,
            pulled: 0,
        }
    }

    /// Pull the next element into the empty pending slot, checking that its
    /// key sorts strictly after the previous one.
    fn fill(&mut self) -> Result<(), ReconcileError> {
        if self.pending.is_some() {
            return Ok(());
        }
        let Some(next) = self.iter.next() else {
            return Ok(());
        };
        let item = next.map_err(Into::into)?;
        self.pulled += 1;
        let key = item.location()?;
        if let Some(prev) = &self.last {
            match key.cmp(prev) {
                Ordering::Greater => {}
                Ordering::Equal => {
                    return Err(ReconcileError::DuplicateKey {
                        side: self.side,
                        location: key.clone(),
                    });
                }
                Ordering::Less => {
                    return Err(ReconcileError::OutOfOrder {
                        side: self.side,
                        previous: prev.clone(),
                        current: key.clone(),
                    });
                }
            }
        }
        self.last = Some(key.clone());
        self.pending = Some(item);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// run
// ---------------------------------------------------------------------------

/// Merge `storage` and `inventory`, calling `resolver` once per element.
///
/// # Errors
/// Returns the first pull error, order violation, or resolver error.
pub fn run<S, I, SE, IE, R>(
    storage: S,
    inventory: I,
    resolver: &mut R,
) -> Result<MergeStats, ReconcileError>
where
    S: IntoIterator<Item = Result<StorageMetadata, SE>>,
    I: IntoIterator<Item = Result<Artifact, IE>>,
    SE: Into<ReconcileError>,
    IE: Into<ReconcileError>,
    R: Resolve + ?Sized,
{
    let mut stats = MergeStats::default();
    run_into(storage, inventory, resolver, &mut stats)?;
    Ok(stats)
}

/// Like [`run`], but counts into `stats` as it goes, so a failed run still
/// shows how far it got.
///
/// # Errors
/// Returns the first pull error, order violation, or resolver error.
pub fn run_into<S, I, SE, IE, R>(
    storage: S,
    inventory: I,
    resolver: &mut R,
    stats: &mut MergeStats,
) -> Result<(), ReconcileError>
where
    S: IntoIterator<Item = Result<StorageMetadata, SE>>,
    I: IntoIterator<Item = Result<Artifact, IE>>,
    SE: Into<ReconcileError>,
    IE: Into<ReconcileError>,
    R: Resolve + ?Sized,
{
    let mut inv = Lookahead::new(Side::Inventory, inventory.into_iter());
    let mut sto = Lookahead::new(Side::Storage, storage.into_iter());
    let result = merge(&mut inv, &mut sto, resolver, stats);
    stats.inventory_pulled = inv.pulled;
    stats.storage_pulled = sto.pulled;
    result
}

fn merge<IIt, SIt, IE, SE, R>(
    inv: &mut Lookahead<IIt, Artifact>,
    sto: &mut Lookahead<SIt, StorageMetadata>,
    resolver: &mut R,
    stats: &mut MergeStats,
) -> Result<(), ReconcileError>
where
    IIt: Iterator<Item = Result<Artifact, IE>>,
    SIt: Iterator<Item = Result<StorageMetadata, SE>>,
    IE: Into<ReconcileError>,
    SE: Into<ReconcileError>,
    R: Resolve + ?Sized,
{
    loop {
        inv.fill()?;
        sto.fill()?;

        let order = match (&inv.pending, &sto.pending) {
            (None, None) => return Ok(()),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (Some(_), Some(_)) => inv.last.cmp(&sto.last),
        };
        let artifact = if order.is_le() { inv.pending.take() } else { None };
        let storage = if order.is_ge() { sto.pending.take() } else { None };

        debug!(
            inventory = ?artifact.as_ref().and_then(|a| a.storage_location.as_ref()).map(ToString::to_string),
            storage = ?storage.as_ref().map(|s| s.storage_location.to_string()),
            "compare"
        );
        resolver.resolve(artifact.as_ref(), storage.as_ref())?;

        match order {
            Ordering::Equal => stats.matched += 1,
            Ordering::Less => stats.inventory_only += 1,
            Ordering::Greater => stats.storage_only += 1,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
