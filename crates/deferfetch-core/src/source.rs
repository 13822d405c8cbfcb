//! External collaborators of the result pipeline.
//!
//! The query-execution layer provides a [`RowSource`]; the secondary-load
//! service provides a [`SecondaryLoader`]. Both are synchronous: the caller's
//! thread blocks inside them and nothing else runs concurrently.

use crate::Result;
use crate::key::EntityKey;
use crate::row::Row;
use std::collections::HashMap;

/// Lazy sequence of raw rows, pulled one at a time in source order.
pub trait RowSource {
    /// The next row, or `None` once the source is drained.
    fn next_row(&mut self) -> Result<Option<Row>>;
}

impl<I> RowSource for I
where
    I: Iterator<Item = Result<Row>>,
{
    fn next_row(&mut self) -> Result<Option<Row>> {
        self.next().transpose()
    }
}

/// One batched lookup: every key belongs to the same role and target type.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadRequest {
    /// Association role the keys were deferred for.
    pub role: String,
    /// Entity type of every key.
    pub target_entity: String,
    /// Primary-key columns of the target entity.
    pub key_columns: Vec<String>,
    /// Distinct target keys, in first-deferred order.
    pub keys: Vec<EntityKey>,
}

impl LoadRequest {
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// Per-key result of a secondary load.
#[derive(Debug, Clone)]
pub enum LoadOutcome {
    /// The target's columns.
    Found(Row),
    /// The key does not exist (dangling reference).
    NotFound,
}

/// Mapping from requested key to outcome.
///
/// A requested key that is absent from the response counts as not found.
#[derive(Debug, Clone, Default)]
pub struct LoadResponse {
    outcomes: HashMap<EntityKey, LoadOutcome>,
}

impl LoadResponse {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a found target.
    pub fn found(&mut self, key: EntityKey, row: Row) {
        self.outcomes.insert(key, LoadOutcome::Found(row));
    }

    /// Record an explicit not-found marker.
    pub fn not_found(&mut self, key: EntityKey) {
        self.outcomes.insert(key, LoadOutcome::NotFound);
    }

    /// Row for `key`, if found.
    pub fn row(&self, key: &EntityKey) -> Option<&Row> {
        match self.outcomes.get(key) {
            Some(LoadOutcome::Found(row)) => Some(row),
            _ => None,
        }
    }

    pub fn outcome(&self, key: &EntityKey) -> Option<&LoadOutcome> {
        self.outcomes.get(key)
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }
}

/// Service resolving a batch of target keys with one load.
pub trait SecondaryLoader {
    /// Load every key of `request` in a single round trip.
    ///
    /// An `Err` fails the whole batch; the caller applies nothing from it.
    fn load(&mut self, request: &LoadRequest) -> Result<LoadResponse>;
}

impl<L: SecondaryLoader + ?Sized> SecondaryLoader for &mut L {
    fn load(&mut self, request: &LoadRequest) -> Result<LoadResponse> {
        (**self).load(request)
    }
}

impl<L: SecondaryLoader + ?Sized> SecondaryLoader for Box<L> {
    fn load(&mut self, request: &LoadRequest) -> Result<LoadResponse> {
        (**self).load(request)
    }
}
