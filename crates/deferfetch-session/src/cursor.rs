//! Result cursor: the consumption-facing side of the pipeline.
//!
//! A cursor pulls rows from its [`RowSource`], turns each into an entity via
//! the [`RowProcessor`] and decides when deferred associations are flushed:
//!
//! | entry point | flush policy | returned entities |
//! |---|---|---|
//! | [`materialize_all`](ResultCursor::materialize_all) | full flush after the source is drained | COMPLETE |
//! | [`pull`](ResultCursor::pull) / [`iter`](ResultCursor::iter) | only when a window fills up, or on exhaustion | may be PARTIAL |
//! | [`first`](ResultCursor::first) | like `pull`, then [`close`](ResultCursor::close) | may be PARTIAL |
//!
//! Completion is applied in place, so a handle obtained from `pull` becomes
//! COMPLETE once a later flush resolves its associations. Take an
//! [`EntitySnapshot`](deferfetch_core::EntitySnapshot) to keep the state
//! observed at hand-off.
//!
//! # Example
//!
//! ```ignore
//! let mut cursor = uow.query("Appointment", rows)?;
//! let first = cursor.first()?;
//! ```

use crate::batch::BatchInitializer;
use crate::processor::RowProcessor;
use crate::queue::PendingAssociationQueue;
use crate::registry::EntityRegistry;
use crate::unit_of_work::UnitOfWork;
use deferfetch_core::{
    BatchWindowKey, CompletionState, EntityKey, EntityRef, Error, Result, Row, RowSource,
    SecondaryLoader,
};
use serde::Serialize;

/// Lifecycle state of a cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum CursorState {
    /// Rows may still be pulled.
    Open,
    /// The row source is drained.
    Exhausted,
    /// Released; terminal.
    Closed,
}

/// Counters collected over the life of one cursor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CursorStats {
    /// Rows turned into entities.
    pub rows_processed: usize,
    /// Secondary loads issued.
    pub secondary_loads: usize,
    /// Windows flushed because they reached capacity.
    pub size_triggered_flushes: usize,
    /// Windows flushed by exhaustion, close or an explicit flush.
    pub forced_flushes: usize,
    /// Pending associations written into their owners.
    pub associations_resolved: usize,
    /// Of those, targets that were not found.
    pub dangling_references: usize,
    /// Pending associations whose batch load failed.
    pub failed_associations: usize,
    /// Pending associations dropped at close or drop.
    pub abandoned_associations: usize,
    /// PARTIAL entities handed out by `pull`.
    pub partial_handoffs: usize,
}

#[derive(Debug, Clone, Copy)]
enum FlushTrigger {
    Size,
    Forced,
}

/// Cursor over the entities of one query.
///
/// The cursor borrows its unit of work mutably: entity identity is shared
/// with every other cursor of the same unit of work, one at a time.
pub struct ResultCursor<'u, S: RowSource, L: SecondaryLoader> {
    uow: &'u mut UnitOfWork<L>,
    source: S,
    processor: RowProcessor,
    queue: PendingAssociationQueue,
    state: CursorState,
    stats: CursorStats,
}

impl<'u, S: RowSource, L: SecondaryLoader> ResultCursor<'u, S, L> {
    pub(crate) fn new(uow: &'u mut UnitOfWork<L>, processor: RowProcessor, source: S) -> Self {
        Self {
            uow,
            source,
            processor,
            queue: PendingAssociationQueue::new(),
            state: CursorState::Open,
            stats: CursorStats::default(),
        }
    }

    pub fn state(&self) -> CursorState {
        self.state
    }

    pub fn stats(&self) -> &CursorStats {
        &self.stats
    }

    /// Whether deferred associations wait for a flush.
    pub fn has_pending(&self) -> bool {
        self.queue.has_pending()
    }

    /// Number of deferred associations waiting for a flush.
    pub fn pending_len(&self) -> usize {
        self.queue.pending_len()
    }

    /// The cursor's pending association queue.
    pub fn queue(&self) -> &PendingAssociationQueue {
        &self.queue
    }

    /// The unit of work's entity registry.
    pub fn registry(&self) -> &EntityRegistry {
        &self.uow.registry
    }

    /// Re-fetch an entity by key from the registry.
    pub fn get(&self, key: &EntityKey) -> Option<EntityRef> {
        self.uow.registry.get(key)
    }

    /// Drain the source and return every entity, all COMPLETE.
    ///
    /// Rows already consumed through [`pull`](Self::pull) are not returned
    /// again. Fails on a CLOSED cursor.
    #[tracing::instrument(level = "debug", skip(self), fields(root = %self.processor.root().name))]
    pub fn materialize_all(&mut self) -> Result<Vec<EntityRef>> {
        self.ensure_open("materialize")?;

        let mut entities = Vec::new();
        if self.state == CursorState::Open {
            while let Some(row) = self.source.next_row()? {
                let entity = self.process(&row)?;
                self.flush_full_windows()?;
                entities.push(entity);
            }
            self.state = CursorState::Exhausted;
        }
        self.flush_all()?;

        tracing::info!(
            root = %self.processor.root().name,
            entities = entities.len(),
            rows = self.stats.rows_processed,
            secondary_loads = self.stats.secondary_loads,
            "Materialized result"
        );
        Ok(entities)
    }

    /// Advance by one row.
    ///
    /// The entity is returned as soon as it is built and may be PARTIAL. Only
    /// windows that reached capacity are flushed before returning. Once the
    /// source is drained the cursor becomes EXHAUSTED, flushes everything and
    /// returns `None`.
    pub fn pull(&mut self) -> Result<Option<EntityRef>> {
        self.ensure_open("pull")?;
        if self.state == CursorState::Exhausted {
            return Ok(None);
        }

        match self.source.next_row()? {
            Some(row) => {
                let entity = self.process(&row)?;
                self.flush_full_windows()?;
                if entity.state() == CompletionState::Partial {
                    self.record_handoff(&entity);
                }
                Ok(Some(entity))
            }
            None => {
                self.state = CursorState::Exhausted;
                tracing::debug!(rows = self.stats.rows_processed, "Row source exhausted");
                self.flush_all()?;
                Ok(None)
            }
        }
    }

    /// Pull one entity, then close the cursor.
    ///
    /// The close flushes pending windows; the returned handle observes that
    /// completion in place. A pull error takes precedence over a close error.
    pub fn first(&mut self) -> Result<Option<EntityRef>> {
        let pulled = self.pull();
        let closed = self.close();
        let entity = pulled?;
        closed?;
        Ok(entity)
    }

    /// Force every pending window to load now, without closing.
    pub fn flush(&mut self) -> Result<()> {
        self.ensure_open("flush")?;
        self.flush_all()
    }

    /// Release the cursor.
    ///
    /// Pending windows are flushed best-effort; whatever a failed flush leaves
    /// behind is abandoned. Closing a CLOSED cursor is a no-op.
    pub fn close(&mut self) -> Result<()> {
        if self.state == CursorState::Closed {
            return Ok(());
        }

        let flushed = self.flush_all();
        self.state = CursorState::Closed;
        self.abandon_pending("close");

        tracing::debug!(
            rows = self.stats.rows_processed,
            secondary_loads = self.stats.secondary_loads,
            ok = flushed.is_ok(),
            "Cursor closed"
        );
        flushed
    }

    /// Iterate by repeated [`pull`](Self::pull). Never closes the cursor.
    pub fn iter(&mut self) -> CursorIter<'_, 'u, S, L> {
        CursorIter { cursor: self }
    }

    fn ensure_open(&self, operation: &str) -> Result<()> {
        if self.state == CursorState::Closed {
            return Err(Error::cursor_closed(operation));
        }
        Ok(())
    }

    fn process(&mut self, row: &Row) -> Result<EntityRef> {
        let entity = self
            .processor
            .process_row(row, &mut self.uow.registry, &mut self.queue)?;
        self.stats.rows_processed += 1;
        Ok(entity)
    }

    fn record_handoff(&mut self, entity: &EntityRef) {
        self.stats.partial_handoffs += 1;
        let roles: Vec<String> = entity.read().pending_roles().map(str::to_string).collect();
        if let Some(tracker) = self.uow.handoff.as_mut() {
            tracker.record(entity.key().entity(), &roles);
        }
    }

    fn flush_full_windows(&mut self) -> Result<()> {
        // A flush can push other windows to capacity through chained deferrals.
        loop {
            let full = self.queue.full_windows();
            if full.is_empty() {
                return Ok(());
            }
            for key in full {
                self.flush_window(&key, FlushTrigger::Size)?;
            }
        }
    }

    fn flush_all(&mut self) -> Result<()> {
        loop {
            let keys = self.queue.window_keys();
            if keys.is_empty() {
                return Ok(());
            }
            for key in keys {
                self.flush_window(&key, FlushTrigger::Forced)?;
            }
        }
    }

    fn flush_window(&mut self, key: &BatchWindowKey, trigger: FlushTrigger) -> Result<()> {
        let pending = self.queue.drain(key);
        if pending.is_empty() {
            return Ok(());
        }

        let uow = &mut *self.uow;
        let result = BatchInitializer::new(&mut uow.loader, &self.processor).resolve(
            key,
            pending,
            &mut uow.registry,
            &mut self.queue,
        );

        match result {
            Ok(outcome) => {
                if outcome.loaded {
                    self.stats.secondary_loads += 1;
                }
                match trigger {
                    FlushTrigger::Size => self.stats.size_triggered_flushes += 1,
                    FlushTrigger::Forced => self.stats.forced_flushes += 1,
                }
                self.stats.associations_resolved += outcome.resolved;
                self.stats.dangling_references += outcome.dangling;
                Ok(())
            }
            Err(e) => {
                if let Some(failed) = e.failed_associations() {
                    self.stats.secondary_loads += 1;
                    self.stats.failed_associations += failed.len();
                    self.queue.record_failed(failed);
                }
                Err(e)
            }
        }
    }

    fn abandon_pending(&mut self, reason: &'static str) {
        let dropped = self.queue.abandon_all();
        if dropped.is_empty() {
            return;
        }
        self.stats.abandoned_associations += dropped.len();
        if self.uow.config().log_abandoned {
            let entries: Vec<String> = dropped.iter().map(ToString::to_string).collect();
            tracing::warn!(
                reason,
                count = dropped.len(),
                pending = ?entries,
                "Abandoned pending associations"
            );
        }
    }
}

impl<S: RowSource, L: SecondaryLoader> Drop for ResultCursor<'_, S, L> {
    fn drop(&mut self) {
        if self.state != CursorState::Closed {
            self.abandon_pending("cursor dropped");
        }
    }
}

impl<S: RowSource, L: SecondaryLoader> std::fmt::Debug for ResultCursor<'_, S, L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultCursor")
            .field("root", &self.processor.root().name)
            .field("state", &self.state)
            .field("pending", &self.queue.pending_len())
            .field("stats", &self.stats)
            .finish()
    }
}

/// Iterator over a cursor's entities, by repeated pull.
pub struct CursorIter<'c, 'u, S: RowSource, L: SecondaryLoader> {
    cursor: &'c mut ResultCursor<'u, S, L>,
}

impl<S: RowSource, L: SecondaryLoader> Iterator for CursorIter<'_, '_, S, L> {
    type Item = Result<EntityRef>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor.state == CursorState::Closed {
            return None;
        }
        self.cursor.pull().transpose()
    }
}
