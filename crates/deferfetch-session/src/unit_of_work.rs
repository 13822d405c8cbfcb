//! Unit of work: the identity scope shared by every cursor it opens.
//!
//! A unit of work owns the entity registry, the mapping catalog, the
//! secondary loader and the configuration. Cursors borrow it mutably, so the
//! borrow checker enforces strictly sequential access; a cursor must be
//! closed or dropped (which abandons whatever it still had pending) before
//! the unit of work can end.

use crate::FetchConfig;
use crate::cursor::ResultCursor;
use crate::handoff::{HandoffStats, PartialHandoffTracker};
use crate::processor::RowProcessor;
use crate::registry::EntityRegistry;
use deferfetch_core::{
    CompletionState, EntityKey, EntityRef, MappingCatalog, Result, RowSource, SecondaryLoader,
};
use serde::Serialize;
use std::sync::Arc;

/// Summary reported when a unit of work ends.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UnitOfWorkSummary {
    /// Entities tracked by the registry.
    pub entities: usize,
    /// Of those, entities left PARTIAL.
    pub partial: usize,
    /// Entities registered but never hydrated.
    pub uninitialized: usize,
}

/// Identity scope for materializing query results.
pub struct UnitOfWork<L: SecondaryLoader> {
    pub(crate) registry: EntityRegistry,
    pub(crate) loader: L,
    pub(crate) handoff: Option<PartialHandoffTracker>,
    catalog: Arc<MappingCatalog>,
    config: FetchConfig,
}

impl<L: SecondaryLoader> UnitOfWork<L> {
    /// Begin a unit of work with the default configuration.
    pub fn begin(catalog: impl Into<Arc<MappingCatalog>>, loader: L) -> Result<Self> {
        Self::with_config(catalog, loader, FetchConfig::default())
    }

    /// Begin a unit of work with a custom configuration.
    ///
    /// Both the configuration and the catalog are validated up front.
    pub fn with_config(
        catalog: impl Into<Arc<MappingCatalog>>,
        loader: L,
        config: FetchConfig,
    ) -> Result<Self> {
        config.validate()?;
        let catalog = catalog.into();
        catalog.validate()?;

        let handoff = config
            .partial_handoff_threshold
            .map(|threshold| PartialHandoffTracker::new().with_threshold(threshold));

        tracing::debug!(
            entities = catalog.len(),
            default_batch_size = config.default_batch_size,
            partial_detection = handoff.is_some(),
            "Unit of work started"
        );

        Ok(Self {
            registry: EntityRegistry::new(),
            loader,
            handoff,
            catalog,
            config,
        })
    }

    /// Open a cursor over rows of `root_entity`.
    pub fn query<S: RowSource>(
        &mut self,
        root_entity: &str,
        source: S,
    ) -> Result<ResultCursor<'_, S, L>> {
        let processor = RowProcessor::new(
            Arc::clone(&self.catalog),
            root_entity,
            self.config.default_batch_size,
        )?;
        tracing::debug!(root = root_entity, "Opening result cursor");
        Ok(ResultCursor::new(self, processor, source))
    }

    /// Re-fetch an entity by key.
    pub fn get(&self, key: &EntityKey) -> Option<EntityRef> {
        self.registry.get(key)
    }

    pub fn registry(&self) -> &EntityRegistry {
        &self.registry
    }

    pub fn catalog(&self) -> &Arc<MappingCatalog> {
        &self.catalog
    }

    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    pub fn loader(&self) -> &L {
        &self.loader
    }

    pub fn loader_mut(&mut self) -> &mut L {
        &mut self.loader
    }

    // ========================================================================
    // Partial hand-off detection
    // ========================================================================

    /// Enable partial hand-off detection with the given threshold.
    pub fn enable_partial_detection(&mut self, threshold: usize) {
        self.handoff = Some(PartialHandoffTracker::new().with_threshold(threshold));
    }

    /// Disable partial hand-off detection.
    pub fn disable_partial_detection(&mut self) {
        self.handoff = None;
    }

    /// Hand-off statistics, if detection is enabled.
    pub fn partial_stats(&self) -> Option<HandoffStats> {
        self.handoff.as_ref().map(PartialHandoffTracker::stats)
    }

    /// End the unit of work, discarding the registry.
    pub fn end(mut self) -> UnitOfWorkSummary {
        let summary = UnitOfWorkSummary {
            entities: self.registry.len(),
            partial: self.registry.count_in_state(CompletionState::Partial),
            uninitialized: self.registry.count_in_state(CompletionState::Uninitialized),
        };
        if summary.partial > 0 {
            tracing::warn!(
                partial = summary.partial,
                entities = summary.entities,
                "Unit of work ended with PARTIAL entities"
            );
        } else {
            tracing::debug!(entities = summary.entities, "Unit of work ended");
        }
        self.registry.clear();
        summary
    }
}

impl<L: SecondaryLoader> std::fmt::Debug for UnitOfWork<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnitOfWork")
            .field("registry", &self.registry)
            .field("catalog", &self.catalog.len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
