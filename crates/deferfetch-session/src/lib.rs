//! Unit of work and result processing for deferfetch.
//!
//! `deferfetch-session` is the **result-processing layer**. It turns raw rows
//! into entity graphs, defers singular associations it cannot resolve inline,
//! and batches those deferrals into shared secondary loads.
//!
//! # Role In The Architecture
//!
//! - **Entity registry**: one in-memory instance per `(entity, primary key)`.
//! - **Pending association queue**: deferred associations grouped into batch
//!   windows by `(role, target entity)`.
//! - **Batch initializer**: one secondary load per window.
//! - **Row processor**: rows into entities, inline resolution first.
//! - **Result cursor**: decides when windows are flushed, per consumption mode.
//!
//! # Completion Guarantees
//!
//! Only [`ResultCursor::materialize_all`] guarantees COMPLETE entities.
//! [`ResultCursor::pull`] and [`ResultCursor::first`] may return PARTIAL
//! entities; call [`ResultCursor::flush`] or drain the cursor before reading
//! their associations.
//!
//! # Example
//!
//! ```ignore
//! let mut uow = UnitOfWork::begin(catalog, loader)?;
//!
//! let mut cursor = uow.query("Appointment", rows)?;
//! let appointments = cursor.materialize_all()?;
//! assert!(appointments.iter().all(EntityRef::is_complete));
//! ```

pub mod batch;
pub mod cursor;
pub mod handoff;
pub mod memory;
pub mod processor;
pub mod queue;
pub mod registry;
pub mod unit_of_work;

pub use batch::{BatchInitializer, BatchOutcome};
pub use cursor::{CursorIter, CursorState, CursorStats, ResultCursor};
pub use handoff::{HandoffStats, PartialHandoffTracker};
pub use memory::InMemoryLoader;
pub use processor::RowProcessor;
pub use queue::{BatchWindow, PendingAssociationQueue};
pub use registry::EntityRegistry;
pub use unit_of_work::{UnitOfWork, UnitOfWorkSummary};

use deferfetch_core::{ConfigError, Error, Result};
use serde::{Deserialize, Serialize};

// ============================================================================
// Fetch Configuration
// ============================================================================

/// Configuration for deferred association fetching.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FetchConfig {
    /// Batch window capacity for targets whose mapping sets no batch size.
    pub default_batch_size: usize,
    /// Warn after this many PARTIAL hand-offs per (entity, role); `None`
    /// disables detection.
    pub partial_handoff_threshold: Option<usize>,
    /// Log every pending association abandoned at close or drop.
    pub log_abandoned: bool,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            default_batch_size: 16,
            partial_handoff_threshold: Some(3),
            log_abandoned: true,
        }
    }
}

impl FetchConfig {
    /// Create a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the default batch size (builder pattern).
    #[must_use]
    pub fn batch_size(mut self, size: usize) -> Self {
        self.default_batch_size = size;
        self
    }

    /// Set the partial hand-off threshold (builder pattern).
    #[must_use]
    pub fn partial_handoff_threshold(mut self, threshold: Option<usize>) -> Self {
        self.partial_handoff_threshold = threshold;
        self
    }

    /// Set whether abandoned associations are logged (builder pattern).
    #[must_use]
    pub fn log_abandoned(mut self, value: bool) -> Self {
        self.log_abandoned = value;
        self
    }

    /// Reject values the pipeline cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.default_batch_size == 0 {
            return Err(config_error("default_batch_size must be at least 1"));
        }
        if self.partial_handoff_threshold == Some(0) {
            return Err(config_error("partial_handoff_threshold must be at least 1"));
        }
        Ok(())
    }

    /// Parse and validate a JSON configuration.
    ///
    /// Missing fields take their default values.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize as JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

fn config_error(message: &str) -> Error {
    Error::Config(ConfigError {
        message: message.to_string(),
        source: None,
    })
}
