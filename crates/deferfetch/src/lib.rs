//! deferfetch - deferred, batched initialization of singular associations.
//!
//! When a query result references entities through to-one associations that
//! cannot be resolved from the row itself, deferfetch records them as
//! pending, groups them per `(role, target entity)` and resolves each group
//! with a single secondary load. When those loads happen depends on how the
//! result is consumed:
//!
//! - `materialize_all()` drains the rows, then flushes everything: every
//!   returned entity is COMPLETE.
//! - `pull()` hands each entity out immediately; it may still be PARTIAL
//!   until a batch window fills up or the cursor is exhausted.
//! - `first()` pulls one entity and closes the cursor, flushing whatever was
//!   pending.
//!
//! # Quick Start
//!
//! ```ignore
//! use deferfetch::prelude::*;
//!
//! let catalog = MappingCatalog::new()
//!     .with(
//!         EntityMapping::new("Appointment")
//!             .column("name")
//!             .association(AssociationMapping::many_to_one("owner", "User")),
//!     )?
//!     .with(EntityMapping::new("User").column("username").batch_size(10))?;
//!
//! let mut uow = UnitOfWork::begin(catalog, loader)?;
//! let mut cursor = uow.query("Appointment", rows)?;
//!
//! let appointment = cursor.first()?.expect("one row");
//! let owner = appointment.target("owner");
//! ```

pub use deferfetch_core::{
    AssociationMapping, AssociationSlot, BatchWindowKey, CompletionState, ConfigError,
    CursorError, CursorErrorKind, EntityInstance, EntityKey, EntityMapping, EntityRef,
    EntitySnapshot, Error, InvalidKeyError, InvalidKeyKind, LoadOutcome, LoadRequest,
    LoadResponse, MappingCatalog, MappingError, MappingErrorKind, PendingAssociation, Result, Row,
    RowSource, SecondaryLoadError, SecondaryLoader, SnapshotAssociation, Value,
};

pub use deferfetch_session::{
    BatchInitializer, BatchOutcome, BatchWindow, CursorIter, CursorState, CursorStats,
    EntityRegistry, FetchConfig, HandoffStats, InMemoryLoader, PartialHandoffTracker,
    PendingAssociationQueue, ResultCursor, RowProcessor, UnitOfWork, UnitOfWorkSummary,
};

// ============================================================================
// Prelude
// ============================================================================

/// Commonly used types.
pub mod prelude {
    pub use crate::{Error, Result};
    pub use crate::{AssociationMapping, EntityMapping, MappingCatalog};
    pub use crate::{CompletionState, EntityKey, EntityRef, EntitySnapshot, Row, Value};
    pub use crate::{InMemoryLoader, RowSource, SecondaryLoader};
    pub use crate::{CursorState, FetchConfig, ResultCursor, UnitOfWork};
}
