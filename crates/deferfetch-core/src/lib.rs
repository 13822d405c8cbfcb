//! Core types and traits for deferfetch.
//!
//! This crate provides the building blocks shared by the result pipeline:
//!
//! - `Value` and `Row` for raw column data
//! - `EntityKey` for `(entity type, primary key)` identity
//! - `EntityMapping` / `MappingCatalog` for read-only mapping metadata
//! - `EntityInstance` / `EntityRef` for materialized, possibly partial entities
//! - `RowSource` and `SecondaryLoader`, the external collaborators

pub mod entity;
pub mod error;
pub mod key;
pub mod mapping;
pub mod row;
pub mod source;
pub mod value;

pub use entity::{
    AssociationSlot, CompletionState, EntityInstance, EntityRef, EntitySnapshot,
    SnapshotAssociation,
};
pub use error::{
    ConfigError, CursorError, CursorErrorKind, Error, InvalidKeyError, InvalidKeyKind,
    MappingError, MappingErrorKind, Result, SecondaryLoadError,
};
pub use key::{BatchWindowKey, EntityKey, PendingAssociation, validate_entity_name};
pub use mapping::{AssociationMapping, EntityMapping, MappingCatalog};
pub use row::Row;
pub use source::{LoadOutcome, LoadRequest, LoadResponse, RowSource, SecondaryLoader};
pub use value::Value;
