//! Entity identity keys and pending association records.
//!
//! An [`EntityKey`] is the `(entity type, primary key)` pair used both by the
//! entity registry and by the batch queue. A [`PendingAssociation`] records a
//! singular association that could not be resolved while a row was processed.

use crate::Result;
use crate::error::{InvalidKeyError, InvalidKeyKind};
use crate::row::Row;
use crate::value::{Value, hash_value};
use regex::Regex;
use serde::Serialize;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::OnceLock;

fn entity_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("entity name pattern compiles")
    })
}

/// Check that `name` is usable as an entity-type identifier.
pub fn validate_entity_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(InvalidKeyError::new(
            InvalidKeyKind::MissingEntity,
            None,
            "entity name is missing",
        )
        .into());
    }
    if !entity_name_pattern().is_match(name) {
        return Err(InvalidKeyError::new(
            InvalidKeyKind::BadEntityName,
            Some(name),
            format!("'{name}' is not a valid entity name"),
        )
        .into());
    }
    Ok(())
}

/// Identity of an entity within one unit of work.
///
/// Integer components are normalized so that `Int(1)` and `BigInt(1)` name
/// the same row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityKey {
    entity: String,
    components: Vec<Value>,
}

impl Eq for EntityKey {}

impl Hash for EntityKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.entity.hash(state);
        self.components.len().hash(state);
        for component in &self.components {
            hash_value(component, state);
        }
    }
}

impl EntityKey {
    /// Build a key, validating the entity name and every component.
    pub fn new(entity: impl Into<String>, components: Vec<Value>) -> Result<Self> {
        let entity = entity.into();
        validate_entity_name(&entity)?;

        if components.is_empty() {
            return Err(InvalidKeyError::new(
                InvalidKeyKind::MissingComponent,
                Some(&entity),
                "primary key has no components",
            )
            .into());
        }

        for (idx, component) in components.iter().enumerate() {
            if component.is_null() {
                return Err(InvalidKeyError::new(
                    InvalidKeyKind::NullComponent,
                    Some(&entity),
                    format!("primary key component {idx} is NULL"),
                )
                .into());
            }
            if !component.is_key_component() {
                return Err(InvalidKeyError::new(
                    InvalidKeyKind::UnhashableComponent,
                    Some(&entity),
                    format!(
                        "primary key component {idx} has type {}",
                        component.type_name()
                    ),
                )
                .into());
            }
        }

        let components = components.iter().map(Value::normalized).collect();
        Ok(Self { entity, components })
    }

    /// Build a single-column key.
    pub fn single(entity: impl Into<String>, value: impl Into<Value>) -> Result<Self> {
        Self::new(entity, vec![value.into()])
    }

    /// Build a key from the named columns of a row.
    ///
    /// `prefix` selects columns of a joined entity (`"owner_"` + `"id"`).
    pub fn from_row(
        entity: &str,
        columns: &[String],
        row: &Row,
        prefix: Option<&str>,
    ) -> Result<Self> {
        let mut components = Vec::with_capacity(columns.len());
        for column in columns {
            let value = row.get_prefixed(prefix, column).ok_or_else(|| {
                InvalidKeyError::new(
                    InvalidKeyKind::MissingComponent,
                    Some(entity),
                    format!(
                        "key column '{}{column}' is missing from the row",
                        prefix.unwrap_or_default()
                    ),
                )
            })?;
            components.push(value.clone());
        }
        Self::new(entity, components)
    }

    /// The entity-type name.
    pub fn entity(&self) -> &str {
        &self.entity
    }

    /// The primary-key components.
    pub fn components(&self) -> &[Value] {
        &self.components
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#", self.entity)?;
        if let [only] = self.components.as_slice() {
            return write!(f, "{only}");
        }
        write!(f, "(")?;
        for (i, c) in self.components.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{c}")?;
        }
        write!(f, ")")
    }
}

/// A singular association deferred to a batched secondary load.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct PendingAssociation {
    /// Entity holding the association.
    pub owner: EntityKey,
    /// Association role on the owner (e.g. `owner`, `createdBy`).
    pub role: String,
    /// Entity the association points to.
    pub target: EntityKey,
}

impl PendingAssociation {
    pub fn new(owner: EntityKey, role: impl Into<String>, target: EntityKey) -> Self {
        Self {
            owner,
            role: role.into(),
            target,
        }
    }

    /// The batch window this association belongs to.
    pub fn window_key(&self) -> BatchWindowKey {
        BatchWindowKey::new(self.role.clone(), self.target.entity())
    }
}

impl fmt::Display for PendingAssociation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{} -> {}", self.owner, self.role, self.target)
    }
}

/// Grouping of pending associations sharing one secondary load.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct BatchWindowKey {
    pub role: String,
    pub target_entity: String,
}

impl BatchWindowKey {
    pub fn new(role: impl Into<String>, target_entity: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            target_entity: target_entity.into(),
        }
    }
}

impl fmt::Display for BatchWindowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.role, self.target_entity)
    }
}
