//! Entity mapping metadata.
//!
//! Mappings are supplied by the declarative configuration layer and are only
//! read here: they tell the row processor which columns form an entity's key,
//! which columns are scalar fields, and which singular associations point at
//! other entities (and through which foreign-key columns).

use crate::Result;
use crate::error::{ConfigError, Error, MappingError, MappingErrorKind};
use crate::key::validate_entity_name;
use std::collections::HashMap;
use std::sync::Arc;

/// A to-one association from an owning entity to a target entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssociationMapping {
    /// Role name on the owner (e.g. `owner`, `createdBy`).
    pub role: String,
    /// Target entity name.
    pub target: String,
    /// Columns on the owner row holding the target's primary key.
    pub foreign_key: Vec<String>,
    /// Prefix under which a joined target's columns may appear in the owner's
    /// row (e.g. `o_` for `o_id`, `o_username`). It must not make a joined
    /// key column collide with the foreign-key column.
    pub join_prefix: Option<String>,
}

impl AssociationMapping {
    /// A many-to-one association with a single `<role>_id` foreign key.
    pub fn many_to_one(role: impl Into<String>, target: impl Into<String>) -> Self {
        let role = role.into();
        let foreign_key = vec![format!("{role}_id")];
        Self {
            role,
            target: target.into(),
            foreign_key,
            join_prefix: None,
        }
    }

    /// Set the foreign-key columns.
    pub fn foreign_key<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.foreign_key = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Allow inline resolution from joined columns carrying `prefix`.
    pub fn joined(mut self, prefix: impl Into<String>) -> Self {
        self.join_prefix = Some(prefix.into());
        self
    }
}

/// Mapping of one entity type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityMapping {
    /// Entity-type name.
    pub name: String,
    /// Primary-key columns.
    pub primary_key: Vec<String>,
    /// Scalar columns copied into the entity's fields.
    pub columns: Vec<String>,
    /// Singular associations.
    pub associations: Vec<AssociationMapping>,
    /// Batch size used when this entity is the target of a deferred load.
    pub batch_size: Option<usize>,
}

impl EntityMapping {
    /// A mapping with a single `id` primary key and no fields.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            primary_key: vec!["id".to_string()],
            columns: Vec::new(),
            associations: Vec::new(),
            batch_size: None,
        }
    }

    /// Set the primary-key columns.
    pub fn primary_key<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.primary_key = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Add a scalar column.
    pub fn column(mut self, name: impl Into<String>) -> Self {
        self.columns.push(name.into());
        self
    }

    /// Add a singular association.
    pub fn association(mut self, association: AssociationMapping) -> Self {
        self.associations.push(association);
        self
    }

    /// Set the batch size used when this entity is loaded in batches.
    pub fn batch_size(mut self, size: usize) -> Self {
        self.batch_size = Some(size);
        self
    }

    /// Look up an association by role.
    pub fn find_association(&self, role: &str) -> Option<&AssociationMapping> {
        self.associations.iter().find(|a| a.role == role)
    }
}

/// All entity mappings known to a unit of work.
#[derive(Debug, Clone, Default)]
pub struct MappingCatalog {
    entities: HashMap<String, Arc<EntityMapping>>,
}

impl MappingCatalog {
    /// Create an empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a mapping, replacing any previous mapping with the same name.
    pub fn register(&mut self, mapping: EntityMapping) -> Result<()> {
        validate_entity_name(&mapping.name)?;
        if mapping.primary_key.is_empty() {
            return Err(mapping_error(
                MappingErrorKind::KeyArity,
                format!("entity '{}' has no primary-key columns", mapping.name),
            ));
        }
        if mapping.batch_size == Some(0) {
            return Err(Error::Config(ConfigError {
                message: format!("batch size of entity '{}' must be at least 1", mapping.name),
                source: None,
            }));
        }
        for association in &mapping.associations {
            validate_entity_name(&association.target)?;
        }
        tracing::debug!(
            entity = %mapping.name,
            associations = mapping.associations.len(),
            batch_size = ?mapping.batch_size,
            "Registered entity mapping"
        );
        self.entities
            .insert(mapping.name.clone(), Arc::new(mapping));
        Ok(())
    }

    /// Builder form of [`register`](Self::register).
    pub fn with(mut self, mapping: EntityMapping) -> Result<Self> {
        self.register(mapping)?;
        Ok(self)
    }

    /// Get a mapping by entity name.
    pub fn get(&self, name: &str) -> Result<&Arc<EntityMapping>> {
        self.entities.get(name).ok_or_else(|| {
            mapping_error(
                MappingErrorKind::UnknownEntity,
                format!("no mapping registered for entity '{name}'"),
            )
        })
    }

    /// Check if a mapping exists.
    pub fn contains(&self, name: &str) -> bool {
        self.entities.contains_key(name)
    }

    /// Number of registered mappings.
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Whether the catalog is empty.
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Check cross-entity consistency: every association target is mapped and
    /// its foreign key has the same arity as the target's primary key.
    pub fn validate(&self) -> Result<()> {
        for mapping in self.entities.values() {
            for association in &mapping.associations {
                let target = self.get(&association.target)?;
                if target.primary_key.len() != association.foreign_key.len() {
                    return Err(mapping_error(
                        MappingErrorKind::KeyArity,
                        format!(
                            "{}.{} has {} foreign-key column(s) but '{}' has {} key column(s)",
                            mapping.name,
                            association.role,
                            association.foreign_key.len(),
                            target.name,
                            target.primary_key.len()
                        ),
                    ));
                }
            }
        }
        Ok(())
    }
}

fn mapping_error(kind: MappingErrorKind, message: String) -> Error {
    Error::Mapping(MappingError { kind, message })
}
