//! Row processing: one raw row into an entity graph fragment.
//!
//! For each singular association of a hydrated entity the processor tries,
//! in order:
//!
//! 1. a NULL foreign key, which resolves to a null association;
//! 2. the entity registry, which already tracks the target (this covers
//!    self references and cycles through entities hydrated earlier);
//! 3. joined columns carrying the target's primary key under the
//!    association's join prefix;
//! 4. deferral into the pending association queue, leaving a placeholder.
//!
//! The returned entity may be PARTIAL. Completing it is up to the cursor's
//! flush policy.

use crate::queue::PendingAssociationQueue;
use crate::registry::EntityRegistry;
use deferfetch_core::{
    AssociationMapping, AssociationSlot, EntityKey, EntityMapping, EntityRef, InvalidKeyError,
    InvalidKeyKind, MappingCatalog, PendingAssociation, Result, Row, Value,
};
use std::sync::Arc;

/// Converts rows of one root entity type into registered entities.
#[derive(Debug, Clone)]
pub struct RowProcessor {
    root: Arc<EntityMapping>,
    catalog: Arc<MappingCatalog>,
    default_batch_size: usize,
}

impl RowProcessor {
    /// Create a processor for rows of `root_entity`.
    pub fn new(
        catalog: Arc<MappingCatalog>,
        root_entity: &str,
        default_batch_size: usize,
    ) -> Result<Self> {
        let root = Arc::clone(catalog.get(root_entity)?);
        Ok(Self {
            root,
            catalog,
            default_batch_size: default_batch_size.max(1),
        })
    }

    /// Mapping of the root entity.
    pub fn root(&self) -> &EntityMapping {
        &self.root
    }

    /// The mapping catalog in use.
    pub fn catalog(&self) -> &Arc<MappingCatalog> {
        &self.catalog
    }

    /// Capacity of the batch window for associations targeting `target`.
    pub fn window_capacity(&self, target: &str) -> usize {
        self.catalog
            .get(target)
            .ok()
            .and_then(|m| m.batch_size)
            .unwrap_or(self.default_batch_size)
    }

    /// Process one row and return its root entity.
    ///
    /// Fails with `InvalidKey` when the root key or a foreign key is
    /// malformed. Every entity created for the failing row, joined targets
    /// included, is unregistered again so later rows are unaffected.
    pub fn process_row(
        &self,
        row: &Row,
        registry: &mut EntityRegistry,
        queue: &mut PendingAssociationQueue,
    ) -> Result<EntityRef> {
        let root = Arc::clone(&self.root);
        let key = EntityKey::from_row(&root.name, &root.primary_key, row, None)?;
        self.hydrate(&root, key, row, None, registry, queue)
    }

    /// Materialize `key` from `row` as one unit.
    ///
    /// Deferrals reach the queue only if the whole row succeeds; on failure
    /// the keys the row registered are removed again.
    pub(crate) fn hydrate(
        &self,
        mapping: &EntityMapping,
        key: EntityKey,
        row: &Row,
        prefix: Option<&str>,
        registry: &mut EntityRegistry,
        queue: &mut PendingAssociationQueue,
    ) -> Result<EntityRef> {
        let mut journal = RowJournal::default();
        match self.build(mapping, key, row, prefix, registry, &mut journal) {
            Ok(entity) => {
                for pending in journal.deferred {
                    let capacity = self.window_capacity(pending.target.entity());
                    queue.defer(pending, capacity);
                }
                Ok(entity)
            }
            Err(e) => {
                for created in journal.created.iter().rev() {
                    registry.remove(created);
                }
                if !journal.created.is_empty() {
                    tracing::debug!(
                        unregistered = journal.created.len(),
                        error = %e,
                        "Row failed; rolled back its entities"
                    );
                }
                Err(e)
            }
        }
    }

    /// Register `key` and, if this is its first materialization, apply the
    /// row's columns under `prefix`.
    ///
    /// A reused instance that is already initialized keeps its fields and
    /// slots, but its placeholders are deferred again: the entries that
    /// produced them may have been abandoned with another cursor or dropped
    /// by a failed load.
    fn build(
        &self,
        mapping: &EntityMapping,
        key: EntityKey,
        row: &Row,
        prefix: Option<&str>,
        registry: &mut EntityRegistry,
        journal: &mut RowJournal,
    ) -> Result<EntityRef> {
        let (entity, is_new) = registry.get_or_create(key.clone());
        if is_new {
            journal.created.push(key.clone());
        }
        if entity.read().is_initialized() {
            journal.redefer(&entity);
            return Ok(entity);
        }

        let slots = self.resolve_associations(mapping, &key, row, prefix, registry, journal)?;

        let mut instance = entity.write();
        for column in &mapping.columns {
            if let Some(value) = row.get_prefixed(prefix, column) {
                instance.set_field(column.as_str(), value.clone());
            }
        }
        for (association, slot) in slots {
            if let AssociationSlot::Placeholder(target) = &slot {
                journal.deferred.push(PendingAssociation::new(
                    key.clone(),
                    association.role.as_str(),
                    target.clone(),
                ));
            }
            instance.set_association(association.role.as_str(), slot);
        }
        instance.mark_hydrated();
        drop(instance);

        Ok(entity)
    }

    fn resolve_associations<'m>(
        &self,
        mapping: &'m EntityMapping,
        owner: &EntityKey,
        row: &Row,
        prefix: Option<&str>,
        registry: &mut EntityRegistry,
        journal: &mut RowJournal,
    ) -> Result<Vec<(&'m AssociationMapping, AssociationSlot)>> {
        // All foreign keys of this level are read before any joined target
        // is hydrated, so a malformed key fails fast.
        let mut targets = Vec::with_capacity(mapping.associations.len());
        for association in &mapping.associations {
            targets.push(foreign_key(association, owner, row, prefix)?);
        }

        let mut slots = Vec::with_capacity(targets.len());
        for (association, target) in mapping.associations.iter().zip(targets) {
            let slot = match target {
                None => AssociationSlot::Null,
                Some(target) => {
                    self.resolve_association(association, target, row, prefix, registry, journal)?
                }
            };
            slots.push((association, slot));
        }
        Ok(slots)
    }

    fn resolve_association(
        &self,
        association: &AssociationMapping,
        target: EntityKey,
        row: &Row,
        prefix: Option<&str>,
        registry: &mut EntityRegistry,
        journal: &mut RowJournal,
    ) -> Result<AssociationSlot> {
        if let Some(existing) = registry.get(&target) {
            return Ok(AssociationSlot::Resolved(existing));
        }

        if let Some(join) = &association.join_prefix {
            let joined_prefix = prefixed(prefix, join);
            let target_mapping = Arc::clone(self.catalog.get(&association.target)?);
            if has_joined_key(&target_mapping, row, &joined_prefix) {
                let joined_key = EntityKey::from_row(
                    &target_mapping.name,
                    &target_mapping.primary_key,
                    row,
                    Some(&joined_prefix),
                )?;
                if joined_key == target {
                    let entity = self.build(
                        &target_mapping,
                        joined_key,
                        row,
                        Some(&joined_prefix),
                        registry,
                        journal,
                    )?;
                    return Ok(AssociationSlot::Resolved(entity));
                }
                tracing::debug!(
                    role = %association.role,
                    expected = %target,
                    joined = %joined_key,
                    "Joined columns name a different target; deferring"
                );
            }
        }

        Ok(AssociationSlot::Placeholder(target))
    }
}

/// What one row has done so far: keys it registered and associations it
/// wants deferred.
#[derive(Debug, Default)]
struct RowJournal {
    created: Vec<EntityKey>,
    deferred: Vec<PendingAssociation>,
}

impl RowJournal {
    fn redefer(&mut self, entity: &EntityRef) {
        let instance = entity.read();
        for (role, slot) in instance.associations() {
            if let AssociationSlot::Placeholder(target) = slot {
                self.deferred.push(PendingAssociation::new(
                    instance.key().clone(),
                    role.as_str(),
                    target.clone(),
                ));
            }
        }
    }
}

fn prefixed(prefix: Option<&str>, column: &str) -> String {
    match prefix {
        Some(p) => format!("{p}{column}"),
        None => column.to_string(),
    }
}

/// Target key named by the association's foreign-key columns, or `None` when
/// every column is NULL.
fn foreign_key(
    association: &AssociationMapping,
    owner: &EntityKey,
    row: &Row,
    prefix: Option<&str>,
) -> Result<Option<EntityKey>> {
    let mut components = Vec::with_capacity(association.foreign_key.len());
    for column in &association.foreign_key {
        let name = prefixed(prefix, column);
        let value = row.get_by_name(&name).ok_or_else(|| {
            InvalidKeyError::new(
                InvalidKeyKind::MissingComponent,
                Some(&association.target),
                format!(
                    "foreign-key column '{name}' of {owner}.{} is missing from the row",
                    association.role
                ),
            )
        })?;
        components.push(value.clone());
    }

    if components.iter().all(Value::is_null) {
        return Ok(None);
    }
    EntityKey::new(association.target.as_str(), components).map(Some)
}

fn has_joined_key(target: &EntityMapping, row: &Row, prefix: &str) -> bool {
    target.primary_key.iter().all(|column| {
        row.get_prefixed(Some(prefix), column)
            .is_some_and(|v| !v.is_null())
    })
}
