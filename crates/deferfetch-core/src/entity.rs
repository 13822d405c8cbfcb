//! Materialized entity instances and their shared handles.
//!
//! Instances are shared through [`EntityRef`] (`Arc<RwLock<_>>`): the same
//! key always yields the same handle within a unit of work, and completing a
//! deferred association mutates the instance in place, so every handle sees
//! the completion. Callers that need the state as it was at a given moment
//! take an [`EntitySnapshot`].

use crate::key::EntityKey;
use crate::value::Value;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// How far an entity has been built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum CompletionState {
    /// Registered but no columns applied yet.
    Uninitialized,
    /// Scalars applied; at least one singular association is a placeholder.
    Partial,
    /// Scalars applied and every singular association resolved (or null).
    Complete,
}

/// Value of one singular association slot.
#[derive(Debug, Clone)]
pub enum AssociationSlot {
    /// Waiting for a batched load of the given target.
    Placeholder(EntityKey),
    /// Resolved to a registered instance.
    Resolved(EntityRef),
    /// No target: the foreign key was NULL or the target was not found.
    Null,
}

impl AssociationSlot {
    /// Whether the slot still waits for a batch load.
    pub fn is_placeholder(&self) -> bool {
        matches!(self, AssociationSlot::Placeholder(_))
    }
}

/// An entity under construction or handed to the caller.
#[derive(Debug, Clone)]
pub struct EntityInstance {
    key: EntityKey,
    state: CompletionState,
    fields: BTreeMap<String, Value>,
    associations: BTreeMap<String, AssociationSlot>,
}

impl EntityInstance {
    /// A fresh, uninitialized instance.
    pub fn new(key: EntityKey) -> Self {
        Self {
            key,
            state: CompletionState::Uninitialized,
            fields: BTreeMap::new(),
            associations: BTreeMap::new(),
        }
    }

    pub fn key(&self) -> &EntityKey {
        &self.key
    }

    pub fn state(&self) -> CompletionState {
        self.state
    }

    /// Whether columns have been applied to this instance.
    pub fn is_initialized(&self) -> bool {
        self.state != CompletionState::Uninitialized
    }

    pub fn is_complete(&self) -> bool {
        self.state == CompletionState::Complete
    }

    /// Get a scalar field.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// All scalar fields in column-name order.
    pub fn fields(&self) -> &BTreeMap<String, Value> {
        &self.fields
    }

    /// Set a scalar field. Returns `false` (and leaves the field untouched)
    /// if the field was already set.
    pub fn set_field(&mut self, name: impl Into<String>, value: Value) -> bool {
        let name = name.into();
        if self.fields.contains_key(&name) {
            return false;
        }
        self.fields.insert(name, value);
        true
    }

    /// Get an association slot by role.
    pub fn association(&self, role: &str) -> Option<&AssociationSlot> {
        self.associations.get(role)
    }

    /// All association slots in role order.
    pub fn associations(&self) -> &BTreeMap<String, AssociationSlot> {
        &self.associations
    }

    /// Set an association slot during hydration. Returns `false` if the role
    /// was already populated.
    pub fn set_association(&mut self, role: impl Into<String>, slot: AssociationSlot) -> bool {
        let role = role.into();
        if self.associations.contains_key(&role) {
            return false;
        }
        self.associations.insert(role, slot);
        true
    }

    /// Roles that are still placeholders.
    pub fn pending_roles(&self) -> impl Iterator<Item = &str> {
        self.associations
            .iter()
            .filter(|(_, slot)| slot.is_placeholder())
            .map(|(role, _)| role.as_str())
    }

    /// Whether any association is still a placeholder.
    pub fn has_placeholders(&self) -> bool {
        self.associations.values().any(AssociationSlot::is_placeholder)
    }

    /// Finish hydration: the state becomes PARTIAL or COMPLETE.
    pub fn mark_hydrated(&mut self) {
        self.state = if self.has_placeholders() {
            CompletionState::Partial
        } else {
            CompletionState::Complete
        };
    }

    /// Replace the placeholder for `role` with `target` (or null).
    ///
    /// Returns `false` when the role is not a placeholder, so a pending
    /// association can never be applied twice. Once the last placeholder is
    /// gone an initialized instance becomes COMPLETE.
    pub fn resolve(&mut self, role: &str, target: Option<EntityRef>) -> bool {
        match self.associations.get_mut(role) {
            Some(slot) if slot.is_placeholder() => {
                *slot = match target {
                    Some(t) => AssociationSlot::Resolved(t),
                    None => AssociationSlot::Null,
                };
            }
            _ => return false,
        }
        if self.is_initialized() {
            self.mark_hydrated();
        }
        true
    }

    /// Point-in-time copy of this instance.
    pub fn snapshot(&self) -> EntitySnapshot {
        let associations = self
            .associations
            .iter()
            .map(|(role, slot)| {
                let state = match slot {
                    AssociationSlot::Placeholder(k) => SnapshotAssociation::Placeholder(k.clone()),
                    AssociationSlot::Resolved(r) => SnapshotAssociation::Resolved(r.key().clone()),
                    AssociationSlot::Null => SnapshotAssociation::Null,
                };
                (role.clone(), state)
            })
            .collect();
        EntitySnapshot {
            key: self.key.clone(),
            state: self.state,
            fields: self.fields.clone(),
            associations,
        }
    }
}

/// Shared handle to a registered entity instance.
#[derive(Clone)]
pub struct EntityRef(Arc<Shared>);

// The key is kept outside the lock so it can be read while the instance is
// locked (self-referencing associations).
struct Shared {
    key: EntityKey,
    instance: RwLock<EntityInstance>,
}

impl EntityRef {
    /// Wrap a new instance.
    pub fn new(instance: EntityInstance) -> Self {
        Self(Arc::new(Shared {
            key: instance.key().clone(),
            instance: RwLock::new(instance),
        }))
    }

    /// Read access. A poisoned lock is recovered; instances hold plain data.
    pub fn read(&self) -> RwLockReadGuard<'_, EntityInstance> {
        self.0.instance.read().unwrap_or_else(|e| e.into_inner())
    }

    /// Write access. A poisoned lock is recovered; instances hold plain data.
    pub fn write(&self) -> RwLockWriteGuard<'_, EntityInstance> {
        self.0.instance.write().unwrap_or_else(|e| e.into_inner())
    }

    pub fn key(&self) -> &EntityKey {
        &self.0.key
    }

    pub fn state(&self) -> CompletionState {
        self.read().state()
    }

    pub fn is_complete(&self) -> bool {
        self.read().is_complete()
    }

    /// Clone of a scalar field.
    pub fn field(&self, name: &str) -> Option<Value> {
        self.read().field(name).cloned()
    }

    /// The resolved target of `role`, if any.
    ///
    /// Returns `None` for placeholders and null associations alike; use
    /// [`association`](Self::association) to tell them apart.
    pub fn target(&self, role: &str) -> Option<EntityRef> {
        match self.read().association(role) {
            Some(AssociationSlot::Resolved(r)) => Some(r.clone()),
            _ => None,
        }
    }

    /// Clone of the association slot for `role`.
    pub fn association(&self, role: &str) -> Option<AssociationSlot> {
        self.read().association(role).cloned()
    }

    /// Point-in-time copy of the instance.
    pub fn snapshot(&self) -> EntitySnapshot {
        self.read().snapshot()
    }

    /// Whether both handles address the same instance.
    pub fn ptr_eq(&self, other: &EntityRef) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl PartialEq for EntityRef {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl fmt::Debug for EntityRef {
    // Only the key: association graphs may be cyclic.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.instance.try_read() {
            Ok(guard) => write!(f, "EntityRef({}, {:?})", self.0.key, guard.state()),
            Err(_) => write!(f, "EntityRef({}, <locked>)", self.0.key),
        }
    }
}

/// Association state captured in a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum SnapshotAssociation {
    Placeholder(EntityKey),
    Resolved(EntityKey),
    Null,
}

/// Owned copy of an entity at one moment.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntitySnapshot {
    pub key: EntityKey,
    pub state: CompletionState,
    pub fields: BTreeMap<String, Value>,
    pub associations: BTreeMap<String, SnapshotAssociation>,
}

impl EntitySnapshot {
    /// Serialize the snapshot as JSON.
    pub fn to_json(&self) -> crate::Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }
}
