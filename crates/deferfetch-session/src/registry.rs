//! Entity registry: one instance per `(entity type, primary key)`.
//!
//! The registry is the identity map of a unit of work. Every row, joined
//! column group and batch-load result that names an already-registered key
//! gets the same [`EntityRef`] back, which is also what breaks circular
//! association chains: a second reference to a key returns the existing
//! instance instead of constructing (and recursing into) a new one.
//!
//! # Example
//!
//! ```ignore
//! let mut registry = EntityRegistry::new();
//!
//! let (user, is_new) = registry.get_or_create(EntityKey::single("User", 1_i64)?);
//! assert!(is_new);
//!
//! let (again, is_new) = registry.get_or_create(EntityKey::single("User", 1_i64)?);
//! assert!(!is_new);
//! assert!(user.ptr_eq(&again));
//! ```

use deferfetch_core::{CompletionState, EntityInstance, EntityKey, EntityRef, Result, Value};
use std::collections::HashMap;

/// Identity map for entity instances within one unit of work.
#[derive(Default)]
pub struct EntityRegistry {
    entries: HashMap<EntityKey, EntityRef>,
}

impl EntityRegistry {
    /// Create a new empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Get the instance for `key`, registering a fresh UNINITIALIZED one if
    /// the key is unknown.
    ///
    /// Returns the instance and whether it was created by this call. Callers
    /// must not overwrite fields of a reused instance.
    pub fn get_or_create(&mut self, key: EntityKey) -> (EntityRef, bool) {
        if let Some(existing) = self.entries.get(&key) {
            return (existing.clone(), false);
        }

        let entity = EntityRef::new(EntityInstance::new(key.clone()));
        tracing::trace!(key = %key, "Registered entity");
        self.entries.insert(key, entity.clone());
        (entity, true)
    }

    /// Build the key from raw components, then [`get_or_create`](Self::get_or_create).
    ///
    /// Fails with `InvalidKey` when the entity name or a component is missing.
    pub fn get_or_create_from(
        &mut self,
        entity: &str,
        components: Vec<Value>,
    ) -> Result<(EntityRef, bool)> {
        let key = EntityKey::new(entity, components)?;
        Ok(self.get_or_create(key))
    }

    /// Get a registered instance.
    pub fn get(&self, key: &EntityKey) -> Option<EntityRef> {
        self.entries.get(key).cloned()
    }

    /// Check if an instance with the given key is registered.
    pub fn contains(&self, key: &EntityKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Remove an instance.
    ///
    /// Used to roll back an instance whose row failed mid-construction.
    pub fn remove(&mut self, key: &EntityKey) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Clear all entries.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Get the number of registered instances.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over all registered instances (unordered).
    pub fn iter(&self) -> impl Iterator<Item = (&EntityKey, &EntityRef)> {
        self.entries.iter()
    }

    /// Number of instances currently in `state`.
    pub fn count_in_state(&self, state: CompletionState) -> usize {
        self.entries.values().filter(|e| e.state() == state).count()
    }
}

impl std::fmt::Debug for EntityRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityRegistry")
            .field("entries", &self.entries.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deferfetch_core::{Error, InvalidKeyKind};

    fn user(id: i64) -> EntityKey {
        EntityKey::single("User", id).unwrap()
    }

    #[test]
    fn get_or_create_reuses_identity() {
        let mut registry = EntityRegistry::new();

        let (first, created) = registry.get_or_create(user(1));
        assert!(created);
        assert_eq!(first.state(), CompletionState::Uninitialized);

        first.write().set_field("username", "user1".into());

        let (second, created) = registry.get_or_create(user(1));
        assert!(!created);
        assert!(first.ptr_eq(&second));
        assert_eq!(second.field("username"), Some(Value::Text("user1".into())));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn different_types_same_pk() {
        let mut registry = EntityRegistry::new();
        let (u, _) = registry.get_or_create(user(1));
        let (a, created) = registry.get_or_create(EntityKey::single("Appointment", 1_i64).unwrap());
        assert!(created);
        assert!(!u.ptr_eq(&a));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn invalid_components_fail() {
        let mut registry = EntityRegistry::new();
        let err = registry
            .get_or_create_from("User", vec![Value::Null])
            .unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidKey(ref e) if e.kind == InvalidKeyKind::NullComponent
        ));
        let err = registry.get_or_create_from("", vec![Value::BigInt(1)]).unwrap_err();
        assert!(err.is_invalid_key());
        assert!(registry.is_empty());
    }

    #[test]
    fn remove_and_clear() {
        let mut registry = EntityRegistry::new();
        registry.get_or_create(user(1));
        registry.get_or_create(user(2));
        assert!(registry.contains(&user(1)));

        assert!(registry.remove(&user(1)));
        assert!(!registry.remove(&user(1)));
        assert!(!registry.contains(&user(1)));

        registry.clear();
        assert!(registry.is_empty());
    }

    #[test]
    fn counts_by_state() {
        let mut registry = EntityRegistry::new();
        let (a, _) = registry.get_or_create(user(1));
        registry.get_or_create(user(2));
        a.write().mark_hydrated();

        assert_eq!(registry.count_in_state(CompletionState::Complete), 1);
        assert_eq!(registry.count_in_state(CompletionState::Uninitialized), 1);
        assert_eq!(registry.count_in_state(CompletionState::Partial), 0);
    }
}
