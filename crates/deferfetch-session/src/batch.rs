//! Batch initialization of deferred associations.
//!
//! One call resolves one drained batch window with at most one secondary
//! load: the distinct target keys are collected, loaded together, hydrated
//! through the row processor (so loaded targets join the registry and may
//! defer associations of their own), and finally written into the owners'
//! placeholder slots.

use crate::processor::RowProcessor;
use crate::queue::PendingAssociationQueue;
use crate::registry::EntityRegistry;
use deferfetch_core::{
    BatchWindowKey, EntityKey, EntityRef, Error, LoadRequest, PendingAssociation, Result,
    SecondaryLoadError, SecondaryLoader,
};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Result of resolving one batch window.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchOutcome {
    /// Distinct target keys sent to the loader. Targets already initialized
    /// in the registry are resolved without being requested.
    pub requested: usize,
    /// Keys the loader found.
    pub found: usize,
    /// Pending associations written into their owners.
    pub resolved: usize,
    /// Of `resolved`, those whose target was not found and became null.
    pub dangling: usize,
    /// Pending associations whose owner slot was no longer a placeholder.
    pub skipped: usize,
    /// Whether a secondary load was issued.
    pub loaded: bool,
}

/// Issues one secondary load per window and applies the results.
pub struct BatchInitializer<'a, L: SecondaryLoader + ?Sized> {
    loader: &'a mut L,
    processor: &'a RowProcessor,
}

impl<'a, L: SecondaryLoader + ?Sized> BatchInitializer<'a, L> {
    pub fn new(loader: &'a mut L, processor: &'a RowProcessor) -> Self {
        Self { loader, processor }
    }

    /// Resolve the drained entries of `window`.
    ///
    /// At most one secondary load is issued; none when every target is
    /// already initialized in the registry.
    ///
    /// If the load fails, nothing is applied to any owner and the returned
    /// [`SecondaryLoadError`] lists every entry of the batch.
    #[tracing::instrument(level = "debug", skip(self, pending, registry, queue), fields(window = %window, entries = pending.len()))]
    pub fn resolve(
        &mut self,
        window: &BatchWindowKey,
        pending: Vec<PendingAssociation>,
        registry: &mut EntityRegistry,
        queue: &mut PendingAssociationQueue,
    ) -> Result<BatchOutcome> {
        if pending.is_empty() {
            return Ok(BatchOutcome::default());
        }

        // Targets already materialized in this unit of work need no load.
        let mut targets: HashMap<EntityKey, EntityRef> = HashMap::new();
        let mut seen = HashSet::new();
        let mut keys = Vec::new();
        for entry in &pending {
            if !seen.insert(&entry.target) {
                continue;
            }
            match registry.get(&entry.target) {
                Some(known) if known.read().is_initialized() => {
                    targets.insert(entry.target.clone(), known);
                }
                _ => keys.push(entry.target.clone()),
            }
        }

        let mut outcome = BatchOutcome {
            requested: keys.len(),
            ..BatchOutcome::default()
        };

        if !keys.is_empty() {
            let target_mapping = match self.processor.catalog().get(&window.target_entity) {
                Ok(mapping) => Arc::clone(mapping),
                Err(e) => return Err(load_failure(window, pending, e)),
            };

            let request = LoadRequest {
                role: window.role.clone(),
                target_entity: window.target_entity.clone(),
                key_columns: target_mapping.primary_key.clone(),
                keys,
            };

            tracing::debug!(
                role = %request.role,
                target = %request.target_entity,
                keys = request.len(),
                owners = pending.len(),
                "Batch loading deferred associations"
            );

            let response = match self.loader.load(&request) {
                Ok(response) => response,
                Err(e) => return Err(load_failure(window, pending, e)),
            };
            outcome.loaded = true;

            // Materialize every found target before touching any owner.
            for key in &request.keys {
                let Some(row) = response.row(key) else {
                    continue;
                };
                let hydrated =
                    self.processor
                        .hydrate(&target_mapping, key.clone(), row, None, registry, queue);
                match hydrated {
                    Ok(entity) => {
                        targets.insert(key.clone(), entity);
                        outcome.found += 1;
                    }
                    Err(e) => return Err(load_failure(window, pending, e)),
                }
            }
        }

        for entry in &pending {
            let Some(owner) = registry.get(&entry.owner) else {
                tracing::warn!(pending = %entry, "Owner of deferred association is no longer registered");
                outcome.skipped += 1;
                continue;
            };
            let target = targets.get(&entry.target).cloned();
            let dangling = target.is_none();
            if owner.write().resolve(&entry.role, target) {
                outcome.resolved += 1;
                if dangling {
                    tracing::debug!(pending = %entry, "Dangling reference resolved to null");
                    outcome.dangling += 1;
                }
            } else {
                outcome.skipped += 1;
            }
        }

        tracing::debug!(
            requested = outcome.requested,
            found = outcome.found,
            resolved = outcome.resolved,
            dangling = outcome.dangling,
            "Batch resolved"
        );

        Ok(outcome)
    }
}

fn load_failure(window: &BatchWindowKey, pending: Vec<PendingAssociation>, cause: Error) -> Error {
    tracing::warn!(
        window = %window,
        entries = pending.len(),
        error = %cause,
        "Secondary load failed"
    );
    Error::SecondaryLoad(SecondaryLoadError {
        role: window.role.clone(),
        target_entity: window.target_entity.clone(),
        pending,
        message: cause.to_string(),
        source: Some(Box::new(cause)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryLoader;
    use deferfetch_core::{
        AssociationMapping, AssociationSlot, CompletionState, EntityMapping, MappingCatalog, Row,
        Value,
    };

    fn processor() -> RowProcessor {
        let catalog = MappingCatalog::new()
            .with(
                EntityMapping::new("Appointment")
                    .column("name")
                    .association(AssociationMapping::many_to_one("owner", "User")),
            )
            .unwrap()
            .with(EntityMapping::new("User").column("username").batch_size(10))
            .unwrap();
        RowProcessor::new(Arc::new(catalog), "Appointment", 16).unwrap()
    }

    fn user_key(id: i64) -> EntityKey {
        EntityKey::single("User", id).unwrap()
    }

    fn user_row(id: i64) -> Row {
        Row::from_pairs([
            ("id", Value::BigInt(id)),
            ("username", Value::Text(format!("user{id}"))),
        ])
    }

    fn appointments(
        processor: &RowProcessor,
        owners: &[i64],
        registry: &mut EntityRegistry,
        queue: &mut PendingAssociationQueue,
    ) -> Vec<EntityRef> {
        owners
            .iter()
            .enumerate()
            .map(|(i, owner)| {
                let row = Row::from_pairs([
                    ("id", Value::BigInt(i as i64 + 1)),
                    ("owner_id", Value::BigInt(*owner)),
                ]);
                processor.process_row(&row, registry, queue).unwrap()
            })
            .collect()
    }

    #[test]
    fn one_load_for_distinct_keys() {
        let processor = processor();
        let mut registry = EntityRegistry::new();
        let mut queue = PendingAssociationQueue::new();
        let appts = appointments(&processor, &[1, 2, 1], &mut registry, &mut queue);

        let mut loader = InMemoryLoader::new();
        loader.insert(user_key(1), user_row(1));
        loader.insert(user_key(2), user_row(2));

        let window = BatchWindowKey::new("owner", "User");
        let pending = queue.drain(&window);
        let outcome = BatchInitializer::new(&mut loader, &processor)
            .resolve(&window, pending, &mut registry, &mut queue)
            .unwrap();

        assert_eq!(loader.load_count(), 1);
        assert_eq!(loader.requests()[0].keys, vec![user_key(1), user_key(2)]);
        assert_eq!(outcome.requested, 2);
        assert_eq!(outcome.found, 2);
        assert_eq!(outcome.resolved, 3);
        assert!(appts.iter().all(EntityRef::is_complete));
        assert!(appts[0].target("owner").unwrap().ptr_eq(&appts[2].target("owner").unwrap()));
        assert_eq!(
            appts[1].target("owner").unwrap().field("username"),
            Some(Value::Text("user2".into()))
        );
    }

    #[test]
    fn missing_target_is_dangling() {
        let processor = processor();
        let mut registry = EntityRegistry::new();
        let mut queue = PendingAssociationQueue::new();
        let appts = appointments(&processor, &[404], &mut registry, &mut queue);

        let mut loader = InMemoryLoader::new();
        let window = BatchWindowKey::new("owner", "User");
        let pending = queue.drain(&window);
        let outcome = BatchInitializer::new(&mut loader, &processor)
            .resolve(&window, pending, &mut registry, &mut queue)
            .unwrap();

        assert_eq!(outcome.dangling, 1);
        assert_eq!(appts[0].state(), CompletionState::Complete);
        assert!(matches!(appts[0].association("owner"), Some(AssociationSlot::Null)));
    }

    #[test]
    fn failed_load_applies_nothing() {
        let processor = processor();
        let mut registry = EntityRegistry::new();
        let mut queue = PendingAssociationQueue::new();
        let appts = appointments(&processor, &[1, 2], &mut registry, &mut queue);

        let mut loader = InMemoryLoader::new();
        loader.insert(user_key(1), user_row(1));
        loader.fail_next_load("connection reset");

        let window = BatchWindowKey::new("owner", "User");
        let pending = queue.drain(&window);
        let err = BatchInitializer::new(&mut loader, &processor)
            .resolve(&window, pending, &mut registry, &mut queue)
            .unwrap_err();

        assert!(err.is_secondary_load_failure());
        assert_eq!(err.failed_associations().unwrap().len(), 2);
        assert!(err.to_string().contains("connection reset"));
        assert!(appts.iter().all(|a| a.state() == CompletionState::Partial));
        assert!(!registry.contains(&user_key(1)));
    }

    #[test]
    fn second_application_is_skipped() {
        let processor = processor();
        let mut registry = EntityRegistry::new();
        let mut queue = PendingAssociationQueue::new();
        appointments(&processor, &[1], &mut registry, &mut queue);

        let mut loader = InMemoryLoader::new();
        loader.insert(user_key(1), user_row(1));

        let window = BatchWindowKey::new("owner", "User");
        let pending = queue.drain(&window);
        let mut initializer = BatchInitializer::new(&mut loader, &processor);
        let first = initializer
            .resolve(&window, pending.clone(), &mut registry, &mut queue)
            .unwrap();
        let second = initializer
            .resolve(&window, pending, &mut registry, &mut queue)
            .unwrap();

        assert_eq!(first.resolved, 1);
        assert_eq!(second.resolved, 0);
        assert_eq!(second.skipped, 1);
    }

    #[test]
    fn initialized_targets_skip_the_load() {
        let processor = processor();
        let mut registry = EntityRegistry::new();
        let mut queue = PendingAssociationQueue::new();
        let appts = appointments(&processor, &[1, 2], &mut registry, &mut queue);

        let (known, _) = registry.get_or_create(user_key(1));
        known.write().mark_hydrated();

        let mut loader = InMemoryLoader::new();
        loader.insert(user_key(2), user_row(2));

        let window = BatchWindowKey::new("owner", "User");
        let pending = queue.drain(&window);
        let outcome = BatchInitializer::new(&mut loader, &processor)
            .resolve(&window, pending, &mut registry, &mut queue)
            .unwrap();

        assert_eq!(outcome.requested, 1);
        assert_eq!(loader.requests()[0].keys, vec![user_key(2)]);
        assert!(appts[0].target("owner").unwrap().ptr_eq(&known));
        assert!(appts[1].is_complete());
    }

    #[test]
    fn empty_batch_issues_no_load() {
        let processor = processor();
        let mut registry = EntityRegistry::new();
        let mut queue = PendingAssociationQueue::new();
        let mut loader = InMemoryLoader::new();

        let outcome = BatchInitializer::new(&mut loader, &processor)
            .resolve(&BatchWindowKey::new("owner", "User"), Vec::new(), &mut registry, &mut queue)
            .unwrap();
        assert!(!outcome.loaded);
        assert_eq!(loader.load_count(), 0);
    }
}
