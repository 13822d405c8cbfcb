//! Flush policy of result cursors across consumption modes.

use std::collections::HashSet;

use deferfetch::prelude::*;
use deferfetch::{AssociationSlot, CursorErrorKind, PendingAssociation};

fn catalog(user_batch: usize) -> MappingCatalog {
    MappingCatalog::new()
        .with(
            EntityMapping::new("Appointment")
                .column("name")
                .association(AssociationMapping::many_to_one("owner", "User").joined("o_")),
        )
        .unwrap()
        .with(
            EntityMapping::new("User")
                .column("username")
                .association(AssociationMapping::many_to_one("manager", "User"))
                .batch_size(user_batch),
        )
        .unwrap()
}

fn user_row(id: i64, manager: Option<i64>) -> Row {
    Row::from_pairs([
        ("id", Value::BigInt(id)),
        ("username", Value::Text(format!("user{id}"))),
        ("manager_id", manager.map_or(Value::Null, Value::BigInt)),
    ])
}

/// Users 1..=count, each without a manager.
fn loader(count: i64) -> InMemoryLoader {
    let mut loader = InMemoryLoader::new();
    for id in 1..=count {
        loader.insert(EntityKey::single("User", id).unwrap(), user_row(id, None));
    }
    loader
}

fn appointment_rows(owners: &[i64]) -> std::vec::IntoIter<Result<Row>> {
    owners
        .iter()
        .enumerate()
        .map(|(i, owner)| {
            Ok(Row::from_pairs([
                ("id", Value::BigInt(i as i64 + 1)),
                ("name", Value::Text(format!("appointment {}", i + 1))),
                ("owner_id", Value::BigInt(*owner)),
            ]))
        })
        .collect::<Vec<_>>()
        .into_iter()
}

fn begin(user_batch: usize, loader: InMemoryLoader) -> UnitOfWork<InMemoryLoader> {
    UnitOfWork::begin(catalog(user_batch), loader).unwrap()
}

#[test]
fn materialize_all_is_complete_for_every_batch_size() {
    let owners = [3, 1, 4, 1, 5, 9, 2, 6, 5, 3, 5];
    for batch in 1..=12 {
        let mut uow = begin(batch, loader(9));
        let mut cursor = uow.query("Appointment", appointment_rows(&owners)).unwrap();

        let result = cursor.materialize_all().unwrap();
        assert_eq!(result.len(), owners.len());
        for (appointment, owner) in result.iter().zip(owners) {
            assert!(appointment.is_complete(), "batch size {batch}");
            let target = appointment.target("owner").unwrap();
            assert_eq!(target.key(), &EntityKey::single("User", owner).unwrap());
            assert!(target.is_complete());
        }
        assert!(!cursor.has_pending());
    }
}

#[test]
fn pull_returns_partial_below_batch_size() {
    let mut uow = begin(2, loader(2));
    let mut cursor = uow.query("Appointment", appointment_rows(&[1, 1, 2])).unwrap();

    let first = cursor.pull().unwrap().unwrap();
    assert_eq!(first.state(), CompletionState::Partial);
    assert!(cursor.has_pending());

    // The second row defers a second owner entry and fills the window.
    let second = cursor.pull().unwrap().unwrap();
    assert!(first.is_complete());
    assert!(second.is_complete());
    assert_eq!(cursor.stats().size_triggered_flushes, 1);
}

#[test]
fn no_association_is_resolved_twice() {
    let owners = [1, 2, 3, 4, 5, 1, 2];
    let mut uow = begin(3, loader(5));
    let mut cursor = uow.query("Appointment", appointment_rows(&owners)).unwrap();

    let mut seen = Vec::new();
    for _ in 0..4 {
        seen.push(cursor.pull().unwrap().unwrap());
    }
    cursor.flush().unwrap();
    seen.push(cursor.pull().unwrap().unwrap());
    cursor.close().unwrap();
    let after_close = cursor.stats().clone();
    cursor.close().unwrap();

    assert_eq!(cursor.stats(), &after_close);
    // Five rows were processed; each deferred owner was applied exactly once.
    assert_eq!(after_close.rows_processed, 5);
    assert_eq!(after_close.associations_resolved, 5);
    assert_eq!(after_close.abandoned_associations, 0);
    assert!(seen.iter().all(EntityRef::is_complete));

    drop(cursor);
    let requested: Vec<EntityKey> = uow
        .loader()
        .requests()
        .iter()
        .flat_map(|r| r.keys.clone())
        .collect();
    let unique: HashSet<&EntityKey> = requested.iter().collect();
    assert_eq!(unique.len(), requested.len(), "a target key was loaded twice");
}

#[test]
fn dangling_reference_completes_as_null() {
    let mut uow = begin(10, loader(1));
    let mut cursor = uow.query("Appointment", appointment_rows(&[1, 404])).unwrap();

    let result = cursor.materialize_all().unwrap();
    assert!(result[1].is_complete());
    assert!(matches!(result[1].association("owner"), Some(AssociationSlot::Null)));
    assert!(result[1].target("owner").is_none());
    assert_eq!(cursor.stats().dangling_references, 1);
    assert_eq!(cursor.stats().secondary_loads, 1);
}

#[test]
fn size_triggered_failure_surfaces_at_pull() {
    let mut failing = loader(2);
    failing.fail_next_load("deadlock detected");
    let mut uow = begin(2, failing);
    let mut cursor = uow.query("Appointment", appointment_rows(&[1, 2, 1])).unwrap();

    let first = cursor.pull().unwrap().unwrap();
    let err = cursor.pull().unwrap_err();

    assert!(err.to_string().contains("deadlock detected"));
    let failed: &[PendingAssociation] = err.failed_associations().unwrap();
    assert_eq!(failed.len(), 2);
    assert!(failed.iter().all(|p| p.role == "owner"));
    assert_eq!(first.state(), CompletionState::Partial);
    assert_eq!(cursor.stats().failed_associations, 2);

    // The cursor stays usable; later rows are still processed.
    assert_eq!(cursor.state(), CursorState::Open);
    let third = cursor.pull().unwrap().unwrap();
    cursor.close().unwrap();
    assert!(third.is_complete());
    assert_eq!(first.state(), CompletionState::Partial);
}

#[test]
fn chained_deferrals_complete_on_full_flush() {
    let mut users = InMemoryLoader::new();
    users.insert(EntityKey::single("User", 1_i64).unwrap(), user_row(1, Some(2)));
    users.insert(EntityKey::single("User", 2_i64).unwrap(), user_row(2, Some(3)));
    users.insert(EntityKey::single("User", 3_i64).unwrap(), user_row(3, None));

    let mut uow = begin(10, users);
    let mut cursor = uow.query("Appointment", appointment_rows(&[1])).unwrap();
    let appointment = cursor.materialize_all().unwrap().remove(0);

    let owner = appointment.target("owner").unwrap();
    let manager = owner.target("manager").unwrap();
    let top = manager.target("manager").unwrap();
    assert_eq!(top.key(), &EntityKey::single("User", 3_i64).unwrap());
    assert!(top.is_complete());
    assert!(matches!(top.association("manager"), Some(AssociationSlot::Null)));
    assert_eq!(cursor.stats().secondary_loads, 3);
}

#[test]
fn joined_owner_needs_no_secondary_load() {
    let mut uow = begin(10, InMemoryLoader::new());
    let rows: Vec<Result<Row>> = vec![Ok(Row::from_pairs([
        ("id", Value::BigInt(1)),
        ("name", Value::Text("Visit Gym".into())),
        ("owner_id", Value::BigInt(1)),
        ("o_id", Value::BigInt(1)),
        ("o_username", Value::Text("user1".into())),
        ("o_manager_id", Value::Null),
    ]))];
    let mut cursor = uow.query("Appointment", rows.into_iter()).unwrap();

    let appointment = cursor.pull().unwrap().unwrap();
    assert!(appointment.is_complete());
    assert_eq!(
        appointment.target("owner").unwrap().field("username"),
        Some(Value::Text("user1".into()))
    );
    assert_eq!(cursor.stats().partial_handoffs, 0);
    drop(cursor);
    assert_eq!(uow.loader().load_count(), 0);
}

#[test]
fn closed_cursor_rejects_every_entry_point() {
    let mut uow = begin(10, loader(1));
    let mut cursor = uow.query("Appointment", appointment_rows(&[1])).unwrap();
    cursor.close().unwrap();

    let err = cursor.materialize_all().unwrap_err();
    assert!(matches!(err, Error::Cursor(ref e) if e.kind == CursorErrorKind::Closed));
    assert!(cursor.pull().is_err());
    assert!(cursor.iter().next().is_none());
    assert_eq!(cursor.stats().rows_processed, 0);
}

#[test]
fn configuration_batch_size_applies_without_mapping_size() {
    let catalog = MappingCatalog::new()
        .with(
            EntityMapping::new("Appointment")
                .association(AssociationMapping::many_to_one("owner", "User")),
        )
        .unwrap()
        .with(EntityMapping::new("User").column("username"))
        .unwrap();
    let config = FetchConfig::from_json(r#"{"default_batch_size": 2}"#).unwrap();
    let mut uow = UnitOfWork::with_config(catalog, loader(2), config).unwrap();
    let mut cursor = uow.query("Appointment", appointment_rows(&[1, 2])).unwrap();

    let first = cursor.pull().unwrap().unwrap();
    assert_eq!(first.state(), CompletionState::Partial);
    cursor.pull().unwrap();
    assert!(first.is_complete());
    assert_eq!(cursor.stats().size_triggered_flushes, 1);
}
