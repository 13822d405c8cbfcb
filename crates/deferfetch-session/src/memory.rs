//! In-process secondary loader.
//!
//! Holds target rows keyed by [`EntityKey`] and answers batch requests from
//! them. Every request is recorded, which makes the loader convenient for
//! asserting how many round trips a cursor issued.

use deferfetch_core::{Error, EntityKey, LoadRequest, LoadResponse, Result, Row, SecondaryLoader};
use std::collections::HashMap;

/// Secondary loader over rows held in memory.
#[derive(Debug, Default)]
pub struct InMemoryLoader {
    rows: HashMap<EntityKey, Row>,
    requests: Vec<LoadRequest>,
    fail_next: Option<String>,
}

impl InMemoryLoader {
    /// Create an empty loader.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace the row for `key`.
    pub fn insert(&mut self, key: EntityKey, row: Row) {
        self.rows.insert(key, row);
    }

    /// Builder form of [`insert`](Self::insert).
    #[must_use]
    pub fn with_row(mut self, key: EntityKey, row: Row) -> Self {
        self.insert(key, row);
        self
    }

    /// Remove the row for `key`, so later loads report it as not found.
    pub fn remove(&mut self, key: &EntityKey) -> Option<Row> {
        self.rows.remove(key)
    }

    /// Make the next load fail with `message`.
    pub fn fail_next_load(&mut self, message: impl Into<String>) {
        self.fail_next = Some(message.into());
    }

    /// Every request received so far, in order.
    pub fn requests(&self) -> &[LoadRequest] {
        &self.requests
    }

    /// Number of loads issued so far.
    pub fn load_count(&self) -> usize {
        self.requests.len()
    }

    /// Forget recorded requests.
    pub fn clear_requests(&mut self) {
        self.requests.clear();
    }
}

impl SecondaryLoader for InMemoryLoader {
    fn load(&mut self, request: &LoadRequest) -> Result<LoadResponse> {
        self.requests.push(request.clone());
        if let Some(message) = self.fail_next.take() {
            return Err(Error::Custom(message));
        }

        let mut response = LoadResponse::new();
        for key in &request.keys {
            match self.rows.get(key) {
                Some(row) => response.found(key.clone(), row.clone()),
                None => response.not_found(key.clone()),
            }
        }
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deferfetch_core::{LoadOutcome, Value};

    fn request(ids: &[i64]) -> LoadRequest {
        LoadRequest {
            role: "owner".into(),
            target_entity: "User".into(),
            key_columns: vec!["id".into()],
            keys: ids
                .iter()
                .map(|id| EntityKey::single("User", *id).unwrap())
                .collect(),
        }
    }

    #[test]
    fn answers_from_stored_rows() {
        let key = EntityKey::single("User", 1_i64).unwrap();
        let mut loader =
            InMemoryLoader::new().with_row(key.clone(), Row::from_pairs([("id", Value::BigInt(1))]));

        let response = loader.load(&request(&[1, 2])).unwrap();
        assert!(response.row(&key).is_some());
        assert!(matches!(
            response.outcome(&EntityKey::single("User", 2_i64).unwrap()),
            Some(LoadOutcome::NotFound)
        ));
        assert_eq!(loader.load_count(), 1);
        assert_eq!(loader.requests()[0].keys.len(), 2);
    }

    #[test]
    fn injected_failure_fires_once() {
        let mut loader = InMemoryLoader::new();
        loader.fail_next_load("database is locked");

        let err = loader.load(&request(&[1])).unwrap_err();
        assert_eq!(err.to_string(), "database is locked");
        assert!(loader.load(&request(&[1])).is_ok());
        assert_eq!(loader.load_count(), 2);

        loader.clear_requests();
        assert_eq!(loader.load_count(), 0);
    }
}
