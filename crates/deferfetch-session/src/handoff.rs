//! Partial hand-off detection.
//!
//! A pull may hand out an entity whose singular associations are still
//! placeholders. That is allowed, but code that reads those associations
//! right away is exactly the pattern that breaks when a result is consumed
//! step-wise instead of materialized. This tracker counts such hand-offs per
//! `(entity, role)` and warns once a threshold is reached.
//!
//! # Example
//!
//! ```ignore
//! let mut tracker = PartialHandoffTracker::new().with_threshold(2);
//! tracker.record("Appointment", ["owner"]);
//! tracker.record("Appointment", ["owner"]); // warns
//! ```

use serde::Serialize;
use std::collections::HashMap;

/// Tracks PARTIAL entities handed to callers.
#[derive(Debug)]
pub struct PartialHandoffTracker {
    /// (entity, role) -> hand-off count
    counts: HashMap<(String, String), usize>,
    threshold: usize,
}

impl Default for PartialHandoffTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Statistics about partial hand-offs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HandoffStats {
    /// Total (entity, role) placeholders handed out
    pub total_handoffs: usize,
    /// Distinct (entity, role) pairs seen
    pub roles_seen: usize,
    /// Pairs that reached the threshold
    pub flagged: usize,
}

impl PartialHandoffTracker {
    /// Create a tracker with the default threshold (3).
    #[must_use]
    pub fn new() -> Self {
        Self {
            counts: HashMap::new(),
            threshold: 3,
        }
    }

    /// Set the warning threshold.
    #[must_use]
    pub fn with_threshold(mut self, threshold: usize) -> Self {
        self.threshold = threshold.max(1);
        self
    }

    #[must_use]
    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Record one PARTIAL hand-off of `entity` with the given pending roles.
    pub fn record<I, S>(&mut self, entity: &str, roles: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for role in roles {
            let role = role.as_ref();
            let count = self
                .counts
                .entry((entity.to_string(), role.to_string()))
                .or_insert(0);
            *count += 1;

            if *count == self.threshold {
                tracing::warn!(
                    target: "deferfetch::partial",
                    entity = entity,
                    role = role,
                    handoffs = *count,
                    threshold = self.threshold,
                    "PARTIAL entities handed out by pull; use materialize_all() or flush() before reading this association"
                );
            }
        }
    }

    /// Count for one `(entity, role)`.
    #[must_use]
    pub fn count_for(&self, entity: &str, role: &str) -> usize {
        self.counts
            .get(&(entity.to_string(), role.to_string()))
            .copied()
            .unwrap_or(0)
    }

    /// Reset all counts.
    pub fn reset(&mut self) {
        self.counts.clear();
    }

    #[must_use]
    pub fn stats(&self) -> HandoffStats {
        HandoffStats {
            total_handoffs: self.counts.values().sum(),
            roles_seen: self.counts.len(),
            flagged: self
                .counts
                .values()
                .filter(|c| **c >= self.threshold)
                .count(),
        }
    }
}
