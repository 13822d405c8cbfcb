//! Pending association queue.
//!
//! Associations that the row processor could not resolve inline are grouped
//! into batch windows keyed by `(role, target entity)`. A window is drained as
//! a whole by the batch initializer, either because it filled up or because
//! the cursor forced a flush.

use deferfetch_core::{BatchWindowKey, PendingAssociation};
use std::collections::{BTreeMap, HashSet};

/// A bounded group of pending associations sharing one secondary load.
#[derive(Debug, Clone)]
pub struct BatchWindow {
    capacity: usize,
    entries: Vec<PendingAssociation>,
    members: HashSet<PendingAssociation>,
}

impl BatchWindow {
    fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: Vec::new(),
            members: HashSet::new(),
        }
    }

    /// Maximum number of entries before a size-triggered flush.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Entries in deferral order.
    pub fn entries(&self) -> &[PendingAssociation] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether the window reached its capacity.
    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.capacity
    }
}

/// Queue of batch windows for one cursor.
///
/// Windows are kept in key order so flushes run in a stable sequence.
#[derive(Debug, Default)]
pub struct PendingAssociationQueue {
    windows: BTreeMap<BatchWindowKey, BatchWindow>,
    abandoned: Vec<PendingAssociation>,
    failed: Vec<PendingAssociation>,
}

impl PendingAssociationQueue {
    /// Create an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `pending` to the window for its `(role, target entity)`.
    ///
    /// `capacity` sizes the window when this call creates it. An entry that
    /// is already queued is ignored. Returns whether the window is now full.
    pub fn defer(&mut self, pending: PendingAssociation, capacity: usize) -> bool {
        let window = self
            .windows
            .entry(pending.window_key())
            .or_insert_with(|| BatchWindow::new(capacity));

        if window.members.insert(pending.clone()) {
            tracing::trace!(
                pending = %pending,
                window_len = window.entries.len() + 1,
                capacity = window.capacity,
                "Deferred association"
            );
            window.entries.push(pending);
        }
        window.is_full()
    }

    /// Remove and return every entry of one window.
    ///
    /// Afterwards the window no longer exists; an unknown key yields nothing.
    pub fn drain(&mut self, key: &BatchWindowKey) -> Vec<PendingAssociation> {
        self.windows
            .remove(key)
            .map(|w| w.entries)
            .unwrap_or_default()
    }

    /// Whether any window holds entries.
    pub fn has_pending(&self) -> bool {
        self.windows.values().any(|w| !w.is_empty())
    }

    /// Total number of queued entries.
    pub fn pending_len(&self) -> usize {
        self.windows.values().map(BatchWindow::len).sum()
    }

    /// Look at one window.
    pub fn window(&self, key: &BatchWindowKey) -> Option<&BatchWindow> {
        self.windows.get(key)
    }

    /// Keys of every non-empty window.
    pub fn window_keys(&self) -> Vec<BatchWindowKey> {
        self.windows
            .iter()
            .filter(|(_, w)| !w.is_empty())
            .map(|(k, _)| k.clone())
            .collect()
    }

    /// Keys of windows that reached their capacity.
    pub fn full_windows(&self) -> Vec<BatchWindowKey> {
        self.windows
            .iter()
            .filter(|(_, w)| w.is_full())
            .map(|(k, _)| k.clone())
            .collect()
    }

    /// Move every queued entry to the abandoned list and return them.
    pub fn abandon_all(&mut self) -> Vec<PendingAssociation> {
        let dropped: Vec<PendingAssociation> = std::mem::take(&mut self.windows)
            .into_values()
            .flat_map(|w| w.entries)
            .collect();
        self.abandoned.extend(dropped.iter().cloned());
        dropped
    }

    /// Record entries whose batch load failed.
    pub fn record_failed(&mut self, pending: &[PendingAssociation]) {
        self.failed.extend_from_slice(pending);
    }

    /// Entries explicitly abandoned so far.
    pub fn abandoned(&self) -> &[PendingAssociation] {
        &self.abandoned
    }

    /// Entries whose batch load failed so far.
    pub fn failed(&self) -> &[PendingAssociation] {
        &self.failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deferfetch_core::EntityKey;

    fn pending(appt: i64, role: &str, user: i64) -> PendingAssociation {
        PendingAssociation::new(
            EntityKey::single("Appointment", appt).unwrap(),
            role,
            EntityKey::single("User", user).unwrap(),
        )
    }

    #[test]
    fn windows_group_by_role_and_target() {
        let mut queue = PendingAssociationQueue::new();
        assert!(!queue.defer(pending(1, "owner", 1), 10));
        assert!(!queue.defer(pending(1, "createdBy", 1), 10));
        assert!(!queue.defer(pending(2, "owner", 2), 10));

        assert!(queue.has_pending());
        assert_eq!(queue.pending_len(), 3);
        assert_eq!(
            queue.window_keys(),
            vec![
                BatchWindowKey::new("createdBy", "User"),
                BatchWindowKey::new("owner", "User"),
            ]
        );
        let owner = queue.window(&BatchWindowKey::new("owner", "User")).unwrap();
        assert_eq!(owner.len(), 2);
        assert_eq!(owner.capacity(), 10);
    }

    #[test]
    fn defer_reports_full_window() {
        let mut queue = PendingAssociationQueue::new();
        assert!(!queue.defer(pending(1, "owner", 1), 2));
        assert!(queue.full_windows().is_empty());
        assert!(queue.defer(pending(2, "owner", 2), 2));
        assert_eq!(queue.full_windows(), vec![BatchWindowKey::new("owner", "User")]);
    }

    #[test]
    fn duplicate_entries_are_ignored() {
        let mut queue = PendingAssociationQueue::new();
        queue.defer(pending(1, "owner", 1), 5);
        queue.defer(pending(1, "owner", 1), 5);
        assert_eq!(queue.pending_len(), 1);
    }

    #[test]
    fn drain_empties_window() {
        let mut queue = PendingAssociationQueue::new();
        queue.defer(pending(1, "owner", 1), 5);
        queue.defer(pending(2, "owner", 1), 5);
        queue.defer(pending(1, "createdBy", 1), 5);

        let key = BatchWindowKey::new("owner", "User");
        let drained = queue.drain(&key);
        assert_eq!(drained, vec![pending(1, "owner", 1), pending(2, "owner", 1)]);
        assert!(queue.window(&key).is_none());
        assert!(queue.drain(&key).is_empty());
        assert_eq!(queue.pending_len(), 1);

        // Drained entries may be deferred again into a fresh window.
        queue.defer(pending(1, "owner", 1), 5);
        assert_eq!(queue.pending_len(), 2);
    }

    #[test]
    fn abandon_all_moves_entries() {
        let mut queue = PendingAssociationQueue::new();
        queue.defer(pending(1, "owner", 1), 5);
        queue.defer(pending(1, "createdBy", 1), 5);

        let dropped = queue.abandon_all();
        assert_eq!(dropped.len(), 2);
        assert!(!queue.has_pending());
        assert_eq!(queue.abandoned().len(), 2);

        queue.record_failed(&[pending(3, "owner", 3)]);
        assert_eq!(queue.failed(), &[pending(3, "owner", 3)]);
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let mut queue = PendingAssociationQueue::new();
        assert!(queue.defer(pending(1, "owner", 1), 0));
    }
}
