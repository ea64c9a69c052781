// SPDX-License-Identifier: Apache-2.0

//! In-memory registry of per-file read progress.
//!
//! The registry keeps a dense vector of [`StateRecord`]s plus an index from
//! record id to its position in that vector. Both live behind a single
//! reader/writer lock, so readers (`find_previous`, `is_new`, `count`,
//! `get_states`) run concurrently while writers (`update`, `cleanup`,
//! `set_states`) are fully serialized.
//!
//! ## Index invariants
//!
//! Whenever the lock is released:
//! - `index[entries[i].id] == i` for every position `i`
//! - `index` holds exactly the ids present in `entries`
//! - no two entries share an id (except after `set_states` with duplicate
//!   input, where the last occurrence wins in the index)
//!
//! ## Cleanup
//!
//! Finished records whose TTL has elapsed are removed with a swap-with-last
//! pass, so each removal is O(1) and the index is re-synchronized after every
//! single removal. Records that are expired but not finished are kept and
//! logged: losing their resume position would re-ingest or skip data.

mod state;

pub use state::{StateRecord, Ttl};

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

/// Outcome of a cleanup pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupStats {
    /// Records removed in this pass
    pub removed: usize,
    /// Records kept that carry a TTL and may be removed by a later pass
    pub pending: usize,
}

#[derive(Debug, Default)]
struct Inner {
    entries: Vec<StateRecord>,
    index: HashMap<String, usize>,
}

impl Inner {
    fn position(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }

    fn upsert(&mut self, mut state: StateRecord, ts: DateTime<Utc>) {
        state.timestamp = ts;

        match self.position(&state.id) {
            Some(pos) => {
                self.entries[pos] = state;
            }
            None => {
                debug!(id = %state.id, source = %state.source, "New state added");
                self.index.insert(state.id.clone(), self.entries.len());
                self.entries.push(state);
            }
        }
    }

    fn cleanup<F>(&mut self, now: DateTime<Utc>, mut on_remove: F) -> CleanupStats
    where
        F: FnMut(&str),
    {
        let before = self.entries.len();
        let mut live = before;
        let mut pending = 0;
        let mut i = 0;

        while i < live {
            let entry = &self.entries[i];

            if !entry.is_expired(now) {
                if entry.ttl.can_expire() {
                    pending += 1;
                }
                i += 1;
                continue;
            }

            if !entry.finished {
                warn!(
                    id = %entry.id,
                    source = %entry.source,
                    ttl = %entry.ttl,
                    "State is eligible for removal but not finished, keeping it"
                );
                i += 1;
                continue;
            }

            on_remove(entry.id.as_str());
            self.index.remove(entry.id.as_str());

            live -= 1;
            if i != live {
                // Pull the last live entry into the gap and re-check it at `i`.
                self.entries.swap(i, live);
                self.index.insert(self.entries[i].id.clone(), i);
            }
        }

        self.entries.truncate(live);

        CleanupStats {
            removed: before - self.entries.len(),
            pending,
        }
    }

    fn replace(&mut self, states: Vec<StateRecord>) {
        self.index.clear();
        self.index.reserve(states.len());
        for (pos, state) in states.iter().enumerate() {
            self.index.insert(state.id.clone(), pos);
        }
        self.entries = states;
    }

    #[cfg(test)]
    fn is_consistent(&self) -> bool {
        self.index.len() == self.entries.len()
            && self
                .entries
                .iter()
                .enumerate()
                .all(|(pos, entry)| self.index.get(&entry.id) == Some(&pos))
    }
}

/// Thread-safe registry of file states.
///
/// Share it as `Arc<Registry>`. There is no global instance; the owner of the
/// harvesting pipeline creates one and hands it to collaborators.
#[derive(Debug, Default)]
pub struct Registry {
    inner: RwLock<Inner>,
}

impl Registry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert or replace the state with the same id, stamping it with the
    /// current time.
    pub fn update(&self, state: StateRecord) {
        self.update_with_ts(state, Utc::now());
    }

    /// Insert or replace the state with the same id, stamping it with `ts`.
    ///
    /// An existing record is replaced as a whole; no fields are merged.
    pub fn update_with_ts(&self, state: StateRecord, ts: DateTime<Utc>) {
        self.write().upsert(state, ts);
    }

    /// Return the stored record with the same id as `state`, if any.
    pub fn find_previous(&self, state: &StateRecord) -> Option<StateRecord> {
        self.find(&state.id)
    }

    /// Return the stored record for `id`, if any.
    pub fn find(&self, id: &str) -> Option<StateRecord> {
        let inner = self.read();
        inner.position(id).map(|pos| inner.entries[pos].clone())
    }

    /// True if no record with the same id as `state` exists yet.
    pub fn is_new(&self, state: &StateRecord) -> bool {
        !self.contains(&state.id)
    }

    /// True if a record for `id` exists.
    pub fn contains(&self, id: &str) -> bool {
        self.read().index.contains_key(id)
    }

    /// Remove every finished record whose TTL has elapsed.
    pub fn cleanup(&self) -> CleanupStats {
        self.cleanup_at(Utc::now(), |_| {})
    }

    /// Like [`Registry::cleanup`], calling `on_remove` with the id of each
    /// removed record.
    ///
    /// The callback runs while the registry's write lock is held. It must not
    /// block, and must not call back into this registry: doing so deadlocks.
    pub fn cleanup_with<F>(&self, on_remove: F) -> CleanupStats
    where
        F: FnMut(&str),
    {
        self.cleanup_at(Utc::now(), on_remove)
    }

    /// Cleanup pass evaluated against an explicit clock reading.
    pub fn cleanup_at<F>(&self, now: DateTime<Utc>, on_remove: F) -> CleanupStats
    where
        F: FnMut(&str),
    {
        self.write().cleanup(now, on_remove)
    }

    /// Number of records
    pub fn count(&self) -> usize {
        self.read().entries.len()
    }

    /// Independent copy of all records.
    pub fn get_states(&self) -> Vec<StateRecord> {
        self.read().entries.clone()
    }

    /// Replace all records and rebuild the index.
    ///
    /// Ids in `states` are expected to be unique. Duplicates are not rejected:
    /// every copy is stored, and the index points at the last occurrence.
    pub fn set_states(&self, states: Vec<StateRecord>) {
        self.write().replace(states);
    }

    /// A new registry holding a snapshot of this one's records.
    pub fn copy(&self) -> Registry {
        let registry = Registry::new();
        registry.set_states(self.get_states());
        registry
    }
}

impl Clone for Registry {
    fn clone(&self) -> Self {
        self.copy()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::HashMap;
    use std::sync::Arc;
    use std::time::Duration;

    use chrono::TimeDelta;

    fn record(id: &str) -> StateRecord {
        StateRecord::new(id, format!("/var/log/{}.log", id))
    }

    fn assert_consistent(registry: &Registry) {
        assert!(registry.read().is_consistent(), "index out of sync");
    }

    #[test]
    fn test_new_registry_is_empty() {
        let registry = Registry::new();
        assert_eq!(registry.count(), 0);
        assert!(registry.get_states().is_empty());
        assert!(registry.find("missing").is_none());
        assert_consistent(&registry);
    }

    #[test]
    fn test_is_new_before_and_after_update() {
        let registry = Registry::new();
        let state = record("a");

        assert!(registry.is_new(&state));
        assert!(registry.find_previous(&state).is_none());

        registry.update(state.clone());

        assert!(!registry.is_new(&state));
        assert!(registry.find_previous(&state).is_some());
        assert_consistent(&registry);
    }

    #[test]
    fn test_update_same_id_replaces() {
        let registry = Registry::new();
        let t1 = Utc::now();
        let t2 = t1 + TimeDelta::seconds(5);

        registry.update_with_ts(record("a").with_offset(10), t1);
        registry.update_with_ts(record("a").with_offset(10), t2);

        assert_eq!(registry.count(), 1);
        let stored = registry.find("a").unwrap();
        assert_eq!(stored.timestamp, t2);
        assert_eq!(stored.offset, 10);
        assert_consistent(&registry);
    }

    #[test]
    fn test_update_is_full_replacement() {
        let registry = Registry::new();
        let ts = Utc::now();

        registry.update_with_ts(
            record("a")
                .with_offset(500)
                .with_ttl(Duration::from_secs(60))
                .with_finished(true),
            ts,
        );
        registry.update_with_ts(StateRecord::new("a", "/tmp/renamed.log"), ts);

        let stored = registry.find("a").unwrap();
        assert_eq!(stored.source, "/tmp/renamed.log");
        assert_eq!(stored.offset, 0);
        assert_eq!(stored.ttl, Ttl::Never);
        assert!(!stored.finished);
    }

    #[test]
    fn test_update_overrides_caller_timestamp() {
        let registry = Registry::new();
        let ts = Utc::now();

        let mut state = record("a");
        state.timestamp = ts - TimeDelta::days(3);
        registry.update_with_ts(state, ts);

        assert_eq!(registry.find("a").unwrap().timestamp, ts);
    }

    #[test]
    fn test_cleanup_removes_finished_immediate() {
        let registry = Registry::new();
        registry.update(record("a").with_ttl(Duration::ZERO).with_finished(true));

        let stats = registry.cleanup();

        assert_eq!(stats, CleanupStats { removed: 1, pending: 0 });
        assert_eq!(registry.count(), 0);
        assert!(registry.find("a").is_none());
        assert_consistent(&registry);
    }

    #[test]
    fn test_cleanup_never_removes_unfinished() {
        let registry = Registry::new();
        let long_ago = Utc::now() - TimeDelta::days(30);

        registry.update(record("immediate").with_ttl(Ttl::Immediate));
        registry.update_with_ts(
            record("expired").with_ttl(Duration::from_secs(1)),
            long_ago,
        );

        for _ in 0..5 {
            let stats = registry.cleanup();
            assert_eq!(stats.removed, 0);
            assert_eq!(registry.count(), 2);
        }
        assert!(registry.contains("immediate"));
        assert!(registry.contains("expired"));
        assert_consistent(&registry);
    }

    #[test]
    fn test_cleanup_scenario() {
        let _ = tracing_subscriber::fmt::try_init();

        let registry = Registry::new();
        let now = Utc::now();

        registry.update_with_ts(record("a").with_ttl(Ttl::Immediate).with_finished(true), now);
        registry.update_with_ts(
            record("b")
                .with_ttl(Duration::from_secs(3600))
                .with_finished(true),
            now,
        );
        registry.update_with_ts(record("c").with_ttl(Ttl::Immediate), now);

        let stats = registry.cleanup_at(now, |_| {});

        // "c" is eligible but unfinished: kept, with a warning
        assert_eq!(stats, CleanupStats { removed: 1, pending: 1 });
        assert!(!registry.contains("a"));
        assert!(registry.contains("b"));
        assert!(registry.contains("c"));
        assert_consistent(&registry);
    }

    #[test]
    fn test_cleanup_ttl_elapses() {
        let registry = Registry::new();
        let start = Utc::now();
        let ttl = Duration::from_secs(60);

        registry.update_with_ts(record("a").with_ttl(ttl).with_finished(true), start);

        let stats = registry.cleanup_at(start + TimeDelta::seconds(30), |_| {});
        assert_eq!(stats, CleanupStats { removed: 0, pending: 1 });

        let stats = registry.cleanup_at(start + TimeDelta::seconds(61), |_| {});
        assert_eq!(stats, CleanupStats { removed: 1, pending: 0 });
        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn test_cleanup_never_ttl_not_pending() {
        let registry = Registry::new();
        registry.update(record("a").with_ttl(Ttl::Never).with_finished(true));

        let stats = registry.cleanup_at(Utc::now() + TimeDelta::days(3650), |_| {});

        assert_eq!(stats, CleanupStats::default());
        assert_eq!(registry.count(), 1);
    }

    #[test]
    fn test_cleanup_swap_delete_keeps_survivors_intact() {
        let registry = Registry::new();
        let now = Utc::now();

        // Every third record is removable, including the first and last
        let mut expected = HashMap::new();
        for n in 0..30u64 {
            let id = format!("file-{}", n);
            let removable = n % 3 == 0 || n == 29;
            let state = record(&id)
                .with_offset(n * 100)
                .with_ttl(if removable {
                    Ttl::Immediate
                } else {
                    Ttl::After(Duration::from_secs(3600))
                })
                .with_finished(removable);
            registry.update_with_ts(state, now);
            if !removable {
                expected.insert(id, n * 100);
            }
        }

        let mut removed_ids = Vec::new();
        let stats = registry.cleanup_at(now, |id| removed_ids.push(id.to_string()));

        assert_eq!(stats.removed, 30 - expected.len());
        assert_eq!(stats.pending, expected.len());
        assert_eq!(removed_ids.len(), stats.removed);
        assert_eq!(registry.count(), expected.len());
        assert_consistent(&registry);

        for (id, offset) in &expected {
            let stored = registry.find(id).unwrap();
            assert_eq!(&stored.id, id);
            assert_eq!(stored.offset, *offset);
        }
        for id in &removed_ids {
            assert!(!expected.contains_key(id));
            assert!(registry.find(id).is_none());
        }
    }

    #[test]
    fn test_cleanup_all_removable_trailing_run() {
        let registry = Registry::new();
        let now = Utc::now();

        registry.update_with_ts(record("keep").with_ttl(Ttl::Never), now);
        for n in 0..5 {
            registry.update_with_ts(
                record(&format!("gone-{}", n))
                    .with_ttl(Ttl::Immediate)
                    .with_finished(true),
                now,
            );
        }

        let stats = registry.cleanup_at(now, |_| {});

        assert_eq!(stats.removed, 5);
        assert_eq!(registry.count(), 1);
        assert!(registry.contains("keep"));
        assert_consistent(&registry);
    }

    #[test]
    fn test_cleanup_removes_everything() {
        let registry = Registry::new();
        for n in 0..8 {
            registry.update(
                record(&n.to_string())
                    .with_ttl(Ttl::Immediate)
                    .with_finished(true),
            );
        }

        let stats = registry.cleanup();

        assert_eq!(stats.removed, 8);
        assert_eq!(registry.count(), 0);
        assert_consistent(&registry);
    }

    #[test]
    fn test_get_states_is_independent() {
        let registry = Registry::new();
        registry.update(record("a").with_offset(1));

        let mut states = registry.get_states();
        states[0].offset = 999;
        states.push(record("b"));

        assert_eq!(registry.find("a").unwrap().offset, 1);
        assert!(registry.find("b").is_none());
        assert_eq!(registry.count(), 1);
    }

    #[test]
    fn test_set_states_round_trip() {
        let registry = Registry::new();
        for n in 0..10u64 {
            registry.update(record(&format!("f{}", n)).with_offset(n));
        }
        let before = registry.get_states();

        registry.set_states(registry.get_states());

        assert_eq!(registry.count(), before.len());
        for state in &before {
            assert_eq!(registry.find_previous(state).as_ref(), Some(state));
        }
        assert_consistent(&registry);
    }

    #[test]
    fn test_set_states_replaces_everything() {
        let registry = Registry::new();
        registry.update(record("old"));

        registry.set_states(vec![record("x"), record("y")]);

        assert_eq!(registry.count(), 2);
        assert!(!registry.contains("old"));
        assert!(registry.contains("x"));
        assert!(registry.contains("y"));
        assert_consistent(&registry);
    }

    #[test]
    fn test_set_states_duplicate_ids_last_wins() {
        let registry = Registry::new();

        registry.set_states(vec![
            record("dup").with_offset(1),
            record("other"),
            record("dup").with_offset(2),
        ]);

        assert_eq!(registry.count(), 3);
        assert_eq!(registry.find("dup").unwrap().offset, 2);
    }

    #[test]
    fn test_cleanup_after_duplicate_set_states_keeps_survivor_indexed() {
        let registry = Registry::new();

        registry.set_states(vec![
            record("dup").with_ttl(Ttl::Immediate).with_finished(true),
            record("other"),
            record("dup").with_offset(7),
        ]);

        let stats = registry.cleanup();

        // The removed copy shares its id with the one swapped into its slot
        assert_eq!(stats.removed, 1);
        assert_eq!(registry.count(), 2);
        assert_eq!(registry.find("dup").unwrap().offset, 7);
        assert_consistent(&registry);

        registry.update(record("dup").with_offset(8));
        assert_eq!(registry.count(), 2);
        assert_eq!(registry.find("dup").unwrap().offset, 8);
        assert_consistent(&registry);
    }

    #[test]
    fn test_copy_is_independent() {
        let registry = Registry::new();
        registry.update(record("a").with_offset(5));

        let copy = registry.copy();
        copy.update(record("a").with_offset(50));
        copy.update(record("b"));

        assert_eq!(registry.find("a").unwrap().offset, 5);
        assert!(!registry.contains("b"));
        assert_eq!(copy.count(), 2);

        let cloned = registry.clone();
        assert_eq!(cloned.get_states(), registry.get_states());
    }

    #[test]
    fn test_index_consistent_across_mixed_operations() {
        let registry = Registry::new();
        let now = Utc::now();

        for round in 0..4u64 {
            for n in 0..12u64 {
                let id = format!("f{}", (n * 7 + round) % 15);
                let finished = (n + round) % 2 == 0;
                registry.update_with_ts(
                    record(&id)
                        .with_offset(round * 1000 + n)
                        .with_ttl(Ttl::Immediate)
                        .with_finished(finished),
                    now,
                );
                assert_consistent(&registry);
            }
            registry.cleanup_at(now, |_| {});
            assert_consistent(&registry);
            registry.set_states(registry.get_states());
            assert_consistent(&registry);
        }
    }

    #[test]
    fn test_concurrent_updates_and_reads() {
        let registry = Arc::new(Registry::new());

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    for n in 0..200u64 {
                        let id = format!("file-{}", n % 50);
                        registry.update(record(&id).with_offset(t * 1000 + n));
                        let _ = registry.find(&id);
                        let _ = registry.count();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(registry.count(), 50);
        assert_consistent(&registry);
    }
}
