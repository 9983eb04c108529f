//! Flow state database
//!
//! The database is the node's local replica of every flow state object it
//! knows about. It is a single map behind one `RwLock`: every mutation is
//! exclusive, while readers take immutable snapshots and release the lock
//! immediately. Entry count is bounded by the sum of node degrees in the
//! DIF, so copying the whole map for a snapshot is cheap.

use crate::routing::flow_state::{FlowState, FlowStateObject, FsoKey, PortId, SequenceNumber};
use parking_lot::RwLock;
use std::collections::HashMap;

/// Result of offering an object to the database
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The key was unknown and the object was stored
    Inserted,
    /// The object superseded an older copy
    Updated,
    /// Lower or equal sequence number; nothing changed
    Stale,
}

impl UpdateOutcome {
    /// Whether the database changed
    pub fn is_accepted(self) -> bool {
        !matches!(self, Self::Stale)
    }
}

/// An object waiting to be flooded, with the port it must not be sent back to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingFlood {
    /// Object to flood
    pub object: FlowStateObject,
    /// Port the object was learned from, if it came from a neighbor
    pub avoid_port: Option<PortId>,
}

/// Immutable point-in-time copy of the database
#[derive(Debug, Clone, Default)]
pub struct FlowStateSnapshot {
    generation: u64,
    objects: Vec<FlowStateObject>,
}

impl FlowStateSnapshot {
    /// Build a snapshot from loose objects (used by tests and benchmarks)
    pub fn from_objects(generation: u64, mut objects: Vec<FlowStateObject>) -> Self {
        objects.sort_by_key(|o| o.key());
        Self {
            generation,
            objects,
        }
    }

    /// Database generation this snapshot was taken at
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// All objects, ordered by key
    pub fn objects(&self) -> &[FlowStateObject] {
        &self.objects
    }

    /// Iterate over the objects
    pub fn iter(&self) -> std::slice::Iter<'_, FlowStateObject> {
        self.objects.iter()
    }

    /// Look up one object
    pub fn get(&self, key: &FsoKey) -> Option<&FlowStateObject> {
        self.objects
            .binary_search_by_key(key, |o| o.key())
            .ok()
            .map(|idx| &self.objects[idx])
    }

    /// Number of objects
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Whether the snapshot holds no objects
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

#[derive(Debug, Clone)]
struct StoredObject {
    object: FlowStateObject,
    avoid_port: Option<PortId>,
    flood_pending: bool,
    expiring: bool,
    down_flooded: bool,
}

impl StoredObject {
    fn accepted(mut object: FlowStateObject, avoid_port: Option<PortId>) -> Self {
        object.age = 0;
        Self {
            object,
            avoid_port,
            flood_pending: true,
            expiring: false,
            down_flooded: false,
        }
    }

    fn mark_down(&mut self) {
        self.object.state = FlowState::Down;
        self.object.sequence_number += 1;
        self.object.age = 0;
        self.avoid_port = None;
        self.flood_pending = true;
        self.expiring = false;
        self.down_flooded = false;
    }
}

#[derive(Debug, Default)]
struct DatabaseInner {
    entries: HashMap<FsoKey, StoredObject>,
    /// Last sequence number of deleted keys, until they come back
    retired: HashMap<FsoKey, SequenceNumber>,
    modified: bool,
    generation: u64,
}

impl DatabaseInner {
    fn mark_changed(&mut self) {
        self.modified = true;
        self.generation += 1;
    }

    fn retire(&mut self, object: &FlowStateObject) {
        let seq = self.retired.entry(object.key()).or_default();
        *seq = (*seq).max(object.sequence_number);
    }
}

/// The flow state database of one IPC Process
#[derive(Debug)]
pub struct FlowStateDatabase {
    max_age: u32,
    inner: RwLock<DatabaseInner>,
}

impl FlowStateDatabase {
    /// Create an empty database whose objects expire at `max_age` ticks
    pub fn new(max_age: u32) -> Self {
        Self {
            max_age,
            inner: RwLock::new(DatabaseInner::default()),
        }
    }

    /// Age at which objects expire
    pub fn max_age(&self) -> u32 {
        self.max_age
    }

    /// Insert an object, or replace the stored copy if `object` is newer
    ///
    /// `learned_from` is the port the object arrived on; it is remembered so
    /// the next flood does not send the object back there.
    pub fn add_or_update(
        &self,
        object: FlowStateObject,
        learned_from: Option<PortId>,
    ) -> UpdateOutcome {
        let key = object.key();
        let mut inner = self.inner.write();

        let outcome = match inner.entries.get(&key) {
            Some(existing) if object.sequence_number <= existing.object.sequence_number => {
                return UpdateOutcome::Stale;
            },
            Some(_) => UpdateOutcome::Updated,
            None => UpdateOutcome::Inserted,
        };

        if inner
            .retired
            .get(&key)
            .is_some_and(|&seq| object.sequence_number > seq)
        {
            inner.retired.remove(&key);
        }
        inner
            .entries
            .insert(key, StoredObject::accepted(object, learned_from));
        inner.mark_changed();
        outcome
    }

    /// Delete an object
    pub fn remove(&self, key: &FsoKey) -> Option<FlowStateObject> {
        let mut inner = self.inner.write();
        let removed = inner.entries.remove(key).map(|s| s.object);
        if let Some(object) = &removed {
            inner.retire(object);
            inner.mark_changed();
        }
        removed
    }

    /// Copy of one object
    pub fn get(&self, key: &FsoKey) -> Option<FlowStateObject> {
        self.inner.read().entries.get(key).map(|s| s.object.clone())
    }

    /// Advance every object's age by one tick
    ///
    /// Returns the keys that reached the maximum age during this tick. They
    /// stay in the database until [`FlowStateDatabase::expire`] is called.
    pub fn increment_all_ages(&self) -> Vec<FsoKey> {
        let max_age = self.max_age;
        let mut inner = self.inner.write();
        let mut expiring = Vec::new();

        for (key, stored) in inner.entries.iter_mut() {
            stored.object.age = stored.object.age.saturating_add(1);
            if stored.object.age >= max_age && !stored.expiring {
                stored.expiring = true;
                expiring.push(*key);
            }
        }

        expiring.sort();
        expiring
    }

    /// Remove objects previously reported by `increment_all_ages`
    ///
    /// Objects refreshed since they were reported are kept.
    pub fn expire(&self, keys: &[FsoKey]) -> Vec<FlowStateObject> {
        let mut inner = self.inner.write();
        let mut removed = Vec::new();

        for key in keys {
            let still_expiring = inner.entries.get(key).is_some_and(|s| s.expiring);
            if still_expiring {
                if let Some(stored) = inner.entries.remove(key) {
                    removed.push(stored.object);
                }
            }
        }

        if !removed.is_empty() {
            inner.mark_changed();
        }
        removed
    }

    /// Withdraw objects previously reported by `increment_all_ages`
    ///
    /// Used for locally originated objects: instead of vanishing they turn
    /// DOWN with a higher sequence number and are purged once flooded.
    /// Objects refreshed since they were reported are kept.
    pub fn withdraw_expired(&self, keys: &[FsoKey]) -> Vec<FlowStateObject> {
        let mut inner = self.inner.write();
        let mut withdrawn = Vec::new();

        for key in keys {
            if let Some(stored) = inner.entries.get_mut(key).filter(|s| s.expiring) {
                stored.mark_down();
                withdrawn.push(stored.object.clone());
            }
        }

        if !withdrawn.is_empty() {
            inner.mark_changed();
        }
        withdrawn
    }

    /// Immutable copy of every object
    pub fn snapshot(&self) -> FlowStateSnapshot {
        let inner = self.inner.read();
        let objects = inner.entries.values().map(|s| s.object.clone()).collect();
        FlowStateSnapshot::from_objects(inner.generation, objects)
    }

    /// Read and clear the modified flag in one step
    pub fn take_and_clear_modified(&self) -> bool {
        std::mem::replace(&mut self.inner.write().modified, false)
    }

    /// Counter bumped on every accepted topology change
    pub fn generation(&self) -> u64 {
        self.inner.read().generation
    }

    /// Number of stored objects
    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    /// Whether the database is empty
    pub fn is_empty(&self) -> bool {
        self.inner.read().entries.is_empty()
    }

    /// Create or refresh a locally originated object
    ///
    /// The stored copy gets a sequence number above any previous version of
    /// the same key, including one already withdrawn and purged, so every
    /// replica accepts it.
    pub fn originate(&self, mut object: FlowStateObject) -> FlowStateObject {
        let key = object.key();
        let mut inner = self.inner.write();

        let retired = inner.retired.remove(&key);
        let existing = inner.entries.get(&key).map(|s| s.object.sequence_number);
        if let Some(previous) = existing.max(retired) {
            object.sequence_number = object.sequence_number.max(previous + 1);
        }
        object.sequence_number = object.sequence_number.max(1);

        let stored = StoredObject::accepted(object, None);
        let copy = stored.object.clone();
        inner.entries.insert(key, stored);
        inner.mark_changed();
        copy
    }

    /// Mark an object DOWN with an incremented sequence number
    ///
    /// The object stays in the database until its withdrawal has been
    /// flooded once (see [`FlowStateDatabase::purge_flooded_withdrawals`]).
    pub fn withdraw(&self, key: &FsoKey) -> Option<FlowStateObject> {
        let mut inner = self.inner.write();
        let stored = inner.entries.get_mut(key)?;
        stored.mark_down();
        let copy = stored.object.clone();

        inner.mark_changed();
        Some(copy)
    }

    /// Take every object marked for flooding
    ///
    /// Flood marks and avoid ports are cleared; DOWN objects handed out here
    /// become eligible for purging on the next cycle.
    pub fn drain_pending_floods(&self) -> Vec<PendingFlood> {
        let mut inner = self.inner.write();
        let mut pending = Vec::new();

        for stored in inner.entries.values_mut().filter(|s| s.flood_pending) {
            pending.push(PendingFlood {
                object: stored.object.clone(),
                avoid_port: stored.avoid_port.take(),
            });
            stored.flood_pending = false;
            if !stored.object.is_up() {
                stored.down_flooded = true;
            }
        }

        pending.sort_by_key(|p| p.object.key());
        pending
    }

    /// Delete DOWN objects whose withdrawal went out in an earlier cycle
    pub fn purge_flooded_withdrawals(&self) -> Vec<FlowStateObject> {
        let mut inner = self.inner.write();
        let keys: Vec<FsoKey> = inner
            .entries
            .iter()
            .filter(|(_, s)| s.down_flooded && !s.flood_pending && !s.object.is_up())
            .map(|(k, _)| *k)
            .collect();

        let purged: Vec<FlowStateObject> = keys
            .iter()
            .filter_map(|k| inner.entries.remove(k))
            .map(|s| s.object)
            .collect();
        for object in &purged {
            inner.retire(object);
        }

        if !purged.is_empty() {
            inner.mark_changed();
        }
        purged
    }

    /// Re-originate own UP objects whose age reached `threshold`
    ///
    /// Keeps healthy local adjacencies from expiring in remote replicas.
    /// Only the modified flag is set: the topology itself is unchanged.
    pub fn refresh_local(&self, address: u32, threshold: u32) -> Vec<FlowStateObject> {
        let mut inner = self.inner.write();
        let mut refreshed = Vec::new();

        for stored in inner.entries.values_mut() {
            let own = stored.object.address == address && stored.object.is_up();
            if own && stored.object.age >= threshold {
                stored.object.sequence_number += 1;
                stored.object.age = 0;
                stored.avoid_port = None;
                stored.flood_pending = true;
                stored.expiring = false;
                refreshed.push(stored.object.clone());
            }
        }

        if !refreshed.is_empty() {
            inner.modified = true;
        }
        refreshed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fso(address: u32, neighbor: u32, port: u32, seq: u64) -> FlowStateObject {
        FlowStateObject::new(address, neighbor, port, 1).with_sequence_number(seq)
    }

    #[test]
    fn test_add_then_newer_then_stale() {
        let db = FlowStateDatabase::new(100);

        assert_eq!(db.add_or_update(fso(1, 2, 1, 3), None), UpdateOutcome::Inserted);
        assert_eq!(
            db.add_or_update(fso(1, 2, 1, 5).with_cost(4), None),
            UpdateOutcome::Updated
        );
        assert_eq!(
            db.add_or_update(fso(1, 2, 1, 4).with_cost(9), None),
            UpdateOutcome::Stale
        );
        assert_eq!(
            db.add_or_update(fso(1, 2, 1, 5).with_cost(9), None),
            UpdateOutcome::Stale
        );

        let stored = db.get(&FsoKey::new(1, 2, 1)).unwrap();
        assert_eq!(stored.sequence_number, 5);
        assert_eq!(stored.cost, 4);
        assert_eq!(db.len(), 1);
    }

    #[test]
    fn test_highest_sequence_wins_any_order() {
        let db = FlowStateDatabase::new(100);
        for seq in [4, 2, 9, 1, 9, 7, 3] {
            db.add_or_update(fso(1, 2, 1, seq).with_cost(seq as u32), None);
        }
        let stored = db.get(&FsoKey::new(1, 2, 1)).unwrap();
        assert_eq!(stored.sequence_number, 9);
        assert_eq!(stored.cost, 9);
    }

    #[test]
    fn test_take_and_clear_modified() {
        let db = FlowStateDatabase::new(100);
        assert!(!db.take_and_clear_modified());

        db.add_or_update(fso(1, 2, 1, 1), None);
        assert!(db.take_and_clear_modified());
        assert!(!db.take_and_clear_modified());

        // Stale updates do not set the flag
        db.add_or_update(fso(1, 2, 1, 1), None);
        assert!(!db.take_and_clear_modified());

        db.remove(&FsoKey::new(1, 2, 1));
        assert!(db.take_and_clear_modified());
        assert!(!db.take_and_clear_modified());
    }

    #[test]
    fn test_aging_advances_by_tick_count() {
        let db = FlowStateDatabase::new(100);
        db.add_or_update(fso(1, 2, 1, 1), None);

        for _ in 0..7 {
            db.increment_all_ages();
        }
        assert_eq!(db.get(&FsoKey::new(1, 2, 1)).unwrap().age, 7);
    }

    #[test]
    fn test_refresh_resets_age() {
        let db = FlowStateDatabase::new(100);
        db.add_or_update(fso(1, 2, 1, 1), None);
        for _ in 0..40 {
            db.increment_all_ages();
        }

        let mut newer = fso(1, 2, 1, 2);
        newer.age = 33;
        db.add_or_update(newer, None);
        assert_eq!(db.get(&FsoKey::new(1, 2, 1)).unwrap().age, 0);
    }

    #[test]
    fn test_expiry_is_reported_once_and_explicit() {
        let db = FlowStateDatabase::new(3);
        db.add_or_update(fso(1, 2, 1, 1), None);
        db.add_or_update(fso(2, 1, 1, 1), None);

        assert!(db.increment_all_ages().is_empty());
        assert!(db.increment_all_ages().is_empty());
        let expiring = db.increment_all_ages();
        assert_eq!(expiring.len(), 2);

        // Not removed inline
        assert_eq!(db.len(), 2);

        // Not reported twice
        assert!(db.increment_all_ages().is_empty());

        let removed = db.expire(&expiring);
        assert_eq!(removed.len(), 2);
        assert!(db.is_empty());
    }

    #[test]
    fn test_refreshed_entry_survives_pending_expiry() {
        let db = FlowStateDatabase::new(2);
        db.add_or_update(fso(1, 2, 1, 1), None);
        db.increment_all_ages();
        let expiring = db.increment_all_ages();
        assert_eq!(expiring, vec![FsoKey::new(1, 2, 1)]);

        db.add_or_update(fso(1, 2, 1, 2), None);
        assert!(db.expire(&expiring).is_empty());
        assert_eq!(db.len(), 1);
    }

    #[test]
    fn test_snapshot_is_isolated() {
        let db = FlowStateDatabase::new(100);
        db.add_or_update(fso(1, 2, 1, 1), None);
        let snapshot = db.snapshot();

        db.add_or_update(fso(2, 3, 1, 1), None);
        db.remove(&FsoKey::new(1, 2, 1));

        assert_eq!(snapshot.len(), 1);
        assert!(snapshot.get(&FsoKey::new(1, 2, 1)).is_some());
        assert!(snapshot.generation() < db.generation());
    }

    #[test]
    fn test_originate_bumps_sequence() {
        let db = FlowStateDatabase::new(100);
        let first = db.originate(FlowStateObject::new(1, 2, 1, 1));
        assert_eq!(first.sequence_number, 1);

        let second = db.originate(FlowStateObject::new(1, 2, 1, 1));
        assert_eq!(second.sequence_number, 2);
    }

    #[test]
    fn test_withdraw_then_purge_after_one_flood() {
        let db = FlowStateDatabase::new(100);
        db.originate(FlowStateObject::new(1, 2, 1, 1));
        db.drain_pending_floods();

        let down = db.withdraw(&FsoKey::new(1, 2, 1)).unwrap();
        assert_eq!(down.state, FlowState::Down);
        assert_eq!(down.sequence_number, 2);

        // Not flooded yet: nothing to purge
        assert!(db.purge_flooded_withdrawals().is_empty());

        let flooded = db.drain_pending_floods();
        assert_eq!(flooded.len(), 1);
        assert!(!flooded[0].object.is_up());

        let purged = db.purge_flooded_withdrawals();
        assert_eq!(purged.len(), 1);
        assert!(db.is_empty());
    }

    #[test]
    fn test_originate_after_purge_continues_sequence() {
        let db = FlowStateDatabase::new(100);
        let key = FsoKey::new(1, 2, 1);
        db.originate(FlowStateObject::new(1, 2, 1, 1));
        db.withdraw(&key);
        db.drain_pending_floods();
        assert_eq!(db.purge_flooded_withdrawals().len(), 1);

        // Replicas still hold the DOWN copy at 2
        let back = db.originate(FlowStateObject::new(1, 2, 1, 1));
        assert_eq!(back.sequence_number, 3);
        assert!(back.is_up());

        let again = db.originate(FlowStateObject::new(1, 2, 1, 1));
        assert_eq!(again.sequence_number, 4);
    }

    #[test]
    fn test_withdraw_expired_keeps_refreshed_objects() {
        let db = FlowStateDatabase::new(1);
        db.originate(FlowStateObject::new(1, 2, 1, 1));
        db.originate(FlowStateObject::new(1, 3, 2, 1));

        let expiring = db.increment_all_ages();
        assert_eq!(expiring.len(), 2);
        db.originate(FlowStateObject::new(1, 3, 2, 1));

        let withdrawn = db.withdraw_expired(&expiring);
        assert_eq!(withdrawn.len(), 1);
        assert_eq!(withdrawn[0].key(), FsoKey::new(1, 2, 1));
        assert_eq!(withdrawn[0].state, FlowState::Down);
        assert_eq!(withdrawn[0].sequence_number, 2);
        assert_eq!(withdrawn[0].age, 0);
        assert_eq!(db.len(), 2);
        assert!(db.get(&FsoKey::new(1, 3, 2)).unwrap().is_up());
    }

    #[test]
    fn test_drain_carries_avoid_port_once() {
        let db = FlowStateDatabase::new(100);
        db.add_or_update(fso(5, 6, 1, 1), Some(9));

        let pending = db.drain_pending_floods();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].avoid_port, Some(9));

        assert!(db.drain_pending_floods().is_empty());
    }

    #[test]
    fn test_refresh_local_only_touches_own_objects() {
        let db = FlowStateDatabase::new(100);
        db.originate(FlowStateObject::new(1, 2, 1, 1));
        db.add_or_update(fso(2, 1, 1, 1), Some(1));
        db.drain_pending_floods();
        db.take_and_clear_modified();
        for _ in 0..50 {
            db.increment_all_ages();
        }

        let generation = db.generation();
        let refreshed = db.refresh_local(1, 50);
        assert_eq!(refreshed.len(), 1);
        assert_eq!(refreshed[0].sequence_number, 2);
        assert_eq!(db.get(&FsoKey::new(2, 1, 1)).unwrap().age, 50);
        assert!(db.take_and_clear_modified());
        assert_eq!(db.generation(), generation);
    }
}
