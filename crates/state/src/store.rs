//! Entity registry and ownership set.
//!
//! The store owns every [`Entity`] keyed by id plus the set of ids controlled
//! by the local player. Every successful mutation queues a [`Delta`]; callers
//! drain them once per processed frame or sweep.

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;

use indexmap::IndexSet;

use crate::entity::{CellUpdate, Entity, EntityId, Generation, Millis};

/// Outcome of [`EntityStore::upsert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertResult {
    Created,
    Updated,
}

/// Change notification produced by the store.
#[derive(Debug, Clone, PartialEq)]
pub enum Delta {
    Created(Entity),
    Updated(Entity),
    /// Explicit destroy (out of view).
    Destroyed { id: EntityId },
    /// `eaten` is the final state of the removed entity, its `position.old`
    /// pointing at the eater.
    Merged { eaten: Entity, eater_id: EntityId },
    /// Removed by the staleness sweep.
    Evicted { id: EntityId },
}

impl Delta {
    pub fn id(&self) -> EntityId {
        match self {
            Self::Created(e) | Self::Updated(e) => e.id,
            Self::Merged { eaten, .. } => eaten.id,
            Self::Destroyed { id } | Self::Evicted { id } => *id,
        }
    }

    /// True for every variant that removed the entity from the registry.
    pub fn is_removal(&self) -> bool {
        matches!(
            self,
            Self::Destroyed { .. } | Self::Merged { .. } | Self::Evicted { .. }
        )
    }
}

/// Registry of live entities plus the ownership set.
#[derive(Debug, Clone, Default)]
pub struct EntityStore {
    /// Ordered by id so iteration (and the state digest) is deterministic.
    entities: BTreeMap<EntityId, Entity>,
    /// Insertion-ordered so ownership can be re-announced in arrival order.
    owned: IndexSet<EntityId>,
    generation: Generation,
    pending: Vec<Delta>,
}

impl EntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a new update generation; subsequent upserts are stamped with it.
    pub fn begin_generation(&mut self) -> Generation {
        self.generation += 1;
        self.generation
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    /// Create or update an entity.
    ///
    /// On update the previous `new` values move to `old` before the decoded
    /// values are written. On create `old == new`.
    pub fn upsert(&mut self, update: CellUpdate, now: Millis) -> UpsertResult {
        let generation = self.generation;
        match self.entities.entry(update.id) {
            Entry::Occupied(mut slot) => {
                let entity = slot.get_mut();
                entity.apply_update(update, now, generation);
                self.pending.push(Delta::Updated(entity.clone()));
                UpsertResult::Updated
            }
            Entry::Vacant(slot) => {
                let entity = slot.insert(Entity::from_update(update, now, generation));
                self.pending.push(Delta::Created(entity.clone()));
                UpsertResult::Created
            }
        }
    }

    /// Remove an entity and drop it from the ownership set.
    /// Returns `false` if it was not registered.
    pub fn destroy(&mut self, id: EntityId) -> bool {
        self.owned.shift_remove(&id);
        if self.entities.remove(&id).is_some() {
            self.pending.push(Delta::Destroyed { id });
            true
        } else {
            false
        }
    }

    /// Absorb `eaten_id` into `eater_id`.
    ///
    /// The eaten entity's `position.old` becomes the eater's current position
    /// so a renderer can animate it shrinking toward the eater, then it is
    /// removed. No-op unless both are registered.
    pub fn merge(&mut self, eaten_id: EntityId, eater_id: EntityId, now: Millis) -> bool {
        let Some(eater_position) = self.entities.get(&eater_id).map(|e| e.position.new) else {
            return false;
        };
        if eaten_id == eater_id {
            return false;
        }
        let Some(mut eaten) = self.entities.remove(&eaten_id) else {
            return false;
        };
        self.owned.shift_remove(&eaten_id);

        eaten.position.old = eater_position;
        eaten.last_update = now;
        self.pending.push(Delta::Merged { eaten, eater_id });
        true
    }

    /// Remove every entity whose last update is more than `ttl` before `now`.
    /// Returns the evicted ids in ascending order.
    pub fn evict(&mut self, now: Millis, ttl: Millis) -> Vec<EntityId> {
        let stale: Vec<EntityId> = self
            .entities
            .values()
            .filter(|e| now.saturating_sub(e.last_update) > ttl)
            .map(|e| e.id)
            .collect();

        for &id in &stale {
            self.entities.remove(&id);
            self.owned.shift_remove(&id);
            self.pending.push(Delta::Evicted { id });
        }
        stale
    }

    /// Mark an id as owned by the local player. Returns `true` if newly added.
    pub fn own_add(&mut self, id: EntityId) -> bool {
        self.owned.insert(id)
    }

    pub fn own_clear(&mut self) {
        self.owned.clear();
    }

    pub fn is_owned(&self, id: EntityId) -> bool {
        self.owned.contains(&id)
    }

    /// Owned ids in the order they were announced.
    pub fn owned_ids(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.owned.iter().copied()
    }

    /// The live owned entity with the largest current size. Ties keep the
    /// earliest-owned entity.
    pub fn largest_owned(&self) -> Option<&Entity> {
        self.owned
            .iter()
            .filter_map(|id| self.entities.get(id))
            .fold(None, |best: Option<&Entity>, e| match best {
                Some(b) if e.size.new <= b.size.new => Some(b),
                _ => Some(e),
            })
    }

    pub fn get(&self, id: EntityId) -> Option<&Entity> {
        self.entities.get(&id)
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.entities.contains_key(&id)
    }

    /// Entities in ascending id order.
    pub fn iter(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Take every delta queued since the last drain.
    pub fn drain_deltas(&mut self) -> Vec<Delta> {
        std::mem::take(&mut self.pending)
    }

    /// Drop all entities, ownership and pending deltas.
    pub fn clear(&mut self) {
        self.entities.clear();
        self.owned.clear();
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{CellFlags, Color};

    fn update(id: EntityId, x: f64, y: f64, size: f64) -> CellUpdate {
        CellUpdate {
            id,
            position: [x, y],
            size,
            color: Color::from_packed(0x112233),
            flags: CellFlags::default(),
            name: Vec::new(),
            skin: None,
        }
    }

    #[test]
    fn test_upsert_create_then_update_shifts_old() {
        let mut store = EntityStore::new();
        assert_eq!(store.upsert(update(7, 1.0, 2.0, 10.0), 0), UpsertResult::Created);

        let e = store.get(7).unwrap();
        assert_eq!(e.position.old, e.position.new);
        assert_eq!(e.size.old, 10.0);

        assert_eq!(store.upsert(update(7, 3.0, 4.0, 12.0), 50), UpsertResult::Updated);
        let e = store.get(7).unwrap();
        assert_eq!(e.position.old, [1.0, 2.0]);
        assert_eq!(e.position.new, [3.0, 4.0]);
        assert_eq!((e.size.old, e.size.new), (10.0, 12.0));
        assert_eq!(e.last_update, 50);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_upsert_keeps_name_when_update_has_none() {
        let mut store = EntityStore::new();
        let mut first = update(3, 0.0, 0.0, 1.0);
        first.name = "bob".encode_utf16().collect();
        first.skin = Some("doge".to_string());
        store.upsert(first, 0);
        store.upsert(update(3, 1.0, 1.0, 1.0), 10);

        let e = store.get(3).unwrap();
        assert_eq!(e.name_lossy(), "bob");
        assert_eq!(e.skin.as_deref(), Some("doge"));
    }

    #[test]
    fn test_upsert_stamps_generation() {
        let mut store = EntityStore::new();
        let g1 = store.begin_generation();
        store.upsert(update(1, 0.0, 0.0, 1.0), 0);
        store.upsert(update(2, 0.0, 0.0, 1.0), 0);
        let g2 = store.begin_generation();
        store.upsert(update(2, 1.0, 0.0, 1.0), 0);

        assert_ne!(g1, g2);
        assert_eq!(store.get(1).unwrap().generation, g1);
        assert_eq!(store.get(2).unwrap().generation, g2);
    }

    #[test]
    fn test_destroy_is_idempotent_and_clears_ownership() {
        let mut store = EntityStore::new();
        store.upsert(update(4, 0.0, 0.0, 1.0), 0);
        store.own_add(4);

        assert!(store.destroy(4));
        assert!(!store.destroy(4));
        assert!(!store.is_owned(4));
        assert!(store.get(4).is_none());
    }

    #[test]
    fn test_merge_removes_eaten_and_leaves_eater() {
        let mut store = EntityStore::new();
        store.upsert(update(5, 10.0, 10.0, 20.0), 0);
        store.upsert(update(9, 50.0, 50.0, 80.0), 0);
        store.own_add(5);
        store.drain_deltas();

        assert!(store.merge(5, 9, 100));

        assert!(store.get(5).is_none());
        assert!(!store.is_owned(5));
        let eater = store.get(9).unwrap();
        assert_eq!(eater.position.old, [50.0, 50.0]);
        assert_eq!(eater.position.new, [50.0, 50.0]);

        let deltas = store.drain_deltas();
        assert_eq!(deltas.len(), 1);
        match &deltas[0] {
            Delta::Merged { eaten, eater_id } => {
                assert_eq!(*eater_id, 9);
                assert_eq!(eaten.id, 5);
                assert_eq!(eaten.position.old, [50.0, 50.0]);
                assert_eq!(eaten.position.new, [10.0, 10.0]);
            }
            other => panic!("unexpected delta {other:?}"),
        }
    }

    #[test]
    fn test_merge_with_missing_party_is_noop() {
        let mut store = EntityStore::new();
        store.upsert(update(5, 10.0, 10.0, 20.0), 0);
        store.drain_deltas();

        assert!(!store.merge(5, 9, 0));
        assert!(!store.merge(8, 5, 0));
        assert!(store.contains(5));
        assert!(store.drain_deltas().is_empty());
    }

    #[test]
    fn test_evict_threshold_is_strict() {
        let mut store = EntityStore::new();
        let t = 1_000_000;
        store.upsert(update(1, 0.0, 0.0, 1.0), t);

        assert!(store.evict(t + 9_999, 10_000).is_empty());
        assert!(store.evict(t + 10_000, 10_000).is_empty());
        assert_eq!(store.evict(t + 10_001, 10_000), vec![1]);
        assert!(store.is_empty());
    }

    #[test]
    fn test_evict_keeps_fresh_entities() {
        let mut store = EntityStore::new();
        store.upsert(update(1, 0.0, 0.0, 1.0), 0);
        store.upsert(update(2, 0.0, 0.0, 1.0), 8_000);
        store.own_add(1);
        store.drain_deltas();

        assert_eq!(store.evict(12_000, 10_000), vec![1]);
        assert!(store.contains(2));
        assert!(!store.is_owned(1));
        assert_eq!(store.drain_deltas(), vec![Delta::Evicted { id: 1 }]);
    }

    #[test]
    fn test_largest_owned() {
        let mut store = EntityStore::new();
        assert!(store.largest_owned().is_none());

        store.upsert(update(1, 0.0, 0.0, 30.0), 0);
        store.upsert(update(2, 0.0, 0.0, 90.0), 0);
        store.upsert(update(3, 0.0, 0.0, 500.0), 0);
        store.own_add(1);
        store.own_add(2);
        // Dangling ownership is harmless.
        store.own_add(42);

        assert_eq!(store.largest_owned().map(|e| e.id), Some(2));

        store.own_clear();
        assert!(store.largest_owned().is_none());
    }

    #[test]
    fn test_largest_owned_tie_keeps_first() {
        let mut store = EntityStore::new();
        store.upsert(update(1, 0.0, 0.0, 50.0), 0);
        store.upsert(update(2, 0.0, 0.0, 50.0), 0);
        store.own_add(2);
        store.own_add(1);
        assert_eq!(store.largest_owned().map(|e| e.id), Some(2));
    }

    #[test]
    fn test_own_add_dedups_and_keeps_order() {
        let mut store = EntityStore::new();
        assert!(store.own_add(9));
        assert!(store.own_add(3));
        assert!(!store.own_add(9));
        assert_eq!(store.owned_ids().collect::<Vec<_>>(), vec![9, 3]);
    }
}
