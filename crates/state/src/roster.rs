//! Relay-side views: the party roster and the party visualisation registry.
//!
//! Both are fed by the auxiliary channel and are independent of the primary
//! [`EntityStore`](crate::store::EntityStore).

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::entity::{Color, EntityId};

// ============================================================================
// Player Roster
// ============================================================================

/// One party member as reported by the relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RosterMember {
    pub ordinal: u32,
    pub entity_ids: BTreeSet<EntityId>,
    /// UTF-16 code units.
    pub name: Vec<u16>,
}

impl RosterMember {
    /// Name for display, `"anonymous"` when empty.
    pub fn display_name(&self) -> String {
        if self.name.is_empty() {
            "anonymous".to_string()
        } else {
            String::from_utf16_lossy(&self.name)
        }
    }
}

/// Ordered list of party members, replaced wholesale on every update.
#[derive(Debug, Clone, Default)]
pub struct PlayerRoster {
    members: Vec<RosterMember>,
    by_entity: HashMap<EntityId, u32>,
}

impl PlayerRoster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn replace(&mut self, members: Vec<RosterMember>) {
        self.by_entity = members
            .iter()
            .flat_map(|m| m.entity_ids.iter().map(move |&id| (id, m.ordinal)))
            .collect();
        self.members = members;
    }

    pub fn clear(&mut self) {
        self.members.clear();
        self.by_entity.clear();
    }

    pub fn members(&self) -> &[RosterMember] {
        &self.members
    }

    /// Ordinal of the party member controlling `id`, if any.
    pub fn ordinal_of(&self, id: EntityId) -> Option<u32> {
        self.by_entity.get(&id).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

// ============================================================================
// Party Registry
// ============================================================================

/// Lightweight marker drawn for a party member's cell.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PartyToken {
    pub id: EntityId,
    pub color: Color,
    pub position: [f64; 2],
    pub size: f64,
}

/// Tokens keyed by entity id.
#[derive(Debug, Clone, Default)]
pub struct PartyRegistry {
    tokens: BTreeMap<EntityId, PartyToken>,
}

impl PartyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the token on first sight (fixing its colour), then move it.
    pub fn upsert(&mut self, id: EntityId, color: Color, position: [f64; 2], size: f64) {
        let token = self.tokens.entry(id).or_insert(PartyToken {
            id,
            color,
            position,
            size,
        });
        token.position = position;
        token.size = size;
    }

    pub fn remove(&mut self, id: EntityId) -> bool {
        self.tokens.remove(&id).is_some()
    }

    pub fn clear(&mut self) {
        self.tokens.clear();
    }

    pub fn get(&self, id: EntityId) -> Option<&PartyToken> {
        self.tokens.get(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PartyToken> {
        self.tokens.values()
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}
