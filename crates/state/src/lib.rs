//! Minimap State Core
//!
//! This crate holds the world state reconstructed from the intercepted game
//! protocol: the entity registry, the set of entities controlled by the local
//! player, and the inferred world boundary.
//!
//! # Architecture Constraints
//!
//! The state core MUST NOT:
//! - Perform I/O operations (file, network, etc.)
//! - Read wall-clock time; every time-dependent call takes `now` explicitly
//! - Depend on the byte layout of any wire format
//!
//! Decoders produce [`DomainEvent`]s, [`SessionState::apply`] consumes them.
//! Everything runs on one thread in arrival order.

#![deny(unsafe_code)]

pub mod boundary;
pub mod entity;
pub mod roster;
pub mod store;

pub use boundary::{Border, BoundaryState, Edge, Edges, Viewport, WorldMapping};
pub use entity::{
    Buffered, CellFlags, CellUpdate, Color, Entity, EntityId, Generation, Millis, ParseColorError,
};
pub use roster::{PartyRegistry, PartyToken, PlayerRoster, RosterMember};
pub use store::{Delta, EntityStore, UpsertResult};

// ============================================================================
// Defaults
// ============================================================================

/// World size per axis assumed until two opposite edges are measured.
pub const DEFAULT_WORLD_SIZE: f64 = 14000.0;

/// An entity not updated for longer than this is evicted.
pub const ENTITY_TTL_MS: Millis = 10_000;

// ============================================================================
// Domain Events
// ============================================================================

/// Typed event decoded from one primary frame.
#[derive(Debug, Clone, PartialEq)]
pub enum DomainEvent {
    /// `eaten_id` was absorbed by `eater_id`.
    Merge { eaten_id: EntityId, eater_id: EntityId },
    Upsert(CellUpdate),
    /// No longer visible (not eaten).
    Destroy { id: EntityId },
    ClearOwnership,
    OwnAdd { id: EntityId },
    Border(Border),
}

/// Everything a caller needs to know about one applied frame.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AppliedFrame {
    pub generation: Generation,
    pub deltas: Vec<Delta>,
    /// Every `OwnAdd` id in the frame, in order, repeats included.
    pub owned_added: Vec<EntityId>,
    pub ownership_cleared: bool,
    pub resolved_edges: Vec<Edge>,
}

// ============================================================================
// Session State
// ============================================================================

/// Per-connection world state: registry, ownership and boundary.
///
/// A new primary connection starts from [`reset`](Self::reset); nothing here
/// survives a reconnect.
#[derive(Debug, Clone)]
pub struct SessionState {
    store: EntityStore,
    boundary: BoundaryState,
    default_world_size: f64,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new(DEFAULT_WORLD_SIZE)
    }
}

impl SessionState {
    pub fn new(default_world_size: f64) -> Self {
        Self {
            store: EntityStore::new(),
            boundary: BoundaryState::new(default_world_size),
            default_world_size,
        }
    }

    /// Clear the registry, ownership set and boundary state.
    pub fn reset(&mut self) {
        self.store.clear();
        self.boundary = BoundaryState::new(self.default_world_size);
    }

    pub fn store(&self) -> &EntityStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut EntityStore {
        &mut self.store
    }

    pub fn boundary(&self) -> &BoundaryState {
        &self.boundary
    }

    /// Apply the events of one decoded frame in order.
    pub fn apply(&mut self, events: &[DomainEvent], now: Millis) -> AppliedFrame {
        let mut frame = AppliedFrame {
            generation: self.store.begin_generation(),
            ..Default::default()
        };

        for event in events {
            match event {
                DomainEvent::Merge { eaten_id, eater_id } => {
                    self.store.merge(*eaten_id, *eater_id, now);
                }
                DomainEvent::Upsert(update) => {
                    self.store.upsert(update.clone(), now);
                }
                DomainEvent::Destroy { id } => {
                    self.store.destroy(*id);
                }
                DomainEvent::ClearOwnership => {
                    self.store.own_clear();
                    frame.ownership_cleared = true;
                }
                DomainEvent::OwnAdd { id } => {
                    self.store.own_add(*id);
                    frame.owned_added.push(*id);
                }
                DomainEvent::Border(border) => {
                    let reference = self.store.largest_owned().map(|e| e.position.new);
                    frame
                        .resolved_edges
                        .extend(self.boundary.observe(border, reference));
                }
            }
        }

        frame.deltas = self.store.drain_deltas();
        frame
    }

    /// Evict stale entities and return the resulting deltas.
    pub fn sweep(&mut self, now: Millis, ttl: Millis) -> Vec<Delta> {
        let evicted = self.store.evict(now, ttl);
        if !evicted.is_empty() {
            tracing::debug!(count = evicted.len(), "evicted stale entities");
        }
        self.store.drain_deltas()
    }

    /// Full-map mapping, `None` until one edge per axis is resolved.
    pub fn world_mapping(&self) -> Option<WorldMapping> {
        self.boundary.world_mapping()
    }

    /// Compute the state digest of the current session state.
    ///
    /// Algorithm: FNV-1a 64-bit with canonicalization
    /// - entities in ascending id order: id, new position, new size, colour
    /// - owned ids in ascending order
    /// - the four edges (top, right, bottom, left), absent edges as a 0 tag
    pub fn state_digest(&self) -> u64 {
        let mut hasher = Fnv1a64::new();

        hasher.update(&(self.store.len() as u64).to_le_bytes());
        for entity in self.store.iter() {
            hasher.update(&entity.id.to_le_bytes());
            hasher.update(&canonicalize_f64(entity.position.new[0]).to_le_bytes());
            hasher.update(&canonicalize_f64(entity.position.new[1]).to_le_bytes());
            hasher.update(&canonicalize_f64(entity.size.new).to_le_bytes());
            hasher.update(&entity.color.packed().to_le_bytes());
        }

        let mut owned: Vec<EntityId> = self.store.owned_ids().collect();
        owned.sort_unstable();
        for id in owned {
            hasher.update(&id.to_le_bytes());
        }

        let edges = self.boundary.edges();
        for edge in [edges.top, edges.right, edges.bottom, edges.left] {
            match edge {
                Some(v) => {
                    hasher.update(&[1]);
                    hasher.update(&canonicalize_f64(v).to_le_bytes());
                }
                None => hasher.update(&[0]),
            }
        }

        hasher.finish()
    }
}

// ============================================================================
// StateDigest Implementation
// ============================================================================

/// StateDigest algorithm identifier.
pub const STATE_DIGEST_ALGO_ID: &str = "statedigest-v1-fnv1a64-le-f64canon-idasc-possizecolor";

const FNV1A_OFFSET_BASIS: u64 = 0xcbf29ce484222325;
const FNV1A_PRIME: u64 = 0x100000001b3;

#[derive(Debug, Clone)]
struct Fnv1a64 {
    state: u64,
}

impl Fnv1a64 {
    fn new() -> Self {
        Self {
            state: FNV1A_OFFSET_BASIS,
        }
    }

    fn update(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            self.state ^= u64::from(byte);
            self.state = self.state.wrapping_mul(FNV1A_PRIME);
        }
    }

    fn finish(self) -> u64 {
        self.state
    }
}

/// `-0.0` hashes as `+0.0`, every NaN as the quiet NaN pattern.
fn canonicalize_f64(value: f64) -> u64 {
    const QUIET_NAN_BITS: u64 = 0x7ff8000000000000;

    if value.is_nan() {
        QUIET_NAN_BITS
    } else if value == 0.0 {
        0u64
    } else {
        value.to_bits()
    }
}

// ============================================================================
// Tests
// ============================================================================
