//! Minimap wire formats.
//!
//! Three formats live here:
//!
//! - **Primary** ([`primary`], [`encode`]): the game server's binary frames.
//!   Inbound frames decode into [`minimap_state::DomainEvent`]s; the encoder
//!   builds frames in the same layout for tests and tooling.
//! - **Relay** ([`relay`]): the self-describing envelope exchanged with the
//!   auxiliary relay.
//! - **Capture** (this module): Protobuf records for recorded sessions, used
//!   by `minimap-capture`.

#![deny(unsafe_code)]

pub mod encode;
pub mod primary;
pub mod reader;
pub mod relay;

pub use primary::{Opcode, OutboundEvent, decode, decode_outbound};
pub use reader::{DecodeError, Reader};
pub use relay::{
    CellSync, EntitySync, Envelope, Incoming, Outgoing, RelayError, RosterEntry, ServerInfo,
};

use prost::Message;

// ============================================================================
// Capture Records
// ============================================================================

/// What a captured event carries in its payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum CapturedKind {
    /// Primary channel (re)opened. Payload is the URL in UTF-8.
    Reset = 0,
    /// Raw inbound primary frame.
    Inbound = 1,
    /// Raw outbound primary frame.
    Outbound = 2,
    /// Eviction sweep. Payload is empty.
    Sweep = 3,
}

/// One recorded event with its session timestamp.
#[derive(Clone, PartialEq, Message)]
pub struct CapturedEventProto {
    /// Milliseconds on the session clock.
    #[prost(uint64, tag = "1")]
    pub at_ms: u64,

    #[prost(enumeration = "CapturedKind", tag = "2")]
    pub kind: i32,

    #[prost(bytes = "vec", tag = "3")]
    pub payload: Vec<u8>,
}

/// Complete recorded session plus the verification anchors needed to replay
/// it.
#[derive(Clone, PartialEq, Message)]
pub struct CaptureArtifact {
    #[prost(uint32, tag = "1")]
    pub format_version: u32,

    #[prost(message, repeated, tag = "2")]
    pub events: Vec<CapturedEventProto>,

    /// Lowercase hex SHA-256 over the concatenated event payloads, each
    /// prefixed with its kind byte and little-endian length.
    #[prost(string, tag = "3")]
    pub payload_sha256: String,

    /// State digest after the last event.
    #[prost(uint64, tag = "4")]
    pub final_digest: u64,

    #[prost(uint64, tag = "5")]
    pub final_entity_count: u64,

    #[prost(string, tag = "6")]
    pub state_digest_algo_id: String,

    /// Session parameters in force while recording.
    #[prost(double, tag = "7")]
    pub default_world_size: f64,

    #[prost(uint64, tag = "8")]
    pub entity_ttl_ms: u64,
}

impl CapturedEventProto {
    pub fn new(at_ms: u64, kind: CapturedKind, payload: Vec<u8>) -> Self {
        Self {
            at_ms,
            kind: kind as i32,
            payload,
        }
    }

    /// `None` for kinds written by a newer format.
    pub fn captured_kind(&self) -> Option<CapturedKind> {
        CapturedKind::try_from(self.kind).ok()
    }
}

// ============================================================================
// Tests
// ============================================================================
