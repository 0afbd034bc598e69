//! Auxiliary relay format.
//!
//! Every message is an envelope `{"type": <u8>, "data": <value>}` packed as
//! a MessagePack map with named keys. The payload shape depends on the type:
//!
//! | type | direction       | data                                          |
//! |------|-----------------|-----------------------------------------------|
//! | 0    | local -> relay  | name as UTF-16 code units                     |
//! | 16   | local -> relay  | `{addition: [cell], deletion: [id]}`          |
//! | 32   | local -> relay  | owned entity id                               |
//! | 100  | local -> relay  | `{url, region, gamemode, party}`              |
//! | 128  | relay -> local  | `{addition: [cell], deletion: [id]}`          |
//! | 129  | relay -> local  | `[{no, ids, name}]`                           |
//! | 130  | relay -> local  | `{url, region, gamemode, party}`              |

use minimap_state::{Entity, EntityId, RosterMember};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Envelope type codes.
pub mod kind {
    pub const HELLO: u8 = 0;
    pub const ENTITY_SYNC: u8 = 16;
    pub const OWN_ANNOUNCE: u8 = 32;
    pub const SERVER_INFO: u8 = 100;
    pub const PARTY_SYNC: u8 = 128;
    pub const ROSTER: u8 = 129;
    pub const SERVER_CHECK: u8 = 130;
}

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("failed to encode relay message: {0}")]
    Encode(#[source] rmp_serde::encode::Error),
    #[error("failed to decode relay message: {0}")]
    Decode(#[source] rmp_serde::decode::Error),
    #[error("invalid relay payload: {0}")]
    Payload(#[source] serde_json::Error),
    #[error("unknown relay message type {0}")]
    UnknownType(u8),
}

/// Outer frame of every relay message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: u8,
    #[serde(default)]
    pub data: Value,
}

impl Envelope {
    pub fn encode(&self) -> Result<Vec<u8>, RelayError> {
        rmp_serde::to_vec_named(self).map_err(RelayError::Encode)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, RelayError> {
        rmp_serde::from_slice(bytes).map_err(RelayError::Decode)
    }
}

// ============================================================================
// Payloads
// ============================================================================

/// Simplified cell carried by entity syncs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellSync {
    pub id: EntityId,
    pub x: f64,
    pub y: f64,
    pub size: f64,
    /// `#rrggbb`
    pub color: String,
}

impl From<&Entity> for CellSync {
    fn from(e: &Entity) -> Self {
        Self {
            id: e.id,
            x: e.position.new[0],
            y: e.position.new[1],
            size: e.size.new,
            color: e.color.to_string(),
        }
    }
}

/// Batch of changed and removed cells.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntitySync {
    #[serde(rename = "addition", default)]
    pub additions: Vec<CellSync>,
    #[serde(rename = "deletion", default)]
    pub deletions: Vec<EntityId>,
}

impl EntitySync {
    pub fn is_empty(&self) -> bool {
        self.additions.is_empty() && self.deletions.is_empty()
    }
}

/// Which game server the local client is on.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerInfo {
    pub url: String,
    pub region: String,
    pub gamemode: String,
    pub party: String,
}

/// One roster row as sent by the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterEntry {
    pub no: u32,
    #[serde(default)]
    pub ids: Vec<EntityId>,
    #[serde(default)]
    pub name: Vec<u16>,
}

impl From<RosterEntry> for RosterMember {
    fn from(entry: RosterEntry) -> Self {
        Self {
            ordinal: entry.no,
            entity_ids: entry.ids.into_iter().collect(),
            name: entry.name,
        }
    }
}

// ============================================================================
// Messages
// ============================================================================

/// Message sent from the interceptor to the relay.
#[derive(Debug, Clone, PartialEq)]
pub enum Outgoing {
    Hello { name: Vec<u16> },
    EntitySync(EntitySync),
    OwnAnnounce { id: EntityId },
    ServerInfo(ServerInfo),
}

impl Outgoing {
    pub fn kind(&self) -> u8 {
        match self {
            Self::Hello { .. } => kind::HELLO,
            Self::EntitySync(_) => kind::ENTITY_SYNC,
            Self::OwnAnnounce { .. } => kind::OWN_ANNOUNCE,
            Self::ServerInfo(_) => kind::SERVER_INFO,
        }
    }

    pub fn to_envelope(&self) -> Result<Envelope, RelayError> {
        let data = match self {
            Self::Hello { name } => serde_json::to_value(name),
            Self::EntitySync(sync) => serde_json::to_value(sync),
            Self::OwnAnnounce { id } => serde_json::to_value(id),
            Self::ServerInfo(info) => serde_json::to_value(info),
        }
        .map_err(RelayError::Payload)?;
        Ok(Envelope {
            kind: self.kind(),
            data,
        })
    }

    pub fn encode(&self) -> Result<Vec<u8>, RelayError> {
        self.to_envelope()?.encode()
    }
}

/// Message received from the relay.
#[derive(Debug, Clone, PartialEq)]
pub enum Incoming {
    PartySync(EntitySync),
    Roster(Vec<RosterEntry>),
    ServerCheck(ServerInfo),
}

impl Incoming {
    pub fn decode(bytes: &[u8]) -> Result<Self, RelayError> {
        Self::from_envelope(Envelope::decode(bytes)?)
    }

    pub fn from_envelope(envelope: Envelope) -> Result<Self, RelayError> {
        match envelope.kind {
            kind::PARTY_SYNC => serde_json::from_value(envelope.data).map(Self::PartySync),
            kind::ROSTER => serde_json::from_value(envelope.data).map(Self::Roster),
            kind::SERVER_CHECK => serde_json::from_value(envelope.data).map(Self::ServerCheck),
            other => return Err(RelayError::UnknownType(other)),
        }
        .map_err(RelayError::Payload)
    }

    /// Encoding used by relay-side tooling and tests.
    pub fn encode(&self) -> Result<Vec<u8>, RelayError> {
        let (kind, data) = match self {
            Self::PartySync(sync) => (kind::PARTY_SYNC, serde_json::to_value(sync)),
            Self::Roster(entries) => (kind::ROSTER, serde_json::to_value(entries)),
            Self::ServerCheck(info) => (kind::SERVER_CHECK, serde_json::to_value(info)),
        };
        let data = data.map_err(RelayError::Payload)?;
        Envelope { kind, data }.encode()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn unpack(bytes: &[u8]) -> Value {
        rmp_serde::from_slice(bytes).unwrap()
    }

    fn pack(value: Value) -> Vec<u8> {
        rmp_serde::to_vec_named(&value).unwrap()
    }

    #[test]
    fn test_envelope_is_named_map() {
        let bytes = Outgoing::OwnAnnounce { id: 9 }.encode().unwrap();
        // fixmap of two entries, first key "type"
        assert_eq!(bytes[0], 0x82);
        assert_eq!(&bytes[1..6], &[0xa4, b't', b'y', b'p', b'e']);
        assert_eq!(unpack(&bytes), json!({"type": 32, "data": 9}));
    }

    #[test]
    fn test_outgoing_envelope_shapes() {
        let hello = Outgoing::Hello {
            name: vec![0x41, 0x42],
        };
        let env = Envelope::decode(&hello.encode().unwrap()).unwrap();
        assert_eq!(env, Envelope { kind: 0, data: json!([65, 66]) });

        let sync = Outgoing::EntitySync(EntitySync {
            additions: vec![CellSync {
                id: 1,
                x: 2.0,
                y: 3.0,
                size: 4.0,
                color: "#112233".to_string(),
            }],
            deletions: vec![5],
        });
        let env = unpack(&sync.encode().unwrap());
        assert_eq!(env["type"], json!(16));
        assert_eq!(env["data"]["addition"][0]["color"], json!("#112233"));
        assert_eq!(env["data"]["addition"][0]["x"], json!(2.0));
        assert_eq!(env["data"]["deletion"], json!([5]));

        let info = Outgoing::ServerInfo(ServerInfo {
            url: "ws://1.2.3.4:443".to_string(),
            region: "EU-London".to_string(),
            gamemode: ":teams".to_string(),
            party: "#ABCD".to_string(),
        });
        let env = unpack(&info.encode().unwrap());
        assert_eq!(env["type"], json!(100));
        assert_eq!(env["data"]["region"], json!("EU-London"));
    }

    #[test]
    fn test_incoming_party_sync() {
        let bytes = pack(json!({
            "type": 128,
            "data": {
                "addition": [{"id": 4, "x": 1, "y": 2, "size": 30, "color": "#ff0000"}],
                "deletion": [8]
            }
        }));
        match Incoming::decode(&bytes).unwrap() {
            Incoming::PartySync(sync) => {
                assert_eq!(sync.additions[0].id, 4);
                assert_eq!(sync.additions[0].x, 1.0);
                assert_eq!(sync.deletions, vec![8]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_incoming_roster_and_check() {
        let bytes = pack(json!({
            "type": 129,
            "data": [{"no": 0, "ids": [1, 2], "name": [97]}, {"no": 1, "ids": []}]
        }));
        let Incoming::Roster(entries) = Incoming::decode(&bytes).unwrap() else {
            panic!("expected roster");
        };
        assert_eq!(entries.len(), 2);
        let member: RosterMember = entries[0].clone().into();
        assert_eq!(member.ordinal, 0);
        assert!(member.entity_ids.contains(&2));
        assert!(entries[1].name.is_empty());

        let bytes = pack(json!({"type": 130, "data": {"url": "ws://x", "region": "US"}}));
        let Incoming::ServerCheck(info) = Incoming::decode(&bytes).unwrap() else {
            panic!("expected server check");
        };
        assert_eq!(info.url, "ws://x");
        assert_eq!(info.party, "");
    }

    #[test]
    fn test_incoming_errors() {
        assert!(matches!(
            Incoming::decode(&pack(json!({"type": 16, "data": {}}))),
            Err(RelayError::UnknownType(16))
        ));
        // a bare positive fixint is not an envelope
        assert!(matches!(
            Incoming::decode(b"\x07"),
            Err(RelayError::Decode(_))
        ));
        assert!(matches!(
            Incoming::decode(&pack(json!({"type": 129, "data": {"no": "x"}}))),
            Err(RelayError::Payload(_))
        ));
    }
}
