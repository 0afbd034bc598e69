//! Relay encoder.
//!
//! Every send is best effort: with no channel attached, or a channel that is
//! not open, the message is dropped before it is even encoded.

use std::fmt;

use minimap_state::{Delta, EntityId};
use minimap_wire::{CellSync, EntitySync, Outgoing, ServerInfo};

use crate::transport::Channel;

/// Build the sync batch for one processed frame or sweep.
///
/// Additions carry cells that were already known before this frame; first
/// sightings are left out so the relay is not flooded with food pellets.
/// Deletions carry every merged, out-of-view and evicted id.
pub fn entity_sync_from(deltas: &[Delta]) -> EntitySync {
    let mut sync = EntitySync::default();
    for delta in deltas {
        match delta {
            Delta::Updated(entity) => sync.additions.push(CellSync::from(entity)),
            Delta::Created(_) => {}
            removal => sync.deletions.push(removal.id()),
        }
    }
    sync
}

#[derive(Default)]
pub struct RelayEncoder {
    channel: Option<Box<dyn Channel>>,
}

impl fmt::Debug for RelayEncoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelayEncoder")
            .field("attached", &self.is_attached())
            .field("open", &self.is_open())
            .finish()
    }
}

impl RelayEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `channel` from now on. A previously attached channel is closed.
    pub fn attach(&mut self, channel: Box<dyn Channel>) {
        if let Some(mut previous) = self.channel.replace(channel) {
            previous.close();
        }
    }

    /// Close and drop the channel.
    pub fn close(&mut self) {
        if let Some(mut channel) = self.channel.take() {
            channel.close();
        }
    }

    pub fn is_attached(&self) -> bool {
        self.channel.is_some()
    }

    pub fn is_open(&self) -> bool {
        self.channel.as_ref().is_some_and(|c| c.is_open())
    }

    /// Returns `true` if the message was handed to an open channel.
    pub fn send(&mut self, message: &Outgoing) -> bool {
        let Some(channel) = self.channel.as_mut().filter(|c| c.is_open()) else {
            return false;
        };
        let bytes = match message.encode() {
            Ok(bytes) => bytes,
            Err(err) => {
                tracing::warn!(kind = message.kind(), %err, "dropping relay message");
                return false;
            }
        };
        match channel.send(&bytes) {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(kind = message.kind(), %err, "relay send failed");
                false
            }
        }
    }

    pub fn hello(&mut self, name: &[u16]) -> bool {
        self.send(&Outgoing::Hello {
            name: name.to_vec(),
        })
    }

    /// Sends nothing when the batch is empty.
    pub fn entity_sync(&mut self, deltas: &[Delta]) -> bool {
        if !self.is_open() {
            return false;
        }
        let sync = entity_sync_from(deltas);
        if sync.is_empty() {
            return false;
        }
        self.send(&Outgoing::EntitySync(sync))
    }

    pub fn own_announce(&mut self, id: EntityId) -> bool {
        self.send(&Outgoing::OwnAnnounce { id })
    }

    pub fn server_info(&mut self, info: &ServerInfo) -> bool {
        self.send(&Outgoing::ServerInfo(info.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::memory::MemoryChannel;
    use minimap_state::{CellFlags, CellUpdate, Color, EntityStore};

    fn cell(id: u32, x: f64) -> CellUpdate {
        CellUpdate {
            id,
            position: [x, 0.0],
            size: 10.0,
            color: Color::from_rgb(1, 2, 3),
            flags: CellFlags::default(),
            name: Vec::new(),
            skin: None,
        }
    }

    #[test]
    fn test_no_channel_is_noop() {
        let mut relay = RelayEncoder::new();
        assert!(!relay.hello(&[0x41]));
        assert!(!relay.own_announce(3));
        assert!(!relay.server_info(&ServerInfo::default()));
        assert!(!relay.entity_sync(&[Delta::Evicted { id: 1 }]));
    }

    #[test]
    fn test_closed_channel_sends_nothing() {
        let handle = MemoryChannel::new();
        let mut relay = RelayEncoder::new();
        relay.attach(Box::new(handle.clone()));
        assert!(relay.is_attached());
        assert!(!relay.own_announce(3));
        assert!(handle.sent().is_empty());

        handle.set_open(true);
        assert!(relay.own_announce(3));
        assert_eq!(handle.sent().len(), 1);
    }

    #[test]
    fn test_attach_closes_previous() {
        let first = MemoryChannel::new_open();
        let second = MemoryChannel::new_open();
        let mut relay = RelayEncoder::new();
        relay.attach(Box::new(first.clone()));
        relay.attach(Box::new(second.clone()));
        assert!(!first.is_open());
        assert!(second.is_open());

        relay.close();
        assert!(!relay.is_attached());
        assert!(!second.is_open());
    }

    #[test]
    fn test_sync_skips_first_sightings() {
        let mut store = EntityStore::new();
        store.upsert(cell(1, 1.0), 0);
        store.upsert(cell(2, 2.0), 0);
        store.drain_deltas();

        store.upsert(cell(1, 5.0), 10);
        store.upsert(cell(3, 3.0), 10);
        store.merge(2, 1, 10);
        store.destroy(40);
        store.upsert(cell(4, 4.0), 10);
        store.destroy(4);
        let sync = entity_sync_from(&store.drain_deltas());

        assert_eq!(sync.additions.len(), 1);
        assert_eq!(sync.additions[0].id, 1);
        assert_eq!(sync.additions[0].x, 5.0);
        assert_eq!(sync.additions[0].color, "#010203");
        assert_eq!(sync.deletions, vec![2, 4]);
    }

    #[test]
    fn test_empty_sync_not_sent() {
        let handle = MemoryChannel::new_open();
        let mut relay = RelayEncoder::new();
        relay.attach(Box::new(handle.clone()));
        assert!(!relay.entity_sync(&[]));
        assert!(relay.entity_sync(&[Delta::Evicted { id: 9 }]));

        let sent: serde_json::Value = rmp_serde::from_slice(&handle.sent()[0]).unwrap();
        assert_eq!(sent["type"], 16);
        assert_eq!(sent["data"]["deletion"][0], 9);
    }
}
