//! Primary frame encoder.
//!
//! Produces frames in the game server's layout. The interceptor itself never
//! sends these; they exist to drive the decoder and the session from tests
//! and capture tooling.

use minimap_state::{CellFlags, CellUpdate, EntityId};

use crate::primary::{FLAG_EXTENDED, FLAG_SKIN, OUTBOUND_SET_NICK, Opcode};

/// Little-endian byte sink.
#[derive(Debug, Clone, Default)]
pub struct FrameWriter {
    buf: Vec<u8>,
}

impl FrameWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn u8(&mut self, v: u8) -> &mut Self {
        self.buf.push(v);
        self
    }

    pub fn u16(&mut self, v: u16) -> &mut Self {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn i16(&mut self, v: i16) -> &mut Self {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn u32(&mut self, v: u32) -> &mut Self {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn i32(&mut self, v: i32) -> &mut Self {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn f64(&mut self, v: f64) -> &mut Self {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn bytes(&mut self, v: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(v);
        self
    }

    /// UTF-16 units followed by a zero unit.
    pub fn utf16_z(&mut self, units: &[u16]) -> &mut Self {
        for &unit in units {
            self.u16(unit);
        }
        self.u16(0)
    }

    pub fn finish(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.buf)
    }
}

/// One update record. Coordinates and size are truncated to the wire's
/// integer widths.
fn write_record(w: &mut FrameWriter, update: &CellUpdate, extended: Option<&[u8]>) {
    let color = update.color.packed();
    let mut flags = 0u8;
    if update.flags.is_virus {
        flags |= CellFlags::VIRUS;
    }
    if update.flags.is_agitated {
        flags |= CellFlags::AGITATED;
    }
    if extended.is_some() {
        flags |= FLAG_EXTENDED;
    }
    if update.skin.is_some() {
        flags |= FLAG_SKIN;
    }

    w.u32(update.id)
        .i32(update.position[0] as i32)
        .i32(update.position[1] as i32)
        .i16(update.size as i16)
        .u8((color >> 16) as u8)
        .u8((color >> 8) as u8)
        .u8(color as u8)
        .u8(flags);
    if let Some(block) = extended {
        w.u32(block.len() as u32).bytes(block);
    }
    if let Some(skin) = &update.skin {
        let latin1: Vec<u8> = skin.chars().map(|c| u8::try_from(c).unwrap_or(b'?')).collect();
        w.bytes(&latin1).u8(0);
    }
    w.utf16_z(&update.name);
}

fn write_update_frame(
    merges: &[(EntityId, EntityId)],
    updates: &[(&CellUpdate, Option<&[u8]>)],
    out_of_view: &[EntityId],
) -> Vec<u8> {
    let mut w = FrameWriter::new();
    w.u8(Opcode::EntityUpdate as u8);
    w.u16(merges.len() as u16);
    for &(eaten, eater) in merges {
        w.u32(eaten).u32(eater);
    }
    for &(update, extended) in updates {
        write_record(&mut w, update, extended);
    }
    w.u32(0);
    w.u32(out_of_view.len() as u32);
    for &id in out_of_view {
        w.u32(id);
    }
    w.finish()
}

/// `0x10` entity update frame.
pub fn entity_update_frame(
    merges: &[(EntityId, EntityId)],
    updates: &[CellUpdate],
    out_of_view: &[EntityId],
) -> Vec<u8> {
    let records: Vec<_> = updates.iter().map(|u| (u, None)).collect();
    write_update_frame(merges, &records, out_of_view)
}

/// Single-record update frame whose record carries `block` as its extended
/// sub-block.
pub fn entity_update_frame_with_extended(update: &CellUpdate, block: &[u8]) -> Vec<u8> {
    write_update_frame(&[], &[(update, Some(block))], &[])
}

pub fn clear_owned_frame() -> Vec<u8> {
    vec![Opcode::ClearOwned as u8]
}

pub fn own_add_frame(id: EntityId) -> Vec<u8> {
    FrameWriter::new().u8(Opcode::OwnAdd as u8).u32(id).finish()
}

pub fn border_frame(start_x: f64, start_y: f64, end_x: f64, end_y: f64) -> Vec<u8> {
    FrameWriter::new()
        .u8(Opcode::Border as u8)
        .f64(start_x)
        .f64(start_y)
        .f64(end_x)
        .f64(end_y)
        .finish()
}

/// Outbound name-set frame: opcode then UTF-16 units, no terminator.
pub fn set_nick_frame(name: &str) -> Vec<u8> {
    let mut w = FrameWriter::new();
    w.u8(OUTBOUND_SET_NICK);
    for unit in name.encode_utf16() {
        w.u16(unit);
    }
    w.finish()
}
