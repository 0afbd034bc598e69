//! Primary game protocol decoder.
//!
//! Frame layout (little-endian):
//!
//! ```text
//! [0xF0 + 4 bytes]?  optional out-of-band prefix, skipped
//! opcode: u8
//! 0x10 EntityUpdate
//!     count: u16, then count x (eaten_id: u32, eater_id: u32)
//!     records until id == 0:
//!         id: u32, x: i32, y: i32, size: i16, r: u8, g: u8, b: u8, flags: u8
//!         flags & 0x02 -> len: u32, len opaque bytes
//!         flags & 0x04 -> skin: zero-terminated bytes
//!         name: zero-terminated UTF-16
//!     out_of_view: u32, then that many ids: u32
//! 0x14 ClearOwned    (no body)
//! 0x20 OwnAdd        id: u32
//! 0x40 Border        start_x, start_y, end_x, end_y: f64
//! ```
//!
//! Decoding is pure: a fresh cursor per call, no state across frames.

use minimap_state::{Border, CellFlags, CellUpdate, Color, DomainEvent, EntityId};

use crate::reader::{DecodeError, Reader};

/// First byte of the optional out-of-band prefix.
pub const OOB_PREFIX_MARKER: u8 = 0xF0;

/// Length of the out-of-band prefix, marker included.
pub const OOB_PREFIX_LEN: usize = 5;

/// Record carries a length-prefixed block to skip.
pub const FLAG_EXTENDED: u8 = 0x02;

/// Record carries a zero-terminated skin name.
pub const FLAG_SKIN: u8 = 0x04;

/// Outbound opcode of the client's name-set frame.
pub const OUTBOUND_SET_NICK: u8 = 0x00;

/// Opcodes the decoder interprets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    EntityUpdate = 0x10,
    ClearOwned = 0x14,
    OwnAdd = 0x20,
    Border = 0x40,
}

impl TryFrom<u8> for Opcode {
    type Error = DecodeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x10 => Ok(Self::EntityUpdate),
            0x14 => Ok(Self::ClearOwned),
            0x20 => Ok(Self::OwnAdd),
            0x40 => Ok(Self::Border),
            other => Err(DecodeError::UnknownOpcode(other)),
        }
    }
}

/// Decode one inbound frame into domain events.
///
/// Unknown opcodes yield an empty list. Any read past the end of the buffer,
/// including unterminated strings and counts that cannot fit, fails with
/// [`DecodeError::Truncated`].
pub fn decode(buffer: &[u8]) -> Result<Vec<DomainEvent>, DecodeError> {
    let mut reader = Reader::new(buffer);
    if buffer.first() == Some(&OOB_PREFIX_MARKER) {
        reader.skip(OOB_PREFIX_LEN)?;
    }

    let byte = reader.u8()?;
    let opcode = match Opcode::try_from(byte) {
        Ok(opcode) => opcode,
        Err(err) => {
            tracing::trace!(%err, "passing frame through");
            return Ok(Vec::new());
        }
    };

    match opcode {
        Opcode::EntityUpdate => decode_entity_update(&mut reader),
        Opcode::ClearOwned => Ok(vec![DomainEvent::ClearOwnership]),
        Opcode::OwnAdd => Ok(vec![DomainEvent::OwnAdd {
            id: reader.u32_le()?,
        }]),
        Opcode::Border => Ok(vec![DomainEvent::Border(Border {
            start_x: reader.f64_le()?,
            start_y: reader.f64_le()?,
            end_x: reader.f64_le()?,
            end_y: reader.f64_le()?,
        })]),
    }
}

fn decode_entity_update(reader: &mut Reader<'_>) -> Result<Vec<DomainEvent>, DecodeError> {
    let mut events = Vec::new();

    let merges = usize::from(reader.u16_le()?);
    reader.ensure_records(merges, 8)?;
    for _ in 0..merges {
        let eaten_id = reader.u32_le()?;
        let eater_id = reader.u32_le()?;
        events.push(DomainEvent::Merge { eaten_id, eater_id });
    }

    loop {
        let id = reader.u32_le()?;
        if id == 0 {
            break;
        }
        events.push(DomainEvent::Upsert(decode_record(id, reader)?));
    }

    let out_of_view = reader.u32_le()? as usize;
    reader.ensure_records(out_of_view, 4)?;
    for _ in 0..out_of_view {
        events.push(DomainEvent::Destroy {
            id: reader.u32_le()?,
        });
    }

    Ok(events)
}

fn decode_record(id: EntityId, reader: &mut Reader<'_>) -> Result<CellUpdate, DecodeError> {
    let x = reader.i32_le()?;
    let y = reader.i32_le()?;
    let size = reader.i16_le()?;
    let color = Color::from_rgb(reader.u8()?, reader.u8()?, reader.u8()?);
    let flags = reader.u8()?;

    if flags & FLAG_EXTENDED != 0 {
        let len = reader.u32_le()? as usize;
        reader.skip(len)?;
    }
    let skin = if flags & FLAG_SKIN != 0 {
        Some(reader.latin1_z()?)
    } else {
        None
    };
    let name = reader.utf16_z()?;

    Ok(CellUpdate {
        id,
        position: [f64::from(x), f64::from(y)],
        size: f64::from(size),
        color,
        flags: CellFlags::from_bits(flags),
        name,
        skin,
    })
}

// ============================================================================
// Outbound
// ============================================================================

/// Client-to-server frame the interceptor mirrors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundEvent {
    /// The player set their name; UTF-16 code units.
    SetNick { name: Vec<u16> },
}

/// Inspect one outbound frame. Only the name-set frame is interpreted; a
/// trailing odd byte in it is ignored.
pub fn decode_outbound(buffer: &[u8]) -> Result<Option<OutboundEvent>, DecodeError> {
    let mut reader = Reader::new(buffer);
    if reader.u8()? != OUTBOUND_SET_NICK {
        return Ok(None);
    }
    let name = reader
        .rest()
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    Ok(Some(OutboundEvent::SetNick { name }))
}

// ============================================================================
// Tests
// ============================================================================
