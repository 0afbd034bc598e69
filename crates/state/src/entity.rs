//! Entity records owned by the registry.
//!
//! Entities are plain values. All mutation goes through
//! [`EntityStore`](crate::store::EntityStore); callers only ever see clones or
//! shared references.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Identifier assigned by the game server. `0` is reserved as the
/// end-of-records sentinel and never names a live entity.
pub type EntityId = u32;

/// Milliseconds on the caller's clock.
pub type Millis = u64;

/// Opaque token grouping every upsert applied from one decoded frame.
pub type Generation = u64;

// ============================================================================
// Color
// ============================================================================

/// 24-bit RGB colour, rendered as `#rrggbb`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Color(u32);

impl Color {
    pub fn from_rgb(r: u8, g: u8, b: u8) -> Self {
        Self(u32::from(r) << 16 | u32::from(g) << 8 | u32::from(b))
    }

    /// Build from a packed `0xRRGGBB` value; bits above 24 are discarded.
    pub fn from_packed(value: u32) -> Self {
        Self(value & 0x00ff_ffff)
    }

    pub fn packed(self) -> u32 {
        self.0
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:06x}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid colour {0:?}, expected #rrggbb")]
pub struct ParseColorError(pub String);

impl FromStr for Color {
    type Err = ParseColorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hex = s
            .strip_prefix('#')
            .filter(|h| h.len() == 6)
            .ok_or_else(|| ParseColorError(s.to_string()))?;
        u32::from_str_radix(hex, 16)
            .map(Self::from_packed)
            .map_err(|_| ParseColorError(s.to_string()))
    }
}

// ============================================================================
// Flags
// ============================================================================

/// Per-entity flags carried in the update record's flag byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CellFlags {
    pub is_virus: bool,
    pub is_agitated: bool,
}

impl CellFlags {
    pub const VIRUS: u8 = 0x01;
    pub const AGITATED: u8 = 0x10;

    pub fn from_bits(bits: u8) -> Self {
        Self {
            is_virus: bits & Self::VIRUS != 0,
            is_agitated: bits & Self::AGITATED != 0,
        }
    }
}

// ============================================================================
// Double-buffered values
// ============================================================================

/// A value kept as the previous and the latest observation, so renderers can
/// interpolate between them.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Buffered<T> {
    pub old: T,
    pub new: T,
}

impl<T: Copy> Buffered<T> {
    /// Both halves start equal.
    pub fn new(value: T) -> Self {
        Self {
            old: value,
            new: value,
        }
    }

    /// `old <- new`, then `new <- next`.
    pub fn shift(&mut self, next: T) {
        self.old = self.new;
        self.new = next;
    }
}

// ============================================================================
// Update payload and Entity
// ============================================================================

/// Decoded contents of one update record.
#[derive(Debug, Clone, PartialEq)]
pub struct CellUpdate {
    pub id: EntityId,
    pub position: [f64; 2],
    pub size: f64,
    pub color: Color,
    pub flags: CellFlags,
    /// UTF-16 code units, possibly empty.
    pub name: Vec<u16>,
    pub skin: Option<String>,
}

/// One tracked game object.
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    pub id: EntityId,
    pub position: Buffered<[f64; 2]>,
    pub size: Buffered<f64>,
    pub color: Color,
    pub name: Vec<u16>,
    pub skin: Option<String>,
    pub flags: CellFlags,
    pub last_update: Millis,
    pub generation: Generation,
}

impl Entity {
    pub(crate) fn from_update(update: CellUpdate, now: Millis, generation: Generation) -> Self {
        Self {
            id: update.id,
            position: Buffered::new(update.position),
            size: Buffered::new(update.size),
            color: update.color,
            name: update.name,
            skin: update.skin,
            flags: update.flags,
            last_update: now,
            generation,
        }
    }

    /// Apply a subsequent update record. An empty name or missing skin keeps
    /// the value already known.
    pub(crate) fn apply_update(&mut self, update: CellUpdate, now: Millis, generation: Generation) {
        self.position.shift(update.position);
        self.size.shift(update.size);
        self.color = update.color;
        self.flags = update.flags;
        if !update.name.is_empty() {
            self.name = update.name;
        }
        if update.skin.is_some() {
            self.skin = update.skin;
        }
        self.last_update = now;
        self.generation = generation;
    }

    /// Name decoded lossily from its UTF-16 code units.
    pub fn name_lossy(&self) -> String {
        String::from_utf16_lossy(&self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_color_renders_six_hex_digits() {
        assert_eq!(Color::from_rgb(0x11, 0x22, 0x33).to_string(), "#112233");
        assert_eq!(Color::from_rgb(0, 0, 0x0a).to_string(), "#00000a");
        assert_eq!(Color::from_packed(0xff11_2233).packed(), 0x11_2233);
    }

    #[test]
    fn test_color_parse() {
        assert_eq!("#112233".parse::<Color>(), Ok(Color::from_packed(0x112233)));
        assert!("112233".parse::<Color>().is_err());
        assert!("#1122".parse::<Color>().is_err());
        assert!("#zz2233".parse::<Color>().is_err());
    }

    #[test]
    fn test_flags_from_bits() {
        assert_eq!(CellFlags::from_bits(0x00), CellFlags::default());
        let flags = CellFlags::from_bits(0x11 | 0x02 | 0x04);
        assert!(flags.is_virus);
        assert!(flags.is_agitated);
        assert!(!CellFlags::from_bits(0x02).is_virus);
    }

    #[test]
    fn test_buffered_shift() {
        let mut b = Buffered::new(1.0);
        assert_eq!(b.old, b.new);
        b.shift(2.0);
        assert_eq!((b.old, b.new), (1.0, 2.0));
        b.shift(3.0);
        assert_eq!((b.old, b.new), (2.0, 3.0));
    }
}
