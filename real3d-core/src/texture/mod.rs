//! Texture RAM decoding and placement.
//!
//! Polygons reference rectangles of the 2048x2048 texture RAM. Referenced
//! rectangles are decoded to RGBA8 on demand and copied into one of the
//! texture sheets; the sheet records what was decoded where so repeated
//! references cost nothing until texture RAM changes.

pub mod formats;
pub mod sheets;

pub use formats::TextureFormat;
pub use sheets::{SheetLayout, SheetPlacement, TextureSheets};

/// Side of texture RAM in texels.
pub const TEXTURE_RAM_SIDE: u32 = 2048;

/// A texture rectangle referenced by a polygon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureRef {
    pub format: u8,
    pub x: u16,
    pub y: u16,
    pub width: u16,
    pub height: u16,
}

/// Per-instance adjustment of texture base coordinates, set by culling nodes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TexOffset {
    pub x: u32,
    pub y: u32,
    /// Raw culling node bits; part of the model cache key.
    pub raw: u16,
}

impl TexOffset {
    /// Decode culling node word 2. `None` when the word carries no offset.
    pub fn from_culling_word(word: u32) -> Option<Self> {
        if word & 0x8000 == 0 {
            return None;
        }
        let page = if word & 0x4000 != 0 { 1024 } else { 0 };
        Some(Self {
            x: 32 * ((word >> 7) & 0x3F),
            y: 32 * (word & 0x3F) + page,
            raw: (word & 0x7FFF) as u16,
        })
    }
}
