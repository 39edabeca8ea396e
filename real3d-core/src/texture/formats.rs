// Real3D texel formats
use super::TEXTURE_RAM_SIDE;
use image::{Rgba, RgbaImage};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    T1Rgb5,    // 1-bit transparency + RGB555
    A4L4Low,   // 4-bit alpha/luminance in the low byte
    L8Low,     // 8-bit luminance in the low byte
    A4L4High,  // 4-bit alpha/luminance in the high byte
    A8L8,      // 8-bit alpha + 8-bit luminance
    L8High,    // 8-bit luminance in the high byte
    Rgb5,      // RGB555, transparency bit ignored
    Rgba4,     // 4 bits per channel
}

impl TextureFormat {
    pub const ALL: [TextureFormat; 8] = [
        Self::T1Rgb5,
        Self::A4L4Low,
        Self::L8Low,
        Self::A4L4High,
        Self::A8L8,
        Self::L8High,
        Self::Rgb5,
        Self::Rgba4,
    ];

    /// Format from the 3-bit polygon header field.
    pub fn from_bits(bits: u8) -> Self {
        Self::ALL[(bits & 7) as usize]
    }

    pub fn bits(self) -> u8 {
        self as u8
    }

    /// Convert one 16-bit texel to RGBA8.
    #[inline]
    pub fn texel(self, t: u16) -> [u8; 4] {
        match self {
            Self::T1Rgb5 => {
                let [r, g, b] = rgb555(t);
                let a = if t & 0x8000 != 0 { 0 } else { 0xFF };
                [r, g, b, a]
            }
            Self::Rgb5 => {
                let [r, g, b] = rgb555(t);
                [r, g, b, 0xFF]
            }
            Self::A4L4Low => a4l4((t & 0xFF) as u8),
            Self::A4L4High => a4l4((t >> 8) as u8),
            Self::L8Low => {
                let l = (t & 0xFF) as u8;
                [l, l, l, 0xFF]
            }
            Self::L8High => {
                let l = (t >> 8) as u8;
                [l, l, l, 0xFF]
            }
            Self::A8L8 => {
                let l = (t & 0xFF) as u8;
                [l, l, l, (t >> 8) as u8]
            }
            Self::Rgba4 => [
                nibble(t >> 12),
                nibble(t >> 8),
                nibble(t >> 4),
                nibble(t),
            ],
        }
    }

    /// Decode a rectangle of texture RAM. The rectangle is clipped to the
    /// 2048x2048 grid; texels missing from `texture_ram` decode as zero.
    pub fn decode(self, texture_ram: &[u16], x: u32, y: u32, width: u32, height: u32) -> RgbaImage {
        let x = x.min(TEXTURE_RAM_SIDE);
        let y = y.min(TEXTURE_RAM_SIDE);
        let width = width.min(TEXTURE_RAM_SIDE - x);
        let height = height.min(TEXTURE_RAM_SIDE - y);

        let mut image = RgbaImage::new(width, height);
        for row in 0..height {
            let base = ((y + row) * TEXTURE_RAM_SIDE + x) as usize;
            for col in 0..width {
                let t = texture_ram.get(base + col as usize).copied().unwrap_or(0);
                image.put_pixel(col, row, Rgba(self.texel(t)));
            }
        }
        image
    }
}

#[inline]
fn expand5(c: u16) -> u8 {
    let c = (c & 0x1F) as u8;
    (c << 3) | (c >> 2)
}

#[inline]
fn rgb555(t: u16) -> [u8; 3] {
    [expand5(t >> 10), expand5(t >> 5), expand5(t)]
}

#[inline]
fn nibble(v: u16) -> u8 {
    (v & 0xF) as u8 * 17
}

// Luminance in the upper nibble, alpha in the lower.
#[inline]
fn a4l4(byte: u8) -> [u8; 4] {
    let l = (byte >> 4) * 17;
    [l, l, l, (byte & 0xF) * 17]
}
