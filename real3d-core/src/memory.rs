//! Emulated memory regions read by the Real3D pipeline.
//!
//! The CPU emulation owns these regions; the pipeline only reads them.
//! `SceneMemory` is the borrowed view used during traversal, `MemoryImage`
//! an owned copy that can be passed between threads at frame boundaries.
//!
//! # Address Translation
//! Culling and model addresses are 24-bit word addresses:
//! - `0x800000..0x840000` culling RAM high (1 MB)
//! - `0x000000..0x100000` culling RAM low (4 MB) / polygon RAM (4 MB) for models
//! - model addresses `>= 0x100000` index video ROM (64 MB)

/// Word counts of each region.
pub const CULLING_RAM_LO_WORDS: usize = 0x40_0000 / 4;
pub const CULLING_RAM_HI_WORDS: usize = 0x10_0000 / 4;
pub const POLY_RAM_WORDS: usize = 0x40_0000 / 4;
pub const VROM_WORDS: usize = 0x400_0000 / 4;
/// Texture RAM is a 2048x2048 grid of 16-bit texels.
pub const TEXTURE_RAM_TEXELS: usize = 2048 * 2048;

/// Start of the material colour table in polygon RAM.
pub const COLOR_TABLE_OFFSET: usize = 0x400;

/// Borrowed view of the five memory regions.
#[derive(Debug, Clone, Copy)]
pub struct SceneMemory<'a> {
    pub culling_ram_lo: &'a [u32],
    pub culling_ram_hi: &'a [u32],
    pub poly_ram: &'a [u32],
    pub vrom: &'a [u32],
    pub texture_ram: &'a [u16],
}

impl<'a> SceneMemory<'a> {
    /// Words starting at a culling address, or `None` if the address is not
    /// in culling RAM.
    #[inline]
    pub fn culling(&self, addr: u32) -> Option<&'a [u32]> {
        let addr = (addr & 0x00FF_FFFF) as usize;
        if (0x80_0000..0x84_0000).contains(&addr) {
            self.culling_ram_hi.get(addr & 0x3_FFFF..)
        } else if addr < 0x10_0000 {
            self.culling_ram_lo.get(addr..)
        } else {
            None
        }
    }

    /// Exactly `len` words at a culling address.
    #[inline]
    pub fn culling_words(&self, addr: u32, len: usize) -> Option<&'a [u32]> {
        self.culling(addr).and_then(|w| w.get(..len))
    }

    /// Words starting at a model address (polygon RAM or video ROM).
    #[inline]
    pub fn model(&self, addr: u32) -> Option<&'a [u32]> {
        let addr = (addr & 0x00FF_FFFF) as usize;
        if addr < 0x10_0000 {
            self.poly_ram.get(addr..)
        } else {
            self.vrom.get(addr..)
        }
    }

    /// Material colour table (0x00RRGGBB entries).
    #[inline]
    pub fn color_table(&self) -> &'a [u32] {
        self.poly_ram.get(COLOR_TABLE_OFFSET..).unwrap_or(&[])
    }
}

/// Reinterpret a memory word as an IEEE single.
#[inline(always)]
pub fn word_f32(word: u32) -> f32 {
    f32::from_bits(word)
}

/// Owned copy of the memory regions.
#[derive(Debug, Clone)]
pub struct MemoryImage {
    pub culling_ram_lo: Vec<u32>,
    pub culling_ram_hi: Vec<u32>,
    pub poly_ram: Vec<u32>,
    pub vrom: Vec<u32>,
    pub texture_ram: Vec<u16>,
}

impl MemoryImage {
    /// Zero-filled regions of the hardware sizes.
    pub fn new() -> Self {
        Self {
            culling_ram_lo: vec![0; CULLING_RAM_LO_WORDS],
            culling_ram_hi: vec![0; CULLING_RAM_HI_WORDS],
            poly_ram: vec![0; POLY_RAM_WORDS],
            vrom: vec![0; VROM_WORDS],
            texture_ram: vec![0; TEXTURE_RAM_TEXELS],
        }
    }

    pub fn as_scene(&self) -> SceneMemory<'_> {
        SceneMemory {
            culling_ram_lo: &self.culling_ram_lo,
            culling_ram_hi: &self.culling_ram_hi,
            poly_ram: &self.poly_ram,
            vrom: &self.vrom,
            texture_ram: &self.texture_ram,
        }
    }

    /// Mutable word at a culling address; `None` outside culling RAM.
    pub fn culling_mut(&mut self, addr: u32) -> Option<&mut u32> {
        let addr = (addr & 0x00FF_FFFF) as usize;
        if (0x80_0000..0x84_0000).contains(&addr) {
            self.culling_ram_hi.get_mut(addr & 0x3_FFFF)
        } else if addr < 0x10_0000 {
            self.culling_ram_lo.get_mut(addr)
        } else {
            None
        }
    }

    /// Mutable word at a model address.
    pub fn model_mut(&mut self, addr: u32) -> Option<&mut u32> {
        let addr = (addr & 0x00FF_FFFF) as usize;
        if addr < 0x10_0000 {
            self.poly_ram.get_mut(addr)
        } else {
            self.vrom.get_mut(addr)
        }
    }

    /// Copy words into culling RAM. Words falling outside are dropped.
    pub fn write_culling(&mut self, addr: u32, words: &[u32]) {
        for (i, &w) in words.iter().enumerate() {
            if let Some(slot) = self.culling_mut(addr + i as u32) {
                *slot = w;
            }
        }
    }

    /// Copy words into polygon RAM or video ROM.
    pub fn write_model(&mut self, addr: u32, words: &[u32]) {
        for (i, &w) in words.iter().enumerate() {
            if let Some(slot) = self.model_mut(addr + i as u32) {
                *slot = w;
            }
        }
    }
}

impl Default for MemoryImage {
    fn default() -> Self {
        Self::new()
    }
}
