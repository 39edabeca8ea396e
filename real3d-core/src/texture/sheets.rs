use super::{TextureFormat, TextureRef, TEXTURE_RAM_SIDE};
use crate::backend::RenderBackend;
use crate::config::TextureConfig;
use crate::error::BackendError;
use log::debug;

const BLOCK: u32 = 32;
const BLOCKS_PER_SIDE: usize = (TEXTURE_RAM_SIDE / BLOCK) as usize;

/// Where a sheet sits inside the backend texture maps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SheetPlacement {
    pub map: u32,
    pub x_offset: u32,
    pub y_offset: u32,
}

/// Mapping from texture format to sheet, fixed at startup.
///
/// A sheet is a 2048x2048 region of a texture map. Maps hold
/// `extent * extent` sheets; at most eight sheets are used (one per format)
/// and formats share sheets when fewer are available.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SheetLayout {
    sheets: Vec<SheetPlacement>,
    num_maps: u32,
    map_side: u32,
}

impl SheetLayout {
    pub fn new(config: &TextureConfig) -> Self {
        let extent = config.max_tex_map_extent.max(1);
        let per_map = extent * extent;
        let max_maps = config.max_tex_maps.clamp(1, 9);
        let num_sheets = (max_maps * per_map).min(TextureFormat::ALL.len() as u32);
        let num_maps = num_sheets.div_ceil(per_map);

        let sheets = (0..num_sheets)
            .map(|i| {
                let slot = i % per_map;
                SheetPlacement {
                    map: i / per_map,
                    x_offset: (slot % extent) * TEXTURE_RAM_SIDE,
                    y_offset: (slot / extent) * TEXTURE_RAM_SIDE,
                }
            })
            .collect();

        Self {
            sheets,
            num_maps,
            map_side: TEXTURE_RAM_SIDE * extent,
        }
    }

    #[inline]
    pub fn sheet_index(&self, format: u8) -> usize {
        (format & 7) as usize % self.sheets.len()
    }

    #[inline]
    pub fn placement(&self, format: u8) -> SheetPlacement {
        self.sheets[self.sheet_index(format)]
    }

    pub fn num_sheets(&self) -> usize {
        self.sheets.len()
    }

    pub fn num_maps(&self) -> u32 {
        self.num_maps
    }

    /// Side of each texture map in texels.
    pub fn map_side(&self) -> u32 {
        self.map_side
    }
}

/// What was last decoded with its origin in a 32x32 block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct BlockRecord {
    format: u8,
    width: u16,
    height: u16,
}

#[derive(Debug, Clone)]
struct SheetRecords {
    blocks: Vec<Option<BlockRecord>>,
}

impl SheetRecords {
    fn new() -> Self {
        Self {
            blocks: vec![None; BLOCKS_PER_SIDE * BLOCKS_PER_SIDE],
        }
    }

    #[inline]
    fn slot(x: u16, y: u16) -> usize {
        (y as usize / BLOCK as usize) * BLOCKS_PER_SIDE + x as usize / BLOCK as usize
    }
}

/// Texture sheets and their decode records.
#[derive(Debug, Clone)]
pub struct TextureSheets {
    layout: SheetLayout,
    records: Vec<SheetRecords>,
    decoded: u64,
}

impl TextureSheets {
    /// Create the sheets and the backend texture maps holding them.
    pub fn new(config: &TextureConfig, backend: &mut dyn RenderBackend) -> Result<Self, BackendError> {
        let layout = SheetLayout::new(config);
        backend.create_texture_maps(layout.num_maps(), layout.map_side())?;
        debug!(
            "{} texture sheets in {} maps of {}x{}",
            layout.num_sheets(),
            layout.num_maps(),
            layout.map_side(),
            layout.map_side()
        );
        let records = (0..layout.num_sheets()).map(|_| SheetRecords::new()).collect();
        Ok(Self {
            layout,
            records,
            decoded: 0,
        })
    }

    pub fn layout(&self) -> &SheetLayout {
        &self.layout
    }

    /// Textures decoded since creation.
    pub fn decoded_count(&self) -> u64 {
        self.decoded
    }

    /// Decode `tex` into its sheet unless the sheet already holds it.
    /// Returns `true` when texture RAM was decoded and uploaded.
    pub fn decode_texture(
        &mut self,
        texture_ram: &[u16],
        tex: &TextureRef,
        backend: &mut dyn RenderBackend,
    ) -> bool {
        let sheet = self.layout.sheet_index(tex.format);
        let slot = SheetRecords::slot(tex.x, tex.y);
        let record = BlockRecord {
            format: tex.format,
            width: tex.width,
            height: tex.height,
        };
        let Some(block) = self.records[sheet].blocks.get_mut(slot) else {
            return false;
        };
        if *block == Some(record) {
            return false;
        }

        let image = TextureFormat::from_bits(tex.format).decode(
            texture_ram,
            tex.x as u32,
            tex.y as u32,
            tex.width as u32,
            tex.height as u32,
        );
        let placement = self.layout.sheets[sheet];
        backend.upload_texture(
            placement.map,
            placement.x_offset + tex.x as u32,
            placement.y_offset + tex.y as u32,
            &image,
        );
        *block = Some(record);
        self.decoded += 1;
        true
    }

    /// Forget every decoded texture overlapping a changed region of texture
    /// RAM, in all sheets.
    pub fn upload_textures(&mut self, x: u32, y: u32, width: u32, height: u32) {
        let x1 = x.saturating_add(width).min(TEXTURE_RAM_SIDE);
        let y1 = y.saturating_add(height).min(TEXTURE_RAM_SIDE);
        for sheet in &mut self.records {
            for (slot, block) in sheet.blocks.iter_mut().enumerate() {
                let Some(rec) = block else { continue };
                let bx = (slot % BLOCKS_PER_SIDE) as u32 * BLOCK;
                let by = (slot / BLOCKS_PER_SIDE) as u32 * BLOCK;
                let overlaps = bx < x1
                    && x < bx + rec.width as u32
                    && by < y1
                    && y < by + rec.height as u32;
                if overlaps {
                    *block = None;
                }
            }
        }
    }

    /// Forget all decoded textures.
    pub fn reset(&mut self) {
        for sheet in &mut self.records {
            sheet.blocks.fill(None);
        }
    }
}
