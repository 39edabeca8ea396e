//! Test Utilities
//!
//! Builders for hand-assembled scene databases: viewport nodes, culling
//! nodes and polygon streams written into a reduced-size memory image.

#![allow(dead_code)]

use real3d_core::config::{RendererConfig, Stepping};
use real3d_core::memory::{MemoryImage, TEXTURE_RAM_TEXELS};
use real3d_core::viewport::VIEWPORT_WORDS;

/// Matrix table used by every test viewport.
pub const MATRIX_BASE: u32 = 0x80_0100;

/// Header word 6 of an opaque, untextured, unlit polygon.
pub const OPAQUE: u32 = 0x0080_0000 | 0x0001_0000;

/// Polygon RAM, culling RAM and a slice of video ROM, large enough for the
/// addresses the tests use.
pub fn small_memory() -> MemoryImage {
    MemoryImage {
        culling_ram_lo: vec![0; 0x1_0000],
        culling_ram_hi: vec![0; 0x1_0000],
        poly_ram: vec![0; 0x1_0000],
        vrom: vec![0; 0x11_0000],
        texture_ram: vec![0; TEXTURE_RAM_TEXELS],
    }
}

/// Small caches, stepping 2.0 so culling nodes carry texture offsets.
pub fn test_config() -> RendererConfig {
    let mut config = RendererConfig::default();
    config.stepping = Stepping::Step2_0;
    config.gpu_multithreaded = false;
    config.cache.static_vertices = 1200;
    config.cache.dynamic_vertices = 600;
    config.cache.local_vertices = 120;
    config.cache.static_models = 16;
    config.cache.dynamic_models = 16;
    config.cache.static_lut_entries = 0x11_0000;
    config.cache.dynamic_lut_entries = 0x1_0000;
    config.cache.display_list_items = 64;
    config
}

/// A full-screen viewport node at `addr` whose scene root is `root`.
pub fn write_viewport(mem: &mut MemoryImage, addr: u32, next: u32, root: u32, priority: u32) {
    let mut w = [0u32; VIEWPORT_WORDS];
    w[0] = priority << 3;
    w[1] = next;
    w[2] = root;
    w[0x0E] = 0.5f32.to_bits();
    w[0x12] = 0.5f32.to_bits();
    w[0x14] = (384 << 18) | (496 << 2);
    w[0x16] = MATRIX_BASE;
    mem.write_culling(addr, &w);
    write_base_matrix(mem);
}

/// Coordinate system matrix: a Y/Z/X axis rotation with element 5 = 1.
pub fn write_base_matrix(mem: &mut MemoryImage) {
    let m: [f32; 12] = [0.0, 0.0, 0.0, 0.0, 0.0, 1.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0];
    let words: Vec<u32> = m.iter().map(|v| v.to_bits()).collect();
    mem.write_culling(MATRIX_BASE, &words);
}

/// Stepping 2.0 culling node.
///
/// `flags` is word 0; low bits `6` stop at this node without following
/// `sibling`.
pub fn write_culling_node(
    mem: &mut MemoryImage,
    addr: u32,
    flags: u32,
    tex_word: u32,
    translate: Option<[f32; 3]>,
    child: u32,
    sibling: u32,
) {
    let mut w = [0u32; 9];
    w[0] = flags;
    w[2] = tex_word;
    if let Some(t) = translate {
        w[0] |= 0x10;
        w[4] = t[0].to_bits();
        w[5] = t[1].to_bits();
        w[6] = t[2].to_bits();
    }
    w[7] = child;
    w[8] = sibling;
    mem.write_culling(addr, &w);
}

/// Model pointer for a node's child word.
pub fn model_ptr(addr: u32) -> u32 {
    0x0100_0000 | addr
}

/// Polygon header with normal and flags in words 0, 1 and 6.
pub fn header(h0: u32, h1: u32, h6: u32) -> [u32; 7] {
    [h0, h1, 0, 0, 0, 0, h6]
}

/// Vertex words for a position in stepping 2.0 units (1/2048).
pub fn vertex(x: f32, y: f32, z: f32) -> [u32; 4] {
    let fixed = |v: f32| (((v * 2048.0) as i32) << 8) as u32;
    [fixed(x), fixed(y), fixed(z), 0]
}

/// A single-sided quad in the XY plane, ending the model.
pub fn quad_model(h1: u32, h6: u32) -> Vec<u32> {
    let mut words = header(0x40, 0x04 | h1, h6).to_vec();
    for (x, y) in [(0.0, 0.0), (0.0, 1.0), (1.0, 1.0), (1.0, 0.0)] {
        words.extend(vertex(x, y, 0.0));
    }
    words
}

/// A single triangle, ending the model.
pub fn triangle_model() -> Vec<u32> {
    let mut words = header(0, 0x04, OPAQUE).to_vec();
    for (x, y) in [(0.0, 0.0), (0.0, 1.0), (1.0, 1.0)] {
        words.extend(vertex(x, y, 0.0));
    }
    words
}
