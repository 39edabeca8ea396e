//! Scene graph traversal.
//!
//! Walks the viewport chain and the culling node graph below each viewport,
//! maintaining the matrix stack and texture offset, and appends an instance
//! to the display lists for every model reached.
//!
//! # Errors
//! Cache capacity errors abort the walk and are returned; the caller flushes
//! the caches and rebuilds the frame. Malformed nodes are reported once per
//! frame and the offending subtree is skipped.

use crate::backend::RenderBackend;
use crate::cache::{ModelCache, ShadeContext};
use crate::config::{DisplayGeometry, Stepping};
use crate::display_list::{DisplayList, FrontFace, ModelInstance};
use crate::error::{CacheKind, Real3dError, Resource};
use crate::math::{self, Mat4};
use crate::memory::{word_f32, SceneMemory};
use crate::stats::{ErrorFlags, FrameError, FrameStats};
use crate::texture::{TexOffset, TextureSheets};
use crate::viewport::{ViewportNode, VIEWPORT_WORDS};
use log::trace;

/// First viewport node.
pub const ROOT_VIEWPORT: u32 = 0x80_0000;
/// `next` value ending the viewport chain.
const VIEWPORT_CHAIN_END: u32 = 0x0100_0000;

pub const MAX_STACK_DEPTH: usize = 576;
const MAX_LIST_DEPTH: usize = 2;
const MAX_VIEWPORTS: usize = 256;
/// Longest pointer list scanned.
const MAX_LIST_ENTRIES: usize = 0x1_0000;

/// Display lists of the four layers, indexed `[layer][cache]`.
pub type LayerLists = [[DisplayList; 2]; 4];

/// Mutable renderer state borrowed for one walk.
pub struct SceneTargets<'a> {
    pub caches: &'a mut [ModelCache; 2],
    pub lists: &'a mut LayerLists,
    pub sheets: &'a mut TextureSheets,
    pub backend: &'a mut dyn RenderBackend,
    pub stats: &'a mut FrameStats,
    pub errors: &'a mut ErrorFlags,
}

pub struct SceneWalker<'a, 'm> {
    memory: SceneMemory<'m>,
    stepping: Stepping,
    display: DisplayGeometry,
    t: SceneTargets<'a>,
    matrices: Vec<Mat4>,
    matrix_base: u32,
    base_z: f32,
    tex_offset: TexOffset,
    layer: usize,
    stack_depth: usize,
    list_depth: usize,
    viewports: usize,
}

impl<'a, 'm> SceneWalker<'a, 'm> {
    pub fn new(
        memory: SceneMemory<'m>,
        stepping: Stepping,
        display: DisplayGeometry,
        targets: SceneTargets<'a>,
    ) -> Self {
        Self {
            memory,
            stepping,
            display,
            t: targets,
            matrices: Vec::with_capacity(64),
            matrix_base: 0,
            base_z: -1.0,
            tex_offset: TexOffset::default(),
            layer: 0,
            stack_depth: 0,
            list_depth: 0,
            viewports: 0,
        }
    }

    /// Walk every viewport starting at [`ROOT_VIEWPORT`].
    pub fn walk(&mut self) -> Result<(), Real3dError> {
        self.render_viewport(ROOT_VIEWPORT)
    }

    fn anomaly(&mut self, kind: FrameError, address: u32, message: &str) {
        self.t
            .errors
            .report(kind, Real3dError::decode(address & 0x00FF_FFFF, message));
    }

    fn top(&self) -> Mat4 {
        self.matrices.last().copied().unwrap_or_else(math::identity)
    }

    fn multiply_top(&mut self, m: &Mat4) {
        if let Some(top) = self.matrices.last_mut() {
            *top = math::multiply(top, m);
        }
    }

    /// Matrix `n` of the current viewport's matrix table.
    fn matrix(&self, n: u32) -> Option<[f32; 12]> {
        let addr = self.matrix_base.checked_add(n * 12)?;
        let words = self.memory.culling_words(addr, 12)?;
        let mut m = [0.0; 12];
        for (dst, &w) in m.iter_mut().zip(words) {
            *dst = word_f32(w);
        }
        Some(m)
    }

    fn render_viewport(&mut self, addr: u32) -> Result<(), Real3dError> {
        self.viewports += 1;
        if self.viewports > MAX_VIEWPORTS {
            self.anomaly(FrameError::DecodeAnomaly, addr, "viewport chain too long");
            return Ok(());
        }
        let Some(words) = self.memory.culling_words(addr, VIEWPORT_WORDS) else {
            self.anomaly(FrameError::InvalidNodePointer, addr, "viewport outside culling RAM");
            return Ok(());
        };
        let mut w = [0u32; VIEWPORT_WORDS];
        w.copy_from_slice(words);

        // Zero means the scene has not been set up yet.
        if w[1] == 0 {
            return Ok(());
        }
        if w[1] != VIEWPORT_CHAIN_END {
            self.render_viewport(w[1])?;
        }

        let node = ViewportNode::decode(&w, &self.display);
        self.matrix_base = node.matrix_base;
        let Some(base) = self.matrix(0) else {
            self.anomaly(FrameError::DecodeAnomaly, addr, "coordinate system matrix missing");
            return Ok(());
        };
        let unit = |v: f32| (0.95..=1.05).contains(&(v * v));
        if !unit(base[5]) || !unit(base[6]) || !unit(base[10]) {
            trace!("Skipping viewport at 0x{:06X}: unusable coordinate system", addr);
            return Ok(());
        }
        self.base_z = base[5];
        self.layer = node.priority;
        self.tex_offset = TexOffset::default();

        // Real3D Z,X,Y into -Z view space.
        let mut conv = [0.0; 16];
        conv[math::cm(0, 1)] = 1.0;
        conv[math::cm(1, 2)] = 1.0;
        conv[math::cm(2, 0)] = -1.0;
        conv[math::cm(3, 3)] = 1.0;
        if self.stepping.uses_large_coordinates() {
            conv = math::multiply(&math::scale(1.0 / 2048.0), &conv);
        }
        self.matrices.clear();
        self.matrices.push(math::multiply(&conv, &math::from_real3d(&base)));

        for list in self.t.lists[self.layer].iter_mut() {
            if let Err(e) = list.append_viewport(&node.state) {
                self.t.errors.report(FrameError::DisplayListFull, e);
            }
        }

        self.stack_depth = 0;
        self.list_depth = 0;
        self.descend_node_ptr(node.root)
    }

    fn descend_node_ptr(&mut self, ptr: u32) -> Result<(), Real3dError> {
        let addr = ptr & 0x00FF_FFFF;
        if addr == 0 {
            return Ok(());
        }
        match ptr >> 24 {
            0x00 => self.descend_culling_node(addr),
            0x01 | 0x03 => self.draw_model(addr),
            0x04 => self.descend_pointer_list(addr),
            _ => {
                self.anomaly(FrameError::InvalidNodePointer, ptr, "unknown node pointer type");
                Ok(())
            }
        }
    }

    fn descend_culling_node(&mut self, addr: u32) -> Result<(), Real3dError> {
        if self.stack_depth > MAX_STACK_DEPTH {
            self.anomaly(FrameError::StackOverflow, addr, "culling node recursion too deep");
            return Ok(());
        }
        let o = self.stepping.culling_word_offset();
        let Some(node) = self.memory.culling_words(addr, 9 - o) else {
            self.anomaly(FrameError::InvalidNodePointer, addr, "culling node outside culling RAM");
            return Ok(());
        };

        self.stack_depth += 1;
        let saved_offset = self.tex_offset;
        if self.stepping.has_texture_offsets() {
            self.tex_offset = TexOffset::from_culling_word(node[2]).unwrap_or_default();
        }

        let top = self.top();
        self.matrices.push(top);
        if node[0] & 0x10 != 0 {
            let t = math::translation(
                word_f32(node[4 - o]),
                word_f32(node[5 - o]),
                word_f32(node[6 - o]),
            );
            self.multiply_top(&t);
        } else {
            let idx = node[3 - o] & 0xFFF;
            if idx != 0 {
                match self.matrix(idx) {
                    Some(m) => self.multiply_top(&math::from_real3d(&m)),
                    None => self.anomaly(FrameError::DecodeAnomaly, addr, "matrix outside culling RAM"),
                }
            }
        }

        let first = if node[0] & 0x08 != 0 {
            self.descend_lod(node[7 - o], node[3 - o] & 0x2000_0000 != 0)
        } else {
            self.descend_node_ptr(node[7 - o])
        };
        self.matrices.pop();
        first?;

        if node[0] & 0x07 != 0x06 {
            self.descend_node_ptr(node[8 - o])?;
        }

        self.stack_depth -= 1;
        self.tex_offset = saved_offset;
        Ok(())
    }

    /// Only the most detailed entry of a four-entry LOD table is drawn.
    fn descend_lod(&mut self, table: u32, is_culling_node: bool) -> Result<(), Real3dError> {
        let Some(entries) = self.memory.culling_words(table & 0x00FF_FFFF, 1) else {
            self.anomaly(FrameError::InvalidNodePointer, table, "LOD table outside culling RAM");
            return Ok(());
        };
        let entry = entries[0] & 0x00FF_FFFF;
        if entry == 0 {
            return Ok(());
        }
        if is_culling_node {
            self.descend_culling_node(entry)
        } else {
            self.draw_model(entry)
        }
    }

    fn descend_pointer_list(&mut self, addr: u32) -> Result<(), Real3dError> {
        if self.list_depth > MAX_LIST_DEPTH {
            return Ok(());
        }
        let Some(list) = self.memory.culling(addr) else {
            self.anomaly(FrameError::InvalidNodePointer, addr, "pointer list outside culling RAM");
            return Ok(());
        };

        // Index one past the last valid entry.
        let mut end = 0;
        loop {
            let Some(&entry) = list.get(end) else { break };
            if entry & 0x0200_0000 != 0 {
                end += 1;
                break;
            }
            if entry == 0 || entry >> 24 != 0 {
                break;
            }
            end += 1;
            if end >= MAX_LIST_ENTRIES {
                self.anomaly(FrameError::DecodeAnomaly, addr, "unterminated pointer list");
                return Ok(());
            }
        }

        self.list_depth += 1;
        for &entry in list[..end].iter().rev() {
            let node = entry & 0x00FF_FFFF;
            if entry & 0x0100_0000 == 0 && node != 0 && node != 0x80_0800 {
                if let Err(e) = self.descend_culling_node(node) {
                    self.list_depth -= 1;
                    return Err(e);
                }
            }
        }
        self.list_depth -= 1;
        Ok(())
    }

    fn draw_model(&mut self, addr: u32) -> Result<(), Real3dError> {
        let addr = addr & 0x00FF_FFFF;
        let kind = CacheKind::for_model_address(addr);
        let Some(words) = self.memory.model(addr) else {
            self.anomaly(FrameError::InvalidNodePointer, addr, "model outside memory");
            return Ok(());
        };
        let lut_idx = addr as usize;
        let texture_ram = self.memory.texture_ram;

        let cache = &mut self.t.caches[kind.index()];
        let model_idx = match cache.lookup(lut_idx, self.tex_offset.raw) {
            Some(idx) => {
                self.t.stats.cache_hits += 1;
                idx
            }
            None => {
                let ctx = ShadeContext {
                    color_table: self.memory.color_table(),
                    tex_offset: self.tex_offset,
                    layout: self.t.sheets.layout(),
                    base_z: self.base_z,
                };
                let fill = match cache.cache_model(
                    words,
                    addr,
                    lut_idx,
                    self.stepping.vertex_factor(),
                    &ctx,
                    &mut *self.t.backend,
                ) {
                    Ok(fill) => fill,
                    Err(e) if e.is_capacity() => {
                        if e == Real3dError::capacity(Resource::StagingBuffer) {
                            self.t.errors.report(FrameError::LocalVertexOverflow, &e);
                        }
                        return Err(e);
                    }
                    Err(e) => {
                        self.t.errors.report(FrameError::DecodeAnomaly, e);
                        return Ok(());
                    }
                };
                for tex in &fill.decode_now {
                    if self.t.sheets.decode_texture(texture_ram, tex, &mut *self.t.backend) {
                        self.t.stats.textures_decoded += 1;
                    }
                }
                self.t.stats.models_cached += 1;
                self.t.stats.polygons_decoded += fill.polygons;
                if let Some(model) = self.t.caches[kind.index()].model(fill.model) {
                    self.t.stats.vertices_uploaded += model.total_verts();
                }
                fill.model
            }
        };

        let cache = &self.t.caches[kind.index()];
        let Some(model) = cache.model(model_idx) else {
            return Ok(());
        };
        if kind == CacheKind::Static {
            for tex in model.tex_refs.iter() {
                if self.t.sheets.decode_texture(texture_ram, tex, &mut *self.t.backend) {
                    self.t.stats.textures_decoded += 1;
                }
            }
        }
        let model_view = self.top();
        let front_face = FrontFace::from_model_view(&model_view, self.base_z);
        let instance = ModelInstance::new(model, model_view, front_face);
        match self.t.lists[self.layer][kind.index()].append_model(instance) {
            Ok(()) => self.t.stats.display_nodes += 1,
            Err(e) => {
                self.t.errors.report(FrameError::DisplayListFull, e);
            }
        }
        Ok(())
    }
}
