//! Rendering backend contract.
//!
//! The pipeline never talks to a graphics API directly. Everything it needs
//! goes through [`RenderBackend`]: vertex storage per cache, texture maps,
//! and a small draw command vocabulary mirroring the display lists.
//!
//! [`RecordingBackend`] implements the contract on the CPU. It keeps a copy
//! of all vertex storage and records every command, which makes it suitable
//! for tests and headless replay.

use crate::error::{BackendError, CacheKind};
use crate::math::Mat4;
use crate::vertex::{PolyState, VertexRecord};
use crate::viewport::ViewportState;
use image::RgbaImage;
use log::warn;

/// Expected update frequency of a vertex storage allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageUsage {
    /// Written once, drawn many times.
    Static,
    /// Rewritten every frame.
    Dynamic,
}

impl From<CacheKind> for StorageUsage {
    fn from(kind: CacheKind) -> Self {
        match kind {
            CacheKind::Static => StorageUsage::Static,
            CacheKind::Dynamic => StorageUsage::Dynamic,
        }
    }
}

/// Triangle winding treated as front facing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Winding {
    #[default]
    Clockwise,
    CounterClockwise,
}

pub trait RenderBackend {
    /// Reserve storage for `vertices` records for one cache. Called again
    /// with smaller sizes after a failure.
    fn allocate_vertex_storage(
        &mut self,
        cache: CacheKind,
        vertices: usize,
        usage: StorageUsage,
    ) -> Result<(), BackendError>;

    /// Copy records into a cache's storage starting at record `first`. The
    /// range always lies within the last successful allocation.
    fn upload_vertices(&mut self, cache: CacheKind, first: usize, vertices: &[VertexRecord]);

    /// Create `count` square RGBA texture maps of `side` texels.
    fn create_texture_maps(&mut self, count: u32, side: u32) -> Result<(), BackendError>;

    /// Write a decoded texture into a texture map at texel `(x, y)`.
    fn upload_texture(&mut self, map: u32, x: u32, y: u32, image: &RgbaImage);

    fn begin_frame(&mut self) {}

    fn end_frame(&mut self) {}

    fn clear_depth(&mut self);

    /// Select the storage drawn from and the blend mode (on for alpha).
    fn begin_pass(&mut self, cache: CacheKind, state: PolyState);

    fn apply_viewport(&mut self, viewport: &ViewportState);

    fn front_face(&self) -> Winding;

    fn set_front_face(&mut self, winding: Winding);

    /// Enable or disable back-face culling.
    fn set_culling(&mut self, enabled: bool);

    /// Draw `count` records starting at `first` from the current pass's storage.
    fn draw(&mut self, model_view: &Mat4, first: u32, count: u32);
}

// ── Recorded commands ───────────────────────────────────────────

/// One backend call, as captured by [`RecordingBackend`].
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    ClearDepth,
    BeginPass { cache: CacheKind, state: PolyState },
    Viewport(Box<ViewportState>),
    FrontFace(Winding),
    Culling(bool),
    Draw {
        model_view: Mat4,
        first: u32,
        count: u32,
    },
}

/// A texture written by [`RenderBackend::upload_texture`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureUpload {
    pub map: u32,
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// CPU implementation of [`RenderBackend`].
#[derive(Debug, Default)]
pub struct RecordingBackend {
    commands: Vec<Command>,
    storage: [Vec<VertexRecord>; 2],
    /// Largest allocation that succeeds, in vertices.
    allocation_limit: Option<usize>,
    texture_maps: u32,
    texture_map_side: u32,
    texture_uploads: Vec<TextureUpload>,
    front_face: Winding,
    culling: bool,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self {
            culling: true,
            ..Self::default()
        }
    }

    /// Fail every vertex storage allocation larger than `vertices`.
    pub fn with_allocation_limit(vertices: usize) -> Self {
        Self {
            allocation_limit: Some(vertices),
            ..Self::new()
        }
    }

    /// Commands recorded since the last `begin_frame`.
    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    /// Take the recorded commands, leaving the list empty.
    pub fn take_commands(&mut self) -> Vec<Command> {
        std::mem::take(&mut self.commands)
    }

    pub fn storage(&self, cache: CacheKind) -> &[VertexRecord] {
        &self.storage[cache.index()]
    }

    pub fn texture_uploads(&self) -> &[TextureUpload] {
        &self.texture_uploads
    }

    pub fn texture_maps(&self) -> (u32, u32) {
        (self.texture_maps, self.texture_map_side)
    }

    /// Number of `Draw` commands recorded.
    pub fn draw_count(&self) -> usize {
        self.commands
            .iter()
            .filter(|c| matches!(c, Command::Draw { .. }))
            .count()
    }

    pub fn culling_enabled(&self) -> bool {
        self.culling
    }
}

impl RenderBackend for RecordingBackend {
    fn allocate_vertex_storage(
        &mut self,
        cache: CacheKind,
        vertices: usize,
        _usage: StorageUsage,
    ) -> Result<(), BackendError> {
        if let Some(limit) = self.allocation_limit {
            if vertices > limit {
                return Err(BackendError::OutOfMemory {
                    bytes: vertices * VertexRecord::SIZE,
                });
            }
        }
        self.storage[cache.index()] = vec![VertexRecord::default(); vertices];
        Ok(())
    }

    fn upload_vertices(&mut self, cache: CacheKind, first: usize, vertices: &[VertexRecord]) {
        let storage = &mut self.storage[cache.index()];
        let end = first + vertices.len();
        if end > storage.len() {
            warn!(
                "Upload of {} vertices at {} overruns {} vertex storage ({})",
                vertices.len(),
                first,
                cache,
                storage.len()
            );
            return;
        }
        storage[first..end].copy_from_slice(vertices);
    }

    fn create_texture_maps(&mut self, count: u32, side: u32) -> Result<(), BackendError> {
        self.texture_maps = count;
        self.texture_map_side = side;
        Ok(())
    }

    fn upload_texture(&mut self, map: u32, x: u32, y: u32, image: &RgbaImage) {
        self.texture_uploads.push(TextureUpload {
            map,
            x,
            y,
            width: image.width(),
            height: image.height(),
        });
    }

    fn begin_frame(&mut self) {
        self.commands.clear();
    }

    fn clear_depth(&mut self) {
        self.commands.push(Command::ClearDepth);
    }

    fn begin_pass(&mut self, cache: CacheKind, state: PolyState) {
        self.commands.push(Command::BeginPass { cache, state });
    }

    fn apply_viewport(&mut self, viewport: &ViewportState) {
        self.commands.push(Command::Viewport(Box::new(viewport.clone())));
    }

    fn front_face(&self) -> Winding {
        self.front_face
    }

    fn set_front_face(&mut self, winding: Winding) {
        self.front_face = winding;
        self.commands.push(Command::FrontFace(winding));
    }

    fn set_culling(&mut self, enabled: bool) {
        self.culling = enabled;
        self.commands.push(Command::Culling(enabled));
    }

    fn draw(&mut self, model_view: &Mat4, first: u32, count: u32) {
        self.commands.push(Command::Draw {
            model_view: *model_view,
            first,
            count,
        });
    }
}
