//! Content-addressed model cache.
//!
//! A model is decoded once per `(LUT index, texture offset)` key and its
//! triangles are kept in backend vertex storage until the cache is cleared.
//! Two caches exist: a static one for models in video ROM, which persists
//! across frames, and a dynamic one for models in polygon RAM, which is
//! cleared before every frame.
//!
//! # Storage Layout
//! Each model occupies one contiguous range of vertex storage: its opaque
//! records followed immediately by its alpha records.
//!
//! # Lookup
//! The LUT maps a key to the most recently cached model at that location.
//! Models sharing a location but cached under other texture offsets are
//! chained through `ModelRef::next_variant`. A LUT hit is only trusted after
//! the chain has produced an entry whose LUT index and texture offset both
//! match.

pub mod staging;
pub mod texture_refs;

pub use staging::{shade, ShadeContext, Staging};
pub use texture_refs::TextureRefs;

use crate::backend::{RenderBackend, StorageUsage};
use crate::config::CacheLimits;
use crate::decode::{Polygon, PolygonDecoder};
use crate::error::{CacheKind, Real3dError, Resource};
use crate::texture::TextureRef;
use crate::vertex::{PerState, PolyState, VertexRecord};
use log::{debug, info};
use smallvec::SmallVec;

/// Marks an unused LUT slot.
const EMPTY: u16 = u16::MAX;

/// A cached model: where its vertices live in backend storage.
#[derive(Debug, Clone)]
pub struct ModelRef {
    /// First record per state.
    pub index: PerState<u32>,
    /// Record count per state.
    pub num_verts: PerState<u32>,
    pub lut_idx: usize,
    /// Raw texture offset the model was decoded with.
    pub tex_offset: u16,
    /// Textures to decode whenever the model is drawn (static cache only).
    pub tex_refs: TextureRefs,
    next_variant: Option<usize>,
}

impl ModelRef {
    /// Another model at the same LUT index with a different texture offset.
    pub fn next_variant(&self) -> Option<usize> {
        self.next_variant
    }

    pub fn total_verts(&self) -> u32 {
        self.num_verts.opaque + self.num_verts.alpha
    }
}

/// A model being built between `begin_model` and `end_model`.
#[derive(Debug)]
pub struct PendingModel {
    start: usize,
    tex_refs: TextureRefs,
}

impl PendingModel {
    /// Record a texture for deferred decoding.
    pub fn add_texture(&mut self, tex: TextureRef) -> Result<(), Real3dError> {
        self.tex_refs.add(tex)
    }
}

/// Result of a successful [`ModelCache::cache_model`].
#[derive(Debug, Clone)]
pub struct CacheFill {
    /// Index of the new model.
    pub model: usize,
    /// Textures the caller must decode before the model is drawn.
    pub decode_now: SmallVec<[TextureRef; 4]>,
    pub polygons: u32,
}

#[derive(Debug)]
pub struct ModelCache {
    kind: CacheKind,
    staging: Staging,
    /// Records committed to backend storage.
    storage_cursor: usize,
    storage_capacity: usize,
    models: Vec<ModelRef>,
    max_models: usize,
    lut: Vec<u16>,
}

impl ModelCache {
    /// Create a cache and allocate its backend vertex storage.
    ///
    /// Allocation starts at the configured size and shrinks in steps of the
    /// local staging size. The staging size itself is tried last.
    ///
    /// # Errors
    /// `Real3dError::BackendAllocation` if even the smallest size fails.
    pub fn new(
        kind: CacheKind,
        limits: &CacheLimits,
        backend: &mut dyn RenderBackend,
    ) -> Result<Self, Real3dError> {
        let (vertices, max_models, lut_entries) = match kind {
            CacheKind::Static => (
                limits.static_vertices,
                limits.static_models,
                limits.static_lut_entries,
            ),
            CacheKind::Dynamic => (
                limits.dynamic_vertices,
                limits.dynamic_models,
                limits.dynamic_lut_entries,
            ),
        };
        let local = limits.local_vertices.max(1);
        let storage_capacity = allocate_progressively(kind, vertices, local, backend)?;
        info!(
            "Allocated {:.1} MB of {} vertex storage ({} vertices)",
            (storage_capacity * VertexRecord::SIZE) as f64 / (1024.0 * 1024.0),
            kind,
            storage_capacity
        );

        Ok(Self {
            kind,
            staging: Staging::new(local),
            storage_cursor: 0,
            storage_capacity,
            models: Vec::with_capacity(max_models),
            max_models,
            lut: vec![EMPTY; lut_entries],
        })
    }

    #[inline]
    pub fn kind(&self) -> CacheKind {
        self.kind
    }

    /// Dynamic caches decode textures at cache time.
    #[inline]
    pub fn is_dynamic(&self) -> bool {
        self.kind == CacheKind::Dynamic
    }

    /// Number of cached models.
    #[inline]
    pub fn len(&self) -> usize {
        self.models.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// Vertex storage records in use.
    #[inline]
    pub fn used(&self) -> usize {
        self.storage_cursor
    }

    /// Vertex storage records allocated.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.storage_capacity
    }

    pub fn lut_len(&self) -> usize {
        self.lut.len()
    }

    #[inline]
    pub fn model(&self, idx: usize) -> Option<&ModelRef> {
        self.models.get(idx)
    }

    /// Find the model cached at `lut_idx` under `tex_offset`.
    ///
    /// # Returns
    /// The model index, or `None` on a miss. A model cached under another
    /// texture offset at the same location is never returned.
    pub fn lookup(&self, lut_idx: usize, tex_offset: u16) -> Option<usize> {
        let slot = *self.lut.get(lut_idx)?;
        if slot == EMPTY {
            return None;
        }
        let mut next = Some(slot as usize);
        // Bounded walk: a stale slot must not loop forever.
        for _ in 0..=self.models.len() {
            let idx = next?;
            let model = self.models.get(idx)?;
            if model.lut_idx != lut_idx {
                return None;
            }
            if model.tex_offset == tex_offset {
                return Some(idx);
            }
            next = model.next_variant;
        }
        None
    }

    /// Start a new model at the current end of vertex storage.
    ///
    /// # Errors
    /// `Capacity(ModelArray)` when no model slot is left.
    pub fn begin_model(&mut self) -> Result<PendingModel, Real3dError> {
        if self.models.len() >= self.max_models {
            return Err(Real3dError::capacity(Resource::ModelArray));
        }
        self.staging.reset();
        Ok(PendingModel {
            start: self.storage_cursor,
            tex_refs: TextureRefs::new(),
        })
    }

    /// Stage one polygon of the pending model.
    pub fn insert_polygon(
        &mut self,
        pending: &PendingModel,
        poly: &Polygon,
        ctx: &ShadeContext<'_>,
    ) -> Result<(), Real3dError> {
        let template = shade(poly, ctx);
        let available = self.storage_capacity.saturating_sub(pending.start);
        self.staging
            .insert_polygon(poly, &template, ctx.base_z, available)
    }

    /// Upload the staged records and enter the model into the LUT.
    ///
    /// # Returns
    /// Index of the completed model.
    pub fn end_model(
        &mut self,
        pending: PendingModel,
        lut_idx: usize,
        tex_offset: u16,
        backend: &mut dyn RenderBackend,
    ) -> usize {
        let num_verts = PerState::new(
            self.staging.len(PolyState::Opaque) as u32,
            self.staging.len(PolyState::Alpha) as u32,
        );
        let index = PerState::new(
            pending.start as u32,
            pending.start as u32 + num_verts.opaque,
        );
        for state in PolyState::ALL {
            if num_verts[state] > 0 {
                backend.upload_vertices(
                    self.kind,
                    index[state] as usize,
                    self.staging.records(state),
                );
            }
        }
        self.storage_cursor = pending.start + self.staging.total();

        let m = self.models.len();
        let next_variant = match self.lut.get(lut_idx).copied() {
            Some(EMPTY) | None => None,
            Some(prev) => Some(prev as usize),
        };
        if let Some(slot) = self.lut.get_mut(lut_idx) {
            *slot = m as u16;
        }
        self.models.push(ModelRef {
            index,
            num_verts,
            lut_idx,
            tex_offset,
            tex_refs: pending.tex_refs,
            next_variant,
        });
        m
    }

    /// Decode a complete model and cache it.
    ///
    /// # Arguments
    /// * `words` - model data starting at the first polygon header
    /// * `address` - model address, for error reports
    /// * `lut_idx` - cache key derived from the address
    /// * `vertex_factor` - stepping-dependent position scale
    /// * `ctx` - shading inputs, including the texture offset
    ///
    /// # Errors
    /// Capacity errors mean the cache must be cleared before it is used
    /// again. Decode anomalies mean the model data is unusable. Nothing is
    /// committed on error.
    pub fn cache_model(
        &mut self,
        words: &[u32],
        address: u32,
        lut_idx: usize,
        vertex_factor: f32,
        ctx: &ShadeContext<'_>,
        backend: &mut dyn RenderBackend,
    ) -> Result<CacheFill, Real3dError> {
        if lut_idx >= self.lut.len() {
            return Err(Real3dError::decode(address, "model address outside the LUT"));
        }
        let mut pending = self.begin_model()?;
        let mut decoder = PolygonDecoder::new(words, address, vertex_factor);
        let mut decode_now: SmallVec<[TextureRef; 4]> = SmallVec::new();
        let mut polygons = 0;

        while let Some(poly) = decoder.next_polygon()? {
            if poly.header.texture_enabled() {
                let tex = poly.header.texture_ref(&ctx.tex_offset);
                let deferred = !self.is_dynamic() && pending.add_texture(tex).is_ok();
                if !deferred && !decode_now.contains(&tex) {
                    decode_now.push(tex);
                }
            }
            self.insert_polygon(&pending, &poly, ctx)?;
            polygons += 1;
        }

        let model = self.end_model(pending, lut_idx, ctx.tex_offset.raw, backend);
        Ok(CacheFill {
            model,
            decode_now,
            polygons,
        })
    }

    /// Forget every model. Only LUT slots of cached models are reset.
    pub fn clear(&mut self) {
        self.storage_cursor = 0;
        self.staging.reset();
        for model in &self.models {
            if let Some(slot) = self.lut.get_mut(model.lut_idx) {
                *slot = EMPTY;
            }
        }
        self.models.clear();
    }
}

fn allocate_progressively(
    kind: CacheKind,
    vertices: usize,
    local: usize,
    backend: &mut dyn RenderBackend,
) -> Result<usize, Real3dError> {
    let usage = StorageUsage::from(kind);
    let mut size = vertices;
    while size >= local {
        match backend.allocate_vertex_storage(kind, size, usage) {
            Ok(()) => return Ok(size),
            Err(e) => debug!("{} vertex storage of {} vertices failed: {}", kind, size, e),
        }
        if size == local {
            break;
        }
        size -= local;
    }
    if size != local && backend.allocate_vertex_storage(kind, local, usage).is_ok() {
        return Ok(local);
    }
    Err(Real3dError::BackendAllocation {
        cache: kind,
        bytes: local * VertexRecord::SIZE,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::RecordingBackend;
    use crate::config::TextureConfig;
    use crate::texture::{SheetLayout, TexOffset};

    fn limits() -> CacheLimits {
        CacheLimits {
            static_vertices: 120,
            dynamic_vertices: 60,
            local_vertices: 24,
            static_models: 4,
            dynamic_models: 4,
            static_lut_entries: 64,
            dynamic_lut_entries: 64,
            display_list_items: 16,
        }
    }

    /// One opaque single-sided quad, optionally textured.
    fn quad_model(textured: bool) -> Vec<u32> {
        let mut h6 = 0x0080_0000;
        if textured {
            h6 |= 0x0400_0000;
        }
        let mut words = vec![0x40, 0x04, 0, 0, 0, 0, h6];
        for (x, y) in [(0, 0), (0, 1), (1, 1), (1, 0)] {
            words.extend([(x << 8) as u32, (y << 8) as u32, 0, 0]);
        }
        words
    }

    fn ctx<'a>(layout: &'a SheetLayout, raw: u16) -> ShadeContext<'a> {
        ShadeContext {
            color_table: &[],
            tex_offset: TexOffset {
                x: 0,
                y: 0,
                raw,
            },
            layout,
            base_z: -1.0,
        }
    }

    #[test]
    fn progressive_allocation_shrinks_in_local_steps() {
        let mut backend = RecordingBackend::with_allocation_limit(80);
        let cache = ModelCache::new(CacheKind::Static, &limits(), &mut backend).unwrap();
        // 120 -> 96 -> 72
        assert_eq!(cache.capacity(), 72);
    }

    #[test]
    fn allocation_failure_is_fatal() {
        let mut backend = RecordingBackend::with_allocation_limit(10);
        let err = ModelCache::new(CacheKind::Dynamic, &limits(), &mut backend).unwrap_err();
        assert_eq!(
            err,
            Real3dError::BackendAllocation {
                cache: CacheKind::Dynamic,
                bytes: 24 * VertexRecord::SIZE
            }
        );
    }

    #[test]
    fn local_size_is_the_last_attempt() {
        let mut backend = RecordingBackend::with_allocation_limit(30);
        // 60 -> 36 fail, 12 is below local; local itself succeeds.
        let cache = ModelCache::new(CacheKind::Dynamic, &limits(), &mut backend).unwrap();
        assert_eq!(cache.capacity(), 24);
    }

    #[test]
    fn texture_offset_variants_are_chained() {
        let mut backend = RecordingBackend::new();
        let layout = SheetLayout::new(&TextureConfig::default());
        let mut cache = ModelCache::new(CacheKind::Static, &limits(), &mut backend).unwrap();
        let words = quad_model(false);

        let a = cache
            .cache_model(&words, 0x10_0000, 5, 1.0, &ctx(&layout, 1), &mut backend)
            .unwrap()
            .model;
        let b = cache
            .cache_model(&words, 0x10_0000, 5, 1.0, &ctx(&layout, 2), &mut backend)
            .unwrap()
            .model;
        assert_ne!(a, b);
        assert_eq!(cache.lookup(5, 1), Some(a));
        assert_eq!(cache.lookup(5, 2), Some(b));
        assert_eq!(cache.lookup(5, 3), None);
        assert_eq!(cache.model(b).unwrap().next_variant(), Some(a));

        cache.clear();
        assert_eq!(cache.lookup(5, 1), None);
        assert_eq!(cache.lookup(5, 2), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn refilling_after_clear_reproduces_the_layout() {
        let mut backend = RecordingBackend::new();
        let layout = SheetLayout::new(&TextureConfig::default());
        let mut cache = ModelCache::new(CacheKind::Dynamic, &limits(), &mut backend).unwrap();
        let words = quad_model(false);

        let cache_both = |cache: &mut ModelCache, backend: &mut RecordingBackend| {
            [(3, 0), (7, 1)]
                .map(|(key, raw)| {
                    let idx = cache
                        .cache_model(&words, 0x4000, key, 1.0, &ctx(&layout, raw), &mut *backend)
                        .unwrap()
                        .model;
                    let m = cache.model(idx).unwrap();
                    (idx, m.index, m.num_verts)
                })
        };

        let first = cache_both(&mut cache, &mut backend);
        let used = cache.used();
        let records = backend.storage(CacheKind::Dynamic)[..used].to_vec();

        cache.clear();
        assert_eq!(cache.used(), 0);
        let second = cache_both(&mut cache, &mut backend);
        assert_eq!(first, second);
        assert_eq!(cache.used(), used);
        assert_eq!(&backend.storage(CacheKind::Dynamic)[..used], &records[..]);
        assert_eq!(cache.lookup(3, 0), Some(second[0].0));
        assert_eq!(cache.lookup(7, 1), Some(second[1].0));
    }

    #[test]
    fn alpha_range_follows_opaque_range() {
        let mut backend = RecordingBackend::new();
        let layout = SheetLayout::new(&TextureConfig::default());
        let mut cache = ModelCache::new(CacheKind::Static, &limits(), &mut backend).unwrap();

        // Opaque quad followed by an alpha triangle.
        let mut words = quad_model(false);
        words[1] = 0;
        words.extend([0, 0x04, 0, 0, 0, 0, 0x1]);
        words.extend([0u32; 12]);
        let first = cache
            .cache_model(&quad_model(false), 0x10_0000, 1, 1.0, &ctx(&layout, 0), &mut backend)
            .unwrap();
        let fill = cache
            .cache_model(&words, 0x10_0010, 2, 1.0, &ctx(&layout, 0), &mut backend)
            .unwrap();
        assert_eq!(first.polygons, 1);
        assert_eq!(fill.polygons, 2);

        let m = cache.model(fill.model).unwrap();
        assert_eq!(m.num_verts, PerState::new(6, 3));
        assert_eq!(m.index.opaque, 6);
        assert_eq!(m.index.alpha, 12);
        assert_eq!(cache.used(), 15);
        let storage = backend.storage(CacheKind::Static);
        assert_eq!(storage[12].tex_params[1], -1.0);
        assert_eq!(storage[15], VertexRecord::default());
    }

    #[test]
    fn model_array_overflow_is_a_capacity_error() {
        let mut backend = RecordingBackend::new();
        let layout = SheetLayout::new(&TextureConfig::default());
        let mut cache = ModelCache::new(CacheKind::Dynamic, &limits(), &mut backend).unwrap();
        let words = quad_model(false);
        for key in 0..4 {
            cache
                .cache_model(&words, 0, key, 1.0, &ctx(&layout, 0), &mut backend)
                .unwrap();
        }
        let err = cache
            .cache_model(&words, 0, 9, 1.0, &ctx(&layout, 0), &mut backend)
            .unwrap_err();
        assert_eq!(err, Real3dError::capacity(Resource::ModelArray));
        assert_eq!(cache.len(), 4);
        assert_eq!(cache.lookup(3, 0), Some(3));
    }

    #[test]
    fn failed_model_leaves_cache_untouched() {
        let mut backend = RecordingBackend::new();
        let layout = SheetLayout::new(&TextureConfig::default());
        let mut cache = ModelCache::new(CacheKind::Dynamic, &limits(), &mut backend).unwrap();
        cache
            .cache_model(&quad_model(false), 0, 1, 1.0, &ctx(&layout, 0), &mut backend)
            .unwrap();

        // Header promises a second polygon that is not there.
        let mut truncated = quad_model(false);
        truncated[1] = 0;
        let err = cache
            .cache_model(&truncated, 0x40, 2, 1.0, &ctx(&layout, 0), &mut backend)
            .unwrap_err();
        assert!(matches!(err, Real3dError::DecodeAnomaly { .. }));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.used(), 6);
        assert_eq!(cache.lookup(2, 0), None);
    }

    #[test]
    fn dynamic_cache_decodes_textures_immediately() {
        let mut backend = RecordingBackend::new();
        let layout = SheetLayout::new(&TextureConfig::default());
        let words = quad_model(true);

        let mut dynamic = ModelCache::new(CacheKind::Dynamic, &limits(), &mut backend).unwrap();
        let fill = dynamic
            .cache_model(&words, 0, 1, 1.0, &ctx(&layout, 0), &mut backend)
            .unwrap();
        assert_eq!(fill.decode_now.len(), 1);
        assert!(dynamic.model(fill.model).unwrap().tex_refs.is_empty());

        let mut fixed = ModelCache::new(CacheKind::Static, &limits(), &mut backend).unwrap();
        let fill = fixed
            .cache_model(&words, 0x10_0000, 1, 1.0, &ctx(&layout, 0), &mut backend)
            .unwrap();
        assert!(fill.decode_now.is_empty());
        assert_eq!(fixed.model(fill.model).unwrap().tex_refs.len(), 1);
    }

    #[test]
    fn key_outside_lut_is_rejected() {
        let mut backend = RecordingBackend::new();
        let layout = SheetLayout::new(&TextureConfig::default());
        let mut cache = ModelCache::new(CacheKind::Static, &limits(), &mut backend).unwrap();
        let err = cache
            .cache_model(&quad_model(false), 0x10_0000, 64, 1.0, &ctx(&layout, 0), &mut backend)
            .unwrap_err();
        assert!(matches!(err, Real3dError::DecodeAnomaly { .. }));
        assert_eq!(cache.lookup(64, 0), None);
    }
}
