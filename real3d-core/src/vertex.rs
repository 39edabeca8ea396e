// Staged vertex records and the opaque/alpha split.
//
// Every triangle vertex that reaches the backend is a fully resolved
// `VertexRecord`: geometry plus all per-polygon shading inputs, so a whole
// model can be drawn with a single range and no per-polygon state changes.

use bytemuck::{Pod, Zeroable};
use std::ops::{Index, IndexMut};

// ── Translucency state ──────────────────────────────────────────

/// Pass a polygon is drawn in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PolyState {
    Opaque,
    Alpha,
}

impl PolyState {
    /// Draw order within a layer.
    pub const ALL: [PolyState; 2] = [PolyState::Opaque, PolyState::Alpha];

    #[inline]
    pub fn index(self) -> usize {
        match self {
            PolyState::Opaque => 0,
            PolyState::Alpha => 1,
        }
    }
}

/// One value per translucency state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PerState<T> {
    pub opaque: T,
    pub alpha: T,
}

impl<T> PerState<T> {
    pub fn new(opaque: T, alpha: T) -> Self {
        Self { opaque, alpha }
    }
}

impl<T> Index<PolyState> for PerState<T> {
    type Output = T;

    #[inline]
    fn index(&self, state: PolyState) -> &T {
        match state {
            PolyState::Opaque => &self.opaque,
            PolyState::Alpha => &self.alpha,
        }
    }
}

impl<T> IndexMut<PolyState> for PerState<T> {
    #[inline]
    fn index_mut(&mut self, state: PolyState) -> &mut T {
        match state {
            PolyState::Opaque => &mut self.opaque,
            PolyState::Alpha => &mut self.alpha,
        }
    }
}

// ── Vertex record ───────────────────────────────────────────────

/// Backend vertex layout, 25 `f32` (100 bytes).
///
/// | Field | Offset |
/// |---|---|
/// | position | 0 |
/// | normal | 12 |
/// | color | 24 |
/// | translucence | 36 |
/// | light_enable | 40 |
/// | shininess | 44 |
/// | fog_intensity | 48 |
/// | uv | 52 |
/// | sheet | 60 |
/// | tex_params | 76 |
/// | tex_format | 92 |
/// | tex_map | 96 |
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct VertexRecord {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    /// Material RGB, 0..1.
    pub color: [f32; 3],
    /// 1.0 is fully opaque.
    pub translucence: f32,
    /// 1.0 lit, 0.0 luminous.
    pub light_enable: f32,
    /// Specular exponent; negative disables specular.
    pub shininess: f32,
    pub fog_intensity: f32,
    pub uv: [f32; 2],
    /// Texture origin and size in texels within its texture map.
    pub sheet: [f32; 4],
    /// Texture enable, contour processing (+1/-1), U mirror, V mirror.
    pub tex_params: [f32; 4],
    pub tex_format: f32,
    pub tex_map: f32,
}

impl VertexRecord {
    pub const SIZE: usize = std::mem::size_of::<VertexRecord>();
}

const _: () = assert!(VertexRecord::SIZE == 25 * 4);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_is_tightly_packed() {
        assert_eq!(VertexRecord::SIZE, 100);
        let v = VertexRecord {
            tex_map: 3.0,
            ..VertexRecord::default()
        };
        let floats: &[f32] = bytemuck::cast_slice(std::slice::from_ref(&v));
        assert_eq!(floats.len(), 25);
        assert_eq!(floats[24], 3.0);
    }

    #[test]
    fn per_state_indexing() {
        let mut counts = PerState::new(1u32, 2u32);
        counts[PolyState::Alpha] += 5;
        assert_eq!(counts[PolyState::Opaque], 1);
        assert_eq!(counts.alpha, 7);
    }
}
