/// Per-model vertex staging.
///
/// Decoded polygons are triangulated into fully shaded `VertexRecord`s and
/// appended to one buffer per translucency state. The buffers only ever hold
/// one model; `ModelCache::end_model` copies them into backend storage.
use crate::decode::Polygon;
use crate::error::{Real3dError, Resource};
use crate::math::{cross, dot, sub};
use crate::texture::{SheetLayout, TexOffset};
use crate::vertex::{PerState, PolyState, VertexRecord};

/// Everything outside the polygon words that shading depends on.
#[derive(Debug, Clone, Copy)]
pub struct ShadeContext<'a> {
    /// Material colour table (0x00RRGGBB).
    pub color_table: &'a [u32],
    pub tex_offset: TexOffset,
    pub layout: &'a SheetLayout,
    /// Element 5 of the coordinate-system matrix. Its sign fixes which way
    /// the Z axis points for the winding test.
    pub base_z: f32,
}

/// Build the shading part of a record; geometry is filled per vertex.
pub fn shade(poly: &Polygon, ctx: &ShadeContext<'_>) -> VertexRecord {
    let h = &poly.header;

    let mut color = match h.color_index() {
        Some(idx) => {
            let c = ctx.color_table.get(idx).copied().unwrap_or(0);
            [(c >> 16) & 0xFF, (c >> 8) & 0xFF, c & 0xFF].map(|v| v as f32 / 255.0)
        }
        None => h.direct_color().map(|v| v as f32 / 255.0),
    };
    let texture = h.texture_enabled();
    if texture && !h.modulate() {
        color = [1.0; 3];
    }

    let format = h.texture_format();
    let placement = ctx.layout.placement(format);
    let (base_x, base_y) = h.texture_base(&ctx.tex_offset);
    let flag = |b: bool| if b { 1.0 } else { 0.0 };

    VertexRecord {
        color,
        translucence: h.translucence(),
        light_enable: flag(h.light_enabled()),
        shininess: h.shininess().map_or(-1.0, |s| s as f32),
        fog_intensity: h.fog_intensity(),
        sheet: [
            (placement.x_offset + base_x) as f32,
            (placement.y_offset + base_y) as f32,
            h.texture_width() as f32,
            h.texture_height() as f32,
        ],
        tex_params: [
            flag(texture),
            if h.contour() { 1.0 } else { -1.0 },
            flag(h.u_mirror()),
            flag(h.v_mirror()),
        ],
        tex_format: format as f32,
        tex_map: placement.map as f32,
        ..VertexRecord::default()
    }
}

/// Records emitted for a polygon.
#[inline]
pub fn records_needed(poly: &Polygon) -> usize {
    let per_side = if poly.num_verts == 4 { 6 } else { 3 };
    if poly.header.double_sided() {
        per_side * 2
    } else {
        per_side
    }
}

#[derive(Debug)]
pub struct Staging {
    buffers: PerState<Vec<VertexRecord>>,
    capacity: usize,
}

impl Staging {
    /// `capacity` records per translucency state.
    pub fn new(capacity: usize) -> Self {
        Self {
            buffers: PerState::new(Vec::with_capacity(capacity), Vec::with_capacity(capacity)),
            capacity,
        }
    }

    pub fn reset(&mut self) {
        self.buffers.opaque.clear();
        self.buffers.alpha.clear();
    }

    #[inline]
    pub fn len(&self, state: PolyState) -> usize {
        self.buffers[state].len()
    }

    /// Records staged in both states.
    #[inline]
    pub fn total(&self) -> usize {
        self.buffers.opaque.len() + self.buffers.alpha.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }

    pub fn records(&self, state: PolyState) -> &[VertexRecord] {
        &self.buffers[state]
    }

    /// Triangulate and stage a polygon.
    ///
    /// `storage_available` is the backend storage left for this model. Fails
    /// without staging anything if the polygon does not fit either limit.
    pub fn insert_polygon(
        &mut self,
        poly: &Polygon,
        template: &VertexRecord,
        base_z: f32,
        storage_available: usize,
    ) -> Result<(), Real3dError> {
        let needed = records_needed(poly);
        if self.len(poly.state) + needed > self.capacity {
            return Err(Real3dError::capacity(Resource::StagingBuffer));
        }
        if self.total() + needed > storage_available {
            return Err(Real3dError::capacity(Resource::VertexStorage));
        }

        // The stored normal is authoritative for facing; reverse the emission
        // order when the geometric winding disagrees with it.
        let v = &poly.verts;
        let e1 = sub(&v[0].position, &v[1].position);
        let e2 = sub(&v[2].position, &v[1].position);
        let n = cross(&e1, &e2);
        let z_flip = -base_z;
        let clockwise = z_flip * dot(&n, &poly.normal) >= 0.0;

        let (front, back) = if clockwise {
            ([0, 1, 2], [2, 1, 0])
        } else {
            ([2, 1, 0], [0, 1, 2])
        };
        let (quad_front, quad_back) = if clockwise {
            ([0, 2, 3], [0, 3, 2])
        } else {
            ([0, 3, 2], [0, 2, 3])
        };

        let double_sided = poly.header.double_sided();
        self.emit(poly, template, front, 1.0);
        if double_sided {
            self.emit(poly, template, back, -1.0);
        }
        if poly.num_verts == 4 {
            self.emit(poly, template, quad_front, 1.0);
            if double_sided {
                self.emit(poly, template, quad_back, -1.0);
            }
        }
        Ok(())
    }

    fn emit(&mut self, poly: &Polygon, template: &VertexRecord, order: [usize; 3], flip: f32) {
        let out = &mut self.buffers[poly.state];
        for i in order {
            let v = &poly.verts[i];
            out.push(VertexRecord {
                position: v.position,
                normal: v.normal.map(|n| n * flip),
                uv: v.uv,
                ..*template
            });
        }
    }
}
