// Real3D polygon stream decoder
//
// A model is a chain of polygons. Each polygon is a 7-word header followed
// by 4 words for every vertex it does not inherit from the previous polygon.
// The chain ends at a header whose word 6 is zero, or after the polygon
// flagged as last.

use crate::error::Real3dError;
use crate::math::Vec3;
use crate::texture::{TexOffset, TextureRef};
use crate::vertex::PolyState;

pub const HEADER_WORDS: usize = 7;
pub const VERTEX_WORDS: usize = 4;

/// Scale of the 1.22 fixed-point polygon normal.
const NORMAL_SCALE: f32 = 1.0 / 4_194_304.0;

/// Normals shorter than this are left unnormalized.
const MIN_NORMAL_LENGTH: f32 = 1.0e-6;

// ── Polygon header ──────────────────────────────────────────────

/// The seven header words of a polygon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PolygonHeader(pub [u32; HEADER_WORDS]);

impl PolygonHeader {
    #[inline]
    pub fn is_terminator(&self) -> bool {
        self.0[6] == 0
    }

    #[inline]
    pub fn is_last(&self) -> bool {
        self.0[1] & 0x04 != 0
    }

    #[inline]
    pub fn num_verts(&self) -> usize {
        if self.0[0] & 0x40 != 0 {
            4
        } else {
            3
        }
    }

    /// Bit `i` set: vertex slot `i` of the previous polygon is reused.
    #[inline]
    pub fn reuse_mask(&self) -> u32 {
        self.0[0] & 0x0F
    }

    pub fn normal(&self) -> Vec3 {
        [
            ((self.0[1] as i32) >> 8) as f32 * NORMAL_SCALE,
            ((self.0[2] as i32) >> 8) as f32 * NORMAL_SCALE,
            ((self.0[3] as i32) >> 8) as f32 * NORMAL_SCALE,
        ]
    }

    #[inline]
    pub fn uv_scale(&self) -> f32 {
        if self.0[1] & 0x40 != 0 {
            1.0
        } else {
            1.0 / 8.0
        }
    }

    #[inline]
    pub fn double_sided(&self) -> bool {
        self.0[1] & 0x10 != 0
    }

    #[inline]
    pub fn texture_enabled(&self) -> bool {
        self.0[6] & 0x0400_0000 != 0
    }

    #[inline]
    pub fn texture_format(&self) -> u8 {
        ((self.0[6] >> 7) & 7) as u8
    }

    #[inline]
    pub fn texture_width(&self) -> u32 {
        32 << ((self.0[3] >> 3) & 7)
    }

    #[inline]
    pub fn texture_height(&self) -> u32 {
        32 << (self.0[3] & 7)
    }

    /// Texture base in texture RAM, with the instance offset applied.
    pub fn texture_base(&self, offset: &TexOffset) -> (u32, u32) {
        let h = &self.0;
        let page = if h[4] & 0x40 != 0 { 1024 } else { 0 };
        let x = 32 * (((h[4] & 0x1F) << 1) | ((h[5] >> 7) & 1));
        let y = 32 * (h[5] & 0x1F) + page;
        ((x + offset.x) & 2047, (y + offset.y) & 2047)
    }

    pub fn texture_ref(&self, offset: &TexOffset) -> TextureRef {
        let (x, y) = self.texture_base(offset);
        TextureRef {
            format: self.texture_format(),
            x: x as u16,
            y: y as u16,
            width: self.texture_width() as u16,
            height: self.texture_height() as u16,
        }
    }

    /// Opaque/alpha classification. Formats 1 and 3 carry their own alpha
    /// bit which replaces the generic translucency test.
    pub fn state(&self) -> PolyState {
        let h6 = self.0[6];
        let alpha = match self.texture_format() {
            1 => h6 & 0x02 != 0,
            3 => h6 & 0x04 != 0,
            4 | 7 => true,
            _ => h6 & 0x0080_0000 == 0,
        };
        if alpha {
            PolyState::Alpha
        } else {
            PolyState::Opaque
        }
    }

    /// Near-transparent texels are discarded instead of blended.
    pub fn contour(&self) -> bool {
        let h6 = self.0[6];
        h6 & 0x8000_0000 != 0
            || match self.texture_format() {
                7 => true,
                1 => h6 & 0x02 != 0,
                3 => h6 & 0x04 != 0,
                _ => false,
            }
    }

    #[inline]
    pub fn light_enabled(&self) -> bool {
        self.0[6] & 0x0001_0000 == 0
    }

    /// Polygon colour is multiplied by texels.
    #[inline]
    pub fn modulate(&self) -> bool {
        self.0[3] & 0x80 != 0
    }

    /// `None` when the colour is given directly in word 4.
    #[inline]
    pub fn color_index(&self) -> Option<usize> {
        if self.0[1] & 0x02 == 0 {
            Some(((self.0[4] >> 20) & 0x7FF) as usize)
        } else {
            None
        }
    }

    #[inline]
    pub fn direct_color(&self) -> [u8; 3] {
        let h4 = self.0[4];
        [(h4 >> 24) as u8, (h4 >> 16) as u8, (h4 >> 8) as u8]
    }

    /// Specular exponent, or `None` when specular lighting is off.
    pub fn shininess(&self) -> Option<u32> {
        let s = (self.0[0] >> 26) & 0x3F;
        if self.0[0] & 0x80 == 0 || s == 0 {
            None
        } else {
            Some(s)
        }
    }

    pub fn translucence(&self) -> f32 {
        if self.0[6] & 0x0080_0000 != 0 {
            1.0
        } else {
            ((self.0[6] >> 18) & 0x1F) as f32 / 31.0
        }
    }

    pub fn fog_intensity(&self) -> f32 {
        if self.light_enabled() {
            1.0
        } else {
            ((self.0[6] >> 11) & 0x1F) as f32 / 31.0
        }
    }

    #[inline]
    pub fn u_mirror(&self) -> bool {
        self.0[2] & 0x02 != 0
    }

    #[inline]
    pub fn v_mirror(&self) -> bool {
        self.0[2] & 0x01 != 0
    }
}

// ── Decoded polygon ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Vertex {
    pub position: Vec3,
    pub normal: Vec3,
    pub uv: [f32; 2],
}

#[derive(Debug, Clone, PartialEq)]
pub struct Polygon {
    pub header: PolygonHeader,
    /// Only the first `num_verts` slots belong to this polygon.
    pub verts: [Vertex; 4],
    pub num_verts: usize,
    pub normal: Vec3,
    pub state: PolyState,
}

impl Polygon {
    pub fn vertices(&self) -> &[Vertex] {
        &self.verts[..self.num_verts]
    }
}

// ── Decoder ─────────────────────────────────────────────────────

/// Decodes one model's polygon chain, one polygon per call.
pub struct PolygonDecoder<'a> {
    words: &'a [u32],
    /// Address of `words[0]`, for error reports.
    address: u32,
    cursor: usize,
    prev: [Vertex; 4],
    vertex_factor: f32,
    done: bool,
}

impl<'a> PolygonDecoder<'a> {
    pub fn new(words: &'a [u32], address: u32, vertex_factor: f32) -> Self {
        Self {
            words,
            address,
            cursor: 0,
            prev: [Vertex::default(); 4],
            vertex_factor,
            done: false,
        }
    }

    /// Words consumed so far.
    pub fn consumed(&self) -> usize {
        self.cursor
    }

    fn read(&self, len: usize, what: &str) -> Result<&'a [u32], Real3dError> {
        self.words
            .get(self.cursor..self.cursor + len)
            .ok_or_else(|| {
                Real3dError::decode(
                    self.address.wrapping_add(self.cursor as u32),
                    format!("{} runs past end of memory", what),
                )
            })
    }

    /// Decode the next polygon. `Ok(None)` once the chain has ended.
    pub fn next_polygon(&mut self) -> Result<Option<Polygon>, Real3dError> {
        if self.done {
            return Ok(None);
        }

        let mut header = [0u32; HEADER_WORDS];
        header.copy_from_slice(self.read(HEADER_WORDS, "polygon header")?);
        self.cursor += HEADER_WORDS;
        let header = PolygonHeader(header);
        if header.is_terminator() {
            self.done = true;
            return Ok(None);
        }
        self.done = header.is_last();

        let num_verts = header.num_verts();
        let normal = header.normal();
        let uv_scale = header.uv_scale();

        // Inherited vertices fill the leading slots in bit order.
        let mut verts = [Vertex::default(); 4];
        let mut j = 0;
        for i in 0..4 {
            if header.reuse_mask() & (1 << i) != 0 {
                verts[j] = self.prev[i];
                j += 1;
            }
        }

        while j < num_verts {
            let w = self.read(VERTEX_WORDS, "vertex")?;
            self.cursor += VERTEX_WORDS;
            verts[j] = self.decode_vertex([w[0], w[1], w[2], w[3]], &normal, uv_scale);
            j += 1;
        }

        self.prev = verts;

        Ok(Some(Polygon {
            state: header.state(),
            header,
            verts,
            num_verts,
            normal,
        }))
    }

    fn decode_vertex(&self, w: [u32; 4], poly_normal: &Vec3, uv_scale: f32) -> Vertex {
        let position = [
            ((w[0] as i32) >> 8) as f32 * self.vertex_factor,
            ((w[1] as i32) >> 8) as f32 * self.vertex_factor,
            ((w[2] as i32) >> 8) as f32 * self.vertex_factor,
        ];
        // Low byte of each coordinate is a signed offset from the polygon normal.
        let mut normal = [
            poly_normal[0] + (w[0] & 0xFF) as u8 as i8 as f32,
            poly_normal[1] + (w[1] & 0xFF) as u8 as i8 as f32,
            poly_normal[2] + (w[2] & 0xFF) as u8 as i8 as f32,
        ];
        let len = (normal[0] * normal[0] + normal[1] * normal[1] + normal[2] * normal[2]).sqrt();
        if len > MIN_NORMAL_LENGTH {
            normal.iter_mut().for_each(|n| *n /= len);
        }
        let uv = [
            (w[3] >> 16) as u16 as f32 * uv_scale,
            (w[3] & 0xFFFF) as u16 as f32 * uv_scale,
        ];
        Vertex {
            position,
            normal,
            uv,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const OPAQUE: u32 = 0x0080_0000;

    fn header(h0: u32, h1: u32, h6: u32) -> [u32; 7] {
        [h0, h1, 0, 0, 0, 0, h6]
    }

    fn vertex(x: i32, y: i32, z: i32) -> [u32; 4] {
        [(x << 8) as u32, (y << 8) as u32, (z << 8) as u32, 0]
    }

    #[test]
    fn triangle_positions_and_scale() {
        let mut words = header(0, 0x04, OPAQUE).to_vec();
        words.extend(vertex(128, 0, 0));
        words.extend(vertex(0, 256, 0));
        words.extend(vertex(0, 0, -128));
        let mut dec = PolygonDecoder::new(&words, 0x1000, 1.0 / 128.0);
        let poly = dec.next_polygon().unwrap().expect("polygon");
        assert_eq!(poly.num_verts, 3);
        assert_eq!(poly.verts[0].position, [1.0, 0.0, 0.0]);
        assert_eq!(poly.verts[1].position, [0.0, 2.0, 0.0]);
        assert_eq!(poly.verts[2].position, [0.0, 0.0, -1.0]);
        assert_eq!(poly.state, PolyState::Opaque);
        assert_eq!(dec.consumed(), 7 + 12);
        assert!(dec.next_polygon().unwrap().is_none());
    }

    #[test]
    fn terminator_ends_chain() {
        let words = [0u32; 7];
        let mut dec = PolygonDecoder::new(&words, 0, 1.0);
        assert!(dec.next_polygon().unwrap().is_none());
        assert_eq!(dec.consumed(), 7);
    }

    #[test]
    fn reused_vertices_consume_no_words() {
        for mask in [0b0000u32, 0b0001, 0b0011, 0b0111, 0b1010] {
            let mut words = header(0x40, 0, OPAQUE).to_vec();
            for i in 0..4 {
                words.extend(vertex(i, i, i));
            }
            words.extend(header(0x40 | mask, 0x04, OPAQUE));
            let reused = mask.count_ones() as usize;
            for i in 0..(4 - reused) as i32 {
                words.extend(vertex(10 + i, 0, 0));
            }
            let mut dec = PolygonDecoder::new(&words, 0, 1.0);
            let first = dec.next_polygon().unwrap().unwrap();
            let before = dec.consumed();
            let second = dec.next_polygon().unwrap().unwrap();
            assert_eq!(dec.consumed() - before, 7 + (4 - reused) * 4, "mask {:04b}", mask);

            // Inherited vertices occupy the leading slots in bit order.
            let inherited: Vec<usize> = (0..4usize).filter(|&i| mask & (1 << i) != 0).collect();
            for (slot, &i) in inherited.iter().enumerate() {
                assert_eq!(second.verts[slot].position, first.verts[i].position);
            }
        }
    }

    #[test]
    fn vertex_normals_are_unit_length() {
        // Polygon normal +Y (1.22 fixed point), vertex offsets vary.
        let mut h = header(0, 0, OPAQUE);
        h[2] = (0x40_0000u32) << 8;
        let mut words = h.to_vec();
        words.extend([0x0000_0003, 0x0000_00FE, 0x0000_0001, 0]);
        words.extend([0x0000_0000, 0x0000_0000, 0x0000_0000, 0]);
        words.extend([0x0000_007F, 0x0000_0080, 0x0000_0000, 0]);
        let mut dec = PolygonDecoder::new(&words, 0, 1.0);
        let poly = dec.next_polygon().unwrap().unwrap();
        assert!((poly.normal[1] - 1.0).abs() < 1e-6);
        for v in poly.vertices() {
            let len = v.normal.iter().map(|n| n * n).sum::<f32>().sqrt();
            assert!((len - 1.0).abs() < 1e-5, "{:?}", v.normal);
        }
    }

    #[test]
    fn degenerate_normal_does_not_produce_nan() {
        let mut words = header(0, 0, OPAQUE).to_vec();
        for _ in 0..3 {
            words.extend([0u32; 4]);
        }
        let mut dec = PolygonDecoder::new(&words, 0, 1.0);
        let poly = dec.next_polygon().unwrap().unwrap();
        for v in poly.vertices() {
            assert!(v.normal.iter().all(|n| n.is_finite()));
            assert_eq!(v.normal, [0.0, 0.0, 0.0]);
        }
    }

    #[test]
    fn uv_scale_flag() {
        let mut words = header(0, 0x40, OPAQUE).to_vec();
        words.extend([0, 0, 0, 0x0010_0008]);
        words.extend([0u32; 8]);
        let poly = PolygonDecoder::new(&words, 0, 1.0).next_polygon().unwrap().unwrap();
        assert_eq!(poly.verts[0].uv, [16.0, 8.0]);

        words[1] = 0;
        let poly = PolygonDecoder::new(&words, 0, 1.0).next_polygon().unwrap().unwrap();
        assert_eq!(poly.verts[0].uv, [2.0, 1.0]);
    }

    #[test]
    fn alpha_classification() {
        let with = |h6: u32| PolygonHeader(header(0, 0, h6)).state();
        assert_eq!(with(OPAQUE), PolyState::Opaque);
        assert_eq!(with(1), PolyState::Alpha);
        assert_eq!(with(OPAQUE | (7 << 7)), PolyState::Alpha);
        assert_eq!(with(OPAQUE | (4 << 7)), PolyState::Alpha);
        // Format 1 and 3 ignore the generic bit.
        assert_eq!(with(1 << 7), PolyState::Opaque);
        assert_eq!(with(OPAQUE | (1 << 7) | 2), PolyState::Alpha);
        assert_eq!(with((3 << 7) | 2), PolyState::Opaque);
        assert_eq!(with(OPAQUE | (3 << 7) | 4), PolyState::Alpha);
    }

    #[test]
    fn texture_reference_applies_offset() {
        let mut h = header(0, 0, OPAQUE | 0x0400_0000 | (2 << 7));
        h[3] = (1 << 3) | 2; // 64 x 128
        h[4] = 0x40 | 0x03; // page 1, x bits
        h[5] = 0x80 | 0x05;
        let hdr = PolygonHeader(h);
        let offset = TexOffset {
            x: 2016,
            y: 0,
            raw: 1,
        };
        let tex = hdr.texture_ref(&offset);
        assert_eq!((tex.width, tex.height), (64, 128));
        assert_eq!(tex.x, ((32 * 7 + 2016) & 2047) as u16);
        assert_eq!(tex.y, 32 * 5 + 1024);
        assert_eq!(tex.format, 2);
    }

    #[test]
    fn truncated_stream_is_an_anomaly() {
        let mut words = header(0, 0, OPAQUE).to_vec();
        words.extend(vertex(1, 1, 1));
        let err = PolygonDecoder::new(&words, 0x100, 1.0).next_polygon().unwrap_err();
        assert!(matches!(err, Real3dError::DecodeAnomaly { address: 0x10B, .. }));
    }
}
