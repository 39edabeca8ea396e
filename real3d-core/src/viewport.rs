// Viewport node decoding
//
// Viewport nodes chain from culling address 0x800000. Each one carries the
// projection, lighting, fog and spotlight state for the subtree it points to.

use crate::config::{DisplayGeometry, NATIVE_HEIGHT, NATIVE_WIDTH};
use crate::math::{self, Mat4};
use crate::memory::word_f32;

/// Words read from a viewport node.
pub const VIEWPORT_WORDS: usize = 0x26;

pub const NEAR_PLANE: f32 = 0.1;
pub const FAR_PLANE: f32 = 1.0e5;

/// Spotlight colours selected by viewport word 0x20.
const SPOT_COLORS: [[f32; 3]; 8] = [
    [0.0, 0.0, 0.0], // off
    [0.0, 0.0, 1.0],
    [0.0, 1.0, 0.0],
    [0.0, 1.0, 1.0],
    [1.0, 0.0, 0.0],
    [1.0, 0.0, 1.0],
    [1.0, 1.0, 0.0],
    [1.0, 1.0, 1.0],
];

/// Render state set by a viewport node. Rectangle and spotlight are in
/// output-surface pixels with a bottom-left origin.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewportState {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
    pub projection: Mat4,
    pub sun_direction: [f32; 3],
    pub sun_intensity: f32,
    pub ambient: f32,
    /// Centre x, centre y, inverse half-width, inverse half-height.
    pub spot_ellipse: [f32; 4],
    /// Start and end of the spotlight along Z.
    pub spot_range: [f32; 2],
    pub spot_color: [f32; 3],
    pub fog_color: [f32; 3],
    pub fog_density: f32,
    pub fog_start: f32,
}

impl Default for ViewportState {
    fn default() -> Self {
        Self {
            x: 0,
            y: 0,
            width: NATIVE_WIDTH as i32,
            height: NATIVE_HEIGHT as i32,
            projection: math::identity(),
            sun_direction: [0.0; 3],
            sun_intensity: 0.0,
            ambient: 0.0,
            spot_ellipse: [0.0; 4],
            spot_range: [0.0; 2],
            spot_color: [0.0; 3],
            fog_color: [0.0; 3],
            fog_density: 0.0,
            fog_start: 0.0,
        }
    }
}

/// A decoded viewport node.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewportNode {
    /// Next viewport in the chain.
    pub next: u32,
    /// Scene graph root for this viewport.
    pub root: u32,
    /// Address of matrix 0.
    pub matrix_base: u32,
    /// Layer, 0..=3.
    pub priority: usize,
    pub state: ViewportState,
}

impl ViewportNode {
    /// Decode from at least [`VIEWPORT_WORDS`] words.
    pub fn decode(w: &[u32; VIEWPORT_WORDS], display: &DisplayGeometry) -> Self {
        let x_ratio = display.x_ratio();
        let y_ratio = display.y_ratio();
        let x_offs = display.x_offset as f32;
        let y_offs = display.y_offset as f32;

        let vp_x = ((w[0x1A] & 0xFFFF) >> 4) as f32;
        let vp_y = ((w[0x1A] >> 20) & 0xFFF) as f32;
        let vp_width = ((w[0x14] & 0xFFFF) >> 2) as f32;
        let vp_height = ((w[0x14] >> 18) & 0x3FFF) as f32;

        let top = word_f32(w[0x0E]).asin();
        let bottom = word_f32(w[0x12]).asin();
        let fov = (top + bottom).to_degrees();
        let aspect = if vp_height > 0.0 {
            vp_width / vp_height
        } else {
            1.0
        };

        let spot_color = SPOT_COLORS[((w[0x20] >> 11) & 7) as usize];
        let mut spot_start = 1.0 / word_f32(w[0x21]);
        let mut spot_extent = word_f32(w[0x1F]);
        let mut spot_ellipse = [
            ((w[0x1E] >> 3) & 0x1FFF) as f32 * x_ratio + x_offs,
            (NATIVE_HEIGHT - ((w[0x1D] >> 3) & 0x1FFF) as f32) * y_ratio + y_offs,
            NATIVE_WIDTH / (((w[0x1E] >> 16) & 0xFFFF) as f32).sqrt() * x_ratio,
            NATIVE_HEIGHT / (((w[0x1D] >> 16) & 0xFFFF) as f32).sqrt() * y_ratio,
        ];
        if !spot_start.is_finite() || !spot_extent.is_finite() {
            spot_start = 0.0;
            spot_extent = 0.0;
        }
        for v in spot_ellipse.iter_mut().filter(|v| !v.is_finite()) {
            *v = 0.0;
        }

        let mut fog_density = word_f32(w[0x23]);
        let mut fog_start = (w[0x25] & 0xFFFF) as u16 as i16 as f32 / 255.0;
        if !fog_density.is_finite() || !fog_start.is_finite() {
            fog_density = 0.0;
            fog_start = 0.0;
        }

        let state = ViewportState {
            x: (vp_x * x_ratio + x_offs) as i32,
            y: ((NATIVE_HEIGHT - (vp_y + vp_height)) * y_ratio + y_offs) as i32,
            width: (vp_width * x_ratio) as i32,
            height: (vp_height * y_ratio) as i32,
            projection: math::perspective(fov, aspect, NEAR_PLANE, FAR_PLANE),
            sun_direction: [word_f32(w[0x05]), word_f32(w[0x06]), word_f32(w[0x04])],
            sun_intensity: word_f32(w[0x07]),
            ambient: ((w[0x24] >> 8) & 0xFF) as f32 / 255.0,
            spot_ellipse,
            spot_range: [spot_start, spot_start + spot_extent],
            spot_color,
            fog_color: [
                ((w[0x22] >> 16) & 0xFF) as f32 / 255.0,
                ((w[0x22] >> 8) & 0xFF) as f32 / 255.0,
                (w[0x22] & 0xFF) as f32 / 255.0,
            ],
            fog_density,
            fog_start,
        };

        Self {
            next: w[1],
            root: w[2],
            matrix_base: w[0x16] & 0x00FF_FFFF,
            priority: ((w[0] >> 3) & 3) as usize,
            state,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_screen() -> [u32; VIEWPORT_WORDS] {
        let mut w = [0u32; VIEWPORT_WORDS];
        w[0] = 2 << 3;
        w[1] = 0x0100_0000;
        w[2] = 0x80_0100;
        w[0x0E] = (0.5f32).to_bits();
        w[0x12] = (0.5f32).to_bits();
        w[0x14] = (384 << 18) | (496 << 2);
        w[0x16] = 0x0080_0200;
        w[0x20] = 4 << 11;
        w[0x22] = 0x0040_80FF;
        w[0x23] = f32::NAN.to_bits();
        w[0x24] = 0x80 << 8;
        w[0x25] = 0xFF01; // -255
        w
    }

    #[test]
    fn decodes_chain_and_rectangle() {
        let node = ViewportNode::decode(&full_screen(), &DisplayGeometry::default());
        assert_eq!(node.priority, 2);
        assert_eq!(node.next, 0x0100_0000);
        assert_eq!(node.root, 0x80_0100);
        assert_eq!(node.matrix_base, 0x80_0200);
        let s = &node.state;
        assert_eq!((s.x, s.y, s.width, s.height), (0, 0, 496, 384));
        assert_eq!(s.spot_color, [1.0, 0.0, 0.0]);
        assert!((s.ambient - 128.0 / 255.0).abs() < 1e-6);
        assert_eq!(s.fog_color[2], 1.0);
    }

    #[test]
    fn non_finite_fog_is_disabled() {
        let node = ViewportNode::decode(&full_screen(), &DisplayGeometry::default());
        assert_eq!(node.state.fog_density, 0.0);
        assert_eq!(node.state.fog_start, 0.0);

        let mut w = full_screen();
        w[0x23] = (0.25f32).to_bits();
        let node = ViewportNode::decode(&w, &DisplayGeometry::default());
        assert_eq!(node.state.fog_density, 0.25);
        assert_eq!(node.state.fog_start, -1.0);
    }

    #[test]
    fn zero_spot_range_word_is_disabled() {
        // full_screen() leaves the spot range and ellipse size words at zero.
        let node = ViewportNode::decode(&full_screen(), &DisplayGeometry::default());
        assert_eq!(node.state.spot_range, [0.0, 0.0]);
        assert!(node.state.spot_ellipse.iter().all(|v| v.is_finite()));

        let mut w = full_screen();
        w[0x21] = (0.5f32).to_bits();
        w[0x1F] = (100.0f32).to_bits();
        let node = ViewportNode::decode(&w, &DisplayGeometry::default());
        assert_eq!(node.state.spot_range, [2.0, 102.0]);
    }

    #[test]
    fn rectangle_scales_and_flips() {
        let mut w = full_screen();
        // 100x50 at (16, 32) in native coordinates.
        w[0x14] = (50 << 18) | (100 << 2);
        w[0x1A] = (32 << 20) | (16 << 4);
        let display = DisplayGeometry {
            x_offset: 10,
            y_offset: 0,
            x_res: 992,
            y_res: 768,
            total_x_res: 1012,
            total_y_res: 768,
        };
        let s = ViewportNode::decode(&w, &display).state;
        assert_eq!(s.x, 16 * 2 + 10);
        assert_eq!(s.y, (384 - (32 + 50)) * 2);
        assert_eq!((s.width, s.height), (200, 100));
    }

    #[test]
    fn projection_uses_both_half_angles() {
        let s = ViewportNode::decode(&full_screen(), &DisplayGeometry::default()).state;
        let fov = (0.5f32.asin() * 2.0).to_degrees();
        let expected = math::perspective(fov, 496.0 / 384.0, NEAR_PLANE, FAR_PLANE);
        assert_eq!(s.projection, expected);
    }
}
