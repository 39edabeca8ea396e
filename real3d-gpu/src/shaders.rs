// Shader management
use anyhow::{anyhow, Result};
use std::collections::HashMap;
use wgpu::*;

pub const VERTEX_SHADER: &str = "real3d_vertex";
pub const FRAGMENT_SHADER: &str = "real3d_fragment";

/// Per-draw uniforms shared by both stages.
const DRAW_UNIFORMS: &str = r#"
struct Draw {
    projection: mat4x4<f32>,
    model_view: mat4x4<f32>,
    // xyz direction, w intensity
    sun: vec4<f32>,
    // rgb colour, w density
    fog: vec4<f32>,
    // ambient, fog start, target height, unused
    params: vec4<f32>,
    // centre x, centre y, 1/half width, 1/half height
    spot_ellipse: vec4<f32>,
    spot_color: vec4<f32>,
    // start, end
    spot_range: vec4<f32>,
    // viewport placement on the target: scale xy, offset xy
    ndc: vec4<f32>,
}
@group(0) @binding(0) var<uniform> draw: Draw;
"#;

const VERTEX_SOURCE: &str = r#"
struct VertexInput {
    @location(0) position: vec3<f32>,
    @location(1) normal: vec3<f32>,
    @location(2) color: vec3<f32>,
    @location(3) translucence: f32,
    @location(4) light_enable: f32,
    @location(5) shininess: f32,
    @location(6) fog_intensity: f32,
    @location(7) uv: vec2<f32>,
    @location(8) sheet: vec4<f32>,
    @location(9) tex_params: vec4<f32>,
    @location(10) tex_format: f32,
    @location(11) tex_map: f32,
}

struct VertexOutput {
    @builtin(position) clip: vec4<f32>,
    @location(0) color: vec4<f32>,
    @location(1) uv: vec2<f32>,
    @location(2) @interpolate(flat) sheet: vec4<f32>,
    @location(3) @interpolate(flat) tex_params: vec4<f32>,
    @location(4) @interpolate(flat) tex_map: f32,
    @location(5) fog_factor: f32,
    @location(6) view_z: f32,
}

@vertex
fn main(input: VertexInput) -> VertexOutput {
    var out: VertexOutput;
    let view_pos = draw.model_view * vec4<f32>(input.position, 1.0);
    var clip = draw.projection * view_pos;
    clip.x = clip.x * draw.ndc.x + draw.ndc.z * clip.w;
    clip.y = clip.y * draw.ndc.y + draw.ndc.w * clip.w;
    // GL depth range to [0, 1].
    clip.z = (clip.z + clip.w) * 0.5;
    out.clip = clip;

    var intensity = 1.0;
    if input.light_enable > 0.5 {
        let n = normalize((draw.model_view * vec4<f32>(input.normal, 0.0)).xyz);
        let sun = max(dot(draw.sun.xyz, n), 0.0) * draw.sun.w;
        intensity = min(sun + draw.params.x, 1.0);
    }
    out.color = vec4<f32>(input.color * intensity, input.translucence);

    let z = -view_pos.z;
    let fog = clamp(1.0 - exp(-draw.fog.w * z) + draw.params.y, 0.0, 1.0);
    out.fog_factor = fog * input.fog_intensity;
    out.view_z = z;

    out.uv = input.uv;
    out.sheet = input.sheet;
    out.tex_params = input.tex_params;
    out.tex_map = input.tex_map;
    return out;
}
"#;

const FRAGMENT_SOURCE: &str = r#"
@group(0) @binding(1) var tex_maps: texture_2d_array<f32>;

struct FragmentInput {
    @builtin(position) frag: vec4<f32>,
    @location(0) color: vec4<f32>,
    @location(1) uv: vec2<f32>,
    @location(2) @interpolate(flat) sheet: vec4<f32>,
    @location(3) @interpolate(flat) tex_params: vec4<f32>,
    @location(4) @interpolate(flat) tex_map: f32,
    @location(5) fog_factor: f32,
    @location(6) view_z: f32,
}

fn wrap(c: f32, size: f32, mirror: f32) -> f32 {
    if mirror > 0.5 {
        let p = c - 2.0 * size * floor(c / (2.0 * size));
        return select(p, 2.0 * size - 1.0 - p, p >= size);
    }
    return c - size * floor(c / size);
}

@fragment
fn main(input: FragmentInput) -> @location(0) vec4<f32> {
    var color = input.color;
    if input.tex_params.x > 0.5 {
        let u = wrap(floor(input.uv.x), input.sheet.z, input.tex_params.z);
        let v = wrap(floor(input.uv.y), input.sheet.w, input.tex_params.w);
        let coord = vec2<i32>(i32(input.sheet.x + u), i32(input.sheet.y + v));
        let texel = textureLoad(tex_maps, coord, i32(input.tex_map), 0);
        if input.tex_params.y > 0.0 && texel.a < 0.5 {
            discard;
        }
        color = color * texel;
    }

    // Spotlight, in output pixels with a bottom-left origin.
    let p = vec2<f32>(input.frag.x, draw.params.z - input.frag.y);
    let d = (p - draw.spot_ellipse.xy) * draw.spot_ellipse.zw;
    let inside = input.view_z >= draw.spot_range.x && input.view_z <= draw.spot_range.y;
    if inside {
        let falloff = clamp(1.0 - dot(d, d), 0.0, 1.0);
        color = vec4<f32>(min(color.rgb + draw.spot_color.rgb * falloff, vec3<f32>(1.0)), color.a);
    }

    let rgb = mix(color.rgb, draw.fog.rgb, input.fog_factor);
    return vec4<f32>(rgb, color.a);
}
"#;

#[derive(Default)]
pub struct ShaderManager {
    shaders: HashMap<String, ShaderModule>,
}

impl ShaderManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compile the vertex and fragment stages used for every Real3D draw.
    pub fn with_real3d_shaders(device: &Device) -> Self {
        let mut manager = Self::new();
        manager.load_shader(device, VERTEX_SHADER, &format!("{DRAW_UNIFORMS}{VERTEX_SOURCE}"));
        manager.load_shader(device, FRAGMENT_SHADER, &format!("{DRAW_UNIFORMS}{FRAGMENT_SOURCE}"));
        manager
    }

    pub fn load_shader(&mut self, device: &Device, name: &str, source: &str) {
        let shader = device.create_shader_module(ShaderModuleDescriptor {
            label: Some(name),
            source: ShaderSource::Wgsl(source.into()),
        });
        self.shaders.insert(name.to_string(), shader);
    }

    pub fn get_shader(&self, name: &str) -> Result<&ShaderModule> {
        self.shaders
            .get(name)
            .ok_or_else(|| anyhow!("Shader {} is not loaded", name))
    }
}
