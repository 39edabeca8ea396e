//! Headless wgpu backend.
//!
//! Commands issued during a frame are recorded and replayed at
//! `end_frame`: per-draw uniforms are packed into one buffer at a
//! 256-byte stride, every pipeline the frame needs is built, and each
//! depth clear starts a new render pass over the same colour target.

use crate::pipeline::{PipelineCache, PipelineKey, COLOR_FORMAT, DEPTH_FORMAT};
use crate::shaders::{ShaderManager, FRAGMENT_SHADER, VERTEX_SHADER};
use anyhow::{anyhow, Context, Result};
use bytemuck::{Pod, Zeroable};
use image::RgbaImage;
use log::{debug, info, warn};
use real3d_core::backend::{Command, RenderBackend, StorageUsage, Winding};
use real3d_core::error::{BackendError, CacheKind};
use real3d_core::math::Mat4;
use real3d_core::vertex::{PolyState, VertexRecord};
use real3d_core::viewport::ViewportState;
use std::num::NonZeroU64;
use wgpu::*;

/// Dynamic uniform offsets must be multiples of this.
const UNIFORM_STRIDE: u64 = 256;

/// Uniforms for one draw. Layout matches `Draw` in the shaders.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct DrawUniforms {
    projection: [f32; 16],
    model_view: [f32; 16],
    sun: [f32; 4],
    fog: [f32; 4],
    params: [f32; 4],
    spot_ellipse: [f32; 4],
    spot_color: [f32; 4],
    spot_range: [f32; 4],
    ndc: [f32; 4],
}

const _: () = assert!(std::mem::size_of::<DrawUniforms>() as u64 <= UNIFORM_STRIDE);

impl DrawUniforms {
    fn new(viewport: &ViewportState, model_view: &Mat4, width: u32, height: u32) -> Self {
        let v = viewport;
        let [sx, sy, sz] = v.sun_direction;
        let [fr, fg, fb] = v.fog_color;
        let [cr, cg, cb] = v.spot_color;
        Self {
            projection: v.projection,
            model_view: *model_view,
            sun: [sx, sy, sz, v.sun_intensity],
            fog: [fr, fg, fb, v.fog_density],
            params: [v.ambient, v.fog_start, height as f32, 0.0],
            spot_ellipse: v.spot_ellipse,
            spot_color: [cr, cg, cb, 0.0],
            spot_range: [v.spot_range[0], v.spot_range[1], 0.0, 0.0],
            ndc: map_viewport(v, width, height).ndc,
        }
    }
}

struct TextureMaps {
    texture: Texture,
    view: TextureView,
    count: u32,
    side: u32,
}

pub struct WgpuBackend {
    device: Device,
    queue: Queue,
    width: u32,
    height: u32,
    color: Texture,
    color_view: TextureView,
    _depth: Texture,
    depth_view: TextureView,
    storage: [Option<Buffer>; 2],
    storage_len: [usize; 2],
    texture_maps: Option<TextureMaps>,
    uniforms: Buffer,
    uniform_capacity: u64,
    bind_group: Option<BindGroup>,
    shaders: ShaderManager,
    pipelines: PipelineCache,
    commands: Vec<Command>,
    front_face: Winding,
    culling: bool,
}

impl WgpuBackend {
    /// Create a headless device rendering into a `width` x `height` target.
    pub fn new(width: u32, height: u32) -> Result<Self> {
        let instance = Instance::new(InstanceDescriptor::default());
        let adapter = pollster::block_on(instance.request_adapter(&RequestAdapterOptions {
            power_preference: PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .ok_or_else(|| anyhow!("Failed to find suitable GPU adapter"))?;
        info!("Using GPU adapter: {}", adapter.get_info().name);

        let (device, queue) = pollster::block_on(adapter.request_device(
            &DeviceDescriptor {
                label: Some("Real3D Device"),
                required_features: Features::empty(),
                required_limits: adapter.limits(),
            },
            None,
        ))
        .context("Failed to create GPU device")?;

        let (color, color_view) = create_target(&device, width, height, COLOR_FORMAT, "Real3D Color");
        let (depth, depth_view) = create_target(&device, width, height, DEPTH_FORMAT, "Real3D Depth");
        let shaders = ShaderManager::with_real3d_shaders(&device);
        let pipelines = PipelineCache::new(&device, std::mem::size_of::<DrawUniforms>() as u64);
        let uniform_capacity = 64;
        let uniforms = create_uniform_buffer(&device, uniform_capacity);

        Ok(Self {
            device,
            queue,
            width,
            height,
            color,
            color_view,
            _depth: depth,
            depth_view,
            storage: [None, None],
            storage_len: [0; 2],
            texture_maps: None,
            uniforms,
            uniform_capacity,
            bind_group: None,
            shaders,
            pipelines,
            commands: Vec::new(),
            front_face: Winding::Clockwise,
            culling: true,
        })
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Copy the colour target back to the CPU.
    pub fn read_frame(&self) -> Result<RgbaImage> {
        let row = self.width as u64 * 4;
        let padded = row.div_ceil(COPY_BYTES_PER_ROW_ALIGNMENT as u64) * COPY_BYTES_PER_ROW_ALIGNMENT as u64;
        let buffer = self.device.create_buffer(&BufferDescriptor {
            label: Some("Real3D Readback"),
            size: padded * self.height as u64,
            usage: BufferUsages::COPY_DST | BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let mut encoder = self
            .device
            .create_command_encoder(&CommandEncoderDescriptor { label: Some("Real3D Readback") });
        encoder.copy_texture_to_buffer(
            ImageCopyTexture {
                texture: &self.color,
                mip_level: 0,
                origin: Origin3d::ZERO,
                aspect: TextureAspect::All,
            },
            ImageCopyBuffer {
                buffer: &buffer,
                layout: ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(padded as u32),
                    rows_per_image: Some(self.height),
                },
            },
            Extent3d {
                width: self.width,
                height: self.height,
                depth_or_array_layers: 1,
            },
        );
        self.queue.submit(Some(encoder.finish()));

        let slice = buffer.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        let _ = self.device.poll(Maintain::Wait);
        rx.recv()
            .context("Readback callback was dropped")?
            .context("Failed to map readback buffer")?;

        let data = slice.get_mapped_range();
        let mut pixels = Vec::with_capacity((row * self.height as u64) as usize);
        for chunk in data.chunks(padded as usize) {
            pixels.extend_from_slice(&chunk[..row as usize]);
        }
        drop(data);
        buffer.unmap();

        RgbaImage::from_raw(self.width, self.height, pixels)
            .ok_or_else(|| anyhow!("Readback size mismatch"))
    }

    fn rebuild_bind_group(&mut self) {
        let Some(maps) = &self.texture_maps else {
            self.bind_group = None;
            return;
        };
        self.bind_group = Some(self.device.create_bind_group(&BindGroupDescriptor {
            label: Some("Real3D Bind Group"),
            layout: self.pipelines.bind_group_layout(),
            entries: &[
                BindGroupEntry {
                    binding: 0,
                    resource: BindingResource::Buffer(BufferBinding {
                        buffer: &self.uniforms,
                        offset: 0,
                        size: NonZeroU64::new(std::mem::size_of::<DrawUniforms>() as u64),
                    }),
                },
                BindGroupEntry {
                    binding: 1,
                    resource: BindingResource::TextureView(&maps.view),
                },
            ],
        }));
    }

    /// Pack the uniforms of every draw in the recorded frame.
    fn frame_uniforms(&self) -> Vec<u8> {
        let mut viewport = ViewportState::default();
        let mut bytes = Vec::new();
        for command in &self.commands {
            match command {
                Command::Viewport(v) => viewport = (**v).clone(),
                Command::Draw { model_view, .. } => {
                    let u = DrawUniforms::new(&viewport, model_view, self.width, self.height);
                    let start = bytes.len();
                    bytes.extend_from_slice(bytemuck::bytes_of(&u));
                    bytes.resize(start + UNIFORM_STRIDE as usize, 0);
                }
                _ => {}
            }
        }
        bytes
    }

    /// Build every pipeline the recorded frame uses.
    fn prepare_pipelines(&mut self) -> Result<()> {
        let vs = self.shaders.get_shader(VERTEX_SHADER)?;
        let fs = self.shaders.get_shader(FRAGMENT_SHADER)?;
        let mut key = PipelineKey {
            front_face: Winding::Clockwise,
            culling: true,
            blend: false,
        };
        for command in &self.commands {
            match command {
                Command::BeginPass { state, .. } => key.blend = *state == PolyState::Alpha,
                Command::FrontFace(w) => key.front_face = *w,
                Command::Culling(c) => key.culling = *c,
                Command::Draw { .. } => {
                    self.pipelines.get_or_create(&self.device, key, vs, fs);
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn replay(&mut self) -> Result<()> {
        let uniforms = self.frame_uniforms();
        let draws = uniforms.len() as u64 / UNIFORM_STRIDE;
        if draws > self.uniform_capacity {
            self.uniform_capacity = draws.next_power_of_two();
            debug!("Growing uniform buffer to {} draws", self.uniform_capacity);
            self.uniforms = create_uniform_buffer(&self.device, self.uniform_capacity);
            self.rebuild_bind_group();
        }
        if !uniforms.is_empty() {
            self.queue.write_buffer(&self.uniforms, 0, &uniforms);
        }
        self.prepare_pipelines()?;

        let mut encoder = self
            .device
            .create_command_encoder(&CommandEncoderDescriptor { label: Some("Real3D Frame") });

        // Each depth clear starts a new pass; the first one also clears colour.
        let mut draw_index = 0u64;
        let mut scissor = Some((0, 0, self.width, self.height));
        let mut key = PipelineKey {
            front_face: Winding::Clockwise,
            culling: true,
            blend: false,
        };
        for (n, segment) in self.commands.split(|c| *c == Command::ClearDepth).enumerate() {
            let color_load = if n == 0 {
                LoadOp::Clear(Color::BLACK)
            } else {
                LoadOp::Load
            };
            let mut pass = encoder.begin_render_pass(&RenderPassDescriptor {
                label: Some("Real3D Layer"),
                color_attachments: &[Some(RenderPassColorAttachment {
                    view: &self.color_view,
                    resolve_target: None,
                    ops: Operations {
                        load: color_load,
                        store: StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: Some(RenderPassDepthStencilAttachment {
                    view: &self.depth_view,
                    depth_ops: Some(Operations {
                        load: LoadOp::Clear(1.0),
                        store: StoreOp::Store,
                    }),
                    stencil_ops: None,
                }),
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            // Viewport state carries over from the previous layer.
            if let Some((x, y, w, h)) = scissor {
                pass.set_scissor_rect(x, y, w, h);
            }

            let mut bound = None;
            let mut have_storage = false;
            for command in segment {
                match command {
                    Command::BeginPass { cache, state } => {
                        key.blend = *state == PolyState::Alpha;
                        have_storage = match &self.storage[cache.index()] {
                            Some(buffer) => {
                                pass.set_vertex_buffer(0, buffer.slice(..));
                                true
                            }
                            None => false,
                        };
                    }
                    Command::Viewport(v) => {
                        scissor = map_viewport(v, self.width, self.height).scissor;
                        if let Some((x, y, w, h)) = scissor {
                            pass.set_scissor_rect(x, y, w, h);
                        }
                    }
                    Command::FrontFace(w) => key.front_face = *w,
                    Command::Culling(c) => key.culling = *c,
                    Command::Draw { first, count, .. } => {
                        let offset = (draw_index * UNIFORM_STRIDE) as u32;
                        draw_index += 1;
                        let (Some(bind_group), true, Some(_)) = (&self.bind_group, have_storage, scissor) else {
                            continue;
                        };
                        if bound != Some(key) {
                            let Some(pipeline) = self.pipelines.get(&key) else {
                                continue;
                            };
                            pass.set_pipeline(pipeline);
                            bound = Some(key);
                        }
                        pass.set_bind_group(0, bind_group, &[offset]);
                        pass.draw(*first..*first + *count, 0..1);
                    }
                    Command::ClearDepth => {}
                }
            }
        }

        self.queue.submit(Some(encoder.finish()));
        Ok(())
    }
}

impl RenderBackend for WgpuBackend {
    fn allocate_vertex_storage(
        &mut self,
        cache: CacheKind,
        vertices: usize,
        usage: StorageUsage,
    ) -> Result<(), BackendError> {
        let bytes = vertices * VertexRecord::SIZE;
        if bytes as u64 > self.device.limits().max_buffer_size {
            return Err(BackendError::OutOfMemory { bytes });
        }

        self.device.push_error_scope(ErrorFilter::OutOfMemory);
        self.device.push_error_scope(ErrorFilter::Validation);
        let buffer = self.device.create_buffer(&BufferDescriptor {
            label: Some(match usage {
                StorageUsage::Static => "Real3D Static Vertices",
                StorageUsage::Dynamic => "Real3D Dynamic Vertices",
            }),
            size: bytes as u64,
            usage: BufferUsages::VERTEX | BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let validation = pollster::block_on(self.device.pop_error_scope());
        let oom = pollster::block_on(self.device.pop_error_scope());
        if let Some(err) = validation {
            return Err(BackendError::Rejected(err.to_string()));
        }
        if oom.is_some() {
            return Err(BackendError::OutOfMemory { bytes });
        }

        self.storage[cache.index()] = Some(buffer);
        self.storage_len[cache.index()] = vertices;
        Ok(())
    }

    fn upload_vertices(&mut self, cache: CacheKind, first: usize, vertices: &[VertexRecord]) {
        let Some(buffer) = &self.storage[cache.index()] else {
            warn!("Upload to unallocated {} vertex storage", cache);
            return;
        };
        if first + vertices.len() > self.storage_len[cache.index()] {
            warn!(
                "Upload of {} vertices at {} overruns {} vertex storage",
                vertices.len(),
                first,
                cache
            );
            return;
        }
        let offset = (first * VertexRecord::SIZE) as BufferAddress;
        self.queue
            .write_buffer(buffer, offset, bytemuck::cast_slice(vertices));
    }

    fn create_texture_maps(&mut self, count: u32, side: u32) -> Result<(), BackendError> {
        let limits = self.device.limits();
        if side > limits.max_texture_dimension_2d || count > limits.max_texture_array_layers {
            return Err(BackendError::Rejected(format!(
                "{} texture maps of {}x{} exceed device limits",
                count, side, side
            )));
        }
        let texture = self.device.create_texture(&TextureDescriptor {
            label: Some("Real3D Texture Maps"),
            size: Extent3d {
                width: side,
                height: side,
                depth_or_array_layers: count,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: TextureDimension::D2,
            format: TextureFormat::Rgba8Unorm,
            usage: TextureUsages::TEXTURE_BINDING | TextureUsages::COPY_DST,
            view_formats: &[],
        });
        let view = texture.create_view(&TextureViewDescriptor {
            dimension: Some(TextureViewDimension::D2Array),
            ..Default::default()
        });
        info!("Created {} texture map(s) of {}x{}", count, side, side);
        self.texture_maps = Some(TextureMaps {
            texture,
            view,
            count,
            side,
        });
        self.rebuild_bind_group();
        Ok(())
    }

    fn upload_texture(&mut self, map: u32, x: u32, y: u32, image: &RgbaImage) {
        let Some(maps) = &self.texture_maps else {
            return;
        };
        let (w, h) = image.dimensions();
        if map >= maps.count || x + w > maps.side || y + h > maps.side {
            warn!("Texture upload {}x{} at ({}, {}) outside map {}", w, h, x, y, map);
            return;
        }
        self.queue.write_texture(
            ImageCopyTexture {
                texture: &maps.texture,
                mip_level: 0,
                origin: Origin3d { x, y, z: map },
                aspect: TextureAspect::All,
            },
            image.as_raw(),
            ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(4 * w),
                rows_per_image: Some(h),
            },
            Extent3d {
                width: w,
                height: h,
                depth_or_array_layers: 1,
            },
        );
    }

    fn begin_frame(&mut self) {
        self.commands.clear();
    }

    fn end_frame(&mut self) {
        if let Err(e) = self.replay() {
            warn!("Frame replay failed: {}", e);
        }
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

fn create_target(
    device: &Device,
    width: u32,
    height: u32,
    format: TextureFormat,
    label: &str,
) -> (Texture, TextureView) {
    let texture = device.create_texture(&TextureDescriptor {
        label: Some(label),
        size: Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: TextureDimension::D2,
        format,
        usage: TextureUsages::RENDER_ATTACHMENT | TextureUsages::COPY_SRC,
        view_formats: &[],
    });
    let view = texture.create_view(&TextureViewDescriptor::default());
    (texture, view)
}

fn create_uniform_buffer(device: &Device, draws: u64) -> Buffer {
    device.create_buffer(&BufferDescriptor {
        label: Some("Real3D Draw Uniforms"),
        size: draws * UNIFORM_STRIDE,
        usage: BufferUsages::UNIFORM | BufferUsages::COPY_DST,
        mapped_at_creation: false,
    })
}

/// Placement of a viewport on the render target.
///
/// The pass viewport always covers the whole target. The viewport's own
/// transform is applied in clip space so a rectangle hanging off the target
/// is cropped by the scissor instead of rescaled.
#[derive(Debug, Clone, Copy, PartialEq)]
struct ViewportMapping {
    /// Clip-space scale x, scale y, offset x, offset y.
    ndc: [f32; 4],
    /// Visible rectangle in target pixels, top-left origin. `None` when the
    /// viewport lies entirely off the target.
    scissor: Option<(u32, u32, u32, u32)>,
}

fn map_viewport(v: &ViewportState, width: u32, height: u32) -> ViewportMapping {
    let (tw, th) = (width.max(1) as i32, height.max(1) as i32);
    // Real3D viewports have a bottom-left origin.
    let top = th - (v.y + v.height);
    let (fw, fh) = (tw as f32, th as f32);
    let ndc = [
        v.width as f32 / fw,
        v.height as f32 / fh,
        (2 * v.x + v.width) as f32 / fw - 1.0,
        1.0 - (2 * top + v.height) as f32 / fh,
    ];

    let x0 = v.x.clamp(0, tw);
    let y0 = top.clamp(0, th);
    let x1 = (v.x + v.width).clamp(0, tw);
    let y1 = (top + v.height).clamp(0, th);
    let scissor = (x1 > x0 && y1 > y0)
        .then(|| (x0 as u32, y0 as u32, (x1 - x0) as u32, (y1 - y0) as u32));
    ViewportMapping { ndc, scissor }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn viewport_is_flipped_to_a_top_left_origin() {
        let v = ViewportState {
            x: 10,
            y: 20,
            width: 100,
            height: 50,
            ..ViewportState::default()
        };
        let m = map_viewport(&v, 496, 384);
        assert_eq!(m.scissor, Some((10, 314, 100, 50)));
        // NDC corners land on the rectangle's pixel edges.
        let px = |ndc_x: f32| (ndc_x * m.ndc[0] + m.ndc[2] + 1.0) * 0.5 * 496.0;
        let py = |ndc_y: f32| (1.0 - (ndc_y * m.ndc[1] + m.ndc[3])) * 0.5 * 384.0;
        assert!((px(-1.0) - 10.0).abs() < 1e-3);
        assert!((px(1.0) - 110.0).abs() < 1e-3);
        assert!((py(1.0) - 314.0).abs() < 1e-3);
        assert!((py(-1.0) - 364.0).abs() < 1e-3);
    }

    #[test]
    fn off_target_viewport_is_cropped_not_rescaled() {
        let off = ViewportState {
            x: -20,
            y: 0,
            width: 40,
            height: 500,
            ..ViewportState::default()
        };
        let m = map_viewport(&off, 496, 384);
        assert_eq!(m.scissor, Some((0, 0, 20, 384)));
        // Full 40-pixel scale is kept and NDC x = 0 stays at pixel 0.
        assert!((m.ndc[0] * 496.0 - 40.0).abs() < 1e-3);
        let centre = (m.ndc[2] + 1.0) * 0.5 * 496.0;
        assert!(centre.abs() < 1e-3);
        assert!((m.ndc[1] * 384.0 - 500.0).abs() < 1e-3);
    }

    #[test]
    fn viewport_outside_the_target_has_no_scissor() {
        let v = ViewportState {
            x: 600,
            y: 0,
            width: 50,
            height: 50,
            ..ViewportState::default()
        };
        assert_eq!(map_viewport(&v, 496, 384).scissor, None);
    }

    #[test]
    fn uniforms_fit_the_dynamic_offset_stride() {
        let u = DrawUniforms::new(&ViewportState::default(), &real3d_core::math::identity(), 496, 384);
        assert_eq!(u.params[2], 384.0);
        assert!(bytemuck::bytes_of(&u).len() as u64 <= UNIFORM_STRIDE);
    }
}
