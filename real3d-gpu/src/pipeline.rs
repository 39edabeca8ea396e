/// Pipeline cache: creates/caches wgpu::RenderPipeline from draw state.
use real3d_core::backend::Winding;
use real3d_core::vertex::VertexRecord;
use std::collections::HashMap;
use std::num::NonZeroU64;
use wgpu::*;

pub const COLOR_FORMAT: TextureFormat = TextureFormat::Rgba8Unorm;
pub const DEPTH_FORMAT: TextureFormat = TextureFormat::Depth24Plus;

/// Vertex attributes in `VertexRecord` field order.
const ATTRIBUTES: [VertexAttribute; 12] = vertex_attr_array![
    0 => Float32x3,  // position
    1 => Float32x3,  // normal
    2 => Float32x3,  // color
    3 => Float32,    // translucence
    4 => Float32,    // light_enable
    5 => Float32,    // shininess
    6 => Float32,    // fog_intensity
    7 => Float32x2,  // uv
    8 => Float32x4,  // sheet
    9 => Float32x4,  // tex_params
    10 => Float32,   // tex_format
    11 => Float32,   // tex_map
];

/// Draw state that selects a pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PipelineKey {
    pub front_face: Winding,
    pub culling: bool,
    /// Alpha pass: blend on, depth writes off.
    pub blend: bool,
}

pub struct PipelineCache {
    cache: HashMap<PipelineKey, RenderPipeline>,
    bind_group_layout: BindGroupLayout,
    pipeline_layout: PipelineLayout,
}

impl PipelineCache {
    /// Create the shared bind group layout and pipeline layout.
    ///
    /// Binding 0 holds the per-draw uniforms at a dynamic offset, binding 1
    /// the texture map array.
    pub fn new(device: &Device, uniform_size: u64) -> Self {
        let bind_group_layout = device.create_bind_group_layout(&BindGroupLayoutDescriptor {
            label: Some("Real3D Bind Group Layout"),
            entries: &[
                BindGroupLayoutEntry {
                    binding: 0,
                    visibility: ShaderStages::VERTEX | ShaderStages::FRAGMENT,
                    ty: BindingType::Buffer {
                        ty: BufferBindingType::Uniform,
                        has_dynamic_offset: true,
                        min_binding_size: NonZeroU64::new(uniform_size),
                    },
                    count: None,
                },
                BindGroupLayoutEntry {
                    binding: 1,
                    visibility: ShaderStages::FRAGMENT,
                    ty: BindingType::Texture {
                        sample_type: TextureSampleType::Float { filterable: false },
                        view_dimension: TextureViewDimension::D2Array,
                        multisampled: false,
                    },
                    count: None,
                },
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&PipelineLayoutDescriptor {
            label: Some("Real3D Pipeline Layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        Self {
            cache: HashMap::new(),
            bind_group_layout,
            pipeline_layout,
        }
    }

    pub fn bind_group_layout(&self) -> &BindGroupLayout {
        &self.bind_group_layout
    }

    /// Pipeline for `key`, if [`Self::get_or_create`] has built it.
    pub fn get(&self, key: &PipelineKey) -> Option<&RenderPipeline> {
        self.cache.get(key)
    }

    /// Get or create a render pipeline for the given key and shaders.
    pub fn get_or_create(
        &mut self,
        device: &Device,
        key: PipelineKey,
        vertex_shader: &ShaderModule,
        fragment_shader: &ShaderModule,
    ) -> &RenderPipeline {
        let layout = &self.pipeline_layout;
        self.cache
            .entry(key)
            .or_insert_with(|| create_pipeline(device, layout, &key, vertex_shader, fragment_shader))
    }
}

fn create_pipeline(
    device: &Device,
    layout: &PipelineLayout,
    key: &PipelineKey,
    vertex_shader: &ShaderModule,
    fragment_shader: &ShaderModule,
) -> RenderPipeline {
    let front_face = match key.front_face {
        Winding::Clockwise => FrontFace::Cw,
        Winding::CounterClockwise => FrontFace::Ccw,
    };
    let blend = if key.blend {
        Some(BlendState::ALPHA_BLENDING)
    } else {
        None
    };

    device.create_render_pipeline(&RenderPipelineDescriptor {
        label: Some("Real3D Render Pipeline"),
        layout: Some(layout),
        vertex: VertexState {
            module: vertex_shader,
            entry_point: "main",
            buffers: &[VertexBufferLayout {
                array_stride: VertexRecord::SIZE as BufferAddress,
                step_mode: VertexStepMode::Vertex,
                attributes: &ATTRIBUTES,
            }],
        },
        fragment: Some(FragmentState {
            module: fragment_shader,
            entry_point: "main",
            targets: &[Some(ColorTargetState {
                format: COLOR_FORMAT,
                blend,
                write_mask: ColorWrites::ALL,
            })],
        }),
        primitive: PrimitiveState {
            topology: PrimitiveTopology::TriangleList,
            strip_index_format: None,
            front_face,
            cull_mode: key.culling.then_some(Face::Back),
            unclipped_depth: false,
            polygon_mode: PolygonMode::Fill,
            conservative: false,
        },
        depth_stencil: Some(DepthStencilState {
            format: DEPTH_FORMAT,
            depth_write_enabled: !key.blend,
            depth_compare: CompareFunction::Less,
            stencil: StencilState::default(),
            bias: DepthBiasState::default(),
        }),
        multisample: MultisampleState::default(),
        multiview: None,
    })
}
