//! wgpu implementation of the Real3D rendering backend.

pub mod backend;
pub mod pipeline;
pub mod shaders;

pub use backend::WgpuBackend;
pub use pipeline::{PipelineCache, PipelineKey};
pub use shaders::ShaderManager;
