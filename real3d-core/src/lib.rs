//! Real3D Pro-1000 scene decoding, model caching and display-list rendering.
//!
//! The pipeline runs once per frame:
//! 1. [`scene`] walks the viewport chain and culling node graph in emulated
//!    memory.
//! 2. Every model reached is looked up in a [`cache::ModelCache`]; misses are
//!    decoded by [`decode`], shaded into vertex records and uploaded to the
//!    backend.
//! 3. Model instances are appended to per-layer [`display_list`]s, which
//!    [`renderer::Render3D`] replays through a [`backend::RenderBackend`].

pub mod backend;
pub mod cache;
pub mod config;
pub mod decode;
pub mod display_list;
pub mod error;
pub mod frame;
pub mod math;
pub mod memory;
pub mod renderer;
pub mod scene;
pub mod stats;
pub mod texture;
pub mod vertex;
pub mod viewport;

pub use backend::{Command, RecordingBackend, RenderBackend, StorageUsage, Winding};
pub use cache::{ModelCache, ModelRef};
pub use config::{CacheLimits, DisplayGeometry, RendererConfig, Stepping, TextureConfig};
pub use display_list::{DisplayList, FrontFace, ModelInstance};
pub use error::{BackendError, CacheKind, Real3dError, Resource};
pub use memory::{MemoryImage, SceneMemory};
pub use renderer::Render3D;
pub use stats::FrameStats;
pub use vertex::{PolyState, VertexRecord};
pub use viewport::ViewportState;
