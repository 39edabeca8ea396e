//! Error types for the Real3D pipeline.
//!
//! Errors fall into three classes:
//! - **Capacity**: a bounded buffer (staging, vertex storage, model array,
//!   display list, texture references) is full. The caller clears the caches
//!   and rebuilds the frame.
//! - **Decode anomalies**: the scene database or a model points somewhere it
//!   should not. The offending subtree is skipped.
//! - **Backend allocation**: vertex storage could not be obtained at startup.
//!   This is the only fatal class.

use std::fmt;
use thiserror::Error;

/// Which of the two model caches an error or resource refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheKind {
    /// Models in video ROM. Persist across frames.
    Static,
    /// Models in polygon RAM. Rebuilt every frame.
    Dynamic,
}

impl CacheKind {
    pub const ALL: [CacheKind; 2] = [CacheKind::Static, CacheKind::Dynamic];

    /// Model addresses below 0x100000 live in polygon RAM.
    #[inline]
    pub fn for_model_address(addr: u32) -> Self {
        if (addr & 0x00FF_FFFF) < 0x10_0000 {
            CacheKind::Dynamic
        } else {
            CacheKind::Static
        }
    }

    #[inline]
    pub fn index(self) -> usize {
        match self {
            CacheKind::Static => 0,
            CacheKind::Dynamic => 1,
        }
    }
}

impl fmt::Display for CacheKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheKind::Static => f.write_str("static"),
            CacheKind::Dynamic => f.write_str("dynamic"),
        }
    }
}

/// A bounded resource that can run out during a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    StagingBuffer,
    VertexStorage,
    ModelArray,
    DisplayList,
    TextureRefs,
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Resource::StagingBuffer => "local staging buffer",
            Resource::VertexStorage => "vertex storage",
            Resource::ModelArray => "model array",
            Resource::DisplayList => "display list",
            Resource::TextureRefs => "texture reference set",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum Real3dError {
    /// A bounded buffer is full. Recoverable by clearing and retrying the frame.
    #[error("{resource} is full")]
    Capacity { resource: Resource },

    /// Malformed scene graph or model data.
    #[error("decode anomaly at 0x{address:06X}: {message}")]
    DecodeAnomaly { address: u32, message: String },

    /// The backend could not provide vertex storage, even at the smallest size.
    #[error("unable to allocate {bytes} bytes of {cache} vertex storage")]
    BackendAllocation { cache: CacheKind, bytes: usize },

    /// Configuration values that cannot work together.
    #[error("invalid configuration: {message}")]
    InvalidConfig { message: String },
}

impl Real3dError {
    #[cold]
    pub fn capacity(resource: Resource) -> Self {
        Self::Capacity { resource }
    }

    #[cold]
    pub fn decode(address: u32, message: impl Into<String>) -> Self {
        Self::DecodeAnomaly {
            address,
            message: message.into(),
        }
    }

    #[cold]
    pub fn config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// `true` for errors the frame driver recovers from by flushing caches.
    pub fn is_capacity(&self) -> bool {
        matches!(self, Self::Capacity { .. })
    }
}

/// Failure reported by a rendering backend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("out of memory allocating {bytes} bytes")]
    OutOfMemory { bytes: usize },

    #[error("backend rejected request: {0}")]
    Rejected(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacity_is_recoverable() {
        assert!(Real3dError::capacity(Resource::VertexStorage).is_capacity());
        assert!(!Real3dError::decode(0x100, "bad").is_capacity());
    }

    #[test]
    fn model_address_selects_cache() {
        assert_eq!(CacheKind::for_model_address(0x0F_FFFF), CacheKind::Dynamic);
        assert_eq!(CacheKind::for_model_address(0x10_0000), CacheKind::Static);
        assert_eq!(CacheKind::for_model_address(0x0100_0040), CacheKind::Dynamic);
    }

    #[test]
    fn messages_name_the_resource() {
        let e = Real3dError::capacity(Resource::DisplayList);
        assert_eq!(e.to_string(), "display list is full");
        let e = Real3dError::decode(0x800010, "pointer out of range");
        assert_eq!(e.to_string(), "decode anomaly at 0x800010: pointer out of range");
    }
}
