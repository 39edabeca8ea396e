// Renderer settings and their JSON persistence.
use crate::error::Real3dError;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Native Real3D output resolution.
pub const NATIVE_WIDTH: f32 = 496.0;
pub const NATIVE_HEIGHT: f32 = 384.0;

/// Model 3 hardware stepping. Determines vertex precision and the layout of
/// culling nodes.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Stepping {
    #[default]
    #[serde(rename = "1.0")]
    Step1_0,
    #[serde(rename = "1.5")]
    Step1_5,
    #[serde(rename = "2.0")]
    Step2_0,
    #[serde(rename = "2.1")]
    Step2_1,
}

impl Stepping {
    /// Decode a stepping ID (0x10, 0x15, 0x20, 0x21). Unknown IDs fall back to 1.0.
    pub fn from_id(id: u8) -> Self {
        match id {
            0x15 => Self::Step1_5,
            0x20 => Self::Step2_0,
            0x21 => Self::Step2_1,
            _ => Self::Step1_0,
        }
    }

    pub fn id(self) -> u8 {
        match self {
            Self::Step1_0 => 0x10,
            Self::Step1_5 => 0x15,
            Self::Step2_0 => 0x20,
            Self::Step2_1 => 0x21,
        }
    }

    /// Fixed-point scale applied to vertex positions after the 8-bit shift.
    pub fn vertex_factor(self) -> f32 {
        match self {
            Self::Step1_0 | Self::Step1_5 => 1.0 / 128.0,
            Self::Step2_0 | Self::Step2_1 => 1.0 / 2048.0,
        }
    }

    /// Step 1.0 culling nodes lack two words; subtract this from word indices >= 3.
    pub fn culling_word_offset(self) -> usize {
        match self {
            Self::Step1_0 => 2,
            _ => 0,
        }
    }

    pub fn has_texture_offsets(self) -> bool {
        self.culling_word_offset() == 0
    }

    /// Step 1.0 coordinates are large enough that the base matrix is pre-scaled.
    pub fn uses_large_coordinates(self) -> bool {
        self == Self::Step1_0
    }
}

/// Placement of the emulated display inside the output surface.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DisplayGeometry {
    pub x_offset: u32,
    pub y_offset: u32,
    pub x_res: u32,
    pub y_res: u32,
    pub total_x_res: u32,
    pub total_y_res: u32,
}

impl DisplayGeometry {
    pub fn x_ratio(&self) -> f32 {
        self.x_res as f32 / NATIVE_WIDTH
    }

    pub fn y_ratio(&self) -> f32 {
        self.y_res as f32 / NATIVE_HEIGHT
    }
}

impl Default for DisplayGeometry {
    fn default() -> Self {
        Self {
            x_offset: 0,
            y_offset: 0,
            x_res: 496,
            y_res: 384,
            total_x_res: 496,
            total_y_res: 384,
        }
    }
}

/// Sizes of every bounded buffer owned by the model caches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheLimits {
    pub static_vertices: usize,
    pub dynamic_vertices: usize,
    /// Staging capacity per translucency state; must hold the largest model.
    pub local_vertices: usize,
    pub static_models: usize,
    pub dynamic_models: usize,
    pub static_lut_entries: usize,
    pub dynamic_lut_entries: usize,
    /// Node pool size of each display list.
    pub display_list_items: usize,
}

impl Default for CacheLimits {
    fn default() -> Self {
        Self {
            static_vertices: 700_000,
            dynamic_vertices: 64_000,
            local_vertices: 32_768,
            static_models: 10_000,
            dynamic_models: 1024,
            // Video ROM is 64 MB, polygon RAM is 4 MB (32-bit words).
            static_lut_entries: 0x400_0000 / 4,
            dynamic_lut_entries: 0x40_0000 / 4,
            display_list_items: 10_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextureConfig {
    /// Maximum number of backend texture maps (1-9).
    pub max_tex_maps: u32,
    /// Sheets per texture map side; a map holds `extent * extent` sheets.
    pub max_tex_map_extent: u32,
}

impl Default for TextureConfig {
    fn default() -> Self {
        Self {
            max_tex_maps: 9,
            max_tex_map_extent: 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    pub stepping: Stepping,
    pub display: DisplayGeometry,
    pub cache: CacheLimits,
    pub textures: TextureConfig,
    /// Run traversal and rendering on a dedicated thread.
    pub gpu_multithreaded: bool,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            stepping: Stepping::default(),
            display: DisplayGeometry::default(),
            cache: CacheLimits::default(),
            textures: TextureConfig::default(),
            gpu_multithreaded: true,
        }
    }
}

impl RendererConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: RendererConfig =
            serde_json::from_str(&content).context("Failed to parse config file")?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).context("Failed to create config directory")?;
            }
        }
        let content = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, content).context("Failed to write config file")?;
        Ok(())
    }

    /// Reject limits the caches cannot honour.
    pub fn validate(&self) -> Result<(), Real3dError> {
        let c = &self.cache;
        // LUT slots store model indices as u16 with u16::MAX reserved.
        let max_models = (u16::MAX - 1) as usize;
        if c.static_models > max_models || c.dynamic_models > max_models {
            return Err(Real3dError::config(format!(
                "model arrays are limited to {} entries",
                max_models
            )));
        }
        if c.local_vertices == 0 {
            return Err(Real3dError::config("local staging buffer must not be empty"));
        }
        if c.local_vertices > c.static_vertices || c.local_vertices > c.dynamic_vertices {
            return Err(Real3dError::config(
                "local staging buffer is larger than vertex storage",
            ));
        }
        if c.static_lut_entries == 0 || c.dynamic_lut_entries == 0 {
            return Err(Real3dError::config("LUTs must not be empty"));
        }
        if c.display_list_items < 2 {
            return Err(Real3dError::config("display lists need at least 2 nodes"));
        }
        let t = &self.textures;
        if !(1..=9).contains(&t.max_tex_maps) {
            return Err(Real3dError::config("max_tex_maps must be between 1 and 9"));
        }
        if t.max_tex_map_extent == 0 {
            return Err(Real3dError::config("max_tex_map_extent must be at least 1"));
        }
        if self.display.x_res == 0 || self.display.y_res == 0 {
            return Err(Real3dError::config("display resolution must be non-zero"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stepping_ids() {
        assert_eq!(Stepping::from_id(0x21), Stepping::Step2_1);
        assert_eq!(Stepping::from_id(0x42), Stepping::Step1_0);
        assert_eq!(Stepping::Step1_0.culling_word_offset(), 2);
        assert!(!Stepping::Step1_0.has_texture_offsets());
        assert!(Stepping::Step1_5.has_texture_offsets());
        assert_eq!(Stepping::Step2_0.vertex_factor(), 1.0 / 2048.0);
    }

    #[test]
    fn default_config_is_valid() {
        RendererConfig::default().validate().unwrap();
    }

    #[test]
    fn oversized_model_array_rejected() {
        let mut config = RendererConfig::default();
        config.cache.static_models = 70_000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn json_roundtrip_with_partial_file() {
        let json = r#"{ "stepping": "2.1", "gpu_multithreaded": false }"#;
        let config: RendererConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.stepping, Stepping::Step2_1);
        assert!(!config.gpu_multithreaded);
        assert_eq!(config.cache, CacheLimits::default());
    }

    #[test]
    fn display_ratios() {
        let display = DisplayGeometry {
            x_res: 992,
            y_res: 768,
            ..DisplayGeometry::default()
        };
        assert_eq!(display.x_ratio(), 2.0);
        assert_eq!(display.y_ratio(), 2.0);
    }
}
