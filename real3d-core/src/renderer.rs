//! Frame driver.
//!
//! `Render3D` owns both model caches, the texture sheets and the per-layer
//! display lists. Each frame it walks the scene, recovering from cache
//! exhaustion by flushing everything and walking once more, then replays the
//! display lists layer by layer.

use crate::backend::{RenderBackend, Winding};
use crate::cache::ModelCache;
use crate::config::{RendererConfig, Stepping};
use crate::display_list::DisplayList;
use crate::error::{CacheKind, Real3dError};
use crate::memory::SceneMemory;
use crate::scene::{LayerLists, SceneTargets, SceneWalker};
use crate::stats::{ErrorFlags, FrameError, FrameStats};
use crate::texture::{SheetLayout, TextureSheets};
use crate::vertex::PolyState;
use log::{debug, info, warn};
use std::time::Instant;

pub struct Render3D {
    config: RendererConfig,
    caches: [ModelCache; 2],
    lists: LayerLists,
    sheets: TextureSheets,
    stats: FrameStats,
    errors: ErrorFlags,
    frame_start: Option<Instant>,
}

impl Render3D {
    /// Validate `config` and allocate every backend resource.
    ///
    /// # Errors
    /// `InvalidConfig` for unusable limits, `BackendAllocation` if vertex
    /// storage or texture maps cannot be created.
    pub fn new(config: RendererConfig, backend: &mut dyn RenderBackend) -> Result<Self, Real3dError> {
        config.validate()?;
        let caches = [
            ModelCache::new(CacheKind::Static, &config.cache, backend)?,
            ModelCache::new(CacheKind::Dynamic, &config.cache, backend)?,
        ];
        let sheets = TextureSheets::new(&config.textures, backend).map_err(|e| {
            let layout = SheetLayout::new(&config.textures);
            let side = layout.map_side() as usize;
            warn!("Texture map creation failed: {}", e);
            Real3dError::BackendAllocation {
                cache: CacheKind::Static,
                bytes: layout.num_maps() as usize * side * side * 4,
            }
        })?;
        let items = config.cache.display_list_items;
        let lists = std::array::from_fn(|_| {
            [
                DisplayList::new(CacheKind::Static, items),
                DisplayList::new(CacheKind::Dynamic, items),
            ]
        });
        info!(
            "Real3D renderer ready: stepping {:?}, {} texture map(s) of {}x{}",
            config.stepping,
            sheets.layout().num_maps(),
            sheets.layout().map_side(),
            sheets.layout().map_side()
        );

        Ok(Self {
            config,
            caches,
            lists,
            sheets,
            stats: FrameStats::default(),
            errors: ErrorFlags::default(),
            frame_start: None,
        })
    }

    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    /// Counters of the frame in progress, or the last one finished.
    pub fn stats(&self) -> &FrameStats {
        &self.stats
    }

    pub fn cache(&self, kind: CacheKind) -> &ModelCache {
        &self.caches[kind.index()]
    }

    pub fn display_list(&self, layer: usize, kind: CacheKind) -> Option<&DisplayList> {
        self.lists.get(layer).map(|l| &l[kind.index()])
    }

    pub fn sheets(&self) -> &TextureSheets {
        &self.sheets
    }

    pub fn begin_frame(&mut self, backend: &mut dyn RenderBackend) {
        self.errors.clear();
        self.stats = FrameStats::default();
        self.frame_start = Some(Instant::now());
        backend.begin_frame();
    }

    /// Build and draw one frame from `memory`.
    pub fn render_frame(&mut self, memory: &SceneMemory<'_>, backend: &mut dyn RenderBackend) {
        self.caches[CacheKind::Dynamic.index()].clear();
        self.clear_lists();
        backend.set_front_face(Winding::Clockwise);
        backend.set_culling(true);

        if let Err(e) = self.walk(memory, backend) {
            debug!("Flushing model caches: {}", e);
            self.flush_caches();
            // The first walk's work was discarded with the caches.
            self.stats = FrameStats {
                recaches: self.stats.recaches + 1,
                ..FrameStats::default()
            };
            if let Err(e) = self.walk(memory, backend) {
                // Keep whatever the second walk built.
                self.errors.report(FrameError::UnableToCacheModel, e);
            }
        }

        for layer in 0..self.lists.len() {
            backend.clear_depth();
            for state in PolyState::ALL {
                for kind in CacheKind::ALL {
                    self.stats.draw_calls += self.lists[layer][kind.index()].render(state, backend);
                }
            }
        }
    }

    /// Finish the frame and return its counters.
    pub fn end_frame(&mut self, backend: &mut dyn RenderBackend) -> FrameStats {
        backend.end_frame();
        if let Some(start) = self.frame_start.take() {
            self.stats.frame_time_ms = start.elapsed().as_secs_f32() * 1000.0;
        }
        self.stats
    }

    /// Texture RAM changed in the given rectangle.
    pub fn upload_textures(&mut self, x: u32, y: u32, width: u32, height: u32) {
        self.sheets.upload_textures(x, y, width, height);
    }

    /// Switch hardware stepping. Cached models depend on it, so both caches
    /// and the decoded textures are dropped.
    pub fn set_step(&mut self, stepping: Stepping) {
        if stepping != self.config.stepping {
            info!("Stepping changed to {:?}", stepping);
        }
        self.config.stepping = stepping;
        self.flush_caches();
        self.sheets.reset();
    }

    fn walk(&mut self, memory: &SceneMemory<'_>, backend: &mut dyn RenderBackend) -> Result<(), Real3dError> {
        let targets = SceneTargets {
            caches: &mut self.caches,
            lists: &mut self.lists,
            sheets: &mut self.sheets,
            backend,
            stats: &mut self.stats,
            errors: &mut self.errors,
        };
        SceneWalker::new(*memory, self.config.stepping, self.config.display, targets).walk()
    }

    fn clear_lists(&mut self) {
        for layer in self.lists.iter_mut() {
            for list in layer.iter_mut() {
                list.clear();
            }
        }
    }

    fn flush_caches(&mut self) {
        for cache in self.caches.iter_mut() {
            cache.clear();
        }
        self.clear_lists();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Command, RecordingBackend};
    use crate::memory::MemoryImage;

    fn small_config() -> RendererConfig {
        let mut config = RendererConfig::default();
        config.cache.static_vertices = 1200;
        config.cache.dynamic_vertices = 600;
        config.cache.local_vertices = 120;
        config.cache.static_models = 8;
        config.cache.dynamic_models = 8;
        config.cache.static_lut_entries = 0x10_0100;
        config.cache.dynamic_lut_entries = 0x1000;
        config.cache.display_list_items = 32;
        config
    }

    #[test]
    fn empty_scene_draws_nothing() {
        let mut backend = RecordingBackend::new();
        let mut renderer = Render3D::new(small_config(), &mut backend).unwrap();
        let memory = MemoryImage::new();

        renderer.begin_frame(&mut backend);
        renderer.render_frame(&memory.as_scene(), &mut backend);
        let stats = renderer.end_frame(&mut backend);

        assert_eq!(stats.draw_calls, 0);
        assert_eq!(stats.recaches, 0);
        let clears = backend
            .commands()
            .iter()
            .filter(|c| **c == Command::ClearDepth)
            .count();
        assert_eq!(clears, 4);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let mut backend = RecordingBackend::new();
        let mut config = small_config();
        config.cache.local_vertices = 0;
        assert!(matches!(
            Render3D::new(config, &mut backend),
            Err(Real3dError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn set_step_updates_config() {
        let mut backend = RecordingBackend::new();
        let mut renderer = Render3D::new(small_config(), &mut backend).unwrap();
        renderer.set_step(Stepping::Step2_1);
        assert_eq!(renderer.config().stepping, Stepping::Step2_1);
        assert!(renderer.cache(CacheKind::Static).is_empty());
    }
}
