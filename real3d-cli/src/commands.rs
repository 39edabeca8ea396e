// Command implementations
use anyhow::{anyhow, bail, Context, Result};
use image::RgbaImage;
use indicatif::ProgressBar;
use log::{debug, info, warn};
use real3d_core::backend::{RecordingBackend, RenderBackend};
use real3d_core::config::{RendererConfig, Stepping};
use real3d_core::frame::handoff;
use real3d_core::memory::{
    MemoryImage, CULLING_RAM_HI_WORDS, CULLING_RAM_LO_WORDS, POLY_RAM_WORDS, TEXTURE_RAM_TEXELS,
    VROM_WORDS,
};
use real3d_core::renderer::Render3D;
use real3d_core::stats::FrameStats;
use real3d_gpu::WgpuBackend;
use std::path::{Path, PathBuf};
use std::thread;

/// Frames in flight between the loader and the render thread.
const HANDOFF_DEPTH: usize = 2;

/// Memory dump files. Missing regions are zero-filled.
#[derive(Debug, Default)]
pub struct Dumps {
    pub culling_lo: Option<PathBuf>,
    pub culling_hi: Option<PathBuf>,
    pub poly_ram: Option<PathBuf>,
    pub vrom: Option<PathBuf>,
    pub texture_ram: Option<PathBuf>,
}

#[derive(Debug)]
pub struct RenderOptions {
    pub config: Option<PathBuf>,
    /// Stepping ID in hex (`21`, `0x21`).
    pub step: Option<String>,
    pub frames: u32,
    pub gpu: bool,
    pub png: Option<PathBuf>,
    /// Overrides `gpu_multithreaded` from the configuration.
    pub threaded: Option<bool>,
}

/// A backend the binary can drive, optionally able to read back the frame.
trait FrameTarget: RenderBackend {
    fn snapshot(&self) -> Option<Result<RgbaImage>> {
        None
    }
}

impl FrameTarget for RecordingBackend {}

impl FrameTarget for WgpuBackend {
    fn snapshot(&self) -> Option<Result<RgbaImage>> {
        Some(self.read_frame())
    }
}

/// Read a little-endian word dump, padded or truncated to `words`.
fn load_words(path: Option<&Path>, words: usize, region: &str) -> Result<Vec<u32>> {
    let Some(path) = path else {
        debug!("No {} dump, zero-filling {} words", region, words);
        return Ok(vec![0; words]);
    };
    let bytes = std::fs::read(path)
        .with_context(|| format!("Failed to read {} dump {}", region, path.display()))?;
    if bytes.len() % 4 != 0 {
        warn!("{} dump is not a whole number of words; ignoring the tail", region);
    }
    let mut out: Vec<u32> = bytes
        .chunks_exact(4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect();
    if out.len() != words {
        warn!("{} dump has {} words, expected {}", region, out.len(), words);
    }
    out.resize(words, 0);
    Ok(out)
}

fn load_texels(path: Option<&Path>) -> Result<Vec<u16>> {
    let Some(path) = path else {
        return Ok(vec![0; TEXTURE_RAM_TEXELS]);
    };
    let bytes = std::fs::read(path)
        .with_context(|| format!("Failed to read texture RAM dump {}", path.display()))?;
    let mut out: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|b| u16::from_le_bytes([b[0], b[1]]))
        .collect();
    if out.len() != TEXTURE_RAM_TEXELS {
        warn!("Texture RAM dump has {} texels, expected {}", out.len(), TEXTURE_RAM_TEXELS);
    }
    out.resize(TEXTURE_RAM_TEXELS, 0);
    Ok(out)
}

pub fn load_memory(dumps: &Dumps) -> Result<MemoryImage> {
    Ok(MemoryImage {
        culling_ram_lo: load_words(dumps.culling_lo.as_deref(), CULLING_RAM_LO_WORDS, "culling RAM low")?,
        culling_ram_hi: load_words(dumps.culling_hi.as_deref(), CULLING_RAM_HI_WORDS, "culling RAM high")?,
        poly_ram: load_words(dumps.poly_ram.as_deref(), POLY_RAM_WORDS, "polygon RAM")?,
        vrom: load_words(dumps.vrom.as_deref(), VROM_WORDS, "video ROM")?,
        texture_ram: load_texels(dumps.texture_ram.as_deref())?,
    })
}

fn parse_step(id: &str) -> Result<Stepping> {
    let digits = id.trim().trim_start_matches("0x");
    let raw = u8::from_str_radix(digits, 16).with_context(|| format!("Invalid stepping ID {}", id))?;
    let stepping = Stepping::from_id(raw);
    if stepping.id() != raw {
        warn!("Unknown stepping 0x{:02X}, using {:?}", raw, stepping);
    }
    Ok(stepping)
}

/// Render `frames` frames from the dumps and return the summed statistics.
pub fn render(dumps: &Dumps, options: &RenderOptions, progress: &ProgressBar) -> Result<FrameStats> {
    let mut config = match &options.config {
        Some(path) => RendererConfig::load(path)?,
        None => RendererConfig::default(),
    };
    if let Some(step) = &options.step {
        config.stepping = parse_step(step)?;
    }
    if let Some(threaded) = options.threaded {
        config.gpu_multithreaded = threaded;
    }
    config.validate()?;

    let memory = load_memory(dumps)?;
    info!("Loaded memory dumps, stepping {:?}", config.stepping);

    let (stats, image) = if options.gpu {
        let (w, h) = (config.display.total_x_res, config.display.total_y_res);
        drive(config, memory, options.frames, progress, move || WgpuBackend::new(w, h))?
    } else {
        drive(config, memory, options.frames, progress, || Ok(RecordingBackend::new()))?
    };

    if let Some(path) = &options.png {
        match image {
            Some(image) => {
                image
                    .save(path)
                    .with_context(|| format!("Failed to write {}", path.display()))?;
                info!("Wrote {}", path.display());
            }
            None => warn!("PNG output needs the GPU backend (--gpu); nothing written"),
        }
    }
    Ok(stats)
}

fn drive<B, F>(
    config: RendererConfig,
    memory: MemoryImage,
    frames: u32,
    progress: &ProgressBar,
    make_backend: F,
) -> Result<(FrameStats, Option<RgbaImage>)>
where
    B: FrameTarget,
    F: FnOnce() -> Result<B> + Send + 'static,
{
    if config.gpu_multithreaded {
        drive_threaded(config, memory, frames, progress, make_backend)
    } else {
        let mut backend = make_backend()?;
        let mut renderer = Render3D::new(config, &mut backend).context("Failed to create renderer")?;
        let mut total = FrameStats::default();
        for _ in 0..frames {
            total.accumulate(&render_one(&mut renderer, &memory, &mut backend));
            progress.inc(1);
        }
        let image = backend.snapshot().transpose()?;
        Ok((total, image))
    }
}

/// Traversal and rendering run on their own thread; this thread publishes
/// memory images the way an emulated CPU would at each frame boundary.
fn drive_threaded<B, F>(
    config: RendererConfig,
    memory: MemoryImage,
    frames: u32,
    progress: &ProgressBar,
    make_backend: F,
) -> Result<(FrameStats, Option<RgbaImage>)>
where
    B: FrameTarget,
    F: FnOnce() -> Result<B> + Send + 'static,
{
    let (producer, consumer) = handoff::<MemoryImage>(HANDOFF_DEPTH);
    let worker = thread::Builder::new()
        .name("real3d-render".into())
        .spawn(move || -> Result<(FrameStats, Option<RgbaImage>)> {
            let mut backend = make_backend()?;
            let mut renderer =
                Render3D::new(config, &mut backend).context("Failed to create renderer")?;
            let mut total = FrameStats::default();
            while let Ok(frame) = consumer.recv() {
                total.accumulate(&render_one(&mut renderer, &frame, &mut backend));
                consumer.release(frame);
            }
            let image = backend.snapshot().transpose()?;
            Ok((total, image))
        })
        .context("Failed to spawn render thread")?;

    // Images are recycled once the render thread releases them.
    let mut allocated = 0;
    for _ in 0..frames {
        let frame = match producer.reclaim() {
            Some(frame) => frame,
            None if allocated < HANDOFF_DEPTH => {
                allocated += 1;
                memory.clone()
            }
            None => match producer.wait_reclaim() {
                Some(frame) => frame,
                None => break,
            },
        };
        if producer.submit(frame).is_err() {
            break;
        }
        progress.inc(1);
    }
    drop(producer);

    worker
        .join()
        .map_err(|_| anyhow!("Render thread panicked"))?
}

fn render_one<B: RenderBackend>(renderer: &mut Render3D, memory: &MemoryImage, backend: &mut B) -> FrameStats {
    renderer.begin_frame(backend);
    renderer.render_frame(&memory.as_scene(), backend);
    renderer.end_frame(backend)
}

pub fn write_config(path: &Path) -> Result<()> {
    if path.exists() {
        bail!("{} already exists", path.display());
    }
    RendererConfig::default().save(path)?;
    info!("Wrote default configuration to {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_ids_parse_as_hex() {
        assert_eq!(parse_step("21").unwrap(), Stepping::Step2_1);
        assert_eq!(parse_step("0x15").unwrap(), Stepping::Step1_5);
        assert_eq!(parse_step("99").unwrap(), Stepping::Step1_0);
        assert!(parse_step("zz").is_err());
    }

    #[test]
    fn missing_dump_is_zero_filled() {
        let words = load_words(None, 16, "test").unwrap();
        assert_eq!(words, vec![0; 16]);
    }

    #[test]
    fn short_dump_is_padded() {
        let path = std::env::temp_dir().join(format!("real3d-dump-{}.bin", std::process::id()));
        std::fs::write(&path, [1u8, 0, 0, 0, 2, 0, 0, 0, 9]).unwrap();
        let words = load_words(Some(&path), 4, "test").unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(words, vec![1, 2, 0, 0]);
    }
}
