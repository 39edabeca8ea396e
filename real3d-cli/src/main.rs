// CLI application
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use real3d_cli::commands::{render, write_config, Dumps, RenderOptions};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "real3d")]
#[command(about = "Render Real3D Pro-1000 scenes from memory dumps")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Traverse and render the scene held in a set of memory dumps
    Render {
        /// Culling RAM low dump (little-endian words)
        #[arg(long)]
        culling_lo: Option<PathBuf>,

        /// Culling RAM high dump
        #[arg(long)]
        culling_hi: Option<PathBuf>,

        /// Polygon RAM dump
        #[arg(long)]
        poly_ram: Option<PathBuf>,

        /// Video ROM image
        #[arg(long)]
        vrom: Option<PathBuf>,

        /// Texture RAM dump (little-endian 16-bit texels)
        #[arg(long)]
        texture_ram: Option<PathBuf>,

        /// Renderer configuration (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Board stepping ID in hex, e.g. 21
        #[arg(short, long)]
        step: Option<String>,

        /// Number of frames to render
        #[arg(short, long, default_value = "1")]
        frames: u32,

        /// Render with the wgpu backend instead of recording commands
        #[arg(long)]
        gpu: bool,

        /// Write the last frame to a PNG (requires --gpu)
        #[arg(long)]
        png: Option<PathBuf>,

        /// Render on a separate thread
        #[arg(long, conflicts_with = "single_threaded")]
        threaded: bool,

        /// Render on the calling thread
        #[arg(long)]
        single_threaded: bool,
    },
    /// Write the default renderer configuration
    Config {
        /// Output path
        #[arg(short, long)]
        write: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Render {
            culling_lo,
            culling_hi,
            poly_ram,
            vrom,
            texture_ram,
            config,
            step,
            frames,
            gpu,
            png,
            threaded,
            single_threaded,
        } => {
            let dumps = Dumps {
                culling_lo,
                culling_hi,
                poly_ram,
                vrom,
                texture_ram,
            };
            let options = RenderOptions {
                config,
                step,
                frames,
                gpu,
                png,
                threaded: match (threaded, single_threaded) {
                    (true, _) => Some(true),
                    (_, true) => Some(false),
                    _ => None,
                },
            };

            let pb = create_progress_bar(u64::from(frames))?;
            let stats = render(&dumps, &options, &pb)?;
            pb.finish_with_message("Rendering complete");

            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Commands::Config { write } => {
            write_config(&write)?;
            println!("Wrote {}", write.display());
        }
    }

    Ok(())
}

fn create_progress_bar(frames: u64) -> anyhow::Result<ProgressBar> {
    let pb = ProgressBar::new(frames);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} frames {msg}")?
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
    );
    pb.set_message("Rendering...");
    Ok(pb)
}
