// Command-line reconstruction from slice images

use anyhow::{Context, Result};
use clap::Parser;
use slice_recon::slice_analysis::analyze_slice;
use slice_recon::{
    load_config, ReconstructionConfig, ReconstructionOutcome, ReconstructionRequest, Reconstructor, Slice,
};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(name = "reconstruct", about = "Reconstruct a 3D region, metrics and mesh from slice images")]
struct Cli {
    /// Slice images in stacking order
    #[arg(required = true, value_name = "SLICE")]
    slices: Vec<PathBuf>,

    /// In-plane pixel spacing in mm
    #[arg(long, num_args = 2, value_names = ["X", "Y"])]
    pixel_spacing: Option<Vec<f64>>,

    /// Distance between slices in mm
    #[arg(long)]
    slice_thickness: Option<f64>,

    /// Classification label of the study
    #[arg(long)]
    label: Option<String>,

    /// JSON configuration file
    #[arg(long, short = 'c', value_name = "PATH")]
    config: Option<PathBuf>,

    /// Seed for all randomized steps
    #[arg(long)]
    seed: Option<u64>,

    /// Write the outcome JSON here instead of stdout
    #[arg(long, short = 'o', value_name = "PATH")]
    output: Option<PathBuf>,

    /// Also write the final mesh as binary STL
    #[arg(long, value_name = "PATH")]
    stl: Option<PathBuf>,
}

fn load_slice(path: &Path) -> Result<Slice> {
    let image = image::open(path)
        .with_context(|| format!("Failed to decode {}", path.display()))?
        .into_luma8();
    let (w, h) = image.dimensions();
    let slice = Slice::from_u8(w as usize, h as usize, image.as_raw())
        .with_context(|| format!("Invalid slice {}", path.display()))?;
    Ok(slice)
}

fn run(cli: Cli) -> Result<bool> {
    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ReconstructionConfig::default(),
    };
    if let Some(seed) = cli.seed {
        config.enhancement.seed = Some(seed);
        if let slice_recon::DepthPolicy::Randomized { seed: s } = &mut config.depth_policy {
            *s = Some(seed);
        }
    }

    let slices = cli
        .slices
        .iter()
        .map(|p| load_slice(p))
        .collect::<Result<Vec<_>>>()?;
    log::info!("Loaded {} slices", slices.len());

    if let Some(middle) = slices.get(slices.len() / 2) {
        let m = analyze_slice(middle);
        println!(
            "Middle slice: area {} px, perimeter {} px, circularity {:.3}",
            m.area_pixels, m.perimeter_pixels, m.circularity
        );
    }

    let request = ReconstructionRequest {
        slices,
        pixel_spacing: cli.pixel_spacing.as_deref().map(|s| (s[0], s[1])),
        slice_thickness: cli.slice_thickness,
        classification: cli.label.clone(),
    };

    let reconstructor = Reconstructor::new(config)?;
    let outcome = match reconstructor.reconstruct(&request) {
        Ok(result) => {
            if let Some(path) = &cli.stl {
                result.mesh.write_stl(path)
                    .with_context(|| format!("Failed to write {}", path.display()))?;
            }
            ReconstructionOutcome::from(slice_recon::Result::Ok(result))
        }
        Err(e) => {
            log::error!("Reconstruction failed at {:?}: {}", e.stage(), e);
            ReconstructionOutcome::failure(&e)
        }
    };

    let json = serde_json::to_string_pretty(&outcome)?;
    match &cli.output {
        Some(path) => {
            std::fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))?;
            log::info!("Wrote outcome to {}", path.display());
        }
        None => println!("{}", json),
    }

    Ok(outcome.is_success())
}

fn main() -> ExitCode {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    match run(Cli::parse()) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            log::error!("{:#}", e);
            ExitCode::from(2)
        }
    }
}
