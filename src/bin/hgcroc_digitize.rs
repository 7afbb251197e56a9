use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use hgcroc::{create_timestamped_output_dir, run_simulation, write_run_into_dir, DetectorVariant, DigitizerConfig};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Parser)]
#[command(author, version, about = "HGCROC readout-chip digitization run")]
struct Cli {
    /// JSON run configuration; `hgcroc.json` in the working directory is used if present
    #[arg(long)]
    config: Option<PathBuf>,

    /// Detector variant (generic, ecal, hcal)
    #[arg(long)]
    variant: Option<DetectorVariant>,

    /// Random seed
    #[arg(long)]
    seed: Option<u64>,

    /// Number of channels
    #[arg(long)]
    channels: Option<u32>,

    /// Windows per channel
    #[arg(long)]
    events: Option<usize>,

    /// Disable noise and clock jitter
    #[arg(long)]
    no_noise: bool,

    /// Output base directory
    #[arg(long, default_value = "output-hgcroc")]
    output: PathBuf,
}

fn load_config(path: Option<&PathBuf>) -> Result<DigitizerConfig> {
    if let Some(path) = path {
        return DigitizerConfig::from_json_file(path)
            .with_context(|| format!("loading {}", path.display()));
    }

    let cwd_config = PathBuf::from("hgcroc.json");
    if cwd_config.exists() {
        return DigitizerConfig::from_json_file(&cwd_config).context("loading hgcroc.json");
    }

    Ok(DigitizerConfig::default())
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let cli = Cli::parse();

    let mut config = load_config(cli.config.as_ref())?;
    if let Some(v) = cli.variant {
        config.variant = v;
    }
    if let Some(v) = cli.seed {
        config.sim.seed = v;
    }
    if let Some(v) = cli.channels {
        config.sim.channels = v;
    }
    if let Some(v) = cli.events {
        config.sim.events = v;
    }
    if cli.no_noise {
        config.noise_enabled = false;
    }
    config.validate().context("invalid run configuration")?;

    let calibration = config.calibration()?;
    let run = run_simulation(&calibration, &config.sim)?;

    let output_dir = create_timestamped_output_dir(&cli.output)
        .with_context(|| format!("creating run directory under {}", cli.output.display()))?;
    let outputs = write_run_into_dir(&output_dir, &calibration, &run)?;

    let s = &run.summary;
    println!(
        "Digitized {} windows ({}): {} below threshold | {} normal | {} TOT ({} truncated)",
        s.windows, s.variant, s.below_threshold, s.normal_samples, s.tot_samples, s.truncated_tot
    );
    println!("Mean ADC: {:.1} | Max TOT: {:.2} ns", s.mean_adc, s.max_tot_duration);
    println!("Run directory: {}", outputs.output_dir.display());
    println!("CSV: {}", outputs.digis_path.display());
    println!("Summary: {}", outputs.summary_path.display());
    println!("Calibration: {}", outputs.calibration_path.display());

    Ok(())
}
