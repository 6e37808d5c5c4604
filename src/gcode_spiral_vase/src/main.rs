use anyhow::Context;
use clap::{Parser, ValueEnum};
use gcode_spiral_vase_lib as gsv;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum PointSearch {
    Point,
    Segment,
}

/// Rewrite sliced G-code so each layer's loop climbs continuously in Z (spiral vase mode).
#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// G-code to spiralize.
    input: PathBuf,

    /// Where to write the result. Can be the same as input; it's only replaced once the output is
    /// complete.
    output: PathBuf,

    /// JSON job configuration. Flags below override it.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Blend each layer's XY path toward the previous layer's.
    #[arg(long)]
    smooth_xy: bool,

    /// Ignore previous-layer points farther away than this (mm) when smoothing.
    #[arg(long)]
    max_xy_smoothing: Option<f32>,

    /// How to find the previous layer's path when smoothing.
    #[arg(long, value_enum)]
    point_search: Option<PointSearch>,

    /// E values are absolute (M82); turns off extrusion tapering.
    #[arg(long)]
    absolute_e: bool,

    /// Index of the first layer to spiralize.
    #[arg(long)]
    first_spiral_layer: Option<usize>,

    /// Comment that starts each layer in the input.
    #[arg(long)]
    layer_change_marker: Option<String>,
}

impl Cli {
    fn job_config(&self) -> anyhow::Result<gsv::JobConfig> {
        let mut config = match &self.config {
            Some(path) => gsv::JobConfig::from_json_file(path)
                .with_context(|| format!("loading config {}", path.display()))?,
            None => gsv::JobConfig::default(),
        };
        if self.smooth_xy {
            config.spiral.smooth_xy = true;
        }
        if let Some(max_xy_smoothing) = self.max_xy_smoothing {
            config.spiral.max_xy_smoothing = max_xy_smoothing;
        }
        if let Some(point_search) = self.point_search {
            config.spiral.reference_search = match point_search {
                PointSearch::Point => gsv::ReferenceSearch::Point,
                PointSearch::Segment => gsv::ReferenceSearch::Segment,
            };
        }
        if self.absolute_e {
            config.spiral.use_relative_e = false;
        }
        if let Some(first_spiral_layer) = self.first_spiral_layer {
            config.first_spiral_layer = first_spiral_layer;
        }
        if let Some(marker) = &self.layer_change_marker {
            config.layer_change_marker = marker.clone();
        }
        config.validate()?;
        Ok(config)
    }
}

fn init_logging() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).with_target(false).init();
}

fn main() -> anyhow::Result<()> {
    init_logging();
    let cli = Cli::parse();
    info!("gcode_spiral_vase starting");

    let config = cli.job_config()?;
    info!(?config, "job configuration");

    gsv::SpiralVaseJob::new(config)
        .process_files(&cli.input, &cli.output)
        .with_context(|| format!("spiralizing {} into {}", cli.input.display(), cli.output.display()))?;
    Ok(())
}
