//! Landscape and population visualiser.
//!
//! Usage:
//!   visualise landscape --surface surface.svg --contour contour.svg
//!   visualise overlay --snapshot gen_0.csv --snapshot gen_10.csv --quartiles --output-dir out/
//!   visualise best --snapshot final.csv

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};

use gaharness::benchmark::DEFAULT_BOUNDS;
use gaharness::landscape::build_grid;
use gaharness::overlay::{overlay, BestSolutionReport};
use gaharness::render::{render_contour, render_surface};
use gaharness::snapshot::{load_snapshot, quartile_ranges, FitnessColumn, GroupRange};

#[derive(Parser)]
#[command(name = "visualise")]
#[command(version, about = "Render the benchmark landscape and recorded populations")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug, Clone, Copy)]
struct GridArgs {
    /// Lower bound of both axes
    #[arg(long, default_value_t = DEFAULT_BOUNDS.0, allow_negative_numbers = true)]
    low: f64,

    /// Upper bound of both axes
    #[arg(long, default_value_t = DEFAULT_BOUNDS.1, allow_negative_numbers = true)]
    high: f64,

    /// Grid points per axis
    #[arg(long, default_value_t = 1000)]
    resolution: usize,
}

#[derive(Subcommand)]
enum Commands {
    /// Render the landscape as a surface and/or a filled contour
    Landscape {
        #[command(flatten)]
        grid: GridArgs,

        /// 3-D surface image
        #[arg(long)]
        surface: Option<PathBuf>,

        /// 2-D contour image
        #[arg(long)]
        contour: Option<PathBuf>,

        /// Contour levels
        #[arg(long, default_value_t = 20)]
        levels: usize,
    },

    /// Overlay population snapshots on the landscape contour
    Overlay {
        /// Snapshot tables (one image each)
        #[arg(long = "snapshot", required = true)]
        snapshots: Vec<PathBuf>,

        #[command(flatten)]
        grid: GridArgs,

        /// Sub-population ranges as START:END, comma separated
        #[arg(long, value_delimiter = ',', conflicts_with = "quartiles")]
        groups: Option<Vec<GroupRange>>,

        /// Split every snapshot into four equal groups
        #[arg(long)]
        quartiles: bool,

        /// Snapshots carry a trailing fitness column
        #[arg(long)]
        fitness: bool,

        /// Directory for the overlay images
        #[arg(long = "output-dir", default_value = ".")]
        output_dir: PathBuf,
    },

    /// Print the best individual of a snapshot (last column is fitness)
    Best {
        #[arg(long)]
        snapshot: PathBuf,

        /// Emit JSON instead of text
        #[arg(long)]
        json: bool,
    },
}

fn overlay_path(output_dir: &Path, snapshot: &Path) -> PathBuf {
    let stem = snapshot
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "snapshot".to_string());
    output_dir.join(format!("{}_overlay.svg", stem))
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Landscape { grid, surface, contour, levels } => {
            if surface.is_none() && contour.is_none() {
                bail!("nothing to render: pass --surface and/or --contour");
            }
            let g = build_grid(grid.low, grid.high, grid.resolution)?;
            if let Some(path) = surface {
                render_surface(&g, &path).with_context(|| format!("rendering {}", path.display()))?;
                println!("Surface written to {}", path.display());
            }
            if let Some(path) = contour {
                render_contour(&g, levels)?
                    .save(&path)
                    .with_context(|| format!("rendering {}", path.display()))?;
                println!("Contour written to {}", path.display());
            }
        }

        Commands::Overlay { snapshots, grid, groups, quartiles, fitness, output_dir } => {
            let column = if fitness { FitnessColumn::Last } else { FitnessColumn::Absent };
            // built once, shared by every snapshot
            let g = build_grid(grid.low, grid.high, grid.resolution)?;
            let mut failed = 0usize;
            for path in &snapshots {
                let result = load_snapshot(path, column).and_then(|snap| {
                    let ranges = if quartiles { Some(quartile_ranges(snap.len())) } else { groups.clone() };
                    let out = overlay_path(&output_dir, path);
                    overlay(&g, &snap, ranges.as_deref(), &out).map(|_| out)
                });
                match result {
                    Ok(out) => println!("{} -> {}", path.display(), out.display()),
                    Err(err) => {
                        eprintln!("{}: {}", path.display(), err);
                        failed += 1;
                    }
                }
            }
            if failed > 0 {
                bail!("{} of {} overlays failed", failed, snapshots.len());
            }
        }

        Commands::Best { snapshot, json } => {
            let snap = load_snapshot(&snapshot, FitnessColumn::Last)?;
            let report = BestSolutionReport::from_snapshot(&snap)?;
            if json {
                println!("{}", serde_json::to_string(&report)?);
            } else {
                println!("{}", report);
            }
        }
    }
    Ok(())
}
