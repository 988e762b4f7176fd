//! RRN CLI - IR-MAD change detection and relative radiometric normalization

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use ndarray::{Array2, Axis};
use ndarray_npy::{read_npy, write_npy};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use rrn_algorithms::irmad::{irmad_with_progress, IrMadOutcome, IrMadParams, Regressor};
use rrn_algorithms::synthetic::{generate_scene, SceneParams};

// ─── CLI structure ──────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "rrn")]
#[command(author, version, about = "IR-MAD change detection and relative radiometric normalization", long_about = None)]
struct Cli {
    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show shape and per-band statistics of a (samples, bands) .npy array
    Info {
        /// Input .npy file
        input: PathBuf,
    },
    /// Run IR-MAD on two (samples, bands) .npy arrays
    Run {
        /// First image (reference radiometry)
        before: PathBuf,
        /// Second image (to be normalized)
        after: PathBuf,
        /// Output file for the per-sample no-change probability
        #[arg(short, long)]
        weights: PathBuf,
        /// Output file for the (bands, 2) [intercept, scale] transformation
        #[arg(short, long)]
        transform: PathBuf,
        /// Also write the second image mapped onto the first one's radiometry
        #[arg(short, long)]
        normalized: Option<PathBuf>,
        #[command(flatten)]
        irmad: IrMadArgs,
    },
    /// Generate a synthetic image pair with injected change and run IR-MAD on it
    Synthetic {
        #[arg(long, default_value = "128")]
        rows: usize,
        #[arg(long, default_value = "128")]
        cols: usize,
        #[arg(short, long, default_value = "4")]
        bands: usize,
        /// Sensor noise standard deviation
        #[arg(long, default_value = "0.05")]
        noise: f64,
        /// Fraction of pixels with injected change
        #[arg(long, default_value = "0.1")]
        change_fraction: f64,
        /// Minimum per-band shift of a changed pixel
        #[arg(long, default_value = "3.0")]
        change_magnitude: f64,
        /// Mix bands through a random rotation
        #[arg(long)]
        rotate: bool,
        #[arg(long, default_value = "42")]
        seed: u64,
        /// No-change probability below which a pixel counts as changed
        #[arg(long, default_value = "0.01")]
        alpha: f64,
        #[command(flatten)]
        irmad: IrMadArgs,
    },
}

#[derive(Args)]
struct IrMadArgs {
    /// Maximum number of IR-MAD iterations
    #[arg(long, default_value = "30")]
    max_iterations: usize,
    /// Stop when the canonical correlation change falls below this
    #[arg(long, default_value = "1e-4")]
    tolerance: f64,
    /// Samples pushed per batch
    #[arg(long, default_value = "65536")]
    batch_size: usize,
    /// Samples at or below this no-change probability are left out of the band fit
    #[arg(long, default_value = "0.0")]
    weight_cutoff: f64,
    /// Band regression: ols or huber
    #[arg(short, long, default_value = "ols")]
    regressor: Regressor,
}

impl IrMadArgs {
    fn params(&self) -> IrMadParams {
        IrMadParams {
            max_iterations: self.max_iterations,
            tolerance: self.tolerance,
            batch_size: self.batch_size,
            weight_cutoff: self.weight_cutoff,
            regressor: self.regressor,
        }
    }
}

// ─── Helpers ────────────────────────────────────────────────────────────

fn setup_logging(verbose: bool) -> Result<()> {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("setting default subscriber failed")
}

fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{spinner:.green} {msg}") {
        pb.set_style(style);
    }
    pb.set_message(msg.to_string());
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    pb
}

fn read_samples(path: &Path) -> Result<Array2<f64>> {
    let pb = spinner("Reading samples...");
    let samples: Array2<f64> = read_npy(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    pb.finish_and_clear();
    info!("Input: {} samples x {} bands", samples.nrows(), samples.ncols());
    Ok(samples)
}

fn write_array<D: ndarray::Dimension>(array: &ndarray::Array<f64, D>, path: &Path) -> Result<()> {
    write_npy(path, array).with_context(|| format!("Failed to write {}", path.display()))
}

fn run_irmad(x: &Array2<f64>, y: &Array2<f64>, params: &IrMadParams) -> Result<IrMadOutcome> {
    let pb = spinner("IR-MAD iteration 1...");
    let outcome = irmad_with_progress(x.view(), y.view(), params, |iteration, change| {
        match change {
            Some(change) => pb.set_message(format!(
                "IR-MAD iteration {} (correlation change {:.2e})",
                iteration + 1,
                change
            )),
            None => pb.set_message(format!("IR-MAD iteration {}", iteration + 1)),
        }
    })
    .map_err(|e| {
        let hint = if e.is_insufficient_data() {
            "not enough valid samples"
        } else if e.is_degenerate() {
            "bands are constant or collinear"
        } else {
            "IR-MAD failed"
        };
        anyhow::Error::new(e).context(hint)
    })?;
    pb.finish_and_clear();
    Ok(outcome)
}

fn report(outcome: &IrMadOutcome) {
    println!(
        "Iterations: {}{}",
        outcome.iterations,
        if outcome.converged { " (converged)" } else { " (iteration limit reached)" }
    );
    if let Some(change) = outcome.last_change {
        println!("Last correlation change: {:.3e}", change);
    }
    if let Some(correlations) = outcome.controller.canonical_correlations() {
        let formatted: Vec<String> = correlations.iter().map(|c| format!("{:.5}", c)).collect();
        println!("Canonical correlations: [{}]", formatted.join(", "));
    }
    println!("Band transformation (after -> before):");
    for (band, row) in outcome.band_transform.rows().into_iter().enumerate() {
        println!("  band {}: intercept {:+.5}, scale {:.5}", band, row[0], row[1]);
    }
}

fn done(name: &str, path: &Path, elapsed: std::time::Duration) {
    println!("{} saved to: {}", name, path.display());
    println!("  Processing time: {:.2?}", elapsed);
}

// ─── Main ───────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose)?;

    match cli.command {
        Commands::Info { input } => {
            let samples = read_samples(&input)?;
            println!("File: {}", input.display());
            println!("Samples: {}", samples.nrows());
            println!("Bands: {}", samples.ncols());
            println!("\nStatistics:");
            for (band, column) in samples.axis_iter(Axis(1)).enumerate() {
                let min = column.iter().copied().fold(f64::INFINITY, f64::min);
                let max = column.iter().copied().fold(f64::NEG_INFINITY, f64::max);
                let mean = column.mean().unwrap_or(f64::NAN);
                println!("  band {}: min {:.4}, max {:.4}, mean {:.4}", band, min, max, mean);
            }
        }

        Commands::Run {
            before,
            after,
            weights,
            transform,
            normalized,
            irmad,
        } => {
            let x = read_samples(&before)?;
            let y = read_samples(&after)?;
            let params = irmad.params();

            let start = Instant::now();
            let outcome = run_irmad(&x, &y, &params)?;
            let elapsed = start.elapsed();
            report(&outcome);

            write_array(&outcome.weights, &weights)?;
            done("No-change probability", &weights, elapsed);
            write_array(&outcome.band_transform, &transform)?;
            done("Band transformation", &transform, elapsed);

            if let Some(path) = normalized {
                let scales = outcome.band_transform.column(1);
                let intercepts = outcome.band_transform.column(0);
                let mapped = &y * &scales + &intercepts;
                write_array(&mapped, &path)?;
                done("Normalized image", &path, elapsed);
            }
        }

        Commands::Synthetic {
            rows,
            cols,
            bands,
            noise,
            change_fraction,
            change_magnitude,
            rotate,
            seed,
            alpha,
            irmad,
        } => {
            let scene = generate_scene(&SceneParams {
                rows,
                cols,
                bands,
                noise_std: noise,
                change_fraction,
                change_magnitude,
                rotate,
                seed,
            });
            info!(
                "Scene: {} x {} pixels, {} bands, {} changed",
                cols,
                rows,
                bands,
                scene.changed_count()
            );

            let start = Instant::now();
            let outcome = run_irmad(&scene.x, &scene.y, &irmad.params())?;
            let elapsed = start.elapsed();
            report(&outcome);

            let mut hits = 0usize;
            let mut false_alarms = 0usize;
            for (&p, &changed) in outcome.weights.iter().zip(scene.changed.iter()) {
                match (p < alpha, changed) {
                    (true, true) => hits += 1,
                    (true, false) => false_alarms += 1,
                    _ => {}
                }
            }
            let changed = scene.changed_count();
            let unchanged = scene.changed.len() - changed;
            println!(
                "Detection rate: {:.1}% ({} of {})",
                100.0 * hits as f64 / changed.max(1) as f64,
                hits,
                changed
            );
            println!(
                "False alarm rate: {:.2}% ({} of {})",
                100.0 * false_alarms as f64 / unchanged.max(1) as f64,
                false_alarms,
                unchanged
            );
            if !rotate {
                println!("True transformation:");
                for band in 0..bands {
                    let gain = scene.gains[band];
                    println!(
                        "  band {}: intercept {:+.5}, scale {:.5}",
                        band,
                        -scene.offsets[band] / gain,
                        1.0 / gain
                    );
                }
            }
            println!("  Processing time: {:.2?}", elapsed);
        }
    }

    Ok(())
}
