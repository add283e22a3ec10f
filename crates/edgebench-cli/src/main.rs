// SPDX-License-Identifier: AGPL-3.0-only

//! `edgebench`: command-line front end for inference benchmark sweeps.
//!
//! ```text
//! USAGE:
//!   edgebench run [--config sweep.toml] [overrides]   Run a sweep
//!   edgebench models [--models-dir DIR]               List the model catalog
//!   edgebench pack-model <out> [--height ..]          Write a reference model
//!   edgebench config                                  Print the default config
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use edgebench_engine::{Delegate, Device, ReferenceEngine, ReferenceModelSpec};
use edgebench_models::ModelCatalog;
use edgebench_sweep::{
    events, EventSender, SweepConfig, SweepController, SweepRunner, SweepSummary, UiBridge,
};
use std::path::{Path, PathBuf};
use std::sync::{mpsc, Arc};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "edgebench", about = "Image-classification inference benchmark", version)]
struct Cli {
    /// Raise log verbosity (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Run a benchmark sweep.
    Run {
        /// TOML sweep configuration (defaults apply without one).
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Override the model directory.
        #[arg(long)]
        models_dir: Option<PathBuf>,
        /// Override the image directory.
        #[arg(long)]
        dataset_dir: Option<PathBuf>,
        /// Override the label file.
        #[arg(long)]
        labels: Option<PathBuf>,
        /// Devices to sweep (cpu, cpu-multi, gpu, nnapi, edge).
        #[arg(long, value_delimiter = ',')]
        devices: Vec<Device>,
        /// Model families to sweep.
        #[arg(long, value_delimiter = ',')]
        families: Vec<String>,
        /// Batch sizes to sweep.
        #[arg(long, value_delimiter = ',')]
        batch_sizes: Vec<usize>,
        /// Rounds per tier.
        #[arg(long)]
        rounds: Option<usize>,
        /// CSV output path.
        #[arg(long)]
        csv: Option<PathBuf>,
        /// Directory for per-tier JSON results.
        #[arg(long)]
        results_dir: Option<PathBuf>,
        /// Per-inference timeout in milliseconds.
        #[arg(long)]
        timeout_ms: Option<u64>,
        /// Treat these delegates as unavailable on this host (gpu, nnapi, edgetpu).
        #[arg(long, value_delimiter = ',')]
        disable_delegate: Vec<String>,
    },
    /// List model families and models.
    Models {
        /// Model directory.
        #[arg(long, default_value = "models")]
        models_dir: PathBuf,
    },
    /// Write a reference-engine model file.
    PackModel {
        /// Output path; include "quant" in the name for a quantized model.
        output: PathBuf,
        /// Input height.
        #[arg(long, default_value_t = 224)]
        height: usize,
        /// Input width.
        #[arg(long, default_value_t = 224)]
        width: usize,
        /// Output classes.
        #[arg(long, default_value_t = 1001)]
        classes: usize,
    },
    /// Print the default sweep configuration as TOML.
    Config,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| default_level.into()),
        )
        .init();

    match cli.command {
        Cmd::Run {
            config,
            models_dir,
            dataset_dir,
            labels,
            devices,
            families,
            batch_sizes,
            rounds,
            csv,
            results_dir,
            timeout_ms,
            disable_delegate,
        } => {
            let mut cfg = match config {
                Some(path) => SweepConfig::from_file(&path)?,
                None => SweepConfig::default(),
            };
            if let Some(dir) = models_dir {
                cfg.models_dir = dir;
            }
            if let Some(dir) = dataset_dir {
                cfg.dataset_dir = dir;
            }
            if let Some(path) = labels {
                cfg.labels_path = path;
            }
            if !devices.is_empty() {
                cfg.devices = devices;
            }
            if !families.is_empty() {
                cfg.families = families;
            }
            if !batch_sizes.is_empty() {
                cfg.batch_sizes = batch_sizes;
            }
            if let Some(n) = rounds {
                cfg.rounds = n;
            }
            if let Some(path) = csv {
                cfg.output.csv_path = Some(path);
            }
            if let Some(dir) = results_dir {
                cfg.output.results_dir = Some(dir);
            }
            if let Some(ms) = timeout_ms {
                cfg.inference_timeout_ms = Some(ms);
            }
            cmd_run(cfg, &disable_delegate)?;
        }
        Cmd::Models { models_dir } => cmd_models(&models_dir)?,
        Cmd::PackModel {
            output,
            height,
            width,
            classes,
        } => cmd_pack_model(&output, height, width, classes)?,
        Cmd::Config => print!("{}", SweepConfig::default().to_toml()?),
    }

    Ok(())
}

/// Prints worker events to the terminal
struct Console;

impl UiBridge for Console {
    fn on_log_line(&mut self, line: &str) {
        println!("{line}");
    }

    fn on_sweep_complete(&mut self, summary: &SweepSummary) {
        println!();
        println!("Sweep finished in {:.1}s", summary.elapsed.as_secs_f64());
        println!("  models run       : {}", summary.models_run);
        println!("  models skipped   : {}", summary.models_skipped);
        println!("  load failures    : {}", summary.load_failures);
        println!("  batches executed : {}", summary.batches_executed);
        println!("  inference fails  : {}", summary.inference_failures);
        println!("  prepare fails    : {}", summary.prepare_failures);
        println!("  aborted combos   : {}", summary.aborted_combinations);
        println!("  tiers stored     : {}", summary.tiers_persisted);
        println!("  csv rows         : {}", summary.csv_rows);
        if summary.output_errors > 0 {
            println!("  output errors    : {}", summary.output_errors);
        }
        if summary.cancelled {
            println!("  (cancelled)");
        }
    }
}

fn parse_delegate(name: &str) -> Result<Delegate> {
    match name.to_ascii_lowercase().as_str() {
        "gpu" => Ok(Delegate::Gpu),
        "nnapi" => Ok(Delegate::Nnapi),
        "edgetpu" | "edge" => Ok(Delegate::EdgeTpu),
        other => anyhow::bail!("unknown delegate '{other}' (expected gpu, nnapi, edgetpu)"),
    }
}

fn cmd_run(config: SweepConfig, disabled: &[String]) -> Result<()> {
    let mut engine = ReferenceEngine::new();
    for name in disabled {
        let delegate = parse_delegate(name)?;
        info!("Delegate {delegate} disabled");
        engine = engine.without_delegate(delegate);
    }

    let (tx, rx) = mpsc::channel();
    let controller = SweepController::new(Arc::new(config), Arc::new(engine))
        .with_events(EventSender::new(tx));

    let runner = SweepRunner::new();
    let handle = runner.start(controller)?;

    println!("Tests start");
    events::pump(&rx, &mut Console);

    let summary = handle.wait()?;
    if summary.aborted_combinations > 0 && summary.models_run == 0 {
        anyhow::bail!("sweep could not run any model (see log above)");
    }
    Ok(())
}

fn cmd_models(models_dir: &Path) -> Result<()> {
    ModelCatalog::new(models_dir)
        .print_status()
        .with_context(|| format!("listing {}", models_dir.display()))
}

fn cmd_pack_model(output: &Path, height: usize, width: usize, classes: usize) -> Result<()> {
    let name = output
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let quantized = name.contains(edgebench_models::QUANTIZED_MARKER);

    let spec = ReferenceModelSpec::new(height, width, classes, quantized);
    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(output, spec.pack())
        .with_context(|| format!("writing {}", output.display()))?;

    println!(
        "Wrote {} ({}x{}x3 → {classes}, {})",
        output.display(),
        height,
        width,
        if quantized { "u8" } else { "f32" }
    );
    Ok(())
}
