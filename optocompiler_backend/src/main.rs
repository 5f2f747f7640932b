//! Command-line front end: compiles a saved experiment into an Arduino sketch.
//!
//! ```bash
//! # Print the sketch
//! optocompiler experiment.json
//!
//! # Write <sketchbook>/experiment/experiment.ino
//! optocompiler experiment.json --output ~/Arduino
//!
//! # Only report the memory estimate
//! optocompiler experiment.json --estimate
//! ```

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use optocompiler_backend::config::CompilerConfig;
use optocompiler_backend::experiment::{BaseExperiment, Experiment};
use optocompiler_backend::memory::{MemoryStatus, Severity};
use optocompiler_backend::sketch::{sketch_dir, write_sketch};

/// Compile optoPlate-96 experiments into Arduino sketches
#[derive(Parser, Debug)]
#[command(name = "optocompiler")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Saved experiment (JSON)
    save: PathBuf,

    /// Arduino sketchbook to write the sketch into; prints to stdout when absent
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Replace an existing sketch of the same name
    #[arg(long)]
    overwrite: bool,

    /// Sketch template overriding the built-in one
    #[arg(short, long)]
    template: Option<PathBuf>,

    /// Compiler settings (TOML)
    #[arg(short, long, env = "OPTOCOMPILER_CONFIG")]
    config: Option<PathBuf>,

    /// Only print the memory estimate
    #[arg(long)]
    estimate: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "RUST_LOG")]
    log_level: String,
}

fn setup_logging(cli: &Cli) {
    let log_level = cli
        .log_level
        .parse::<tracing::Level>()
        .unwrap_or(tracing::Level::INFO);

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env().add_directive(log_level.into()))
        .init();
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    setup_logging(&cli);

    let mut config = match &cli.config {
        Some(path) => CompilerConfig::from_path(path)
            .with_context(|| format!("loading settings from {}", path.display()))?,
        None => CompilerConfig::default(),
    };
    if cli.template.is_some() {
        config.template = cli.template.clone();
    }

    let exp = Experiment::from_path(&cli.save)
        .with_context(|| format!("loading {}", cli.save.display()))?;
    info!("{}", exp.corrections_status());
    info!("{}", exp.fan_status());

    if cli.estimate {
        let status = exp.estimate(&config);
        if let MemoryStatus::Unavailable(reason) = &status {
            warn!("{}", reason);
        }
        println!("{}", status);
        return Ok(());
    }

    let sketch = exp.compile(&config).context("compiling sketch")?;
    match sketch.memory.severity() {
        Severity::Ok => info!("{}", sketch.memory),
        _ => warn!("{}", sketch.memory),
    }

    match &cli.output {
        Some(sketchbook) => {
            let dir = sketch_dir(sketchbook, Some(cli.save.as_path()), cli.overwrite)?;
            let path = write_sketch(&dir, &sketch.code)?;
            println!("{}", path.display());
        }
        None => print!("{}", sketch.code),
    }
    Ok(())
}
