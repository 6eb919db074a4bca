use std::path::PathBuf;

use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use expcompiler_backend::*;
use expctrl_backend::config::ExperimentConfig;
use expctrl_backend::CtrlResult;

/// Compiles the experiment described by a TOML file and streams it to its device servers.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Experiment configuration file
    config: PathBuf,
    /// Number of repetitions, overrides `stream.nreps`
    #[arg(long)]
    nreps: Option<usize>,
    /// Streaming buffer length in milliseconds, overrides `stream.bufsize_ms`
    #[arg(long)]
    bufsize_ms: Option<f64>,
    /// Compile and report without connecting to any device server
    #[arg(long)]
    dry_run: bool,
}

fn main() -> CtrlResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let args = Args::parse();

    let cfg = ExperimentConfig::from_file(&args.config)?;
    let nreps = args.nreps.unwrap_or(cfg.stream.nreps);
    let bufsize_ms = args.bufsize_ms.unwrap_or(cfg.stream.bufsize_ms);
    let mut exp = cfg.build_experiment()?;
    info!(
        "Compiled {} devices, run time {} s",
        exp.compiled_devices().len(),
        exp.total_run_time()
    );

    if args.dry_run {
        for dev in exp.compiled_devices() {
            info!(
                "{} ({}): {} samples, {} s",
                dev.name(),
                dev.task_type(),
                dev.total_samps(),
                dev.total_run_time()
            );
            for (port, table) in dev.port_tables() {
                info!("{} port{} transitions:\n{}", dev.name(), port, table);
            }
        }
        return Ok(());
    }

    let nconnected = cfg.connect_instruments(&mut exp)?;
    if nconnected == 0 {
        warn!("No device has an address, nothing to stream");
        return Ok(());
    }
    exp.reset_devices()?;
    exp.stream_exp(bufsize_ms, nreps)
}
