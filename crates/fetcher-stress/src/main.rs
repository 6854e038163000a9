use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;

use fetcher_service::config::Config;
use fetcher_service::{logging, metrics};

use crate::stresstest::perform_stresstest;
use crate::workloads::WorkloadsConfig;

mod stresstest;
mod workloads;

/// Command line interface parser.
#[derive(Parser)]
#[command(name = "fetcher-stress", version)]
struct Cli {
    /// Path to your configuration file.
    #[arg(long, short, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Path to the workload definition file.
    #[arg(long, short, value_name = "FILE")]
    workloads: PathBuf,

    /// Duration of the stresstest.
    #[arg(long, short, value_parser = humantime::parse_duration)]
    duration: Duration,
}

fn main() {
    if let Err(error) = execute() {
        logging::ensure_log_error(&error);
        std::process::exit(1);
    }
}

fn execute() -> Result<()> {
    let cli = Cli::parse();

    // parse configs
    let config = Config::get(cli.config.as_deref()).context("failed loading config")?;
    let workloads = WorkloadsConfig::from_path(&cli.workloads)?;

    // SAFETY: no threads have been spawned at this point
    unsafe { logging::init_logging(&config.logging) };

    let _sentry = sentry::init(sentry::ClientOptions {
        dsn: config.sentry_dsn.clone(),
        release: sentry::release_name!(),
        ..Default::default()
    });

    if let Some(ref statsd) = config.metrics.statsd {
        metrics::configure_statsd(
            &config.metrics.prefix,
            statsd.as_str(),
            config.metrics.custom_tags.clone(),
        )?;
    }

    perform_stresstest(&config, workloads, cli.duration)
}
