//! `btc_logger`: log heating power and temperatures of a Büchi controller.
//!
//! ```bash
//! btc_logger /dev/ttyUSB0 -t 10 -f bath.csv
//! ```
//!
//! Stops on Ctrl-C after finishing the current row. Diagnostics go to
//! stderr; on success nothing but the log file is written.

use anyhow::Context;
use clap::Parser;
use rust_btc::config::Settings;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Log data from a Büchi temperature controller to a CSV file.
#[derive(Parser, Debug)]
#[command(name = "btc_logger", version, about)]
struct Args {
    /// Serial port of the controller (e.g. /dev/ttyUSB0, COM3).
    ///
    /// Required unless `serial.port` is set in the config file or through
    /// BTC_SERIAL__PORT.
    port: Option<String>,

    /// Logging interval in seconds
    #[arg(short, long)]
    timestep: Option<f64>,

    /// CSV file to append to (default: <timestamp>_btc_log.csv)
    #[arg(short, long)]
    filepath: Option<PathBuf>,

    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Stop after this many rows
    #[arg(long)]
    ticks: Option<u64>,
}

impl Args {
    fn apply(self, settings: &mut Settings) {
        if let Some(port) = self.port {
            settings.serial.port = port;
        }
        if let Some(timestep) = self.timestep {
            settings.logger.interval_secs = timestep;
        }
        if let Some(filepath) = self.filepath {
            settings.logger.output = Some(filepath);
        }
        if let Some(ticks) = self.ticks {
            settings.logger.max_ticks = Some(ticks);
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut settings = Settings::load(args.config.as_deref())?;
    args.apply(&mut settings);

    // RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&settings.application.log_level))
        .context("invalid log level")?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    settings
        .validate()
        .context("no usable settings (is the serial port given?)")?;
    run(settings).await
}

#[cfg(feature = "tokio_serial")]
async fn run(settings: Settings) -> anyhow::Result<()> {
    use rust_btc::data::Sampler;
    use rust_btc::hardware::BuchiController;

    let controller = BuchiController::open(&settings.serial)?;
    match controller.version().await {
        Ok(version) => tracing::info!("Controller firmware {}", version),
        Err(e) => tracing::warn!("Could not read controller version: {}", e),
    }

    let mut sampler = Sampler::from_config(&controller, &settings.logger)?;
    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    let report = sampler
        .run(shutdown)
        .await
        .with_context(|| format!("logging to '{}' failed", sampler.path().display()))?;
    tracing::info!(
        "Wrote {} rows to {} ({} incomplete)",
        report.ticks,
        sampler.path().display(),
        report.failed_ticks
    );
    Ok(())
}

#[cfg(not(feature = "tokio_serial"))]
async fn run(_settings: Settings) -> anyhow::Result<()> {
    Err(rust_btc::error::BtcError::FeatureNotEnabled("tokio_serial".to_string()).into())
}
