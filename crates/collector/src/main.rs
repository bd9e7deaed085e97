//! playreport-ingest: read a runner event stream from stdin and write the
//! report document.

use std::path::PathBuf;

use anyhow::{Context, Result};
use playreport_collector::{drive, Collector};
use playreport_common::{ReporterOptions, VERSION};
use tracing::{error, info};

const DEFAULT_CONFIG: &str = "playreport.toml";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    info!("playreport-ingest {}", VERSION);

    let config_path = std::env::var("PLAYREPORT_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG));
    let options = ReporterOptions::load(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?
        .apply_env();
    options.validate()?;

    info!("Writing report to {}", options.output_dir.display());
    let mut collector = Collector::new(options);
    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let summary = drive(stdin, &mut collector).await?;

    info!(
        "Processed {} event(s), {} attempt(s), {} malformed line(s)",
        summary.events, summary.attempts, summary.malformed
    );

    match summary.report {
        Some(path) => {
            info!("Report ready: {}", path.display());
            Ok(())
        }
        None => {
            error!("No report was written");
            std::process::exit(1);
        }
    }
}
