use anyhow::{Context, Result};
use clap::Parser;
use ingest_replay::cli::Args;
use ingest_replay::config::Config;
use ingest_replay::readings::{filter_by_time_range, load_readings, time_span};
use ingest_replay::replay::{Replayer, TokioPacer};
use ingest_replay::signer::Signer;
use ingest_replay::transport::HttpTransport;
use tokio_util::sync::CancellationToken;

fn init_tracing() -> Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,ingest_replay=info".into());
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .try_init()
        .map_err(|err| anyhow::anyhow!(err.to_string()))?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = Config::from_env(args)?;
    init_tracing()?;

    tracing::info!(path = %config.csv_path.display(), "loading readings");
    let loaded = load_readings(&config.csv_path)?;
    if !loaded.skipped.is_empty() {
        tracing::warn!(
            skipped = loaded.skipped.len(),
            kept = loaded.readings.len(),
            "dropped invalid rows"
        );
    }
    let readings = filter_by_time_range(loaded.readings, &config.time_range);

    let transport = HttpTransport::new(&config.api_url, config.request_timeout)
        .context("failed to build HTTP client")?;

    match time_span(&readings) {
        Some((first, last)) => tracing::info!(
            readings = readings.len(),
            first = %first.to_rfc3339(),
            last = %last.to_rfc3339(),
            speed = config.speed,
            batch_size = config.batch_size.get(),
            device_id = %config.device_id,
            endpoint = transport.endpoint(),
            "starting replay"
        ),
        None => tracing::warn!("no valid readings to replay"),
    }

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received; stopping after the current batch");
            signal_cancel.cancel();
        }
    });

    let signer = Signer::new(&config.hmac_secret)
        .map_err(|err| anyhow::anyhow!("invalid HMAC secret: {err}"))?;
    let replayer = Replayer::new(
        signer,
        config.device_id.clone(),
        config.batch_size,
        config.speed,
    );
    let report = replayer
        .run(readings, &transport, &TokioPacer, &cancel)
        .await;
    if report.interrupted {
        tracing::info!("replay interrupted by user");
    }

    Ok(())
}
