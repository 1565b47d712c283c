use anyhow::{Context, Result};
use clap::Parser;
use lorawan_ingest::{Aggregator, Config, UplinkEnvelope};
use serde_json::Value;
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::io::AsyncReadExt;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Decode LoRaWAN uplink envelopes into a time-ordered reading series
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Envelope files (one JSON object, a JSON array, or JSON lines). Reads stdin if none.
    files: Vec<PathBuf>,

    /// TOML config file
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Override the number of concurrent decode tasks
    #[arg(long)]
    workers: Option<usize>,

    /// Exit with an error if any envelope was skipped for an error reason
    #[arg(long)]
    strict: bool,
}

/// Split one input document into envelope JSON values
fn split_documents(text: &str) -> Vec<serde_json::Result<Value>> {
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Array(items)) => items.into_iter().map(Ok).collect(),
        Ok(value) => vec![Ok(value)],
        // Not a single document: treat as JSON lines
        Err(_) => text
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(serde_json::from_str)
            .collect(),
    }
}

async fn read_input(path: Option<&Path>) -> Result<String> {
    match path {
        Some(path) => tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display())),
        None => {
            let mut text = String::new();
            tokio::io::stdin()
                .read_to_string(&mut text)
                .await
                .context("Failed to read stdin")?;
            Ok(text)
        }
    }
}

#[tokio::main(flavor = "multi_thread", worker_threads = 2)]
async fn main() -> Result<()> {
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::registry()
        .with(EnvFilter::new(filter))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::from_env()?,
    };
    if let Some(workers) = args.workers {
        config.ingest.workers = workers;
    }
    config.ingest.strict |= args.strict;
    config.validate()?;

    let mut documents = Vec::new();
    if args.files.is_empty() {
        documents.extend(split_documents(&read_input(None).await?));
    } else {
        for path in &args.files {
            documents.extend(split_documents(&read_input(Some(path)).await?));
        }
    }
    info!(envelopes = documents.len(), workers = config.ingest.workers, "📡 Starting ingest");

    let aggregator = Aggregator::from_config(&config);
    let inputs = documents
        .into_iter()
        .map(|doc| doc.map_err(Into::into).and_then(UplinkEnvelope::from_json));
    let outcome = aggregator.ingest_concurrent(inputs).await;

    let stdout = std::io::stdout();
    let mut out = std::io::BufWriter::new(stdout.lock());
    for reading in &outcome.series {
        serde_json::to_writer(&mut out, reading)?;
        writeln!(out)?;
    }
    out.flush()?;

    for (reason, count) in outcome.report.counts() {
        if reason.is_error() {
            warn!(?reason, count, "⚠️ Skipped envelopes");
        } else {
            info!(?reason, count, "Skipped envelopes");
        }
    }
    info!(
        run_id = %outcome.run_id,
        readings = outcome.series.len(),
        skipped = outcome.report.total(),
        "✅ Done"
    );

    if config.ingest.strict && !outcome.report.is_clean() {
        anyhow::bail!(
            "{} envelope(s) skipped with errors (strict mode)",
            outcome.report.error_count()
        );
    }

    Ok(())
}
