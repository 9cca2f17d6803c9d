mod batch;

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use prometheus::{Encoder, Registry, TextEncoder};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use clipq_core::{
    load_config_or_default, metrics, validate_config, ChannelListener, FfmpegTranscoder,
    OperationEvent, OperationId, SystemMemoryProbe, Transcoder, VideoEditor,
};

use batch::BatchFile;

/// Progress samples buffered before the oldest are dropped.
const PROGRESS_BUFFER: usize = 256;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let batch_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .context("Usage: clipq <batch.toml>")?;

    // Determine config path
    let config_path = std::env::var("CLIPQ_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("clipq.toml"));

    info!("Loading configuration from {:?}", config_path);
    let config = load_config_or_default(&config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;
    validate_config(&config).context("Configuration validation failed")?;
    info!(
        max_concurrent = config.scheduler.max_concurrent,
        ceiling_ratio = config.memory.ceiling_ratio,
        "Configuration loaded"
    );

    let batch = BatchFile::load(&batch_path)?;
    if batch.operation.is_empty() {
        warn!("Batch file {:?} has no operations", batch_path);
        return Ok(());
    }

    let transcoder = FfmpegTranscoder::new(config.transcoder.clone());
    transcoder
        .validate()
        .await
        .context("Transcoder is not usable")?;
    info!("Using transcoder: {}", transcoder.name());

    let registry = Registry::new();
    for metric in metrics::all_metrics() {
        registry
            .register(metric)
            .context("Failed to register metrics")?;
    }

    let probe = Arc::new(SystemMemoryProbe::new(config.memory.max_bytes));
    let editor = VideoEditor::new(&config, transcoder, probe);
    editor.start();

    let (listener, mut events) = ChannelListener::new(PROGRESS_BUFFER);
    let listener = Arc::new(listener);

    let stamp = chrono::Utc::now().timestamp_millis();
    let mut outstanding: HashSet<OperationId> = HashSet::new();
    let mut failed = 0usize;
    for (index, op) in batch.operation.iter().enumerate() {
        let request = op.to_request(
            &config.output.dir,
            &config.executor.output_extension,
            stamp,
            index,
        );
        match editor.submit(request, op.priority, listener.clone()) {
            Ok(id) => {
                outstanding.insert(id);
            }
            Err(e) => {
                error!(index, "Rejected operation: {}", e);
                failed += 1;
            }
        }
    }
    drop(listener);

    let mut succeeded = 0usize;
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);
    while !outstanding.is_empty() {
        tokio::select! {
            _ = &mut shutdown => {
                warn!(remaining = outstanding.len(), "Interrupted, cancelling remaining operations");
                break;
            }
            event = events.recv() => {
                let Some(event) = event else {
                    break;
                };
                match event {
                    OperationEvent::Progress(update) => {
                        info!(
                            id = %update.id,
                            kind = %update.kind,
                            percent = (update.fraction * 100.0).round() as u32,
                            memory_mb = update.memory_usage_bytes / (1024 * 1024),
                            eta_secs = update.eta.map(|d| d.as_secs()),
                            "Progress"
                        );
                    }
                    OperationEvent::Succeeded { id, output } => {
                        info!(%id, "Saved {:?}", output);
                        outstanding.remove(&id);
                        succeeded += 1;
                    }
                    OperationEvent::Failed { id, error } => {
                        error!(%id, kind = %error.kind, "Operation failed: {}", error.message);
                        outstanding.remove(&id);
                        failed += 1;
                    }
                }
            }
        }
    }

    editor.shutdown().await;

    if let Ok(path) = std::env::var("CLIPQ_METRICS_OUT") {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&registry.gather(), &mut buffer)
            .context("Failed to encode metrics")?;
        std::fs::write(&path, buffer)
            .with_context(|| format!("Failed to write metrics to {}", path))?;
        info!("Metrics written to {}", path);
    }

    info!(succeeded, failed, "Batch finished");
    if failed > 0 || !outstanding.is_empty() {
        bail!(
            "{} operation(s) failed, {} unfinished",
            failed,
            outstanding.len()
        );
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
