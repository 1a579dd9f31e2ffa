//! docsync-tail - Replay change batches through a checkpointed observer.

use std::sync::Arc;

use clap::Parser;
use parking_lot::Mutex;
use tokio::io::BufReader;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use docsync_cli::config::DEFAULT_LOG_FILTER;
use docsync_cli::{run, show_watermark, Args};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Events go to stdout, logs to stderr.
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();
    let config = args.into_config();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        data_path = %config.data_path.display(),
        store_key = %config.store_key,
        field = %config.observer.last_updated_field,
        deleted_field = %config.observer.deleted_field,
        "configuration loaded"
    );

    let db = sled::open(&config.data_path)?;

    if config.show_watermark {
        show_watermark(&db, &config, &mut std::io::stdout()).await?;
        return Ok(());
    }

    let out = Arc::new(Mutex::new(std::io::stdout()));
    let summary = match &config.input {
        Some(path) => {
            let file = tokio::fs::File::open(path).await?;
            run(&db, &config, BufReader::new(file), out).await
        }
        None => run(&db, &config, BufReader::new(tokio::io::stdin()), out).await,
    };

    match summary {
        Ok(summary) => {
            tracing::info!(
                batches = summary.batches_read,
                events = summary.events_emitted,
                "done"
            );
        }
        Err(e) => {
            tracing::error!(error = %e, "tail failed");
            return Err(e.into());
        }
    }

    db.flush_async().await?;
    Ok(())
}
