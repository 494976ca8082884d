//! Reimbursement ledger node
//!
//! Runs an engine over the in-memory transfer provider and logs the audit
//! stream. The ledger snapshot is rewritten after every committed change.

use anyhow::Context;
use reimbursement_ledger::{Config, InMemoryTransferProvider, ReimbursementEngine};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = match std::env::var("REIMBURSE_CONFIG") {
        Ok(path) => Config::from_file(&path).with_context(|| format!("loading {}", path))?,
        Err(_) => Config::from_env().context("loading config from environment")?,
    };

    // Initialize tracing
    let filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(tracing::Level::INFO.into());
    if config.log_format == "json" {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    tracing::info!(service = %config.service_name, "Starting reimbursement node");

    let provider = Arc::new(InMemoryTransferProvider::new(config.engine_account()));
    let snapshot = config.snapshot_path();
    let engine = Arc::new(
        ReimbursementEngine::new(&config, provider)?.with_snapshot_path(snapshot.clone()),
    );

    if engine.restore_snapshot(&snapshot).await? {
        tracing::info!(
            records = engine.record_count(),
            chain_ok = engine.verify_audit_chain(),
            "Ledger restored"
        );
    }

    let mut events = engine.subscribe();
    let audit_task = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(envelope) => tracing::info!(
                    sequence = envelope.sequence,
                    kind = envelope.event.kind(),
                    actor = %envelope.actor,
                    hash = %envelope.hash,
                    "audit"
                ),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "audit subscriber lagged")
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    tokio::signal::ctrl_c().await?;

    tracing::info!("Shutting down reimbursement node");
    engine
        .save_snapshot(&snapshot)
        .await
        .context("saving snapshot")?;
    audit_task.abort();

    match engine.metrics().render() {
        Ok(text) => tracing::debug!(%text, "final metrics"),
        Err(e) => tracing::warn!(error = %e, "metrics render failed"),
    }
    Ok(())
}
