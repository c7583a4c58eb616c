//! `tableside-sync`: runs the sync engine against the REST API.
//!
//! Configuration comes from `TABLESIDE_*` environment variables; engine
//! events are logged until Ctrl-C.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::RecvTimeoutError;
use std::time::Duration;

use anyhow::Context;

use tableside_events::SyncEvent;
use tableside_offline::{
    ConnectivityMonitor, HttpProbe, HttpRemote, SqliteStore, SyncConfig, SyncEngine,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = SyncConfig::from_env().context("invalid configuration")?;
    tableside_observability::init_with(&config.log);

    let store = match &config.db_path {
        Some(path) => SqliteStore::open(path),
        None => SqliteStore::open_default()?,
    };
    tracing::info!(api_url = %config.api_url, db = ?store.path(), "starting tableside-sync");

    let remote = Arc::new(HttpRemote::new(&config).context("failed to build HTTP client")?);
    let registry = remote.handler_registry()?;
    let probe = HttpProbe::new(&config).context("failed to build health probe")?;
    let monitor = Arc::new(ConnectivityMonitor::new(Arc::new(probe)));

    let engine = Arc::new(
        SyncEngine::builder(Arc::new(store.clone()), monitor.clone(), registry, remote)
            .max_attempts(config.max_attempts)
            .build(),
    );

    let stopped = Arc::new(AtomicBool::new(false));
    let logger = spawn_event_logger(&engine, stopped.clone());

    let engine_handle = engine.start().await;
    let polling = monitor.spawn_polling(config.probe_interval, config.debounce);

    match engine.pending().await {
        Ok(pending) => tracing::info!(pending = pending.len(), "pending operations at startup"),
        Err(err) => tracing::error!(error = %err, "failed to read pending operations"),
    }

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    tracing::info!("shutdown requested");

    polling.shutdown().await;
    engine_handle.shutdown().await;
    stopped.store(true, Ordering::SeqCst);
    if let Err(err) = logger.await {
        tracing::warn!(error = %err, "event logger ended abnormally");
    }
    store.close().await;

    tracing::info!("tableside-sync stopped");
    Ok(())
}

/// Log engine events on a blocking thread until `stopped` is set.
fn spawn_event_logger(engine: &SyncEngine, stopped: Arc<AtomicBool>) -> tokio::task::JoinHandle<()> {
    let subscription = engine.subscribe();

    tokio::task::spawn_blocking(move || {
        while !stopped.load(Ordering::SeqCst) {
            match subscription.recv_timeout(Duration::from_millis(250)) {
                Ok(event) => log_event(&event),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
    })
}

fn log_event(event: &SyncEvent) {
    match event {
        SyncEvent::Connectivity { online, .. } => {
            tracing::info!(online, "connectivity event");
        }
        SyncEvent::SyncComplete {
            success,
            applied,
            failed,
            skipped,
            dead_lettered,
            error,
            ..
        } => {
            if *success {
                tracing::info!(applied, "sync complete");
            } else {
                tracing::warn!(applied, failed, skipped, dead_lettered, error = ?error, "sync incomplete");
            }
        }
        SyncEvent::OperationApplied {
            id,
            operation,
            replayed,
            ..
        } => {
            tracing::debug!(%id, %operation, replayed, "operation applied");
        }
    }
}
