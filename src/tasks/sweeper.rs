use anyhow::Result;
use tokio::sync::watch;
use tokio::time::{interval, Duration};

use crate::core::state::AppState;
use crate::services::session::SessionEngine;

/// Periodic sweep over expired attempts. Lazy expiry already guarantees
/// correctness on every access path; the sweep only bounds how long an
/// overdue attempt can sit unmarked when nobody touches it.
pub(crate) async fn run(state: AppState) -> Result<()> {
    let engine = SessionEngine::postgres(state.db().clone());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let handle = tokio::spawn(sweep_loop(
        engine,
        state.settings().sweeper().interval_seconds,
        shutdown_rx,
    ));

    crate::core::shutdown::shutdown_signal().await;
    if shutdown_tx.send(true).is_err() {
        tracing::warn!("Failed to broadcast shutdown signal to sweeper");
    }

    if let Err(err) = handle.await {
        tracing::error!(error = %err, "Sweeper task join failed");
    }

    Ok(())
}

async fn sweep_loop(
    engine: SessionEngine,
    interval_seconds: u64,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut tick = interval(Duration::from_secs(interval_seconds));
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = tick.tick() => {
                match engine.close_expired().await {
                    Ok(0) => {}
                    Ok(closed) => {
                        tracing::info!(closed, "Closed expired attempts");
                        metrics::counter!("sweeper_closed_total").increment(closed as u64);
                    }
                    Err(err) => tracing::error!(error = %err, "close_expired failed"),
                }
            }
        }
    }
}
