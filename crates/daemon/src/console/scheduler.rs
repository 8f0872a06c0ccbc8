//! Periodic polling of console processes.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::table::ConsoleProcessTable;

/// Polls every process in `table` each `interval` until `cancel` fires.
///
/// Polling writes to child processes and the console directory, so each
/// round runs on the blocking pool.
pub async fn run_poll_loop(
    table: Arc<ConsoleProcessTable>,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let table = Arc::clone(&table);
                match tokio::task::spawn_blocking(move || table.poll_all()).await {
                    Ok(0) => {}
                    Ok(exited) => tracing::debug!(exited, "Console processes exited"),
                    Err(e) => tracing::error!(error = %e, "Console poll task failed"),
                }
            }
        }
    }
    tracing::debug!("Console poll loop stopped");
}
