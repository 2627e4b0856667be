// Server loop module
// Accepts connections until shutdown is requested, then drains in-flight ones

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::Notify;

use super::connection::accept_connection;
use crate::config::AppState;

const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Run the accept loop on the current `LocalSet`.
///
/// Returns once `shutdown` is notified and active connections have finished,
/// or `performance.shutdown_timeout` seconds have passed.
pub async fn start_server_loop(
    listener: TcpListener,
    state: Arc<AppState>,
    shutdown: Arc<Notify>,
) -> std::io::Result<()> {
    let active_connections = Arc::new(AtomicUsize::new(0));

    loop {
        tokio::select! {
            accept_result = listener.accept() => {
                match accept_result {
                    Ok((stream, peer_addr)) => {
                        accept_connection(stream, peer_addr, &state, &active_connections);
                    }
                    Err(e) => {
                        tracing::error!("Failed to accept connection: {e}");
                    }
                }
            }

            () = shutdown.notified() => {
                tracing::info!("Shutdown requested, no longer accepting connections");
                break;
            }
        }
    }

    drop(listener);

    let deadline = Duration::from_secs(state.config.performance.shutdown_timeout);
    if wait_for_drain(&active_connections, deadline).await {
        tracing::info!("All connections closed");
    } else {
        tracing::warn!(
            remaining = active_connections.load(Ordering::SeqCst),
            "Shutdown timeout elapsed with connections still open"
        );
    }
    Ok(())
}

/// Wait until the counter reaches zero; false if `deadline` passes first
async fn wait_for_drain(active: &AtomicUsize, deadline: Duration) -> bool {
    let until = tokio::time::Instant::now() + deadline;
    loop {
        if active.load(Ordering::SeqCst) == 0 {
            return true;
        }
        if tokio::time::Instant::now() >= until {
            return false;
        }
        tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
    }
}
