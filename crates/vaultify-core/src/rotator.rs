//! HMAC rotator (C8): a cooperative background loop that rotates the
//! active HMAC key once it exceeds a staleness threshold.

use std::time::Duration;

use tokio::sync::watch;
use tracing::{info, warn};

use crate::hmac_keys::HmacKeyRegistry;

/// Runs the rotator loop until `shutdown` fires.
///
/// Unlike the reaper, a tick here has no fixed deadline: rotation holds a
/// row-level lock on the active key for the duration of a single
/// transaction, so a slow tick blocks the next rotator tick, not the
/// whole server — it is cancellable via `shutdown` but not time-bounded.
pub async fn run(
    registry: &HmacKeyRegistry,
    interval: Duration,
    staleness: chrono::Duration,
    shutdown: &mut watch::Receiver<bool>,
) {
    info!(interval_secs = interval.as_secs(), "hmac rotator starting");
    let mut ticker = tokio::time::interval(interval);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match registry.rotate_if_stale(staleness).await {
                    Ok(true) => info!("hmac key rotated"),
                    Ok(false) => {}
                    Err(e) => warn!(error = %e, "hmac key rotation failed"),
                }
            }
            _ = shutdown.changed() => {
                info!("hmac rotator shutting down");
                return;
            }
        }
    }
}
