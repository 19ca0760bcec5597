//! Expiry reaper (C7): a cooperative background loop that deletes secrets
//! past their `expires_at` and sharing rules past their `shared_until`.

use std::time::Duration;

use rand::Rng;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::secret_store::SecretStore;
use crate::sharing::SharingRuleStore;

/// Bounded timeout for a single reaper tick, per spec.md §4.7.
const TICK_TIMEOUT: Duration = Duration::from_secs(5);

/// Runs the reaper loop until `shutdown` fires.
///
/// Errors on a tick are logged and do not stop the loop — the reaper is
/// idempotent, so a failed tick just means wasted work is retried next
/// time. The first tick is delayed by a random offset in `[0, interval)`
/// so that multiple instances started at the same moment don't all reap
/// in lock-step.
pub async fn run(
    secrets: &SecretStore,
    sharing: &SharingRuleStore,
    interval: Duration,
    shutdown: &mut watch::Receiver<bool>,
) {
    let jitter = rand::thread_rng().gen_range(0..interval.as_millis().max(1) as u64);
    info!(interval_secs = interval.as_secs(), jitter_ms = jitter, "expiry reaper starting");

    tokio::select! {
        () = tokio::time::sleep(Duration::from_millis(jitter)) => {}
        _ = shutdown.changed() => {
            info!("expiry reaper shutting down before first tick");
            return;
        }
    }

    let mut ticker = tokio::time::interval(interval);
    // The sleep above already accounts for the jitter; avoid a burst tick.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                tick(secrets, sharing).await;
            }
            _ = shutdown.changed() => {
                info!("expiry reaper shutting down");
                return;
            }
        }
    }
}

async fn tick(secrets: &SecretStore, sharing: &SharingRuleStore) {
    let result = tokio::time::timeout(TICK_TIMEOUT, async {
        let expired_secrets = secrets.delete_expired().await;
        let expired_rules = sharing.delete_expired().await;
        (expired_secrets, expired_rules)
    })
    .await;

    match result {
        Ok((Ok(secrets_deleted), Ok(rules_deleted))) => {
            if secrets_deleted > 0 || rules_deleted > 0 {
                info!(secrets_deleted, rules_deleted, "reaper tick complete");
            }
        }
        Ok((secrets_result, rules_result)) => {
            if let Err(e) = secrets_result {
                warn!(error = %e, "reaper failed to delete expired secrets");
            }
            if let Err(e) = rules_result {
                warn!(error = %e, "reaper failed to delete expired sharing rules");
            }
        }
        Err(_) => {
            warn!(timeout_secs = TICK_TIMEOUT.as_secs(), "reaper tick timed out");
        }
    }
}
