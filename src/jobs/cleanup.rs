//! Background job: deactivate expired tokens and purge old inactive rows.
//!
//! Maintenance is best-effort by contract — every statement is guarded so a
//! single failure cannot stop the remaining statements, and nothing here is
//! ever surfaced as a request failure.

use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::time;

use crate::provider::Provider;
use crate::store::db::Store;

/// Inactive rows are kept for a day before physical deletion.
pub const INACTIVE_RETENTION_SECS: i64 = 86_400;

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupReport {
    pub itau_tokens_deactivated: u64,
    pub inter_tokens_deactivated: u64,
    pub jwt_tokens_deactivated: u64,
    pub tokens_purged: u64,
    pub jwt_tokens_purged: u64,
    pub pools_updated: u64,
}

/// Spawn the periodic sweep. Call this once at startup.
pub fn spawn(store: Store, every: Duration) {
    tokio::spawn(async move {
        let mut interval = time::interval(every);
        loop {
            interval.tick().await;
            let report = run_cleanup(&store).await;
            tracing::debug!(?report, "cleanup sweep finished");
        }
    });
}

/// One full sweep. Idempotent and safe to run concurrently: every sub-step
/// is a single statement that re-derives its row set from current state.
pub async fn run_cleanup(store: &Store) -> CleanupReport {
    let now = Utc::now().timestamp();
    let cutoff = now - INACTIVE_RETENTION_SECS;

    CleanupReport {
        itau_tokens_deactivated: count_or_zero(
            store.deactivate_expired(Provider::Itau, now).await,
            "deactivate expired itau tokens",
        ),
        inter_tokens_deactivated: count_or_zero(
            store.deactivate_expired(Provider::Inter, now).await,
            "deactivate expired inter tokens",
        ),
        jwt_tokens_deactivated: count_or_zero(
            store.deactivate_expired_jwt(now).await,
            "deactivate expired jwt tokens",
        ),
        tokens_purged: count_or_zero(
            store.purge_inactive_before(cutoff).await,
            "purge old inactive tokens",
        ),
        jwt_tokens_purged: count_or_zero(
            store.purge_inactive_jwt_before(cutoff).await,
            "purge old inactive jwt tokens",
        ),
        pools_updated: count_or_zero(
            store.mark_pools_cleaned(now).await,
            "stamp pool cleanup time",
        ),
    }
}

fn count_or_zero(result: Result<u64, sqlx::Error>, step: &str) -> u64 {
    match result {
        Ok(n) => n,
        Err(e) => {
            tracing::warn!("cleanup step failed ({step}): {e}");
            0
        }
    }
}
