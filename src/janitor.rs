use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::engine::Engine;

/// Background task that periodically purges tombstoned records past the
/// retention window.
pub async fn run_retention(engine: Arc<Engine>, period: Duration, retention_days: i64) {
    let mut interval = tokio::time::interval(period);
    loop {
        interval.tick().await;
        match engine.purge_expired_schedules(retention_days).await {
            Ok(0) => {}
            Ok(n) => info!("purged {n} expired schedules"),
            Err(e) => tracing::debug!("schedule purge skipped: {e}"),
        }
        match engine.purge_old_policies(retention_days).await {
            Ok(0) => {}
            Ok(n) => info!("purged {n} old policy versions"),
            Err(e) => tracing::debug!("policy purge skipped: {e}"),
        }
    }
}

/// Background task that compacts the WAL once enough records have
/// accumulated since the last compaction.
pub async fn run_compactor(engine: Arc<Engine>, period: Duration, threshold: u64) {
    let mut interval = tokio::time::interval(period);
    loop {
        interval.tick().await;
        let appends = engine.wal_appends_since_compact().await;
        if appends < threshold {
            continue;
        }
        match engine.compact_wal().await {
            Ok(()) => info!("compacted WAL after {appends} appends"),
            Err(e) => warn!("WAL compaction failed: {e}"),
        }
    }
}
