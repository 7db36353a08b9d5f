use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::catalog::Catalog;
use crate::observability::WAL_COMPACTIONS_TOTAL;

/// Background task that rewrites the WAL once enough appends pile up.
pub async fn run_compactor(catalog: Arc<Catalog>, threshold: u64, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        compact_if_due(&catalog, threshold).await;
    }
}

/// Compact when appends since the last compaction reach `threshold`.
/// Returns whether a compaction ran successfully.
pub async fn compact_if_due(catalog: &Catalog, threshold: u64) -> bool {
    let appends = catalog.wal_appends_since_compact().await;
    if appends < threshold {
        return false;
    }
    match catalog.compact_wal().await {
        Ok(()) => {
            info!(appends, "compacted WAL");
            metrics::counter!(WAL_COMPACTIONS_TOTAL, "status" => "ok").increment(1);
            true
        }
        Err(e) => {
            warn!("WAL compaction failed: {e}");
            metrics::counter!(WAL_COMPACTIONS_TOTAL, "status" => "error").increment(1);
            false
        }
    }
}
