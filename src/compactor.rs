use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::engine::Engine;

const CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Background task that rewrites a venue journal from live state once
/// enough appends have accumulated since the last compaction.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(CHECK_INTERVAL);
    loop {
        interval.tick().await;
        let appends = match engine.journal_appends_since_compact().await {
            Ok(n) => n,
            Err(e) => {
                warn!("compactor cannot read journal counter: {e}");
                continue;
            }
        };
        if appends < threshold {
            continue;
        }
        match engine.compact_journal().await {
            Ok(()) => info!(appends, "journal compacted"),
            Err(e) => warn!("journal compaction failed: {e}"),
        }
    }
}
