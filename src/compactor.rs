use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::engine::Engine;

const COMPACT_CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Background task that rewrites the WAL once enough appends have
/// accumulated since the last compaction. The audit trail survives
/// compaction; only superseded settings and removed entities drop out.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(COMPACT_CHECK_INTERVAL);
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::*;
    use crate::notify::NotifyHub;
    use std::path::PathBuf;
    use ulid::Ulid;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("slotwise_test_compactor");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    #[tokio::test]
    async fn compaction_drops_superseded_events() {
        let path = test_wal_path("superseded.wal");
        let notify = Arc::new(NotifyHub::new());
        let engine = Engine::new(path.clone(), notify).unwrap();

        let business_id = Ulid::new();
        engine
            .create_business(business_id, None, BookingPolicy::default())
            .await
            .unwrap();

        // Churn busy blocks: each add + remove pair nets out to nothing.
        for _ in 0..20 {
            let block_id = Ulid::new();
            engine
                .add_busy_block(block_id, business_id, Span::new(1000, 2000), "gcal".into())
                .await
                .unwrap();
            engine.remove_busy_block(block_id).await.unwrap();
        }

        let before = engine.wal_appends_since_compact().await;
        assert!(before >= 41);

        engine.compact_wal().await.unwrap();
        assert_eq!(engine.wal_appends_since_compact().await, 0);

        // Restart from the compacted WAL: the business survives, blocks are gone.
        drop(engine);
        let engine2 = Engine::new(path, Arc::new(NotifyHub::new())).unwrap();
        let businesses = engine2.list_businesses().await;
        assert_eq!(businesses.len(), 1);
        assert_eq!(businesses[0].id, business_id);
    }
}
