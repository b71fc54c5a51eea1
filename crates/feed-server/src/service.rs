//! Feed service - wires reference data, session pool and aggregator

use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info};

use warrant_core::{BoardConfig, ReferenceMap, Shutdown, SnapshotStore};
use warrant_reference::{Enricher, ReferenceSource, ReferenceStore};
use warrant_scraper::{PoolStats, RenderSessionPool, SessionFactory, SnapshotAggregator};

/// Load the reference map off the async runtime. Never fails.
pub async fn load_reference(source: Arc<dyn ReferenceSource>) -> Arc<ReferenceMap> {
    match tokio::task::spawn_blocking(move || ReferenceStore::load(source.as_ref())).await {
        Ok(map) => map,
        Err(e) => {
            error!("Reference loader task failed: {}", e);
            Arc::new(ReferenceMap::new())
        }
    }
}

/// Running scrape pipeline: pool plus the aggregator task feeding `store`
pub struct FeedService<F: SessionFactory + 'static> {
    store: Arc<SnapshotStore>,
    shutdown: Shutdown,
    reference: Arc<ReferenceMap>,
    pool: Arc<RenderSessionPool<F>>,
    aggregator: Arc<SnapshotAggregator<F>>,
    aggregator_handle: Option<JoinHandle<()>>,
}

impl<F: SessionFactory + 'static> FeedService<F> {
    /// Start the pool, then the aggregation loop. Extraction does not begin
    /// before every session has been launched.
    pub async fn start(
        config: &BoardConfig,
        factory: F,
        reference: Arc<ReferenceMap>,
        store: Arc<SnapshotStore>,
        shutdown: Shutdown,
    ) -> Self {
        let mut pool = RenderSessionPool::new(config.scraper.clone(), factory);
        pool.start(config.scraper.total_sessions, &shutdown).await;
        let pool = Arc::new(pool);

        let aggregator = Arc::new(SnapshotAggregator::new(
            config.aggregator.clone(),
            Arc::clone(&pool),
            Enricher::new(Arc::clone(&reference)),
            Arc::clone(&store),
        ));

        let handle = {
            let aggregator = Arc::clone(&aggregator);
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                aggregator.run(shutdown).await;
            })
        };

        info!("Feed service started");

        Self {
            store,
            shutdown,
            reference,
            pool,
            aggregator,
            aggregator_handle: Some(handle),
        }
    }

    /// Signal shutdown, wait for the aggregator to finish its cycle and
    /// close every session. Idempotent.
    pub async fn stop(&mut self) {
        self.shutdown.trigger();

        if let Some(handle) = self.aggregator_handle.take() {
            if let Err(e) = handle.await {
                error!("Aggregator task ended abnormally: {}", e);
            }
        }

        self.pool.stop().await;
        info!("Feed service stopped");
    }

    pub fn store(&self) -> Arc<SnapshotStore> {
        Arc::clone(&self.store)
    }

    pub fn reference(&self) -> &ReferenceMap {
        &self.reference
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    pub fn aggregator(&self) -> &Arc<SnapshotAggregator<F>> {
        &self.aggregator
    }
}
