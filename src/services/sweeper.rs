/*
 * Scheduled maintenance sweeps: expired L2 search-cache rows and provenance
 * records past their 90-day retention.
 * I'm implementing these as stateless, idempotent deletes on their own task so
 * a missed run only delays deletion and never blocks a request path.
 */

use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::database::connection::DatabasePool;
use crate::database::repositories::{self, SearchCacheRepository};
use crate::utils::error::Result;

/// Default cadence for both sweeps.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone)]
pub struct Sweeper {
    pool: DatabasePool,
    cache: SearchCacheRepository,
}

impl Sweeper {
    pub fn new(pool: DatabasePool) -> Self {
        let cache = SearchCacheRepository::new(pool.clone());
        Self { pool, cache }
    }

    /// Run both sweeps once.
    pub async fn run_once(&self) -> Result<()> {
        let expired_cache_rows = self.cache.sweep_expired().await?;
        if expired_cache_rows > 0 {
            info!("Swept {} expired search cache rows", expired_cache_rows);
        }

        let purged_sources = repositories::sweep_metadata_sources(&self.pool).await?;
        if purged_sources > 0 {
            info!("Purged {} provenance rows past retention", purged_sources);
        }

        Ok(())
    }

    /// Start the background maintenance loop
    /// I'm implementing automated maintenance for long-running deployments
    pub fn spawn(self, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                if let Err(e) = self.run_once().await {
                    warn!("Maintenance sweep failed: {}", e);
                }
            }
        })
    }
}
