/*
 * Core library for the Shelfmark book search and ingestion backend, organizing
 * the provider adapters, resilience layer, caching, and persistence behind a
 * single application state.
 * I'm setting up a clean module structure with proper error handling, database
 * integration, and observability across the whole service.
 */

pub mod database;
pub mod models;
pub mod providers;
pub mod routes;
pub mod services;
pub mod utils;

// Re-export commonly used types and utilities for internal use
pub use utils::{
    config::Config,
    error::{AppError, Result},
    metrics::MetricsCollector,
};

pub use database::{connection::DatabasePool, BookRepository, SearchCacheRepository};

pub use models::{
    Book, BookEdition, BookMetadataSource, IngestionOutcome, IngestionRequest, ReadingEntry,
    SearchResponse, SearchResult,
};

pub use services::{
    CacheManager, DuplicateDetector, IngestionService, SearchOrchestrator, Sweeper,
};

use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::providers::{PrimaryProvider, ProviderSettings, SecondaryProvider};
use crate::services::cache_service::L1Cache;
use crate::services::circuit_breaker::{BreakerConfig, BreakerRegistry, SystemClock};

/// Application state shared across request handlers
/// I'm creating a comprehensive state structure that provides access to all
/// application services.
///
/// The only process-wide singletons live here: the database pool, the cache
/// client, and the breaker registry. No user-specific state is held; reader
/// identity is an explicit argument on every call.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub db_pool: DatabasePool,
    pub search: SearchOrchestrator,
    pub ingestion: IngestionService,
    pub metrics: MetricsCollector,
}

impl AppState {
    /// Create new application state with all initialized services
    /// I'm implementing comprehensive service initialization with error handling
    pub async fn new(config: Config) -> Result<Self> {
        info!("Initializing application state");

        let db_pool =
            database::create_pool_with_config(&config.database_url, &config.database_pool_config())
                .await?;
        info!("Database connection pool initialized");

        let trigram_enabled = database::check_trigram_support(&db_pool).await;

        let l1 = match config.l1_connection_string() {
            Some(connection_string) => {
                let client = redis::Client::open(connection_string)
                    .map_err(|e| AppError::CacheError(format!("invalid L1 URL: {}", e)))?;
                let cache = L1Cache::new(client);
                match cache.ping().await {
                    Ok(()) => info!("L1 cache connected"),
                    Err(e) => warn!("L1 cache unreachable at startup, continuing degraded: {}", e),
                }
                Some(cache)
            }
            None => None,
        };

        let metrics = MetricsCollector::new();

        let cache = CacheManager::new(
            l1,
            SearchCacheRepository::new(db_pool.clone()),
            Duration::from_secs(config.cache_l1_ttl_sec),
            Duration::from_secs(config.cache_l2_ttl_sec),
        );

        let primary = PrimaryProvider::new(ProviderSettings {
            base_url: config.primary_base_url.clone(),
            api_key: config.primary_api_key.clone(),
            timeout_ms: config.provider_timeout_ms,
            user_agent: config.provider_user_agent.clone(),
        })
        .map_err(AppError::from)?;

        let secondary = SecondaryProvider::new(ProviderSettings {
            base_url: config.secondary_base_url.clone(),
            api_key: None,
            timeout_ms: config.provider_timeout_ms,
            user_agent: config.provider_user_agent.clone(),
        })
        .map_err(AppError::from)?;

        let breakers = BreakerRegistry::new(
            BreakerConfig {
                timeout: Duration::from_millis(config.circuit_timeout_ms),
                error_threshold_pct: config.circuit_error_pct,
                reset_timeout: Duration::from_millis(config.circuit_reset_ms),
                volume_threshold: config.circuit_volume_threshold,
                ..BreakerConfig::default()
            },
            Arc::new(SystemClock),
            metrics.clone(),
        );

        let search = SearchOrchestrator::new(
            Arc::new(primary),
            Some(Arc::new(secondary)),
            breakers,
            cache,
            metrics.clone(),
            config.cross_provider_substitution,
            Duration::from_millis(config.orchestrator_deadline_ms),
        );

        let detector = DuplicateDetector::new(BookRepository::new(db_pool.clone()), trigram_enabled);
        let ingestion = IngestionService::new(db_pool.clone(), detector, metrics.clone());

        info!("Application state initialized successfully");
        Ok(Self {
            config,
            db_pool,
            search,
            ingestion,
            metrics,
        })
    }

    /// Run database migrations if needed
    /// I'm providing migration support for deployment automation
    pub async fn migrate_database(&self) -> Result<()> {
        database::run_migrations(&self.db_pool).await
    }

    /// Graceful shutdown that cleans up resources and connections
    /// I'm ensuring the pool closes only after in-flight work drains
    pub async fn shutdown(&self) {
        info!("Initiating graceful shutdown");
        self.db_pool.close().await;
        info!("Graceful shutdown completed");
    }
}

// Export version and build information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const BUILD_TIME: &str = env!("BUILD_TIME");
pub const GIT_COMMIT: &str = env!("GIT_COMMIT");
