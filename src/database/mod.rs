/*
 * Database module aggregator: connection management, embedded migrations, and
 * the repositories over the canonical book tables.
 * I'm organizing persistence into a clean, cohesive interface for the service layer.
 */

pub mod connection;
pub mod repositories;

pub use connection::{
    check_trigram_support,
    create_pool_with_config,
    database_health,
    run_migrations,
    DatabaseHealthStatus,
    DatabasePool,
};

pub use repositories::{BookRepository, SearchCacheRepository};
