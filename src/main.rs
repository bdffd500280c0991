/*
 * Application entry point: configuration, logging, state initialization,
 * migrations, the background sweeper, and the HTTP server.
 * I'm implementing comprehensive application startup with proper error handling
 * and graceful shutdown.
 */

use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use shelfmark_backend::{routes, utils::config::Config, AppState, Result, Sweeper};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // Tracing comes up before configuration so config loading itself is logged.
    init_tracing();

    let config = Config::from_env()?;

    info!("Starting Shelfmark backend");

    let app_state = AppState::new(config).await?;

    app_state.migrate_database().await?;

    // One sweep at startup, then the daily cadence off the request path.
    let sweeper = Sweeper::new(app_state.db_pool.clone());
    if let Err(e) = sweeper.run_once().await {
        warn!("Startup sweep failed: {}", e);
    }
    sweeper.spawn(shelfmark_backend::services::sweeper::SWEEP_INTERVAL);

    let app = routes::create_router().with_state(app_state.clone());

    let addr = app_state.config.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(&addr).await.map_err(|e| {
        shelfmark_backend::AppError::ConfigurationError(format!(
            "Failed to bind to address {}: {}",
            addr, e
        ))
    })?;

    info!("Shelfmark backend is running on {}", addr);
    info!("Metrics available at: http://{}/metrics", addr);
    info!("Health check available at: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| {
            shelfmark_backend::AppError::InternalServerError(format!("Server error: {}", e))
        })?;

    app_state.shutdown().await;
    info!("Server shut down gracefully");
    Ok(())
}

fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let json_output = std::env::var("LOG_FORMAT")
        .map(|format| format.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json_output {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

/// Handle graceful shutdown signals
/// I'm implementing proper signal handling for clean server shutdown
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown");
}
