/*
 * ©AngelaMos | 2025
 */

use axum::{extract::State, response::Json as JsonResponse, Json};
use serde::Serialize;
use std::time::Instant;
use tracing::{info, warn};

use crate::{
    database::connection::{database_health, DatabaseHealthStatus},
    utils::error::{AppError, Result},
    AppState,
};

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Serialize)]
pub struct HealthCheckResponse {
    pub status: ServiceStatus,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub version: VersionInfo,
    pub services: ServiceHealthStatus,
    pub breakers: Vec<BreakerStatus>,
}

#[derive(Debug, Serialize)]
pub struct VersionInfo {
    pub version: String,
    pub build_time: String,
    pub git_commit: String,
}

#[derive(Debug, Serialize)]
pub struct ServiceHealthStatus {
    pub database: DatabaseHealthStatus,
    pub l1_cache: L1Status,
}

#[derive(Debug, Serialize)]
pub struct L1Status {
    pub status: ServiceStatus,
    pub configured: bool,
    pub response_time_ms: Option<u64>,
    pub error_message: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct BreakerStatus {
    pub provider: String,
    pub state: String,
}

/// Comprehensive health check reporting database, L1 cache, and breaker state
/// I'm providing detailed health information for production monitoring and alerting.
///
/// An absent or unreachable L1 degrades the service; it does not make it
/// unhealthy, because every search still works against L2.
pub async fn health_check(
    State(app_state): State<AppState>,
) -> Result<JsonResponse<HealthCheckResponse>> {
    let database = database_health(&app_state.db_pool).await;
    let l1_cache = check_l1(&app_state).await;

    let breakers: Vec<BreakerStatus> = app_state
        .search
        .breakers()
        .states()
        .into_iter()
        .map(|(provider, state)| BreakerStatus {
            provider,
            state: state.as_str().to_string(),
        })
        .collect();

    let status = if !database.healthy {
        ServiceStatus::Unhealthy
    } else if l1_cache.status != ServiceStatus::Healthy
        || breakers.iter().any(|b| b.state == "open")
    {
        ServiceStatus::Degraded
    } else {
        ServiceStatus::Healthy
    };

    if status != ServiceStatus::Healthy {
        warn!(?status, "health check not fully healthy");
    }

    Ok(Json(HealthCheckResponse {
        status,
        timestamp: chrono::Utc::now(),
        version: VersionInfo {
            version: env!("CARGO_PKG_VERSION").to_string(),
            build_time: env!("BUILD_TIME").to_string(),
            git_commit: env!("GIT_COMMIT").to_string(),
        },
        services: ServiceHealthStatus { database, l1_cache },
        breakers,
    }))
}

/// Readiness probe endpoint for orchestrated deployments
/// I'm checking only the critical dependency needed for request handling
pub async fn readiness_check(
    State(app_state): State<AppState>,
) -> Result<JsonResponse<serde_json::Value>> {
    let database = database_health(&app_state.db_pool).await;

    if database.healthy {
        Ok(Json(serde_json::json!({
            "ready": true,
            "timestamp": chrono::Utc::now(),
        })))
    } else {
        warn!("readiness check failed: database unavailable");
        Err(AppError::ServiceUnavailableError(
            "Service not ready".to_string(),
        ))
    }
}

/// Liveness probe endpoint
/// I'm providing a lightweight check to detect if the process needs a restart
pub async fn liveness_check() -> JsonResponse<serde_json::Value> {
    Json(serde_json::json!({
        "alive": true,
        "timestamp": chrono::Utc::now(),
    }))
}

async fn check_l1(app_state: &AppState) -> L1Status {
    let Some(l1) = app_state.search.cache().l1_cache() else {
        return L1Status {
            status: ServiceStatus::Degraded,
            configured: false,
            response_time_ms: None,
            error_message: None,
        };
    };

    let started = Instant::now();
    match l1.ping().await {
        Ok(()) => L1Status {
            status: ServiceStatus::Healthy,
            configured: true,
            response_time_ms: Some(started.elapsed().as_millis() as u64),
            error_message: None,
        },
        Err(e) => {
            info!("L1 health probe failed: {}", e);
            L1Status {
                status: ServiceStatus::Degraded,
                configured: true,
                response_time_ms: Some(started.elapsed().as_millis() as u64),
                error_message: Some(e.to_string()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_status_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&ServiceStatus::Degraded).unwrap(),
            "\"degraded\""
        );
    }
}
