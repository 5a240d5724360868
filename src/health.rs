//! Health check HTTP server
//!
//! HTTP endpoints for monitoring the router, supporting both human
//! operators and container orchestration platforms. Reports store
//! reachability, per-agent breaker state and DLQ depth alongside the
//! process metrics snapshot.

use crate::dispatch::{BreakerRegistry, BreakerState};
use crate::observability::metrics::metrics;
use crate::store::LogStore;
use serde::Serialize;
use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use warp::Filter;

/// HTTP health check server
pub struct HealthServer {
    port: u16,
    store: Arc<dyn LogStore>,
    breakers: Arc<BreakerRegistry>,
}

impl HealthServer {
    /// Create new health server
    pub fn new(port: u16, store: Arc<dyn LogStore>, breakers: Arc<BreakerRegistry>) -> Self {
        Self {
            port,
            store,
            breakers,
        }
    }

    /// Start the HTTP health server
    pub async fn start(self: Arc<Self>) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let health_server = self.clone();
        let ready_server = self.clone();

        // GET /health - comprehensive health status
        let health_route = warp::path("health").and(warp::get()).and_then(move || {
            let server = health_server.clone();
            async move {
                let status = server.get_health_status().await;
                let status_code = if status.status == "healthy" { 200 } else { 503 };
                Ok::<_, Infallible>(warp::reply::with_status(
                    warp::reply::json(&status),
                    warp::http::StatusCode::from_u16(status_code)
                        .unwrap_or(warp::http::StatusCode::INTERNAL_SERVER_ERROR),
                ))
            }
        });

        // GET /metrics - complete metrics export
        let metrics_route = warp::path("metrics").and(warp::get()).and_then(move || async move {
            let snapshot = metrics().snapshot();
            Ok::<_, Infallible>(warp::reply::json(&snapshot))
        });

        // GET /ready - readiness probe, store reachability only
        let ready_route = warp::path("ready").and(warp::get()).and_then(move || {
            let server = ready_server.clone();
            async move {
                let ready = server.store.ping().await.is_ok();
                let response = ReadinessResponse {
                    ready,
                    timestamp: current_timestamp(),
                };
                let status_code = if ready { 200 } else { 503 };
                Ok::<_, Infallible>(warp::reply::with_status(
                    warp::reply::json(&response),
                    warp::http::StatusCode::from_u16(status_code)
                        .unwrap_or(warp::http::StatusCode::INTERNAL_SERVER_ERROR),
                ))
            }
        });

        // GET /live - liveness probe
        let live_route = warp::path("live").and(warp::get()).and_then(move || async move {
            let response = LivenessResponse {
                alive: true,
                timestamp: current_timestamp(),
            };
            Ok::<_, Infallible>(warp::reply::json(&response))
        });

        let routes = health_route
            .or(metrics_route)
            .or(ready_route)
            .or(live_route)
            .with(warp::cors().allow_any_origin());

        tracing::info!("Starting health server on port {}", self.port);

        warp::serve(routes).run(([0, 0, 0, 0], self.port)).await;

        Ok(())
    }

    async fn get_health_status(&self) -> HealthStatus {
        let now = current_timestamp();
        let mut checks = HashMap::new();

        let store_check = match self.store.ping().await {
            Ok(()) => HealthCheck {
                status: "healthy".to_string(),
                message: Some("log store reachable".to_string()),
                last_check: now,
            },
            Err(error) => HealthCheck {
                status: "unhealthy".to_string(),
                message: Some(format!("log store unreachable: {error}")),
                last_check: now,
            },
        };
        checks.insert("store".to_string(), store_check);

        let breakers = self.breakers.snapshot().await;
        let open_count = breakers
            .values()
            .filter(|state| **state != BreakerState::Closed)
            .count();
        let breaker_check = if open_count == 0 {
            HealthCheck {
                status: "healthy".to_string(),
                message: Some("all breakers closed".to_string()),
                last_check: now,
            }
        } else {
            HealthCheck {
                status: "degraded".to_string(),
                message: Some(format!("{open_count} breaker(s) open or probing")),
                last_check: now,
            }
        };
        checks.insert("breakers".to_string(), breaker_check);

        let dlq_depth = self.store.dlq_depth().await.unwrap_or(0);

        let overall_healthy = checks.values().all(|check| check.status == "healthy");
        let status = if overall_healthy {
            "healthy".to_string()
        } else if checks["store"].status == "unhealthy" {
            "unhealthy".to_string()
        } else {
            "degraded".to_string()
        };

        HealthStatus {
            status,
            timestamp: now,
            breakers,
            dlq_depth,
            checks,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthCheck {
    pub status: String,
    pub message: Option<String>,
    pub last_check: u64,
}

#[derive(Debug, Serialize)]
struct HealthStatus {
    status: String,
    timestamp: u64,
    breakers: HashMap<String, BreakerState>,
    dlq_depth: usize,
    checks: HashMap<String, HealthCheck>,
}

#[derive(Debug, Serialize)]
struct ReadinessResponse {
    ready: bool,
    timestamp: u64,
}

#[derive(Debug, Serialize)]
struct LivenessResponse {
    alive: bool,
    timestamp: u64,
}

fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BreakerSection;
    use crate::store::MemoryStore;
    use crate::testing::mocks::UnavailableStore;

    fn server_with(store: Arc<dyn LogStore>) -> HealthServer {
        let breakers = Arc::new(BreakerRegistry::new(BreakerSection::default()));
        HealthServer::new(8080, store, breakers)
    }

    #[tokio::test]
    async fn healthy_when_store_reachable_and_breakers_closed() {
        let server = server_with(Arc::new(MemoryStore::new()));
        let status = server.get_health_status().await;
        assert_eq!(status.status, "healthy");
        assert_eq!(status.dlq_depth, 0);
        assert_eq!(status.checks["store"].status, "healthy");
        assert_eq!(status.checks["breakers"].status, "healthy");
    }

    #[tokio::test]
    async fn unhealthy_when_store_unreachable() {
        let server = server_with(Arc::new(UnavailableStore));
        let status = server.get_health_status().await;
        assert_eq!(status.status, "unhealthy");
        assert_eq!(status.checks["store"].status, "unhealthy");
    }
}
