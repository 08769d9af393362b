//! Application startup and lifecycle management.

use crate::config::{ReconciliationConfig, StorageBackend};
use crate::handlers::{accounts, checkpoints, imports, transactions};
use crate::middleware::metrics_middleware;
use crate::services::{
    get_metrics, init_metrics, LedgerStore, MemoryStore, PgStore, ReconciliationEngine,
};
use axum::{
    extract::State,
    http::StatusCode,
    middleware,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use service_core::error::AppError;
use service_core::middleware::request_id_middleware;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ReconciliationConfig>,
    pub engine: ReconciliationEngine,
}

/// Health check endpoint for Docker/K8s liveness checks.
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    match state.engine.store().health_check().await {
        Ok(_) => {
            tracing::debug!("Health check passed");
            (
                StatusCode::OK,
                Json(json!({
                    "status": "ok",
                    "service": state.config.service_name,
                    "version": state.config.service_version,
                    "storage": state.config.storage.as_str()
                })),
            )
        }
        Err(e) => {
            tracing::warn!(error = %e, "Health check failed - store unavailable");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "status": "unhealthy",
                    "service": state.config.service_name,
                    "error": e.to_string()
                })),
            )
        }
    }
}

/// Readiness check endpoint for K8s readiness checks.
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    match state.engine.store().health_check().await {
        Ok(_) => StatusCode::OK,
        Err(e) => {
            tracing::warn!(error = %e, "Readiness check failed");
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

/// Metrics endpoint for Prometheus scraping.
async fn metrics_handler() -> Result<impl IntoResponse, AppError> {
    let metrics = get_metrics().map_err(|e| {
        AppError::InternalError(anyhow::anyhow!("Failed to encode metrics: {}", e))
    })?;
    Ok((
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        metrics,
    ))
}

/// Build the full HTTP router for the given state.
pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route(
            "/accounts",
            post(accounts::create_account).get(accounts::list_accounts),
        )
        .route("/accounts/:account_id", get(accounts::get_account))
        .route(
            "/accounts/:account_id/checkpoints",
            post(checkpoints::save_checkpoint).get(checkpoints::list_checkpoints),
        )
        .route(
            "/accounts/:account_id/checkpoints/summary",
            get(checkpoints::checkpoint_summary),
        )
        .route(
            "/accounts/:account_id/checkpoints/recalculate",
            post(checkpoints::recalculate_checkpoints),
        )
        .route(
            "/checkpoints/:checkpoint_id",
            get(checkpoints::get_checkpoint).delete(checkpoints::delete_checkpoint),
        )
        .route(
            "/accounts/:account_id/transactions",
            post(transactions::create_transaction).get(transactions::list_transactions),
        )
        .route(
            "/transactions/:transaction_id",
            get(transactions::get_transaction)
                .patch(transactions::update_transaction)
                .delete(transactions::delete_transaction),
        )
        .route("/transfers", post(transactions::match_transfer))
        .route(
            "/transfers/:transaction_id",
            axum::routing::delete(transactions::unmatch_transfer),
        )
        .route(
            "/accounts/:account_id/imports",
            post(imports::import_statement),
        )
        .route("/imports/:batch_id", get(imports::get_import_batch))
        .route("/imports/:batch_id/rollback", post(imports::rollback_import));

    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/metrics", get(metrics_handler))
        .merge(api)
        .route_layer(middleware::from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(request_id_middleware))
        .with_state(state)
}

/// Application container for managing server lifecycle.
pub struct Application {
    http_port: u16,
    http_listener: TcpListener,
    state: AppState,
}

impl Application {
    /// Build the application with the storage backend named in the configuration.
    pub async fn build(config: ReconciliationConfig) -> Result<Self, AppError> {
        let store: Arc<dyn LedgerStore> = match config.storage {
            StorageBackend::Postgres => {
                let db = PgStore::new(
                    &config.database.url,
                    config.database.max_connections,
                    config.database.min_connections,
                )
                .await
                .map_err(|e| {
                    tracing::error!(error = %e, "Failed to connect to PostgreSQL");
                    e
                })?;

                if config.database.run_migrations {
                    db.run_migrations().await.map_err(|e| {
                        tracing::error!(error = %e, "Failed to run migrations");
                        e
                    })?;
                }
                Arc::new(db)
            }
            StorageBackend::Memory => {
                tracing::warn!("Using in-memory storage; data is lost on restart");
                Arc::new(MemoryStore::new())
            }
        };

        Self::build_with_store(config, store).await
    }

    /// Build the application on an already constructed store.
    pub async fn build_with_store(
        config: ReconciliationConfig,
        store: Arc<dyn LedgerStore>,
    ) -> Result<Self, AppError> {
        init_metrics();

        let engine = ReconciliationEngine::new(store, config.reconciliation.clone());

        let http_addr = config.common.bind_addr();
        let http_listener = TcpListener::bind(http_addr).await.map_err(|e| {
            tracing::error!(error = %e, addr = %http_addr, "Failed to bind HTTP listener");
            AppError::from(e)
        })?;
        let http_port = http_listener.local_addr()?.port();

        tracing::info!(
            http_port = http_port,
            storage = config.storage.as_str(),
            "Reconciliation service listener bound"
        );

        Ok(Self {
            http_port,
            http_listener,
            state: AppState {
                config: Arc::new(config),
                engine,
            },
        })
    }

    /// Get the HTTP port the server is listening on.
    pub fn http_port(&self) -> u16 {
        self.http_port
    }

    pub fn engine(&self) -> &ReconciliationEngine {
        &self.state.engine
    }

    /// Run the application until stopped.
    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        self.run_until(std::future::pending()).await
    }

    /// Run until `shutdown` resolves, then drain in-flight requests.
    pub async fn run_until<F>(self, shutdown: F) -> std::io::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let app = router(self.state.clone());

        tracing::info!(
            service = %self.state.config.service_name,
            version = %self.state.config.service_version,
            http_port = self.http_port,
            "Service ready to accept connections"
        );

        axum::serve(self.http_listener, app)
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "HTTP server error");
                std::io::Error::other(format!("HTTP server error: {}", e))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DatabaseConfig, EngineConfig};
    use axum::body::Body;
    use axum::http::Request;
    use service_core::config::Config as CommonConfig;
    use std::net::{IpAddr, Ipv4Addr};
    use tower::ServiceExt;

    fn state() -> AppState {
        let config = ReconciliationConfig {
            common: CommonConfig {
                host: IpAddr::V4(Ipv4Addr::LOCALHOST),
                port: 0,
            },
            service_name: "reconciliation-service".to_string(),
            service_version: "test".to_string(),
            log_level: "info".to_string(),
            otlp_endpoint: None,
            storage: StorageBackend::Memory,
            database: DatabaseConfig {
                url: String::new(),
                max_connections: 1,
                min_connections: 1,
                run_migrations: false,
            },
            reconciliation: EngineConfig::default(),
        };
        AppState {
            config: Arc::new(config),
            engine: ReconciliationEngine::new(
                Arc::new(MemoryStore::new()),
                EngineConfig::default(),
            ),
        }
    }

    #[tokio::test]
    async fn health_reports_storage_backend() {
        let res = router(state())
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert!(res.headers().contains_key("x-request-id"));
    }

    #[tokio::test]
    async fn business_routes_need_a_tenant() {
        let res = router(state())
            .oneshot(Request::get("/accounts").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn unknown_route_is_not_found() {
        let res = router(state())
            .oneshot(Request::get("/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
    }
}
