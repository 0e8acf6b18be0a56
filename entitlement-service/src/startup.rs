//! Application startup and lifecycle management.

use crate::config::EntitlementConfig;
use crate::handlers::{accounts, quota, sweeps};
use crate::services::{
    metrics::{get_metrics, init_metrics},
    Database, HttpPaymentGateway, Notifier, QuotaService, RenewalService,
};
use crate::calendar;
use axum::{
    extract::State,
    http::StatusCode,
    middleware,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::FixedOffset;
use serde_json::json;
use service_core::error::AppError;
use service_core::middleware::metrics::metrics_middleware;
use service_core::middleware::shared_secret::{shared_secret_middleware, SharedSecret};
use service_core::middleware::tracing::request_id_middleware;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

pub const SWEEP_SECRET_HEADER: &str = "x-sweep-secret";

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: EntitlementConfig,
    pub db: Arc<Database>,
    pub quota: QuotaService,
    pub renewal: RenewalService,
    pub billing_offset: FixedOffset,
}

/// Health check endpoint for Docker/K8s liveness probes.
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    match state.db.health_check().await {
        Ok(_) => {
            tracing::debug!("Health check passed");
            (
                StatusCode::OK,
                Json(json!({
                    "status": "ok",
                    "service": "entitlement-service",
                    "version": env!("CARGO_PKG_VERSION")
                })),
            )
        }
        Err(e) => {
            tracing::warn!(error = %e, "Health check failed - database unavailable");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "status": "unhealthy",
                    "service": "entitlement-service",
                    "error": e.to_string()
                })),
            )
        }
    }
}

/// Readiness check endpoint for K8s readiness probes.
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    match state.db.health_check().await {
        Ok(_) => StatusCode::OK,
        Err(e) => {
            tracing::warn!(error = %e, "Readiness check failed");
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

/// Metrics endpoint for Prometheus scraping.
async fn metrics_handler() -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        get_metrics(),
    )
}

/// Application container for managing server lifecycle.
pub struct Application {
    port: u16,
    listener: TcpListener,
    state: AppState,
}

impl Application {
    /// Build the application with the given configuration.
    pub async fn build(config: EntitlementConfig) -> Result<Self, AppError> {
        Self::build_internal(config, true).await
    }

    /// Build the application without running migrations.
    /// Use this in tests when migrations are already applied by the test harness.
    pub async fn build_without_migrations(config: EntitlementConfig) -> Result<Self, AppError> {
        Self::build_internal(config, false).await
    }

    async fn build_internal(
        config: EntitlementConfig,
        run_migrations: bool,
    ) -> Result<Self, AppError> {
        init_metrics();

        let billing_offset = calendar::parse_utc_offset(&config.sweep.billing_utc_offset)
            .map_err(AppError::ConfigError)?;

        let db = Database::new(
            &config.database.url,
            config.database.max_connections,
            config.database.min_connections,
        )
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to connect to PostgreSQL");
            e
        })?;

        if run_migrations {
            db.run_migrations().await.map_err(|e| {
                tracing::error!(error = %e, "Failed to run migrations");
                e
            })?;
        }

        let db = Arc::new(db);
        let gateway = Arc::new(HttpPaymentGateway::new(&config.gateway));
        let notifier = Notifier::new(&config.notifier);

        let quota = QuotaService::new((*db).clone(), billing_offset);
        let renewal = RenewalService::new((*db).clone(), gateway, notifier, billing_offset);

        let state = AppState {
            config: config.clone(),
            db,
            quota,
            renewal,
            billing_offset,
        };

        let addr = SocketAddr::from(([0, 0, 0, 0], config.common.port));
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            tracing::error!(error = %e, addr = %addr, "Failed to bind HTTP listener");
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        tracing::info!(port = port, "Entitlement service listener bound");

        Ok(Self {
            port,
            listener,
            state,
        })
    }

    /// Get the port the server is listening on.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Get a reference to the database.
    pub fn db(&self) -> &Database {
        &self.state.db
    }

    /// Run the application until stopped.
    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        let sweep_guard = SharedSecret::new(
            SWEEP_SECRET_HEADER,
            self.state.config.sweep.shared_secret.clone(),
        );

        // Sweep triggers are scheduler-only and sit behind the shared secret.
        let sweep_routes = Router::new()
            .route("/sweeps/renewal", post(sweeps::trigger_renewal_sweep))
            .route("/sweeps/expiration", post(sweeps::trigger_expiration_sweep))
            .layer(middleware::from_fn_with_state(
                sweep_guard,
                shared_secret_middleware,
            ));

        let api_routes = Router::new()
            .route("/quota/check", post(quota::check_quota))
            .route("/quota/deduct", post(quota::deduct_quota))
            .route("/accounts/:account_id/entitlement", get(accounts::get_entitlement))
            .route("/accounts/:account_id/usage", get(accounts::list_usage))
            .route(
                "/accounts/:account_id/transactions",
                get(accounts::list_transactions),
            );

        let router = Router::new()
            .route("/health", get(health_check))
            .route("/ready", get(readiness_check))
            .route("/metrics", get(metrics_handler))
            .merge(api_routes)
            .merge(sweep_routes)
            .layer(TraceLayer::new_for_http())
            .layer(middleware::from_fn(metrics_middleware))
            .layer(middleware::from_fn(request_id_middleware))
            .with_state(self.state);

        tracing::info!(
            service = "entitlement-service",
            version = env!("CARGO_PKG_VERSION"),
            port = self.port,
            "Service ready to accept connections"
        );

        axum::serve(self.listener, router).await
    }
}
