//! # tokctl: token purchases for AI agents
//!
//! `tokctl` prices, sells and credits the tokens that AI customer-service agents consume. A
//! customer picks an agent they own, a model and a number of tokens; the service prices the
//! purchase, takes payment through Razorpay and credits the agent's per-model balance.
//!
//! ## Purchase lifecycle
//!
//! 1. **Quote** ([`billing::PurchaseVerifier`]): validate the request and the agent's
//!    ownership, price the tokens from the catalog, apply the tiered base discount and at
//!    most one coupon or offer.
//! 2. **Order** ([`checkout::Checkout::create_order`]): record a pending order carrying the
//!    verified bill, then create the gateway order. Orders with nothing to pay are
//!    fulfilled on the spot.
//! 3. **Confirmation** ([`checkout::Checkout::confirm_payment`], or the Razorpay webhook):
//!    check the payment is captured, credit the tokens through
//!    [`allotment::TokenAllotmentEngine`], mark the order paid and redeem the promotion.
//!
//! Fulfilment is idempotent. The order's receipt is recorded with the credit in the same
//! step, so a confirmation retried after a failure between crediting and marking the order
//! paid does not credit twice.
//!
//! ## Storage
//!
//! Every store sits behind a repository trait ([`db::handlers::repository`]) with a
//! PostgreSQL implementation and an in-process one ([`db::memory::MemoryStore`]) used for
//! development and tests. The backend is chosen by `database.type` in the configuration.
//!
//! ## Running
//!
//! ```bash
//! TOKCTL_SECRET_KEY=... DATABASE_URL=postgres://localhost/tokctl tokctl -f config.yaml
//! ```
//!
//! See [`config`] for every setting.

pub mod allotment;
pub mod api;
pub mod auth;
pub mod billing;
pub mod checkout;
pub mod config;
pub mod db;
pub mod errors;
mod openapi;
pub mod payment_providers;
pub mod telemetry;
pub mod types;

#[cfg(test)]
pub mod test_utils;

use crate::allotment::TokenAllotmentEngine;
use crate::checkout::Checkout;
use crate::config::{CorsOrigin, DatabaseConfig, PoolSettings};
use crate::db::handlers::Repositories;
use crate::db::memory::MemoryStore;
use crate::openapi::ApiDoc;
use crate::payment_providers::PaymentProvider;
use axum::http::{self, HeaderValue};
use axum::{
    Json, Router,
    routing::{get, patch, post, put},
};
use axum_prometheus::PrometheusMetricLayer;
use bon::Builder;
pub use config::Config;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::{Level, debug, info, instrument, warn};
use utoipa::OpenApi;

/// Application state shared across all request handlers.
///
/// ```ignore
/// let state = AppState::builder()
///     .config(config)
///     .repos(Repositories::postgres(pool))
///     .maybe_payments(provider)
///     .build();
/// ```
#[derive(Clone, Builder)]
pub struct AppState {
    pub config: Config,
    pub repos: Repositories,
    /// Absent when no `payment` section is configured; paid checkouts then fail with 500
    pub payments: Option<Arc<dyn PaymentProvider>>,
}

impl AppState {
    pub fn checkout(&self) -> Checkout {
        Checkout::new(&self.repos, self.payments.clone(), &self.config.purchase)
    }

    pub fn engine(&self) -> TokenAllotmentEngine {
        TokenAllotmentEngine::new(&self.repos, self.config.purchase.max_tokens_per_allotment)
    }
}

/// Get the tokctl database migrator
pub fn migrator() -> sqlx::migrate::Migrator {
    sqlx::migrate!("./migrations")
}

/// Create CORS layer from configuration
fn create_cors_layer(config: &Config) -> anyhow::Result<CorsLayer> {
    let allowed = &config.auth.cors.allowed_origins;
    let allow_origin = if allowed.contains(&CorsOrigin::Wildcard) {
        AllowOrigin::any()
    } else {
        let mut origins = Vec::new();
        for origin in allowed {
            if let CorsOrigin::Url(url) = origin {
                // Url keeps a trailing slash that browsers never send in Origin
                origins.push(url.as_str().trim_end_matches('/').parse::<HeaderValue>()?);
            }
        }
        AllowOrigin::list(origins)
    };

    let mut cors = CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([http::Method::GET, http::Method::POST, http::Method::PUT, http::Method::PATCH])
        .allow_headers([http::header::AUTHORIZATION, http::header::CONTENT_TYPE])
        .allow_credentials(config.auth.cors.allow_credentials);

    if let Some(max_age) = config.auth.cors.max_age {
        cors = cors.max_age(Duration::from_secs(max_age));
    }

    Ok(cors)
}

/// Build the application router: API routes, health check, OpenAPI document, CORS,
/// optional Prometheus metrics and request tracing.
#[instrument(skip_all)]
pub fn build_router(state: &AppState) -> anyhow::Result<Router> {
    let api_routes = Router::new()
        .route("/verify_purchase", post(api::handlers::payments::verify_purchase))
        .route("/create_order", post(api::handlers::payments::create_order))
        .route("/confirm_payment", post(api::handlers::payments::confirm_payment))
        .route("/orders", get(api::handlers::payments::list_orders))
        .route("/agents/{agent_id}/tokens", get(api::handlers::agents::get_agent_tokens))
        .route(
            "/agents/{agent_id}/tokens/{model_name}/status",
            patch(api::handlers::agents::set_model_status),
        )
        .route("/admin/discount-slab", put(api::handlers::admin::replace_discount_slab))
        .route("/admin/allotments", post(api::handlers::admin::allot_tokens))
        // Called by the gateway, authenticated by signature rather than session
        .route("/webhooks/razorpay", post(api::handlers::payments::razorpay_webhook))
        .with_state(state.clone());

    let router = Router::new()
        .route("/healthz", get(|| async { "OK" }))
        .route("/api-docs/openapi.json", get(|| async { Json(ApiDoc::openapi()) }))
        .merge(api_routes);

    let cors_layer = create_cors_layer(&state.config)?;
    let mut router = router.layer(cors_layer);

    if state.config.enable_metrics {
        let (prometheus_layer, metric_handle) = PrometheusMetricLayer::pair();
        router = router
            .route("/internal/metrics", get(|| async move { metric_handle.render() }))
            .layer(prometheus_layer);
    }

    let router = router.layer(
        TraceLayer::new_for_http()
            .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
            .on_request(DefaultOnRequest::new().level(Level::INFO))
            .on_response(DefaultOnResponse::new().level(Level::INFO)),
    );

    Ok(router)
}

fn pool_options(settings: &PoolSettings) -> PgPoolOptions {
    let seconds = |secs: u64| (secs > 0).then(|| Duration::from_secs(secs));
    PgPoolOptions::new()
        .max_connections(settings.max_connections)
        .min_connections(settings.min_connections)
        .acquire_timeout(Duration::from_secs(settings.acquire_timeout_secs))
        .idle_timeout(seconds(settings.idle_timeout_secs))
        .max_lifetime(seconds(settings.max_lifetime_secs))
}

/// Connect the configured store, run migrations and load the configured pricing catalog
async fn setup_repositories(config: &Config) -> anyhow::Result<(Repositories, Option<PgPool>)> {
    let (repos, pool) = match &config.database {
        DatabaseConfig::Memory => {
            warn!("Using the in-memory store; data will be lost on restart");
            (Repositories::in_memory(Arc::new(MemoryStore::new())), None)
        }
        DatabaseConfig::Postgres { url, pool } => {
            let pool = pool_options(pool).connect(url).await?;
            migrator().run(&pool).await?;
            info!("Database migrations applied");
            (Repositories::postgres(pool.clone()), Some(pool))
        }
    };

    for model in &config.pricing_models {
        repos.pricing.upsert_model(model).await?;
        debug!(model = %model.model_name, price = %model.price_per_token, "Pricing model loaded");
    }
    if !config.pricing_models.is_empty() {
        info!("Loaded {} pricing models from configuration", config.pricing_models.len());
    }

    Ok((repos, pool))
}

pub struct Application {
    router: Router,
    config: Config,
    pool: Option<PgPool>,
}

impl Application {
    /// Create a new application instance with all resources initialized
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        debug!("Starting tokctl with configuration: {:#?}", config);

        let (repos, pool) = setup_repositories(&config).await?;

        let payments = match config.payment.clone() {
            Some(payment_config) => Some(payment_providers::create_provider(payment_config)?),
            None => {
                warn!("No payment provider configured; only zero-payable orders can be completed");
                None
            }
        };

        let app_state = AppState::builder()
            .config(config.clone())
            .repos(repos)
            .maybe_payments(payments)
            .build();
        let router = build_router(&app_state)?;

        Ok(Self { router, config, pool })
    }

    /// Start serving the application
    pub async fn serve<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let bind_addr = self.config.bind_address();
        let listener = TcpListener::bind(&bind_addr).await?;
        info!("tokctl listening on http://{}", bind_addr);

        axum::serve(listener, self.router).with_graceful_shutdown(shutdown).await?;

        if let Some(pool) = self.pool {
            info!("Closing database connections...");
            pool.close().await;
        }

        info!("Shutting down telemetry...");
        telemetry::shutdown_telemetry();

        Ok(())
    }
}
