//! HTTP read API.
//!
//! Serves raw snapshots, daily aggregates and per-delegator history as JSON.
//! Every delegation route sits behind the per-client rate limiter; `/health`
//! does not.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::routing::get;
use axum::{middleware, Router};
use log::info;
use tokio_util::sync::CancellationToken;

use crate::config::ApiSettings;

mod query;
mod rate_limit;
mod routes;

pub use query::QueryService;
pub use rate_limit::{client_identity, RateLimited, RateLimiter, TokenBucket};
pub use routes::ApiError;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub queries: QueryService,
    pub limiter: Arc<RateLimiter>,
    pub trust_forwarded_for: bool,
}

impl AppState {
    pub fn new(queries: QueryService, settings: &ApiSettings) -> Self {
        Self {
            queries,
            limiter: Arc::new(RateLimiter::new(&settings.rate_limit)),
            trust_forwarded_for: settings.trust_forwarded_for,
        }
    }
}

/// Builds the router. `base_path` prefixes the delegation routes (empty or
/// `/` serves them at the root).
pub fn router(state: AppState, base_path: &str) -> Router {
    let delegations = Router::new()
        .route(
            "/validators/:validator_addr/delegations/hourly",
            get(routes::get_hourly),
        )
        .route(
            "/validators/:validator_addr/delegations/daily",
            get(routes::get_daily),
        )
        .route(
            "/validators/:validator_addr/delegator/:delegator_addr/history",
            get(routes::get_delegator_history),
        )
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            routes::rate_limit,
        ));

    let base_path = base_path.trim_end_matches('/');
    let app = if base_path.is_empty() {
        Router::new().merge(delegations)
    } else {
        Router::new().nest(base_path, delegations)
    };

    app.route("/health", get(routes::get_health))
        .with_state(state)
}

/// Serves the API on `settings.bind_address` until `cancellation_token` fires.
pub async fn serve(
    settings: &ApiSettings,
    state: AppState,
    cancellation_token: CancellationToken,
) -> anyhow::Result<()> {
    let app = router(state, &settings.base_path);

    let listener = tokio::net::TcpListener::bind(&settings.bind_address)
        .await
        .with_context(|| format!("Failed to bind API to {}", settings.bind_address))?;
    info!("API listening on {}", settings.bind_address);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move { cancellation_token.cancelled().await })
    .await
    .context("API server failed")?;

    info!("API server stopped");
    Ok(())
}
