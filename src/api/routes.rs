use std::net::SocketAddr;

use axum::extract::{ConnectInfo, Path, Request, State};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use log::{debug, error};
use serde_json::json;

use crate::api::rate_limit::client_identity;
use crate::api::AppState;
use crate::db::{DailyTotal, DelegationSnapshot};

/// Store failure while serving a read. The detail goes to the log, not the client.
#[derive(Debug)]
pub struct ApiError(anyhow::Error);

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        error!("Query failed: {:#}", self.0);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": "internal server error" })),
        )
            .into_response()
    }
}

pub async fn get_hourly(
    State(state): State<AppState>,
    Path(validator_addr): Path<String>,
) -> Result<Json<Vec<DelegationSnapshot>>, ApiError> {
    Ok(Json(state.queries.hourly(&validator_addr).await?))
}

pub async fn get_daily(
    State(state): State<AppState>,
    Path(validator_addr): Path<String>,
) -> Result<Json<Vec<DailyTotal>>, ApiError> {
    Ok(Json(state.queries.daily(&validator_addr).await?))
}

pub async fn get_delegator_history(
    State(state): State<AppState>,
    Path((validator_addr, delegator_addr)): Path<(String, String)>,
) -> Result<Json<Vec<DelegationSnapshot>>, ApiError> {
    Ok(Json(
        state
            .queries
            .history(&validator_addr, &delegator_addr)
            .await?,
    ))
}

pub async fn get_health(State(state): State<AppState>) -> Response {
    match state.queries.health().await {
        Ok(()) => Json(json!({ "status": "ok" })).into_response(),
        Err(e) => {
            error!("Health check failed: {:#}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "status": "unavailable" })),
            )
                .into_response()
        },
    }
}

/// Rejects the request with 429 when the client's bucket is empty.
pub async fn rate_limit(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    request: Request,
    next: Next,
) -> Response {
    let client = client_identity(&headers, peer, state.trust_forwarded_for);
    match state.limiter.check(&client).await {
        Ok(()) => next.run(request).await,
        Err(rejection) => {
            debug!("Rate limited {} on {}", client, request.uri().path());
            rejection.into_response()
        },
    }
}
