//! HTTP handlers.

use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, info, instrument};

use super::state::GatewayState;
use crate::gate::{GateDecision, Quota};
use crate::ratelimit::Scope;

const BODY_OK: &str = "Request successful!";
const BODY_RATE_LIMITED: &str = "Rate limit exceeded. Try again later.";
const BODY_INTERNAL_ERROR: &str = "Internal Server Error";

/// Admit, reject or fail the request according to the gate.
#[instrument(skip_all, fields(client = %addr.ip()))]
pub async fn admit_handler(
    State(state): State<Arc<GatewayState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> Response {
    let scope = Scope::for_client(state.scope_mode, addr.ip());
    let decision = state.gate.handle(&scope).await;

    debug!(scope = %scope, decision = ?decision, "Admission decision made");

    match &decision {
        GateDecision::Admitted(quota) => {
            (StatusCode::OK, quota_headers(quota), BODY_OK).into_response()
        }
        GateDecision::Rejected(quota) => {
            info!(scope = %scope, mechanism = quota.mechanism.as_str(), "Rate limit exceeded");
            (StatusCode::TOO_MANY_REQUESTS, quota_headers(quota), BODY_RATE_LIMITED).into_response()
        }
        GateDecision::Failed(failure) => {
            info!(scope = %scope, error = %failure, "Failing request closed");
            (StatusCode::INTERNAL_SERVER_ERROR, BODY_INTERNAL_ERROR).into_response()
        }
    }
}

/// Report liveness together with the dependency's health.
pub async fn health_handler(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    let dependency = state.gate.dependency();
    let fallback = state.gate.fallback();
    Json(serde_json::json!({
        "status": "ok",
        "store": dependency.store_name(),
        "dependency": dependency.health(),
        "breaker": dependency.breaker_state(),
        "failure_policy": state.gate.policy(),
        "fallback": {
            "rate": fallback.rate(),
            "capacity": fallback.capacity(),
        },
        "local_scopes": state.gate.limiter().scope_count(),
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

/// Expose Prometheus metrics.
pub async fn metrics_handler() -> impl IntoResponse {
    crate::metrics::render()
}

fn quota_headers(quota: &Quota) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert("x-ratelimit-limit", HeaderValue::from(quota.limit));
    headers.insert("x-ratelimit-remaining", HeaderValue::from(quota.remaining));
    headers.insert("x-ratelimit-reset", HeaderValue::from(quota.reset_ms / 1000));
    headers
}
