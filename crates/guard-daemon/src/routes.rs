//! Status endpoint for dashboards and operators.
//!
//! `/health` and `/status` are open. Routes that change breaker or strategy
//! state require `Authorization: Bearer <operator token>`.

use axum::body::Body;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::header::AUTHORIZATION;
use axum::http::{Request, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use guard_core::Tier;
use notifier::{ChannelHealth, Notifier};
use risk_manager::{GuardStatus, OverrideOutcome, RiskAccountant};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Environment variable holding the operator token. Never read from the config file.
pub const OPERATOR_TOKEN_ENV: &str = "OPERATOR_API_TOKEN";

/// Shared handler state.
pub struct AppState {
    pub accountant: Arc<RiskAccountant>,
    pub notifier: Arc<Notifier>,
    /// `None` disables every mutating route.
    pub operator_token: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Invalid JSON: {0}")]
    JsonRejection(String),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) | ApiError::JsonRejection(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "BAD_REQUEST",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::Unauthorized(_) => "UNAUTHORIZED",
            ApiError::JsonRejection(_) => "INVALID_JSON",
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        warn!(error = %rejection, "JSON parsing failed");
        ApiError::JsonRejection(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorResponse {
            code: self.error_code().to_string(),
            message: self.to_string(),
        };
        (self.status_code(), Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    #[serde(flatten)]
    pub guard: GuardStatus,
    pub channels: Vec<ChannelHealth>,
}

#[derive(Debug, Deserialize)]
pub struct OverrideRequest {
    /// Tier name, case-insensitive (`halt`, `REDUCE_RISK`, `reduce-risk`).
    pub tier: String,
    pub reason: String,
    #[serde(default)]
    pub confirmed: bool,
    #[serde(default = "default_source")]
    pub source: String,
}

#[derive(Debug, Serialize)]
pub struct OverrideResponse {
    #[serde(flatten)]
    pub outcome: OverrideOutcome,
    pub tier: Tier,
}

#[derive(Debug, Deserialize)]
pub struct EnableStrategyRequest {
    #[serde(default = "default_source")]
    pub source: String,
}

fn default_source() -> String {
    "http".to_string()
}

pub fn create_router(state: Arc<AppState>) -> Router {
    let operator = Router::new()
        .route("/override", post(manual_override))
        .route("/strategies/{name}/enable", post(enable_strategy))
        .layer(middleware::from_fn_with_state(state.clone(), require_operator));

    Router::new()
        .route("/health", get(health))
        .route("/status", get(status))
        .merge(operator)
        .with_state(state)
}

/// Reject requests that do not present the operator bearer token.
pub async fn require_operator(
    State(state): State<Arc<AppState>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let Some(expected) = state.operator_token.as_deref() else {
        warn!(path = %request.uri().path(), "Operator route called but no operator token is configured");
        return ApiError::Unauthorized("operator routes are disabled".to_string()).into_response();
    };

    let token = match request.headers().get(AUTHORIZATION).map(|h| h.to_str()) {
        Some(Ok(value)) => value.strip_prefix("Bearer "),
        Some(Err(_)) => {
            return ApiError::Unauthorized("invalid authorization header encoding".to_string())
                .into_response();
        }
        None => {
            return ApiError::Unauthorized("missing authorization header".to_string()).into_response();
        }
    };
    let Some(token) = token else {
        return ApiError::Unauthorized("expected 'Bearer <token>'".to_string()).into_response();
    };

    // Compare digests so the match time does not depend on the common prefix.
    if Sha256::digest(token.as_bytes()) != Sha256::digest(expected.as_bytes()) {
        warn!(path = %request.uri().path(), "Rejected operator request with a bad token");
        return ApiError::Unauthorized("invalid operator token".to_string()).into_response();
    }

    debug!(path = %request.uri().path(), "Operator request authenticated");
    next.run(request).await
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now(),
    })
}

pub async fn status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    Json(StatusResponse {
        guard: GuardStatus::collect(&state.accountant).await,
        channels: state.notifier.health(),
    })
}

pub async fn manual_override(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<OverrideRequest>, JsonRejection>,
) -> ApiResult<Json<OverrideResponse>> {
    let Json(request) = payload?;
    let target: Tier = request
        .tier
        .parse()
        .map_err(|e: guard_core::Error| ApiError::BadRequest(e.to_string()))?;

    info!(
        tier = %target,
        confirmed = request.confirmed,
        source = %request.source,
        "Override requested over HTTP"
    );
    let breaker = state.accountant.breaker();
    let outcome = breaker
        .manual_override(target, &request.reason, request.confirmed, &request.source)
        .await;

    Ok(Json(OverrideResponse {
        outcome,
        tier: breaker.tier(),
    }))
}

pub async fn enable_strategy(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    payload: Result<Json<EnableStrategyRequest>, JsonRejection>,
) -> ApiResult<StatusCode> {
    let Json(request) = payload?;
    if state.accountant.enable_strategy(&name, &request.source) {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(format!("no disabled strategy named {name}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use guard_core::config::{KillSwitchConfig, RiskConfig};
    use notifier::PanicLog;
    use risk_manager::CircuitBreaker;
    use rust_decimal::Decimal;
    use std::time::Duration;
    use tokio_test::{assert_err, assert_ok};
    use tower::ServiceExt;

    const TOKEN: &str = "op-secret";

    fn state(dir: &tempfile::TempDir) -> Arc<AppState> {
        let notifier = Arc::new(Notifier::new(
            Vec::new(),
            PanicLog::new(dir.path().join("PANIC.log")),
            Duration::from_millis(50),
        ));
        let breaker = Arc::new(CircuitBreaker::new(KillSwitchConfig::default(), notifier.clone()));
        let accountant = Arc::new(RiskAccountant::new(
            RiskConfig::default(),
            Decimal::new(1000, 0),
            breaker,
            Arc::new(guard_core::SystemClock),
        ));
        Arc::new(AppState {
            accountant,
            notifier,
            operator_token: Some(TOKEN.to_string()),
        })
    }

    fn post_json(uri: &str, token: Option<&str>, body: &str) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json");
        if let Some(token) = token {
            builder = builder.header(AUTHORIZATION, format!("Bearer {token}"));
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    fn override_request(tier: &str, confirmed: bool) -> Result<Json<OverrideRequest>, JsonRejection> {
        Ok(Json(OverrideRequest {
            tier: tier.to_string(),
            reason: "test".to_string(),
            confirmed,
            source: "ops".to_string(),
        }))
    }

    #[tokio::test]
    async fn test_health() {
        let Json(body) = health().await;
        assert_eq!(body.status, "healthy");
    }

    #[tokio::test]
    async fn test_override_escalates_and_reports_tier() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(&dir);

        let Json(response) =
            assert_ok!(manual_override(State(state.clone()), override_request("pause", false)).await);

        assert_eq!(response.tier, Tier::Pause);
        assert_eq!(
            response.outcome,
            OverrideOutcome::Applied { from: Tier::Running, to: Tier::Pause }
        );
    }

    #[tokio::test]
    async fn test_unconfirmed_halt_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(&dir);

        let Json(response) =
            assert_ok!(manual_override(State(state.clone()), override_request("HALT", false)).await);

        assert_eq!(response.outcome, OverrideOutcome::Rejected);
        assert_eq!(response.tier, Tier::Running);
        // No channels configured, so the rejection lands in the PANIC log.
        let log = std::fs::read_to_string(dir.path().join("PANIC.log")).unwrap();
        assert_eq!(log.lines().count(), 1);
    }

    #[tokio::test]
    async fn test_unknown_tier_is_bad_request() {
        let dir = tempfile::tempdir().unwrap();
        let err = assert_err!(manual_override(State(state(&dir)), override_request("panic", true)).await);
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_status_includes_books() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(&dir);
        state.accountant.record_outcome("arb", Decimal::new(5, 0)).await;

        let Json(response) = status(State(state)).await;
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["tier"], "running");
        assert_eq!(json["trading_allowed"], true);
        assert_eq!(json["strategies"][0]["name"], "arb");
        assert!(json["channels"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_enable_unknown_strategy_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let request = Ok(Json(EnableStrategyRequest { source: "ops".to_string() }));
        let err = enable_strategy(State(state(&dir)), Path("ghost".to_string()), request)
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_override_requires_operator_token() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(&dir);
        state.accountant.breaker().record_risk_breach("drawdown").await;
        let router = create_router(state.clone());
        let body = r#"{"tier":"running","reason":"undo","confirmed":true}"#;

        for token in [None, Some("wrong")] {
            let response = router
                .clone()
                .oneshot(post_json("/override", token, body))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        }
        assert_eq!(state.accountant.breaker().tier(), Tier::Halt);

        let response = router
            .oneshot(post_json("/override", Some(TOKEN), body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(state.accountant.breaker().tier(), Tier::Running);
    }

    #[tokio::test]
    async fn test_enable_strategy_requires_operator_token() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(&dir);
        state.accountant.record_outcome("arb", Decimal::new(-500, 0)).await;
        assert!(!state.accountant.is_strategy_active("arb"));
        let router = create_router(state.clone());

        let response = router
            .clone()
            .oneshot(post_json("/strategies/arb/enable", None, "{}"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(!state.accountant.is_strategy_active("arb"));

        let response = router
            .oneshot(post_json("/strategies/arb/enable", Some(TOKEN), "{}"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert!(state.accountant.is_strategy_active("arb"));
    }

    #[tokio::test]
    async fn test_operator_routes_disabled_without_token() {
        let dir = tempfile::tempdir().unwrap();
        let base = state(&dir);
        let state = Arc::new(AppState {
            accountant: base.accountant.clone(),
            notifier: base.notifier.clone(),
            operator_token: None,
        });
        let router = create_router(state);
        let body = r#"{"tier":"pause","reason":"x"}"#;

        let response = router
            .clone()
            .oneshot(post_json("/override", Some(TOKEN), body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let status = Request::builder().uri("/status").body(Body::empty()).unwrap();
        let response = router.oneshot(status).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
