//! HTTP surface: token lookup, health and metrics

use std::sync::Arc;
use std::time::Instant;

use axum::extract::{MatchedPath, Query, Request, State};
use axum::http::{StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::{Deserialize, Serialize};
use token_pool::TokenPool;
use tracing::{debug, info};

use crate::error::ApiError;

/// Shared application state accessible from all handlers
#[derive(Clone)]
pub struct AppState {
    pub pool: Arc<TokenPool>,
    pub prometheus: PrometheusHandle,
}

#[derive(Debug, Deserialize)]
pub struct TokenQuery {
    #[serde(rename = "appId")]
    app_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenBody {
    pub access_token: String,
    pub expires_in: i64,
}

/// Build the axum router with all routes and shared state.
///
/// `max_connections` caps concurrent requests; excess requests queue.
pub fn build_router(state: AppState, max_connections: usize) -> Router {
    Router::new()
        .route("/api/v1/token", get(token_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .layer(middleware::from_fn(log_request))
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_connections))
        .with_state(state)
}

/// `GET /api/v1/token?appId=<id>`
async fn token_handler(
    State(state): State<AppState>,
    Query(query): Query<TokenQuery>,
) -> Result<Json<TokenBody>, ApiError> {
    let Some(app_id) = query.app_id.filter(|id| !id.is_empty()) else {
        crate::metrics::record_lookup("missing_app_id");
        return Err(ApiError::MissingAppId);
    };

    match state.pool.token(&app_id).await {
        Ok(lookup) => {
            crate::metrics::record_lookup("hit");
            Ok(Json(TokenBody {
                access_token: lookup.token,
                expires_in: lookup.expires_in_secs,
            }))
        }
        Err(e) => {
            debug!(app_id, error = %e, "token lookup failed");
            let err = ApiError::from(e);
            crate::metrics::record_lookup(match err {
                ApiError::MissingAppId => "missing_app_id",
                ApiError::NotFound => "not_found",
                ApiError::FetchFailed => "fetch_failed",
                ApiError::Internal => "internal",
            });
            Err(err)
        }
    }
}

/// Pool health. 200 while at least one app can be served, 503 otherwise.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let body = state.pool.health().await;
    let status_code = if body["status"] == "unhealthy" {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };
    (status_code, Json(body))
}

/// Prometheus metrics endpoint in text exposition format.
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(
            header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.prometheus.render(),
    )
}

/// Access log line plus duration histogram per request. The query string is
/// left out of the log; only the app id would be in it, and the handler logs
/// that where it matters.
async fn log_request(request: Request, next: Next) -> Response {
    let started = Instant::now();
    let method = request.method().clone();
    let path = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_owned())
        .unwrap_or_else(|| "unmatched".to_owned());

    let response = next.run(request).await;

    let status = response.status().as_u16();
    let elapsed = started.elapsed();
    crate::metrics::record_request(&path, status, elapsed.as_secs_f64());
    info!(
        method = %method,
        path,
        status,
        duration_ms = elapsed.as_millis() as u64,
        "request completed"
    );
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use chrono::{TimeDelta, Utc};
    use std::time::Duration;
    use token_pool::{DiskStore, RefreshSettings, TokenHolder, TokenRecord};
    use tower::ServiceExt;
    use wechat_auth::{Credential, TokenClient, TokenResponse};

    /// Nothing listens here; handlers must never trigger a fetch.
    const DEAD_ENDPOINT: &str = "http://127.0.0.1:9/cgi-bin/token";

    fn test_prometheus_handle() -> PrometheusHandle {
        let recorder = metrics_exporter_prometheus::PrometheusBuilder::new().build_recorder();
        recorder.handle()
    }

    fn issued(app_id: &str, token: &str, age_secs: i64) -> TokenRecord {
        TokenRecord::issued(
            app_id,
            &TokenResponse {
                access_token: token.into(),
                expires_in: 7200,
            },
            Utc::now() - TimeDelta::seconds(age_secs),
        )
    }

    /// Pool with `wx1` seeded from disk and `wx2` registered but empty.
    /// Refresh loops are not started.
    async fn seeded_state(dir: &tempfile::TempDir) -> AppState {
        let store = Arc::new(DiskStore::new(dir.path().join("token.json")));
        store
            .save(&[issued("wx1", "tok-wx1", 100), TokenRecord::placeholder("wx2")])
            .await
            .unwrap();

        let pool = Arc::new(TokenPool::new(store));
        let client = TokenClient::with_timeout(DEAD_ENDPOINT, Duration::from_secs(1)).unwrap();
        for app_id in ["wx1", "wx2"] {
            pool.put(TokenHolder::new(
                Credential::new(app_id, format!("secret-{app_id}")),
                client.clone(),
                RefreshSettings::default(),
            ))
            .await
            .unwrap();
        }

        AppState {
            pool,
            prometheus: test_prometheus_handle(),
        }
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn token_lookup_returns_cached_token() {
        let dir = tempfile::tempdir().unwrap();
        let app = build_router(seeded_state(&dir).await, 1000);

        let (status, json) = get_json(app, "/api/v1/token?appId=wx1").await;
        assert_eq!(status, StatusCode::OK);

        let body: TokenBody = serde_json::from_value(json).unwrap();
        assert_eq!(body.access_token, "tok-wx1");
        assert!(
            (7095..=7100).contains(&body.expires_in),
            "expires_in: {}",
            body.expires_in
        );
    }

    #[tokio::test]
    async fn token_lookup_without_app_id_is_bad_request() {
        let dir = tempfile::tempdir().unwrap();
        let state = seeded_state(&dir).await;

        for uri in ["/api/v1/token", "/api/v1/token?appId="] {
            let (status, json) = get_json(build_router(state.clone(), 1000), uri).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}");
            assert_eq!(json, serde_json::json!({ "error": "missing appId" }));
        }
    }

    #[tokio::test]
    async fn token_lookup_for_unknown_app_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let app = build_router(seeded_state(&dir).await, 1000);

        let (status, json) = get_json(app, "/api/v1/token?appId=wx-unknown").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json, serde_json::json!({ "error": "not found" }));
    }

    #[tokio::test]
    async fn token_lookup_before_first_fetch_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let app = build_router(seeded_state(&dir).await, 1000);

        let (status, json) = get_json(app, "/api/v1/token?appId=wx2").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(json, serde_json::json!({ "error": "fetch failed" }));
    }

    #[tokio::test]
    async fn health_reports_degraded_pool() {
        let dir = tempfile::tempdir().unwrap();
        let app = build_router(seeded_state(&dir).await, 1000);

        let (status, json) = get_json(app, "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "degraded");
        assert_eq!(json["apps_total"], 2);
        assert_eq!(json["apps_fresh"], 1);
        assert_eq!(json["apps_empty"], 1);
        assert_eq!(json["apps"][0]["app_id"], "wx1");
        assert_eq!(json["apps"][1]["status"], "empty");
    }

    #[tokio::test]
    async fn health_is_unavailable_when_nothing_can_be_served() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(DiskStore::new(dir.path().join("token.json")));
        let state = AppState {
            pool: Arc::new(TokenPool::new(store)),
            prometheus: test_prometheus_handle(),
        };

        let (status, json) = get_json(build_router(state, 1000), "/health").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(json["status"], "unhealthy");
        assert_eq!(json["apps_total"], 0);
    }

    #[tokio::test]
    async fn metrics_endpoint_returns_prometheus_format() {
        let (recorder, handle) = crate::metrics::isolated_recorder();
        let _guard = metrics::set_default_local_recorder(&recorder);

        let dir = tempfile::tempdir().unwrap();
        let mut state = seeded_state(&dir).await;
        state.prometheus = handle;

        let response = build_router(state.clone(), 1000)
            .oneshot(
                Request::builder()
                    .uri("/api/v1/token?appId=wx1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = build_router(state, 1000)
            .oneshot(
                Request::builder()
                    .uri("/metrics")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .unwrap()
            .to_str()
            .unwrap()
            .to_owned();
        assert!(content_type.starts_with("text/plain"));

        let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("token_lookups_total{outcome=\"hit\"} 1"), "got: {text}");
        assert!(text.contains("path=\"/api/v1/token\""), "got: {text}");
    }

    #[tokio::test]
    async fn unknown_route_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let app = build_router(seeded_state(&dir).await, 1000);

        let response = app
            .oneshot(Request::builder().uri("/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
