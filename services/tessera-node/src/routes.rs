//! Submission and bundle read surface

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use tessera_db::Database;
use tessera_intents::IntentionService;
use tessera_sequencer::{BundleSequencer, CycleOutcome, SequencerState};
use tessera_types::{Bundle, ProcessedIntention, SignedIntention};

use crate::error::{ApiError, ApiResult};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<IntentionService>,
    pub sequencer: Arc<BundleSequencer>,
    /// `None` in dev mode
    pub db: Option<Database>,
    /// Last result of the background health check
    pub db_healthy: Arc<AtomicBool>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready))
        .route("/api/v1/intentions", post(submit_intention))
        .route("/api/v1/bundles", get(list_bundles))
        .route("/api/v1/bundles/trigger", post(trigger_cycle))
        .route("/api/v1/bundles/:nonce", get(get_bundle))
        .route("/api/v1/bundles/:nonce/archival/confirm", post(confirm_archival))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReadyResponse {
    pub ready: bool,
    pub database: Option<bool>,
    pub sequencer: SequencerState,
    pub last_nonce: u64,
    pub queued_intentions: usize,
}

async fn ready(State(state): State<AppState>) -> impl IntoResponse {
    let database = state.db.as_ref().map(|_| state.db_healthy.load(Ordering::SeqCst));
    let body = ReadyResponse {
        ready: database.unwrap_or(true),
        database,
        sequencer: state.sequencer.state().await,
        last_nonce: state.sequencer.last_nonce(),
        queued_intentions: state.sequencer.cache().len().await,
    };
    let status = if body.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body))
}

async fn submit_intention(
    State(state): State<AppState>,
    Json(signed): Json<SignedIntention>,
) -> ApiResult<(StatusCode, Json<ProcessedIntention>)> {
    let processed = state.service.submit_intention(signed).await?;
    Ok((StatusCode::ACCEPTED, Json(processed)))
}

#[derive(Debug, Deserialize)]
pub struct ListParams {
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
}

fn default_limit() -> usize {
    20
}

async fn list_bundles(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> ApiResult<Json<Vec<Bundle>>> {
    Ok(Json(
        state.service.list_bundles(params.limit, params.offset).await?,
    ))
}

async fn get_bundle(State(state): State<AppState>, Path(nonce): Path<u64>) -> ApiResult<Json<Bundle>> {
    state
        .service
        .get_bundle_by_nonce(nonce)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("bundle {}", nonce)))
}

async fn confirm_archival(
    State(state): State<AppState>,
    Path(nonce): Path<u64>,
) -> ApiResult<Json<Bundle>> {
    let bundle = state
        .sequencer
        .pipeline()
        .confirm_archival(nonce, Utc::now())
        .await?;
    Ok(Json(bundle))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CycleResponse {
    pub outcome: String,
    pub nonce: Option<u64>,
    pub error: Option<String>,
}

async fn trigger_cycle(State(state): State<AppState>) -> ApiResult<Json<CycleResponse>> {
    let outcome = state.sequencer.trigger().await?;
    let nonce = outcome.nonce();
    let (label, error) = match outcome {
        CycleOutcome::Skipped => ("skipped", None),
        CycleOutcome::Published { .. } => ("published", None),
        CycleOutcome::Deferred { .. } => ("deferred", None),
        CycleOutcome::PublishFailed { error, .. } => ("publish_failed", Some(error.to_string())),
    };
    Ok(Json(CycleResponse {
        outcome: label.to_string(),
        nonce,
        error,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    use crate::config::NodeConfig;
    use crate::node::build_dev;

    async fn app() -> Router {
        let parts = build_dev(&NodeConfig::default()).await.unwrap();
        let state = AppState {
            service: parts.service,
            sequencer: parts.sequencer,
            db: None,
            db_healthy: Arc::new(AtomicBool::new(true)),
        };
        router(state)
    }

    async fn call(
        app: &Router,
        method: &str,
        uri: &str,
        body: Option<serde_json::Value>,
    ) -> (StatusCode, serde_json::Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(match body {
                Some(json) => Body::from(json.to_string()),
                None => Body::empty(),
            })
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    fn create_vault() -> serde_json::Value {
        serde_json::json!({
            "intention": {"action": "create_vault", "nonce": 1},
            "controller": "0x00000000000000000000000000000000000000AA",
            "signature": "0xsig"
        })
    }

    #[tokio::test]
    async fn test_health() {
        let app = app().await;
        let (status, body) = call(&app, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");

        let (status, body) = call(&app, "GET", "/ready", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["sequencer"], "idle");
        assert!(body["database"].is_null());
    }

    #[tokio::test]
    async fn test_submit_then_bundle() {
        let app = app().await;

        let (status, body) = call(&app, "POST", "/api/v1/intentions", Some(create_vault())).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["proofs"][0]["type"], "vault_created");
        assert_eq!(body["controller"], "0x00000000000000000000000000000000000000aa");

        let (status, body) = call(&app, "POST", "/api/v1/bundles/trigger", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["outcome"], "published");
        assert_eq!(body["nonce"], 1);

        let (_, body) = call(&app, "GET", "/ready", None).await;
        assert_eq!(body["last_nonce"], 1);
        assert_eq!(body["queued_intentions"], 0);

        let (status, body) = call(&app, "GET", "/api/v1/bundles/1", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["nonce"], 1);
        assert!(body["anchor_tx_hash"].is_string());

        let (status, body) = call(&app, "GET", "/api/v1/bundles?limit=5", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().map(|a| a.len()), Some(1));

        let (status, body) = call(&app, "POST", "/api/v1/bundles/1/archival/confirm", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["archival_status"], "confirmed");
    }

    #[tokio::test]
    async fn test_error_bodies() {
        let app = app().await;

        let (status, body) = call(&app, "GET", "/api/v1/bundles/42", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], "not_found");

        let (status, body) = call(&app, "POST", "/api/v1/bundles/42/archival/confirm", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], "bundle_not_found");

        let seed = serde_json::json!({
            "intention": {"action": "seed_vault", "nonce": 1},
            "controller": "0x00000000000000000000000000000000000000aa",
            "signature": "0xsig"
        });
        let (status, body) = call(&app, "POST", "/api/v1/intentions", Some(seed)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "invalid_intention");
    }
}
