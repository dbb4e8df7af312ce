//! Admin surface (spec.md §6): a thin `axum` router wrapping the
//! orchestrator's `start`/`stop`/`snapshot` and the scheduler's
//! `config`/`apply_config`. Holds no business logic of its own — built the
//! way the teacher's `rootsignal-server::routes::build_router` assembles a
//! router: `Router::new().route(...).with_state(...)` plus a CORS layer.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use catalog_core::{Error, PipelineRunner, PipelineStateSnapshot, RunMode, ScheduleConfig};
use catalog_index::SearchIndex;
use catalog_scheduler::Scheduler;
use catalog_store::CatalogStore;
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::warn;

#[derive(Clone)]
pub struct AdminState {
    pub runner: Arc<dyn PipelineRunner>,
    pub scheduler: Arc<Scheduler>,
    pub store: Arc<CatalogStore>,
    pub index: Arc<SearchIndex>,
    pub admin_shared_key: Arc<String>,
}

/// Build the admin router of spec.md §6. `state.admin_shared_key` empty
/// disables the key check entirely (local/dev convenience) — any non-empty
/// key requires every request to carry a matching `X-Admin-Key` header,
/// standing in for the full auth stack the Non-goals exclude.
pub fn build_router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/pipeline", get(get_pipeline))
        .route("/admin/pipeline/start", post(start_pipeline))
        .route("/admin/pipeline/stop", post(stop_pipeline))
        .route("/admin/schedule", get(get_schedule).post(post_schedule))
        .route("/admin/status", get(get_status))
        .layer(middleware::from_fn_with_state(state.clone(), require_admin_key))
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .with_state(state)
}

async fn require_admin_key(State(state): State<AdminState>, headers: HeaderMap, req: Request, next: Next) -> Response {
    if state.admin_shared_key.is_empty() {
        return next.run(req).await;
    }
    let provided = headers.get("x-admin-key").and_then(|v| v.to_str().ok());
    if provided == Some(state.admin_shared_key.as_str()) {
        next.run(req).await
    } else {
        (StatusCode::UNAUTHORIZED, Json(ErrorBody { error: "missing or invalid X-Admin-Key".to_string() }))
            .into_response()
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

async fn get_pipeline(State(state): State<AdminState>) -> Json<PipelineStateSnapshot> {
    Json(state.runner.snapshot().await)
}

#[derive(Deserialize)]
struct StartRequest {
    mode: RunMode,
}

async fn start_pipeline(State(state): State<AdminState>, Json(body): Json<StartRequest>) -> Response {
    match state.runner.start(body.mode).await {
        Ok(()) => StatusCode::ACCEPTED.into_response(),
        Err(Error::AlreadyRunning) => {
            (StatusCode::CONFLICT, Json(ErrorBody { error: "pipeline already running".to_string() })).into_response()
        }
        Err(e) => {
            warn!(error = %e, "pipeline start failed");
            (StatusCode::INTERNAL_SERVER_ERROR, Json(ErrorBody { error: e.to_string() })).into_response()
        }
    }
}

async fn stop_pipeline(State(state): State<AdminState>) -> Response {
    let snapshot = state.runner.snapshot().await;
    if snapshot.status != catalog_core::PipelineStatus::Running {
        return (StatusCode::CONFLICT, Json(ErrorBody { error: "pipeline is not running".to_string() }))
            .into_response();
    }
    state.runner.request_stop();
    StatusCode::ACCEPTED.into_response()
}

async fn get_schedule(State(state): State<AdminState>) -> Json<ScheduleConfig> {
    Json(state.scheduler.config().await)
}

async fn post_schedule(State(state): State<AdminState>, Json(body): Json<ScheduleConfig>) -> Response {
    match state.scheduler.apply_config(body).await {
        Ok(config) => Json(config).into_response(),
        Err(e) => (StatusCode::BAD_REQUEST, Json(ErrorBody { error: e.to_string() })).into_response(),
    }
}

#[derive(Serialize)]
struct StatusBody {
    store_reachable: bool,
    index_reachable: bool,
    game_count: i64,
    document_count: i64,
}

async fn get_status(State(state): State<AdminState>) -> Json<StatusBody> {
    let game_count = state.store.row_count().await;
    let document_count = state.index.document_count().await;

    Json(StatusBody {
        store_reachable: game_count.is_ok(),
        index_reachable: document_count.is_ok(),
        game_count: game_count.unwrap_or(0),
        document_count: document_count.unwrap_or(0) as i64,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request as HttpRequest;
    use catalog_core::{PipelineState, Result};
    use tower::ServiceExt;

    struct StubRunner {
        state: PipelineState,
    }

    #[async_trait]
    impl PipelineRunner for StubRunner {
        async fn start(&self, _mode: RunMode) -> Result<()> {
            Err(Error::AlreadyRunning)
        }
        fn request_stop(&self) {}
        async fn snapshot(&self) -> PipelineStateSnapshot {
            self.state.snapshot().await
        }
    }

    async fn test_state(admin_key: &str) -> AdminState {
        AdminState {
            runner: Arc::new(StubRunner { state: PipelineState::new() }),
            scheduler: Arc::new(
                Scheduler::load(
                    std::env::temp_dir().join("catalog-admin-test-schedule.json"),
                    Arc::new(StubRunner { state: PipelineState::new() }),
                )
                .await,
            ),
            // Lazy pools never dial out; these handlers are only exercised
            // against /admin/pipeline, which never touches store or index.
            store: Arc::new(CatalogStore::connect_lazy("postgres://localhost/unused", 1).unwrap()),
            index: Arc::new(SearchIndex::new("http://localhost:7700", "unused").unwrap()),
            admin_shared_key: Arc::new(admin_key.to_string()),
        }
    }

    #[tokio::test]
    async fn missing_admin_key_is_rejected_when_key_configured() {
        let router = build_router(test_state("secret").await);
        let resp = router
            .oneshot(HttpRequest::builder().uri("/admin/pipeline").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn empty_admin_key_disables_the_check() {
        let router = build_router(test_state("").await);
        let resp = router
            .oneshot(HttpRequest::builder().uri("/admin/pipeline").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }
}
