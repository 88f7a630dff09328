//! Default routes and request metrics.

use std::path::PathBuf;
use std::time::Instant;

use axum::body::Body;
use axum::extract::State;
use axum::http::Request;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use tower_http::services::ServeDir;

use crate::control::MaintenanceMode;
use crate::observability::metrics;
use crate::render::RenderEngine;
use crate::runtime::EntryRole;
use crate::session::Session;

/// Directory served under `/public`, relative to the root path.
pub const PUBLIC_DIR: &str = "public";

/// State shared by the default handlers.
#[derive(Debug, Clone)]
pub struct AppState {
    pub app_name: String,
    pub version: &'static str,
    pub entry: EntryRole,
    pub root_path: PathBuf,
    pub render: Option<RenderEngine>,
    pub maintenance: MaintenanceMode,
}

/// `/` (the `home` view or a JSON status), `/health` and `/public/*`.
pub fn default_routes(state: AppState) -> Router {
    let public = ServeDir::new(state.root_path.join(PUBLIC_DIR));
    Router::new()
        .route("/", get(home))
        .route("/health", get(health))
        .nest_service("/public", public)
        .with_state(state)
}

async fn home(State(state): State<AppState>, request: Request<Body>) -> Response {
    let data = json!({
        "app_name": state.app_name,
        "version": state.version,
        "entry": state.entry.as_str(),
    });
    match &state.render {
        Some(engine) => {
            let session = request.extensions().get::<Session>();
            match engine.render("home", &data, session).await {
                Ok(rendered) => rendered.into_response(),
                Err(err) => err.into_response(),
            }
        }
        None => Json(data).into_response(),
    }
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "entry": state.entry.as_str(),
        "maintenance": state.maintenance.is_enabled(),
    }))
}

/// Middleware recording request count and latency.
pub async fn record_metrics(request: Request<Body>, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().to_string();
    let response = next.run(request).await;
    metrics::record_request(&method, response.status().as_u16(), start);
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use tower::ServiceExt;

    fn state(root: PathBuf, render: Option<RenderEngine>) -> AppState {
        AppState {
            app_name: "shop".into(),
            version: "1.0.0",
            entry: EntryRole::Api,
            root_path: root,
            render,
            maintenance: MaintenanceMode::new(),
        }
    }

    #[tokio::test]
    async fn json_home_and_static_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(PUBLIC_DIR)).unwrap();
        std::fs::write(dir.path().join(PUBLIC_DIR).join("robots.txt"), "User-agent: *").unwrap();
        let app = default_routes(state(dir.path().to_path_buf(), Some(RenderEngine::Json)));

        let response = app
            .clone()
            .oneshot(Request::get("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), 1 << 16).await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["app_name"], "shop");

        let response = app
            .oneshot(Request::get("/public/robots.txt").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn missing_home_view_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let engine = RenderEngine::for_role(EntryRole::Web, None, dir.path());
        let app = default_routes(state(dir.path().to_path_buf(), engine));
        let response = app
            .oneshot(Request::get("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
