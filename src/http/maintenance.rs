//! Maintenance gate.
//!
//! While maintenance is on, every request except the maintenance page gets
//! a 503 carrying the page body. The check is a single atomic load.

use std::path::{Path, PathBuf};

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, HeaderValue, Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::control::MaintenanceMode;

/// Path of the maintenance page; requests containing it bypass the gate.
pub const MAINTENANCE_PAGE: &str = "/public/maintenance.html";

const RETRY_AFTER: &str = "300";
const NO_STORE: &str = "no-store, no-cache, must-revalidate, post-check=0, pre-check=0";
const FALLBACK_PAGE: &str =
    "<!doctype html><html><body><h1>Down for maintenance</h1><p>Please try again later.</p></body></html>";

/// Gate state: the shared flag and where the page lives.
#[derive(Debug, Clone)]
pub struct MaintenanceGate {
    flag: MaintenanceMode,
    page: PathBuf,
}

impl MaintenanceGate {
    pub fn new(flag: MaintenanceMode, root: &Path) -> Self {
        Self {
            flag,
            page: root.join(MAINTENANCE_PAGE.trim_start_matches('/')),
        }
    }

    async fn unavailable(&self) -> Response {
        let body = match tokio::fs::read(&self.page).await {
            Ok(body) => body,
            Err(err) => {
                tracing::debug!(path = %self.page.display(), error = %err, "Maintenance page unavailable, using fallback");
                FALLBACK_PAGE.as_bytes().to_vec()
            }
        };
        let mut response = (StatusCode::SERVICE_UNAVAILABLE, Body::from(body)).into_response();
        let headers = response.headers_mut();
        headers.insert(header::RETRY_AFTER, HeaderValue::from_static(RETRY_AFTER));
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static(NO_STORE));
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/html; charset=utf-8"),
        );
        response
    }
}

/// Middleware answering 503 while maintenance is on.
pub async fn maintenance_gate(
    State(gate): State<MaintenanceGate>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if gate.flag.is_enabled() && !request.uri().path().contains(MAINTENANCE_PAGE) {
        return gate.unavailable().await;
    }
    next.run(request).await
}
