//! Session subsystem.
//!
//! # Data Flow
//! ```text
//! Request
//!     → middleware: Cookie header → token → store.rs load (or a fresh session)
//!     → Session placed in request extensions for handlers and the renderer
//!     → response: changed sessions are saved and Set-Cookie is appended
//! ```
//!
//! # Design Decisions
//! - Backend chosen once at bootstrap: cookie (process memory), cache, database
//! - Untouched sessions are never written back
//! - Store failures turn into a 500 for that request only
//! - Memory and database stores are swept by a scheduler job so abandoned
//!   sessions do not accumulate

pub mod store;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, HeaderMap, HeaderValue, Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use rand::RngCore;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::cache::{CacheError, CacheHandle};
use crate::config::schema::{CookieConfig, SessionBackend, SessionConfig};
use crate::persistence::Database;
use crate::scheduler::{Cadence, JobError, JobId, Scheduler};

pub use store::{SessionData, SessionStore};

/// Name of the expired-session sweep job.
pub const SWEEP_JOB: &str = "session-sweep";

const SWEEP_PERIOD: Duration = Duration::from_secs(60);

/// Error type for session storage.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session cache failed")]
    Cache(#[from] CacheError),
    #[error("session query failed")]
    Database(#[from] sqlx::Error),
    #[error("session payload invalid")]
    Encode(#[from] serde_json::Error),
    #[error("{0} sessions require a backend that is not configured")]
    MissingBackend(&'static str),
}

#[derive(Debug)]
struct SessionInner {
    token: String,
    data: SessionData,
    is_new: bool,
    dirty: bool,
    destroyed: bool,
}

/// The session of the current request. Clones share state.
#[derive(Debug, Clone)]
pub struct Session {
    inner: Arc<Mutex<SessionInner>>,
}

fn new_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

impl Session {
    fn from_parts(token: String, data: SessionData, is_new: bool) -> Self {
        Self {
            inner: Arc::new(Mutex::new(SessionInner {
                token,
                data,
                is_new,
                dirty: false,
                destroyed: false,
            })),
        }
    }

    /// A new, empty session with a fresh token.
    pub fn fresh() -> Self {
        Self::from_parts(new_token(), SessionData::new(), true)
    }

    fn lock(&self) -> MutexGuard<'_, SessionInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn token(&self) -> String {
        self.lock().token.clone()
    }

    pub fn is_new(&self) -> bool {
        self.lock().is_new
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.lock().data.get(key).cloned()?;
        serde_json::from_value(value).ok()
    }

    pub fn insert<T: Serialize>(&self, key: impl Into<String>, value: T) -> Result<(), SessionError> {
        let value = serde_json::to_value(value)?;
        let mut inner = self.lock();
        inner.data.insert(key.into(), value);
        inner.dirty = true;
        Ok(())
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        let mut inner = self.lock();
        let removed = inner.data.remove(key);
        inner.dirty |= removed.is_some();
        removed
    }

    /// Drop all data; the stored session and the cookie are removed on commit.
    pub fn destroy(&self) {
        let mut inner = self.lock();
        inner.data.clear();
        inner.destroyed = true;
    }

    /// Snapshot of the session data.
    pub fn data(&self) -> SessionData {
        self.lock().data.clone()
    }
}

/// Loads and commits sessions for the configured backend.
#[derive(Debug, Clone)]
pub struct SessionManager {
    store: SessionStore,
    cookie: CookieConfig,
}

impl SessionManager {
    pub fn new(store: SessionStore, cookie: CookieConfig) -> Self {
        Self { store, cookie }
    }

    /// Build the manager for `config`, reusing the bootstrap cache and database.
    pub async fn from_config(
        config: &SessionConfig,
        cache: &CacheHandle,
        database: Option<&Database>,
    ) -> Result<Self, SessionError> {
        let store = match config.backend {
            SessionBackend::Cookie => SessionStore::memory(),
            SessionBackend::Distributed => match cache {
                CacheHandle::Disabled => return Err(SessionError::MissingBackend("distributed")),
                cache => SessionStore::Cache(cache.clone()),
            },
            SessionBackend::Relational => {
                let db = database.ok_or(SessionError::MissingBackend("relational"))?;
                SessionStore::database(db.clone()).await?
            }
        };
        tracing::info!(store = store.name(), cookie = %config.cookie.name, "Session store ready");
        Ok(Self::new(store, config.cookie.clone()))
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    /// Register the periodic sweep for stores that keep expired sessions.
    pub fn register_sweep(&self, scheduler: &Scheduler) -> Option<JobId> {
        if matches!(self.store, SessionStore::Cache(_)) {
            return None;
        }
        let store = self.store.clone();
        Some(scheduler.add_job(SWEEP_JOB, Cadence::every(SWEEP_PERIOD), move || {
            let store = store.clone();
            async move {
                let swept = store.sweep().await.map_err(JobError::new)?;
                if swept > 0 {
                    tracing::debug!(store = store.name(), swept, "Expired sessions removed");
                }
                Ok(())
            }
        }))
    }

    fn lifetime(&self) -> Duration {
        Duration::from_secs(self.cookie.lifetime_secs)
    }

    /// Token carried by the session cookie in `headers`, if any.
    pub fn token_from(&self, headers: &HeaderMap) -> Option<String> {
        headers
            .get_all(header::COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(|value| value.split(';'))
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(name, _)| *name == self.cookie.name)
            .map(|(_, token)| token.to_string())
            .filter(|token| !token.is_empty() && token.chars().all(|c| c.is_ascii_hexdigit()))
    }

    /// Load the session for `token`, or start a fresh one.
    pub async fn load(&self, token: Option<&str>) -> Result<Session, SessionError> {
        if let Some(token) = token {
            if let Some(data) = self.store.load(token).await? {
                return Ok(Session::from_parts(token.to_string(), data, false));
            }
        }
        Ok(Session::fresh())
    }

    /// Persist changes; returns the Set-Cookie value to send, if any.
    pub async fn commit(&self, session: &Session) -> Result<Option<String>, SessionError> {
        let (token, data, is_new, dirty, destroyed) = {
            let inner = session.lock();
            (
                inner.token.clone(),
                inner.data.clone(),
                inner.is_new,
                inner.dirty,
                inner.destroyed,
            )
        };

        if destroyed {
            if !is_new {
                self.store.destroy(&token).await?;
            }
            return Ok(Some(self.expired_cookie()));
        }
        if !dirty {
            return Ok(None);
        }
        self.store.save(&token, &data, self.lifetime()).await?;
        Ok(Some(self.cookie_header(&token)))
    }

    /// Set-Cookie value carrying `token`.
    pub fn cookie_header(&self, token: &str) -> String {
        let mut cookie = format!("{}={token}; Path=/; HttpOnly; SameSite=Lax", self.cookie.name);
        if self.cookie.persist {
            cookie.push_str(&format!("; Max-Age={}", self.cookie.lifetime_secs));
        }
        self.push_scope(&mut cookie);
        cookie
    }

    fn expired_cookie(&self) -> String {
        let mut cookie = format!("{}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0", self.cookie.name);
        self.push_scope(&mut cookie);
        cookie
    }

    fn push_scope(&self, cookie: &mut String) {
        if let Some(domain) = self.cookie.domain.as_deref().filter(|d| !d.is_empty()) {
            cookie.push_str(&format!("; Domain={domain}"));
        }
        if self.cookie.secure {
            cookie.push_str("; Secure");
        }
    }
}

/// Middleware loading the session before the handler and committing it after.
pub async fn session_middleware(
    State(manager): State<SessionManager>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let token = manager.token_from(request.headers());
    let session = match manager.load(token.as_deref()).await {
        Ok(session) => session,
        Err(err) => {
            tracing::error!(error = %err, "Failed to load session");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };
    request.extensions_mut().insert(session.clone());

    let mut response = next.run(request).await;

    match manager.commit(&session).await {
        Ok(Some(cookie)) => match HeaderValue::from_str(&cookie) {
            Ok(value) => {
                response.headers_mut().append(header::SET_COOKIE, value);
            }
            Err(err) => tracing::error!(error = %err, "Invalid session cookie"),
        },
        Ok(None) => {}
        Err(err) => {
            tracing::error!(error = %err, "Failed to save session");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    }
    response
}
