//! Cross-site request forgery protection.
//!
//! # Responsibilities
//! - Issue a random token in an HttpOnly, SameSite=Strict base cookie
//! - Expose the token to handlers as a [`CsrfToken`] request extension
//! - Reject unsafe requests whose submitted token does not match the cookie
//!
//! # Design Decisions
//! - Double-submit check: the token comes back in `X-CSRF-Token` or, for
//!   urlencoded forms, in the `csrf_token` field
//! - Paths under `/api/` are exempt
//! - The cookie follows `session.cookie.secure` and `session.cookie.domain`

use axum::body::{to_bytes, Body};
use axum::extract::State;
use axum::http::{header, HeaderMap, HeaderValue, Method, Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use rand::RngCore;

use crate::config::schema::CookieConfig;

/// Cookie carrying the base token.
pub const CSRF_COOKIE: &str = "csrf_token";
/// Header an unsafe request echoes the token in.
pub const CSRF_HEADER: &str = "x-csrf-token";
/// Form field accepted in place of the header.
pub const CSRF_FIELD: &str = "csrf_token";

const EXEMPT_PREFIX: &str = "/api/";
const COOKIE_MAX_AGE: u64 = 365 * 24 * 60 * 60;
const TOKEN_BYTES: usize = 32;
const MAX_FORM_BYTES: usize = 1 << 20;

/// Token for the current request, to embed in forms or headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsrfToken(pub String);

impl CsrfToken {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Cookie scope shared by every request of an entry.
#[derive(Debug, Clone, Default)]
pub struct CsrfGuard {
    secure: bool,
    domain: Option<String>,
}

impl CsrfGuard {
    pub fn new(cookie: &CookieConfig) -> Self {
        Self {
            secure: cookie.secure,
            domain: cookie.domain.clone().filter(|d| !d.is_empty()),
        }
    }

    fn cookie_header(&self, token: &str) -> String {
        let mut cookie = format!(
            "{CSRF_COOKIE}={token}; Path=/; HttpOnly; SameSite=Strict; Max-Age={COOKIE_MAX_AGE}"
        );
        if let Some(domain) = &self.domain {
            cookie.push_str(&format!("; Domain={domain}"));
        }
        if self.secure {
            cookie.push_str("; Secure");
        }
        cookie
    }
}

fn new_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn is_well_formed(token: &str) -> bool {
    token.len() == TOKEN_BYTES * 2 && token.chars().all(|c| c.is_ascii_hexdigit())
}

fn cookie_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == CSRF_COOKIE)
        .map(|(_, token)| token.to_string())
        .filter(|token| is_well_formed(token))
}

fn is_safe(method: &Method) -> bool {
    matches!(*method, Method::GET | Method::HEAD | Method::OPTIONS | Method::TRACE)
}

fn is_form(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("application/x-www-form-urlencoded"))
}

fn tokens_match(expected: &str, submitted: &str) -> bool {
    expected.len() == submitted.len()
        && expected
            .bytes()
            .zip(submitted.bytes())
            .fold(0u8, |diff, (a, b)| diff | (a ^ b))
            == 0
}

/// Pull the submitted token from the header or a urlencoded form body.
/// The body is buffered and put back for the handler.
async fn submitted_token(request: Request<Body>) -> Result<(Option<String>, Request<Body>), Response> {
    if let Some(token) = request
        .headers()
        .get(CSRF_HEADER)
        .and_then(|value| value.to_str().ok())
    {
        let token = token.to_string();
        return Ok((Some(token), request));
    }
    if !is_form(request.headers()) {
        return Ok((None, request));
    }

    let (parts, body) = request.into_parts();
    let bytes = to_bytes(body, MAX_FORM_BYTES)
        .await
        .map_err(|_| StatusCode::PAYLOAD_TOO_LARGE.into_response())?;
    let token = url::form_urlencoded::parse(&bytes)
        .find(|(name, _)| name == CSRF_FIELD)
        .map(|(_, value)| value.into_owned());
    Ok((token, Request::from_parts(parts, Body::from(bytes))))
}

/// Middleware issuing the base cookie and verifying unsafe requests.
pub async fn csrf_middleware(
    State(guard): State<CsrfGuard>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    if request.uri().path().starts_with(EXEMPT_PREFIX) {
        return next.run(request).await;
    }

    let existing = cookie_token(request.headers());
    let issued = existing.is_none();
    let token = existing.clone().unwrap_or_else(new_token);

    if !is_safe(request.method()) {
        let (submitted, rebuilt) = match submitted_token(request).await {
            Ok(parts) => parts,
            Err(response) => return response,
        };
        request = rebuilt;
        let valid = match (&existing, &submitted) {
            (Some(expected), Some(submitted)) => tokens_match(expected, submitted),
            _ => false,
        };
        if !valid {
            tracing::warn!(
                method = %request.method(),
                path = %request.uri().path(),
                has_cookie = existing.is_some(),
                has_token = submitted.is_some(),
                "Rejected request with bad CSRF token"
            );
            return (StatusCode::BAD_REQUEST, "invalid CSRF token").into_response();
        }
    }

    request.extensions_mut().insert(CsrfToken(token.clone()));
    let mut response = next.run(request).await;

    if issued {
        match HeaderValue::from_str(&guard.cookie_header(&token)) {
            Ok(value) => {
                response.headers_mut().append(header::SET_COOKIE, value);
            }
            Err(err) => tracing::error!(error = %err, "Invalid CSRF cookie"),
        }
    }
    response
}
