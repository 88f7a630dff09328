//! Response rendering.
//!
//! # Responsibilities
//! - Pick the engine for the entry role (HTML views for web, JSON for api)
//! - Interpolate `{{ dotted.path }}` placeholders in HTML views
//! - Expose the request session to views as `session.*`
//!
//! # Design Decisions
//! - Views are read from `<root>/views/<name>.html` on every render
//! - Interpolated values are HTML escaped, missing values render empty
//! - View names may not leave the views directory

use std::io;
use std::path::{Path, PathBuf};

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use serde_json::Value;
use thiserror::Error;

use crate::config::schema::RenderKind;
use crate::runtime::EntryRole;
use crate::session::Session;

/// Directory holding HTML views, relative to the root path.
pub const VIEWS_DIR: &str = "views";

/// Error type for rendering.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("invalid view name `{0}`")]
    InvalidName(String),
    #[error("view `{name}` not found")]
    NotFound { name: String },
    #[error("failed to read view {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to encode response")]
    Encode(#[from] serde_json::Error),
}

impl IntoResponse for RenderError {
    fn into_response(self) -> Response {
        tracing::error!(error = %self, "Render failed");
        let status = match self {
            RenderError::NotFound { .. } => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        status.into_response()
    }
}

/// Rendered body and its content type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rendered {
    pub content_type: &'static str,
    pub body: String,
}

impl IntoResponse for Rendered {
    fn into_response(self) -> Response {
        ([(header::CONTENT_TYPE, self.content_type)], self.body).into_response()
    }
}

/// HTML views under a directory.
#[derive(Debug, Clone)]
pub struct HtmlViews {
    dir: PathBuf,
}

impl HtmlViews {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_of(&self, name: &str) -> Result<PathBuf, RenderError> {
        let valid = !name.is_empty()
            && !name.split('/').any(|part| part.is_empty() || part == "." || part == "..")
            && !name.contains('\\');
        if !valid {
            return Err(RenderError::InvalidName(name.to_string()));
        }
        Ok(self.dir.join(format!("{name}.html")))
    }

    async fn render(&self, name: &str, context: &Value) -> Result<String, RenderError> {
        let path = self.path_of(name)?;
        let source = match tokio::fs::read_to_string(&path).await {
            Ok(source) => source,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(RenderError::NotFound {
                    name: name.to_string(),
                })
            }
            Err(source) => return Err(RenderError::Io { path, source }),
        };
        Ok(interpolate(&source, context))
    }
}

/// Render engine of an entry.
#[derive(Debug, Clone)]
pub enum RenderEngine {
    Html(HtmlViews),
    Json,
}

impl RenderEngine {
    /// Engine for `role`, honouring an explicit override. Roles without
    /// responses get `None`.
    pub fn for_role(role: EntryRole, kind: Option<RenderKind>, root: &Path) -> Option<Self> {
        let kind = match (role, kind) {
            (EntryRole::Worker | EntryRole::Cli | EntryRole::Rpc, None) => return None,
            (EntryRole::Worker | EntryRole::Cli, Some(_)) => return None,
            (_, Some(kind)) => kind,
            (EntryRole::Web, None) => RenderKind::Html,
            (EntryRole::Api, None) => RenderKind::Json,
        };
        Some(match kind {
            RenderKind::Html => RenderEngine::Html(HtmlViews::new(root.join(VIEWS_DIR))),
            RenderKind::Json => RenderEngine::Json,
        })
    }

    pub fn kind(&self) -> RenderKind {
        match self {
            RenderEngine::Html(_) => RenderKind::Html,
            RenderEngine::Json => RenderKind::Json,
        }
    }

    /// Render `template` with `data`. HTML views also see `session.*`.
    pub async fn render(
        &self,
        template: &str,
        data: &Value,
        session: Option<&Session>,
    ) -> Result<Rendered, RenderError> {
        match self {
            RenderEngine::Html(views) => {
                let mut context = match data {
                    Value::Object(map) => map.clone(),
                    Value::Null => serde_json::Map::new(),
                    other => {
                        let mut map = serde_json::Map::new();
                        map.insert("data".into(), other.clone());
                        map
                    }
                };
                if let Some(session) = session {
                    context.insert("session".into(), Value::Object(session.data()));
                }
                let body = views.render(template, &Value::Object(context)).await?;
                Ok(Rendered {
                    content_type: "text/html; charset=utf-8",
                    body,
                })
            }
            RenderEngine::Json => Ok(Rendered {
                content_type: "application/json",
                body: serde_json::to_string(data)?,
            }),
        }
    }
}

fn lookup<'a>(context: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(context, |value, key| match value {
        Value::Object(map) => map.get(key),
        Value::Array(items) => key.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

fn escape_html(raw: &str, out: &mut String) {
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
}

/// Replace `{{ path }}` placeholders with escaped values from `context`.
pub fn interpolate(source: &str, context: &Value) -> String {
    let mut out = String::with_capacity(source.len());
    let mut rest = source;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            out.push_str(&rest[start..]);
            return out;
        };
        match lookup(context, after[..end].trim()) {
            Some(Value::String(s)) => escape_html(s, &mut out),
            Some(Value::Null) | None => {}
            Some(other) => escape_html(&other.to_string(), &mut out),
        }
        rest = &after[end + 2..];
    }
    out.push_str(rest);
    out
}
