//! Configuration loading from disk.
//!
//! Resolution order: `<root>/.env` is loaded into the process environment
//! (existing variables win), `<root>/socle.toml` is read with `${VAR}`
//! references expanded, then the result is validated.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::config::schema::Settings;
use crate::config::validation::{validate_settings, ValidationError};

/// Settings file name looked up under the root path.
pub const SETTINGS_FILE: &str = "socle.toml";

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to load environment file")]
    Env(#[from] dotenvy::Error),
    #[error("failed to parse settings")]
    Parse(#[from] toml::de::Error),
    #[error("validation failed: {}", join(.0))]
    Validation(Vec<ValidationError>),
}

fn join(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load and validate settings for the project at `root`.
///
/// A missing `socle.toml` yields the defaults; a missing `.env` is ignored.
pub fn load_settings(root: &Path) -> Result<Settings, ConfigError> {
    match dotenvy::from_path(root.join(".env")) {
        Ok(()) => {}
        Err(err) if err.not_found() => {}
        Err(err) => return Err(ConfigError::Env(err)),
    }

    let path = root.join(SETTINGS_FILE);
    let content = match fs::read_to_string(&path) {
        Ok(content) => content,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "No settings file, using defaults");
            String::new()
        }
        Err(source) => return Err(ConfigError::Io { path, source }),
    };

    parse_settings(&content)
}

/// Parse and validate settings from TOML text, expanding `${VAR}` references.
pub fn parse_settings(content: &str) -> Result<Settings, ConfigError> {
    let expanded = expand_env(content, |name| std::env::var(name).ok());
    let settings: Settings = toml::from_str(&expanded)?;
    validate_settings(&settings).map_err(ConfigError::Validation)?;
    Ok(settings)
}

/// Replace `${NAME}` and `$NAME` with values from `lookup`; unknown names expand to "".
pub fn expand_env<F>(input: &str, lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    let mut out = String::with_capacity(input.len());
    let mut chars = input.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        if c != '$' {
            out.push(c);
            continue;
        }
        match chars.peek() {
            Some(&(_, '{')) => {
                let rest = &input[i + 2..];
                match rest.find('}') {
                    Some(end) => {
                        out.push_str(&lookup(&rest[..end]).unwrap_or_default());
                        // Skip "{", the name and "}".
                        for _ in 0..rest[..end].chars().count() + 2 {
                            chars.next();
                        }
                    }
                    None => out.push(c),
                }
            }
            Some(&(_, next)) if next == '_' || next.is_ascii_alphabetic() => {
                let start = i + 1;
                let mut end = start;
                while let Some(&(j, n)) = chars.peek() {
                    if n == '_' || n.is_ascii_alphanumeric() {
                        end = j + n.len_utf8();
                        chars.next();
                    } else {
                        break;
                    }
                }
                out.push_str(&lookup(&input[start..end]).unwrap_or_default());
            }
            _ => out.push(c),
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup(name: &str) -> Option<String> {
        match name {
            "PORT" => Some("9000".into()),
            "HOST" => Some("db.internal".into()),
            _ => None,
        }
    }

    #[test]
    fn expands_braced_and_bare_references() {
        assert_eq!(expand_env("port = ${PORT}", lookup), "port = 9000");
        assert_eq!(expand_env("host=$HOST:5432", lookup), "host=db.internal:5432");
        assert_eq!(expand_env("x=${MISSING}y", lookup), "x=y");
    }

    #[test]
    fn leaves_lone_dollars_alone() {
        assert_eq!(expand_env("cost $5 and ${unterminated", lookup), "cost $5 and ${unterminated");
    }

    #[test]
    fn parse_rejects_invalid_settings() {
        let err = parse_settings("[mail]\nqueue_capacity = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Validation(ref errors) if errors.len() == 1));
    }

    #[test]
    fn load_uses_defaults_without_file() {
        let dir = tempfile::tempdir().unwrap();
        let settings = load_settings(dir.path()).unwrap();
        assert_eq!(settings.entries.web.port, 8090);
    }

    #[test]
    fn load_reads_settings_file() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join(SETTINGS_FILE),
            "[app]\nname = \"shop\"\n[control]\nport = 4001\n",
        )
        .unwrap();
        let settings = load_settings(dir.path()).unwrap();
        assert_eq!(settings.app.name, "shop");
        assert_eq!(settings.control.port, Some(4001));
    }
}
