//! Structured logging.
//!
//! # Responsibilities
//! - Initialize the logging facility before any other subsystem logs
//! - Route events to two independent sinks: informational (stdout) and
//!   error (stderr, with source locations)
//! - Configure log level from `RUST_LOG` or the settings
//!
//! # Design Decisions
//! - Uses tracing crate for structured logging
//! - JSON format for production, human format for development
//! - Installing twice is reported, not fatal (tests share one process)

use std::io;

use thiserror::Error;
use tracing::{Level, Metadata, Subscriber};
use tracing_subscriber::filter::{filter_fn, EnvFilter, ParseError};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::Layer;

use crate::config::ObservabilityConfig;

/// Error type for logging initialization.
#[derive(Debug, Error)]
pub enum LoggingError {
    /// The configured level is not a valid filter directive.
    #[error("invalid log filter `{directive}`")]
    Filter {
        directive: String,
        #[source]
        source: ParseError,
    },
    /// A global subscriber is already installed.
    #[error("a global subscriber is already installed")]
    AlreadyInstalled,
}

/// Which sink an event belongs to.
fn is_error_event(metadata: &Metadata<'_>) -> bool {
    *metadata.level() <= Level::WARN
}

fn sink<S, W>(writer: W, json: bool, with_location: bool) -> Box<dyn Layer<S> + Send + Sync>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let layer = tracing_subscriber::fmt::layer()
        .with_writer(writer)
        .with_file(with_location)
        .with_line_number(with_location);
    if json {
        layer.json().boxed()
    } else {
        layer.boxed()
    }
}

/// Install the global subscriber with the informational and error sinks.
pub fn init_logging(config: &ObservabilityConfig) -> Result<(), LoggingError> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.log_level).map_err(|source| LoggingError::Filter {
            directive: config.log_level.clone(),
            source,
        })?,
    };

    let info_sink = sink(io::stdout, config.json, false)
        .with_filter(filter_fn(|metadata| !is_error_event(metadata)));
    let error_sink = sink(io::stderr, config.json, true)
        .with_filter(filter_fn(is_error_event));

    tracing_subscriber::registry()
        .with(filter)
        .with(info_sink)
        .with(error_sink)
        .try_init()
        .map_err(|_| LoggingError::AlreadyInstalled)
}
