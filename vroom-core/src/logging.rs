//! Tracing subscriber setup
//!
//! `logging.level` is an `EnvFilter` directive string, so per-crate levels
//! such as `info,vroom_cluster=debug` work. `RUST_LOG`, when set and valid,
//! replaces it.

use std::fs::OpenOptions;
use std::sync::Arc;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan, writer::BoxMakeWriter},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

use crate::config::LoggingConfig;
use crate::error::{Error, Result};

/// Install the global subscriber: JSON or pretty output, to stdout or an
/// appended file.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| parse_filter(&config.level))?;
    let writer = match &config.file_path {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            BoxMakeWriter::new(Arc::new(file))
        }
        None => BoxMakeWriter::new(std::io::stdout),
    };

    let base = fmt::layer()
        .with_writer(writer)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(true)
        .with_line_number(true);
    let output = if config.format == "json" {
        base.json()
            .with_current_span(true)
            .with_span_list(true)
            .with_file(true)
            .boxed()
    } else {
        base.pretty().with_file(false).boxed()
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(output)
        .try_init()
        .map_err(|e| Error::Logging(e.to_string()))
}

/// Parse a filter directive string such as `warn,vroom_sfu=trace`
pub fn parse_filter(directives: &str) -> Result<EnvFilter> {
    EnvFilter::try_new(directives)
        .map_err(|e| Error::Configuration(format!("invalid log filter {directives:?}: {e}")))
}
