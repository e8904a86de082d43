//! Subscriber setup for the `logging` config section.
//!
//! `logging.json` picks JSON lines over pretty text, `logging.include_spans`
//! adds span enter/exit events. `RUST_LOG` overrides `logging.level` when set.

use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan, MakeWriter},
    layer::SubscriberExt,
    EnvFilter, Layer, Registry,
};

use crate::config::{ConfigLoadError, LoggingSettings};

/// Installs the global subscriber described by `settings`.
///
/// A subscriber installed earlier stays in place.
pub fn init_logging(settings: &LoggingSettings) -> Result<(), ConfigLoadError> {
    let level = level(settings)?;
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_string()));
    let _ = tracing::subscriber::set_global_default(subscriber(settings, filter, std::io::stdout));
    Ok(())
}

fn level(settings: &LoggingSettings) -> Result<Level, ConfigLoadError> {
    settings
        .level
        .parse::<Level>()
        .map_err(|_| ConfigLoadError::Invalid {
            message: format!("logging.level '{}' is not a log level", settings.level),
        })
}

fn subscriber<W>(
    settings: &LoggingSettings,
    filter: EnvFilter,
    writer: W,
) -> impl tracing::Subscriber + Send + Sync
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let span_events = if settings.include_spans {
        FmtSpan::ENTER | FmtSpan::EXIT
    } else {
        FmtSpan::NONE
    };

    let output: Box<dyn Layer<Registry> + Send + Sync> = if settings.json {
        fmt::layer()
            .json()
            .with_writer(writer)
            .with_span_events(span_events)
            .with_current_span(true)
            .with_target(true)
            .with_file(false)
            .with_line_number(false)
            .boxed()
    } else {
        fmt::layer()
            .pretty()
            .with_writer(writer)
            .with_span_events(span_events)
            .with_target(true)
            .boxed()
    };

    tracing_subscriber::registry().with(output).with(filter)
}
