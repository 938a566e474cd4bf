//! Log targets of the multiplexer and a subscriber tuned for them.
//!
//! Routing events are emitted under [`DISPATCH_TARGET`] and per-frame write
//! events under [`WRITER_TARGET`]. [`filter`] turns a [`MuxConfig`] into an
//! [`EnvFilter`] whose directives for those two targets follow the
//! configured [`RoutingLog`]; embedders with their own subscriber can layer
//! it in, and [`initialise`] installs a complete one.

use std::io::{self, IsTerminal};

use once_cell::sync::OnceCell;
use tracing::{Subscriber, subscriber::SetGlobalDefaultError};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::{Directive, LevelFilter};
use tracing_subscriber::fmt;

use p2pd_config::{LogFormat, MuxConfig, RoutingLog};

/// Target of routing events raised by the dispatch loop and its workers.
pub const DISPATCH_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::dispatch");

/// Target of events raised for each frame written to the daemon.
pub const WRITER_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::writer");

static TELEMETRY_GUARD: OnceCell<()> = OnceCell::new();

/// Handle returned when telemetry has been initialised.
#[derive(Debug, Default, Clone, Copy)]
pub struct TelemetryHandle;

/// Errors encountered while configuring telemetry.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    /// Failed to parse the configured log filter expression.
    #[error("invalid log filter: {0}")]
    Filter(String),
    /// Failed to install the tracing subscriber.
    #[error("failed to install telemetry subscriber: {0}")]
    Subscriber(SetGlobalDefaultError),
}

/// Builds the event filter for `config`.
///
/// Starts from the configured filter expression and, unless routing
/// verbosity is [`RoutingLog::Summary`], pins the multiplexer's own targets:
/// `Quiet` keeps only warnings, `Verbose` reports every routed message and
/// every written frame.
///
/// # Errors
///
/// Returns [`TelemetryError::Filter`] when the expression does not parse.
pub fn filter(config: &MuxConfig) -> Result<EnvFilter, TelemetryError> {
    let base = EnvFilter::try_new(config.log_filter())
        .map_err(|error| TelemetryError::Filter(error.to_string()))?;
    let Some((dispatch, writer)) = routing_levels(config.log_routing()) else {
        return Ok(base);
    };
    Ok(base
        .add_directive(target_directive(DISPATCH_TARGET, dispatch)?)
        .add_directive(target_directive(WRITER_TARGET, writer)?))
}

const fn routing_levels(routing: RoutingLog) -> Option<(LevelFilter, LevelFilter)> {
    match routing {
        RoutingLog::Quiet => Some((LevelFilter::WARN, LevelFilter::WARN)),
        RoutingLog::Summary => None,
        RoutingLog::Verbose => Some((LevelFilter::DEBUG, LevelFilter::TRACE)),
    }
}

fn target_directive(target: &str, level: LevelFilter) -> Result<Directive, TelemetryError> {
    format!("{target}={level}")
        .parse::<Directive>()
        .map_err(|error| TelemetryError::Filter(error.to_string()))
}

/// Installs a global `tracing` subscriber configured from `config`.
///
/// Only the first call installs anything; later calls return a fresh
/// [`TelemetryHandle`]. Applications that already own a subscriber should
/// use [`filter`] instead.
///
/// # Errors
///
/// Returns [`TelemetryError::Filter`] for an unparseable filter and
/// [`TelemetryError::Subscriber`] when another subscriber is already
/// installed.
///
/// # Examples
///
/// ```rust
/// use p2pd_config::MuxConfig;
/// use p2pd_mux::telemetry;
///
/// # fn main() -> Result<(), p2pd_mux::telemetry::TelemetryError> {
/// let config = MuxConfig::default();
/// let first = telemetry::initialise(&config)?;
/// let second = telemetry::initialise(&config)?;
/// drop(first);
/// drop(second);
/// # Ok(())
/// # }
/// ```
pub fn initialise(config: &MuxConfig) -> Result<TelemetryHandle, TelemetryError> {
    TELEMETRY_GUARD
        .get_or_try_init(|| {
            let subscriber = build_subscriber(config)?;
            tracing::subscriber::set_global_default(subscriber)
                .map_err(TelemetryError::Subscriber)
        })
        .map(|()| TelemetryHandle)
}

fn build_subscriber(
    config: &MuxConfig,
) -> Result<Box<dyn Subscriber + Send + Sync>, TelemetryError> {
    let builder = fmt::Subscriber::builder()
        .with_env_filter(filter(config)?)
        .with_target(true)
        .with_level(true)
        .with_thread_ids(false)
        // Reader and worker threads are named.
        .with_thread_names(true)
        .with_writer(io::stderr)
        .with_ansi(io::stderr().is_terminal())
        .with_timer(fmt::time::UtcTime::rfc_3339());

    Ok(match config.log_format() {
        LogFormat::Json => Box::new(builder.json().flatten_event(true).finish()),
        LogFormat::Compact => Box::new(builder.compact().finish()),
    })
}

#[cfg(test)]
mod tests {
    use p2pd_config::LogSettings;
    use rstest::rstest;

    use super::*;

    fn config_with(filter: &str, routing: RoutingLog) -> MuxConfig {
        MuxConfig::default().with_logging(LogSettings {
            filter: filter.to_owned(),
            format: LogFormat::Compact,
            routing,
        })
    }

    #[rstest]
    fn invalid_filter_is_reported_before_installation() {
        let config = config_with("p2pd_mux=notalevel", RoutingLog::Summary);

        let outcome = build_subscriber(&config);

        assert!(matches!(outcome, Err(TelemetryError::Filter(_))));
    }

    #[rstest]
    #[case::summary_defers_to_the_expression("info", RoutingLog::Summary, LevelFilter::INFO)]
    #[case::verbose_traces_written_frames("info", RoutingLog::Verbose, LevelFilter::TRACE)]
    #[case::quiet_leaves_other_targets_alone("debug", RoutingLog::Quiet, LevelFilter::DEBUG)]
    fn routing_verbosity_shapes_the_filter(
        #[case] expression: &str,
        #[case] routing: RoutingLog,
        #[case] expected: LevelFilter,
    ) {
        let built = filter(&config_with(expression, routing)).expect("valid filter");

        assert_eq!(built.max_level_hint(), Some(expected));
    }

    #[rstest]
    #[case(RoutingLog::Quiet)]
    #[case(RoutingLog::Verbose)]
    fn routing_directives_name_the_multiplexer_targets(#[case] routing: RoutingLog) {
        let rendered = filter(&config_with("info", routing))
            .expect("valid filter")
            .to_string();

        assert!(rendered.contains(DISPATCH_TARGET));
        assert!(rendered.contains(WRITER_TARGET));
    }

    #[rstest]
    fn verbose_subscriber_records_routing_events() {
        let subscriber =
            build_subscriber(&config_with("warn", RoutingLog::Verbose)).expect("build subscriber");

        tracing::subscriber::with_default(subscriber, || {
            assert!(tracing::enabled!(target: DISPATCH_TARGET, tracing::Level::DEBUG));
            assert!(!tracing::enabled!(target: "unrelated", tracing::Level::DEBUG));
        });
    }
}
