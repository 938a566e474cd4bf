//! Logging settings consumed by the telemetry initialiser.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::defaults::{default_log_filter_string, default_log_format, default_routing_log};

/// Supported logging output formats.
#[derive(
    Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, EnumString, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum LogFormat {
    /// One JSON object per event.
    #[default]
    Json,
    /// Human-readable single line output.
    Compact,
}

/// How much the multiplexer reports about individual messages.
///
/// Applied on top of the filter expression as directives for the
/// multiplexer's routing and writer targets.
#[derive(
    Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, EnumString, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum RoutingLog {
    /// Only malformed traffic and failures.
    Quiet,
    /// Defer to the filter expression.
    #[default]
    Summary,
    /// Every routed message and every written frame.
    Verbose,
}

/// Errors encountered while parsing a [`LogFormat`] from text.
pub type LogFormatParseError = strum::ParseError;

/// Filter expression and output format for the `tracing` subscriber.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct LogSettings {
    /// `EnvFilter` directive string, e.g. `info,p2pd_mux=debug`.
    #[serde(default = "default_log_filter_string")]
    pub filter: String,
    /// Output format.
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    /// Per-message verbosity of the multiplexer's own events.
    #[serde(default = "default_routing_log")]
    pub routing: RoutingLog,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            filter: default_log_filter_string(),
            format: default_log_format(),
            routing: default_routing_log(),
        }
    }
}
