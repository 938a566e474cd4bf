//! Unit tests for the multiplexer configuration.

use rstest::rstest;

use super::*;

#[rstest]
fn defaults_match_published_constants() {
    let config = MuxConfig::default();
    assert_eq!(config.max_message_size(), DEFAULT_MAX_MESSAGE_SIZE);
    assert_eq!(config.dispatch_workers(), DEFAULT_DISPATCH_WORKERS);
    assert_eq!(config.dispatch_queue(), DEFAULT_DISPATCH_QUEUE);
    assert_eq!(config.handler_queue(), DEFAULT_HANDLER_QUEUE);
    assert_eq!(config.overflow_policy(), OverflowPolicy::Reject);
    assert_eq!(config.max_pending_calls(), None);
    assert_eq!(config.log_filter(), DEFAULT_LOG_FILTER);
    assert_eq!(config.log_format(), LogFormat::Json);
    assert_eq!(config.log_routing(), RoutingLog::Summary);
    assert!(config.validate().is_ok());
}

#[rstest]
fn empty_document_deserialises_to_defaults() {
    let config: MuxConfig = serde_json::from_str("{}").expect("parse empty config");
    assert_eq!(config, MuxConfig::default());
}

#[rstest]
fn partial_document_keeps_remaining_defaults() {
    let config: MuxConfig = serde_json::from_str(
        r#"{"dispatch_workers": 8, "overflow_policy": "block", "logging": {"format": "compact"}}"#,
    )
    .expect("parse partial config");
    assert_eq!(config.dispatch_workers(), 8);
    assert_eq!(config.overflow_policy(), OverflowPolicy::Block);
    assert_eq!(config.log_format(), LogFormat::Compact);
    assert_eq!(config.log_filter(), DEFAULT_LOG_FILTER);
    assert_eq!(config.max_message_size(), DEFAULT_MAX_MESSAGE_SIZE);
}

#[rstest]
#[case::message_size(MuxConfig::default().with_max_message_size(0), "max_message_size")]
#[case::workers(MuxConfig::default().with_dispatch_workers(0), "dispatch_workers")]
#[case::queue(MuxConfig::default().with_dispatch_queue(0), "dispatch_queue")]
#[case::pending(MuxConfig::default().with_max_pending_calls(Some(0)), "max_pending_calls")]
fn validate_rejects_zero_limits(#[case] config: MuxConfig, #[case] expected: &'static str) {
    let error = config.validate().expect_err("zero limit must be rejected");
    assert_eq!(error, ConfigError::ZeroLimit { field: expected });
    assert!(error.to_string().contains(expected));
}

#[rstest]
fn zero_handler_queue_is_a_rendezvous_and_valid() {
    let config = MuxConfig::default().with_handler_queue(0);
    assert!(config.validate().is_ok());
}

#[rstest]
#[case("reject", OverflowPolicy::Reject)]
#[case("BLOCK", OverflowPolicy::Block)]
fn overflow_policy_parses_case_insensitively(#[case] input: &str, #[case] expected: OverflowPolicy) {
    let parsed: OverflowPolicy = input.parse().expect("parse policy");
    assert_eq!(parsed, expected);
}

#[rstest]
fn log_format_round_trips_through_display() {
    let parsed: LogFormat = LogFormat::Compact
        .to_string()
        .parse()
        .expect("parse log format");
    assert_eq!(parsed, LogFormat::Compact);
}

#[rstest]
#[case("quiet", RoutingLog::Quiet)]
#[case("Verbose", RoutingLog::Verbose)]
fn routing_log_parses_case_insensitively(#[case] input: &str, #[case] expected: RoutingLog) {
    let parsed: RoutingLog = input.parse().expect("parse routing verbosity");
    assert_eq!(parsed, expected);
}

#[rstest]
fn routing_log_is_read_from_the_logging_table() {
    let config: MuxConfig =
        serde_json::from_str(r#"{"logging": {"routing": "verbose"}}"#).expect("parse config");
    assert_eq!(config.log_routing(), RoutingLog::Verbose);
    assert_eq!(config.log_format(), LogFormat::Json);
}
