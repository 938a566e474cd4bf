//! Default values shared by [`MuxConfig`](crate::MuxConfig) and its serde
//! representation.

use crate::logging::{LogFormat, RoutingLog};
use crate::overflow::OverflowPolicy;

/// Largest frame accepted from or written to the daemon (4 MiB).
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 4 << 20;

/// Number of delivery workers routing inbound messages.
pub const DEFAULT_DISPATCH_WORKERS: usize = 4;

/// Capacity of the queue between the reader thread and the workers.
pub const DEFAULT_DISPATCH_QUEUE: usize = 64;

/// Inbound requests buffered per capability before the overflow policy applies.
pub const DEFAULT_HANDLER_QUEUE: usize = 16;

/// Default log filter expression.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Default maximum frame size.
#[must_use]
pub const fn default_max_message_size() -> usize {
    DEFAULT_MAX_MESSAGE_SIZE
}

/// Default delivery worker count.
#[must_use]
pub const fn default_dispatch_workers() -> usize {
    DEFAULT_DISPATCH_WORKERS
}

/// Default dispatch queue capacity.
#[must_use]
pub const fn default_dispatch_queue() -> usize {
    DEFAULT_DISPATCH_QUEUE
}

/// Default per-capability buffer.
#[must_use]
pub const fn default_handler_queue() -> usize {
    DEFAULT_HANDLER_QUEUE
}

/// Default overflow policy for saturated capability queues.
#[must_use]
pub const fn default_overflow_policy() -> OverflowPolicy {
    OverflowPolicy::Reject
}

/// Owned log filter value used where allocation is required (e.g. serde).
#[must_use]
pub fn default_log_filter_string() -> String {
    DEFAULT_LOG_FILTER.to_owned()
}

/// Default logging format.
#[must_use]
pub const fn default_log_format() -> LogFormat {
    LogFormat::Json
}

/// Default per-message verbosity.
#[must_use]
pub const fn default_routing_log() -> RoutingLog {
    RoutingLog::Summary
}
