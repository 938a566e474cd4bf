//! Shared configuration for the p2pd connection multiplexer.
//!
//! [`MuxConfig`] bounds the resources a multiplexer may use: the largest frame
//! accepted on the wire, the size of the delivery worker pool and its queue,
//! how many inbound requests a protocol handler may buffer, and what happens when
//! that buffer is full. The struct is plain `serde` data so embedding
//! applications can load it from whatever configuration source they already
//! use; nothing here reads files, flags or environment variables.
//!
//! ```
//! use p2pd_config::{MuxConfig, OverflowPolicy};
//!
//! let config = MuxConfig::default()
//!     .with_dispatch_workers(2)
//!     .with_overflow_policy(OverflowPolicy::Block);
//! config.validate().expect("valid configuration");
//! assert_eq!(config.dispatch_workers(), 2);
//! ```

mod defaults;
mod logging;
mod overflow;

#[cfg(test)]
mod tests;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use defaults::{
    DEFAULT_DISPATCH_QUEUE, DEFAULT_DISPATCH_WORKERS, DEFAULT_HANDLER_QUEUE, DEFAULT_LOG_FILTER,
    DEFAULT_MAX_MESSAGE_SIZE,
};
pub use logging::{LogFormat, LogFormatParseError, LogSettings, RoutingLog};
pub use overflow::OverflowPolicy;

use defaults::{
    default_dispatch_queue, default_dispatch_workers, default_handler_queue,
    default_max_message_size, default_overflow_policy,
};

/// Resource limits and policies for one multiplexed daemon connection.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct MuxConfig {
    #[serde(default = "default_max_message_size")]
    max_message_size: usize,
    #[serde(default = "default_dispatch_workers")]
    dispatch_workers: usize,
    #[serde(default = "default_dispatch_queue")]
    dispatch_queue: usize,
    #[serde(default = "default_handler_queue")]
    handler_queue: usize,
    #[serde(default = "default_overflow_policy")]
    overflow_policy: OverflowPolicy,
    #[serde(default)]
    max_pending_calls: Option<usize>,
    #[serde(default)]
    logging: LogSettings,
}

impl Default for MuxConfig {
    fn default() -> Self {
        Self {
            max_message_size: default_max_message_size(),
            dispatch_workers: default_dispatch_workers(),
            dispatch_queue: default_dispatch_queue(),
            handler_queue: default_handler_queue(),
            overflow_policy: default_overflow_policy(),
            max_pending_calls: None,
            logging: LogSettings::default(),
        }
    }
}

impl MuxConfig {
    /// Sets the largest frame, in bytes, accepted in either direction.
    #[must_use]
    pub const fn with_max_message_size(mut self, bytes: usize) -> Self {
        self.max_message_size = bytes;
        self
    }

    /// Sets the number of delivery worker threads.
    #[must_use]
    pub const fn with_dispatch_workers(mut self, workers: usize) -> Self {
        self.dispatch_workers = workers;
        self
    }

    /// Sets the capacity of the reader-to-worker queue.
    #[must_use]
    pub const fn with_dispatch_queue(mut self, capacity: usize) -> Self {
        self.dispatch_queue = capacity;
        self
    }

    /// Sets how many inbound requests a capability buffers.
    #[must_use]
    pub const fn with_handler_queue(mut self, capacity: usize) -> Self {
        self.handler_queue = capacity;
        self
    }

    /// Sets the policy applied when a capability buffer is full.
    #[must_use]
    pub const fn with_overflow_policy(mut self, policy: OverflowPolicy) -> Self {
        self.overflow_policy = policy;
        self
    }

    /// Caps the number of calls that may await a response at once.
    #[must_use]
    pub const fn with_max_pending_calls(mut self, limit: Option<usize>) -> Self {
        self.max_pending_calls = limit;
        self
    }

    /// Replaces the logging settings.
    #[must_use]
    pub fn with_logging(mut self, logging: LogSettings) -> Self {
        self.logging = logging;
        self
    }

    /// Largest frame, in bytes, accepted in either direction.
    #[must_use]
    pub const fn max_message_size(&self) -> usize {
        self.max_message_size
    }

    /// Number of delivery worker threads.
    #[must_use]
    pub const fn dispatch_workers(&self) -> usize {
        self.dispatch_workers
    }

    /// Capacity of the reader-to-worker queue.
    #[must_use]
    pub const fn dispatch_queue(&self) -> usize {
        self.dispatch_queue
    }

    /// Inbound requests buffered per capability.
    #[must_use]
    pub const fn handler_queue(&self) -> usize {
        self.handler_queue
    }

    /// Policy applied when a capability buffer is full.
    #[must_use]
    pub const fn overflow_policy(&self) -> OverflowPolicy {
        self.overflow_policy
    }

    /// Optional cap on concurrently pending calls.
    #[must_use]
    pub const fn max_pending_calls(&self) -> Option<usize> {
        self.max_pending_calls
    }

    /// Filter expression handed to the `tracing` subscriber.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        self.logging.filter.as_str()
    }

    /// Output format for the `tracing` subscriber.
    #[must_use]
    pub const fn log_format(&self) -> LogFormat {
        self.logging.format
    }

    /// Per-message verbosity of the multiplexer's own events.
    #[must_use]
    pub const fn log_routing(&self) -> RoutingLog {
        self.logging.routing
    }

    /// Checks that every limit leaves the multiplexer able to make progress.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found.
    pub const fn validate(&self) -> Result<(), ConfigError> {
        if self.max_message_size == 0 {
            return Err(ConfigError::ZeroLimit {
                field: "max_message_size",
            });
        }
        if self.dispatch_workers == 0 {
            return Err(ConfigError::ZeroLimit {
                field: "dispatch_workers",
            });
        }
        if self.dispatch_queue == 0 {
            return Err(ConfigError::ZeroLimit {
                field: "dispatch_queue",
            });
        }
        if let Some(0) = self.max_pending_calls {
            return Err(ConfigError::ZeroLimit {
                field: "max_pending_calls",
            });
        }
        Ok(())
    }
}

/// Errors reported by [`MuxConfig::validate`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A limit that must be positive was zero.
    #[error("configuration field '{field}' must be greater than zero")]
    ZeroLimit {
        /// Name of the offending field.
        field: &'static str,
    },
}
