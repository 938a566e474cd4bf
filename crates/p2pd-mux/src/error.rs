//! Error types surfaced by the multiplexer.

use std::io;
use std::time::Duration;

use p2pd_config::ConfigError;
use p2pd_types::{CallId, ProtocolId};
use thiserror::Error;

use crate::framing::FrameError;
use crate::registry::RegistryError;

/// Errors returned by [`crate::Multiplexer`] operations.
#[derive(Debug, Error)]
pub enum MuxError {
    /// The supplied configuration is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Writing a frame failed.
    #[error("failed to write to daemon connection: {0}")]
    Frame(#[from] FrameError),

    /// The connection could not be split into read and write halves.
    #[error("failed to split daemon connection: {0}")]
    Split(#[source] io::Error),

    /// A dispatch thread could not be started.
    #[error("failed to spawn {thread} thread: {source}")]
    Spawn {
        /// Role of the thread.
        thread: &'static str,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// The connection closed before the awaited message arrived.
    #[error("connection closed")]
    ConnectionClosed,

    /// The handler was unregistered while a caller waited on it.
    #[error("handler for protocol {protocol} was unregistered")]
    HandlerUnregistered {
        /// Protocol that was unregistered.
        protocol: ProtocolId,
    },

    /// No message arrived within the caller's deadline.
    #[error("timed out after {timeout:?}")]
    Timeout {
        /// Deadline that elapsed.
        timeout: Duration,
    },

    /// Another caller is already waiting for this call.
    #[error("call {call_id} is already awaited")]
    DuplicateCall {
        /// Identifier in use.
        call_id: CallId,
    },

    /// The pending-call limit was reached.
    #[error("too many pending calls (limit {capacity})")]
    RegistryFull {
        /// Configured limit.
        capacity: usize,
    },

    /// The dispatch thread panicked.
    #[error("dispatch thread panicked")]
    DispatchPanicked,
}

impl MuxError {
    pub(crate) const fn from_call_registry(error: RegistryError, call_id: CallId) -> Self {
        match error {
            RegistryError::Closed => Self::ConnectionClosed,
            RegistryError::Occupied => Self::DuplicateCall { call_id },
            RegistryError::Full { capacity } => Self::RegistryFull { capacity },
        }
    }

    pub(crate) const fn from_handler_registry(error: RegistryError) -> Self {
        match error {
            RegistryError::Closed | RegistryError::Occupied => Self::ConnectionClosed,
            RegistryError::Full { capacity } => Self::RegistryFull { capacity },
        }
    }
}
