//! Connection multiplexer for clients of the `p2pd` daemon.
//!
//! A client talks to the daemon over one persistent duplex stream carrying
//! length-delimited messages. Many logical exchanges share that stream:
//! unary calls the client makes to remote peers, and calls the daemon
//! forwards to protocols the client serves. [`Multiplexer`] owns the stream,
//! serialises writes behind a lock, and runs a background reader that routes
//! each inbound message either to the handler registered for its protocol or
//! to the caller awaiting its call identifier.
//!
//! Requests for protocols with no local handler are answered on the wire
//! with a `protocol <name> not supported` error. When the connection ends,
//! every waiter wakes with [`MuxError::ConnectionClosed`].
//!
//! Frames use the daemon's varint length prefix, but payloads are encoded as
//! JSON rather than protobuf. This crate therefore speaks to peers built on
//! the same [`framing`] module, such as test daemons, and is not
//! wire-compatible with a stock `p2pd` until a protobuf codec replaces
//! [`encode_message`] and [`FrameReader::read_message`].
//!
//! ```
//! use std::io;
//!
//! use p2pd_config::MuxConfig;
//! use p2pd_mux::{Multiplexer, MuxError};
//! use p2pd_types::CallId;
//!
//! # fn main() -> Result<(), MuxError> {
//! // A daemon that has already hung up.
//! let mux = Multiplexer::from_halves(io::empty(), io::sink(), &MuxConfig::default())?;
//!
//! let outcome = mux.read_unary_response(CallId::new_v4());
//! assert!(matches!(outcome, Err(MuxError::ConnectionClosed)));
//! # Ok(())
//! # }
//! ```

mod dispatch;
mod error;
pub mod framing;
mod multiplexer;
mod observer;
mod registry;
mod state;
mod stream;
pub mod telemetry;
mod waiters;

#[cfg(test)]
mod tests;

pub use error::MuxError;
pub use framing::{FrameError, FrameReader, FrameWriter, encode_message};
pub use multiplexer::{Multiplexer, MultiplexerBuilder};
pub use observer::{DispatchObserver, RejectReason, TracingObserver};
pub use registry::{ConcurrentRegistry, Registry, RegistryError};
pub use state::{CallSlot, CloseReason, HandlerSlot};
pub use stream::{DaemonStream, SplitStream, StreamCloser, StreamHalves};
pub use waiters::{HandlerSubscription, PendingCall};
