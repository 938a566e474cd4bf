//! The stream multiplexer and its builder.

use std::io::{Read, Write};
use std::sync::Arc;
use std::time::Duration;

use p2pd_config::MuxConfig;
use p2pd_types::{CallId, ProtocolId, Request, Response};

use crate::dispatch::{DispatchHandle, PoolSize};
use crate::error::MuxError;
use crate::framing::{FrameReader, FrameWriter};
use crate::observer::{DispatchObserver, TracingObserver};
use crate::registry::{ConcurrentRegistry, Registry};
use crate::state::{
    CallRegistry, CallSlot, CloseReason, HandlerRegistry, HandlerSlot, Shared, SharedParts,
};
use crate::stream::{SplitStream, StreamCloser, StreamHalves};
use crate::waiters::{HandlerSubscription, PendingCall};

/// Multiplexes unary calls and forwarded requests over one daemon connection.
///
/// Writes from any number of threads are serialised by a writer lock. A
/// background reader routes inbound messages to the handler registered for
/// their protocol or to the caller awaiting their call identifier.
///
/// Dropping the multiplexer shuts it down; see [`Self::shutdown`].
pub struct Multiplexer {
    shared: Arc<Shared>,
    closer: Option<Box<dyn StreamCloser>>,
    dispatch: Option<DispatchHandle>,
}

impl Multiplexer {
    /// Splits `stream` and starts the dispatch loop.
    ///
    /// Returns as soon as the background threads are running; no network I/O
    /// happens here.
    ///
    /// # Errors
    ///
    /// Returns [`MuxError::Config`] for an invalid configuration,
    /// [`MuxError::Split`] when the stream cannot be split, and
    /// [`MuxError::Spawn`] when a thread cannot be started.
    pub fn new<S: SplitStream>(stream: S, config: &MuxConfig) -> Result<Self, MuxError> {
        MultiplexerBuilder::new(config.clone()).connect(stream)
    }

    /// Starts the dispatch loop over separately owned halves.
    ///
    /// [`Self::shutdown`] cannot interrupt a read on `reader`; the dispatch
    /// loop ends when `reader` reports end of stream or an error.
    ///
    /// # Errors
    ///
    /// As [`Self::new`], except that no splitting takes place.
    pub fn from_halves<R, W>(reader: R, writer: W, config: &MuxConfig) -> Result<Self, MuxError>
    where
        R: Read + Send + 'static,
        W: Write + Send + 'static,
    {
        MultiplexerBuilder::new(config.clone()).from_halves(reader, writer)
    }

    /// Returns a builder for customising observers and registries.
    #[must_use]
    pub fn builder(config: MuxConfig) -> MultiplexerBuilder {
        MultiplexerBuilder::new(config)
    }

    /// Writes one request to the daemon.
    ///
    /// The whole frame is written and flushed under the writer lock, so
    /// concurrent writers never interleave.
    ///
    /// # Errors
    ///
    /// Returns [`MuxError::Frame`] carrying the underlying failure. Nothing
    /// is retried.
    pub fn write_request(&self, request: &Request) -> Result<(), MuxError> {
        self.shared.write(request).map_err(MuxError::from)
    }

    /// Registers a local handler for `protocol`.
    ///
    /// Registering an already registered protocol is a no-op. This only
    /// affects local routing; announce the protocol to the daemon by writing
    /// [`Request::add_unary_handler`].
    ///
    /// # Errors
    ///
    /// Returns [`MuxError::ConnectionClosed`] once the multiplexer is closed.
    pub fn register_handler(&self, protocol: &ProtocolId) -> Result<(), MuxError> {
        self.handler_slot(protocol).map(|_slot| ())
    }

    /// Removes the handler for `protocol`.
    ///
    /// Subscribers drain requests already queued and then receive
    /// [`MuxError::HandlerUnregistered`]. Later requests for the protocol are
    /// answered as unsupported. Returns `false` when nothing was registered.
    pub fn unregister_handler(&self, protocol: &ProtocolId) -> bool {
        self.shared.handlers().remove(protocol).is_some()
    }

    /// Reports whether a handler is registered for `protocol`.
    #[must_use]
    pub fn has_handler(&self, protocol: &ProtocolId) -> bool {
        self.shared.handlers().contains(protocol)
    }

    /// Registers `protocol` if needed and returns a receiver for its requests.
    ///
    /// # Errors
    ///
    /// Returns [`MuxError::ConnectionClosed`] once the multiplexer is closed.
    pub fn subscribe(&self, protocol: &ProtocolId) -> Result<HandlerSubscription, MuxError> {
        let slot = self.handler_slot(protocol)?;
        Ok(HandlerSubscription::new(
            protocol.clone(),
            slot.receiver().clone(),
            Arc::clone(&self.shared),
        ))
    }

    /// Blocks until a request for `protocol` arrives, registering the
    /// protocol on first use.
    ///
    /// Concurrent callers for the same protocol share one queue, and each
    /// request is returned to exactly one of them.
    ///
    /// # Errors
    ///
    /// Returns [`MuxError::ConnectionClosed`] if the connection closes and
    /// [`MuxError::HandlerUnregistered`] if the handler is removed while
    /// waiting.
    pub fn read_unary_request(&self, protocol: &ProtocolId) -> Result<Response, MuxError> {
        self.subscribe(protocol)?.recv()
    }

    /// As [`Self::read_unary_request`], giving up after `timeout`.
    ///
    /// # Errors
    ///
    /// Additionally returns [`MuxError::Timeout`] when the deadline passes.
    pub fn read_unary_request_timeout(
        &self,
        protocol: &ProtocolId,
        timeout: Duration,
    ) -> Result<Response, MuxError> {
        self.subscribe(protocol)?.recv_timeout(timeout)
    }

    /// Registers interest in the answer to `call_id`.
    ///
    /// Call this before writing the request so a fast answer cannot be
    /// discarded ahead of the registration.
    ///
    /// # Errors
    ///
    /// Returns [`MuxError::DuplicateCall`] if `call_id` is already awaited,
    /// [`MuxError::RegistryFull`] at the pending-call limit, and
    /// [`MuxError::ConnectionClosed`] once the multiplexer is closed.
    pub fn expect_response(&self, call_id: CallId) -> Result<PendingCall, MuxError> {
        let (slot, receiver) = CallSlot::new();
        self.shared
            .calls()
            .insert(call_id, slot)
            .map_err(|error| MuxError::from_call_registry(error, call_id))?;
        Ok(PendingCall::new(call_id, receiver, Arc::clone(&self.shared)))
    }

    /// Blocks until the answer to `call_id` arrives.
    ///
    /// The call is unregistered before this returns, whatever the outcome.
    ///
    /// # Errors
    ///
    /// As [`Self::expect_response`], plus [`MuxError::ConnectionClosed`]
    /// when the connection closes while waiting.
    pub fn read_unary_response(&self, call_id: CallId) -> Result<Response, MuxError> {
        self.expect_response(call_id)?.wait()
    }

    /// As [`Self::read_unary_response`], giving up after `timeout`.
    ///
    /// # Errors
    ///
    /// Additionally returns [`MuxError::Timeout`] when the deadline passes.
    pub fn read_unary_response_timeout(
        &self,
        call_id: CallId,
        timeout: Duration,
    ) -> Result<Response, MuxError> {
        self.expect_response(call_id)?.wait_timeout(timeout)
    }

    /// Answers a forwarded call.
    ///
    /// `call_id` is echoed verbatim from the inbound request.
    ///
    /// # Errors
    ///
    /// As [`Self::write_request`].
    pub fn respond(
        &self,
        call_id: Vec<u8>,
        outcome: Result<Vec<u8>, String>,
    ) -> Result<(), MuxError> {
        self.write_request(&Request::send_response_to_remote(call_id, outcome))
    }

    /// Number of calls currently awaited.
    #[must_use]
    pub fn pending_calls(&self) -> usize {
        self.shared.calls().len()
    }

    /// Reports whether `call_id` is currently awaited.
    #[must_use]
    pub fn has_pending_call(&self, call_id: CallId) -> bool {
        self.shared.calls().contains(&call_id)
    }

    /// Number of inbound requests waiting for room in a full handler queue.
    ///
    /// Always zero under [`p2pd_config::OverflowPolicy::Reject`].
    #[must_use]
    pub fn blocked_deliveries(&self) -> usize {
        self.shared.blocked_deliveries()
    }

    /// Reports whether the multiplexer has closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// Why the multiplexer closed, once it has.
    #[must_use]
    pub fn close_reason(&self) -> Option<CloseReason> {
        self.shared.close_reason()
    }

    /// Closes the multiplexer.
    ///
    /// Shuts the socket down when the connection supports it, closes both
    /// registries and wakes every waiter with [`MuxError::ConnectionClosed`].
    /// Calling it again, or after the connection closed by itself, does
    /// nothing.
    pub fn shutdown(&self) {
        if !self.shared.begin_close() {
            return;
        }
        if let Some(closer) = &self.closer
            && let Err(error) = closer.close()
        {
            tracing::debug!(
                target: crate::telemetry::DISPATCH_TARGET,
                error = %error,
                "failed to shut down daemon connection"
            );
        }
        self.shared.close(CloseReason::LocalShutdown);
    }

    /// Waits for the dispatch loop to finish.
    ///
    /// Blocks until the daemon closes the connection or [`Self::shutdown`]
    /// unblocks the reader.
    ///
    /// # Errors
    ///
    /// Returns [`MuxError::DispatchPanicked`] if the reader thread panicked.
    pub fn join(mut self) -> Result<(), MuxError> {
        self.dispatch.take().map_or(Ok(()), DispatchHandle::join)
    }

    fn handler_slot(&self, protocol: &ProtocolId) -> Result<HandlerSlot, MuxError> {
        self.shared
            .handlers()
            .load_or_insert(protocol.clone(), self.shared.new_handler_slot())
            .map_err(MuxError::from_handler_registry)
    }
}

impl Drop for Multiplexer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Configures and starts a [`Multiplexer`].
///
/// # Example
///
/// ```
/// use std::io;
/// use std::sync::Arc;
///
/// use p2pd_config::MuxConfig;
/// use p2pd_mux::{CallSlot, ConcurrentRegistry, Multiplexer, TracingObserver};
/// use p2pd_types::CallId;
///
/// # fn main() -> Result<(), p2pd_mux::MuxError> {
/// let mux = Multiplexer::builder(MuxConfig::default())
///     .with_observer(TracingObserver::new())
///     .with_call_registry(Arc::new(ConcurrentRegistry::<CallId, CallSlot>::bounded(128)))
///     .from_halves(io::empty(), io::sink())?;
/// mux.join()?;
/// # Ok(())
/// # }
/// ```
pub struct MultiplexerBuilder {
    config: MuxConfig,
    observer: Option<Arc<dyn DispatchObserver>>,
    handlers: Option<HandlerRegistry>,
    calls: Option<CallRegistry>,
}

impl MultiplexerBuilder {
    /// Starts from `config` with default observer and registries.
    #[must_use]
    pub const fn new(config: MuxConfig) -> Self {
        Self {
            config,
            observer: None,
            handlers: None,
            calls: None,
        }
    }

    /// Reports routing events to `observer` instead of [`TracingObserver`].
    #[must_use]
    pub fn with_observer(mut self, observer: impl DispatchObserver + 'static) -> Self {
        self.observer = Some(Arc::new(observer));
        self
    }

    /// Uses `registry` as the handler registry.
    #[must_use]
    pub fn with_handler_registry(
        mut self,
        registry: Arc<dyn Registry<ProtocolId, HandlerSlot>>,
    ) -> Self {
        self.handlers = Some(registry);
        self
    }

    /// Uses `registry` as the call registry, overriding `max_pending_calls`.
    #[must_use]
    pub fn with_call_registry(mut self, registry: Arc<dyn Registry<CallId, CallSlot>>) -> Self {
        self.calls = Some(registry);
        self
    }

    /// Splits `stream` and starts the multiplexer.
    ///
    /// # Errors
    ///
    /// See [`Multiplexer::new`].
    pub fn connect<S: SplitStream>(self, stream: S) -> Result<Multiplexer, MuxError> {
        self.config.validate()?;
        let StreamHalves {
            reader,
            writer,
            closer,
        } = stream.split().map_err(MuxError::Split)?;
        self.start(reader, Box::new(writer), closer)
    }

    /// Starts the multiplexer over separately owned halves.
    ///
    /// # Errors
    ///
    /// See [`Multiplexer::from_halves`].
    pub fn from_halves<R, W>(self, reader: R, writer: W) -> Result<Multiplexer, MuxError>
    where
        R: Read + Send + 'static,
        W: Write + Send + 'static,
    {
        self.start(reader, Box::new(writer), None)
    }

    fn start<R>(
        self,
        reader: R,
        writer: Box<dyn Write + Send>,
        closer: Option<Box<dyn StreamCloser>>,
    ) -> Result<Multiplexer, MuxError>
    where
        R: Read + Send + 'static,
    {
        let Self {
            config,
            observer,
            handlers,
            calls,
        } = self;
        config.validate()?;

        let max_message_size = config.max_message_size();
        let shared = Arc::new(Shared::new(SharedParts {
            writer: FrameWriter::new(writer, max_message_size),
            handlers: handlers.unwrap_or_else(|| {
                Arc::new(ConcurrentRegistry::<ProtocolId, HandlerSlot>::new())
            }),
            calls: calls.unwrap_or_else(|| {
                Arc::new(ConcurrentRegistry::<CallId, CallSlot>::with_capacity(
                    config.max_pending_calls(),
                ))
            }),
            observer: observer.unwrap_or_else(|| Arc::new(TracingObserver::new())),
            handler_queue: config.handler_queue(),
            overflow: config.overflow_policy(),
            blocking_limit: config.dispatch_workers().saturating_sub(1),
        }));
        let dispatch = DispatchHandle::spawn(
            FrameReader::new(reader, max_message_size),
            &shared,
            PoolSize {
                workers: config.dispatch_workers(),
                queue: config.dispatch_queue(),
            },
        )?;

        Ok(Multiplexer {
            shared,
            closer,
            dispatch: Some(dispatch),
        })
    }
}
