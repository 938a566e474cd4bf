//! State shared by callers, the dispatch loop, and delivery workers.

use std::fmt;
use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crossbeam_channel::{Receiver, Sender};
use once_cell::sync::OnceCell;
use p2pd_config::OverflowPolicy;
use p2pd_types::{CallId, ProtocolId, Request, Response};

use crate::framing::{FrameError, FrameWriter};
use crate::observer::DispatchObserver;
use crate::registry::Registry;
use crate::telemetry::WRITER_TARGET;

/// Why a multiplexer stopped reading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The daemon closed the connection between frames.
    EndOfStream,
    /// [`crate::Multiplexer::shutdown`] was called.
    LocalShutdown,
    /// Reading or decoding a frame failed.
    ReadFailed {
        /// Rendered error.
        error: String,
    },
}

impl fmt::Display for CloseReason {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EndOfStream => formatter.write_str("end of stream"),
            Self::LocalShutdown => formatter.write_str("local shutdown"),
            Self::ReadFailed { error } => write!(formatter, "read failed: {error}"),
        }
    }
}

/// Delivery channel of one handled protocol.
///
/// Stored in the handler registry. Every subscriber of the protocol reads
/// from the same queue, so each inbound request is delivered once.
#[derive(Debug, Clone)]
pub struct HandlerSlot {
    sender: Sender<Response>,
    receiver: Receiver<Response>,
}

impl HandlerSlot {
    pub(crate) fn new(capacity: usize) -> Self {
        let (sender, receiver) = crossbeam_channel::bounded(capacity);
        Self { sender, receiver }
    }

    pub(crate) const fn sender(&self) -> &Sender<Response> {
        &self.sender
    }

    pub(crate) const fn receiver(&self) -> &Receiver<Response> {
        &self.receiver
    }

    pub(crate) fn same_channel(&self, other: &Self) -> bool {
        self.sender.same_channel(&other.sender)
    }
}

/// Single-use delivery channel of one awaited call.
#[derive(Debug, Clone)]
pub struct CallSlot(Sender<Response>);

impl CallSlot {
    pub(crate) fn new() -> (Self, Receiver<Response>) {
        let (sender, receiver) = crossbeam_channel::bounded(1);
        (Self(sender), receiver)
    }

    pub(crate) const fn sender(&self) -> &Sender<Response> {
        &self.0
    }
}

/// Claim on one of the delivery workers allowed to wait on a full handler
/// queue. Released on drop.
pub(crate) struct BlockingPermit<'a> {
    blocked: &'a AtomicUsize,
}

impl Drop for BlockingPermit<'_> {
    fn drop(&mut self) {
        self.blocked.fetch_sub(1, Ordering::AcqRel);
    }
}

pub(crate) type HandlerRegistry = Arc<dyn Registry<ProtocolId, HandlerSlot>>;
pub(crate) type CallRegistry = Arc<dyn Registry<CallId, CallSlot>>;

pub(crate) struct Shared {
    writer: Mutex<FrameWriter<Box<dyn Write + Send>>>,
    handlers: HandlerRegistry,
    calls: CallRegistry,
    observer: Arc<dyn DispatchObserver>,
    handler_queue: usize,
    overflow: OverflowPolicy,
    blocking_limit: usize,
    blocked: AtomicUsize,
    closing: AtomicBool,
    close_reason: OnceCell<CloseReason>,
}

pub(crate) struct SharedParts {
    pub(crate) writer: FrameWriter<Box<dyn Write + Send>>,
    pub(crate) handlers: HandlerRegistry,
    pub(crate) calls: CallRegistry,
    pub(crate) observer: Arc<dyn DispatchObserver>,
    pub(crate) handler_queue: usize,
    pub(crate) overflow: OverflowPolicy,
    /// Workers that may wait on a full handler queue at once.
    pub(crate) blocking_limit: usize,
}

impl Shared {
    pub(crate) fn new(parts: SharedParts) -> Self {
        Self {
            writer: Mutex::new(parts.writer),
            handlers: parts.handlers,
            calls: parts.calls,
            observer: parts.observer,
            handler_queue: parts.handler_queue,
            overflow: parts.overflow,
            blocking_limit: parts.blocking_limit,
            blocked: AtomicUsize::new(0),
            closing: AtomicBool::new(false),
            close_reason: OnceCell::new(),
        }
    }

    /// Writes one frame while holding the writer lock.
    pub(crate) fn write(&self, request: &Request) -> Result<(), FrameError> {
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        writer.write_message(request).inspect_err(|error| {
            tracing::warn!(
                target: WRITER_TARGET,
                kind = ?request.kind,
                error = %error,
                "failed to write request"
            );
        })?;
        tracing::trace!(target: WRITER_TARGET, kind = ?request.kind, "wrote request");
        Ok(())
    }

    pub(crate) fn handlers(&self) -> &dyn Registry<ProtocolId, HandlerSlot> {
        self.handlers.as_ref()
    }

    pub(crate) fn calls(&self) -> &dyn Registry<CallId, CallSlot> {
        self.calls.as_ref()
    }

    pub(crate) fn observer(&self) -> &dyn DispatchObserver {
        self.observer.as_ref()
    }

    pub(crate) fn new_handler_slot(&self) -> HandlerSlot {
        HandlerSlot::new(self.handler_queue)
    }

    pub(crate) const fn overflow(&self) -> OverflowPolicy {
        self.overflow
    }

    /// Claims a worker for a blocking delivery.
    ///
    /// Returns `None` once `blocking_limit` workers are already waiting, so
    /// the remaining workers keep routing unrelated messages.
    pub(crate) fn try_block(&self) -> Option<BlockingPermit<'_>> {
        let limit = self.blocking_limit;
        self.blocked
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |held| {
                (held < limit).then_some(held + 1)
            })
            .ok()
            .map(|_| BlockingPermit {
                blocked: &self.blocked,
            })
    }

    /// Number of deliveries currently holding a blocking permit.
    pub(crate) fn blocked_deliveries(&self) -> usize {
        self.blocked.load(Ordering::Acquire)
    }

    /// Stops blocked deliveries from waiting any longer.
    ///
    /// Called by the reader once the connection is gone, before it drains the
    /// delivery workers.
    pub(crate) fn stop_delivering(&self) {
        self.closing.store(true, Ordering::Release);
    }

    /// Marks the multiplexer as closing; returns `false` if it already was.
    pub(crate) fn begin_close(&self) -> bool {
        !self.closing.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn is_closing(&self) -> bool {
        self.closing.load(Ordering::Acquire)
    }

    /// Records `reason` and wakes every waiter.
    ///
    /// The reason is published before the registries close so that woken
    /// waiters can tell closure from unregistration.
    pub(crate) fn close(&self, reason: CloseReason) {
        self.closing.store(true, Ordering::Release);
        if self.close_reason.set(reason.clone()).is_ok() {
            self.observer.connection_closed(&reason);
        }
        self.handlers.close();
        self.calls.close();
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.close_reason.get().is_some()
    }

    pub(crate) fn close_reason(&self) -> Option<CloseReason> {
        self.close_reason.get().cloned()
    }
}
