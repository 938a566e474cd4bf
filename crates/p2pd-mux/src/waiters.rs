//! Handles held by callers blocked on the dispatch loop.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError};
use p2pd_types::{CallId, ProtocolId, Response};

use crate::error::MuxError;
use crate::state::Shared;

/// Registration of one awaited call.
///
/// Created by [`crate::Multiplexer::expect_response`] before the request is
/// written, so that a fast answer cannot arrive ahead of the registration.
/// Dropping the handle, whether or not an answer arrived, removes the call
/// from the registry; later answers for the same identifier are discarded.
#[must_use = "the call is unregistered as soon as the handle is dropped"]
pub struct PendingCall {
    call_id: CallId,
    receiver: Receiver<Response>,
    shared: Arc<Shared>,
}

impl PendingCall {
    pub(crate) const fn new(
        call_id: CallId,
        receiver: Receiver<Response>,
        shared: Arc<Shared>,
    ) -> Self {
        Self {
            call_id,
            receiver,
            shared,
        }
    }

    /// Identifier of the awaited call.
    #[must_use]
    pub const fn call_id(&self) -> CallId {
        self.call_id
    }

    /// Blocks until the answer arrives.
    ///
    /// # Errors
    ///
    /// Returns [`MuxError::ConnectionClosed`] if the connection closes first.
    pub fn wait(self) -> Result<Response, MuxError> {
        self.receiver
            .recv()
            .map_err(|_| MuxError::ConnectionClosed)
    }

    /// Blocks until the answer arrives or `timeout` elapses.
    ///
    /// # Errors
    ///
    /// Returns [`MuxError::Timeout`] when the deadline passes and
    /// [`MuxError::ConnectionClosed`] if the connection closes first.
    pub fn wait_timeout(self, timeout: Duration) -> Result<Response, MuxError> {
        self.receiver
            .recv_timeout(timeout)
            .map_err(|error| match error {
                RecvTimeoutError::Timeout => MuxError::Timeout { timeout },
                RecvTimeoutError::Disconnected => MuxError::ConnectionClosed,
            })
    }
}

impl Drop for PendingCall {
    fn drop(&mut self) {
        self.shared.calls().remove(&self.call_id);
    }
}

impl fmt::Debug for PendingCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingCall")
            .field("call_id", &self.call_id)
            .field("answered", &!self.receiver.is_empty())
            .finish_non_exhaustive()
    }
}

/// Receiving end of a registered protocol handler.
///
/// Every subscription of a protocol shares one queue; each inbound request is
/// delivered to exactly one of them. Dropping a subscription leaves the
/// handler registered.
pub struct HandlerSubscription {
    protocol: ProtocolId,
    receiver: Receiver<Response>,
    shared: Arc<Shared>,
}

impl HandlerSubscription {
    pub(crate) const fn new(
        protocol: ProtocolId,
        receiver: Receiver<Response>,
        shared: Arc<Shared>,
    ) -> Self {
        Self {
            protocol,
            receiver,
            shared,
        }
    }

    /// Protocol this subscription serves.
    #[must_use]
    pub const fn protocol(&self) -> &ProtocolId {
        &self.protocol
    }

    /// Blocks until the next inbound request arrives.
    ///
    /// Requests already queued are still returned after the handler is
    /// unregistered or the connection closes.
    ///
    /// # Errors
    ///
    /// Returns [`MuxError::HandlerUnregistered`] or
    /// [`MuxError::ConnectionClosed`] once the queue is drained and can
    /// receive nothing further.
    pub fn recv(&self) -> Result<Response, MuxError> {
        self.receiver.recv().map_err(|_| self.disconnected())
    }

    /// Blocks until the next inbound request arrives or `timeout` elapses.
    ///
    /// # Errors
    ///
    /// As [`Self::recv`], plus [`MuxError::Timeout`] when the deadline passes.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Response, MuxError> {
        self.receiver
            .recv_timeout(timeout)
            .map_err(|error| match error {
                RecvTimeoutError::Timeout => MuxError::Timeout { timeout },
                RecvTimeoutError::Disconnected => self.disconnected(),
            })
    }

    fn disconnected(&self) -> MuxError {
        if self.shared.is_closed() {
            MuxError::ConnectionClosed
        } else {
            MuxError::HandlerUnregistered {
                protocol: self.protocol.clone(),
            }
        }
    }
}

impl fmt::Debug for HandlerSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerSubscription")
            .field("protocol", &self.protocol)
            .field("queued", &self.receiver.len())
            .finish_non_exhaustive()
    }
}
