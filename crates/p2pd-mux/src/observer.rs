//! Hooks for routing events raised by the dispatch loop.

use std::fmt;
use std::sync::Arc;

use p2pd_types::{CallId, MalformedCallId, ProtocolId, Response};

use crate::state::CloseReason;
use crate::telemetry::DISPATCH_TARGET;

/// Why an inbound request was answered with an error instead of delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// No handler is registered for the protocol.
    Unsupported,
    /// The handler's queue was full.
    Busy,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Unsupported => "unsupported",
            Self::Busy => "busy",
        };
        formatter.write_str(label)
    }
}

/// Observer trait used to surface routing decisions to telemetry sinks.
///
/// Hooks run on dispatch threads and must not block.
pub trait DispatchObserver: Send + Sync {
    /// An inbound request was queued for its handler.
    fn request_routed(&self, protocol: &ProtocolId);

    /// An inbound request was answered with an error.
    fn request_rejected(&self, protocol: &ProtocolId, reason: RejectReason);

    /// A response reached the caller awaiting it.
    fn response_routed(&self, call_id: CallId);

    /// A response arrived for a call nobody awaits.
    fn response_discarded(&self, call_id: CallId);

    /// A response carried an undecodable call identifier.
    fn malformed_call_id(&self, error: &MalformedCallId);

    /// A message carried nothing to route.
    fn unrecognised_message(&self, message: &Response);

    /// The connection closed; invoked once per multiplexer.
    fn connection_closed(&self, reason: &CloseReason);
}

impl<T> DispatchObserver for Arc<T>
where
    T: DispatchObserver + ?Sized,
{
    fn request_routed(&self, protocol: &ProtocolId) {
        (**self).request_routed(protocol);
    }

    fn request_rejected(&self, protocol: &ProtocolId, reason: RejectReason) {
        (**self).request_rejected(protocol, reason);
    }

    fn response_routed(&self, call_id: CallId) {
        (**self).response_routed(call_id);
    }

    fn response_discarded(&self, call_id: CallId) {
        (**self).response_discarded(call_id);
    }

    fn malformed_call_id(&self, error: &MalformedCallId) {
        (**self).malformed_call_id(error);
    }

    fn unrecognised_message(&self, message: &Response) {
        (**self).unrecognised_message(message);
    }

    fn connection_closed(&self, reason: &CloseReason) {
        (**self).connection_closed(reason);
    }
}

/// Default observer that records routing events using `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl TracingObserver {
    /// Builds a new observer.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl DispatchObserver for TracingObserver {
    fn request_routed(&self, protocol: &ProtocolId) {
        tracing::debug!(
            target: DISPATCH_TARGET,
            event = "request_routed",
            protocol = %protocol,
            "queued inbound request for handler"
        );
    }

    fn request_rejected(&self, protocol: &ProtocolId, reason: RejectReason) {
        tracing::info!(
            target: DISPATCH_TARGET,
            event = "request_rejected",
            protocol = %protocol,
            reason = %reason,
            "answered inbound request with an error"
        );
    }

    fn response_routed(&self, call_id: CallId) {
        tracing::debug!(
            target: DISPATCH_TARGET,
            event = "response_routed",
            call_id = %call_id,
            "delivered response to caller"
        );
    }

    fn response_discarded(&self, call_id: CallId) {
        tracing::debug!(
            target: DISPATCH_TARGET,
            event = "response_discarded",
            call_id = %call_id,
            "discarded response nobody awaits"
        );
    }

    fn malformed_call_id(&self, error: &MalformedCallId) {
        tracing::warn!(
            target: DISPATCH_TARGET,
            event = "malformed_call_id",
            length = error.length(),
            "discarded response with malformed call identifier"
        );
    }

    fn unrecognised_message(&self, message: &Response) {
        tracing::debug!(
            target: DISPATCH_TARGET,
            event = "unrecognised_message",
            kind = ?message.kind,
            error = ?message.error.as_ref().map(|error| error.msg.as_str()),
            "dropped message with nothing to route"
        );
    }

    fn connection_closed(&self, reason: &CloseReason) {
        tracing::info!(
            target: DISPATCH_TARGET,
            event = "connection_closed",
            reason = %reason,
            "daemon connection closed"
        );
    }
}
