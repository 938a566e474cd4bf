//! Classification and delivery of inbound messages.

use std::time::Duration;

use crossbeam_channel::{SendTimeoutError, TrySendError};
use p2pd_config::OverflowPolicy;
use p2pd_types::{CallId, Inbound, ProtocolId, Request, Response};

use crate::observer::RejectReason;
use crate::state::{HandlerSlot, Shared};
use crate::telemetry::DISPATCH_TARGET;

/// How often a blocked delivery re-checks whether it should give up.
const BLOCK_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Unit of work handed from the reader to the delivery workers.
#[derive(Debug)]
pub(crate) enum Job {
    /// A call the daemon forwarded for local handling.
    Request(Response),
    /// The answer to a call made through this multiplexer.
    Response { call_id: CallId, message: Response },
}

enum Delivery {
    Delivered,
    Busy,
    Gone,
    Abandoned,
}

enum Offer {
    Settled(Delivery),
    Full(Response),
}

/// Classifies a decoded message.
///
/// Returns `None` for messages with nothing to route, including answers
/// whose call identifier does not decode; those are reported and dropped.
pub(crate) fn classify(message: Response, shared: &Shared) -> Option<Job> {
    let decoded = match message.inbound() {
        Inbound::RequestHandling(_) => None,
        Inbound::CallUnaryResponse(answer) => Some(answer.decode_call_id()),
        Inbound::Other => {
            shared.observer().unrecognised_message(&message);
            return None;
        }
    };
    match decoded {
        None => Some(Job::Request(message)),
        Some(Ok(call_id)) => Some(Job::Response { call_id, message }),
        Some(Err(error)) => {
            shared.observer().malformed_call_id(&error);
            None
        }
    }
}

/// Delivers one job.
pub(crate) fn run(job: Job, shared: &Shared) {
    match job {
        Job::Request(message) => route_request(message, shared),
        Job::Response { call_id, message } => route_response(call_id, message, shared),
    }
}

fn route_request(message: Response, shared: &Shared) {
    let Some((protocol, call_id)) = message
        .request_handling
        .as_ref()
        .map(|handling| (handling.proto.clone(), handling.call_id.clone()))
    else {
        return;
    };

    let Some(slot) = shared.handlers().get(&protocol) else {
        reject(shared, &protocol, call_id, RejectReason::Unsupported);
        return;
    };

    let outcome = match offer(&slot, message) {
        Offer::Settled(delivery) => delivery,
        Offer::Full(returned) => overflow(&slot, &protocol, returned, shared),
    };

    match outcome {
        Delivery::Delivered => shared.observer().request_routed(&protocol),
        Delivery::Busy => reject(shared, &protocol, call_id, RejectReason::Busy),
        Delivery::Gone => reject(shared, &protocol, call_id, RejectReason::Unsupported),
        Delivery::Abandoned => tracing::debug!(
            target: DISPATCH_TARGET,
            protocol = %protocol,
            "dropped inbound request while closing"
        ),
    }
}

fn offer(slot: &HandlerSlot, message: Response) -> Offer {
    match slot.sender().try_send(message) {
        Ok(()) => Offer::Settled(Delivery::Delivered),
        Err(TrySendError::Full(returned)) => Offer::Full(returned),
        Err(TrySendError::Disconnected(_)) => Offer::Settled(Delivery::Gone),
    }
}

/// Applies the overflow policy to a request whose handler queue is full.
///
/// Under [`OverflowPolicy::Block`] the worker waits only if it can claim a
/// blocking permit; at least one worker always stays free, and requests
/// beyond the permits are answered as busy.
fn overflow(
    slot: &HandlerSlot,
    protocol: &ProtocolId,
    message: Response,
    shared: &Shared,
) -> Delivery {
    match shared.overflow() {
        OverflowPolicy::Reject => Delivery::Busy,
        OverflowPolicy::Block => shared.try_block().map_or(Delivery::Busy, |_permit| {
            deliver_blocking(slot, protocol, message, shared)
        }),
    }
}

fn deliver_blocking(
    slot: &HandlerSlot,
    protocol: &ProtocolId,
    message: Response,
    shared: &Shared,
) -> Delivery {
    let mut pending = message;
    loop {
        match slot.sender().send_timeout(pending, BLOCK_POLL_INTERVAL) {
            Ok(()) => return Delivery::Delivered,
            Err(SendTimeoutError::Disconnected(_)) => return Delivery::Gone,
            Err(SendTimeoutError::Timeout(returned)) => {
                if shared.is_closing() {
                    return Delivery::Abandoned;
                }
                let registered = shared
                    .handlers()
                    .get(protocol)
                    .is_some_and(|current| current.same_channel(slot));
                if !registered {
                    return Delivery::Gone;
                }
                pending = returned;
            }
        }
    }
}

fn reject(shared: &Shared, protocol: &ProtocolId, call_id: Vec<u8>, reason: RejectReason) {
    let answer = match reason {
        RejectReason::Unsupported => Request::protocol_not_supported(call_id, protocol),
        RejectReason::Busy => Request::protocol_busy(call_id, protocol),
    };
    shared.observer().request_rejected(protocol, reason);
    if let Err(error) = shared.write(&answer) {
        tracing::debug!(
            target: DISPATCH_TARGET,
            protocol = %protocol,
            error = %error,
            "could not answer rejected request"
        );
    }
}

fn route_response(call_id: CallId, message: Response, shared: &Shared) {
    let delivered = shared
        .calls()
        .get(&call_id)
        .is_some_and(|slot| slot.sender().try_send(message).is_ok());
    if delivered {
        shared.observer().response_routed(call_id);
    } else {
        shared.observer().response_discarded(call_id);
    }
}
