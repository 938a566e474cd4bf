//! Client-to-daemon messages.

use serde::{Deserialize, Serialize};

use crate::ids::{CallId, ProtocolId};
use crate::response::CallUnaryResponse;

/// Discriminator naming which payload field of a [`Request`] is populated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestType {
    /// Invoke a protocol on a remote peer and await a [`CallUnaryResponse`].
    CallUnary,
    /// Ask the daemon to forward calls for a protocol to this client.
    AddUnaryHandler,
    /// Ask the daemon to stop forwarding calls for a protocol.
    RemoveUnaryHandler,
    /// Answer a call the daemon forwarded to this client.
    SendResponseToRemote,
}

/// Outbound message written to the daemon.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Request {
    /// Which payload below is populated.
    #[serde(rename = "type")]
    pub kind: RequestType,
    /// Payload for [`RequestType::CallUnary`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_unary: Option<CallUnaryRequest>,
    /// Payload for [`RequestType::AddUnaryHandler`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub add_unary_handler: Option<AddUnaryHandlerRequest>,
    /// Payload for [`RequestType::RemoveUnaryHandler`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remove_unary_handler: Option<AddUnaryHandlerRequest>,
    /// Payload for [`RequestType::SendResponseToRemote`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub send_response_to_remote: Option<CallUnaryResponse>,
}

/// Body of a unary call to a remote peer.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct CallUnaryRequest {
    /// Encoded identity of the remote peer.
    #[serde(default)]
    pub peer: Vec<u8>,
    /// Protocol to invoke on the peer.
    pub proto: ProtocolId,
    /// Request payload.
    #[serde(default)]
    pub data: Vec<u8>,
    /// Correlation identifier, 16 UUID bytes.
    pub call_id: Vec<u8>,
}

/// Body of a handler registration or removal.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct AddUnaryHandlerRequest {
    /// Protocol the client will serve.
    pub proto: ProtocolId,
}

impl Request {
    /// Builds a unary call addressed to `peer`.
    #[must_use]
    pub fn call_unary(peer: Vec<u8>, proto: ProtocolId, data: Vec<u8>, call_id: CallId) -> Self {
        Self {
            kind: RequestType::CallUnary,
            call_unary: Some(CallUnaryRequest {
                peer,
                proto,
                data,
                call_id: call_id.to_bytes(),
            }),
            add_unary_handler: None,
            remove_unary_handler: None,
            send_response_to_remote: None,
        }
    }

    /// Builds a handler registration for `proto`.
    #[must_use]
    pub const fn add_unary_handler(proto: ProtocolId) -> Self {
        Self {
            kind: RequestType::AddUnaryHandler,
            call_unary: None,
            add_unary_handler: Some(AddUnaryHandlerRequest { proto }),
            remove_unary_handler: None,
            send_response_to_remote: None,
        }
    }

    /// Builds a handler removal for `proto`.
    #[must_use]
    pub const fn remove_unary_handler(proto: ProtocolId) -> Self {
        Self {
            kind: RequestType::RemoveUnaryHandler,
            call_unary: None,
            add_unary_handler: None,
            remove_unary_handler: Some(AddUnaryHandlerRequest { proto }),
            send_response_to_remote: None,
        }
    }

    /// Builds the answer to a forwarded call.
    ///
    /// `call_id` is passed through as raw bytes so that answers can be
    /// addressed to identifiers this client never decoded.
    #[must_use]
    pub fn send_response_to_remote(call_id: Vec<u8>, outcome: Result<Vec<u8>, String>) -> Self {
        let (result, error) = match outcome {
            Ok(result) => (result, Vec::new()),
            Err(message) => (Vec::new(), message.into_bytes()),
        };
        Self {
            kind: RequestType::SendResponseToRemote,
            call_unary: None,
            add_unary_handler: None,
            remove_unary_handler: None,
            send_response_to_remote: Some(CallUnaryResponse {
                call_id,
                result,
                error,
            }),
        }
    }

    /// Error answer sent when nothing local serves `proto`.
    #[must_use]
    pub fn protocol_not_supported(call_id: Vec<u8>, proto: &ProtocolId) -> Self {
        Self::send_response_to_remote(call_id, Err(format!("protocol {proto} not supported")))
    }

    /// Error answer sent when the local handler for `proto` is saturated.
    #[must_use]
    pub fn protocol_busy(call_id: Vec<u8>, proto: &ProtocolId) -> Self {
        Self::send_response_to_remote(call_id, Err(format!("protocol {proto} busy")))
    }
}
