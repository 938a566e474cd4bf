//! Daemon-to-client messages.

use std::borrow::Cow;

use serde::{Deserialize, Serialize};

use crate::ids::{CallId, MalformedCallId, ProtocolId};

/// Status carried by every [`Response`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResponseType {
    /// The daemon accepted the message.
    #[default]
    Ok,
    /// The daemon rejected the message; see [`Response::error`].
    Error,
}

/// Inbound message read from the daemon.
///
/// At most one of `request_handling` and `call_unary_response` is populated.
/// Messages with neither are acknowledgements and carry no routing data.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Response {
    /// Status of the message.
    #[serde(rename = "type", default)]
    pub kind: ResponseType,
    /// Daemon-side failure description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorResponse>,
    /// A remote call forwarded for local handling.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_handling: Option<RequestHandling>,
    /// The answer to a call made by this client.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_unary_response: Option<CallUnaryResponse>,
}

/// Daemon-side failure description.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ErrorResponse {
    /// Human-readable message.
    pub msg: String,
}

/// A remote call the daemon forwards to a locally registered protocol.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct RequestHandling {
    /// Encoded identity of the calling peer.
    #[serde(default)]
    pub peer: Vec<u8>,
    /// Protocol the remote peer invoked.
    pub proto: ProtocolId,
    /// Identifier the answer must carry.
    pub call_id: Vec<u8>,
    /// Request payload.
    #[serde(default)]
    pub data: Vec<u8>,
}

/// Outcome of a unary call, in either direction.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct CallUnaryResponse {
    /// Identifier of the call being answered.
    pub call_id: Vec<u8>,
    /// Result payload; empty on failure.
    #[serde(default)]
    pub result: Vec<u8>,
    /// UTF-8 error text; empty on success.
    #[serde(default)]
    pub error: Vec<u8>,
}

impl CallUnaryResponse {
    /// Decodes the call identifier.
    ///
    /// # Errors
    ///
    /// Returns [`MalformedCallId`] when the identifier is not 16 bytes.
    pub fn decode_call_id(&self) -> Result<CallId, MalformedCallId> {
        CallId::from_bytes(&self.call_id)
    }

    /// Returns the error text, if the remote reported one.
    #[must_use]
    pub fn error_message(&self) -> Option<Cow<'_, str>> {
        if self.error.is_empty() {
            None
        } else {
            Some(String::from_utf8_lossy(&self.error))
        }
    }

    /// Converts the outcome into a `Result`.
    ///
    /// # Errors
    ///
    /// Returns the remote error text when one is present.
    pub fn into_result(self) -> Result<Vec<u8>, String> {
        if self.error.is_empty() {
            Ok(self.result)
        } else {
            Err(String::from_utf8_lossy(&self.error).into_owned())
        }
    }
}

/// Borrowed view of the routing-relevant part of a [`Response`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Inbound<'a> {
    /// Route to the handler registered for the protocol.
    RequestHandling(&'a RequestHandling),
    /// Route to the caller awaiting the call identifier.
    CallUnaryResponse(&'a CallUnaryResponse),
    /// Nothing to route.
    Other,
}

impl Response {
    /// Builds a forwarded call for `proto`.
    #[must_use]
    pub fn request_handling(proto: ProtocolId, call_id: Vec<u8>, data: Vec<u8>) -> Self {
        Self {
            request_handling: Some(RequestHandling {
                peer: Vec::new(),
                proto,
                call_id,
                data,
            }),
            ..Self::default()
        }
    }

    /// Builds the answer to a call made by this client.
    #[must_use]
    pub fn call_unary_response(call_id: Vec<u8>, outcome: Result<Vec<u8>, String>) -> Self {
        let (result, error) = match outcome {
            Ok(result) => (result, Vec::new()),
            Err(message) => (Vec::new(), message.into_bytes()),
        };
        Self {
            call_unary_response: Some(CallUnaryResponse {
                call_id,
                result,
                error,
            }),
            ..Self::default()
        }
    }

    /// Builds a daemon-side error acknowledgement.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            kind: ResponseType::Error,
            error: Some(ErrorResponse {
                msg: message.into(),
            }),
            ..Self::default()
        }
    }

    /// Classifies the message for routing.
    ///
    /// A forwarded call takes precedence when, contrary to the wire
    /// contract, both variants are populated.
    #[must_use]
    pub const fn inbound(&self) -> Inbound<'_> {
        if let Some(handling) = &self.request_handling {
            Inbound::RequestHandling(handling)
        } else if let Some(response) = &self.call_unary_response {
            Inbound::CallUnaryResponse(response)
        } else {
            Inbound::Other
        }
    }
}
