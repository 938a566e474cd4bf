//! Message types exchanged with the p2pd daemon over a persistent connection.
//!
//! The client writes [`Request`] messages and reads [`Response`] messages.
//! Two response variants drive the multiplexer: [`RequestHandling`], where
//! the daemon forwards a remote call for local handling, and
//! [`CallUnaryResponse`], the answer to a call this client made earlier.
//! Calls are correlated by [`CallId`]; locally served capabilities are named
//! by [`ProtocolId`].

mod ids;
mod request;
mod response;


pub use ids::{CallId, MalformedCallId, ProtocolId};
pub use request::{AddUnaryHandlerRequest, CallUnaryRequest, Request, RequestType};
pub use response::{
    CallUnaryResponse, ErrorResponse, Inbound, RequestHandling, Response, ResponseType,
};
