//! Correlation identifiers.

use std::borrow::Borrow;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Name of a protocol the local client can serve, e.g. `/sqrt/1.0.0`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
#[serde(transparent)]
pub struct ProtocolId(String);

impl ProtocolId {
    /// Wraps a protocol name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Returns the protocol name.
    #[must_use]
    pub const fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Display for ProtocolId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.0)
    }
}

impl From<&str> for ProtocolId {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for ProtocolId {
    fn from(name: String) -> Self {
        Self(name)
    }
}

impl Borrow<str> for ProtocolId {
    fn borrow(&self) -> &str {
        self.as_str()
    }
}

/// Identifier minted per outbound call and echoed back in its response.
///
/// On the wire the identifier travels as the 16 raw UUID bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallId(Uuid);

impl CallId {
    /// Mints a fresh random identifier.
    #[must_use]
    pub fn new_v4() -> Self {
        Self(Uuid::new_v4())
    }

    /// Decodes the wire form of an identifier.
    ///
    /// # Errors
    ///
    /// Returns [`MalformedCallId`] unless `bytes` is exactly 16 bytes long.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, MalformedCallId> {
        Uuid::from_slice(bytes)
            .map(Self)
            .map_err(|source| MalformedCallId {
                length: bytes.len(),
                source,
            })
    }

    /// Returns the wire form of the identifier.
    #[must_use]
    pub fn to_bytes(self) -> Vec<u8> {
        self.0.as_bytes().to_vec()
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl From<Uuid> for CallId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, formatter)
    }
}

/// A call identifier on the wire was not a 16-byte UUID.
#[derive(Debug, Error)]
#[error("malformed call identifier ({length} bytes)")]
pub struct MalformedCallId {
    length: usize,
    #[source]
    source: uuid::Error,
}

impl MalformedCallId {
    /// Length of the rejected identifier.
    #[must_use]
    pub const fn length(&self) -> usize {
        self.length
    }
}
