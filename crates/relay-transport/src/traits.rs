//! Push-channel traits for the relay.
//!
//! These traits define how the relay reaches a connection it only knows by
//! id, allowing the core to be transport-agnostic.

use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Counter mixed into generated ids so two connections accepted in the same
/// nanosecond still differ.
static ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Unique identifier for a connection, assigned by the transport.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub String);

impl ConnectionId {
    /// Create a new connection ID.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a unique connection ID.
    #[must_use]
    pub fn generate() -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos() as u64;
        let counter = ID_COUNTER.fetch_add(1, Ordering::Relaxed);
        Self(format!("conn_{:x}{:04x}", timestamp, counter & 0xffff))
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ConnectionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ConnectionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Push errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PushError {
    /// The peer is no longer reachable. The connection should be forgotten.
    #[error("Connection gone")]
    Gone,

    /// Any other send failure. The connection may still be alive.
    #[error("Transient send failure: {0}")]
    Transient(String),
}

impl PushError {
    /// Whether the peer is gone for good.
    #[must_use]
    pub fn is_gone(&self) -> bool {
        matches!(self, PushError::Gone)
    }
}

/// Sends a message to a specific connection by id.
///
/// Implementations must not block on a slow peer; a push either enqueues the
/// data for the connection or fails.
#[async_trait]
pub trait PushChannel: Send + Sync {
    /// Push pre-encoded data to a connection.
    async fn push(&self, connection_id: &ConnectionId, data: Bytes) -> Result<(), PushError>;

    /// Get the channel name (e.g., "websocket").
    fn name(&self) -> &'static str;
}
