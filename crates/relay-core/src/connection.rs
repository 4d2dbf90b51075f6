//! Connection records and lifecycle states.

use crate::auth::Claims;
use relay_protocol::Partition;
use relay_transport::ConnectionId;
use serde::{Deserialize, Serialize};

/// State of a client connection.
///
/// `Closed` is terminal; a reconnect is a new connection with a new id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionState {
    /// Transport connected, handshake not yet verified.
    Unauthenticated,
    /// Handshake verified and the connection is registered.
    Open,
    /// Rejected, disconnected, or pruned.
    Closed,
}

impl ConnectionState {
    /// Whether the connection can still receive messages.
    #[must_use]
    pub fn is_open(&self) -> bool {
        matches!(self, ConnectionState::Open)
    }
}

/// An authenticated connection as stored in the registry.
///
/// Never updated in place: a record is put once on connect and deleted on
/// disconnect, identity mismatch, or delivery failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connection {
    /// Transport-assigned id.
    pub connection_id: String,
    /// Partition the connection listens to.
    pub resource_partition: Partition,
    /// Authenticated principal.
    pub principal_id: String,
    /// Credential hash asserted at connect time.
    pub auth_hash: String,
    /// Host the session was opened from.
    pub origin_host: String,
    /// Client device fingerprint.
    pub device_fingerprint: String,
    /// Connect time, epoch seconds.
    pub connected_at_epoch: i64,
}

impl Connection {
    /// Build the record for a freshly verified handshake.
    #[must_use]
    pub fn from_claims(
        connection_id: &ConnectionId,
        partition: Partition,
        claims: &Claims,
        connected_at_epoch: i64,
    ) -> Self {
        Self {
            connection_id: connection_id.as_str().to_string(),
            resource_partition: partition,
            principal_id: claims.principal_id.clone(),
            auth_hash: claims.auth_hash.clone(),
            origin_host: claims.origin_host.clone(),
            device_fingerprint: claims.device_fingerprint.clone(),
            connected_at_epoch,
        }
    }

    /// The id as a transport connection id.
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        ConnectionId::new(self.connection_id.clone())
    }

    /// Whether `claims` assert the identity stored for this connection.
    #[must_use]
    pub fn matches(&self, claims: &Claims) -> bool {
        claims.same_identity(&self.principal_id, &self.auth_hash)
    }
}
