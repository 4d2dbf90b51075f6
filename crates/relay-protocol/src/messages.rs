//! Client-facing message types.
//!
//! Clients speak JSON over WebSocket text frames. Inbound messages share one
//! envelope: a `type` plus, for anything other than `ping`, the same
//! handshake parameters the connection was opened with so they can be
//! re-verified.

use crate::feed::EventKind;
use crate::partition::Partition;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Type tag of the keepalive message that asks for the connection id.
pub const PING_TYPE: &str = "ping";

/// Query parameters of the WebSocket upgrade request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HandshakeParams {
    /// Signed session token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// Partition to listen to.
    #[serde(default, rename = "resourcePartition")]
    pub resource_partition: Partition,
}

/// An inbound client message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Message type. `ping` is exempt from re-authentication.
    #[serde(rename = "type")]
    pub kind: String,
    /// Session token, required for every non-ping type.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// Partition the client believes it is connected to.
    #[serde(
        default,
        rename = "resourcePartition",
        skip_serializing_if = "Option::is_none"
    )]
    pub resource_partition: Option<Partition>,
}

impl InboundMessage {
    /// Create a ping message.
    #[must_use]
    pub fn ping() -> Self {
        Self {
            kind: PING_TYPE.to_string(),
            token: None,
            resource_partition: None,
        }
    }

    /// Create an authenticated message of the given type.
    #[must_use]
    pub fn authenticated(
        kind: impl Into<String>,
        token: impl Into<String>,
        partition: Partition,
    ) -> Self {
        Self {
            kind: kind.into(),
            token: Some(token.into()),
            resource_partition: Some(partition),
        }
    }

    /// Whether this is a ping.
    #[must_use]
    pub fn is_ping(&self) -> bool {
        self.kind == PING_TYPE
    }

    /// The partition named by the message, defaulting like the handshake.
    #[must_use]
    pub fn partition(&self) -> Partition {
        self.resource_partition.unwrap_or_default()
    }
}

/// Body of a change notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeNotification {
    /// Id of the changed entity.
    pub id: String,
    /// Kind of mutation.
    #[serde(rename = "eventName")]
    pub event_name: EventKind,
    /// Structural diff between the old and new image.
    #[serde(rename = "newImage")]
    pub new_image: Value,
}

/// A message pushed to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum OutboundMessage {
    /// Reply to `ping` carrying the transport-assigned id.
    #[serde(rename = "connectionId")]
    ConnectionId {
        #[serde(rename = "connectionId")]
        connection_id: String,
    },

    /// Rejection of a message or session.
    #[serde(rename = "error")]
    Error {
        /// Human-readable error message.
        message: String,
    },

    /// Change to a work order.
    #[serde(rename = "workOrdersUpdate")]
    WorkOrdersUpdate(ChangeNotification),

    /// Change to a student.
    #[serde(rename = "studentsUpdate")]
    StudentsUpdate(ChangeNotification),
}

impl OutboundMessage {
    /// Create a `connectionId` reply.
    #[must_use]
    pub fn connection_id(connection_id: impl Into<String>) -> Self {
        OutboundMessage::ConnectionId {
            connection_id: connection_id.into(),
        }
    }

    /// Create an `error` message.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        OutboundMessage::Error {
            message: message.into(),
        }
    }

    /// Create the change notification for a partition.
    #[must_use]
    pub fn update(partition: Partition, notification: ChangeNotification) -> Self {
        match partition {
            Partition::WorkOrders => OutboundMessage::WorkOrdersUpdate(notification),
            Partition::Students => OutboundMessage::StudentsUpdate(notification),
        }
    }

    /// The `type` tag as it appears on the wire.
    #[must_use]
    pub fn type_tag(&self) -> &'static str {
        match self {
            OutboundMessage::ConnectionId { .. } => "connectionId",
            OutboundMessage::Error { .. } => "error",
            OutboundMessage::WorkOrdersUpdate(_) => Partition::WorkOrders.update_type(),
            OutboundMessage::StudentsUpdate(_) => Partition::Students.update_type(),
        }
    }

    /// The change notification, if this is one.
    #[must_use]
    pub fn notification(&self) -> Option<&ChangeNotification> {
        match self {
            OutboundMessage::WorkOrdersUpdate(n) | OutboundMessage::StudentsUpdate(n) => Some(n),
            _ => None,
        }
    }
}
