//! Fan-out of outbound messages to registered connections.
//!
//! Delivery is at most once per event: a failed push is logged and never
//! retried here. A push that reports the peer gone removes the connection
//! from the registry, which keeps the registry in line with socket liveness.

use crate::registry::{ConnectionRegistry, RegistryError};
use bytes::Bytes;
use futures_util::stream::{self, StreamExt};
use relay_protocol::{codec, OutboundMessage, Partition, ProtocolError};
use relay_transport::{ConnectionId, PushChannel, PushError};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, trace, warn};

/// Delivery errors surfaced to callers.
///
/// Per-connection failures are never surfaced; they show up in the report.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// The recipient list could not be read.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// The message could not be encoded.
    #[error(transparent)]
    Encode(#[from] ProtocolError),
}

/// Deliverer configuration.
#[derive(Debug, Clone)]
pub struct DelivererConfig {
    /// Maximum pushes in flight during one broadcast.
    pub max_concurrent_sends: usize,
}

impl Default for DelivererConfig {
    fn default() -> Self {
        Self {
            max_concurrent_sends: 32,
        }
    }
}

/// Outcome of one broadcast.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BroadcastReport {
    /// Connections listed for the partition.
    pub recipients: usize,
    /// Pushes that succeeded.
    pub delivered: usize,
    /// Connections removed because the peer was gone.
    pub pruned: usize,
    /// Pushes that failed for any other reason.
    pub failed: usize,
}

impl BroadcastReport {
    /// Add another report's counts to this one.
    pub fn merge(&mut self, other: &BroadcastReport) {
        self.recipients += other.recipients;
        self.delivered += other.delivered;
        self.pruned += other.pruned;
        self.failed += other.failed;
    }
}

enum SendOutcome {
    Delivered,
    Pruned,
    Failed,
}

/// Pushes messages to connections and prunes unreachable ones.
pub struct Deliverer {
    registry: Arc<dyn ConnectionRegistry>,
    channel: Arc<dyn PushChannel>,
    config: DelivererConfig,
}

impl Deliverer {
    /// Create a deliverer with default configuration.
    #[must_use]
    pub fn new(registry: Arc<dyn ConnectionRegistry>, channel: Arc<dyn PushChannel>) -> Self {
        Self::with_config(registry, channel, DelivererConfig::default())
    }

    /// Create a deliverer with custom configuration.
    #[must_use]
    pub fn with_config(
        registry: Arc<dyn ConnectionRegistry>,
        channel: Arc<dyn PushChannel>,
        config: DelivererConfig,
    ) -> Self {
        Self {
            registry,
            channel,
            config,
        }
    }

    /// Push a message to every connection registered under `partition`.
    ///
    /// # Errors
    ///
    /// Returns an error if the message cannot be encoded or the recipients
    /// cannot be listed. Individual push failures are only counted.
    pub async fn broadcast(
        &self,
        partition: Partition,
        message: &OutboundMessage,
    ) -> Result<BroadcastReport, DeliveryError> {
        let data = codec::encode(message)?;
        let recipients = self.registry.list_all(partition).await?;

        let mut report = BroadcastReport {
            recipients: recipients.len(),
            ..Default::default()
        };

        let limit = self.config.max_concurrent_sends.max(1);
        let outcomes: Vec<SendOutcome> = stream::iter(recipients)
            .map(|id| self.deliver(id, data.clone()))
            .buffer_unordered(limit)
            .collect()
            .await;

        for outcome in outcomes {
            match outcome {
                SendOutcome::Delivered => report.delivered += 1,
                SendOutcome::Pruned => report.pruned += 1,
                SendOutcome::Failed => report.failed += 1,
            }
        }

        debug!(
            partition = %partition,
            message_type = message.type_tag(),
            recipients = report.recipients,
            delivered = report.delivered,
            pruned = report.pruned,
            failed = report.failed,
            "Broadcast complete"
        );

        Ok(report)
    }

    /// Push a message to a single connection.
    ///
    /// A gone peer is removed from the registry before the error is returned.
    ///
    /// # Errors
    ///
    /// Returns the push error, or `Transient` if the message cannot be encoded.
    pub async fn send_to(
        &self,
        connection_id: &ConnectionId,
        message: &OutboundMessage,
    ) -> Result<(), PushError> {
        let data = codec::encode(message).map_err(|e| PushError::Transient(e.to_string()))?;
        let result = self.channel.push(connection_id, data).await;
        if result.as_ref().is_err_and(PushError::is_gone) {
            self.prune(connection_id).await;
        }
        result
    }

    async fn deliver(&self, connection_id: ConnectionId, data: Bytes) -> SendOutcome {
        match self.channel.push(&connection_id, data).await {
            Ok(()) => {
                trace!(connection = %connection_id, "Delivered");
                SendOutcome::Delivered
            }
            Err(e) if e.is_gone() => {
                self.prune(&connection_id).await;
                SendOutcome::Pruned
            }
            Err(e) => {
                warn!(connection = %connection_id, error = %e, "Delivery failed");
                SendOutcome::Failed
            }
        }
    }

    async fn prune(&self, connection_id: &ConnectionId) {
        match self.registry.delete(connection_id).await {
            Ok(_) => debug!(connection = %connection_id, "Pruned gone connection"),
            Err(e) => error!(connection = %connection_id, error = %e, "Failed to prune gone connection"),
        }
    }
}
