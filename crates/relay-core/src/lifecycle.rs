//! Connection lifecycle.
//!
//! Drives each connection through `Unauthenticated -> Open -> Closed`.
//! The handshake is verified before anything is written, and every
//! non-ping message on an open connection is verified again and checked
//! against the identity stored at connect time.

use crate::auth::{current_unix_timestamp, AuthError, TokenVerifier, REJECTION_MESSAGE};
use crate::connection::{Connection, ConnectionState};
use crate::deliverer::Deliverer;
use crate::registry::{ConnectionRegistry, RegistryError};
use relay_protocol::{codec, HandshakeParams, InboundMessage, OutboundMessage};
use relay_transport::{ConnectionId, PushError};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Handshake errors.
#[derive(Debug, Error)]
pub enum ConnectError {
    /// The handshake token was rejected. Nothing was written.
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// The connection could not be registered.
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Result of handling one inbound message on an open connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageOutcome {
    /// A ping was answered with the connection id.
    Replied,
    /// An authenticated message whose identity matches; nothing to do.
    Accepted,
    /// The message failed re-authentication. The connection was told and
    /// deregistered; the transport should close it.
    Rejected(AuthError),
    /// The reply could not be delivered because the peer is gone. The
    /// connection was deregistered.
    Gone,
}

impl MessageOutcome {
    /// State of the connection after this outcome.
    #[must_use]
    pub fn next_state(&self) -> ConnectionState {
        match self {
            MessageOutcome::Replied | MessageOutcome::Accepted => ConnectionState::Open,
            MessageOutcome::Rejected(_) | MessageOutcome::Gone => ConnectionState::Closed,
        }
    }
}

/// Handles connect, message, and disconnect events.
pub struct ConnectionLifecycleManager {
    verifier: Arc<TokenVerifier>,
    registry: Arc<dyn ConnectionRegistry>,
    deliverer: Arc<Deliverer>,
}

impl ConnectionLifecycleManager {
    /// Create a lifecycle manager.
    #[must_use]
    pub fn new(
        verifier: Arc<TokenVerifier>,
        registry: Arc<dyn ConnectionRegistry>,
        deliverer: Arc<Deliverer>,
    ) -> Self {
        Self {
            verifier,
            registry,
            deliverer,
        }
    }

    /// Verify a handshake and register the connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the token is rejected (no registry write happens)
    /// or the registry write fails.
    pub async fn connect(
        &self,
        connection_id: &ConnectionId,
        params: &HandshakeParams,
    ) -> Result<Connection, ConnectError> {
        let token = params.token.as_deref().unwrap_or_default();
        let claims = self.verifier.verify(token).map_err(|e| {
            warn!(
                connection = %connection_id,
                partition = %params.resource_partition,
                reason = e.reason(),
                error = %e,
                "Handshake rejected"
            );
            e
        })?;

        let connection = Connection::from_claims(
            connection_id,
            params.resource_partition,
            &claims,
            current_unix_timestamp(),
        );
        self.registry.put(connection.clone()).await?;

        info!(
            connection = %connection_id,
            partition = %connection.resource_partition,
            principal = %connection.principal_id,
            "Connection opened"
        );

        Ok(connection)
    }

    /// Handle a raw inbound message on an open connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the stored connection cannot be read.
    pub async fn handle_message(
        &self,
        connection_id: &ConnectionId,
        data: &[u8],
    ) -> Result<MessageOutcome, RegistryError> {
        let message = match codec::decode_inbound(data) {
            Ok(message) => message,
            Err(e) => {
                let err = AuthError::Malformed(e.to_string());
                return self.reject(connection_id, err).await;
            }
        };

        if message.is_ping() {
            return Ok(self.reply_connection_id(connection_id).await);
        }

        match self.reauthenticate(connection_id, &message).await? {
            Ok(()) => {
                debug!(connection = %connection_id, kind = %message.kind, "Message accepted");
                Ok(MessageOutcome::Accepted)
            }
            Err(e) => self.reject(connection_id, e).await,
        }
    }

    /// Handle a transport disconnect.
    ///
    /// Idempotent: disconnecting an unknown id succeeds.
    ///
    /// # Errors
    ///
    /// Returns an error if the registry delete fails.
    pub async fn disconnect(&self, connection_id: &ConnectionId) -> Result<bool, RegistryError> {
        let removed = self.registry.delete(connection_id).await?;
        info!(connection = %connection_id, was_registered = removed, "Connection closed");
        Ok(removed)
    }

    async fn reply_connection_id(&self, connection_id: &ConnectionId) -> MessageOutcome {
        let reply = OutboundMessage::connection_id(connection_id.as_str());
        match self.deliverer.send_to(connection_id, &reply).await {
            Ok(()) => MessageOutcome::Replied,
            Err(PushError::Gone) => MessageOutcome::Gone,
            Err(e) => {
                warn!(connection = %connection_id, error = %e, "Failed to reply to ping");
                MessageOutcome::Replied
            }
        }
    }

    async fn reauthenticate(
        &self,
        connection_id: &ConnectionId,
        message: &InboundMessage,
    ) -> Result<Result<(), AuthError>, RegistryError> {
        let token = message.token.as_deref().unwrap_or_default();
        let claims = match self.verifier.verify(token) {
            Ok(claims) => claims,
            Err(e) => return Ok(Err(e)),
        };

        let stored = self
            .registry
            .get(message.partition(), connection_id)
            .await?;

        Ok(match stored {
            Some(connection) if connection.matches(&claims) => Ok(()),
            _ => Err(AuthError::IdentityMismatch),
        })
    }

    async fn reject(
        &self,
        connection_id: &ConnectionId,
        err: AuthError,
    ) -> Result<MessageOutcome, RegistryError> {
        warn!(
            connection = %connection_id,
            reason = err.reason(),
            error = %err,
            "Message rejected, closing connection"
        );

        // Best effort: the peer may already be gone.
        let notice = OutboundMessage::error(REJECTION_MESSAGE);
        if let Err(e) = self.deliverer.send_to(connection_id, &notice).await {
            debug!(connection = %connection_id, error = %e, "Could not deliver rejection");
        }

        self.registry.delete(connection_id).await?;
        Ok(MessageOutcome::Rejected(err))
    }
}
