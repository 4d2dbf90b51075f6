//! In-process session hub.
//!
//! Every live WebSocket session registers a bounded FIFO queue here. Pushes
//! enqueue into that queue and the session task drains it onto the socket,
//! so messages to one connection keep their order while a slow peer never
//! blocks a broadcast.

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, trace, warn};

use crate::traits::{ConnectionId, PushChannel, PushError};

/// Default per-session outbound queue capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

type Sessions = Arc<DashMap<ConnectionId, mpsc::Sender<Bytes>>>;

/// Push channel over the sessions held by this process.
#[derive(Debug, Clone)]
pub struct SessionHub {
    sessions: Sessions,
    queue_capacity: usize,
}

impl SessionHub {
    /// Create a hub with the default queue capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_QUEUE_CAPACITY)
    }

    /// Create a hub with a specific per-session queue capacity.
    #[must_use]
    pub fn with_capacity(queue_capacity: usize) -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
            queue_capacity: queue_capacity.max(1),
        }
    }

    /// Register a session and return the receiving end of its queue.
    ///
    /// The session is unregistered when the receiver is dropped, unless a
    /// later registration under the same id has replaced it.
    pub fn register(&self, connection_id: ConnectionId) -> SessionReceiver {
        let (tx, rx) = mpsc::channel(self.queue_capacity);
        let weak = tx.downgrade();
        if self.sessions.insert(connection_id.clone(), tx).is_some() {
            warn!(connection = %connection_id, "Replaced existing session");
        }
        debug!(connection = %connection_id, sessions = self.sessions.len(), "Session registered");

        SessionReceiver {
            connection_id,
            rx,
            weak,
            sessions: Arc::clone(&self.sessions),
        }
    }

    /// Whether a session is registered.
    #[must_use]
    pub fn contains(&self, connection_id: &ConnectionId) -> bool {
        self.sessions.contains_key(connection_id)
    }

    /// Number of registered sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether no session is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

impl Default for SessionHub {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PushChannel for SessionHub {
    async fn push(&self, connection_id: &ConnectionId, data: Bytes) -> Result<(), PushError> {
        let Some(tx) = self.sessions.get(connection_id).map(|e| e.value().clone()) else {
            trace!(connection = %connection_id, "Push to unknown session");
            return Err(PushError::Gone);
        };

        match tx.try_send(data) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                Err(PushError::Transient("outbound queue full".to_string()))
            }
            Err(TrySendError::Closed(_)) => {
                self.sessions
                    .remove_if(connection_id, |_, current| current.same_channel(&tx));
                Err(PushError::Gone)
            }
        }
    }

    fn name(&self) -> &'static str {
        "websocket"
    }
}

/// Receiving end of a session's outbound queue.
#[derive(Debug)]
pub struct SessionReceiver {
    connection_id: ConnectionId,
    rx: mpsc::Receiver<Bytes>,
    weak: mpsc::WeakSender<Bytes>,
    sessions: Sessions,
}

impl SessionReceiver {
    /// The connection this queue belongs to.
    #[must_use]
    pub fn connection_id(&self) -> &ConnectionId {
        &self.connection_id
    }

    /// Receive the next queued message.
    pub async fn recv(&mut self) -> Option<Bytes> {
        self.rx.recv().await
    }

    /// Receive a queued message without waiting.
    pub fn try_recv(&mut self) -> Option<Bytes> {
        self.rx.try_recv().ok()
    }
}

impl Drop for SessionReceiver {
    fn drop(&mut self) {
        // A replaced registration has no live sender left to upgrade.
        let removed = self.sessions.remove_if(&self.connection_id, |_, current| {
            self.weak
                .upgrade()
                .is_some_and(|own| own.same_channel(current))
        });
        if removed.is_some() {
            debug!(connection = %self.connection_id, "Session unregistered");
        }
    }
}
