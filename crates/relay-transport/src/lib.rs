//! # relay-transport
//!
//! Push-channel abstraction for the change relay.
//!
//! The relay never writes to sockets directly. Everything that reaches a
//! client goes through a [`PushChannel`], which sends pre-encoded bytes to a
//! connection by id and reports whether the peer is gone.
//!
//! - **PushChannel** - Send-by-id trait used by the lifecycle manager and the deliverer
//! - **SessionHub** - In-process implementation backed by one FIFO queue per WebSocket session
//!
//! ```rust,ignore
//! use relay_transport::{PushChannel, PushError};
//!
//! match channel.push(&connection_id, bytes).await {
//!     Ok(()) => {}
//!     Err(PushError::Gone) => registry.delete(&connection_id).await?,
//!     Err(e) => tracing::warn!(error = %e, "push failed"),
//! }
//! ```

pub mod hub;
pub mod traits;

pub use hub::{SessionHub, SessionReceiver, DEFAULT_QUEUE_CAPACITY};
pub use traits::{ConnectionId, PushChannel, PushError};
