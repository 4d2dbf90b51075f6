//! # relay-protocol
//!
//! Wire types for the change relay.
//!
//! Everything here crosses a process boundary: the WebSocket handshake and
//! client messages, the outbound notifications pushed to clients, and the
//! row-level change records delivered by the upstream change feed.
//!
//! ## Message Types
//!
//! - `InboundMessage` - Client envelope (`ping`, or any authenticated type)
//! - `OutboundMessage` - `connectionId` replies, `error` rejections, `<partition>Update` fan-out
//! - `ChangeRecord` / `ChangeBatch` - Upstream change feed
//! - `Partition` - Resource partition a connection listens to
//!
//! ## Example
//!
//! ```rust
//! use relay_protocol::{codec, OutboundMessage};
//!
//! let reply = OutboundMessage::connection_id("conn_1");
//! let encoded = codec::encode(&reply).unwrap();
//! assert_eq!(&encoded[..], br#"{"type":"connectionId","connectionId":"conn_1"}"#);
//! ```

pub mod codec;
pub mod feed;
pub mod messages;
pub mod partition;

pub use codec::{decode_batch, decode_inbound, encode, ProtocolError};
pub use feed::{ChangeBatch, ChangeRecord, EventKind, FeedEntry, RecordKeys};
pub use messages::{ChangeNotification, HandshakeParams, InboundMessage, OutboundMessage};
pub use partition::{Partition, UnknownPartition};
