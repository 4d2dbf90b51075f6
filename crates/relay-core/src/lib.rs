//! # relay-core
//!
//! Connection tracking and change fan-out for the change relay.
//!
//! This crate provides the fundamental building blocks:
//!
//! - **TokenVerifier** - Validates signed session claims
//! - **ConnectionRegistry** - Keyed store of active connections per partition
//! - **ConnectionLifecycleManager** - Per-connection state machine (connect/message/disconnect)
//! - **ChangeEventRouter** - Turns change-feed batches into partition notifications
//! - **Deliverer** - Pushes a notification to every connection of a partition and prunes gone ones
//!
//! ## Architecture
//!
//! ```text
//!  transport events                         change-feed batches
//!         │                                          │
//!         ▼                                          ▼
//! ┌──────────────────┐  ┌───────────────┐  ┌──────────────────┐
//! │ LifecycleManager │─▶│ TokenVerifier │  │ ChangeEventRouter│
//! └──────────────────┘  └───────────────┘  └──────────────────┘
//!         │                                          │
//!         ▼                                          ▼
//! ┌──────────────────┐                      ┌──────────────────┐
//! │    Registry      │◀─────────────────────│    Deliverer     │
//! └──────────────────┘   list / prune gone  └──────────────────┘
//! ```

pub mod auth;
pub mod connection;
pub mod deliverer;
pub mod diff;
pub mod lifecycle;
pub mod registry;
pub mod router;

#[cfg(test)]
pub(crate) mod testing;

pub use auth::{AuthError, Claims, ConfigError, TokenVerifier, VerifierConfig, REJECTION_MESSAGE};
pub use connection::{Connection, ConnectionState};
pub use deliverer::{BroadcastReport, Deliverer, DelivererConfig, DeliveryError};
pub use diff::diff;
pub use lifecycle::{ConnectError, ConnectionLifecycleManager, MessageOutcome};
pub use registry::{
    ConnectionRegistry, MemoryRegistry, RegistryError, RegistryPage, DEFAULT_PAGE_SIZE,
};
pub use router::{BatchReport, ChangeEventRouter, RecordOutcome, SkipReason, TableMap};
