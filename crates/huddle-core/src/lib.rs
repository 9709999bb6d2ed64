//! # huddle-core
//!
//! Room membership and event fan-out for the Huddle chat relay.
//!
//! This crate provides the building blocks the server drives:
//!
//! - **Connection** - Opaque session handle plus its outbox
//! - **Registry** - Who is connected, under which name, in which room
//! - **Room** - Derived grouping of connections sharing a room id
//! - **Broadcaster** - Join / chat / disconnect audience rules
//! - **Clock** - Time-of-day stamps for outgoing messages
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │  Connection │────▶│ Broadcaster │────▶│  Registry   │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!                                                │
//!                                                ▼
//!                                         ┌─────────────┐
//!                                         │    Room     │
//!                                         └─────────────┘
//! ```

pub mod broadcaster;
pub mod clock;
pub mod connection;
pub mod registry;
pub mod room;

pub use broadcaster::{
    BroadcastError, Broadcaster, BroadcasterConfig, JoinReport, LeaveReport, LeaveScope,
};
pub use clock::{Clock, FixedClock, SystemClock};
pub use connection::{outbox, ConnectionId, Inbox, Outbox};
pub use registry::{Binding, Registry, RegistryConfig, RegistryError, RegistryStats};
pub use room::{Member, Room};
