//! Realtime event client.
//!
//! This module provides:
//! - Connection management with capped exponential-backoff reconnect
//! - Event dispatch to independently registered handlers
//! - Room membership that survives reconnects
//! - Connection-state observers for status badges and refresh hooks
//!
//! # Architecture
//!
//! ```text
//!   ┌────────────────────┐   commands    ┌─────────────────────────────┐
//!   │  RealtimeClient    │ ────────────▶ │           Driver            │
//!   │  (cloneable handle)│               │  ConnectionMachine          │
//!   └────────────────────┘               │  RoomTracker                │
//!        │ on / off                      │  Transport (one at a time)  │
//!        ▼                               └─────────────────────────────┘
//!   ┌────────────────────┐   emit / notify         │
//!   │  EventRegistry     │ ◀───────────────────────┘
//!   │  StateObservers    │
//!   └────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! let config = ClientConfig::new(url, Namespace::Pos).with_token(token);
//! let client = RealtimeClient::new(config);
//!
//! let sub = client.on(event_types::STOCK_ADJUSTED, |event| {
//!     refresh_stock(&event.branch_id);
//! });
//! client.join_room(branch_room("b-1"))?;
//! client.connect().await?;
//!
//! // On teardown
//! sub.unsubscribe();
//! client.dispose().await;
//! ```

mod client;
mod connection;
mod driver;
mod machine;
mod registry;
mod rooms;
mod transport;

pub use client::RealtimeClient;
pub use connection::{ConnectionState, ConnectionStatus, ReconnectConfig};
pub use machine::{Action, ConnectionMachine};
pub use registry::{EventRegistry, StateObservers, Subscription, SubscriptionId};
pub use rooms::RoomTracker;
pub use transport::{Connector, Endpoint, Transport, WsConnector};
