//! BMS realtime client
//!
//! Keeps dashboards and POS terminals in sync with the BMS backend over a
//! namespace-scoped WebSocket. The REST API stays the source of truth; this
//! channel only pushes notifications and invalidations.

pub mod config;
pub mod error;
pub mod logging;
pub mod ws;

pub use bms_shared::{branch_room, event_types, Namespace, RealtimeEvent};
pub use config::{ClientConfig, TokenSource};
pub use error::{RealtimeError, Result};
pub use ws::{
    ConnectionState, ConnectionStatus, Connector, Endpoint, RealtimeClient, ReconnectConfig,
    Subscription, SubscriptionId, Transport, WsConnector,
};
