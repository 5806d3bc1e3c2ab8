//! Realtime event payloads and namespace definitions.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

/// Logical partition of the realtime channel, mapped to a path on the endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Namespace {
    Main,
    Admin,
    Pos,
}

impl Namespace {
    pub const ALL: [Namespace; 3] = [Namespace::Main, Namespace::Admin, Namespace::Pos];

    /// Path suffix appended to the base URL, e.g. `/pos`.
    pub fn path(&self) -> &'static str {
        match self {
            Namespace::Main => "/main",
            Namespace::Admin => "/admin",
            Namespace::Pos => "/pos",
        }
    }

    pub fn as_str(&self) -> &'static str {
        &self.path()[1..]
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Namespace {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim().trim_start_matches('/').to_lowercase();
        Namespace::ALL
            .into_iter()
            .find(|ns| ns.as_str() == name)
            .ok_or(ProtocolError::UnknownNamespace(name))
    }
}

/// A notification pushed by the server.
///
/// The field layout is a wire contract consumed by dashboards and POS
/// terminals: `{ id, type, timestamp, branchId, userId?, data }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub timestamp: DateTime<Utc>,
    pub branch_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default)]
    pub data: serde_json::Map<String, serde_json::Value>,
}

impl RealtimeEvent {
    /// Build an event stamped with a fresh id and the current time.
    pub fn new(event_type: impl Into<String>, branch_id: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            event_type: event_type.into(),
            timestamp: Utc::now(),
            branch_id: branch_id.into(),
            user_id: None,
            data: serde_json::Map::new(),
        }
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_field(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }
}

/// Event types emitted by the BMS backend.
pub mod event_types {
    pub const INVENTORY_UPDATED: &str = "inventory.updated";
    pub const STOCK_ADJUSTED: &str = "stock.adjusted";
    pub const TRANSACTION_CREATED: &str = "transaction.created";
    pub const PURCHASE_ORDER_UPDATED: &str = "purchase_order.updated";
    pub const MESSAGE_NEW: &str = "message.new";
    pub const ATTENDANCE_UPDATED: &str = "attendance.updated";
    /// Synthesized by the client when the server answers with an `error` frame.
    pub const ERROR: &str = "error";
}

/// Name of the broadcast room scoped to one branch.
pub fn branch_room(branch_id: &str) -> String {
    format!("branch:{}", branch_id)
}
