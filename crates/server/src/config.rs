//! Server configuration from environment variables.

use std::collections::HashSet;
use std::net::SocketAddr;

use anyhow::Context;

const DEFAULT_BIND: &str = "0.0.0.0:8080";
const DEFAULT_ROOM_CAPACITY: usize = 100;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: SocketAddr,
    /// Accepted bearer tokens. Empty means any non-empty token is accepted.
    pub tokens: HashSet<String>,
    /// Buffered events per room before slow sockets start lagging.
    pub room_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 8080)),
            tokens: HashSet::new(),
            room_capacity: DEFAULT_ROOM_CAPACITY,
        }
    }
}

impl ServerConfig {
    /// Parse configuration from environment variables.
    ///
    /// Environment variables:
    /// - `BMS_REALTIME_BIND`: listen address (default: "0.0.0.0:8080")
    /// - `BMS_REALTIME_TOKENS`: comma separated accepted tokens (default: any)
    /// - `BMS_REALTIME_ROOM_CAPACITY`: per-room event buffer (default: 100)
    pub fn from_env() -> anyhow::Result<Self> {
        let bind = std::env::var("BMS_REALTIME_BIND").unwrap_or_else(|_| DEFAULT_BIND.to_string());
        let bind = bind
            .parse()
            .with_context(|| format!("invalid BMS_REALTIME_BIND '{}'", bind))?;

        let tokens = std::env::var("BMS_REALTIME_TOKENS")
            .map(|raw| parse_tokens(&raw))
            .unwrap_or_default();

        let room_capacity = match std::env::var("BMS_REALTIME_ROOM_CAPACITY") {
            Ok(raw) => raw
                .parse::<usize>()
                .with_context(|| format!("invalid BMS_REALTIME_ROOM_CAPACITY '{}'", raw))?
                .max(1),
            Err(_) => DEFAULT_ROOM_CAPACITY,
        };

        Ok(Self {
            bind,
            tokens,
            room_capacity,
        })
    }

    pub fn with_tokens<I, S>(mut self, tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tokens = tokens.into_iter().map(Into::into).collect();
        self
    }

    pub fn accepts(&self, token: &str) -> bool {
        let token = token.trim();
        !token.is_empty() && (self.tokens.is_empty() || self.tokens.contains(token))
    }
}

fn parse_tokens(raw: &str) -> HashSet<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}
