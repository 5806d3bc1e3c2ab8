//! Connection state and reconnect tuning.

use std::fmt;
use std::time::Duration;

use bms_shared::Namespace;

/// Connection state for the realtime socket
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Reconnecting { attempt: u32 },
    Error { reason: String },
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    pub fn is_connecting(&self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting | ConnectionState::Reconnecting { .. }
        )
    }

    /// Short label for status badges.
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting { .. } => "reconnecting",
            ConnectionState::Error { .. } => "error",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Reconnecting { attempt } => write!(f, "reconnecting (attempt {})", attempt),
            ConnectionState::Error { reason } => write!(f, "error: {}", reason),
            other => f.write_str(other.as_str()),
        }
    }
}

/// Snapshot published after every transition.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    pub reconnect_attempts: u32,
}

/// Configuration for auto-reconnect behavior
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    /// Maximum number of reconnect attempts (0 = infinite)
    pub max_attempts: u32,
    /// Delay before the first retry in milliseconds
    pub initial_delay_ms: u64,
    /// Maximum delay in milliseconds
    pub max_delay_ms: u64,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            initial_delay_ms: 1000,
            max_delay_ms: 30000,
            backoff_multiplier: 2.0,
        }
    }
}

impl ReconnectConfig {
    /// Preset for point-of-sale terminals: quicker first retry, lower cap.
    pub fn pos() -> Self {
        Self {
            max_attempts: 10,
            initial_delay_ms: 500,
            max_delay_ms: 10000,
            backoff_multiplier: 2.0,
        }
    }

    pub fn for_namespace(namespace: Namespace) -> Self {
        match namespace {
            Namespace::Pos => Self::pos(),
            Namespace::Main | Namespace::Admin => Self::default(),
        }
    }

    /// Delay before retry number `attempt` (1-based):
    /// `min(initial * multiplier^(attempt - 1), max)`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let delay = self.initial_delay_ms as f64 * self.backoff_multiplier.powi(exponent);
        let capped = if delay.is_finite() {
            delay.min(self.max_delay_ms as f64) as u64
        } else {
            self.max_delay_ms
        };
        Duration::from_millis(capped)
    }

    /// Whether the retry counter has reached the ceiling.
    pub fn exhausted(&self, attempt: u32) -> bool {
        self.max_attempts > 0 && attempt >= self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_double_then_cap() {
        let cfg = ReconnectConfig::default();
        let delays: Vec<u64> = (1..=7)
            .map(|n| cfg.delay_for_attempt(n).as_millis() as u64)
            .collect();
        assert_eq!(delays, vec![1000, 2000, 4000, 8000, 16000, 30000, 30000]);
    }

    #[test]
    fn huge_attempt_numbers_stay_capped() {
        let cfg = ReconnectConfig::default();
        assert_eq!(cfg.delay_for_attempt(u32::MAX), Duration::from_millis(30000));
    }

    #[test]
    fn zero_max_attempts_never_exhausts() {
        let cfg = ReconnectConfig { max_attempts: 0, ..Default::default() };
        assert!(!cfg.exhausted(1_000_000));
        assert!(ReconnectConfig::default().exhausted(10));
        assert!(!ReconnectConfig::default().exhausted(9));
    }

    #[test]
    fn pos_preset_is_selected_by_namespace() {
        assert_eq!(ReconnectConfig::for_namespace(Namespace::Pos), ReconnectConfig::pos());
        assert_eq!(ReconnectConfig::for_namespace(Namespace::Admin), ReconnectConfig::default());
    }
}
