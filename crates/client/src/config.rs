//! Client configuration, built in code or read from the environment.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bms_shared::Namespace;
use url::Url;

use crate::error::{RealtimeError, Result};
use crate::ws::ReconnectConfig;

const DEFAULT_URL: &str = "ws://localhost:8080";
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_ROOM_QUERY_TIMEOUT: Duration = Duration::from_secs(5);

/// Supplies the bearer token. Called on every (re)connect so a refreshed
/// session token is picked up without rebuilding the client.
pub type TokenSource = Arc<dyn Fn() -> Option<String> + Send + Sync>;

/// Configuration for a [`RealtimeClient`](crate::RealtimeClient).
#[derive(Clone)]
pub struct ClientConfig {
    pub base_url: Url,
    pub namespace: Namespace,
    pub reconnect: ReconnectConfig,
    /// Upper bound on a single handshake.
    pub connect_timeout: Duration,
    /// How long `current_rooms()` waits for the server before giving up.
    pub room_query_timeout: Duration,
    /// Send a `ping` frame at this interval while connected.
    pub heartbeat_interval: Option<Duration>,
    token_source: TokenSource,
}

impl ClientConfig {
    pub fn new(base_url: Url, namespace: Namespace) -> Self {
        Self {
            base_url,
            namespace,
            reconnect: ReconnectConfig::for_namespace(namespace),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            room_query_timeout: DEFAULT_ROOM_QUERY_TIMEOUT,
            heartbeat_interval: None,
            token_source: Arc::new(|| None),
        }
    }

    /// Build a configuration from environment variables.
    ///
    /// - `BMS_REALTIME_URL`: base URL (default: `ws://localhost:8080`)
    /// - `BMS_REALTIME_NAMESPACE`: `main` | `admin` | `pos` (default: `main`)
    /// - `BMS_REALTIME_TOKEN`: bearer token (optional, may be set later)
    pub fn from_env() -> Result<Self> {
        let raw_url =
            std::env::var("BMS_REALTIME_URL").unwrap_or_else(|_| DEFAULT_URL.to_string());
        let base_url = Url::parse(&raw_url)
            .map_err(|e| RealtimeError::InvalidEndpoint(format!("{}: {}", raw_url, e)))?;

        let namespace = match std::env::var("BMS_REALTIME_NAMESPACE") {
            Ok(raw) => raw.parse()?,
            Err(_) => Namespace::Main,
        };

        let mut config = Self::new(base_url, namespace);
        if let Ok(token) = std::env::var("BMS_REALTIME_TOKEN") {
            config = config.with_token(token);
        }
        Ok(config)
    }

    /// Use a fixed token.
    pub fn with_token(self, token: impl Into<String>) -> Self {
        let token = token.into();
        self.with_token_source(move || Some(token.clone()))
    }

    pub fn with_token_source(
        mut self,
        source: impl Fn() -> Option<String> + Send + Sync + 'static,
    ) -> Self {
        self.token_source = Arc::new(source);
        self
    }

    pub fn with_reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = reconnect;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_room_query_timeout(mut self, timeout: Duration) -> Self {
        self.room_query_timeout = timeout;
        self
    }

    pub fn with_heartbeat(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = Some(interval);
        self
    }

    /// Current token, if any. Empty strings count as missing.
    pub fn token(&self) -> Option<String> {
        (self.token_source)().filter(|t| !t.trim().is_empty())
    }

    /// Socket URL for the configured namespace.
    ///
    /// `http`/`https` bases are mapped to `ws`/`wss`; the namespace path is
    /// appended to whatever path the base already carries.
    pub fn endpoint_url(&self) -> Result<Url> {
        let mut url = self.base_url.clone();
        let scheme = match url.scheme() {
            "ws" | "http" => "ws",
            "wss" | "https" => "wss",
            other => {
                return Err(RealtimeError::InvalidEndpoint(format!(
                    "unsupported scheme '{}'",
                    other
                )))
            }
        };
        url.set_scheme(scheme)
            .map_err(|_| RealtimeError::InvalidEndpoint(self.base_url.to_string()))?;

        let path = format!(
            "{}{}",
            url.path().trim_end_matches('/'),
            self.namespace.path()
        );
        url.set_path(&path);
        url.set_query(None);
        Ok(url)
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("base_url", &self.base_url.as_str())
            .field("namespace", &self.namespace)
            .field("reconnect", &self.reconnect)
            .field("connect_timeout", &self.connect_timeout)
            .field("room_query_timeout", &self.room_query_timeout)
            .field("heartbeat_interval", &self.heartbeat_interval)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(base: &str, namespace: Namespace) -> ClientConfig {
        ClientConfig::new(Url::parse(base).unwrap(), namespace)
    }

    #[test]
    fn endpoint_appends_namespace_path() {
        let url = config("ws://localhost:8080", Namespace::Pos).endpoint_url().unwrap();
        assert_eq!(url.as_str(), "ws://localhost:8080/pos");

        let url = config("https://bms.example.com/realtime/", Namespace::Admin)
            .endpoint_url()
            .unwrap();
        assert_eq!(url.as_str(), "wss://bms.example.com/realtime/admin");
    }

    #[test]
    fn endpoint_rejects_non_socket_schemes() {
        let err = config("ftp://example.com", Namespace::Main).endpoint_url().unwrap_err();
        assert!(matches!(err, RealtimeError::InvalidEndpoint(_)));
    }

    #[test]
    fn blank_token_counts_as_missing() {
        let cfg = config("ws://localhost", Namespace::Main).with_token("  ");
        assert_eq!(cfg.token(), None);

        let cfg = cfg.with_token("abc");
        assert_eq!(cfg.token().as_deref(), Some("abc"));
    }

    #[test]
    fn token_source_is_consulted_each_time() {
        use std::sync::atomic::{AtomicU32, Ordering};

        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let cfg = config("ws://localhost", Namespace::Main).with_token_source(move || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            Some(format!("token-{}", n))
        });

        assert_eq!(cfg.token().as_deref(), Some("token-0"));
        assert_eq!(cfg.token().as_deref(), Some("token-1"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
