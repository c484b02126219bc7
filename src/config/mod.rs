//! Server configuration.
use std::{net::SocketAddr, time::Duration};

use serde::Deserialize;

use crate::types::MessengerError;

const ENV_BIND_ADDR: &str = "WSMESSENGER_BIND_ADDR";
const ENV_OUTBOUND_QUEUE_CAPACITY: &str = "WSMESSENGER_OUTBOUND_QUEUE_CAPACITY";
const ENV_CLIENT_ID_PARAM: &str = "WSMESSENGER_CLIENT_ID_PARAM";
const ENV_SLOW_LISTENER_THRESHOLD_MS: &str = "WSMESSENGER_SLOW_LISTENER_THRESHOLD_MS";

/// Settings shared by the server core and the WebSocket transport.
///
/// ## Example
///
/// ```rust
/// use wsmessenger::config::ServerConfig;
///
/// let config = ServerConfig::default()
///     .bind_addr("127.0.0.1:7000".parse().unwrap())
///     .outbound_queue_capacity(256);
/// assert_eq!(config.outbound_queue_capacity, 256);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// Address the transport listens on.
    pub bind_addr: SocketAddr,
    /// Capacity of each connection's outbound queue, in messages.
    pub outbound_queue_capacity: usize,
    /// Handshake query parameter carrying a client-chosen id.
    pub client_id_param: String,
    /// Listener calls slower than this are reported.
    pub slow_listener_threshold_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 9000)),
            outbound_queue_capacity: 1024,
            client_id_param: "clientId".to_string(),
            slow_listener_threshold_ms: 500,
        }
    }
}

impl ServerConfig {
    /// Sets the listen address.
    #[must_use]
    pub fn bind_addr(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Sets the per-connection outbound queue capacity.
    #[must_use]
    pub fn outbound_queue_capacity(mut self, capacity: usize) -> Self {
        self.outbound_queue_capacity = capacity;
        self
    }

    /// Sets the handshake query parameter used for client ids.
    #[must_use]
    pub fn client_id_param<S: Into<String>>(mut self, param: S) -> Self {
        self.client_id_param = param.into();
        self
    }

    /// Sets the slow listener threshold.
    #[must_use]
    pub fn slow_listener_threshold(mut self, threshold: Duration) -> Self {
        self.slow_listener_threshold_ms = threshold.as_millis() as u64;
        self
    }

    /// The slow listener threshold as a [`Duration`].
    pub fn slow_listener_threshold_duration(&self) -> Duration {
        Duration::from_millis(self.slow_listener_threshold_ms)
    }

    /// Parses a JSON document; missing fields keep their defaults.
    pub fn from_json(json: &str) -> Result<Self, MessengerError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| MessengerError::Config(e.to_string()))?;
        config.validate()
    }

    /// Overlays `WSMESSENGER_*` environment variables on the defaults.
    pub fn from_env() -> Result<Self, MessengerError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> Result<Self, MessengerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(addr) = lookup(ENV_BIND_ADDR) {
            config.bind_addr = parse_var(ENV_BIND_ADDR, &addr)?;
        }
        if let Some(capacity) = lookup(ENV_OUTBOUND_QUEUE_CAPACITY) {
            config.outbound_queue_capacity = parse_var(ENV_OUTBOUND_QUEUE_CAPACITY, &capacity)?;
        }
        if let Some(param) = lookup(ENV_CLIENT_ID_PARAM) {
            config.client_id_param = param;
        }
        if let Some(ms) = lookup(ENV_SLOW_LISTENER_THRESHOLD_MS) {
            config.slow_listener_threshold_ms = parse_var(ENV_SLOW_LISTENER_THRESHOLD_MS, &ms)?;
        }

        config.validate()
    }

    fn validate(self) -> Result<Self, MessengerError> {
        if self.outbound_queue_capacity == 0 {
            return Err(MessengerError::Config(
                "outbound_queue_capacity must be greater than zero".to_string(),
            ));
        }
        if self.client_id_param.trim().is_empty() {
            return Err(MessengerError::Config(
                "client_id_param must not be empty".to_string(),
            ));
        }
        Ok(self)
    }
}

fn parse_var<T>(key: &str, value: &str) -> Result<T, MessengerError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| MessengerError::Config(format!("{key}={value:?}: {e}")))
}
