//! Session configuration

use duckov_protocol::{KcpConfig, DEFAULT_CONNECTION_KEY};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Client and server session tuning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Shared key sent in `CONNECT` and checked by the server
    #[serde(default = "default_connection_key")]
    pub connection_key: String,
    /// How long `connect` waits for `ACCEPT`
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
    /// Interval between `CONNECT` retransmissions while connecting
    #[serde(default = "default_connect_retry")]
    pub connect_retry_ms: u64,
    /// Silence after which a connected peer is dropped
    #[serde(default = "default_inactivity_timeout")]
    pub inactivity_timeout_ms: u64,
    #[serde(default = "default_ping_interval")]
    pub ping_interval_ms: u64,
    /// Engine tick interval of the update thread
    #[serde(default = "default_update_interval")]
    pub update_interval_ms: u64,
    /// Socket send/receive buffer size in bytes
    #[serde(default = "default_socket_buffer_size")]
    pub socket_buffer_size: usize,
    /// Socket read timeout; bounds how long shutdown waits for the receive thread
    #[serde(default = "default_recv_poll")]
    pub recv_poll_ms: u64,
    #[serde(default = "KcpConfig::channel")]
    pub kcp: KcpConfig,
}

fn default_connection_key() -> String {
    DEFAULT_CONNECTION_KEY.to_string()
}

fn default_connect_timeout() -> u64 {
    5000
}

fn default_connect_retry() -> u64 {
    500
}

fn default_inactivity_timeout() -> u64 {
    15000
}

fn default_ping_interval() -> u64 {
    1000
}

fn default_update_interval() -> u64 {
    10
}

fn default_socket_buffer_size() -> usize {
    1024 * 1024
}

fn default_recv_poll() -> u64 {
    100
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            connection_key: default_connection_key(),
            connect_timeout_ms: default_connect_timeout(),
            connect_retry_ms: default_connect_retry(),
            inactivity_timeout_ms: default_inactivity_timeout(),
            ping_interval_ms: default_ping_interval(),
            update_interval_ms: default_update_interval(),
            socket_buffer_size: default_socket_buffer_size(),
            recv_poll_ms: default_recv_poll(),
            kcp: KcpConfig::channel(),
        }
    }
}

impl SessionConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn connect_retry(&self) -> Duration {
        Duration::from_millis(self.connect_retry_ms)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }

    pub fn update_interval(&self) -> Duration {
        Duration::from_millis(self.update_interval_ms.max(1))
    }

    pub fn recv_poll(&self) -> Duration {
        Duration::from_millis(self.recv_poll_ms.max(1))
    }

    pub(crate) fn socket_options(&self) -> duckov_io::SocketOptions {
        duckov_io::SocketOptions {
            buffer_size: self.socket_buffer_size,
            read_timeout: Some(self.recv_poll()),
            reuse_address: false,
        }
    }
}
