//! Session errors

use crate::event::DisconnectReason;
use duckov_io::SocketError;
use duckov_protocol::KcpError;
use std::net::SocketAddr;
use thiserror::Error;

/// Errors returned by [`KcpClient`](crate::KcpClient) and [`KcpServer`](crate::KcpServer)
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Not connected")]
    NotConnected,

    #[error("Already connected or connecting")]
    AlreadyConnected,

    #[error("Could not resolve address: {0}")]
    Resolve(String),

    #[error("Connection failed: {0}")]
    ConnectFailed(DisconnectReason),

    #[error("Unknown peer: {0}")]
    UnknownPeer(SocketAddr),

    #[error("Socket error: {0}")]
    Socket(#[from] SocketError),

    #[error("ARQ error: {0}")]
    Kcp(#[from] KcpError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
