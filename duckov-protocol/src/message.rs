//! Session Message Framing
//!
//! Every UDP datagram exchanged between client and server starts with a
//! one-byte tag. The handshake and keepalive messages are sent as-is; reliable
//! traffic is an ARQ datagram carried behind the [`MessageType::Reliable`] tag.

use crate::wire::{Reader, WireError, Writer};
use bytes::Bytes;
use std::fmt;
use thiserror::Error;

/// Default key a server accepts in `CONNECT`
pub const DEFAULT_CONNECTION_KEY: &str = "DuckovNet";

/// Message framing errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MessageError {
    #[error("Empty datagram")]
    Empty,

    #[error("Unknown message type: {0}")]
    UnknownType(u8),

    #[error("Truncated message: {0}")]
    Truncated(#[from] WireError),
}

/// Datagram tag byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    Connect = 1,
    Accept = 2,
    Disconnect = 3,
    /// Unreliable payload
    Data = 4,
    Ping = 5,
    Pong = 6,
    /// ARQ datagram
    Reliable = 8,
}

impl MessageType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(MessageType::Connect),
            2 => Some(MessageType::Accept),
            3 => Some(MessageType::Disconnect),
            4 => Some(MessageType::Data),
            5 => Some(MessageType::Ping),
            6 => Some(MessageType::Pong),
            8 => Some(MessageType::Reliable),
            _ => None,
        }
    }
}

/// A decoded session datagram
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Connection request carrying the shared key
    Connect { key: String },
    Accept,
    Disconnect { reason: String },
    /// Unreliable payload on a channel (always 0 today)
    Data { channel: u8, payload: Bytes },
    /// Keepalive; the timestamp is echoed back unchanged in `Pong`
    Ping { timestamp: i64 },
    Pong { timestamp: i64 },
    Reliable { datagram: Bytes },
}

impl Message {
    pub fn message_type(&self) -> MessageType {
        match self {
            Message::Connect { .. } => MessageType::Connect,
            Message::Accept => MessageType::Accept,
            Message::Disconnect { .. } => MessageType::Disconnect,
            Message::Data { .. } => MessageType::Data,
            Message::Ping { .. } => MessageType::Ping,
            Message::Pong { .. } => MessageType::Pong,
            Message::Reliable { .. } => MessageType::Reliable,
        }
    }

    /// Encode into `writer` (not reset first)
    pub fn write_to(&self, writer: &mut Writer) {
        writer.put_u8(self.message_type() as u8);
        match self {
            Message::Connect { key } => writer.put_bytes(key.as_bytes()),
            Message::Accept => {}
            Message::Disconnect { reason } => writer.put_bytes(reason.as_bytes()),
            Message::Data { channel, payload } => {
                writer.put_u8(*channel);
                writer.put_bytes(payload);
            }
            Message::Ping { timestamp } | Message::Pong { timestamp } => {
                writer.put_i64(*timestamp)
            }
            Message::Reliable { datagram } => writer.put_bytes(datagram),
        }
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut writer = Writer::new();
        self.write_to(&mut writer);
        writer.into_bytes()
    }

    /// Decode a datagram
    pub fn from_bytes(datagram: &[u8]) -> Result<Self, MessageError> {
        let mut reader = Reader::new(datagram);
        let tag = reader.try_get_u8().ok_or(MessageError::Empty)?;
        let kind = MessageType::from_u8(tag).ok_or(MessageError::UnknownType(tag))?;

        let message = match kind {
            MessageType::Connect => Message::Connect {
                key: String::from_utf8_lossy(reader.get_remaining_bytes()).into_owned(),
            },
            MessageType::Accept => Message::Accept,
            MessageType::Disconnect => Message::Disconnect {
                reason: String::from_utf8_lossy(reader.get_remaining_bytes()).into_owned(),
            },
            MessageType::Data => {
                let channel = reader.get_u8()?;
                Message::Data {
                    channel,
                    payload: Bytes::copy_from_slice(reader.get_remaining_bytes()),
                }
            }
            MessageType::Ping => Message::Ping {
                timestamp: reader.get_i64()?,
            },
            MessageType::Pong => Message::Pong {
                timestamp: reader.get_i64()?,
            },
            MessageType::Reliable => Message::Reliable {
                datagram: Bytes::copy_from_slice(reader.get_remaining_bytes()),
            },
        };
        Ok(message)
    }

    /// Frame an ARQ datagram without an intermediate `Message`
    pub fn frame_reliable(datagram: &[u8]) -> Bytes {
        let mut writer = Writer::with_capacity(datagram.len() + 1);
        writer.put_u8(MessageType::Reliable as u8);
        writer.put_bytes(datagram);
        writer.into_bytes()
    }

    /// Frame an unreliable payload on channel 0
    pub fn frame_data(payload: &[u8]) -> Bytes {
        let mut writer = Writer::with_capacity(payload.len() + 2);
        writer.put_u8(MessageType::Data as u8);
        writer.put_u8(0);
        writer.put_bytes(payload);
        writer.into_bytes()
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Message::Connect { .. } => write!(f, "CONNECT"),
            Message::Accept => write!(f, "ACCEPT"),
            Message::Disconnect { reason } => write!(f, "DISCONNECT({})", reason),
            Message::Data { payload, .. } => write!(f, "DATA({} bytes)", payload.len()),
            Message::Ping { timestamp } => write!(f, "PING({})", timestamp),
            Message::Pong { timestamp } => write!(f, "PONG({})", timestamp),
            Message::Reliable { datagram } => write!(f, "RELIABLE({} bytes)", datagram.len()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_layout() {
        let bytes = Message::Connect {
            key: DEFAULT_CONNECTION_KEY.to_string(),
        }
        .to_bytes();
        assert_eq!(bytes[0], 1);
        assert_eq!(&bytes[1..], b"DuckovNet");
    }

    #[test]
    fn test_data_layout() {
        let bytes = Message::frame_data(b"xyz");
        assert_eq!(bytes.as_ref(), &[4, 0, b'x', b'y', b'z']);

        match Message::from_bytes(&bytes).unwrap() {
            Message::Data { channel, payload } => {
                assert_eq!(channel, 0);
                assert_eq!(payload.as_ref(), b"xyz");
            }
            other => panic!("unexpected message: {}", other),
        }
    }

    #[test]
    fn test_ping_layout() {
        let bytes = Message::Ping { timestamp: 0x0102 }.to_bytes();
        assert_eq!(bytes.len(), 9);
        assert_eq!(bytes[0], 5);
        assert_eq!(&bytes[1..], &0x0102i64.to_le_bytes());
    }

    #[test]
    fn test_roundtrip() {
        let messages = vec![
            Message::Connect {
                key: "secret".into(),
            },
            Message::Accept,
            Message::Disconnect {
                reason: "bye".into(),
            },
            Message::Disconnect {
                reason: String::new(),
            },
            Message::Pong { timestamp: -7 },
            Message::Reliable {
                datagram: Bytes::from_static(&[1, 2, 3]),
            },
        ];
        for message in messages {
            assert_eq!(Message::from_bytes(&message.to_bytes()).unwrap(), message);
        }
    }

    #[test]
    fn test_frame_reliable() {
        let bytes = Message::frame_reliable(&[9, 9]);
        assert_eq!(bytes.as_ref(), &[8, 9, 9]);
    }

    #[test]
    fn test_decode_errors() {
        assert_eq!(Message::from_bytes(&[]), Err(MessageError::Empty));
        assert_eq!(Message::from_bytes(&[7]), Err(MessageError::UnknownType(7)));
        assert!(matches!(
            Message::from_bytes(&[5, 1, 2]),
            Err(MessageError::Truncated(_))
        ));
        assert!(matches!(
            Message::from_bytes(&[4]),
            Err(MessageError::Truncated(_))
        ));
    }
}
