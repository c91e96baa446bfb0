//! Wire messages exchanged over a session's bidirectional stream

use serde::{Deserialize, Serialize};

use crate::sim::node::Identity;

/// Messages from client to broker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClientMessage {
    /// "I reacted": relayed to every other session
    SendReaction,
    /// Ping for latency measurement
    Ping { timestamp: u64 },
    /// Request to leave; the broker treats it like a disconnect
    Leave,
}

/// Messages from broker to client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerMessage {
    /// First message on a new session: its own identity and everyone already
    /// connected
    Welcome {
        identity: Identity,
        roster: Vec<Identity>,
        count: u32,
    },
    /// Another session connected
    Join { identity: Identity, count: u32 },
    /// A session went away
    Leave { identity: Identity, count: u32 },
    /// Another session reacted
    ReceiveReaction { from: Identity },
    /// Pong response with server timestamp
    Pong {
        client_timestamp: u64,
        server_timestamp: u64,
    },
}

impl ServerMessage {
    /// Short name for logs
    pub fn kind(&self) -> &'static str {
        match self {
            ServerMessage::Welcome { .. } => "welcome",
            ServerMessage::Join { .. } => "join",
            ServerMessage::Leave { .. } => "leave",
            ServerMessage::ReceiveReaction { .. } => "receive-reaction",
            ServerMessage::Pong { .. } => "pong",
        }
    }

    /// Membership notifications are logged louder when dropped
    pub fn is_membership(&self) -> bool {
        matches!(self, ServerMessage::Join { .. } | ServerMessage::Leave { .. })
    }
}

/// Encode a message using bincode.
/// Uses legacy config for fixed-size integers.
pub fn encode<T: Serialize>(message: &T) -> Result<Vec<u8>, EncodeError> {
    bincode::serde::encode_to_vec(message, bincode::config::legacy())
        .map_err(|e| EncodeError(e.to_string()))
}

/// Decode a message using bincode
pub fn decode<T: for<'de> Deserialize<'de>>(data: &[u8]) -> Result<T, DecodeError> {
    bincode::serde::decode_from_slice(data, bincode::config::legacy())
        .map(|(msg, _)| msg)
        .map_err(|e| DecodeError(e.to_string()))
}

#[derive(Debug, thiserror::Error)]
#[error("Encode error: {0}")]
pub struct EncodeError(String);

#[derive(Debug, thiserror::Error)]
#[error("Decode error: {0}")]
pub struct DecodeError(String);

/// Milliseconds since the Unix epoch, for ping timestamps
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
