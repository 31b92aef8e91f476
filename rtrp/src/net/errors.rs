//! Error types for the protocol client.

use thiserror::Error;

use super::messages::ErrorMessage;
use crate::room::Phase;

/// Everything that can go wrong between the caller and the socket.
///
/// Only [`ClientError::Transport`] is fatal to a connection. The rest are
/// per-message faults that are reported where they happen and then dropped.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Connect, send, or receive failed, or the connection is not open.
    #[error("transport error: {0}")]
    Transport(String),

    /// A frame or payload could not be decoded into the expected shape.
    #[error("failed to decode {tag} payload: {reason}")]
    Decode { tag: String, reason: String },

    /// The server answered with an `error` envelope.
    #[error("server rejected request: {0}")]
    Protocol(ErrorMessage),

    /// An intent was issued from a phase that forbids it.
    #[error("{intent} not allowed while {phase}")]
    State { intent: &'static str, phase: Phase },

    /// An intent was built with a missing identifier.
    #[error("invalid intent: {0}")]
    Validation(String),

    /// A registered handler failed or panicked.
    #[error("handler for {tag} failed: {reason}")]
    Handler { tag: String, reason: String },
}

impl ClientError {
    pub(crate) fn transport(error: impl std::fmt::Display) -> Self {
        Self::Transport(error.to_string())
    }

    pub(crate) fn decode(tag: impl Into<String>, error: impl std::fmt::Display) -> Self {
        Self::Decode {
            tag: tag.into(),
            reason: error.to_string(),
        }
    }

    /// Whether the error ended the connection.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for ClientError {
    fn from(error: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::transport(error)
    }
}

/// A configuration value that names no known variant.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
#[error("unknown {kind} '{value}'")]
pub struct ParseError {
    pub kind: &'static str,
    pub value: String,
}

impl ParseError {
    pub(crate) fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

/// Result type for client operations
pub type Result<T> = std::result::Result<T, ClientError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_is_fatal() {
        assert!(ClientError::Transport("reset".to_string()).is_fatal());
        assert!(!ClientError::Validation("empty room id".to_string()).is_fatal());
    }

    #[test]
    fn test_state_error_display() {
        let error = ClientError::State {
            intent: "game join",
            phase: Phase::NoRoom,
        };
        assert_eq!(error.to_string(), "game join not allowed while not in a room");
    }

    #[test]
    fn test_protocol_error_display() {
        let error = ClientError::Protocol(ErrorMessage {
            code: "game_position_taken".to_string(),
            message: "position 2 is taken".to_string(),
        });
        let display = error.to_string();
        assert!(display.contains("game_position_taken"));
        assert!(display.contains("position 2 is taken"));
    }

    #[test]
    fn test_parse_error_display() {
        let error = ParseError::new("token placement", "cookie");
        assert_eq!(error.to_string(), "unknown token placement 'cookie'");
    }

    #[test]
    fn test_decode_error_display() {
        let error = ClientError::decode("room_join_ok", "missing field `room_id`");
        assert_eq!(
            error.to_string(),
            "failed to decode room_join_ok payload: missing field `room_id`"
        );
    }
}
