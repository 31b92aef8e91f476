//! Wire model: envelopes, tags, and ordering timestamps.
//!
//! Every frame on the socket is a JSON envelope
//! `{"type": <tag>, "data": <payload>, "timestamp": <ordering value>}`.
//! The payload stays undecoded until a handler asks for its own shape.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, de};
use serde_json::value::RawValue;
use std::{
    fmt,
    str::FromStr,
    sync::atomic::{AtomicI64, Ordering},
};

use super::errors::{ClientError, ParseError, Result};

/// Tags the server and client understand.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum MessageType {
    RoomInfo,
    RoomJoin,
    RoomJoinOk,
    RoomLeave,
    RoomLeaveOk,
    GameJoin,
    GameJoinOk,
    GameLeave,
    GameLeaveOk,
    GameAction,
    GameHoldemAction,
    Error,
}

impl MessageType {
    pub const ALL: [Self; 12] = [
        Self::RoomInfo,
        Self::RoomJoin,
        Self::RoomJoinOk,
        Self::RoomLeave,
        Self::RoomLeaveOk,
        Self::GameJoin,
        Self::GameJoinOk,
        Self::GameLeave,
        Self::GameLeaveOk,
        Self::GameAction,
        Self::GameHoldemAction,
        Self::Error,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::RoomInfo => "room_info",
            Self::RoomJoin => "room_join",
            Self::RoomJoinOk => "room_join_ok",
            Self::RoomLeave => "room_leave",
            Self::RoomLeaveOk => "room_leave_ok",
            Self::GameJoin => "game_join",
            Self::GameJoinOk => "game_join_ok",
            Self::GameLeave => "game_leave",
            Self::GameLeaveOk => "game_leave_ok",
            Self::GameAction => "game_action",
            Self::GameHoldemAction => "game_holdem_action",
            Self::Error => "error",
        }
    }

    /// Whether inbound envelopes with this tag carry a room snapshot and
    /// are therefore subject to the stale-update rule.
    pub fn carries_snapshot(self) -> bool {
        matches!(
            self,
            Self::RoomJoin
                | Self::RoomJoinOk
                | Self::RoomLeave
                | Self::GameJoin
                | Self::GameJoinOk
                | Self::GameLeave
                | Self::GameLeaveOk
        )
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for MessageType {
    type Err = ClientError;

    fn from_str(tag: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|message_type| message_type.as_str() == tag)
            .ok_or_else(|| ClientError::decode(tag, "unknown message type"))
    }
}

/// Ordering value attached to every envelope.
///
/// Integers are taken as-is (a server counter or unix time). RFC 3339
/// strings are converted to nanoseconds since the epoch. A missing or null
/// timestamp orders before everything else.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct Timestamp(i64);

impl Timestamp {
    pub const MIN: Self = Self(i64::MIN);

    pub const fn new(value: i64) -> Self {
        Self(value)
    }

    pub const fn value(self) -> i64 {
        self.0
    }

    /// Wall-clock time in nanoseconds since the epoch.
    pub fn from_datetime(datetime: DateTime<Utc>) -> Option<Self> {
        datetime.timestamp_nanos_opt().map(Self)
    }
}

impl Default for Timestamp {
    fn default() -> Self {
        Self::MIN
    }
}

impl From<i64> for Timestamp {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl<'de> Deserialize<'de> for Timestamp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum RawTimestamp {
            Integer(i64),
            Float(f64),
            Text(String),
        }

        match Option::<RawTimestamp>::deserialize(deserializer)? {
            None => Ok(Self::MIN),
            Some(RawTimestamp::Integer(value)) => Ok(Self(value)),
            Some(RawTimestamp::Float(value)) => Ok(Self(value as i64)),
            Some(RawTimestamp::Text(text)) => {
                if let Ok(value) = text.parse::<i64>() {
                    return Ok(Self(value));
                }
                DateTime::parse_from_rfc3339(&text)
                    .ok()
                    .and_then(|datetime| Self::from_datetime(datetime.with_timezone(&Utc)))
                    .ok_or_else(|| de::Error::custom(format!("invalid timestamp '{text}'")))
            }
        }
    }
}

/// How outbound envelopes are stamped.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum TimestampMode {
    /// A per-connection counter starting at 1.
    #[default]
    Counter,
    /// Wall-clock milliseconds since the epoch.
    WallClock,
}

impl FromStr for TimestampMode {
    type Err = ParseError;

    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "counter" => Ok(Self::Counter),
            "wallclock" | "wall-clock" | "wall_clock" | "clock" => Ok(Self::WallClock),
            _ => Err(ParseError::new("timestamp mode", value)),
        }
    }
}

/// Produces timestamps for outbound envelopes.
#[derive(Debug)]
pub struct Stamper {
    mode: TimestampMode,
    counter: AtomicI64,
}

impl Stamper {
    pub fn new(mode: TimestampMode) -> Self {
        Self {
            mode,
            counter: AtomicI64::new(0),
        }
    }

    pub fn next(&self) -> Timestamp {
        match self.mode {
            TimestampMode::Counter => Timestamp(self.counter.fetch_add(1, Ordering::Relaxed) + 1),
            TimestampMode::WallClock => Timestamp(Utc::now().timestamp_millis()),
        }
    }
}

/// One frame on the wire.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub tag: String,
    #[serde(default)]
    pub data: Option<Box<RawValue>>,
    #[serde(default)]
    pub timestamp: Timestamp,
}

impl Envelope {
    /// Build an envelope around an already-typed payload.
    pub fn new<T: Serialize>(
        message_type: MessageType,
        payload: &T,
        timestamp: Timestamp,
    ) -> Result<Self> {
        let data = serde_json::value::to_raw_value(payload)
            .map_err(|error| ClientError::decode(message_type.as_str(), error))?;
        Ok(Self {
            tag: message_type.as_str().to_string(),
            data: Some(data),
            timestamp,
        })
    }

    /// The undecoded payload text (`null` when absent).
    pub fn payload(&self) -> &str {
        self.data.as_deref().map_or("null", RawValue::get)
    }

    /// The tag as a known message type.
    pub fn message_type(&self) -> Result<MessageType> {
        self.tag.parse()
    }
}

/// Payload of an `error` envelope.
///
/// Servers send `{"type": <code>, "message": <text>}`, `{"error": <text>}`,
/// or just the text as a bare string.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct ErrorMessage {
    /// Machine-readable code such as `game_position_taken`.
    #[serde(rename = "type")]
    pub code: String,
    pub message: String,
}

impl<'de> Deserialize<'de> for ErrorMessage {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        struct Fields {
            #[serde(rename = "type", default)]
            code: String,
            #[serde(default)]
            message: String,
            #[serde(default)]
            error: String,
        }

        #[derive(Deserialize)]
        #[serde(untagged)]
        enum RawError {
            Text(String),
            Fields(Fields),
        }

        Ok(match Option::<RawError>::deserialize(deserializer)? {
            None => Self::default(),
            Some(RawError::Text(message)) => Self {
                code: String::new(),
                message,
            },
            Some(RawError::Fields(fields)) => Self {
                code: fields.code,
                message: if fields.message.is_empty() {
                    fields.error
                } else {
                    fields.message
                },
            },
        })
    }
}

impl fmt::Display for ErrorMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.code.is_empty(), self.message.is_empty()) {
            (false, false) => write!(f, "{}: {}", self.code, self.message),
            (false, true) => write!(f, "{}", self.code),
            _ => write!(f, "{}", self.message),
        }
    }
}

/// Error codes the game service is known to send.
pub mod error_codes {
    pub const GAME_FULL: &str = "game_full";
    pub const GAME_PLAYER_ALREADY_IN: &str = "game_player_already_in";
    pub const GAME_POSITION_TAKEN: &str = "game_position_taken";
    pub const GAME_PLAYER_NOT_FOUND: &str = "game_player_not_found";
    pub const GAME_NOT_READY: &str = "game_not_ready";
}
