//! Typed room and game requests.
//!
//! An [`Intent`] is a validated request the session wants to make. The
//! [`Gateway`] hands intents to the connection loop, which checks them
//! against the session phase and sends them; callers get the outcome of
//! that check and send, not the server's reply.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

use crate::{
    net::{
        errors::{ClientError, Result},
        messages::{Envelope, MessageType, Timestamp},
    },
    room::GameType,
};

/// Payload of `room_join`.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct RoomJoin {
    pub room_id: String,
    pub player_id: String,
}

/// Payload of `room_leave`.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct RoomLeave {
    pub room_id: String,
    pub player_id: String,
}

/// Payload of `game_join`.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct GameJoin {
    pub room_id: String,
    pub player_id: String,
    pub position: u32,
}

/// Payload of `game_leave`.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct GameLeave {
    pub room_id: String,
    pub player_id: String,
}

/// Payload of `game_action`. `data` is game specific.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct GameAction {
    pub room_id: String,
    pub player_id: String,
    pub game_type: GameType,
    pub data: Value,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Intent {
    JoinRoom(RoomJoin),
    LeaveRoom(RoomLeave),
    JoinGame(GameJoin),
    LeaveGame(GameLeave),
    GameAction(GameAction),
}

fn required(field: &str, value: &str) -> Result<String> {
    if value.trim().is_empty() {
        return Err(ClientError::Validation(format!("{field} must not be empty")));
    }
    Ok(value.to_string())
}

impl Intent {
    pub fn join_room(room_id: &str, player_id: &str) -> Result<Self> {
        Ok(Self::JoinRoom(RoomJoin {
            room_id: required("room_id", room_id)?,
            player_id: required("player_id", player_id)?,
        }))
    }

    pub fn leave_room(room_id: &str, player_id: &str) -> Result<Self> {
        Ok(Self::LeaveRoom(RoomLeave {
            room_id: required("room_id", room_id)?,
            player_id: required("player_id", player_id)?,
        }))
    }

    pub fn join_game(room_id: &str, player_id: &str, position: u32) -> Result<Self> {
        Ok(Self::JoinGame(GameJoin {
            room_id: required("room_id", room_id)?,
            player_id: required("player_id", player_id)?,
            position,
        }))
    }

    pub fn leave_game(room_id: &str, player_id: &str) -> Result<Self> {
        Ok(Self::LeaveGame(GameLeave {
            room_id: required("room_id", room_id)?,
            player_id: required("player_id", player_id)?,
        }))
    }

    pub fn game_action(
        room_id: &str,
        player_id: &str,
        game_type: GameType,
        data: Value,
    ) -> Result<Self> {
        Ok(Self::GameAction(GameAction {
            room_id: required("room_id", room_id)?,
            player_id: required("player_id", player_id)?,
            game_type,
            data,
        }))
    }

    /// Human-readable name used in errors and logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::JoinRoom(_) => "room join",
            Self::LeaveRoom(_) => "room leave",
            Self::JoinGame(_) => "game join",
            Self::LeaveGame(_) => "game leave",
            Self::GameAction(_) => "game action",
        }
    }

    pub fn message_type(&self) -> MessageType {
        match self {
            Self::JoinRoom(_) => MessageType::RoomJoin,
            Self::LeaveRoom(_) => MessageType::RoomLeave,
            Self::JoinGame(_) => MessageType::GameJoin,
            Self::LeaveGame(_) => MessageType::GameLeave,
            Self::GameAction(_) => MessageType::GameAction,
        }
    }

    pub fn room_id(&self) -> &str {
        match self {
            Self::JoinRoom(payload) => &payload.room_id,
            Self::LeaveRoom(payload) => &payload.room_id,
            Self::JoinGame(payload) => &payload.room_id,
            Self::LeaveGame(payload) => &payload.room_id,
            Self::GameAction(payload) => &payload.room_id,
        }
    }

    pub fn to_envelope(&self, timestamp: Timestamp) -> Result<Envelope> {
        let message_type = self.message_type();
        match self {
            Self::JoinRoom(payload) => Envelope::new(message_type, payload, timestamp),
            Self::LeaveRoom(payload) => Envelope::new(message_type, payload, timestamp),
            Self::JoinGame(payload) => Envelope::new(message_type, payload, timestamp),
            Self::LeaveGame(payload) => Envelope::new(message_type, payload, timestamp),
            Self::GameAction(payload) => Envelope::new(message_type, payload, timestamp),
        }
    }
}

/// Request from a [`Gateway`] to the connection loop.
#[derive(Debug)]
pub enum GatewayCommand {
    Submit {
        intent: Intent,
        response: oneshot::Sender<Result<()>>,
    },
}

/// Cloneable handle for issuing intents on behalf of one player.
#[derive(Clone, Debug)]
pub struct Gateway {
    player_id: String,
    game_type: GameType,
    commands: mpsc::UnboundedSender<GatewayCommand>,
}

impl Gateway {
    pub fn new(
        player_id: impl Into<String>,
        game_type: GameType,
        commands: mpsc::UnboundedSender<GatewayCommand>,
    ) -> Self {
        Self {
            player_id: player_id.into(),
            game_type,
            commands,
        }
    }

    pub fn player_id(&self) -> &str {
        &self.player_id
    }

    pub async fn join_room(&self, room_id: &str) -> Result<()> {
        self.submit(Intent::join_room(room_id, &self.player_id)?).await
    }

    pub async fn leave_room(&self, room_id: &str) -> Result<()> {
        self.submit(Intent::leave_room(room_id, &self.player_id)?).await
    }

    pub async fn join_game(&self, room_id: &str, position: u32) -> Result<()> {
        self.submit(Intent::join_game(room_id, &self.player_id, position)?).await
    }

    pub async fn leave_game(&self, room_id: &str) -> Result<()> {
        self.submit(Intent::leave_game(room_id, &self.player_id)?).await
    }

    /// Send a game-specific action for the configured game type.
    pub async fn send_game_action<T: Serialize>(&self, room_id: &str, action: &T) -> Result<()> {
        let data = serde_json::to_value(action)
            .map_err(|error| ClientError::decode(MessageType::GameAction.as_str(), error))?;
        let intent = Intent::game_action(room_id, &self.player_id, self.game_type, data)?;
        self.submit(intent).await
    }

    /// Hand an intent to the loop and wait until it has been checked and
    /// queued.
    pub async fn submit(&self, intent: Intent) -> Result<()> {
        let (response, reply) = oneshot::channel();
        self.commands
            .send(GatewayCommand::Submit { intent, response })
            .map_err(|_| ClientError::transport("connection loop has stopped"))?;
        reply
            .await
            .map_err(|_| ClientError::transport("connection loop has stopped"))?
    }
}
