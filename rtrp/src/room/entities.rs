//! Room snapshot types as the socket service sends them.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::{collections::BTreeSet, fmt, str::FromStr};

use crate::net::errors::ParseError;

/// Game variant hosted by a room. Sent on the wire as a small integer.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq, Serialize)]
#[serde(into = "u16")]
pub enum GameType {
    #[default]
    Holdem,
    Other(u16),
}

impl GameType {
    pub fn id(self) -> u16 {
        self.into()
    }
}

impl From<u16> for GameType {
    fn from(id: u16) -> Self {
        match id {
            1 => Self::Holdem,
            other => Self::Other(other),
        }
    }
}

impl From<GameType> for u16 {
    fn from(game_type: GameType) -> Self {
        match game_type {
            GameType::Holdem => 1,
            GameType::Other(id) => id,
        }
    }
}

impl fmt::Display for GameType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Holdem => write!(f, "holdem"),
            Self::Other(id) => write!(f, "game #{id}"),
        }
    }
}

impl FromStr for GameType {
    type Err = ParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        if value.eq_ignore_ascii_case("holdem") {
            return Ok(Self::Holdem);
        }
        value
            .parse::<u16>()
            .map(Self::from)
            .map_err(|_| ParseError::new("game type", value))
    }
}

impl<'de> Deserialize<'de> for GameType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum RawGameType {
            Id(u16),
            Name(String),
        }

        match RawGameType::deserialize(deserializer)? {
            RawGameType::Id(id) => Ok(Self::from(id)),
            RawGameType::Name(name) => name.parse().map_err(serde::de::Error::custom),
        }
    }
}

/// Game status values the server uses.
pub mod game_status {
    pub const WAITING: &str = "waiting";
    pub const STARTING: &str = "starting";
    pub const STARTED: &str = "started";
    pub const ENDING: &str = "ending";
    pub const END: &str = "end";
}

/// A player as listed in a room snapshot.
///
/// The server sometimes lists bare player ids instead of objects; both
/// decode into this type.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(from = "RawPlayer")]
pub struct PlayerSummary {
    pub id: String,
    pub username: Option<String>,
    pub chips: Option<i64>,
    /// Game seat, when the server includes it.
    pub position: Option<u32>,
}

impl PlayerSummary {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            username: None,
            chips: None,
            position: None,
        }
    }

    #[must_use]
    pub fn seated_at(mut self, position: u32) -> Self {
        self.position = Some(position);
        self
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawPlayer {
    Id(String),
    Record {
        id: String,
        #[serde(default, alias = "name")]
        username: Option<String>,
        #[serde(default, alias = "balance")]
        chips: Option<i64>,
        #[serde(default)]
        position: Option<u32>,
    },
}

impl From<RawPlayer> for PlayerSummary {
    fn from(raw: RawPlayer) -> Self {
        match raw {
            RawPlayer::Id(id) => Self::new(id),
            RawPlayer::Record {
                id,
                username,
                chips,
                position,
            } => Self {
                id,
                username,
                chips,
                position,
            },
        }
    }
}

/// Where a player sits, as far as a snapshot can tell.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SeatStatus {
    Seated(u32),
    Unseated,
    /// The snapshot carries no seat information at all.
    Unknown,
}

/// Full room state carried by join/leave replies and broadcasts.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct RoomSnapshot {
    #[serde(alias = "roomId")]
    pub room_id: String,
    #[serde(default)]
    pub players: Vec<PlayerSummary>,
    #[serde(default, alias = "gameType")]
    pub game_type: GameType,
    #[serde(default, alias = "status", alias = "roomStatus")]
    pub room_status: String,
    #[serde(default, alias = "gameStatus")]
    pub game_status: String,
    #[serde(default, alias = "minBet")]
    pub min_bet: i64,
    #[serde(default, alias = "maxPlayers")]
    pub max_players: u32,
    #[serde(default, alias = "maxGamePlayers")]
    pub max_game_players: u32,
    /// Game-specific state, left for game-aware code to interpret.
    #[serde(default, alias = "gameState")]
    pub game_state: Value,
}

impl RoomSnapshot {
    pub fn new(room_id: impl Into<String>) -> Self {
        Self {
            room_id: room_id.into(),
            players: Vec::new(),
            game_type: GameType::default(),
            room_status: String::new(),
            game_status: String::new(),
            min_bet: 0,
            max_players: 0,
            max_game_players: 0,
            game_state: Value::Null,
        }
    }

    pub fn has_player(&self, player_id: &str) -> bool {
        self.players.iter().any(|player| player.id == player_id)
    }

    /// Seats listed in `gameState.players[]`, as `(player id, position)`.
    fn game_state_seats(&self) -> Option<impl Iterator<Item = (&str, Option<u32>)>> {
        let players = self.game_state.get("players")?.as_array()?;
        Some(players.iter().filter_map(|player| {
            let id = player.get("id")?.as_str()?;
            let position = player
                .get("position")
                .and_then(Value::as_u64)
                .and_then(|position| u32::try_from(position).ok());
            Some((id, position))
        }))
    }

    fn has_seat_info(&self) -> bool {
        self.players.iter().any(|player| player.position.is_some())
            || self.game_state_seats().is_some()
    }

    pub fn seat_of(&self, player_id: &str) -> SeatStatus {
        let listed = self
            .players
            .iter()
            .find(|player| player.id == player_id)
            .and_then(|player| player.position);
        if let Some(position) = listed {
            return SeatStatus::Seated(position);
        }
        let in_game = self.game_state_seats().and_then(|mut seats| {
            seats
                .find(|(id, _)| *id == player_id)
                .and_then(|(_, position)| position)
        });
        match in_game {
            Some(position) => SeatStatus::Seated(position),
            None if self.has_seat_info() => SeatStatus::Unseated,
            None => SeatStatus::Unknown,
        }
    }

    pub fn occupied_positions(&self) -> BTreeSet<u32> {
        let mut occupied: BTreeSet<u32> = self
            .players
            .iter()
            .filter_map(|player| player.position)
            .collect();
        if let Some(seats) = self.game_state_seats() {
            occupied.extend(seats.filter_map(|(_, position)| position));
        }
        occupied
    }

    /// Lowest game position in `[0, max_game_players)` nobody holds.
    pub fn lowest_free_position(&self) -> Option<u32> {
        let occupied = self.occupied_positions();
        (0..self.max_game_players).find(|position| !occupied.contains(position))
    }
}
