//! Typed view of a Hold'em room's game state and the actions a player can take.
//!
//! The room snapshot carries the game state as opaque JSON; this module
//! decodes it when the room hosts Hold'em.

use rtrp::{GameType, RoomSnapshot};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Betting round.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum Round {
    #[default]
    PreFlop,
    Flop,
    Turn,
    River,
    Showdown,
}

impl<'de> Deserialize<'de> for Round {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum RawRound {
            Index(u8),
            Name(String),
        }

        let round = match RawRound::deserialize(deserializer)? {
            RawRound::Index(0) => Self::PreFlop,
            RawRound::Index(1) => Self::Flop,
            RawRound::Index(2) => Self::Turn,
            RawRound::Index(3) => Self::River,
            RawRound::Index(4) => Self::Showdown,
            RawRound::Name(name) => match name.to_ascii_lowercase().replace(['_', '-'], "").as_str() {
                "preflop" => Self::PreFlop,
                "flop" => Self::Flop,
                "turn" => Self::Turn,
                "river" => Self::River,
                "showdown" => Self::Showdown,
                _ => return Err(serde::de::Error::custom(format!("unknown round '{name}'"))),
            },
            RawRound::Index(other) => {
                return Err(serde::de::Error::custom(format!("unknown round {other}")));
            }
        };
        Ok(round)
    }
}

impl fmt::Display for Round {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let repr = match self {
            Self::PreFlop => "pre-flop",
            Self::Flop => "flop",
            Self::Turn => "turn",
            Self::River => "river",
            Self::Showdown => "showdown",
        };
        write!(f, "{repr}")
    }
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub struct Card {
    #[serde(default)]
    pub suit: String,
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub hidden: bool,
}

impl fmt::Display for Card {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.hidden {
            write!(f, "??")
        } else {
            write!(f, "{}{}", self.value, self.suit)
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct HoldemPlayer {
    pub id: String,
    pub name: String,
    pub position: u32,
    pub balance: i64,
    /// Chips put in during the current round.
    pub bet: i64,
    pub hand: Vec<Card>,
    pub is_folded: bool,
    pub is_all_in: bool,
    pub is_dealer: bool,
    pub is_small_blind: bool,
    pub is_big_blind: bool,
    pub is_current_turn: bool,
}

impl HoldemPlayer {
    pub fn can_act(&self) -> bool {
        !self.is_folded && !self.is_all_in
    }
}

#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct HoldemState {
    pub players: Vec<HoldemPlayer>,
    pub community_cards: Vec<Card>,
    pub pot: i64,
    pub current_bet: i64,
    pub current_round: Round,
}

impl HoldemState {
    /// Decode the game state of a Hold'em room. `None` when the room hosts
    /// another game or no game state has been sent yet.
    pub fn from_snapshot(snapshot: &RoomSnapshot) -> Result<Option<Self>, serde_json::Error> {
        if snapshot.game_type != GameType::Holdem || snapshot.game_state.is_null() {
            return Ok(None);
        }
        serde_json::from_value(snapshot.game_state.clone()).map(Some)
    }

    pub fn player(&self, player_id: &str) -> Option<&HoldemPlayer> {
        self.players.iter().find(|player| player.id == player_id)
    }

    /// Whether the server is waiting on `player_id`.
    pub fn is_turn_of(&self, player_id: &str) -> bool {
        self.player(player_id)
            .is_some_and(|player| player.is_current_turn && player.can_act())
    }

    /// Chips `player_id` must add to stay in the hand.
    pub fn to_call(&self, player_id: &str) -> i64 {
        self.player(player_id)
            .map_or(self.current_bet, |player| self.current_bet - player.bet)
            .max(0)
    }
}

impl fmt::Display for HoldemState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let board: Vec<String> = self.community_cards.iter().map(Card::to_string).collect();
        write!(
            f,
            "{} | pot {} | bet {} | board [{}]",
            self.current_round,
            self.pot,
            self.current_bet,
            board.join(" ")
        )
    }
}

/// Payload of `game_holdem_action`: the game state after a game event such
/// as a round start or another player's action.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct HoldemUpdate {
    /// Empty on updates addressed to a single player.
    pub room_id: String,
    pub state: Option<HoldemState>,
    /// Event code.
    #[serde(rename = "type")]
    pub kind: u32,
    pub data: serde_json::Value,
}

/// Payload of a Hold'em `game_action`, e.g. `{"action": "raise", "amount": 40}`.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum HoldemAction {
    Fold,
    Check,
    Call,
    Bet { amount: i64 },
    Raise { amount: i64 },
    AllIn,
}

impl fmt::Display for HoldemAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fold => write!(f, "fold"),
            Self::Check => write!(f, "check"),
            Self::Call => write!(f, "call"),
            Self::Bet { amount } => write!(f, "bet {amount}"),
            Self::Raise { amount } => write!(f, "raise {amount}"),
            Self::AllIn => write!(f, "all-in"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn snapshot(game_state: serde_json::Value) -> RoomSnapshot {
        let mut snapshot = RoomSnapshot::new("R1");
        snapshot.game_state = game_state;
        snapshot
    }

    #[test]
    fn test_decodes_game_state() {
        let state = HoldemState::from_snapshot(&snapshot(json!({
            "players": [
                {"id": "P1", "name": "ann", "position": 0, "balance": 900, "bet": 20, "is_current_turn": true},
                {"id": "P2", "name": "bob", "position": 1, "balance": 480, "bet": 40}
            ],
            "community_cards": [{"suit": "h", "value": "A"}, {"suit": "s", "value": "10"}, {"suit": "", "value": "", "hidden": true}],
            "pot": 60,
            "current_bet": 40,
            "current_round": 1
        })))
        .unwrap()
        .unwrap();

        assert_eq!(state.current_round, Round::Flop);
        assert!(state.is_turn_of("P1"));
        assert!(!state.is_turn_of("P2"));
        assert_eq!(state.to_call("P1"), 20);
        assert_eq!(state.to_call("P2"), 0);
        assert_eq!(state.to_string(), "flop | pot 60 | bet 40 | board [Ah 10s ??]");
    }

    #[test]
    fn test_round_by_name() {
        let round: Round = serde_json::from_value(json!("PreFlop")).unwrap();
        assert_eq!(round, Round::PreFlop);
        let round: Round = serde_json::from_value(json!("river")).unwrap();
        assert_eq!(round, Round::River);
        assert!(serde_json::from_value::<Round>(json!(9)).is_err());
    }

    #[test]
    fn test_no_state_for_other_games() {
        let mut other = snapshot(json!({"players": []}));
        other.game_type = GameType::Other(2);
        assert_eq!(HoldemState::from_snapshot(&other).unwrap(), None);
        assert_eq!(HoldemState::from_snapshot(&snapshot(serde_json::Value::Null)).unwrap(), None);
    }

    #[test]
    fn test_folded_player_never_has_the_turn() {
        let state = HoldemState {
            players: vec![HoldemPlayer {
                id: "P1".to_string(),
                is_current_turn: true,
                is_folded: true,
                ..HoldemPlayer::default()
            }],
            ..HoldemState::default()
        };
        assert!(!state.is_turn_of("P1"));
    }

    #[test]
    fn test_decodes_update() {
        let update: HoldemUpdate = serde_json::from_value(json!({
            "room_id": "R1",
            "state": {
                "players": [{"id": "P1", "balance": 500, "is_current_turn": true}],
                "current_bet": 40,
                "current_round": "preflop"
            },
            "type": 3,
            "data": {"player_id": "P2", "action": "raise"}
        }))
        .unwrap();
        assert_eq!(update.kind, 3);
        let state = update.state.unwrap();
        assert!(state.is_turn_of("P1"));
        assert_eq!(state.to_call("P1"), 40);

        let private: HoldemUpdate =
            serde_json::from_value(json!({"state": null, "type": 0})).unwrap();
        assert!(private.room_id.is_empty());
        assert_eq!(private.state, None);
    }

    #[test]
    fn test_action_payloads() {
        assert_eq!(
            serde_json::to_value(HoldemAction::Raise { amount: 40 }).unwrap(),
            json!({"action": "raise", "amount": 40})
        );
        assert_eq!(
            serde_json::to_value(HoldemAction::AllIn).unwrap(),
            json!({"action": "all_in"})
        );
    }
}
