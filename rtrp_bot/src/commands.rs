use crate::holdem::HoldemAction;
use std::fmt;

pub const HELP: &str = "\
Commands:
  rooms            List rooms for the configured game type
  join ROOM        Join a room
  leave            Leave the current room
  sit POSITION     Take a seat in the room's game
  stand            Leave the game but stay in the room
  fold | check | call | all-in
  bet AMOUNT | raise AMOUNT
  status           Show the session and the table
  help             Show this message
  quit             Disconnect and exit
";

/// A line typed at the prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Rooms,
    JoinRoom(String),
    LeaveRoom,
    Sit(u32),
    Stand,
    Act(HoldemAction),
    Status,
    Help,
    Quit,
}

/// Errors that can occur during command parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// A command that needs an argument was given none.
    MissingArgument(&'static str),
    /// Invalid seat position (not a number).
    InvalidPosition(String),
    /// Invalid bet or raise amount (not a positive number).
    InvalidAmount(String),
    /// Unrecognized command.
    UnrecognizedCommand(String),
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingArgument(usage) => write!(f, "Missing argument. Usage: '{}'", usage),
            Self::InvalidPosition(value) => write!(
                f,
                "Invalid position '{}'. Must be a seat number (e.g., 'sit 2')",
                value
            ),
            Self::InvalidAmount(value) => write!(
                f,
                "Invalid amount '{}'. Must be a positive number (e.g., 'bet 100')",
                value
            ),
            Self::UnrecognizedCommand(cmd) => write!(
                f,
                "Unrecognized command '{}'. Type 'help' to see available commands",
                cmd
            ),
        }
    }
}

impl std::error::Error for ParseError {}

/// Parse a command string into a [`Command`].
///
/// # Examples
///
/// ```
/// use rtrp_bot::commands::{Command, parse_command};
/// use rtrp_bot::holdem::HoldemAction;
///
/// assert_eq!(parse_command("call"), Ok(Command::Act(HoldemAction::Call)));
/// assert_eq!(parse_command("join lobby-1"), Ok(Command::JoinRoom("lobby-1".to_string())));
/// assert_eq!(parse_command("raise 100"), Ok(Command::Act(HoldemAction::Raise { amount: 100 })));
/// ```
pub fn parse_command(input: &str) -> Result<Command, ParseError> {
    let trimmed = input.trim();

    match trimmed {
        "rooms" => return Ok(Command::Rooms),
        "leave" => return Ok(Command::LeaveRoom),
        "stand" => return Ok(Command::Stand),
        "fold" => return Ok(Command::Act(HoldemAction::Fold)),
        "check" => return Ok(Command::Act(HoldemAction::Check)),
        "call" => return Ok(Command::Act(HoldemAction::Call)),
        "all-in" | "allin" => return Ok(Command::Act(HoldemAction::AllIn)),
        "status" => return Ok(Command::Status),
        "help" | "?" => return Ok(Command::Help),
        "quit" | "exit" => return Ok(Command::Quit),
        _ => {}
    }

    let parts: Vec<&str> = trimmed.split_ascii_whitespace().collect();
    match parts.as_slice() {
        ["join", room_id] => Ok(Command::JoinRoom(room_id.to_string())),
        ["join"] => Err(ParseError::MissingArgument("join ROOM")),
        ["sit", position] => position
            .parse()
            .map(Command::Sit)
            .map_err(|_| ParseError::InvalidPosition(position.to_string())),
        ["sit"] => Err(ParseError::MissingArgument("sit POSITION")),
        ["bet", amount] => parse_amount(amount).map(|amount| Command::Act(HoldemAction::Bet { amount })),
        ["bet"] => Err(ParseError::MissingArgument("bet AMOUNT")),
        ["raise", amount] => {
            parse_amount(amount).map(|amount| Command::Act(HoldemAction::Raise { amount }))
        }
        ["raise"] => Err(ParseError::MissingArgument("raise AMOUNT")),
        _ => Err(ParseError::UnrecognizedCommand(trimmed.to_string())),
    }
}

fn parse_amount(value: &str) -> Result<i64, ParseError> {
    match value.parse::<i64>() {
        Ok(amount) if amount > 0 => Ok(amount),
        _ => Err(ParseError::InvalidAmount(value.to_string())),
    }
}
