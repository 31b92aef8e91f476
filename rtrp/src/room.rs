//! Room and game membership tracking.

/// Room snapshots and the player records inside them.
pub mod entities;

/// Session phases and the machine that moves between them.
pub mod state_machine;

pub use entities::{GameType, PlayerSummary, RoomSnapshot, SeatStatus};
pub use state_machine::{ErrorObserver, Phase, Session, StateMachine};
