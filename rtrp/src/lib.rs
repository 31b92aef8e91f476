//! # rtrp
//!
//! Client for real-time card-room servers that speak JSON envelopes over a
//! WebSocket.
//!
//! ## Architecture
//!
//! - [`net::connection`]: opens the socket and runs the one loop that reads
//!   frames, writes queued frames, and handles local commands
//! - [`net::dispatcher`]: routes each envelope to the handlers registered
//!   for its tag, isolating handler failures from each other
//! - [`room`]: the session state machine, which applies room snapshots in
//!   timestamp order and guards every request by phase
//! - [`gateway`]: typed requests (join/leave room, join/leave game, game
//!   actions) handed to the loop
//!
//! ## Example
//!
//! ```no_run
//! use rtrp::{Client, ClientConfig};
//!
//! # async fn run() -> rtrp::Result<()> {
//! let config = ClientConfig::new("ws://localhost:8080/ws", "player-1", "token")
//!     .with_auto_join(false);
//! let client = Client::connect(config).await?;
//! client.gateway().join_room("room-1").await?;
//! println!("{}", client.session().phase());
//! # Ok(())
//! # }
//! ```

/// Typed room and game requests.
pub mod gateway;
pub use gateway::{Gateway, Intent};

/// Networking components.
pub mod net;
pub use net::{
    client::{Client, ClientBuilder, ClientConfig},
    connection::{ConnectOptions, Connection, ConnectionState, LoopHandler, Outbound, TokenPlacement},
    dispatcher::{DispatchReport, Dispatcher},
    errors::{ClientError, ParseError, Result},
    messages::{self, Envelope, ErrorMessage, MessageType, Timestamp, TimestampMode},
};

/// Room snapshots and session tracking.
pub mod room;
pub use room::{GameType, Phase, PlayerSummary, RoomSnapshot, SeatStatus, Session};
