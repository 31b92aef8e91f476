//! Logging setup and structured event helpers.

use log::{info, warn};
use rtrp::{ClientError, ErrorMessage, RoomSnapshot};

/// Initialize logging.
///
/// Levels come from `RUST_LOG`; without it everything at `info` and above
/// is printed.
///
/// # Example
///
/// ```no_run
/// use rtrp_bot::logging;
///
/// logging::init();
/// log::info!("Bot starting");
/// ```
pub fn init() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_target(false)
        .init();
}

/// Log a room membership event.
///
/// # Example
///
/// ```
/// use rtrp::RoomSnapshot;
/// use rtrp_bot::logging::log_room_event;
///
/// log_room_event("game_join", &RoomSnapshot::new("room-1"));
/// ```
pub fn log_room_event(event: &str, snapshot: &RoomSnapshot) {
    info!(
        "[{event}] room={} players={} seated={} game_status={}",
        snapshot.room_id,
        snapshot.players.len(),
        snapshot.occupied_positions().len(),
        snapshot.game_status
    );
}

/// Log an error reported by the server or the connection.
pub fn log_protocol_error(error: &ClientError) {
    match error {
        ClientError::Protocol(ErrorMessage { code, message, .. }) => {
            warn!("[server_error] code={code} message={message}")
        }
        other if other.is_fatal() => warn!("[connection_lost] {other}"),
        other => warn!("[client_error] {other}"),
    }
}
