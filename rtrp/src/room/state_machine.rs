//! Session state machine.
//!
//! The machine owns the local view of room and game membership. It is only
//! ever touched from the connection loop: inbound envelopes arrive through
//! the handlers installed by [`StateMachine::register_handlers`] and local
//! intents through [`StateMachine::submit`], so every transition happens in
//! one total order. Readers elsewhere get copies of the [`Session`] through a
//! watch channel.

use log::{debug, info, warn};
use serde_json::Value;
use std::{
    fmt,
    panic::{self, AssertUnwindSafe},
};
use tokio::sync::watch;

use super::entities::{RoomSnapshot, SeatStatus};
use crate::{
    gateway::Intent,
    net::{
        connection::Outbound,
        dispatcher::Dispatcher,
        errors::{ClientError, Result},
        messages::{ErrorMessage, MessageType, Timestamp},
    },
};

/// Membership phase of the session.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub enum Phase {
    #[default]
    NoRoom,
    JoiningRoom,
    InRoom,
    JoiningGame,
    InGame,
    LeavingGame,
    LeavingRoom,
}

impl Phase {
    /// Whether the phase waits on a server reply.
    pub fn is_pending(self) -> bool {
        matches!(
            self,
            Self::JoiningRoom | Self::JoiningGame | Self::LeavingGame | Self::LeavingRoom
        )
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let repr = match self {
            Self::NoRoom => "not in a room",
            Self::JoiningRoom => "joining a room",
            Self::InRoom => "in a room",
            Self::JoiningGame => "joining a game",
            Self::InGame => "in a game",
            Self::LeavingGame => "leaving a game",
            Self::LeavingRoom => "leaving a room",
        };
        write!(f, "{repr}")
    }
}

/// Local view of the player's membership.
#[derive(Clone, Debug, PartialEq)]
pub struct Session {
    player_id: String,
    token: String,
    phase: Phase,
    room: Option<RoomSnapshot>,
    /// Room of the most recent join request, until the join completes.
    pending_room: Option<String>,
    /// Phase a pending room leave was issued from.
    leaving_from: Option<Phase>,
    /// Set by a game leave; auto-join stays off until the next room join.
    stood_up: bool,
    last_applied: Option<Timestamp>,
}

impl Session {
    pub fn new(player_id: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            player_id: player_id.into(),
            token: token.into(),
            phase: Phase::NoRoom,
            room: None,
            pending_room: None,
            leaving_from: None,
            stood_up: false,
            last_applied: None,
        }
    }

    pub fn player_id(&self) -> &str {
        &self.player_id
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn current_room_id(&self) -> Option<&str> {
        self.room.as_ref().map(|room| room.room_id.as_str())
    }

    /// The most recently applied room snapshot.
    pub fn current_room_state(&self) -> Option<&RoomSnapshot> {
        self.room.as_ref()
    }

    pub fn last_applied_timestamp(&self) -> Option<Timestamp> {
        self.last_applied
    }

    pub fn seat(&self) -> SeatStatus {
        self.room
            .as_ref()
            .map_or(SeatStatus::Unseated, |room| room.seat_of(&self.player_id))
    }

    pub fn is_seated(&self) -> bool {
        matches!(self.seat(), SeatStatus::Seated(_))
    }

    fn accepts(&self, tag: MessageType, room_id: &str) -> bool {
        match self.phase {
            Phase::NoRoom => {
                tag == MessageType::RoomJoinOk && self.pending_room.as_deref() == Some(room_id)
            }
            Phase::JoiningRoom => self.pending_room.as_deref() == Some(room_id),
            _ => self.current_room_id() == Some(room_id),
        }
    }

    fn is_stale(&self, timestamp: Timestamp) -> bool {
        self.last_applied.is_some_and(|last| timestamp <= last)
    }
}

/// Callback told about every protocol or transport error.
pub type ErrorObserver = Box<dyn FnMut(&ClientError) + Send>;

pub struct StateMachine {
    session: Session,
    auto_join: bool,
    outbound: Outbound,
    publisher: watch::Sender<Session>,
    observers: Vec<ErrorObserver>,
}

impl StateMachine {
    /// Create a machine that starts from the session currently held by
    /// `publisher` and publishes every change back to it.
    pub fn new(outbound: Outbound, publisher: watch::Sender<Session>, auto_join: bool) -> Self {
        let session = publisher.borrow().clone();
        Self {
            session,
            auto_join,
            outbound,
            publisher,
            observers: Vec::new(),
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn add_error_observer(&mut self, observer: ErrorObserver) {
        self.observers.push(observer);
    }

    /// Install the session-tracking handlers. They must be registered before
    /// any other handler so that later handlers see the updated session.
    pub fn register_handlers(dispatcher: &mut Dispatcher<Self>) {
        for tag in MessageType::ALL {
            if tag.carries_snapshot() {
                dispatcher.register(
                    tag,
                    move |machine: &mut Self, snapshot: RoomSnapshot, timestamp| {
                        machine.apply_snapshot(tag, snapshot, timestamp);
                        Ok(())
                    },
                );
            }
        }
        dispatcher
            .register(
                MessageType::RoomLeaveOk,
                |machine: &mut Self, ack: Value, timestamp| {
                    machine.apply_leave_ack(&ack, timestamp);
                    Ok(())
                },
            )
            .register(
                MessageType::Error,
                |machine: &mut Self, error: ErrorMessage, _| {
                    machine.apply_error(error);
                    Ok(())
                },
            );
    }

    /// Check an intent against the current phase, send it, and move to the
    /// pending phase. Nothing changes when the check or the send fails.
    pub fn submit(&mut self, intent: Intent) -> Result<()> {
        self.check(&intent)?;
        let envelope = intent.to_envelope(self.outbound.stamp())?;
        self.outbound.send(&envelope)?;
        debug!(
            "Player {} sent {} for room {}",
            self.session.player_id,
            intent.name(),
            intent.room_id()
        );

        let next = match &intent {
            Intent::JoinRoom(join) => {
                self.session.pending_room = Some(join.room_id.clone());
                self.session.stood_up = false;
                Phase::JoiningRoom
            }
            Intent::LeaveRoom(_) => {
                if self.session.phase != Phase::LeavingRoom {
                    self.session.leaving_from = Some(self.session.phase);
                }
                Phase::LeavingRoom
            }
            Intent::JoinGame(_) => {
                self.session.stood_up = false;
                Phase::JoiningGame
            }
            Intent::LeaveGame(_) => {
                self.session.stood_up = true;
                Phase::LeavingGame
            }
            Intent::GameAction(_) => self.session.phase,
        };
        self.transition(next);
        self.publish();
        Ok(())
    }

    fn check(&self, intent: &Intent) -> Result<()> {
        let phase = self.session.phase;
        let allowed = match intent {
            Intent::JoinRoom(_) => matches!(phase, Phase::NoRoom | Phase::JoiningRoom),
            Intent::LeaveRoom(_) => {
                matches!(phase, Phase::InRoom | Phase::InGame | Phase::LeavingRoom)
            }
            Intent::JoinGame(_) => matches!(phase, Phase::InRoom | Phase::JoiningGame),
            Intent::LeaveGame(_) => matches!(phase, Phase::InGame | Phase::LeavingGame),
            Intent::GameAction(_) => phase == Phase::InGame,
        };
        if !allowed {
            return Err(ClientError::State {
                intent: intent.name(),
                phase,
            });
        }

        if !matches!(intent, Intent::JoinRoom(_))
            && self.session.current_room_id() != Some(intent.room_id())
        {
            return Err(ClientError::Validation(format!(
                "{} targets room {} but the session is in room {}",
                intent.name(),
                intent.room_id(),
                self.session.current_room_id().unwrap_or("none"),
            )));
        }
        Ok(())
    }

    /// Apply a room snapshot if it belongs to our room and is newer than
    /// the last one applied. Returns whether it was applied.
    pub fn apply_snapshot(
        &mut self,
        tag: MessageType,
        snapshot: RoomSnapshot,
        timestamp: Timestamp,
    ) -> bool {
        if !self.session.accepts(tag, &snapshot.room_id) {
            debug!(
                "Ignoring {tag} for room {} while {}",
                snapshot.room_id, self.session.phase
            );
            return false;
        }
        if self.session.is_stale(timestamp) {
            debug!(
                "Discarding stale {tag} for room {} ({timestamp} is not after {})",
                snapshot.room_id,
                self.session.last_applied.unwrap_or_default()
            );
            return false;
        }

        let present = snapshot.has_player(&self.session.player_id);
        let seat = snapshot.seat_of(&self.session.player_id);
        let seated = matches!(seat, SeatStatus::Seated(_));
        self.session.last_applied = Some(timestamp);
        self.session.room = Some(snapshot);

        let phase = self.session.phase;
        if phase == Phase::LeavingRoom && tag == MessageType::RoomLeave && !present {
            self.reset(timestamp);
            return true;
        }

        let next = match (phase, tag) {
            (Phase::NoRoom | Phase::JoiningRoom, MessageType::RoomJoinOk) if seated => {
                Phase::InGame
            }
            (Phase::NoRoom | Phase::JoiningRoom, MessageType::RoomJoinOk) => Phase::InRoom,
            (Phase::JoiningRoom, MessageType::RoomJoin) if present => Phase::InRoom,
            (Phase::InRoom | Phase::JoiningGame, MessageType::GameJoinOk) => Phase::InGame,
            (Phase::JoiningGame, MessageType::GameJoin) if seated => Phase::InGame,
            (Phase::LeavingGame, MessageType::GameLeaveOk) => Phase::InRoom,
            (Phase::LeavingGame, MessageType::GameLeave) if seat == SeatStatus::Unseated => {
                Phase::InRoom
            }
            _ => phase,
        };
        if matches!(phase, Phase::NoRoom | Phase::JoiningRoom) && next != phase {
            self.session.pending_room = None;
        }
        self.transition(next);
        self.publish();

        if self.auto_join && !self.session.stood_up && next == Phase::InRoom && !seated {
            self.join_free_seat();
        }
        true
    }

    /// Handle `room_leave_ok`. Only honoured while leaving; resets the
    /// session to no room.
    pub fn apply_leave_ack(&mut self, ack: &Value, timestamp: Timestamp) {
        if self.session.phase != Phase::LeavingRoom {
            debug!(
                "Ignoring room_leave_ok while {} for player {}",
                self.session.phase, self.session.player_id
            );
            return;
        }
        let acked_room = ack
            .get("room_id")
            .or_else(|| ack.get("roomId"))
            .and_then(Value::as_str);
        if let Some(room_id) = acked_room {
            if self.session.current_room_id() != Some(room_id) {
                debug!("Ignoring room_leave_ok for room {room_id}: not the session's room");
                return;
            }
        }
        self.reset(timestamp);
    }

    /// Handle an `error` envelope: undo the pending transition, if any, and
    /// tell the observers.
    pub fn apply_error(&mut self, error: ErrorMessage) {
        warn!(
            "Server rejected a request from player {} while {}: {error}",
            self.session.player_id, self.session.phase
        );
        let rollback = match self.session.phase {
            Phase::JoiningRoom => {
                self.session.room = None;
                Some(Phase::NoRoom)
            }
            Phase::JoiningGame => Some(Phase::InRoom),
            Phase::LeavingGame => {
                self.session.stood_up = false;
                Some(Phase::InGame)
            }
            Phase::LeavingRoom => {
                Some(self.session.leaving_from.take().unwrap_or(Phase::InRoom))
            }
            _ => None,
        };
        if let Some(previous) = rollback {
            self.transition(previous);
            self.publish();
        }
        self.notify(&ClientError::Protocol(error));
    }

    /// Called once when the connection loop ends.
    pub fn on_disconnect(&mut self, error: Option<ClientError>) {
        match error {
            Some(error) => {
                warn!(
                    "Connection for player {} closed with error: {error}",
                    self.session.player_id
                );
                self.notify(&error);
            }
            None => info!("Connection for player {} closed", self.session.player_id),
        }
    }

    pub(crate) fn notify(&mut self, error: &ClientError) {
        for observer in &mut self.observers {
            if panic::catch_unwind(AssertUnwindSafe(|| observer(error))).is_err() {
                warn!("Error observer panicked while handling: {error}");
            }
        }
    }

    fn join_free_seat(&mut self) {
        let Some(room) = self.session.room.as_ref() else {
            return;
        };
        let Some(position) = room.lowest_free_position() else {
            info!("No free game position in room {}", room.room_id);
            return;
        };
        info!(
            "Auto-joining game in room {} at position {position}",
            room.room_id
        );
        let outcome = Intent::join_game(&room.room_id, &self.session.player_id, position)
            .and_then(|intent| self.submit(intent));
        if let Err(error) = outcome {
            warn!("Auto-join failed: {error}");
            self.notify(&error);
        }
    }

    fn reset(&mut self, timestamp: Timestamp) {
        self.session.room = None;
        self.session.pending_room = None;
        self.session.leaving_from = None;
        self.session.stood_up = false;
        let last = self.session.last_applied.map_or(timestamp, |last| last.max(timestamp));
        self.session.last_applied = Some(last);
        self.transition(Phase::NoRoom);
        self.publish();
    }

    fn transition(&mut self, next: Phase) {
        let previous = self.session.phase;
        if previous != next {
            info!("Player {}: {previous} -> {next}", self.session.player_id);
            self.session.phase = next;
        }
    }

    fn publish(&self) {
        self.publisher.send_replace(self.session.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        net::{
            messages::{Envelope, TimestampMode},
            utils,
        },
        room::entities::PlayerSummary,
    };
    use proptest::prelude::*;
    use serde_json::json;
    use std::sync::{Arc, Mutex};
    use tokio::sync::mpsc::UnboundedReceiver;

    const ME: &str = "P1";

    struct Harness {
        machine: StateMachine,
        dispatcher: Dispatcher<StateMachine>,
        session: watch::Receiver<Session>,
        frames: UnboundedReceiver<String>,
        errors: Arc<Mutex<Vec<String>>>,
    }

    impl Harness {
        fn new(auto_join: bool) -> Self {
            let (outbound, frames) = Outbound::channel(TimestampMode::Counter);
            let (publisher, session) = watch::channel(Session::new(ME, "token"));
            let mut machine = StateMachine::new(outbound, publisher, auto_join);
            let errors = Arc::new(Mutex::new(Vec::new()));
            let sink = Arc::clone(&errors);
            machine.add_error_observer(Box::new(move |error| {
                sink.lock().unwrap().push(error.to_string());
            }));
            let mut dispatcher = Dispatcher::new();
            StateMachine::register_handlers(&mut dispatcher);
            Self {
                machine,
                dispatcher,
                session,
                frames,
                errors,
            }
        }

        fn receive(&mut self, tag: MessageType, data: serde_json::Value, timestamp: i64) {
            let envelope = Envelope::new(tag, &data, Timestamp::new(timestamp)).unwrap();
            self.dispatcher
                .dispatch_envelope(&mut self.machine, &envelope);
        }

        fn sent(&mut self) -> Vec<Envelope> {
            let mut sent = Vec::new();
            while let Ok(frame) = self.frames.try_recv() {
                sent.push(utils::decode_frame(&frame).unwrap());
            }
            sent
        }

        fn phase(&self) -> Phase {
            self.machine.session().phase()
        }

        fn join_room(&mut self, room_id: &str, timestamp: i64) {
            self.machine
                .submit(Intent::join_room(room_id, ME).unwrap())
                .unwrap();
            self.receive(
                MessageType::RoomJoinOk,
                json!({"room_id": room_id, "players": [ME], "max_game_players": 6}),
                timestamp,
            );
        }

        fn join_game(&mut self, room_id: &str, position: u32, timestamp: i64) {
            self.machine
                .submit(Intent::join_game(room_id, ME, position).unwrap())
                .unwrap();
            self.receive(
                MessageType::GameJoinOk,
                json!({
                    "room_id": room_id,
                    "players": [{"id": ME, "position": position}],
                    "max_game_players": 6,
                }),
                timestamp,
            );
        }
    }

    #[test]
    fn test_join_room_happy_path() {
        let mut harness = Harness::new(false);
        harness
            .machine
            .submit(Intent::join_room("R1", ME).unwrap())
            .unwrap();
        assert_eq!(harness.phase(), Phase::JoiningRoom);

        let sent = harness.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].tag, "room_join");
        let payload: serde_json::Value = serde_json::from_str(sent[0].payload()).unwrap();
        assert_eq!(payload, json!({"room_id": "R1", "player_id": ME}));

        harness.receive(
            MessageType::RoomJoinOk,
            json!({"room_id": "R1", "players": [ME], "status": "open"}),
            100,
        );
        let session = harness.session.borrow().clone();
        assert_eq!(session.phase(), Phase::InRoom);
        assert_eq!(session.current_room_id(), Some("R1"));
        assert_eq!(session.last_applied_timestamp(), Some(Timestamp::new(100)));
    }

    #[test]
    fn test_stale_broadcast_is_discarded() {
        let mut harness = Harness::new(false);
        harness.join_room("R1", 100);

        harness.receive(
            MessageType::RoomJoin,
            json!({"room_id": "R1", "players": [ME, "P2"]}),
            90,
        );
        let session = harness.machine.session();
        assert_eq!(session.current_room_state().unwrap().players.len(), 1);
        assert_eq!(session.last_applied_timestamp(), Some(Timestamp::new(100)));

        harness.receive(
            MessageType::RoomJoin,
            json!({"room_id": "R1", "players": [ME, "P2"]}),
            100,
        );
        assert_eq!(
            harness.machine.session().current_room_state().unwrap().players.len(),
            1
        );

        harness.receive(
            MessageType::RoomJoin,
            json!({"room_id": "R1", "players": [ME, "P2"]}),
            101,
        );
        assert!(
            harness
                .machine
                .session()
                .current_room_state()
                .unwrap()
                .has_player("P2")
        );
    }

    #[test]
    fn test_other_room_snapshot_is_ignored() {
        let mut harness = Harness::new(false);
        harness.join_room("R1", 100);
        harness.receive(MessageType::RoomJoin, json!({"room_id": "R9"}), 200);
        let session = harness.machine.session();
        assert_eq!(session.current_room_id(), Some("R1"));
        assert_eq!(session.last_applied_timestamp(), Some(Timestamp::new(100)));
    }

    #[test]
    fn test_game_join_without_room_is_rejected() {
        let mut harness = Harness::new(false);
        let error = harness
            .machine
            .submit(Intent::join_game("R1", ME, 0).unwrap())
            .unwrap_err();
        assert!(matches!(
            error,
            ClientError::State {
                phase: Phase::NoRoom,
                ..
            }
        ));
        assert!(harness.sent().is_empty());
        assert_eq!(harness.phase(), Phase::NoRoom);
    }

    #[test]
    fn test_game_action_requires_game() {
        let mut harness = Harness::new(false);
        harness.join_room("R1", 1);
        let action = Intent::game_action("R1", ME, Default::default(), json!({"action": "call"}));
        assert!(matches!(
            harness.machine.submit(action.unwrap()),
            Err(ClientError::State { .. })
        ));

        harness.join_game("R1", 0, 2);
        harness.sent();
        let action = Intent::game_action("R1", ME, Default::default(), json!({"action": "call"}));
        harness.machine.submit(action.unwrap()).unwrap();
        let sent = harness.sent();
        assert_eq!(sent[0].tag, "game_action");
        assert_eq!(harness.phase(), Phase::InGame);
    }

    #[test]
    fn test_intent_for_other_room_is_rejected() {
        let mut harness = Harness::new(false);
        harness.join_room("R1", 1);
        let error = harness
            .machine
            .submit(Intent::join_game("R2", ME, 0).unwrap())
            .unwrap_err();
        assert!(matches!(error, ClientError::Validation(_)));
        assert_eq!(harness.phase(), Phase::InRoom);
    }

    #[test]
    fn test_duplicate_game_join_reports_protocol_error() {
        let mut harness = Harness::new(false);
        harness.join_room("R1", 1);

        for _ in 0..2 {
            harness
                .machine
                .submit(Intent::join_game("R1", ME, 2).unwrap())
                .unwrap();
        }
        assert_eq!(harness.sent().len(), 3);
        assert_eq!(harness.phase(), Phase::JoiningGame);

        harness.receive(
            MessageType::GameJoinOk,
            json!({"room_id": "R1", "players": [{"id": ME, "position": 2}]}),
            2,
        );
        harness.receive(
            MessageType::Error,
            json!({"type": "game_player_already_in", "message": "already seated"}),
            3,
        );
        assert_eq!(harness.phase(), Phase::InGame);
        let errors = harness.errors.lock().unwrap();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("game_player_already_in"));
    }

    #[test]
    fn test_error_rolls_back_pending_join() {
        let mut harness = Harness::new(false);
        harness.join_room("R1", 1);
        harness
            .machine
            .submit(Intent::join_game("R1", ME, 2).unwrap())
            .unwrap();
        harness.receive(
            MessageType::Error,
            json!({"type": "game_position_taken"}),
            2,
        );
        assert_eq!(harness.phase(), Phase::InRoom);

        let error = harness
            .machine
            .submit(Intent::join_room("R2", ME).unwrap())
            .unwrap_err();
        assert!(matches!(error, ClientError::State { .. }));
    }

    #[test]
    fn test_error_rolls_back_room_join() {
        let mut harness = Harness::new(false);
        harness
            .machine
            .submit(Intent::join_room("R1", ME).unwrap())
            .unwrap();
        harness.receive(MessageType::Error, json!({"message": "room closed"}), 1);
        let session = harness.machine.session();
        assert_eq!(session.phase(), Phase::NoRoom);
        assert_eq!(session.current_room_id(), None);
    }

    #[test]
    fn test_late_join_ok_after_rollback_is_honoured() {
        let mut harness = Harness::new(false);
        harness
            .machine
            .submit(Intent::join_room("R1", ME).unwrap())
            .unwrap();
        harness.receive(MessageType::Error, json!({"message": "slow down"}), 1);
        harness.receive(
            MessageType::RoomJoinOk,
            json!({"room_id": "R1", "players": [ME]}),
            2,
        );
        assert_eq!(harness.phase(), Phase::InRoom);
    }

    #[test]
    fn test_leave_room_resets_session() {
        let mut harness = Harness::new(false);
        harness.join_room("R1", 10);
        harness
            .machine
            .submit(Intent::leave_room("R1", ME).unwrap())
            .unwrap();
        assert_eq!(harness.phase(), Phase::LeavingRoom);

        harness.receive(MessageType::RoomLeaveOk, json!({"room_id": "R1"}), 5);
        let session = harness.machine.session();
        assert_eq!(session.phase(), Phase::NoRoom);
        assert_eq!(session.current_room_id(), None);
        assert_eq!(session.last_applied_timestamp(), Some(Timestamp::new(10)));
    }

    #[test]
    fn test_error_returns_leave_to_its_origin() {
        let mut harness = Harness::new(false);
        harness.join_room("R1", 1);
        harness.join_game("R1", 0, 2);
        harness
            .machine
            .submit(Intent::leave_room("R1", ME).unwrap())
            .unwrap();
        harness.receive(MessageType::Error, json!({"message": "hand in progress"}), 3);
        assert_eq!(harness.phase(), Phase::InGame);
    }

    #[test]
    fn test_leave_ack_outside_leaving_is_ignored() {
        let mut harness = Harness::new(false);
        harness.join_room("R1", 10);
        harness.receive(MessageType::RoomLeaveOk, json!({"room_id": "R1"}), 20);
        assert_eq!(harness.phase(), Phase::InRoom);
        assert_eq!(harness.machine.session().current_room_id(), Some("R1"));
    }

    #[test]
    fn test_leave_broadcast_completes_room_leave() {
        let mut harness = Harness::new(false);
        harness.join_room("R1", 10);
        harness
            .machine
            .submit(Intent::leave_room("R1", ME).unwrap())
            .unwrap();
        harness.receive(
            MessageType::RoomLeave,
            json!({"room_id": "R1", "players": ["P2"]}),
            11,
        );
        assert_eq!(harness.phase(), Phase::NoRoom);
        assert_eq!(
            harness.machine.session().last_applied_timestamp(),
            Some(Timestamp::new(11))
        );
    }

    #[test]
    fn test_leave_game_cycle() {
        let mut harness = Harness::new(false);
        harness.join_room("R1", 1);
        harness.join_game("R1", 3, 2);
        assert!(harness.machine.session().is_seated());

        harness
            .machine
            .submit(Intent::leave_game("R1", ME).unwrap())
            .unwrap();
        assert_eq!(harness.phase(), Phase::LeavingGame);
        harness.receive(
            MessageType::GameLeaveOk,
            json!({"room_id": "R1", "players": [{"id": ME}]}),
            3,
        );
        assert_eq!(harness.phase(), Phase::InRoom);
    }

    #[test]
    fn test_auto_join_takes_lowest_free_position() {
        let mut harness = Harness::new(true);
        harness
            .machine
            .submit(Intent::join_room("R1", ME).unwrap())
            .unwrap();
        harness.receive(
            MessageType::RoomJoinOk,
            json!({
                "room_id": "R1",
                "players": [ME, {"id": "P2", "position": 0}],
                "max_game_players": 4,
            }),
            1,
        );
        assert_eq!(harness.phase(), Phase::JoiningGame);
        let sent = harness.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[1].tag, "game_join");
        let payload: serde_json::Value = serde_json::from_str(sent[1].payload()).unwrap();
        assert_eq!(payload["position"], 1);
    }

    #[test]
    fn test_auto_join_skips_when_seated() {
        let mut harness = Harness::new(true);
        harness
            .machine
            .submit(Intent::join_room("R1", ME).unwrap())
            .unwrap();
        harness.receive(
            MessageType::RoomJoinOk,
            json!({
                "room_id": "R1",
                "players": [{"id": ME, "position": 1}],
                "max_game_players": 4,
            }),
            1,
        );
        assert_eq!(harness.phase(), Phase::InGame);
        assert_eq!(harness.sent().len(), 1);
    }

    #[test]
    fn test_auto_join_with_full_game_stays_in_room() {
        let mut harness = Harness::new(true);
        harness
            .machine
            .submit(Intent::join_room("R1", ME).unwrap())
            .unwrap();
        harness.receive(
            MessageType::RoomJoinOk,
            json!({
                "room_id": "R1",
                "players": [ME, {"id": "P2", "position": 0}],
                "max_game_players": 1,
            }),
            1,
        );
        assert_eq!(harness.phase(), Phase::InRoom);
        assert_eq!(harness.sent().len(), 1);
    }

    #[test]
    fn test_auto_join_retries_after_rejected_seat() {
        let mut harness = Harness::new(true);
        harness
            .machine
            .submit(Intent::join_room("R1", ME).unwrap())
            .unwrap();
        harness.receive(
            MessageType::RoomJoinOk,
            json!({
                "room_id": "R1",
                "players": [ME, {"id": "P2", "position": 0}],
                "max_game_players": 4,
            }),
            1,
        );
        assert_eq!(harness.sent().len(), 2);

        harness.receive(
            MessageType::Error,
            json!({"type": "game_position_taken"}),
            2,
        );
        assert_eq!(harness.phase(), Phase::InRoom);
        assert!(harness.sent().is_empty());

        harness.receive(
            MessageType::GameJoin,
            json!({
                "room_id": "R1",
                "players": [ME, {"id": "P2", "position": 0}, {"id": "P3", "position": 1}],
                "max_game_players": 4,
            }),
            3,
        );
        assert_eq!(harness.phase(), Phase::JoiningGame);
        let sent = harness.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].tag, "game_join");
        let payload: serde_json::Value = serde_json::from_str(sent[0].payload()).unwrap();
        assert_eq!(payload["position"], 2);
    }

    #[test]
    fn test_game_leave_disables_auto_join_until_next_room() {
        let mut harness = Harness::new(true);
        harness.join_room("R1", 1);
        assert_eq!(harness.sent().len(), 2);
        harness.receive(
            MessageType::GameJoinOk,
            json!({"room_id": "R1", "players": [{"id": ME, "position": 0}]}),
            2,
        );
        assert_eq!(harness.phase(), Phase::InGame);

        harness
            .machine
            .submit(Intent::leave_game("R1", ME).unwrap())
            .unwrap();
        harness.receive(
            MessageType::GameLeaveOk,
            json!({"room_id": "R1", "players": [ME], "max_game_players": 6}),
            3,
        );
        harness.receive(
            MessageType::GameJoin,
            json!({
                "room_id": "R1",
                "players": [ME, {"id": "P2", "position": 3}],
                "max_game_players": 6,
            }),
            4,
        );
        assert_eq!(harness.phase(), Phase::InRoom);
        assert_eq!(harness.sent().len(), 1);

        harness
            .machine
            .submit(Intent::leave_room("R1", ME).unwrap())
            .unwrap();
        harness.receive(MessageType::RoomLeaveOk, json!({"room_id": "R1"}), 5);
        harness.sent();
        harness.join_room("R1", 6);
        let sent = harness.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[1].tag, "game_join");
    }

    #[test]
    fn test_error_text_field_reaches_observers() {
        let mut harness = Harness::new(false);
        harness.join_room("R1", 1);
        harness
            .machine
            .submit(Intent::join_game("R1", ME, 2).unwrap())
            .unwrap();
        harness.receive(
            MessageType::Error,
            json!({"error": "Failed to process action: not your turn"}),
            2,
        );
        assert_eq!(harness.phase(), Phase::InRoom);
        harness.receive(MessageType::Error, json!("room is closed"), 3);

        let errors = harness.errors.lock().unwrap();
        assert_eq!(errors.len(), 2);
        assert!(errors[0].contains("not your turn"));
        assert!(errors[1].contains("room is closed"));
    }

    #[test]
    fn test_panicking_observer_is_contained() {
        let mut harness = Harness::new(false);
        harness
            .machine
            .add_error_observer(Box::new(|_| panic!("observer exploded")));
        harness.receive(MessageType::Error, json!({"message": "nope"}), 1);
        assert_eq!(harness.errors.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_player_summary_helpers_drive_seat_lookup() {
        let mut snapshot = RoomSnapshot::new("R1");
        snapshot.players.push(PlayerSummary::new(ME).seated_at(4));
        let mut session = Session::new(ME, "t");
        session.room = Some(snapshot);
        assert_eq!(session.seat(), SeatStatus::Seated(4));
    }

    proptest! {
        #[test]
        fn test_applied_timestamps_never_decrease(
            stamps in proptest::collection::vec(-1_000i64..1_000, 1..40)
        ) {
            let mut harness = Harness::new(false);
            harness.join_room("R1", -2_000);
            let mut highest = -2_000i64;
            for stamp in stamps {
                harness.receive(
                    MessageType::RoomJoin,
                    json!({"room_id": "R1", "players": [ME], "min_bet": stamp}),
                    stamp,
                );
                let session = harness.machine.session();
                let applied = session.last_applied_timestamp().unwrap().value();
                prop_assert!(applied >= highest);
                highest = highest.max(stamp);
                prop_assert_eq!(applied, highest);
                prop_assert_eq!(session.current_room_state().unwrap().min_bet, highest);
            }
        }
    }
}
