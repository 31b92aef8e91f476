//! Automatic play: pick an action whenever the server waits on us.

use crate::holdem::{HoldemAction, HoldemPlayer, HoldemState, HoldemUpdate};
use log::{debug, info, warn};
use rtrp::{Gateway, Phase, Session, Timestamp};
use tokio::sync::watch;

/// Chooses what to do on our turn.
pub trait DecisionPolicy: Send + 'static {
    /// `None` leaves the turn to the player.
    fn decide(&mut self, me: &HoldemPlayer, state: &HoldemState) -> Option<HoldemAction>;
}

/// Never raises. Checks when nothing is owed, calls otherwise, and goes
/// all-in only when a call would take the whole stack.
#[derive(Clone, Copy, Debug, Default)]
pub struct PassivePolicy;

impl DecisionPolicy for PassivePolicy {
    fn decide(&mut self, me: &HoldemPlayer, state: &HoldemState) -> Option<HoldemAction> {
        let to_call = state.to_call(&me.id);
        let action = match to_call {
            0 => HoldemAction::Check,
            owed if owed >= me.balance => HoldemAction::AllIn,
            _ => HoldemAction::Call,
        };
        Some(action)
    }
}

/// Our turn as seen in one snapshot or game update.
struct Turn {
    room_id: String,
    me: HoldemPlayer,
    state: HoldemState,
}

impl Turn {
    fn find(session: &Session, room_id: &str, state: HoldemState) -> Option<Self> {
        if !state.is_turn_of(session.player_id()) {
            return None;
        }
        let me = state.player(session.player_id())?.clone();
        Some(Self {
            room_id: room_id.to_string(),
            me,
            state,
        })
    }
}

/// Turn carried by the session's room snapshot.
fn snapshot_turn(session: &Session) -> Option<Turn> {
    if session.phase() != Phase::InGame {
        return None;
    }
    let room = session.current_room_state()?;
    let state = match HoldemState::from_snapshot(room) {
        Ok(state) => state?,
        Err(error) => {
            debug!("Ignoring undecodable game state in {}: {error}", room.room_id);
            return None;
        }
    };
    Turn::find(session, &room.room_id, state)
}

/// Turn carried by a `game_holdem_action` update for the session's room.
fn update_turn(session: &Session, update: &HoldemUpdate) -> Option<Turn> {
    if session.phase() != Phase::InGame {
        return None;
    }
    let room_id = session.current_room_id()?;
    if !update.room_id.is_empty() && update.room_id != room_id {
        return None;
    }
    Turn::find(session, room_id, update.state.clone()?)
}

/// Handler for `game_holdem_action` that hands each update to [`run`].
pub fn forward_updates(
    updates: watch::Sender<Option<HoldemUpdate>>,
) -> impl FnMut(&Session, HoldemUpdate, Timestamp) -> rtrp::Result<()> + Send + 'static {
    move |_, update, _| {
        debug!("Hold'em update {} in room {}", update.kind, update.room_id);
        updates.send_replace(Some(update));
        Ok(())
    }
}

enum Source {
    Snapshot,
    Update,
}

/// Act on every turn until the session or the update feed goes away.
///
/// Turns come from room snapshots and from `game_holdem_action` updates,
/// whichever arrived last. A state is acted on at most once.
pub async fn run<P: DecisionPolicy>(
    mut session: watch::Receiver<Session>,
    mut updates: watch::Receiver<Option<HoldemUpdate>>,
    gateway: Gateway,
    mut policy: P,
) {
    let mut source = Source::Snapshot;
    let mut seen_snapshot: Option<Option<Timestamp>> = None;
    let mut acted_on: Option<HoldemState> = None;

    loop {
        let turn = {
            let current = session.borrow_and_update();
            match source {
                Source::Snapshot => {
                    let at = current.last_applied_timestamp();
                    if seen_snapshot == Some(at) {
                        None
                    } else {
                        seen_snapshot = Some(at);
                        snapshot_turn(&current)
                    }
                }
                Source::Update => updates
                    .borrow_and_update()
                    .as_ref()
                    .and_then(|update| update_turn(&current, update)),
            }
        };

        if let Some(turn) = turn.filter(|turn| acted_on.as_ref() != Some(&turn.state)) {
            acted_on = Some(turn.state.clone());
            if let Some(action) = policy.decide(&turn.me, &turn.state) {
                info!("Playing {action} in {}", turn.room_id);
                if let Err(error) = gateway.send_game_action(&turn.room_id, &action).await {
                    warn!("Could not play {action}: {error}");
                    if error.is_fatal() {
                        return;
                    }
                }
            }
        }

        tokio::select! {
            changed = session.changed() => {
                if changed.is_err() {
                    debug!("Session closed, policy stopping");
                    return;
                }
                source = Source::Snapshot;
            }
            changed = updates.changed() => {
                if changed.is_err() {
                    debug!("Game updates closed, policy stopping");
                    return;
                }
                source = Source::Update;
            }
        }
    }
}
