//! Client wiring: connection, dispatcher, state machine, and gateway.
//!
//! ```no_run
//! use rtrp::{Client, ClientConfig, MessageType, Session, Timestamp};
//!
//! # async fn run() -> rtrp::Result<()> {
//! let config = ClientConfig::new("ws://localhost:8080/ws", "player-1", "token");
//! let mut client = Client::builder(config)
//!     .on(MessageType::GameAction, |session: &Session, data: serde_json::Value, _: Timestamp| {
//!         println!("{} saw {data}", session.player_id());
//!         Ok(())
//!     })
//!     .on_error(|error| eprintln!("{error}"))
//!     .connect()
//!     .await?;
//! client.gateway().join_room("room-1").await?;
//! client.close().await?;
//! # Ok(())
//! # }
//! ```

use log::{debug, warn};
use serde::de::DeserializeOwned;
use tokio::sync::watch;

use super::{
    connection::{ConnectOptions, Connection, ConnectionState, LoopHandler, TokenPlacement},
    dispatcher::Dispatcher,
    errors::{ClientError, Result},
    messages::{Envelope, MessageType, Timestamp, TimestampMode},
    utils,
};
use crate::{
    gateway::{Gateway, GatewayCommand},
    room::{ErrorObserver, GameType, Session, StateMachine},
};

/// Everything needed to open a session.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    pub ws_url: String,
    pub player_id: String,
    pub token: String,
    pub token_placement: TokenPlacement,
    pub timestamp_mode: TimestampMode,
    /// Take the lowest free game seat as soon as a room join completes.
    /// On by default.
    pub auto_join: bool,
    pub game_type: GameType,
}

impl ClientConfig {
    pub fn new(
        ws_url: impl Into<String>,
        player_id: impl Into<String>,
        token: impl Into<String>,
    ) -> Self {
        Self {
            ws_url: ws_url.into(),
            player_id: player_id.into(),
            token: token.into(),
            token_placement: TokenPlacement::default(),
            timestamp_mode: TimestampMode::default(),
            auto_join: true,
            game_type: GameType::default(),
        }
    }

    #[must_use]
    pub fn with_token_placement(mut self, token_placement: TokenPlacement) -> Self {
        self.token_placement = token_placement;
        self
    }

    #[must_use]
    pub fn with_timestamp_mode(mut self, timestamp_mode: TimestampMode) -> Self {
        self.timestamp_mode = timestamp_mode;
        self
    }

    #[must_use]
    pub fn with_auto_join(mut self, auto_join: bool) -> Self {
        self.auto_join = auto_join;
        self
    }

    #[must_use]
    pub fn with_game_type(mut self, game_type: GameType) -> Self {
        self.game_type = game_type;
        self
    }

    fn connect_options(&self) -> ConnectOptions {
        ConnectOptions {
            url: self.ws_url.clone(),
            token: self.token.clone(),
            token_placement: self.token_placement,
            timestamp_mode: self.timestamp_mode,
        }
    }
}

pub struct ClientBuilder {
    config: ClientConfig,
    dispatcher: Dispatcher<StateMachine>,
    observers: Vec<ErrorObserver>,
}

impl ClientBuilder {
    fn new(config: ClientConfig) -> Self {
        let mut dispatcher = Dispatcher::new();
        StateMachine::register_handlers(&mut dispatcher);
        Self {
            config,
            dispatcher,
            observers: Vec::new(),
        }
    }

    /// Register a handler for `tag`. It runs after the session has been
    /// updated for the same envelope and sees the session read-only.
    #[must_use]
    pub fn on<T, F>(mut self, tag: MessageType, mut handler: F) -> Self
    where
        T: DeserializeOwned,
        F: FnMut(&Session, T, Timestamp) -> Result<()> + Send + 'static,
    {
        self.dispatcher
            .register(tag, move |machine: &mut StateMachine, payload: T, timestamp| {
                handler(machine.session(), payload, timestamp)
            });
        self
    }

    /// Observe protocol errors and the transport error that ends the
    /// connection, if any.
    #[must_use]
    pub fn on_error<F>(mut self, observer: F) -> Self
    where
        F: FnMut(&ClientError) + Send + 'static,
    {
        self.observers.push(Box::new(observer));
        self
    }

    pub async fn connect(self) -> Result<Client> {
        let Self {
            config,
            dispatcher,
            observers,
        } = self;
        let (publisher, session) =
            watch::channel(Session::new(&config.player_id, &config.token));

        let connection = Connection::connect(&config.connect_options(), move |outbound| {
            let mut machine = StateMachine::new(outbound, publisher, config.auto_join);
            for observer in observers {
                machine.add_error_observer(observer);
            }
            Core {
                machine,
                dispatcher,
            }
        })
        .await?;

        let gateway = Gateway::new(
            &config.player_id,
            config.game_type,
            connection.commands(),
        );
        Ok(Client {
            connection,
            gateway,
            session,
        })
    }
}

/// What the connection loop runs.
struct Core {
    machine: StateMachine,
    dispatcher: Dispatcher<StateMachine>,
}

impl LoopHandler for Core {
    type Command = GatewayCommand;

    fn on_frame(&mut self, text: &str) {
        let envelope = match utils::decode_frame(text) {
            Ok(envelope) => envelope,
            Err(error) => {
                warn!("Dropping undecodable frame: {error}");
                return;
            }
        };
        let report = self
            .dispatcher
            .dispatch_envelope(&mut self.machine, &envelope);
        if !report.is_clean() {
            debug!(
                "{} of {} handlers for {} failed",
                report.failures.len(),
                report.attempted(),
                envelope.tag
            );
        }
    }

    fn on_command(&mut self, command: GatewayCommand) {
        match command {
            GatewayCommand::Submit { intent, response } => {
                let outcome = self.machine.submit(intent);
                if response.send(outcome).is_err() {
                    debug!("Intent submitter went away before the answer");
                }
            }
        }
    }

    fn on_close(&mut self, error: Option<ClientError>) {
        self.machine.on_disconnect(error);
    }
}

/// A connected session.
pub struct Client {
    connection: Connection<GatewayCommand>,
    gateway: Gateway,
    session: watch::Receiver<Session>,
}

impl Client {
    pub fn builder(config: ClientConfig) -> ClientBuilder {
        ClientBuilder::new(config)
    }

    /// Connect with no extra handlers.
    pub async fn connect(config: ClientConfig) -> Result<Self> {
        Self::builder(config).connect().await
    }

    pub fn gateway(&self) -> &Gateway {
        &self.gateway
    }

    /// Copy of the latest session.
    pub fn session(&self) -> Session {
        self.session.borrow().clone()
    }

    /// Receiver that sees every published session change.
    pub fn subscribe(&self) -> watch::Receiver<Session> {
        self.session.clone()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// Send a raw envelope, bypassing the session checks.
    pub fn send(&self, envelope: &Envelope) -> Result<()> {
        self.connection.send(envelope)
    }

    pub async fn close(&mut self) -> Result<()> {
        self.connection.close().await
    }

    /// Resolves once the connection has ended.
    pub async fn closed(&self) {
        self.connection.closed().await;
    }
}
