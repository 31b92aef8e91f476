//! Socket lifecycle and the single receive loop.
//!
//! [`Connection::connect`] opens the socket and spawns exactly one task that
//! owns it. That task is the only writer (frames queued through
//! [`Outbound`]), the only reader, and the only place a [`LoopHandler`] runs,
//! so inbound frames and local commands are processed one at a time in the
//! order the loop picks them up.

use futures_util::{SinkExt, StreamExt};
use log::{debug, info, warn};
use std::{fmt, str::FromStr, sync::Arc};
use tokio::{
    net::TcpStream,
    sync::{mpsc, oneshot, watch},
    task::JoinHandle,
};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::{
        Message,
        client::IntoClientRequest,
        handshake::client::Request,
        http::{HeaderValue, header::AUTHORIZATION},
    },
};

use super::{
    errors::{ClientError, ParseError, Result},
    messages::{Envelope, Stamper, Timestamp, TimestampMode},
    utils,
};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Open,
    Closing,
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let repr = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Closing => "closing",
            Self::Closed => "closed",
        };
        write!(f, "{repr}")
    }
}

/// Where the access token goes on the upgrade request.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum TokenPlacement {
    /// `Authorization: Bearer <token>` header.
    #[default]
    Header,
    /// `token=<token>` query parameter.
    Query,
    Both,
}

impl FromStr for TokenPlacement {
    type Err = ParseError;

    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "header" => Ok(Self::Header),
            "query" => Ok(Self::Query),
            "both" => Ok(Self::Both),
            _ => Err(ParseError::new("token placement", value)),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ConnectOptions {
    pub url: String,
    pub token: String,
    pub token_placement: TokenPlacement,
    pub timestamp_mode: TimestampMode,
}

impl ConnectOptions {
    pub fn new(url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            token: token.into(),
            token_placement: TokenPlacement::default(),
            timestamp_mode: TimestampMode::default(),
        }
    }

    /// Build the upgrade request with the token placed as configured.
    pub fn request(&self) -> Result<Request> {
        let url = match self.token_placement {
            TokenPlacement::Header => self.url.clone(),
            TokenPlacement::Query | TokenPlacement::Both => with_token_query(&self.url, &self.token),
        };
        let mut request = url.into_client_request()?;
        if matches!(
            self.token_placement,
            TokenPlacement::Header | TokenPlacement::Both
        ) {
            let bearer = HeaderValue::from_str(&format!("Bearer {}", self.token))
                .map_err(|error| ClientError::transport(format!("invalid token: {error}")))?;
            request.headers_mut().insert(AUTHORIZATION, bearer);
        }
        Ok(request)
    }
}

fn with_token_query(url: &str, token: &str) -> String {
    let separator = if url.contains('?') { '&' } else { '?' };
    format!("{url}{separator}token={}", urlencoding::encode(token))
}

/// Cloneable handle that queues frames for the loop to write.
#[derive(Clone, Debug)]
pub struct Outbound {
    frames: mpsc::UnboundedSender<String>,
    state: watch::Receiver<ConnectionState>,
    stamper: Arc<Stamper>,
}

impl Outbound {
    fn new(
        frames: mpsc::UnboundedSender<String>,
        state: watch::Receiver<ConnectionState>,
        mode: TimestampMode,
    ) -> Self {
        Self {
            frames,
            state,
            stamper: Arc::new(Stamper::new(mode)),
        }
    }

    /// An open handle that is not attached to any socket. Queued frames
    /// land on the returned receiver.
    pub fn channel(mode: TimestampMode) -> (Self, mpsc::UnboundedReceiver<String>) {
        let (frames, receiver) = mpsc::unbounded_channel();
        let (_, state) = watch::channel(ConnectionState::Open);
        (Self::new(frames, state, mode), receiver)
    }

    /// Next timestamp for an outbound envelope.
    pub fn stamp(&self) -> Timestamp {
        self.stamper.next()
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Queue one envelope. Each envelope becomes exactly one frame, so
    /// concurrent senders never interleave.
    pub fn send(&self, envelope: &Envelope) -> Result<()> {
        let state = self.state();
        if state != ConnectionState::Open {
            return Err(ClientError::Transport(format!("connection is {state}")));
        }
        let frame = utils::encode_frame(envelope)?;
        self.frames
            .send(frame)
            .map_err(|_| ClientError::transport("connection loop has stopped"))
    }
}

/// Code the receive loop runs for every inbound frame and local command.
pub trait LoopHandler: Send + 'static {
    type Command: Send + 'static;

    fn on_frame(&mut self, text: &str);

    fn on_command(&mut self, command: Self::Command);

    /// Called exactly once, after the socket is released. `error` is set
    /// when the loop ended on a transport failure.
    fn on_close(&mut self, error: Option<ClientError>);
}

pub struct Connection<C> {
    outbound: Outbound,
    commands: mpsc::UnboundedSender<C>,
    state: watch::Receiver<ConnectionState>,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl<C: Send + 'static> Connection<C> {
    /// Open the socket and start the receive loop. `make_handler` gets the
    /// outbound handle so the handler can send from inside the loop.
    pub async fn connect<H, F>(options: &ConnectOptions, make_handler: F) -> Result<Self>
    where
        H: LoopHandler<Command = C>,
        F: FnOnce(Outbound) -> H,
    {
        let (state_tx, state) = watch::channel(ConnectionState::Connecting);
        let request = options.request()?;
        debug!("Connecting to {}", options.url);
        let socket = match connect_async(request).await {
            Ok((socket, _)) => socket,
            Err(error) => {
                state_tx.send_replace(ConnectionState::Closed);
                warn!("Failed to connect to {}: {error}", options.url);
                return Err(error.into());
            }
        };
        state_tx.send_replace(ConnectionState::Open);
        info!("Connected to {}", options.url);

        let (frames_tx, frames) = mpsc::unbounded_channel();
        let (commands_tx, commands) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown) = oneshot::channel();
        let outbound = Outbound::new(frames_tx, state.clone(), options.timestamp_mode);
        let handler = make_handler(outbound.clone());

        let task = tokio::spawn(run_loop(
            socket,
            handler,
            LoopInputs {
                frames,
                commands,
                shutdown,
            },
            state_tx,
        ));

        Ok(Self {
            outbound,
            commands: commands_tx,
            state,
            shutdown: Some(shutdown_tx),
            task: Some(task),
        })
    }

    pub fn outbound(&self) -> Outbound {
        self.outbound.clone()
    }

    /// Sender for commands the loop hands to [`LoopHandler::on_command`].
    pub fn commands(&self) -> mpsc::UnboundedSender<C> {
        self.commands.clone()
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn send(&self, envelope: &Envelope) -> Result<()> {
        self.outbound.send(envelope)
    }

    /// Stop the loop, release the socket, and wait for the loop to finish.
    /// Calling it again is a no-op.
    pub async fn close(&mut self) -> Result<()> {
        if let Some(shutdown) = self.shutdown.take() {
            // The loop may already be gone after a transport failure.
            let _ = shutdown.send(());
        }
        if let Some(task) = self.task.take() {
            task.await.map_err(ClientError::transport)?;
        }
        Ok(())
    }

    /// Resolves once the loop has ended, for whatever reason.
    pub async fn closed(&self) {
        let mut state = self.state.clone();
        let _ = state
            .wait_for(|state| *state == ConnectionState::Closed)
            .await;
    }
}

impl<C> Drop for Connection<C> {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

struct LoopInputs<C> {
    frames: mpsc::UnboundedReceiver<String>,
    commands: mpsc::UnboundedReceiver<C>,
    shutdown: oneshot::Receiver<()>,
}

enum Exit {
    Requested,
    Remote,
    Failed(ClientError),
}

async fn run_loop<H: LoopHandler>(
    mut socket: Socket,
    mut handler: H,
    mut inputs: LoopInputs<H::Command>,
    state: watch::Sender<ConnectionState>,
) {
    let exit = drive(&mut socket, &mut handler, &mut inputs).await;
    state.send_replace(ConnectionState::Closing);

    inputs.frames.close();
    let mut dropped = 0;
    while inputs.frames.try_recv().is_ok() {
        dropped += 1;
    }
    if dropped > 0 {
        warn!("Dropped {dropped} queued frames on close");
    }

    let error = match exit {
        Exit::Requested | Exit::Remote => {
            if let Err(error) = socket.close(None).await {
                debug!("Close handshake did not complete: {error}");
            }
            None
        }
        Exit::Failed(error) => Some(error),
    };
    drop(socket);
    state.send_replace(ConnectionState::Closed);
    handler.on_close(error);
}

async fn drive<H: LoopHandler>(
    socket: &mut Socket,
    handler: &mut H,
    inputs: &mut LoopInputs<H::Command>,
) -> Exit {
    loop {
        tokio::select! {
            biased;

            _ = &mut inputs.shutdown => {
                debug!("Closing connection on request");
                return Exit::Requested;
            }

            // Inbound frames are read before queued local work.
            incoming = socket.next() => match incoming {
                Some(Ok(Message::Text(text))) => handler.on_frame(text.as_str()),
                Some(Ok(Message::Close(frame))) => {
                    info!("Server closed connection: {frame:?}");
                    return Exit::Remote;
                }
                Some(Ok(_)) => {}
                Some(Err(error)) => {
                    warn!("Connection failed: {error}");
                    return Exit::Failed(error.into());
                }
                None => return Exit::Remote,
            },

            Some(frame) = inputs.frames.recv() => {
                if let Err(error) = socket.send(Message::Text(frame.into())).await {
                    warn!("Failed to write frame: {error}");
                    return Exit::Failed(error.into());
                }
            }

            Some(command) = inputs.commands.recv() => handler.on_command(command),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::messages::MessageType;
    use serde_json::json;
    use std::{sync::OnceLock, time::Duration};
    use tokio::{net::TcpListener, time::timeout};
    use tokio_tungstenite::accept_async;

    /// Handler whose every command queues another one.
    struct Busy {
        again: Arc<OnceLock<mpsc::UnboundedSender<()>>>,
        seen: Option<oneshot::Sender<String>>,
    }

    impl LoopHandler for Busy {
        type Command = ();

        fn on_frame(&mut self, text: &str) {
            if let Some(seen) = self.seen.take() {
                let _ = seen.send(text.to_string());
            }
        }

        fn on_command(&mut self, (): ()) {
            if let Some(again) = self.again.get() {
                let _ = again.send(());
            }
        }

        fn on_close(&mut self, _: Option<ClientError>) {}
    }

    #[test]
    fn test_token_in_header() {
        let options = ConnectOptions::new("ws://localhost:9000/ws", "abc");
        let request = options.request().unwrap();
        assert_eq!(request.headers()[AUTHORIZATION], "Bearer abc");
        assert_eq!(request.uri().query(), None);
    }

    #[test]
    fn test_token_in_query() {
        let mut options = ConnectOptions::new("ws://localhost:9000/ws?v=2", "abc");
        options.token_placement = TokenPlacement::Query;
        let request = options.request().unwrap();
        assert!(!request.headers().contains_key(AUTHORIZATION));
        assert_eq!(request.uri().query(), Some("v=2&token=abc"));
    }

    #[test]
    fn test_token_in_both() {
        let mut options = ConnectOptions::new("ws://localhost:9000/ws", "abc");
        options.token_placement = TokenPlacement::Both;
        let request = options.request().unwrap();
        assert_eq!(request.headers()[AUTHORIZATION], "Bearer abc");
        assert_eq!(request.uri().query(), Some("token=abc"));
    }

    #[test]
    fn test_query_token_is_percent_encoded() {
        let mut options = ConnectOptions::new("ws://localhost:9000/ws", "a+b&c=d#e%f");
        options.token_placement = TokenPlacement::Query;
        let request = options.request().unwrap();
        assert_eq!(request.uri().query(), Some("token=a%2Bb%26c%3Dd%23e%25f"));
    }

    #[test]
    fn test_token_placement_parse() {
        assert_eq!("HEADER".parse::<TokenPlacement>(), Ok(TokenPlacement::Header));
        assert_eq!("both".parse::<TokenPlacement>(), Ok(TokenPlacement::Both));
        assert!("cookie".parse::<TokenPlacement>().is_err());
    }

    #[test]
    fn test_detached_outbound_queues_whole_frames() {
        let (outbound, mut frames) = Outbound::channel(TimestampMode::Counter);
        let envelope = Envelope::new(
            MessageType::RoomJoin,
            &json!({"room_id": "R1"}),
            outbound.stamp(),
        )
        .unwrap();
        outbound.send(&envelope).unwrap();
        let frame = frames.try_recv().unwrap();
        assert!(frame.contains(r#""type":"room_join""#));
        assert!(frame.contains(r#""timestamp":1"#));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_inbound_frames_are_read_while_commands_keep_coming() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut socket = accept_async(stream).await.unwrap();
            tokio::time::sleep(Duration::from_millis(50)).await;
            socket.send(Message::text("hello")).await.unwrap();
            while let Some(Ok(message)) = socket.next().await {
                if message.is_close() {
                    break;
                }
            }
        });

        let again = Arc::new(OnceLock::new());
        let (seen_tx, seen) = oneshot::channel();
        let options = ConnectOptions::new(format!("ws://{address}/ws"), "abc");
        let handler_again = Arc::clone(&again);
        let mut connection = Connection::connect(&options, move |_| Busy {
            again: handler_again,
            seen: Some(seen_tx),
        })
        .await
        .unwrap();
        again.set(connection.commands()).unwrap();
        connection.commands().send(()).unwrap();

        let text = timeout(Duration::from_secs(5), seen).await.unwrap().unwrap();
        assert_eq!(text, "hello");

        connection.close().await.unwrap();
        server.await.unwrap();
    }

    #[test]
    fn test_send_requires_open_connection() {
        let (frames, _receiver) = mpsc::unbounded_channel();
        let (_state_tx, state) = watch::channel(ConnectionState::Closed);
        let outbound = Outbound::new(frames, state, TimestampMode::Counter);
        let envelope = Envelope::new(MessageType::RoomInfo, &json!({}), Timestamp::new(1)).unwrap();
        let error = outbound.send(&envelope).unwrap_err();
        assert!(error.is_fatal());
        assert_eq!(error.to_string(), "transport error: connection is closed");
    }
}
