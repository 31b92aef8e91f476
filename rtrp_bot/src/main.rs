//! A card-room bot and interactive client.
//!
//! Logs in over HTTP, opens the room session, and reads commands from
//! stdin. With `--auto-play` a passive policy takes our turns.

use anyhow::{Context, Result};
use ctrlc::set_handler;
use log::{debug, info, warn};
use pico_args::Arguments;
use rtrp::{Client, MessageType, RoomSnapshot, SeatStatus, Session, Timestamp};
use rtrp_bot::{
    api_client::{ApiClient, format_rooms},
    commands::{self, Command, parse_command},
    config::{BotConfig, ConfigOverrides},
    holdem::HoldemState,
    logging,
    policy::{self, PassivePolicy},
};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::{mpsc, watch},
};

const HELP: &str = "\
Play on a real-time card-room server

USAGE:
  rtrp_bot [OPTIONS]

OPTIONS:
  --api        URL         HTTP API base URL      [default: env RTRP_API_URL or http://localhost:8080]
  --ws         URL         WebSocket endpoint     [default: env RTRP_WS_URL or ws://localhost:8080/ws]
  --email      EMAIL       Account email          [default: env RTRP_EMAIL]
  --password   PASS        Account password       [default: env RTRP_PASSWORD]
  --room       ROOM        Room to join on start  [default: env RTRP_ROOM_ID]

FLAGS:
  --auto-play              Let the bot act on our turns
  -h, --help               Print help information

ENVIRONMENT:
  RTRP_GAME_TYPE           Game type id or name (default: holdem)
  RTRP_TOKEN_PLACEMENT     header, query, or both (default: header)
  RTRP_TIMESTAMP_MODE      counter or wallclock (default: counter)
  RTRP_AUTO_JOIN           Take a free seat after joining a room (default: true)
  RTRP_HTTP_TIMEOUT_SECS   HTTP request timeout (default: 10)
  RUST_LOG                 Log filter (default: info)
";

#[tokio::main]
async fn main() -> Result<()> {
    let mut pargs = Arguments::from_env();

    // Help has a higher priority and should be handled separately.
    if pargs.contains(["-h", "--help"]) {
        print!("{HELP}");
        std::process::exit(0);
    }

    let overrides = ConfigOverrides {
        api_url: pargs.opt_value_from_str("--api")?,
        ws_url: pargs.opt_value_from_str("--ws")?,
        email: pargs.opt_value_from_str("--email")?,
        password: pargs.opt_value_from_str("--password")?,
        room_id: pargs.opt_value_from_str("--room")?,
        auto_play: pargs.contains("--auto-play").then_some(true),
    };

    logging::init();

    let config = BotConfig::from_env(overrides)?;
    config.validate()?;

    run(config).await
}

fn room_event(
    event: &'static str,
) -> impl FnMut(&Session, RoomSnapshot, Timestamp) -> rtrp::Result<()> + Send + 'static {
    move |_, snapshot, _| {
        logging::log_room_event(event, &snapshot);
        Ok(())
    }
}

async fn run(config: BotConfig) -> Result<()> {
    let mut api = ApiClient::new(&config.api_url, config.http_timeout)?;

    info!("Logging in as {}", config.email);
    let login = api
        .login(&config.email, &config.password)
        .await
        .context("Failed to log in")?;
    match api.profile().await {
        Ok(profile) => info!("Playing as {} ({} chips)", profile.username, profile.chips),
        Err(e) => warn!("Could not load profile: {e:#}"),
    }

    // Catching signals for exit.
    let (interrupt, mut interrupted) = mpsc::unbounded_channel();
    set_handler(move || {
        let _ = interrupt.send(());
    })?;

    let (updates_tx, updates) = watch::channel(None);
    let mut client = Client::builder(config.client_config(&login.player_id, &login.token))
        .on(MessageType::RoomJoin, room_event("player_joined_room"))
        .on(MessageType::RoomLeave, room_event("player_left_room"))
        .on(MessageType::GameJoin, room_event("player_joined_game"))
        .on(MessageType::GameLeave, room_event("player_left_game"))
        .on(MessageType::GameJoinOk, room_event("joined_game"))
        .on(MessageType::GameLeaveOk, room_event("left_game"))
        .on(MessageType::GameHoldemAction, policy::forward_updates(updates_tx))
        .on_error(logging::log_protocol_error)
        .connect()
        .await
        .context("Failed to connect to the room server")?;
    info!("Connected to {} as player {}", config.ws_url, login.player_id);

    if let Some(room_id) = &config.room_id {
        client
            .gateway()
            .join_room(room_id)
            .await
            .with_context(|| format!("Failed to join room {room_id}"))?;
    }

    let policy_task = config.auto_play.then(|| {
        tokio::spawn(policy::run(
            client.subscribe(),
            updates,
            client.gateway().clone(),
            PassivePolicy,
        ))
    });

    print!("{}", commands::HELP);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            _ = interrupted.recv() => {
                info!("Interrupted, disconnecting");
                break;
            }
            () = client.closed() => {
                warn!("Connection closed by the server");
                break;
            }
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    match parse_command(&line) {
                        Ok(Command::Quit) => break,
                        Ok(command) => {
                            if let Err(e) = execute(&client, &api, &config, command).await {
                                eprintln!("Error: {e:#}");
                            }
                        }
                        Err(e) => eprintln!("{e}"),
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!("Error reading input: {e}");
                    break;
                }
            },
        }
    }

    if let Some(task) = policy_task {
        task.abort();
    }
    client
        .close()
        .await
        .context("Failed to close the connection")?;
    info!("Disconnected");
    Ok(())
}

async fn execute(client: &Client, api: &ApiClient, config: &BotConfig, command: Command) -> Result<()> {
    let gateway = client.gateway();
    let session = client.session();

    match command {
        Command::Rooms => {
            let rooms = api.list_rooms(config.game_type).await?;
            print!("{}", format_rooms(&rooms));
        }
        Command::JoinRoom(room_id) => gateway.join_room(&room_id).await?,
        Command::LeaveRoom => gateway.leave_room(current_room(&session)?).await?,
        Command::Sit(position) => gateway.join_game(current_room(&session)?, position).await?,
        Command::Stand => gateway.leave_game(current_room(&session)?).await?,
        Command::Act(action) => {
            gateway
                .send_game_action(current_room(&session)?, &action)
                .await?
        }
        Command::Status => print_status(&session),
        Command::Help => print!("{}", commands::HELP),
        Command::Quit => {}
    }
    Ok(())
}

fn current_room(session: &Session) -> Result<&str> {
    session
        .current_room_id()
        .context("Not in a room. Use 'join ROOM' first")
}

fn print_status(session: &Session) {
    println!("Player {} is {}", session.player_id(), session.phase());
    let Some(room) = session.current_room_state() else {
        return;
    };

    println!(
        "Room {}: {} players, game {}",
        room.room_id,
        room.players.len(),
        room.game_status
    );
    match session.seat() {
        SeatStatus::Seated(position) => println!("Seated at position {position}"),
        SeatStatus::Unseated | SeatStatus::Unknown => println!("Not seated"),
    }
    match HoldemState::from_snapshot(room) {
        Ok(Some(state)) => println!("{state}"),
        Ok(None) => {}
        Err(e) => debug!("Could not read game state: {e}"),
    }
}
