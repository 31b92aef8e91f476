//! Auto-play against an in-process room server.

use futures_util::{SinkExt, StreamExt};
use rtrp::{Client, ClientConfig, MessageType, Phase};
use rtrp_bot::policy::{self, PassivePolicy};
use serde_json::{Value, json};
use std::time::Duration;
use tokio::{
    net::{TcpListener, TcpStream},
    sync::watch,
    time::timeout,
};
use tokio_tungstenite::{WebSocketStream, accept_async, tungstenite::Message};

const WAIT: Duration = Duration::from_secs(5);

async fn recv(socket: &mut WebSocketStream<TcpStream>) -> Option<Value> {
    loop {
        match timeout(WAIT, socket.next()).await.ok()?? {
            Ok(Message::Text(text)) => return serde_json::from_str(text.as_str()).ok(),
            Ok(Message::Close(_)) | Err(_) => return None,
            Ok(_) => {}
        }
    }
}

async fn send(socket: &mut WebSocketStream<TcpStream>, tag: &str, data: Value, timestamp: i64) {
    let envelope = json!({"type": tag, "data": data, "timestamp": timestamp});
    socket
        .send(Message::Text(envelope.to_string().into()))
        .await
        .unwrap();
}

fn holdem_update(room_id: &str, turn_of: &str, current_bet: i64) -> Value {
    json!({
        "room_id": room_id,
        "state": {
            "players": [
                {"id": "P1", "position": 0, "balance": 500, "bet": 0, "is_current_turn": turn_of == "P1"},
                {"id": "P2", "position": 1, "balance": 500, "bet": current_bet, "is_current_turn": turn_of == "P2"}
            ],
            "pot": current_bet,
            "current_bet": current_bet,
            "current_round": 0
        },
        "type": 3,
        "data": null
    })
}

#[tokio::test]
async fn test_plays_turn_announced_by_game_update() -> anyhow::Result<()> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let url = format!("ws://{}/ws", listener.local_addr()?);

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut socket = accept_async(stream).await.unwrap();

        let join = recv(&mut socket).await.unwrap();
        assert_eq!(join["type"], "room_join");
        send(
            &mut socket,
            "room_join_ok",
            json!({
                "room_id": "R1",
                "players": [{"id": "P1", "position": 0}, {"id": "P2", "position": 1}],
                "max_game_players": 6,
                "game_type": 1,
            }),
            1,
        )
        .await;

        // Neither the snapshot nor an update for another room gives us a turn.
        send(&mut socket, "game_holdem_action", holdem_update("R9", "P1", 20), 2).await;
        send(&mut socket, "game_holdem_action", holdem_update("R1", "P2", 0), 3).await;
        send(&mut socket, "game_holdem_action", holdem_update("R1", "P1", 20), 4).await;

        let action = recv(&mut socket).await.unwrap();
        assert_eq!(action["type"], "game_action");
        assert_eq!(action["data"]["room_id"], "R1");
        assert_eq!(action["data"]["data"], json!({"action": "call"}));

        let next = recv(&mut socket).await;
        assert!(
            next.as_ref().is_none_or(|envelope| envelope["type"] != "game_action"),
            "acted twice: {next:?}"
        );
    });

    let (updates_tx, updates) = watch::channel(None);
    let mut client = Client::builder(ClientConfig::new(url, "P1", "tok").with_auto_join(false))
        .on(MessageType::GameHoldemAction, policy::forward_updates(updates_tx))
        .connect()
        .await?;
    let mut session = client.subscribe();
    let policy_task = tokio::spawn(policy::run(
        client.subscribe(),
        updates,
        client.gateway().clone(),
        PassivePolicy,
    ));

    client.gateway().join_room("R1").await?;
    timeout(WAIT, session.wait_for(|session| session.phase() == Phase::InGame)).await??;

    // Leave the server time to see a second action, if one were sent.
    tokio::time::sleep(Duration::from_millis(300)).await;
    policy_task.abort();
    client.close().await?;
    server.await?;
    Ok(())
}
