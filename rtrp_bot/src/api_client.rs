//! HTTP API client: login, player profile, and the room directory.

use anyhow::{Context, Result};
use rtrp::GameType;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::{fmt::Write, time::Duration};

/// Envelope every API endpoint answers with.
#[derive(Debug, Deserialize)]
pub struct ApiResponse<T> {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub status: u16,
    pub data: Option<T>,
    #[serde(default)]
    pub message: String,
}

impl<T> ApiResponse<T> {
    fn into_data(self, what: &str) -> Result<T> {
        if !self.success {
            anyhow::bail!("{} failed: {}", what, self.message);
        }
        self.data
            .with_context(|| format!("{} returned no data", what))
    }
}

#[derive(Debug, Serialize)]
struct LoginRequest<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Debug, Deserialize)]
pub struct LoginResponse {
    pub token: String,
    pub user: User,
}

#[derive(Debug, Deserialize)]
pub struct User {
    pub id: String,
    pub player: PlayerRef,
}

#[derive(Debug, Deserialize)]
pub struct PlayerRef {
    pub id: String,
}

/// The logged-in player's profile.
#[derive(Debug, Deserialize)]
pub struct Profile {
    pub id: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub profile_pic_url: Option<String>,
    #[serde(default)]
    pub chips: i64,
}

/// One entry of the room directory.
#[derive(Debug, Deserialize)]
pub struct RoomSummary {
    pub id: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub max_room_players: u32,
    #[serde(default)]
    pub players_in_room: u32,
    #[serde(default)]
    pub game_status: String,
    #[serde(default)]
    pub game_type: GameType,
    #[serde(default)]
    pub min_bet: i64,
    #[serde(default)]
    pub max_game_players: u32,
    #[serde(default)]
    pub players_in_game: u32,
}

/// Who we are once logged in.
#[derive(Clone, Debug)]
pub struct Login {
    pub token: String,
    pub user_id: String,
    pub player_id: String,
}

/// API client for the card-room service
pub struct ApiClient {
    base_url: String,
    client: reqwest::Client,
    access_token: Option<String>,
}

impl ApiClient {
    /// Create a new API client
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
            access_token: None,
        })
    }

    /// Login with email and password
    pub async fn login(&mut self, email: &str, password: &str) -> Result<Login> {
        let response = self
            .client
            .post(format!("{}/api/v1/auth/login", self.base_url))
            .json(&LoginRequest { email, password })
            .send()
            .await
            .context("Failed to send login request")?;

        let login: LoginResponse = read_json(response, "Login").await?;
        if login.token.is_empty() {
            anyhow::bail!("Login failed: server returned an empty token");
        }

        self.access_token = Some(login.token.clone());
        Ok(Login {
            token: login.token,
            user_id: login.user.id,
            player_id: login.user.player.id,
        })
    }

    /// Fetch the profile of the logged-in player
    pub async fn profile(&self) -> Result<Profile> {
        let token = self.access_token()?;
        let response = self
            .client
            .get(format!("{}/api/v1/players/me", self.base_url))
            .bearer_auth(token)
            .send()
            .await
            .context("Failed to send profile request")?;

        read_json(response, "Profile").await
    }

    /// List rooms hosting the given game type
    pub async fn list_rooms(&self, game_type: GameType) -> Result<Vec<RoomSummary>> {
        let token = self.access_token()?;
        let response = self
            .client
            .get(format!("{}/rooms", self.base_url))
            .query(&[("game_type", game_type.id())])
            .bearer_auth(token)
            .send()
            .await
            .context("Failed to list rooms")?;

        if !response.status().is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|e| format!("Failed to read error response: {}", e));
            anyhow::bail!("Listing rooms failed: {}", error_text);
        }

        response
            .json()
            .await
            .context("Failed to parse room list")
    }

    /// Access token for the WebSocket handshake
    pub fn access_token(&self) -> Result<&str> {
        self.access_token.as_deref().context("Not authenticated")
    }
}

async fn read_json<T: DeserializeOwned>(response: reqwest::Response, what: &str) -> Result<T> {
    if !response.status().is_success() {
        let error_text = response
            .text()
            .await
            .unwrap_or_else(|e| format!("Failed to read error response: {}", e));
        anyhow::bail!("{} failed: {}", what, error_text);
    }

    let body: ApiResponse<T> = response
        .json()
        .await
        .with_context(|| format!("Failed to parse {} response", what.to_lowercase()))?;
    body.into_data(what)
}

/// Render the room directory for the terminal.
pub fn format_rooms(rooms: &[RoomSummary]) -> String {
    if rooms.is_empty() {
        return "No rooms available.\n".to_string();
    }

    let mut out = String::from("Rooms:\n");
    for room in rooms {
        let _ = writeln!(
            out,
            "\t{} - {} / {} ({})\n\t\tGame Type: {} - Min Bet: {}",
            room.id,
            room.players_in_game,
            room.max_game_players,
            room.game_status,
            room.game_type,
            room.min_bet
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_login_response_shape() {
        let body = r#"{
            "success": true,
            "status": 200,
            "data": {"token": "jwt", "user": {"id": "U1", "player": {"id": "P1"}}},
            "message": "ok"
        }"#;
        let response: ApiResponse<LoginResponse> = serde_json::from_str(body).unwrap();
        let login = response.into_data("Login").unwrap();
        assert_eq!(login.token, "jwt");
        assert_eq!(login.user.player.id, "P1");
    }

    #[test]
    fn test_unsuccessful_response_is_an_error() {
        let body = r#"{"success": false, "status": 401, "data": null, "message": "bad credentials"}"#;
        let response: ApiResponse<LoginResponse> = serde_json::from_str(body).unwrap();
        let err = response.into_data("Login").unwrap_err();
        assert!(err.to_string().contains("bad credentials"));
    }

    #[test]
    fn test_room_summary_accepts_numeric_game_type() {
        let body = r#"[{
            "id": "R1", "status": "open", "max_room_players": 20, "players_in_room": 3,
            "game_status": "waiting", "game_type": 1, "min_bet": 10,
            "max_game_players": 6, "players_in_game": 2
        }]"#;
        let rooms: Vec<RoomSummary> = serde_json::from_str(body).unwrap();
        assert_eq!(rooms[0].game_type, GameType::Holdem);
        assert_eq!(rooms[0].players_in_game, 2);
    }

    #[test]
    fn test_format_rooms() {
        let rooms = vec![RoomSummary {
            id: "R1".to_string(),
            status: "open".to_string(),
            max_room_players: 20,
            players_in_room: 3,
            game_status: "waiting".to_string(),
            game_type: GameType::Holdem,
            min_bet: 10,
            max_game_players: 6,
            players_in_game: 2,
        }];
        assert_eq!(
            format_rooms(&rooms),
            "Rooms:\n\tR1 - 2 / 6 (waiting)\n\t\tGame Type: holdem - Min Bet: 10\n"
        );
        assert_eq!(format_rooms(&[]), "No rooms available.\n");
    }

    #[test]
    fn test_requests_need_login() {
        let client = ApiClient::new("http://localhost:1", Duration::from_secs(1)).unwrap();
        assert!(client.access_token().is_err());
    }
}
