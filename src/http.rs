//! HTTP implementations of [`GameServer`] and [`AgentEndpoint`] on top of `reqwest::blocking`.

use std::time::Duration;

use anyhow::{bail, Context};
use reqwest::blocking::{Client, Response};
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::{debug, instrument};

use crate::game_interface::{
    AgentEndpoint, AgentHealth, AgentInfo, CreatedGame, GameServer, GameState, JoinRequest,
    MoveReply, MoveRequest, ServerError,
};
use crate::session::{Color, Position};

/// Timeout of every game server call and of agent join/leave calls.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

fn build_client() -> anyhow::Result<Client> {
    Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()
        .context("could not build HTTP client")
}

fn trim_url(url: &str) -> String {
    url.trim_end_matches('/').to_owned()
}

/// Game server reached over HTTP.
#[derive(Debug, Clone)]
pub struct HttpGameServer {
    base_url: String,
    client: Client,
}

impl HttpGameServer {
    /// Client for the game server at `base_url` (e.g. `http://localhost:10000`).
    pub fn new(base_url: &str) -> anyhow::Result<Self> {
        Ok(Self {
            base_url: trim_url(base_url),
            client: build_client()?,
        })
    }

    fn game_url(&self, game_id: &str, tail: &str) -> String {
        format!("{}/games/{game_id}/{tail}", self.base_url)
    }

    fn parse<T: DeserializeOwned>(response: Response) -> Result<T, ServerError> {
        let status = response.status();
        if status.is_client_error() {
            let body = response.text().unwrap_or_default();
            return Err(ServerError::Rejected(format!("HTTP {status}: {}", snippet(&body))));
        }
        if !status.is_success() {
            return Err(ServerError::Unavailable(format!("HTTP {status}")));
        }
        response
            .json::<T>()
            .map_err(|e| ServerError::Unavailable(format!("unexpected answer: {e}")))
    }
}

fn unavailable(e: reqwest::Error) -> ServerError {
    ServerError::Unavailable(e.to_string())
}

fn snippet(body: &str) -> &str {
    match body.char_indices().nth(100) {
        Some((i, _)) => &body[..i],
        None => body,
    }
}

impl GameServer for HttpGameServer {
    fn address(&self) -> &str {
        &self.base_url
    }

    fn health(&self, timeout: Duration) -> anyhow::Result<()> {
        let response = self
            .client
            .get(format!("{}/health", self.base_url))
            .timeout(timeout)
            .send()
            .context("game server did not answer")?;
        if !response.status().is_success() {
            bail!("game server health returned HTTP {}", response.status());
        }
        Ok(())
    }

    #[instrument(skip(self))]
    fn create_game(&self, black: &str, white: &str) -> Result<CreatedGame, ServerError> {
        let response = self
            .client
            .post(format!("{}/games", self.base_url))
            .json(&json!({ "player_black": black, "player_white": white }))
            .send()
            .map_err(unavailable)?;
        // a refused creation is a server problem, not a move problem
        Self::parse(response).map_err(|e| match e {
            ServerError::Rejected(msg) => ServerError::Unavailable(msg),
            other => other,
        })
    }

    fn state(&self, game_id: &str) -> Result<GameState, ServerError> {
        let response = self
            .client
            .get(self.game_url(game_id, "state"))
            .send()
            .map_err(unavailable)?;
        Self::parse(response)
    }

    fn submit_move(
        &self,
        game_id: &str,
        color: Color,
        position: Position,
    ) -> Result<GameState, ServerError> {
        let response = self
            .client
            .post(self.game_url(game_id, "move"))
            .json(&json!({ "player": color, "position": position }))
            .send()
            .map_err(unavailable)?;
        let body: serde_json::Value = Self::parse(response)?;
        // some servers only acknowledge the move; fall back to a state read
        match serde_json::from_value::<GameState>(body) {
            Ok(state) => Ok(state),
            Err(e) => {
                debug!("move answer is not a game state ({e}), reading state");
                self.state(game_id)
            }
        }
    }

    fn history(&self, game_id: &str) -> Result<serde_json::Value, ServerError> {
        let response = self
            .client
            .get(self.game_url(game_id, "history"))
            .send()
            .map_err(unavailable)?;
        Self::parse(response)
    }
}

/// Agent service reached over HTTP.
#[derive(Debug, Clone)]
pub struct HttpAgent {
    base_url: String,
    client: Client,
}

impl HttpAgent {
    /// Client for the agent at `base_url` (e.g. `http://localhost:11001`).
    pub fn new(base_url: &str) -> anyhow::Result<Self> {
        Ok(Self {
            base_url: trim_url(base_url),
            client: build_client()?,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{path}", self.base_url)
    }

    fn expect_success(response: Response, call: &str) -> anyhow::Result<Response> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            bail!("{call} returned HTTP {status}: {}", snippet(&body));
        }
        Ok(response)
    }
}

impl AgentEndpoint for HttpAgent {
    fn health(&self, timeout: Duration) -> anyhow::Result<AgentHealth> {
        let response = self
            .client
            .get(self.url("health"))
            .timeout(timeout)
            .send()
            .context("no answer to health probe")?;
        Self::expect_success(response, "health")?
            .json::<AgentHealth>()
            .context("malformed health answer")
    }

    fn info(&self, timeout: Duration) -> anyhow::Result<AgentInfo> {
        let response = self
            .client
            .get(self.url("info"))
            .timeout(timeout)
            .send()
            .context("no answer to info request")?;
        Self::expect_success(response, "info")?
            .json::<AgentInfo>()
            .context("malformed info answer")
    }

    fn join(&self, request: &JoinRequest) -> anyhow::Result<()> {
        let response = self
            .client
            .post(self.url("join_game"))
            .json(request)
            .send()
            .context("join_game failed")?;
        Self::expect_success(response, "join_game")?;
        Ok(())
    }

    fn request_move(&self, request: &MoveRequest, timeout: Duration) -> anyhow::Result<MoveReply> {
        let response = self
            .client
            .post(self.url("get_move"))
            .json(request)
            .timeout(timeout)
            .send()
            .context("get_move failed")?;
        let value = Self::expect_success(response, "get_move")?
            .json::<serde_json::Value>()
            .context("get_move answer is not JSON")?;
        MoveReply::from_value(value)
    }

    fn leave(&self, game_id: &str) -> anyhow::Result<()> {
        let response = self
            .client
            .post(self.url("leave_game"))
            .json(&json!({ "game_id": game_id }))
            .send()
            .context("leave_game failed")?;
        Self::expect_success(response, "leave_game")?;
        Ok(())
    }
}
