//! REST control plane for a single node.

use crate::config::NodeConfig;
use crate::error::{Error, Result};
use jwc_protocol::{ErrorResponse, Info, LoadResult, Player, PlayerUpdate};
use reqwest::header::AUTHORIZATION;
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use tracing::trace;

/// HTTP client bound to one node's base URL and password.
///
/// Owns its connection pool; dropping the client tears it down. Every call
/// carries the node's `Authorization` header and the configured wall-clock
/// timeout. Dropping a call future aborts the underlying request.
pub(crate) struct RestClient {
    http: reqwest::Client,
    base: String,
    password: String,
}

impl RestClient {
    pub fn new(config: &NodeConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()?;
        Ok(Self {
            http,
            base: config.http_url(),
            password: config.password().to_string(),
        })
    }

    pub async fn get_player(&self, session_id: &str, guild_id: u64) -> Result<Player> {
        self.expect_json(Method::GET, &format!("/v4/sessions/{session_id}/players/{guild_id}"))
            .await
    }

    pub async fn update_player(
        &self,
        session_id: &str,
        guild_id: u64,
        update: &PlayerUpdate,
        no_replace: bool,
    ) -> Result<Player> {
        let path =
            format!("/v4/sessions/{session_id}/players/{guild_id}?noReplace={no_replace}");
        let request = self.request(Method::PATCH, &path).json(update);
        self.execute(request)
            .await?
            .ok_or_else(Self::unexpected_empty)
    }

    pub async fn destroy_player(&self, session_id: &str, guild_id: u64) -> Result<()> {
        let path = format!("/v4/sessions/{session_id}/players/{guild_id}");
        self.execute::<Player>(self.request(Method::DELETE, &path))
            .await?;
        Ok(())
    }

    pub async fn load_item(&self, identifier: &str) -> Result<LoadResult> {
        let path = format!("/v4/loadtracks?identifier={}", urlencoding::encode(identifier));
        self.expect_json(Method::GET, &path).await
    }

    pub async fn info(&self) -> Result<Info> {
        self.expect_json(Method::GET, "/v4/info").await
    }

    fn request(&self, method: Method, path_and_query: &str) -> reqwest::RequestBuilder {
        let url = format!("{}{path_and_query}", self.base);
        trace!(%method, %url, "rest call");
        self.http
            .request(method, url)
            .header(AUTHORIZATION, &self.password)
    }

    async fn expect_json<T: DeserializeOwned>(&self, method: Method, path: &str) -> Result<T> {
        self.execute(self.request(method, path))
            .await?
            .ok_or_else(Self::unexpected_empty)
    }

    /// Runs a request: 204 completes with no value, other 2xx parse as
    /// JSON, anything above 299 is surfaced as a typed REST error carrying
    /// the remote's status and message.
    async fn execute<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<Option<T>> {
        let response = request.send().await?;
        let status = response.status();

        if status == StatusCode::NO_CONTENT {
            return Ok(None);
        }
        if status.as_u16() > 299 {
            let message = match response.json::<ErrorResponse>().await {
                Ok(body) if !body.message.is_empty() => body.message,
                Ok(body) => body.error,
                Err(_) => status.canonical_reason().unwrap_or("unknown error").to_string(),
            };
            return Err(Error::Rest {
                status: status.as_u16(),
                message,
            });
        }

        Ok(Some(response.json().await?))
    }

    fn unexpected_empty() -> Error {
        Error::Rest {
            status: 204,
            message: "unexpected empty response body".into(),
        }
    }
}
