//! Node configuration.

use crate::error::{Error, Result};
use crate::region::RegionGroup;
use base64::engine::general_purpose::{STANDARD_NO_PAD, URL_SAFE_NO_PAD};
use base64::Engine;
use std::time::Duration;

/// Immutable description of one remote audio node.
///
/// Built with [`NodeConfig::builder`]; construction fails when a required
/// field is missing.
///
/// # Example
///
/// ```
/// use jwc_client::config::NodeConfig;
/// use jwc_client::region::RegionGroup;
///
/// let config = NodeConfig::builder()
///     .name("eu-1")
///     .host("10.0.0.7")
///     .port(2333)
///     .password("youshallnotpass")
///     .pool("main")
///     .region_group(RegionGroup::Europe)
///     .build()
///     .unwrap();
///
/// assert_eq!(config.ws_url(), "ws://10.0.0.7:2333/v4/websocket");
/// assert_eq!(config.http_url(), "http://10.0.0.7:2333");
/// ```
#[derive(Debug, Clone)]
pub struct NodeConfig {
    name: String,
    host: String,
    port: u16,
    tls: bool,
    password: String,
    pool: String,
    region_group: RegionGroup,
    timeout: Duration,
}

impl NodeConfig {
    pub fn builder() -> NodeConfigBuilder {
        NodeConfigBuilder::default()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn tls(&self) -> bool {
        self.tls
    }

    pub fn password(&self) -> &str {
        &self.password
    }

    /// The pool this node serves; the balancer only selects within a pool.
    pub fn pool(&self) -> &str {
        &self.pool
    }

    pub fn region_group(&self) -> RegionGroup {
        self.region_group
    }

    /// Wall-clock timeout applied to every REST call against this node.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn ws_url(&self) -> String {
        let scheme = if self.tls { "wss" } else { "ws" };
        format!("{scheme}://{}:{}/v4/websocket", self.host, self.port)
    }

    pub fn http_url(&self) -> String {
        let scheme = if self.tls { "https" } else { "http" };
        format!("{scheme}://{}:{}", self.host, self.port)
    }
}

/// Builder for [`NodeConfig`].
///
/// Required: `name`, `host`, `password`, `pool`. Defaults: port 2333, no
/// tls, unknown region group, 10 s request timeout.
#[derive(Debug, Clone)]
pub struct NodeConfigBuilder {
    name: Option<String>,
    host: Option<String>,
    port: u16,
    tls: bool,
    password: Option<String>,
    pool: Option<String>,
    region_group: RegionGroup,
    timeout: Duration,
}

impl Default for NodeConfigBuilder {
    fn default() -> Self {
        Self {
            name: None,
            host: None,
            port: 2333,
            tls: false,
            password: None,
            pool: None,
            region_group: RegionGroup::Unknown,
            timeout: Duration::from_secs(10),
        }
    }
}

impl NodeConfigBuilder {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn tls(mut self, tls: bool) -> Self {
        self.tls = tls;
        self
    }

    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn pool(mut self, pool: impl Into<String>) -> Self {
        self.pool = Some(pool.into());
        self
    }

    pub fn region_group(mut self, region_group: RegionGroup) -> Self {
        self.region_group = region_group;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn build(self) -> Result<NodeConfig> {
        let name = self
            .name
            .ok_or_else(|| Error::Config("node name is required".into()))?;
        let host = self
            .host
            .ok_or_else(|| Error::Config("node host is required".into()))?;
        let password = self
            .password
            .ok_or_else(|| Error::Config("node password is required".into()))?;
        let pool = self
            .pool
            .ok_or_else(|| Error::Config("node pool is required".into()))?;

        Ok(NodeConfig {
            name,
            host,
            port: self.port,
            tls: self.tls,
            password,
            pool,
            region_group: self.region_group,
            timeout: self.timeout,
        })
    }
}

/// Extracts the bot's user id from its auth token.
///
/// The token must split into exactly three dot-separated segments; the
/// first segment is the base64-encoded decimal user id.
pub fn user_id_from_token(token: &str) -> Result<u64> {
    let segments: Vec<&str> = token.split('.').collect();
    if segments.len() != 3 {
        return Err(Error::Config(format!(
            "token must have 3 segments, found {}",
            segments.len()
        )));
    }

    let first = segments[0].trim_end_matches('=');
    let decoded = STANDARD_NO_PAD
        .decode(first)
        .or_else(|_| URL_SAFE_NO_PAD.decode(first))
        .map_err(|e| Error::Config(format!("token user id segment is not base64: {e}")))?;

    String::from_utf8(decoded)
        .ok()
        .and_then(|id| id.parse().ok())
        .ok_or_else(|| Error::Config("token user id segment is not a decimal id".into()))
}
