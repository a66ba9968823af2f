use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// The selected node is not accepting work; its socket is down or it has
    /// not completed its handshake yet.
    #[error("node unavailable")]
    NodeUnavailable,

    /// The node answered with a status above 299; `status` and `message` are
    /// surfaced verbatim from its error body.
    #[error("rest call failed with status {status}: {message}")]
    Rest { status: u16, message: String },

    #[error("http transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("websocket transport error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("no available node")]
    NoAvailableNode,

    /// `get_or_create_link` was invoked before a pool was mapped for the
    /// guild.
    #[error("no pool mapped for guild {0}")]
    PoolUnmapped(u64),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Whether this is a REST 404, i.e. the remote has no such player.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Rest { status: 404, .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_not_found() {
        let err = Error::Rest {
            status: 404,
            message: "Player not found".into(),
        };
        assert!(err.is_not_found());

        let err = Error::Rest {
            status: 500,
            message: "boom".into(),
        };
        assert!(!err.is_not_found());
        assert!(!Error::NodeUnavailable.is_not_found());
    }

    #[test]
    fn test_display_carries_status_and_message() {
        let err = Error::Rest {
            status: 403,
            message: "bad auth".into(),
        };
        let text = err.to_string();
        assert!(text.contains("403"));
        assert!(text.contains("bad auth"));
    }
}
