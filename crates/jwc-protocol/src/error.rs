//! REST error bodies.

use serde::{Deserialize, Serialize};

/// Body returned by the node for any status above 299.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub timestamp: i64,
    pub status: u16,
    pub error: String,
    #[serde(default)]
    pub trace: Option<String>,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub path: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_response() {
        let json = serde_json::json!({
            "timestamp": 1_667_857_581_613_i64,
            "status": 404,
            "error": "Not Found",
            "message": "Player not found",
            "path": "/v4/sessions/xtaug914v9k5032f/players/817327181659111454"
        });
        let body: ErrorResponse = serde_json::from_value(json).unwrap();
        assert_eq!(body.status, 404);
        assert_eq!(body.message, "Player not found");
        assert!(body.trace.is_none());
    }
}
