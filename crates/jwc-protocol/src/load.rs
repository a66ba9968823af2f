//! Track loading results.

use crate::messages::TrackException;
use crate::track::Track;
use serde::{Deserialize, Serialize};

/// Result of `GET /v4/loadtracks`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "loadType", content = "data", rename_all = "camelCase")]
pub enum LoadResult {
    /// A single track was resolved from the identifier.
    Track(Track),
    Playlist(Playlist),
    /// The identifier was a search query; tracks are ordered by relevance.
    Search(Vec<Track>),
    Empty,
    Error(TrackException),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Playlist {
    pub info: PlaylistInfo,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin_info: Option<serde_json::Value>,
    pub tracks: Vec<Track>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaylistInfo {
    pub name: String,
    /// Index into `tracks`, `-1` when nothing is selected.
    pub selected_track: i32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::Severity;

    #[test]
    fn test_empty_result() {
        let result: LoadResult = serde_json::from_str(r#"{"loadType":"empty"}"#).unwrap();
        assert_eq!(result, LoadResult::Empty);
    }

    #[test]
    fn test_error_result() {
        let json = serde_json::json!({
            "loadType": "error",
            "data": {"message": "video unavailable", "severity": "common", "cause": "..."}
        });
        match serde_json::from_value::<LoadResult>(json).unwrap() {
            LoadResult::Error(exception) => {
                assert_eq!(exception.severity, Severity::Common);
                assert_eq!(exception.message.as_deref(), Some("video unavailable"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_search_result() {
        let json = serde_json::json!({"loadType": "search", "data": []});
        match serde_json::from_value::<LoadResult>(json).unwrap() {
            LoadResult::Search(tracks) => assert!(tracks.is_empty()),
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
