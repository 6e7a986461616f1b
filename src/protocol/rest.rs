//! REST request and response bodies.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::messages::PlayerState;

/// Body of an update player request.
///
/// Fields left at `None` are not sent and keep their value on the node.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PlayerOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub track: Option<TrackUpdate>,

    /// Position in milliseconds to start or seek to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<u64>,

    /// Position in milliseconds at which to end the track.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<u64>,

    /// Volume from 0 to 1000.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume: Option<u16>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub paused: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub filters: Option<Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice: Option<VoiceState>,
}

/// Track to load. An `encoded` value of `None` stops the current track.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TrackUpdate {
    pub encoded: Option<String>,
}

/// Voice connection of a player.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VoiceState {
    pub token: String,
    pub endpoint: String,
    pub session_id: String,
}

/// A player as returned by the node.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PlayerResponse {
    pub guild_id: String,

    #[serde(default)]
    pub track: Option<Value>,

    pub volume: u16,

    pub paused: bool,

    #[serde(default)]
    pub state: PlayerState,

    #[serde(default)]
    pub voice: VoiceState,

    #[serde(default)]
    pub filters: Value,
}

/// Resuming configuration of a session.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SessionUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resuming_key: Option<String>,

    /// Seconds the node keeps the session after a disconnect.
    #[serde(default)]
    pub timeout: u64,
}

/// Status of the route planner of a node.
///
/// `class` is `None` when no route planner is configured.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RoutePlannerStatus {
    #[serde(default)]
    pub class: Option<String>,

    #[serde(default)]
    pub details: Option<Value>,
}

/// Body of a request to free a failing address.
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FreeAddress {
    pub address: String,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn stop_serializes_null_track() {
        let options = PlayerOptions {
            track: Some(TrackUpdate { encoded: None }),
            ..PlayerOptions::default()
        };
        assert_eq!(
            serde_json::to_value(options).unwrap(),
            json!({ "track": { "encoded": null } })
        );
    }

    #[test]
    fn seek_serializes_position_only() {
        let options = PlayerOptions {
            position: Some(42_000),
            ..PlayerOptions::default()
        };
        assert_eq!(
            serde_json::to_value(options).unwrap(),
            json!({ "position": 42000 })
        );
    }

    #[test]
    fn parses_player_response() {
        let response: PlayerResponse = serde_json::from_value(json!({
            "guildId": "1",
            "track": null,
            "volume": 80,
            "paused": true,
            "state": { "time": 1, "position": 2, "connected": true, "ping": 3 },
            "voice": { "token": "t", "endpoint": "e", "sessionId": "s" },
            "filters": { "timescale": { "speed": 1.2 } }
        }))
        .unwrap();

        assert_eq!(response.volume, 80);
        assert_eq!(response.voice.session_id, "s");
        assert_eq!(response.state.ping, Some(3));
    }
}
