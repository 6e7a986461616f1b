//! Track lifecycle and voice socket events.

use std::{convert::Infallible, fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_with::{DeserializeFromStr, SerializeDisplay};

use crate::error::{Error, Result};

/// An event pushed by the node for one player.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(tag = "type")]
pub enum TrackEvent {
    #[serde(rename = "TrackStartEvent")]
    TrackStart(TrackStart),

    #[serde(rename = "TrackEndEvent")]
    TrackEnd(TrackEnd),

    #[serde(rename = "TrackStuckEvent")]
    TrackStuck(TrackStuck),

    #[serde(rename = "TrackExceptionEvent")]
    TrackException(TrackException),

    #[serde(rename = "WebSocketClosedEvent")]
    WebSocketClosed(WebSocketClosed),
}

impl TrackEvent {
    /// Event types this client understands.
    const KNOWN: [&'static str; 5] = [
        "TrackStartEvent",
        "TrackEndEvent",
        "TrackStuckEvent",
        "TrackExceptionEvent",
        "WebSocketClosedEvent",
    ];

    /// Parses an event from the payload of an `event` frame.
    ///
    /// # Errors
    ///
    /// Returns `Unimplemented` with the type name for unknown event types,
    /// and `InvalidArgument` if a known event is malformed.
    pub fn from_value(value: &Value) -> Result<Self> {
        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::invalid_argument("event has no type"))?;

        if !Self::KNOWN.contains(&kind) {
            return Err(Error::unimplemented(format!("unknown event '{kind}'")));
        }

        Self::deserialize(value).map_err(Into::into)
    }
}

/// A track started playing.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct TrackStart {
    /// The track as sent by the node: an encoded string or a track object,
    /// depending on the protocol version.
    pub track: Option<Value>,
}

/// A track stopped playing.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TrackEnd {
    #[serde(default)]
    pub track: Option<Value>,
    pub reason: TrackEndReason,
}

/// A track got stuck while playing.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct TrackStuck {
    pub track: Option<Value>,

    /// Threshold in milliseconds that was exceeded.
    pub threshold_ms: u64,
}

/// A track failed to play.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct TrackException {
    pub track: Option<Value>,
    pub exception: Option<Exception>,
}

/// Exception details of a failed track.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct Exception {
    pub message: Option<String>,
    pub severity: Option<String>,
    pub cause: Option<String>,
}

/// The voice gateway connection of a player was closed.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct WebSocketClosed {
    pub code: u16,
    pub reason: String,
    pub by_remote: bool,
}

/// Why a track stopped playing.
///
/// Parsing accepts both the upper snake case and the camel case spellings,
/// case-insensitively; `CLEAN_UP` parses as [`TrackEndReason::Cleanup`].
#[derive(Clone, Debug, Eq, Hash, PartialEq, SerializeDisplay, DeserializeFromStr)]
pub enum TrackEndReason {
    /// The track played to its end.
    Finished,

    /// The track failed to load.
    LoadFailed,

    /// The track was stopped.
    Stopped,

    /// Another track was started in its place.
    Replaced,

    /// The player was cleaned up.
    Cleanup,

    /// A reason this client does not know.
    Other(String),
}

impl TrackEndReason {
    /// Whether the track ended before it could really play, so the queue
    /// has to move on regardless of repeat modes.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::LoadFailed | Self::Cleanup)
    }
}

impl fmt::Display for TrackEndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Finished => f.write_str("finished"),
            Self::LoadFailed => f.write_str("loadFailed"),
            Self::Stopped => f.write_str("stopped"),
            Self::Replaced => f.write_str("replaced"),
            Self::Cleanup => f.write_str("cleanup"),
            Self::Other(reason) => f.write_str(reason),
        }
    }
}

impl FromStr for TrackEndReason {
    type Err = Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let normalized: String = s
            .chars()
            .filter(|chr| *chr != '_')
            .map(|chr| chr.to_ascii_uppercase())
            .collect();

        let reason = match normalized.as_str() {
            "FINISHED" => Self::Finished,
            "LOADFAILED" => Self::LoadFailed,
            "STOPPED" => Self::Stopped,
            "REPLACED" => Self::Replaced,
            "CLEANUP" => Self::Cleanup,
            _ => Self::Other(s.to_owned()),
        };

        Ok(reason)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn reasons_parse_in_any_spelling() {
        for (input, expected) in [
            ("FINISHED", TrackEndReason::Finished),
            ("finished", TrackEndReason::Finished),
            ("LOAD_FAILED", TrackEndReason::LoadFailed),
            ("loadFailed", TrackEndReason::LoadFailed),
            ("CLEAN_UP", TrackEndReason::Cleanup),
            ("CLEANUP", TrackEndReason::Cleanup),
            ("cleanup", TrackEndReason::Cleanup),
            ("REPLACED", TrackEndReason::Replaced),
            ("stopped", TrackEndReason::Stopped),
        ] {
            assert_eq!(input.parse::<TrackEndReason>(), Ok(expected), "{input}");
        }

        assert_eq!(
            "exploded".parse::<TrackEndReason>(),
            Ok(TrackEndReason::Other("exploded".to_owned()))
        );
    }

    #[test]
    fn parses_track_end() {
        let event = TrackEvent::from_value(&json!({
            "op": "event",
            "type": "TrackEndEvent",
            "guildId": "1",
            "track": "QAAAjQIAJVJpY2sgQXN0bGV5",
            "reason": "REPLACED"
        }))
        .unwrap();

        let TrackEvent::TrackEnd(end) = event else {
            panic!("expected track end");
        };
        assert_eq!(end.reason, TrackEndReason::Replaced);
        assert!(end.track.is_some());
    }

    #[test]
    fn parses_track_stuck() {
        let event = TrackEvent::from_value(&json!({
            "type": "TrackStuckEvent",
            "guildId": "1",
            "thresholdMs": 10000
        }))
        .unwrap();
        assert_eq!(
            event,
            TrackEvent::TrackStuck(TrackStuck {
                track: None,
                threshold_ms: 10000
            })
        );
    }

    #[test]
    fn unknown_type_names_the_type() {
        let err = TrackEvent::from_value(&json!({ "type": "SegmentsLoaded" })).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Unimplemented);
        assert!(err.to_string().contains("SegmentsLoaded"));
    }
}
