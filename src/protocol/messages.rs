//! Frames on the control websocket.
//!
//! Every frame is a JSON object with an `op` discriminator. Frames are first
//! parsed into a [`serde_json::Value`] so that observers can see the raw
//! payload, and only then into a typed [`Frame`].

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_with::{DeserializeFromStr, SerializeDisplay};

use super::{event::TrackEvent, stats::Stats};
use crate::error::{Error, Result};

/// Operation tag of a frame.
#[derive(Copy, Clone, Debug, Eq, Hash, PartialEq, SerializeDisplay, DeserializeFromStr)]
pub enum Op {
    /// Handshake completed; carries the session identifier.
    Ready,

    /// Node statistics.
    Stats,

    /// Periodic player state.
    PlayerUpdate,

    /// Track lifecycle or voice socket event.
    Event,

    /// Outbound request to destroy a player.
    Destroy,
}

impl Op {
    /// Wire value for [`Op::Ready`].
    const READY: &'static str = "ready";

    /// Wire value for [`Op::Stats`].
    const STATS: &'static str = "stats";

    /// Wire value for [`Op::PlayerUpdate`].
    const PLAYER_UPDATE: &'static str = "playerUpdate";

    /// Wire value for [`Op::Event`].
    const EVENT: &'static str = "event";

    /// Wire value for [`Op::Destroy`].
    const DESTROY: &'static str = "destroy";

    /// Reads the operation tag of a raw frame.
    ///
    /// Returns `None` if the frame has no string `op` field.
    #[must_use]
    pub fn raw(value: &Value) -> Option<&str> {
        value.get("op").and_then(Value::as_str)
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match self {
            Self::Ready => Self::READY,
            Self::Stats => Self::STATS,
            Self::PlayerUpdate => Self::PLAYER_UPDATE,
            Self::Event => Self::EVENT,
            Self::Destroy => Self::DESTROY,
        };
        f.write_str(op)
    }
}

impl FromStr for Op {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let variant = match s {
            Self::READY => Self::Ready,
            Self::STATS => Self::Stats,
            Self::PLAYER_UPDATE => Self::PlayerUpdate,
            Self::EVENT => Self::Event,
            Self::DESTROY => Self::Destroy,
            _ => return Err(Error::unimplemented(format!("unexpected op \"{s}\""))),
        };

        Ok(variant)
    }
}

/// A typed inbound frame.
#[derive(Clone, Debug, PartialEq)]
pub enum Frame {
    Ready(Ready),
    Stats(Stats),
    PlayerUpdate(PlayerUpdate),
    Event(EventFrame),
}

impl Frame {
    /// Converts a raw frame into a typed one.
    ///
    /// The `op` field is ignored by the payload types, so the full object
    /// is deserialized as is.
    ///
    /// # Errors
    ///
    /// Will return `Err` if:
    /// - the frame has no `op` or an `op` that is not inbound
    ///   (`InvalidArgument`, `Unimplemented`)
    /// - the payload does not match the frame type (`InvalidArgument`)
    pub fn from_value(value: Value) -> Result<Self> {
        let raw = Op::raw(&value).ok_or_else(|| Error::invalid_argument("frame has no op"))?;
        let op = raw.parse::<Op>().map_err(|_| {
            Error::unimplemented(format!("unexpected op \"{raw}\" with data: {value}"))
        })?;

        let frame = match op {
            Op::Ready => Self::Ready(serde_json::from_value(value)?),
            Op::Stats => Self::Stats(serde_json::from_value(value)?),
            Op::PlayerUpdate => Self::PlayerUpdate(serde_json::from_value(value)?),
            Op::Event => Self::Event(EventFrame::from_value(value)?),
            Op::Destroy => {
                return Err(Error::unimplemented(format!(
                    "unexpected op \"{op}\" with data: {value}"
                )))
            }
        };

        Ok(frame)
    }
}

/// Payload of a `ready` frame.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Ready {
    pub session_id: String,

    #[serde(default)]
    pub resumed: bool,
}

/// Payload of a `playerUpdate` frame.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PlayerUpdate {
    pub guild_id: String,
    pub state: PlayerState,
}

/// Player state as reported by the node.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct PlayerState {
    /// Unix timestamp in milliseconds at which the state was captured.
    pub time: Option<u64>,

    /// Track position in milliseconds.
    pub position: Option<u64>,

    /// Whether the node is connected to the voice gateway.
    pub connected: bool,

    /// Voice gateway latency in milliseconds, or -1 if not connected.
    pub ping: Option<i64>,
}

/// Payload of an `event` frame.
///
/// The event itself is kept raw until the player it belongs to has been
/// resolved, so that frames for unknown players are dropped without
/// inspecting their type.
#[derive(Clone, Debug, PartialEq)]
pub struct EventFrame {
    pub guild_id: Option<String>,
    pub payload: Value,
}

impl EventFrame {
    fn from_value(payload: Value) -> Result<Self> {
        if !payload.is_object() {
            return Err(Error::invalid_argument("event frame is not an object"));
        }

        let guild_id = payload
            .get("guildId")
            .and_then(Value::as_str)
            .filter(|guild_id| !guild_id.is_empty())
            .map(ToOwned::to_owned);

        Ok(Self { guild_id, payload })
    }

    /// The event type, such as `TrackStartEvent`.
    #[must_use]
    pub fn kind(&self) -> Option<&str> {
        self.payload.get("type").and_then(Value::as_str)
    }

    /// Parses the typed event.
    ///
    /// # Errors
    ///
    /// Returns `Unimplemented` for unknown event types and `InvalidArgument`
    /// for malformed events.
    pub fn event(&self) -> Result<TrackEvent> {
        TrackEvent::from_value(&self.payload)
    }
}

/// Frames sent to the node.
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum Outbound {
    /// Destroys a player. Superseded by the REST endpoint, used only while
    /// no session is known.
    #[serde(rename_all = "camelCase")]
    Destroy { guild_id: String },
}
