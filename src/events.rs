//! Notifications emitted by nodes.
//!
//! Nodes report everything that happens to them and to the players bound
//! to them through [`Manager::emit`](crate::manager::Manager::emit). These
//! notifications can be used to:
//! * Monitor node connectivity and errors
//! * React to track changes
//! * Observe the raw protocol for debugging
//!
//! # Example
//!
//! ```rust
//! use lavanode::events::Event;
//!
//! fn handle_event(event: Event) {
//!     match event {
//!         Event::NodeConnect { node } => println!("{node} connected"),
//!         Event::TrackStart { guild_id, track, .. } => {
//!             println!("{guild_id} started playing {track:?}");
//!         }
//!         Event::QueueEnd { guild_id, .. } => println!("{guild_id} ran out of tracks"),
//!         _ => {}
//!     }
//! }
//! ```

use serde_json::Value;

use crate::{
    error::Error,
    protocol::event::{TrackEnd, TrackException, TrackStart, TrackStuck},
    track::Track,
};

/// Notifications emitted by a node.
///
/// Node events carry the identifier of the node. Track events carry the
/// guild id and the track that was current when the event arrived, before
/// the player was updated.
#[derive(Debug)]
pub enum Event {
    /// A node was added to the manager.
    NodeCreate { node: String },

    /// The control websocket of a node opened.
    NodeConnect { node: String },

    /// A node is about to attempt another connection.
    NodeReconnect { node: String },

    /// The control websocket of a node closed.
    NodeDisconnect {
        node: String,
        code: u16,
        reason: String,
    },

    /// A node reported a protocol or transport error, or gave up
    /// reconnecting.
    NodeError { node: String, error: Error },

    /// A node was destroyed and removed from the manager.
    NodeDestroy { node: String },

    /// A frame was received, before it was handled.
    NodeRaw { node: String, payload: Value },

    /// A track started playing.
    TrackStart {
        guild_id: String,
        track: Option<Track>,
        payload: TrackStart,
    },

    /// A track stopped playing and the queue moved on.
    TrackEnd {
        guild_id: String,
        track: Option<Track>,
        payload: TrackEnd,
    },

    /// A track got stuck.
    TrackStuck {
        guild_id: String,
        track: Option<Track>,
        payload: TrackStuck,
    },

    /// A track failed to play.
    TrackError {
        guild_id: String,
        track: Option<Track>,
        payload: TrackException,
    },

    /// A track ended and there was nothing left to play.
    QueueEnd {
        guild_id: String,
        track: Option<Track>,
        payload: TrackEnd,
    },

    /// The voice gateway connection of a player was closed.
    SocketClosed { guild_id: String, payload: Value },
}

impl Event {
    /// The node this event is about, for node events.
    #[must_use]
    pub fn node(&self) -> Option<&str> {
        match self {
            Self::NodeCreate { node }
            | Self::NodeConnect { node }
            | Self::NodeReconnect { node }
            | Self::NodeDisconnect { node, .. }
            | Self::NodeError { node, .. }
            | Self::NodeDestroy { node }
            | Self::NodeRaw { node, .. } => Some(node),
            _ => None,
        }
    }

    /// The guild this event is about, for player events.
    #[must_use]
    pub fn guild_id(&self) -> Option<&str> {
        match self {
            Self::TrackStart { guild_id, .. }
            | Self::TrackEnd { guild_id, .. }
            | Self::TrackStuck { guild_id, .. }
            | Self::TrackError { guild_id, .. }
            | Self::QueueEnd { guild_id, .. }
            | Self::SocketClosed { guild_id, .. } => Some(guild_id),
            _ => None,
        }
    }
}
