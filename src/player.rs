//! Local state of one guild's player.
//!
//! A [`Player`] is owned by the manager and shared as a [`SharedPlayer`].
//! Nodes look players up by guild id and mutate them while handling
//! `playerUpdate` and `event` frames; all fields touched by one frame are
//! updated under a single lock.

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use serde_json::Value;
use tokio::task::AbortHandle;

use crate::{protocol::rest::VoiceState, track::Track};

/// A player shared between the manager, its node and the position clock.
pub type SharedPlayer = Arc<Mutex<Player>>;

/// Locks a shared player, recovering the guard if another thread panicked
/// while holding it.
pub fn lock(player: &SharedPlayer) -> MutexGuard<'_, Player> {
    player.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Playback state of one guild.
#[derive(Debug)]
pub struct Player {
    pub guild_id: String,

    /// Identifier of the node this player is bound to.
    pub node: String,

    pub queue: Queue,

    /// Position of the current track in milliseconds, advanced locally
    /// between updates from the node.
    pub position: u64,

    pub playing: bool,
    pub paused: bool,

    /// Whether the node is connected to the voice gateway.
    pub connected: bool,

    /// Voice gateway latency in milliseconds; `None` while unknown.
    pub ws_ping: Option<u64>,

    pub volume: u16,
    pub voice: Option<VoiceState>,
    pub filters: Value,

    pub track_repeat: bool,
    pub queue_repeat: bool,

    /// Unix timestamp in milliseconds of the first state report.
    pub created_timestamp: Option<u64>,

    /// Interval of the local position clock; the manager default if `None`.
    pub position_update_interval: Option<Duration>,

    /// Start parameters to apply once the pending track starts.
    pub final_options: Option<FinalOptions>,

    /// Ticks since filters were changed; zero when no re-seek is pending.
    pub filter_updated: u32,

    pub(crate) position_clock: Option<AbortHandle>,
}

/// Start parameters deferred until the node reports the track started.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FinalOptions {
    pub pause: Option<bool>,
    pub volume: Option<u16>,

    /// Position in milliseconds the track was started at.
    pub start_time: Option<u64>,
}

impl Player {
    /// Default volume of new players.
    pub const DEFAULT_VOLUME: u16 = 100;

    #[must_use]
    pub fn new(guild_id: impl Into<String>, node: impl Into<String>) -> Self {
        Self {
            guild_id: guild_id.into(),
            node: node.into(),
            queue: Queue::default(),
            position: 0,
            playing: false,
            paused: false,
            connected: false,
            ws_ping: None,
            volume: Self::DEFAULT_VOLUME,
            voice: None,
            filters: Value::Null,
            track_repeat: false,
            queue_repeat: false,
            created_timestamp: None,
            position_update_interval: None,
            final_options: None,
            filter_updated: 0,
            position_clock: None,
        }
    }

    /// Wraps the player for sharing.
    #[must_use]
    pub fn shared(self) -> SharedPlayer {
        Arc::new(Mutex::new(self))
    }

    /// When the node first reported on this player.
    #[must_use]
    pub fn created_at(&self) -> Option<SystemTime> {
        self.created_timestamp
            .map(|millis| UNIX_EPOCH + Duration::from_millis(millis))
    }

    /// Marks filters as changed, so that the position clock re-seeks to
    /// the interpolated position after it settled.
    pub fn mark_filters_updated(&mut self) {
        self.filter_updated = 1;
    }

    /// Whether a position clock is installed and still running.
    #[must_use]
    pub fn has_position_clock(&self) -> bool {
        self.position_clock
            .as_ref()
            .is_some_and(|clock| !clock.is_finished())
    }

    /// Stops the local position clock, if any.
    pub fn cancel_position_clock(&mut self) {
        if let Some(clock) = self.position_clock.take() {
            clock.abort();
        }
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        self.cancel_position_clock();
    }
}

/// Tracks of a player: the one playing, the one before and those up next.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Queue {
    pub current: Option<Track>,
    pub previous: Option<Track>,
    tracks: VecDeque<Track>,
}

impl Queue {
    /// Appends a track to the end of the queue.
    pub fn add(&mut self, track: Track) {
        self.tracks.push_back(track);
    }

    /// Removes and returns the next track.
    pub fn shift(&mut self) -> Option<Track> {
        self.tracks.pop_front()
    }

    /// Moves on to the next track: the current track becomes the previous
    /// one and the next track, if any, becomes current.
    pub fn advance(&mut self) {
        self.previous = self.current.take();
        self.current = self.shift();
    }

    /// Number of tracks up next, not counting the current one.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn clear(&mut self) {
        self.tracks.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &Track> {
        self.tracks.iter()
    }
}

impl Extend<Track> for Queue {
    fn extend<I: IntoIterator<Item = Track>>(&mut self, iter: I) {
        self.tracks.extend(iter);
    }
}
