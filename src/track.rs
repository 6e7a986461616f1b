use std::{fmt, time::Duration};

use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};

/// A playable track as loaded from a node.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Track {
    /// Opaque track representation understood by the node.
    pub encoded: String,

    #[serde(default)]
    pub info: TrackInfo,

    /// Who queued the track, if anyone.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requester: Option<String>,
}

/// Metadata of a track.
#[serde_as]
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct TrackInfo {
    pub identifier: String,
    pub title: String,
    pub author: String,
    pub uri: Option<String>,
    pub is_stream: bool,

    /// Length of the track, unknown for streams.
    #[serde(rename = "length")]
    #[serde_as(as = "Option<DurationMilliSeconds<u64>>")]
    pub duration: Option<Duration>,
}

impl Track {
    /// Creates a track from its encoded form without metadata.
    #[must_use]
    pub fn new(encoded: impl Into<String>) -> Self {
        Self {
            encoded: encoded.into(),
            ..Self::default()
        }
    }

    /// Sets the track length.
    #[must_use]
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.info.duration = Some(duration);
        self
    }

    /// Length of the track, or `None` if unknown or a stream.
    #[must_use]
    pub fn duration(&self) -> Option<Duration> {
        if self.info.is_stream {
            None
        } else {
            self.info.duration
        }
    }
}

impl fmt::Display for Track {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.info.title.is_empty() {
            write!(f, "{}", self.encoded)
        } else {
            write!(f, "{} - {}", self.info.author, self.info.title)
        }
    }
}
