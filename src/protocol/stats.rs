use serde::{Deserialize, Serialize};

/// Statistics of a node, as sent in `stats` frames and returned by the
/// stats endpoint.
///
/// A new snapshot replaces the previous one wholesale.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Stats {
    /// Players connected to the node.
    pub players: u32,

    /// Players currently playing a track.
    pub playing_players: u32,

    /// Uptime of the node in milliseconds.
    pub uptime: u64,

    pub memory: Memory,

    pub cpu: Cpu,

    /// Audio frame statistics; absent when no player is active.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frame_stats: Option<FrameStats>,
}

/// Memory usage of the node in bytes.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Memory {
    pub free: u64,
    pub used: u64,
    pub allocated: u64,
    pub reservable: u64,
}

/// Processor usage of the node.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Cpu {
    pub cores: u32,
    pub system_load: f64,

    /// Load caused by the backend process itself.
    #[serde(rename = "lavalinkLoad", alias = "backendLoad")]
    pub backend_load: f64,
}

/// Audio frames per minute.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FrameStats {
    pub sent: i64,
    pub nulled: i64,
    pub deficit: i64,
}
