//! Local position clock.
//!
//! Nodes report player positions every few seconds. In between, each player
//! runs a clock that advances its position locally. The clock also settles
//! audio filters: some filters make the node's playback position drift from
//! the logical position, so a few ticks after filters changed the player is
//! re-seeked to where it should be.

use std::{
    sync::{Mutex, Weak},
    time::Duration,
};

use tokio::{
    task::AbortHandle,
    time::{self, Instant, MissedTickBehavior},
};

use crate::{
    manager::{Command, Manager},
    player::Player,
    protocol::messages::PlayerState,
};

/// Shortest interval the clock runs at.
pub const MIN_INTERVAL: Duration = Duration::from_millis(25);

/// Ticks after a filter change at which the player is re-seeked.
pub const FILTER_SETTLE_TICKS: u32 = 3;

/// Tracks longer than this are not re-seeked after a filter change.
pub const FILTER_RESEEK_MAX_DURATION: Duration = Duration::from_secs(8 * 60);

/// Applies a state report from the node.
///
/// The position falls back to 0 if the node did not send one. The creation
/// time is only set by the first report that carries a timestamp.
pub fn apply(player: &mut Player, state: &PlayerState) {
    player.position = state.position.unwrap_or_default();
    player.connected = state.connected;
    player.ws_ping = ping(player.ws_ping, state.ping, player.connected);

    if player.created_timestamp.is_none() {
        player.created_timestamp = state.time;
    }
}

/// Voice latency from a state report.
///
/// The node reports -1 while it has no voice connection. A connected player
/// without any previous reading has an unknown latency.
fn ping(current: Option<u64>, reported: Option<i64>, connected: bool) -> Option<u64> {
    if let Some(ping) = reported.and_then(|ping| u64::try_from(ping).ok()) {
        return Some(ping);
    }

    let current = current.unwrap_or_default();
    if current == 0 && connected {
        None
    } else {
        Some(current)
    }
}

/// Interval of the clock for `player`, bounded below by [`MIN_INTERVAL`].
#[must_use]
pub fn interval(player: &Player, default: Duration) -> Duration {
    player
        .position_update_interval
        .unwrap_or(default)
        .max(MIN_INTERVAL)
}

/// Counts a tick towards settling filters.
///
/// Returns the position to re-seek to once filters have settled.
pub fn recheck_filters(player: &mut Player) -> Option<u64> {
    if player.filter_updated == 0 {
        return None;
    }

    player.filter_updated += 1;

    let duration = player
        .queue
        .current
        .as_ref()
        .and_then(|track| track.duration())
        .unwrap_or_default();
    if duration > FILTER_RESEEK_MAX_DURATION {
        player.filter_updated = 0;
        return None;
    }

    if player.filter_updated >= FILTER_SETTLE_TICKS {
        player.filter_updated = 0;
        return Some(player.position);
    }

    None
}

/// Advances the position by one tick of `interval`.
///
/// Returns the position to re-seek to once filters have settled.
pub fn tick(player: &mut Player, interval: Duration) -> Option<u64> {
    let step = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
    player.position = player.position.saturating_add(step);
    recheck_filters(player)
}

/// Spawns the clock of a player.
///
/// The clock stops by itself once the player or the manager is dropped; the
/// returned handle stops it earlier.
pub(crate) fn spawn(
    player: Weak<Mutex<Player>>,
    guild_id: String,
    interval: Duration,
    manager: Weak<dyn Manager>,
) -> AbortHandle {
    let task = tokio::spawn(async move {
        let mut ticker = time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            let Some(player) = player.upgrade() else {
                break;
            };
            let seek = tick(&mut crate::player::lock(&player), interval);

            if let Some(position) = seek {
                let Some(manager) = manager.upgrade() else {
                    break;
                };
                debug!("re-seeking {guild_id} to {position} ms after filter change");
                manager.command(&guild_id, Command::Seek(Duration::from_millis(position)));
            }
        }
    });

    task.abort_handle()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::track::Track;

    fn state(position: Option<u64>, connected: bool, ping: i64) -> PlayerState {
        PlayerState {
            time: Some(1_000),
            position,
            connected,
            ping: Some(ping),
        }
    }

    #[test]
    fn ping_rules() {
        assert_eq!(ping(None, Some(42), true), Some(42));
        assert_eq!(ping(Some(42), Some(0), true), Some(0));
        assert_eq!(ping(None, Some(-1), true), None);
        assert_eq!(ping(Some(0), Some(-1), true), None);
        assert_eq!(ping(Some(42), Some(-1), true), Some(42));
        assert_eq!(ping(None, Some(-1), false), Some(0));
        assert_eq!(ping(Some(42), None, false), Some(42));
    }

    #[test]
    fn apply_defaults_position_and_stamps_once() {
        let mut player = Player::new("1", "main");
        player.position = 5_000;

        apply(&mut player, &state(None, true, 12));
        assert_eq!(player.position, 0);
        assert!(player.connected);
        assert_eq!(player.ws_ping, Some(12));
        assert_eq!(player.created_timestamp, Some(1_000));

        let mut later = state(Some(2_000), true, 12);
        later.time = Some(9_000);
        apply(&mut player, &later);
        assert_eq!(player.position, 2_000);
        assert_eq!(player.created_timestamp, Some(1_000));
    }

    #[test]
    fn interval_has_a_floor() {
        let mut player = Player::new("1", "main");
        assert_eq!(
            interval(&player, Duration::from_millis(250)),
            Duration::from_millis(250)
        );

        player.position_update_interval = Some(Duration::from_millis(5));
        assert_eq!(interval(&player, Duration::from_millis(250)), MIN_INTERVAL);
    }

    #[test]
    fn filters_settle_after_three_ticks() {
        let mut player = Player::new("1", "main");
        player.queue.current = Some(Track::new("a").with_duration(Duration::from_secs(180)));
        player.mark_filters_updated();

        assert_eq!(tick(&mut player, Duration::from_millis(250)), None);
        assert_eq!(player.filter_updated, 2);
        assert_eq!(tick(&mut player, Duration::from_millis(250)), Some(500));
        assert_eq!(player.filter_updated, 0);
        assert_eq!(tick(&mut player, Duration::from_millis(250)), None);
        assert_eq!(player.position, 750);
    }

    #[test]
    fn unknown_duration_is_reseeked() {
        let mut player = Player::new("1", "main");
        player.filter_updated = 2;
        player.position = 1_234;

        assert_eq!(recheck_filters(&mut player), Some(1_234));
    }

    #[test]
    fn long_tracks_are_not_reseeked() {
        let mut player = Player::new("1", "main");
        player.queue.current = Some(Track::new("a").with_duration(Duration::from_secs(600)));
        player.filter_updated = 2;

        assert_eq!(recheck_filters(&mut player), None);
        assert_eq!(player.filter_updated, 0);
    }

    #[test]
    fn idle_counter_does_nothing() {
        let mut player = Player::new("1", "main");
        assert_eq!(recheck_filters(&mut player), None);
        assert_eq!(player.filter_updated, 0);
    }
}
