//! Dispatch of inbound frames.

use std::{sync::Arc, time::Duration};

use serde_json::Value;

use super::Node;
use crate::{
    events::Event,
    manager::{Command, Manager},
    player,
    position,
    protocol::{
        messages::{EventFrame, PlayerUpdate},
        Frame, Op, TrackEvent,
    },
    sync::{self, Action},
};

impl Node {
    /// Handles a parsed frame.
    ///
    /// Frames without an `op` are ignored. Everything else is first passed
    /// on as [`Event::NodeRaw`]. Unknown or malformed frames are reported
    /// and leave the connection open.
    pub(super) fn handle_message(&self, value: Value) {
        if Op::raw(&value).is_none() {
            warn!("{} ignoring frame without op: {value}", self.identifier());
            return;
        }

        self.emit(Event::NodeRaw {
            node: self.identifier().to_owned(),
            payload: value.clone(),
        });

        let frame = match Frame::from_value(value) {
            Ok(frame) => frame,
            Err(e) => {
                self.report(e);
                return;
            }
        };

        match frame {
            Frame::Stats(stats) => self.lock_state().stats = stats,
            Frame::Ready(ready) => {
                debug!(
                    "node {} ready with session {} (resumed: {})",
                    self.identifier(),
                    ready.session_id,
                    ready.resumed
                );
                self.lock_state().session_id = Some(ready.session_id);
            }
            Frame::PlayerUpdate(update) => self.handle_player_update(update),
            Frame::Event(event) => self.handle_event(event),
        }
    }

    /// Synchronizes a player with its reported state and restarts its
    /// position clock.
    fn handle_player_update(&self, update: PlayerUpdate) {
        let Some(manager) = self.manager.upgrade() else {
            return;
        };
        // The player may have been destroyed while the frame was in flight.
        let Some(player) = manager.player(&update.guild_id) else {
            trace!("ignoring update for unknown player {}", update.guild_id);
            return;
        };

        let seek = {
            let mut guard = player::lock(&player);
            guard.cancel_position_clock();
            position::apply(&mut guard, &update.state);

            let interval = position::interval(&guard, manager.options().position_update_interval);
            guard.position_clock = Some(position::spawn(
                Arc::downgrade(&player),
                update.guild_id.clone(),
                interval,
                self.manager.clone(),
            ));

            position::recheck_filters(&mut guard)
        };

        if let Some(position) = seek {
            manager.command(&update.guild_id, Command::Seek(Duration::from_millis(position)));
        }
    }

    /// Applies a track or voice socket event to its player.
    fn handle_event(&self, frame: EventFrame) {
        let Some(guild_id) = frame.guild_id.as_deref() else {
            return;
        };
        let Some(manager) = self.manager.upgrade() else {
            return;
        };
        let Some(player) = manager.player(guild_id) else {
            trace!("ignoring event for unknown player {guild_id}");
            return;
        };

        let event = match frame.event() {
            Ok(event) => event,
            Err(e) => {
                self.report(e);
                return;
            }
        };

        let actions = {
            let mut guard = player::lock(&player);
            match event {
                TrackEvent::TrackStart(payload) => sync::track_start(&mut guard, payload),
                TrackEvent::TrackEnd(payload) => {
                    sync::track_end(&mut guard, payload, manager.options().auto_play)
                }
                TrackEvent::TrackStuck(payload) => sync::track_stuck(&guard, payload),
                TrackEvent::TrackException(payload) => sync::track_exception(&guard, payload),
                TrackEvent::WebSocketClosed(_) => vec![Action::Emit(Event::SocketClosed {
                    guild_id: guild_id.to_owned(),
                    payload: frame.payload.clone(),
                })],
            }
        };

        perform(manager.as_ref(), guild_id, actions);
    }
}

/// Performs actions in order, after the player lock was released.
fn perform(manager: &dyn Manager, guild_id: &str, actions: Vec<Action>) {
    for action in actions {
        match action {
            Action::Emit(event) => manager.emit(event),
            Action::Command(command) => manager.command(guild_id, command),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tokio::time;

    use super::*;
    use crate::{
        config::{ManagerOptions, NodeOptions},
        manager::NodeManager,
    };

    fn update(position: u64) -> Value {
        json!({
            "op": "playerUpdate",
            "guildId": "1",
            "state": { "time": 1, "position": position, "connected": true, "ping": 1 }
        })
    }

    #[tokio::test(start_paused = true)]
    async fn player_update_replaces_position_clock() {
        let (manager, _events) = NodeManager::new(ManagerOptions::new("1")).unwrap();
        let node = manager.create_node(NodeOptions::new("localhost")).unwrap();
        let player = manager.create_player("1", "localhost").unwrap();
        player::lock(&player).position_update_interval = Some(Duration::from_millis(100));

        node.handle_message(update(1_000));
        let first = player::lock(&player).position_clock.clone().unwrap();

        node.handle_message(update(5_000));
        time::sleep(Duration::from_millis(150)).await;

        assert!(first.is_finished());
        assert!(player::lock(&player).has_position_clock());
        assert_eq!(player::lock(&player).position, 5_100);

        time::sleep(Duration::from_millis(100)).await;
        assert_eq!(player::lock(&player).position, 5_200);
    }

    #[tokio::test]
    async fn update_for_unknown_player_is_ignored() {
        let (manager, _events) = NodeManager::new(ManagerOptions::new("1")).unwrap();
        let node = manager.create_node(NodeOptions::new("localhost")).unwrap();

        node.handle_message(update(1_000));

        assert!(manager.player("1").is_none());
    }
}
