//! Track lifecycle state machine.
//!
//! Applies track events to a player and returns what has to happen next,
//! in order: notifications to emit and commands to send to the player. The
//! functions here never block or call out, so the caller can run them under
//! the player lock and perform the actions after releasing it.

use crate::{
    events::Event,
    manager::Command,
    player::Player,
    protocol::event::{TrackEnd, TrackEndReason, TrackException, TrackStart, TrackStuck},
    track::Track,
};

/// Something to do after a player was updated.
#[derive(Debug)]
pub enum Action {
    Emit(Event),
    Command(Command),
}

/// A track started playing.
///
/// Applies pending final options if there are any, otherwise marks the
/// player as playing.
pub fn track_start(player: &mut Player, payload: TrackStart) -> Vec<Action> {
    let track = player.queue.current.clone();

    if let Some(options) = player.final_options.take() {
        if let Some(pause) = options.pause {
            player.playing = !pause;
            player.paused = pause;
        }
        if let Some(volume) = options.volume {
            player.volume = volume;
        }
        if let Some(start_time) = options.start_time {
            player.position = start_time;
        }
    } else {
        player.playing = true;
        player.paused = false;
    }

    vec![Action::Emit(Event::TrackStart {
        guild_id: player.guild_id.clone(),
        track,
        payload,
    })]
}

/// A track stopped playing.
///
/// Decides what plays next from the end reason and the repeat modes, in
/// this order:
/// 1. load failures and cleanups always move on
/// 2. replaced tracks leave the queue alone
/// 3. track repeat keeps the track, unless it was stopped
/// 4. queue repeat moves the track to the end of the queue, unless it was
///    stopped
/// 5. otherwise the queue moves on, or ends when it is empty
pub fn track_end(player: &mut Player, payload: TrackEnd, auto_play: bool) -> Vec<Action> {
    let track = player.queue.current.clone();

    if payload.reason.is_failure() {
        player.queue.advance();
        return next(player, track, payload, auto_play);
    }

    if payload.reason == TrackEndReason::Replaced {
        return vec![Action::Emit(Event::TrackEnd {
            guild_id: player.guild_id.clone(),
            track,
            payload,
        })];
    }

    if track.is_some() && player.track_repeat {
        if payload.reason == TrackEndReason::Stopped {
            player.queue.advance();
        }
        return next(player, track, payload, auto_play);
    }

    if track.is_some() && player.queue_repeat {
        let queue = &mut player.queue;
        queue.previous.clone_from(&queue.current);
        if payload.reason != TrackEndReason::Stopped {
            if let Some(current) = queue.current.take() {
                queue.add(current);
            }
        }
        queue.current = queue.shift();
        return next(player, track, payload, auto_play);
    }

    if !player.queue.is_empty() {
        player.queue.advance();
        return next(player, track, payload, auto_play);
    }

    queue_end(player, track, payload)
}

/// A track got stuck. Observers are told before the player is stopped.
pub fn track_stuck(player: &Player, payload: TrackStuck) -> Vec<Action> {
    vec![
        Action::Emit(Event::TrackStuck {
            guild_id: player.guild_id.clone(),
            track: player.queue.current.clone(),
            payload,
        }),
        Action::Command(Command::Stop),
    ]
}

/// A track failed to play. Observers are told before the player is stopped.
pub fn track_exception(player: &Player, payload: TrackException) -> Vec<Action> {
    vec![
        Action::Emit(Event::TrackError {
            guild_id: player.guild_id.clone(),
            track: player.queue.current.clone(),
            payload,
        }),
        Action::Command(Command::Stop),
    ]
}

/// Ends the queue if the rotation left nothing current, otherwise reports
/// the ended track and starts the new current one.
fn next(player: &mut Player, track: Option<Track>, payload: TrackEnd, auto_play: bool) -> Vec<Action> {
    if player.queue.current.is_none() {
        return queue_end(player, track, payload);
    }

    let mut actions = vec![Action::Emit(Event::TrackEnd {
        guild_id: player.guild_id.clone(),
        track,
        payload,
    })];
    if auto_play {
        actions.push(Action::Command(Command::Play));
    }

    actions
}

fn queue_end(player: &mut Player, track: Option<Track>, payload: TrackEnd) -> Vec<Action> {
    debug!("queue of {} ended", player.guild_id);
    player.queue.current = None;
    player.playing = false;

    vec![Action::Emit(Event::QueueEnd {
        guild_id: player.guild_id.clone(),
        track,
        payload,
    })]
}
