//! Client side connection manager for Lavalink-compatible audio backends.
//!
//! * [`node`]: control websocket, reconnects and the REST surface of one backend
//! * [`manager`]: registry of nodes and players, and the context nodes report to
//! * [`sync`]: track lifecycle state machine
//! * [`position`]: local position clock and filter settling
//! * [`protocol`]: wire formats of the backend
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

#[macro_use]
extern crate log;

pub mod config;
pub mod error;
pub mod events;
pub mod http;
pub mod manager;
pub mod node;
pub mod player;
pub mod position;
pub mod protocol;
pub mod sync;
pub mod track;
