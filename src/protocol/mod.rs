//! Wire protocol of the backend.
//!
//! * [`messages`]: frames on the control websocket
//! * [`event`]: track lifecycle events carried by `event` frames
//! * [`stats`]: node statistics
//! * [`rest`]: REST request and response bodies

pub mod event;
pub mod messages;
pub mod rest;
pub mod stats;

pub use event::{TrackEndReason, TrackEvent};
pub use messages::{Frame, Op};
pub use stats::Stats;
