//! API used between the traceplay replay backend and its frontends.
//!
//! The backend forwards each replayed profiler call as one
//! JSON-serialized [`ReplayEvent`] per line over the frontend's socket.
//! All times are profiler ticks, already rebased to the replaying
//! host's clock.

use serde::{Deserialize, Serialize};

/// A source location a zone was opened at, resolved from the recorded
/// stream.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SourceLocation {
    pub line: u32,
    pub file: String,
    pub function: String,
    /// Zone name; empty when the zone was recorded without one.
    pub name: String,
    /// 0RGB color hint; 0 means unset.
    pub color: u32,
}

/// A single replayed profiler call.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub enum ReplayEvent {
    /// A zone opened on the replaying thread at `time`.
    ZoneBegin { time: u64, loc: SourceLocation },

    /// The innermost zone on the replaying thread closed at `time`.
    ZoneEnd { time: u64 },

    /// A free-form message. `color` carries the RGB triple decoded
    /// from the recorded color, or `None` for an uncolored message.
    Message {
        time: u64,
        text: String,
        color: Option<(u8, u8, u8)>,
    },

    /// Names the replaying thread. `group` is an opaque id clustering
    /// threads that originate from the same recorded process.
    ThreadName { name: String, group: u32 },
}
