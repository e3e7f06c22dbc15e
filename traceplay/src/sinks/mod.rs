//! Sinks replayed events are delivered to: the live profiler a replay
//! run feeds.
use std::sync::{Arc, Mutex};

use thiserror::Error;

use crate::diag;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("Failed to connect to frontend socket: {0}")]
    SetupIOError(#[source] std::io::Error),
    #[error("Failed to serialize replay event: {0}")]
    DrainSerError(#[from] serde_json::Error),
    #[error("Failed to drain replay event on I/O: {0}")]
    DrainIOError(#[source] std::io::Error),
}

impl diag::DiagnosableError for SinkError {}

/// A source location handed to [`ProfilerSink::alloc_source_location`],
/// borrowed from the decoded event.
#[derive(Debug, Clone, Copy)]
pub struct SourceLocation<'a> {
    pub line: u32,
    pub file: &'a str,
    pub function: &'a str,
    pub name: &'a str,
    pub color: u32,
}

/// Opaque handle to a source location placed in the sink's arena.
/// Valid for the immediately following [`ProfilerSink::zone_begin`]
/// only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceLocationHandle(u64);

impl SourceLocationHandle {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// The profiler backend a replay run feeds.
///
/// Implementations may assume one call at a time: the playback workers
/// serialize their submissions through the scheduler handshake, and
/// the mutex in [`SharedSink`] enforces exclusivity. Thread-scoped
/// calls (`zone_begin`, `zone_end`, `message*`,
/// `set_thread_name_with_hint`) are attributed to the calling playback
/// worker's thread.
pub trait ProfilerSink: Send {
    /// Current value of the profiler's tick clock.
    fn now(&mut self) -> u64;

    /// Places a source location in the sink's arena for the
    /// immediately following [`ProfilerSink::zone_begin`].
    fn alloc_source_location(&mut self, loc: &SourceLocation) -> SourceLocationHandle;

    fn zone_begin(&mut self, time: u64, loc: SourceLocationHandle) -> Result<(), SinkError>;

    fn zone_end(&mut self, time: u64) -> Result<(), SinkError>;

    fn message(&mut self, time: u64, text: &str) -> Result<(), SinkError>;

    fn message_colored(
        &mut self,
        time: u64,
        text: &str,
        r: u8,
        g: u8,
        b: u8,
    ) -> Result<(), SinkError>;

    /// Names the calling thread in the profiler UI. `group` clusters
    /// threads originating from the same recorded process.
    fn set_thread_name_with_hint(&mut self, name: &str, group: u32) -> Result<(), SinkError>;

    fn describe(&self) -> String;
}

/// A sink shared between the scheduler and its playback workers.
pub type SharedSink = Arc<Mutex<dyn ProfilerSink>>;

mod frontend;
pub use frontend::FrontendSink;
