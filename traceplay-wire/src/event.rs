//! The closed set of trace events a recorded stream is made of.
//!
//! Every variant except [`Start`](Event::Start) carries the id of the
//! emitting thread and the nanoseconds elapsed since the emitting
//! process's monotonic reference start. [`Start`](Event::Start) appears
//! exactly once, at the head of a stream, and anchors those relative
//! times to the Unix epoch.

/// Integer tag of an [`Event`] variant as it appears on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum EventKind {
    /// Sentinel for a decode that failed before a tag was consumed.
    /// Never written to a stream.
    None = -1,
    Start = 0,
    StartZone = 1,
    EndZone = 2,
    Message = 3,
    ThreadName = 4,
}

impl EventKind {
    /// Maps a wire tag back to its kind. Unknown tags yield `None`.
    pub fn from_tag(tag: u32) -> Option<Self> {
        match tag {
            0 => Some(Self::Start),
            1 => Some(Self::StartZone),
            2 => Some(Self::EndZone),
            3 => Some(Self::Message),
            4 => Some(Self::ThreadName),
            _ => None,
        }
    }
}

/// Head-of-stream event: identifies the emitting process and anchors
/// all subsequent relative timestamps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartEvent {
    /// Name of the emitting host.
    pub host: String,
    /// Nanoseconds since the Unix epoch at the process's reference
    /// start.
    pub unix_time: u64,
    pub process_id: u64,
}

/// Opens a zone on a thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartZoneEvent {
    pub color: u32,
    pub line: u32,
    pub file: String,
    pub function: String,
    pub name: String,
    pub thread_id: u64,
    pub time: u64,
}

/// Closes the innermost open zone on a thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndZoneEvent {
    pub thread_id: u64,
    pub time: u64,
}

/// Free-form text attached to the timeline. A `color` of 0 means
/// "no color".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageEvent {
    pub message: String,
    pub color: u32,
    pub thread_id: u64,
    pub time: u64,
}

/// Names the emitting thread in the profiler UI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadNameEvent {
    pub name: String,
    pub thread_id: u64,
    pub time: u64,
}

/// A single trace event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Start(StartEvent),
    StartZone(StartZoneEvent),
    EndZone(EndZoneEvent),
    Message(MessageEvent),
    ThreadName(ThreadNameEvent),
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Start(_) => EventKind::Start,
            Event::StartZone(_) => EventKind::StartZone,
            Event::EndZone(_) => EventKind::EndZone,
            Event::Message(_) => EventKind::Message,
            Event::ThreadName(_) => EventKind::ThreadName,
        }
    }

    /// Id of the emitting thread. `None` for [`Event::Start`], which is
    /// process-scoped.
    pub fn thread_id(&self) -> Option<u64> {
        match self {
            Event::Start(_) => None,
            Event::StartZone(e) => Some(e.thread_id),
            Event::EndZone(e) => Some(e.thread_id),
            Event::Message(e) => Some(e.thread_id),
            Event::ThreadName(e) => Some(e.thread_id),
        }
    }

    /// Nanoseconds since the emitting process's reference start.
    /// `None` for [`Event::Start`], which carries an absolute Unix time
    /// instead.
    pub fn time(&self) -> Option<u64> {
        match self {
            Event::Start(_) => None,
            Event::StartZone(e) => Some(e.time),
            Event::EndZone(e) => Some(e.time),
            Event::Message(e) => Some(e.time),
            Event::ThreadName(e) => Some(e.time),
        }
    }
}

impl From<StartEvent> for Event {
    fn from(e: StartEvent) -> Self {
        Event::Start(e)
    }
}

impl From<StartZoneEvent> for Event {
    fn from(e: StartZoneEvent) -> Self {
        Event::StartZone(e)
    }
}

impl From<EndZoneEvent> for Event {
    fn from(e: EndZoneEvent) -> Self {
        Event::EndZone(e)
    }
}

impl From<MessageEvent> for Event {
    fn from(e: MessageEvent) -> Self {
        Event::Message(e)
    }
}

impl From<ThreadNameEvent> for Event {
    fn from(e: ThreadNameEvent) -> Self {
        Event::ThreadName(e)
    }
}
