//! Sources recorded event streams are read from. Streams are merged by
//! the playback scheduler in the wall-clock order of their buffered
//! head event.
use std::cmp::Ordering;
use std::io::Read;
use std::path::PathBuf;

use thiserror::Error;

use crate::diag;
use traceplay_wire::{decode, Event};

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Failed to open trace file {0}: {1}")]
    SetupIOError(PathBuf, #[source] std::io::Error),
    #[error("Failed to read trace directory {0}: {1}")]
    ReadDirError(PathBuf, #[source] std::io::Error),
    #[error("Stream {0} does not begin with a Start event")]
    MissingStart(String),
}

impl diag::DiagnosableError for SourceError {
    fn diagnose(&self) -> Vec<String> {
        match self {
            SourceError::MissingStart(_) => vec![
                "the recorder writes the Start event first; the file is likely truncated at the head or not a recorded stream".to_string(),
            ],
            _ => vec![],
        }
    }
}

pub mod file;

/// One recorded stream: a byte source with a one-event lookahead.
///
/// The lookahead is filled eagerly on construction and after every
/// [`EventStream::pop`]; a decode failure (truncation, unknown tag)
/// permanently exhausts the stream.
pub struct EventStream {
    reader: Box<dyn Read + Send>,
    name: String,
    next: Option<Event>,
    start_posix_time: u64,
}

impl EventStream {
    /// Wraps a byte source positioned at its first event (the file
    /// magic, if any, must already have been consumed).
    pub fn new(reader: impl Read + Send + 'static, name: impl Into<String>) -> Self {
        let mut stream = Self {
            reader: Box::new(reader),
            name: name.into(),
            next: None,
            start_posix_time: 0,
        };
        stream.query_next_event();
        stream
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn peek(&self) -> Option<&Event> {
        self.next.as_ref()
    }

    /// Returns the buffered event and decodes the one after it.
    pub fn pop(&mut self) -> Option<Event> {
        let event = self.next.take();
        self.query_next_event();
        event
    }

    /// Wall-clock nanoseconds since the Unix epoch of the buffered
    /// event. An exhausted stream reports its start time, so it never
    /// sorts earlier than it did while live.
    pub fn nanoseconds_since_posix(&self) -> u64 {
        match &self.next {
            Some(Event::Start(start)) => start.unix_time,
            Some(event) => event.time().unwrap_or(0) + self.start_posix_time,
            None => self.start_posix_time,
        }
    }

    fn query_next_event(&mut self) {
        if self.next.is_none() {
            self.next = decode(&mut self.reader);
        }
        if let Some(Event::Start(start)) = &self.next {
            self.start_posix_time = start.unix_time;
        }
    }
}

impl PartialEq for EventStream {
    fn eq(&self, other: &Self) -> bool {
        self.nanoseconds_since_posix() == other.nanoseconds_since_posix()
    }
}

impl Eq for EventStream {}

impl PartialOrd for EventStream {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for EventStream {
    fn cmp(&self, other: &Self) -> Ordering {
        self.nanoseconds_since_posix()
            .cmp(&other.nanoseconds_since_posix())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Cursor;
    use traceplay_wire::{encode, EndZoneEvent, StartEvent, StartZoneEvent};

    fn stream_of(events: &[Event]) -> EventStream {
        let mut bytes = Vec::new();
        for event in events {
            encode(event, &mut bytes);
        }
        EventStream::new(Cursor::new(bytes), "test")
    }

    fn start(unix_time: u64) -> Event {
        StartEvent {
            host: "host".to_string(),
            unix_time,
            process_id: 42,
        }
        .into()
    }

    fn zone(time: u64) -> Event {
        StartZoneEvent {
            color: 0,
            line: 1,
            file: "file1.cpp".to_string(),
            function: "function1".to_string(),
            name: "name1".to_string(),
            thread_id: 0,
            time,
        }
        .into()
    }

    #[test]
    fn lookahead_and_pop() {
        let mut stream = stream_of(&[start(1_000), zone(100)]);
        assert!(matches!(stream.peek(), Some(Event::Start(_))));
        assert!(matches!(stream.pop(), Some(Event::Start(_))));
        assert!(matches!(stream.peek(), Some(Event::StartZone(_))));
        assert!(matches!(stream.pop(), Some(Event::StartZone(_))));
        assert_eq!(stream.peek(), None);
        assert_eq!(stream.pop(), None);
    }

    /// A buffered `Start` reports its own Unix time; later events add
    /// their relative time onto it; exhaustion falls back to it.
    #[test]
    fn wall_clock_of_buffered_head() {
        let mut stream = stream_of(&[start(1_000_000_000), zone(100)]);
        assert_eq!(stream.nanoseconds_since_posix(), 1_000_000_000);
        stream.pop();
        assert_eq!(stream.nanoseconds_since_posix(), 1_000_000_100);
        stream.pop();
        assert_eq!(stream.nanoseconds_since_posix(), 1_000_000_000);
    }

    #[test]
    fn streams_order_by_wall_clock() {
        let mut early = stream_of(&[start(1_000_000_000), zone(100)]);
        let mut late = stream_of(&[start(1_000_000_050), zone(10)]);
        early.pop();
        late.pop();
        // 1_000_000_060 < 1_000_000_100
        assert!(late < early);
    }

    /// A trailing partial event exhausts the stream after the last
    /// complete one.
    #[test]
    fn truncation_exhausts_stream() {
        let mut bytes = Vec::new();
        encode(&start(1_000), &mut bytes);
        encode(
            &EndZoneEvent {
                thread_id: 0,
                time: 10,
            }
            .into(),
            &mut bytes,
        );
        bytes.truncate(bytes.len() - 3);

        let mut stream = EventStream::new(Cursor::new(bytes), "truncated");
        assert!(matches!(stream.pop(), Some(Event::Start(_))));
        assert_eq!(stream.pop(), None);
    }
}
