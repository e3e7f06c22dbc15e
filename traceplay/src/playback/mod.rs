//! Replay orchestration: merges recorded streams in wall-clock order,
//! rebases their timestamps onto the local profiler's clock, and
//! drives one playback worker per recorded thread.
use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::Receiver;
use thiserror::Error;

use crate::diag;
use crate::log;
use crate::sinks::SharedSink;
use crate::sources::{EventStream, SourceError};
use traceplay_wire::Event;

pub mod groups;
mod thread;

use groups::ThreadGroupAllocator;
use thread::PlaybackThread;

#[derive(Debug, Error)]
pub enum PlaybackError {
    #[error("Stream {0} carries a Start event past the head of the stream")]
    UnexpectedStart(String),
}

impl diag::DiagnosableError for PlaybackError {
    fn diagnose(&self) -> Vec<String> {
        match self {
            PlaybackError::UnexpectedStart(_) => vec![
                "the file may be a concatenation of several recordings; split it and replay the parts together instead".to_string(),
            ],
        }
    }
}

/// Identity of a recorded process, from the stream's `Start` event.
/// Tags every event of that stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProcessInfo {
    pub host: String,
    pub process_id: u64,
}

/// Rebase from recorded wall-clock nanoseconds onto the local
/// profiler's tick clock.
#[derive(Debug, Clone, Copy)]
pub struct ReplayClock {
    /// Profiler tick value the replay starts at.
    pub origin: u64,
    /// Profiler ticks per nanosecond.
    pub scale: f64,
}

impl ReplayClock {
    /// Measures the profiler's tick rate by bracketing a one-second
    /// sleep, then captures the replay origin. The measurement is
    /// noisy; it is treated as a constant for the whole run.
    pub fn calibrate(sink: &SharedSink) -> Self {
        let start = sink.lock().unwrap().now();
        std::thread::sleep(Duration::from_secs(1));
        let end = sink.lock().unwrap().now();
        Self {
            origin: end,
            scale: (end - start) as f64 / 1e9,
        }
    }

    /// Profiler tick timestamp of an event at wall-clock `wall`, where
    /// `min_unix_time` maps onto the origin. Only the delta goes
    /// through f64; its 53 mantissa bits keep nanosecond grain over
    /// multi-day spans.
    fn rebase(&self, wall: u64, min_unix_time: u64) -> u64 {
        self.origin + (wall.saturating_sub(min_unix_time) as f64 * self.scale) as u64
    }
}

/// Counters reported after a replay run.
#[derive(Debug, Default)]
pub struct Stats {
    /// Streams drained to exhaustion.
    pub streams: usize,
    /// Events dispatched to playback workers.
    pub events: u64,
}

/// A stream admitted to the scheduler, tagged with the identity from
/// its consumed `Start` event.
struct ActiveStream {
    stream: EventStream,
    process: ProcessInfo,
}

impl PartialEq for ActiveStream {
    fn eq(&self, other: &Self) -> bool {
        self.stream == other.stream
    }
}

impl Eq for ActiveStream {}

impl PartialOrd for ActiveStream {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ActiveStream {
    fn cmp(&self, other: &Self) -> Ordering {
        self.stream.cmp(&other.stream)
    }
}

/// Owns the stream set and the playback workers, and runs the merge
/// loop.
pub struct Playback {
    streams: BinaryHeap<Reverse<ActiveStream>>,
    threads: HashMap<ProcessInfo, HashMap<u64, PlaybackThread>>,
    groups: Arc<ThreadGroupAllocator>,
    min_unix_time: u64,
}

impl Playback {
    pub fn new() -> Self {
        Self {
            streams: BinaryHeap::new(),
            threads: HashMap::new(),
            groups: Arc::new(ThreadGroupAllocator::new()),
            min_unix_time: u64::MAX,
        }
    }

    /// Consumes the stream's leading `Start` event and enqueues the
    /// stream. Streams that do not begin with `Start` are rejected.
    pub fn add_stream(&mut self, mut stream: EventStream) -> Result<(), SourceError> {
        match stream.pop() {
            Some(Event::Start(start)) => {
                self.min_unix_time = self.min_unix_time.min(start.unix_time);
                let process = ProcessInfo {
                    host: start.host,
                    process_id: start.process_id,
                };
                self.streams.push(Reverse(ActiveStream { stream, process }));
                Ok(())
            }
            _ => Err(SourceError::MissingStart(stream.name().to_string())),
        }
    }

    pub fn stream_count(&self) -> usize {
        self.streams.len()
    }

    /// Replays every stream into `sink` in global wall-clock order.
    ///
    /// Dispatch blocks on each worker's acknowledgement, so events
    /// reach the sink one at a time, in non-decreasing rebased time,
    /// and in source order per recorded thread. `trace` logs each
    /// dispatch; `halt` aborts the loop between dispatches.
    pub fn play(
        &mut self,
        sink: &SharedSink,
        clock: ReplayClock,
        trace: bool,
        halt: Option<&Receiver<()>>,
    ) -> Result<Stats, PlaybackError> {
        let mut stats = Stats::default();

        while let Some(Reverse(mut active)) = self.streams.pop() {
            if let Some(halt) = halt {
                if halt.try_recv().is_ok() {
                    log::warn("replay interrupted; shutting down".to_string());
                    break;
                }
            }

            let wall = active.stream.nanoseconds_since_posix();
            let event = match active.stream.pop() {
                Some(event) => event,
                None => {
                    stats.streams += 1;
                    continue;
                }
            };

            if let Event::Start(_) = event {
                return Err(PlaybackError::UnexpectedStart(
                    active.stream.name().to_string(),
                ));
            }

            let local_time = clock.rebase(wall, self.min_unix_time);
            if trace {
                log::trace(format!(
                    "{}: {:?} @{} -> {}",
                    active.stream.name(),
                    event.kind(),
                    wall,
                    local_time
                ));
            }

            // Start events never reach this point, so a thread id is
            // always present.
            let thread_id = event.thread_id().unwrap_or(0);
            let groups = &self.groups;
            let worker = self
                .threads
                .entry(active.process.clone())
                .or_default()
                .entry(thread_id)
                .or_insert_with(|| {
                    PlaybackThread::spawn(
                        active.process.clone(),
                        thread_id,
                        Arc::clone(sink),
                        Arc::clone(groups),
                    )
                });
            worker.submit_event(event, local_time);
            stats.events += 1;
            if !trace && stats.events % 10_000 == 0 {
                log::cont_status("Replaying", format!("{} event(s)...", stats.events));
            }

            if active.stream.peek().is_some() {
                self.streams.push(Reverse(active));
            } else {
                stats.streams += 1;
            }
        }

        Ok(stats)
    }
}

impl Default for Playback {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::sinks::{ProfilerSink, SinkError, SourceLocation, SourceLocationHandle};
    use std::io::Cursor;
    use std::sync::Mutex;
    use std::thread::ThreadId;
    use traceplay_wire::{
        encode, EndZoneEvent, MessageEvent, StartEvent, StartZoneEvent, ThreadNameEvent,
    };

    #[derive(Debug, Clone, PartialEq)]
    enum SinkCall {
        ZoneBegin {
            time: u64,
            zone: String,
            by: ThreadId,
        },
        ZoneEnd {
            time: u64,
            by: ThreadId,
        },
        Message {
            time: u64,
            text: String,
            color: Option<(u8, u8, u8)>,
        },
        ThreadName {
            name: String,
            group: u32,
        },
    }

    impl SinkCall {
        fn time(&self) -> Option<u64> {
            match self {
                SinkCall::ZoneBegin { time, .. } => Some(*time),
                SinkCall::ZoneEnd { time, .. } => Some(*time),
                SinkCall::Message { time, .. } => Some(*time),
                SinkCall::ThreadName { .. } => None,
            }
        }
    }

    /// Records every profiler call for later inspection.
    struct RecordingSink {
        calls: Arc<Mutex<Vec<SinkCall>>>,
        pending: Option<(u64, String)>,
        next_location: u64,
        ticks: u64,
    }

    impl ProfilerSink for RecordingSink {
        fn now(&mut self) -> u64 {
            self.ticks += 1;
            self.ticks
        }

        fn alloc_source_location(&mut self, loc: &SourceLocation) -> SourceLocationHandle {
            self.next_location += 1;
            self.pending = Some((self.next_location, loc.name.to_string()));
            SourceLocationHandle::new(self.next_location)
        }

        fn zone_begin(&mut self, time: u64, loc: SourceLocationHandle) -> Result<(), SinkError> {
            let zone = match self.pending.take() {
                Some((handle, zone)) if handle == loc.raw() => zone,
                _ => String::new(),
            };
            self.calls.lock().unwrap().push(SinkCall::ZoneBegin {
                time,
                zone,
                by: std::thread::current().id(),
            });
            Ok(())
        }

        fn zone_end(&mut self, time: u64) -> Result<(), SinkError> {
            self.calls.lock().unwrap().push(SinkCall::ZoneEnd {
                time,
                by: std::thread::current().id(),
            });
            Ok(())
        }

        fn message(&mut self, time: u64, text: &str) -> Result<(), SinkError> {
            self.calls.lock().unwrap().push(SinkCall::Message {
                time,
                text: text.to_string(),
                color: None,
            });
            Ok(())
        }

        fn message_colored(
            &mut self,
            time: u64,
            text: &str,
            r: u8,
            g: u8,
            b: u8,
        ) -> Result<(), SinkError> {
            self.calls.lock().unwrap().push(SinkCall::Message {
                time,
                text: text.to_string(),
                color: Some((r, g, b)),
            });
            Ok(())
        }

        fn set_thread_name_with_hint(&mut self, name: &str, group: u32) -> Result<(), SinkError> {
            self.calls.lock().unwrap().push(SinkCall::ThreadName {
                name: name.to_string(),
                group,
            });
            Ok(())
        }

        fn describe(&self) -> String {
            "recording test sink".to_string()
        }
    }

    fn recording_sink() -> (SharedSink, Arc<Mutex<Vec<SinkCall>>>) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let sink: SharedSink = Arc::new(Mutex::new(RecordingSink {
            calls: Arc::clone(&calls),
            pending: None,
            next_location: 0,
            ticks: 0,
        }));
        (sink, calls)
    }

    const CLOCK: ReplayClock = ReplayClock {
        origin: 500,
        scale: 1.0,
    };

    fn stream_of(events: &[Event], name: &str) -> EventStream {
        let mut bytes = Vec::new();
        for event in events {
            encode(event, &mut bytes);
        }
        EventStream::new(Cursor::new(bytes), name)
    }

    fn start(host: &str, unix_time: u64, process_id: u64) -> Event {
        StartEvent {
            host: host.to_string(),
            unix_time,
            process_id,
        }
        .into()
    }

    fn zone(name: &str, thread_id: u64, time: u64) -> Event {
        StartZoneEvent {
            color: 0,
            line: 1,
            file: "file1.cpp".to_string(),
            function: "function1".to_string(),
            name: name.to_string(),
            thread_id,
            time,
        }
        .into()
    }

    fn zone_end(thread_id: u64, time: u64) -> Event {
        EndZoneEvent { thread_id, time }.into()
    }

    fn message(text: &str, color: u32, thread_id: u64, time: u64) -> Event {
        MessageEvent {
            message: text.to_string(),
            color,
            thread_id,
            time,
        }
        .into()
    }

    #[test]
    fn empty_replay_returns_immediately() {
        let (sink, calls) = recording_sink();
        let mut playback = Playback::new();
        let stats = playback.play(&sink, CLOCK, false, None).unwrap();
        assert_eq!(stats.events, 0);
        assert_eq!(stats.streams, 0);
        assert!(calls.lock().unwrap().is_empty());
    }

    /// Two streams interleave by absolute wall time, not by file order:
    /// host2's zone at 1_000_000_060 precedes host1's at 1_000_000_100.
    #[test]
    fn streams_merge_in_wall_clock_order() {
        let (sink, calls) = recording_sink();
        let mut playback = Playback::new();
        playback
            .add_stream(stream_of(
                &[start("host1", 1_000_000_000, 1), zone("a", 0, 100)],
                "a",
            ))
            .unwrap();
        playback
            .add_stream(stream_of(
                &[start("host2", 1_000_000_050, 2), zone("b", 0, 10)],
                "b",
            ))
            .unwrap();

        let stats = playback.play(&sink, CLOCK, false, None).unwrap();
        assert_eq!(stats.events, 2);
        assert_eq!(stats.streams, 2);

        let calls = calls.lock().unwrap();
        let zones: Vec<(String, u64)> = calls
            .iter()
            .filter_map(|call| match call {
                SinkCall::ZoneBegin { time, zone, .. } => Some((zone.clone(), *time)),
                _ => None,
            })
            .collect();
        assert_eq!(
            zones,
            vec![("b".to_string(), 560), ("a".to_string(), 600)]
        );
    }

    /// `local_time = origin + (wall - min_unix_time) * scale`.
    #[test]
    fn rebase_is_anchored_at_min_unix_time() {
        let (sink, calls) = recording_sink();
        let mut playback = Playback::new();
        playback
            .add_stream(stream_of(
                &[start("host", 1_000_000_000, 42), zone("z", 0, 100)],
                "s",
            ))
            .unwrap();
        playback.play(&sink, CLOCK, false, None).unwrap();

        let calls = calls.lock().unwrap();
        assert_eq!(calls[0].time(), Some(600));
    }

    /// With distinct wall times everywhere, the sink sees a strictly
    /// ascending timeline across all streams and threads.
    #[test]
    fn sink_sees_ascending_timeline() {
        let (sink, calls) = recording_sink();
        let mut playback = Playback::new();
        playback
            .add_stream(stream_of(
                &[
                    start("host1", 1_000_000_000, 1),
                    zone("a0", 0, 100),
                    zone("a1", 1, 150),
                    zone_end(0, 200),
                    zone_end(1, 250),
                ],
                "a",
            ))
            .unwrap();
        playback
            .add_stream(stream_of(
                &[
                    start("host2", 1_000_000_000, 2),
                    zone("b0", 0, 120),
                    zone_end(0, 170),
                    message("done", 0, 0, 260),
                ],
                "b",
            ))
            .unwrap();

        let stats = playback.play(&sink, CLOCK, false, None).unwrap();
        assert_eq!(stats.events, 7);

        let calls = calls.lock().unwrap();
        let times: Vec<u64> = calls.iter().filter_map(SinkCall::time).collect();
        assert_eq!(times.len(), 7);
        assert!(times.windows(2).all(|pair| pair[0] < pair[1]));
    }

    /// Per recorded thread, delivery order equals source order even
    /// when the merge interleaves other threads in between.
    #[test]
    fn per_thread_delivery_keeps_source_order() {
        let (sink, calls) = recording_sink();
        let mut playback = Playback::new();
        playback
            .add_stream(stream_of(
                &[
                    start("host", 1_000_000_000, 1),
                    zone("t0-first", 0, 100),
                    zone("t1-first", 1, 110),
                    zone_end(0, 120),
                    zone_end(1, 130),
                    zone("t0-second", 0, 140),
                    zone_end(0, 150),
                ],
                "s",
            ))
            .unwrap();
        playback.play(&sink, CLOCK, false, None).unwrap();

        let calls = calls.lock().unwrap();
        // The worker thread that played "t0-first" must have played
        // exactly the tid-0 subsequence, in order.
        let t0 = calls
            .iter()
            .find_map(|call| match call {
                SinkCall::ZoneBegin { zone, by, .. } if zone == "t0-first" => Some(*by),
                _ => None,
            })
            .unwrap();
        let by_t0: Vec<&SinkCall> = calls
            .iter()
            .filter(|call| match call {
                SinkCall::ZoneBegin { by, .. } | SinkCall::ZoneEnd { by, .. } => *by == t0,
                _ => false,
            })
            .collect();
        assert_eq!(by_t0.len(), 4);
        assert!(matches!(by_t0[0], SinkCall::ZoneBegin { zone, .. } if zone == "t0-first"));
        assert!(matches!(by_t0[1], SinkCall::ZoneEnd { .. }));
        assert!(matches!(by_t0[2], SinkCall::ZoneBegin { zone, .. } if zone == "t0-second"));
        assert!(matches!(by_t0[3], SinkCall::ZoneEnd { .. }));
    }

    /// Messages beyond the profiler's u16 length cap are dropped;
    /// surrounding events still arrive.
    #[test]
    fn oversized_messages_are_dropped() {
        let (sink, calls) = recording_sink();
        let mut playback = Playback::new();
        playback
            .add_stream(stream_of(
                &[
                    start("host", 1_000_000_000, 1),
                    zone("z", 0, 100),
                    message(&"x".repeat(70_000), 0, 0, 150),
                    zone_end(0, 200),
                ],
                "s",
            ))
            .unwrap();
        playback.play(&sink, CLOCK, false, None).unwrap();

        let calls = calls.lock().unwrap();
        assert!(!calls
            .iter()
            .any(|call| matches!(call, SinkCall::Message { .. })));
        assert!(calls
            .iter()
            .any(|call| matches!(call, SinkCall::ZoneBegin { .. })));
        assert!(calls
            .iter()
            .any(|call| matches!(call, SinkCall::ZoneEnd { .. })));
    }

    /// Message colors survive to the sink, decoded to RGB.
    #[test]
    fn message_colors_reach_the_sink() {
        let (sink, calls) = recording_sink();
        let mut playback = Playback::new();
        playback
            .add_stream(stream_of(
                &[
                    start("host", 1_000_000_000, 1),
                    message("plain", 0, 0, 100),
                    message("colored", 0x00_12_34_56, 0, 200),
                ],
                "s",
            ))
            .unwrap();
        playback.play(&sink, CLOCK, false, None).unwrap();

        let calls = calls.lock().unwrap();
        let colors: Vec<Option<(u8, u8, u8)>> = calls
            .iter()
            .filter_map(|call| match call {
                SinkCall::Message { color, .. } => Some(*color),
                _ => None,
            })
            .collect();
        assert_eq!(colors, vec![None, Some((0x12, 0x34, 0x56))]);
    }

    /// A Start event past the head of a stream aborts the replay;
    /// events preceding it have already been delivered.
    #[test]
    fn mid_stream_start_aborts() {
        let (sink, calls) = recording_sink();
        let mut playback = Playback::new();
        playback
            .add_stream(stream_of(
                &[
                    start("host", 1_000_000_000, 1),
                    zone("z", 0, 100),
                    start("host", 2_000_000_000, 1),
                    zone_end(0, 200),
                ],
                "s",
            ))
            .unwrap();

        let result = playback.play(&sink, CLOCK, false, None);
        assert!(matches!(result, Err(PlaybackError::UnexpectedStart(_))));

        let calls = calls.lock().unwrap();
        assert!(calls
            .iter()
            .any(|call| matches!(call, SinkCall::ZoneBegin { .. })));
        assert!(!calls
            .iter()
            .any(|call| matches!(call, SinkCall::ZoneEnd { .. })));
    }

    #[test]
    fn streams_without_start_are_rejected() {
        let mut playback = Playback::new();
        assert!(matches!(
            playback.add_stream(stream_of(&[zone("z", 0, 100)], "headless")),
            Err(SourceError::MissingStart(_))
        ));
        assert!(matches!(
            playback.add_stream(stream_of(&[], "empty")),
            Err(SourceError::MissingStart(_))
        ));
        assert_eq!(playback.stream_count(), 0);
    }

    /// An explicit ThreadName event scopes the name to its origin and
    /// suppresses the fallback name on shutdown.
    #[test]
    fn explicit_thread_names_win() {
        let (sink, calls) = recording_sink();
        let mut playback = Playback::new();
        playback
            .add_stream(stream_of(
                &[
                    start("host", 1_000_000_000, 42),
                    ThreadNameEvent {
                        name: "thread1".to_string(),
                        thread_id: 0,
                        time: 100,
                    }
                    .into(),
                ],
                "s",
            ))
            .unwrap();
        playback.play(&sink, CLOCK, false, None).unwrap();
        drop(playback);

        let calls = calls.lock().unwrap();
        let names: Vec<(String, u32)> = calls
            .iter()
            .filter_map(|call| match call {
                SinkCall::ThreadName { name, group } => Some((name.clone(), *group)),
                _ => None,
            })
            .collect();
        assert_eq!(names, vec![("thread1: host_42_0".to_string(), 2)]);
    }

    /// Unnamed threads fall back to their origin triple on shutdown.
    #[test]
    fn unnamed_threads_get_origin_names_on_shutdown() {
        let (sink, calls) = recording_sink();
        let mut playback = Playback::new();
        playback
            .add_stream(stream_of(
                &[start("host", 1_000_000_000, 42), zone("z", 7, 100)],
                "s",
            ))
            .unwrap();
        playback.play(&sink, CLOCK, false, None).unwrap();
        drop(playback);

        let calls = calls.lock().unwrap();
        let names: Vec<(String, u32)> = calls
            .iter()
            .filter_map(|call| match call {
                SinkCall::ThreadName { name, group } => Some((name.clone(), *group)),
                _ => None,
            })
            .collect();
        assert_eq!(names, vec![("host_42_7".to_string(), 2)]);
    }
}
