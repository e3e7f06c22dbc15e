//! One playback worker per recorded (host, process, thread) origin.
//!
//! The worker owns a single-slot mailbox: the scheduler's
//! [`PlaybackThread::submit_event`] fills it and blocks until the
//! worker has delivered the event to the sink and bumped its processed
//! counter. This rendezvous is the backpressure that keeps the
//! scheduler from feeding events out of global order.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

use traceplay_wire::Event;

use super::groups::ThreadGroupAllocator;
use super::ProcessInfo;
use crate::log;
use crate::sinks::{SharedSink, SourceLocation};

/// The profiler stores message lengths in a u16; longer payloads are
/// dropped before any sink call.
const MAX_MESSAGE_LEN: usize = u16::MAX as usize;

struct Mailbox {
    slot: Mutex<Option<(Event, u64)>>,
    received: Condvar,
    processed: Mutex<u64>,
    processed_cond: Condvar,
    stop: AtomicBool,
}

pub struct PlaybackThread {
    mailbox: Arc<Mailbox>,
    thread: Option<JoinHandle<()>>,
}

impl PlaybackThread {
    pub fn spawn(
        process: ProcessInfo,
        thread_id: u64,
        sink: SharedSink,
        groups: Arc<ThreadGroupAllocator>,
    ) -> Self {
        let mailbox = Arc::new(Mailbox {
            slot: Mutex::new(None),
            received: Condvar::new(),
            processed: Mutex::new(0),
            processed_cond: Condvar::new(),
            stop: AtomicBool::new(false),
        });

        let worker_mailbox = Arc::clone(&mailbox);
        let thread = std::thread::spawn(move || {
            worker_loop(worker_mailbox, process, thread_id, sink, groups)
        });

        Self {
            mailbox,
            thread: Some(thread),
        }
    }

    /// Hands one event to the worker and blocks until it has been
    /// delivered to the sink.
    pub fn submit_event(&self, event: Event, adjusted_time: u64) {
        let mut processed = self.mailbox.processed.lock().unwrap();
        let ticket = *processed + 1;
        {
            let mut slot = self.mailbox.slot.lock().unwrap();
            *slot = Some((event, adjusted_time));
            self.mailbox.received.notify_one();
        }

        while *processed < ticket {
            processed = self.mailbox.processed_cond.wait(processed).unwrap();
        }
    }
}

impl Drop for PlaybackThread {
    fn drop(&mut self) {
        self.mailbox.stop.store(true, Ordering::SeqCst);
        self.mailbox.received.notify_one();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

fn worker_loop(
    mailbox: Arc<Mailbox>,
    process: ProcessInfo,
    thread_id: u64,
    sink: SharedSink,
    groups: Arc<ThreadGroupAllocator>,
) {
    let mut name_set_explicitly = false;

    loop {
        let (event, adjusted_time) = {
            let mut slot = mailbox.slot.lock().unwrap();
            while slot.is_none() && !mailbox.stop.load(Ordering::SeqCst) {
                slot = mailbox.received.wait(slot).unwrap();
            }
            match slot.take() {
                Some(next) => next,
                // Stopped with an empty mailbox; nothing in flight.
                None => break,
            }
        };

        name_set_explicitly |= handle_event(&process, &event, adjusted_time, &sink, &groups);

        let mut processed = mailbox.processed.lock().unwrap();
        *processed += 1;
        mailbox.processed_cond.notify_one();
    }

    // The profiler names threads lazily: an explicit ThreadName event
    // wins, otherwise fall back to the stream origin on shutdown.
    if !name_set_explicitly {
        let name = format!("{}_{}_{}", process.host, process.process_id, thread_id);
        let group = groups.allocate(&process);
        let mut sink = sink.lock().unwrap();
        if let Err(e) = sink.set_thread_name_with_hint(&name, group) {
            log::err(format!(
                "failed to name replay thread via {}: {:?}",
                sink.describe(),
                e
            ));
        }
    }
}

/// Delivers one event to the sink. Returns whether the sink-side
/// thread name was set explicitly.
fn handle_event(
    process: &ProcessInfo,
    event: &Event,
    adjusted_time: u64,
    sink: &SharedSink,
    groups: &ThreadGroupAllocator,
) -> bool {
    let mut sink = sink.lock().unwrap();
    let result = match event {
        Event::Start(_) => {
            // The scheduler aborts on these before submission.
            log::warn("unexpected Start event reached a playback worker".to_string());
            Ok(())
        }
        Event::StartZone(e) => {
            let loc = sink.alloc_source_location(&SourceLocation {
                line: e.line,
                file: &e.file,
                function: &e.function,
                name: &e.name,
                color: e.color,
            });
            sink.zone_begin(adjusted_time, loc)
        }
        Event::EndZone(_) => sink.zone_end(adjusted_time),
        Event::Message(e) => {
            if e.message.len() > MAX_MESSAGE_LEN {
                log::warn(format!(
                    "dropping {}-byte message from {}_{} (profiler caps messages at {} bytes)",
                    e.message.len(),
                    process.host,
                    process.process_id,
                    MAX_MESSAGE_LEN
                ));
                return false;
            }
            if e.color == 0 {
                sink.message(adjusted_time, &e.message)
            } else {
                let r = ((e.color >> 16) & 0xff) as u8;
                let g = ((e.color >> 8) & 0xff) as u8;
                let b = (e.color & 0xff) as u8;
                sink.message_colored(adjusted_time, &e.message, r, g, b)
            }
        }
        Event::ThreadName(e) => {
            let name = format!(
                "{}: {}_{}_{}",
                e.name, process.host, process.process_id, e.thread_id
            );
            let group = groups.allocate(process);
            return match sink.set_thread_name_with_hint(&name, group) {
                Ok(()) => true,
                Err(e) => {
                    log::err(format!(
                        "failed to drain replay event to {}: {:?}",
                        sink.describe(),
                        e
                    ));
                    false
                }
            };
        }
    };

    if let Err(e) = result {
        log::err(format!(
            "failed to drain replay event to {}: {:?}",
            sink.describe(),
            e
        ));
    }
    false
}
