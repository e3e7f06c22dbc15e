//! Emitter-side trace recording.
//!
//! Each emitting thread appends events to its own [`LocalRecorder`]
//! buffer; [`LocalRecorder::flush`] hands the buffer to a [`Recorder`],
//! whose single serializer thread encodes the events and passes the
//! bytes to a user-supplied output callback. The callback receives the
//! trace file magic and the leading `Start` event first, then one call
//! per drained batch.
//!
//! A process-wide default recorder is available through the free
//! functions ([`zone_start`], [`zone_end`], [`message`],
//! [`name_thread`], [`flush`], [`set_flush_callback`]); library users
//! that want explicit lifetimes can construct their own [`Recorder`]
//! and [`LocalRecorder`] instead.

use std::cell::RefCell;
use std::fs;
use std::io::Write;
use std::mem;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use lazy_static::lazy_static;
use nix::libc;
use thiserror::Error;

use traceplay_wire::{
    encode, EndZoneEvent, Event, MessageEvent, StartEvent, StartZoneEvent, ThreadNameEvent, MAGIC,
};

#[derive(Debug, Error)]
pub enum RecorderError {
    #[error("An output callback is already installed")]
    OutputAlreadySet,
    #[error("Failed to open trace output file: {0}")]
    OutputIo(#[from] std::io::Error),
}

/// Wall and monotonic clock pair captured once, on first use. All
/// event times are nanoseconds relative to `start`; `unix_time` anchors
/// them to the Unix epoch in the stream's `Start` event.
struct ReferenceClocks {
    unix_time: u64,
    start: Instant,
}

lazy_static! {
    static ref REFERENCE: ReferenceClocks = ReferenceClocks {
        unix_time: SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0),
        start: Instant::now(),
    };
}

fn now_nanos() -> u64 {
    REFERENCE.start.elapsed().as_nanos() as u64
}

/// The current OS thread handle reinterpreted as an opaque 64-bit id.
fn current_thread_id() -> u64 {
    unsafe { libc::pthread_self() as u64 }
}

fn host_name() -> String {
    let mut buffer = [0u8; 256];
    nix::unistd::gethostname(&mut buffer)
        .ok()
        .and_then(|name| name.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| "unknown".to_string())
}

struct SubmissionQueue {
    data: Vec<Event>,
    submitted: u64,
}

struct Shared {
    queue: Mutex<SubmissionQueue>,
    queue_cond: Condvar,
    flushed: Mutex<u64>,
    flushed_cond: Condvar,
    stop: AtomicBool,
}

struct Inner {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
    active: AtomicBool,
}

/// The global serializer: a submission queue drained by one background
/// thread into the output callback. Cheap to clone; the serializer
/// thread is stopped and joined when the last clone drops.
#[derive(Clone)]
pub struct Recorder {
    inner: Arc<Inner>,
}

impl Recorder {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                shared: Arc::new(Shared {
                    queue: Mutex::new(SubmissionQueue {
                        data: Vec::with_capacity(1024),
                        submitted: 0,
                    }),
                    queue_cond: Condvar::new(),
                    flushed: Mutex::new(0),
                    flushed_cond: Condvar::new(),
                    stop: AtomicBool::new(false),
                }),
                worker: Mutex::new(None),
                active: AtomicBool::new(false),
            }),
        }
    }

    /// Installs the output callback and starts the serializer thread.
    ///
    /// Writes the trace file magic followed by the stream's single
    /// `Start` event (host name, reference Unix time, process id) as
    /// the first callback invocation. One-shot: a second call fails
    /// with [`RecorderError::OutputAlreadySet`].
    pub fn set_output<F>(&self, mut output: F) -> Result<(), RecorderError>
    where
        F: FnMut(&[u8]) + Send + 'static,
    {
        if self.inner.active.swap(true, Ordering::SeqCst) {
            return Err(RecorderError::OutputAlreadySet);
        }

        let mut header = MAGIC.to_vec();
        encode(
            &Event::Start(StartEvent {
                host: host_name(),
                unix_time: REFERENCE.unix_time,
                process_id: std::process::id() as u64,
            }),
            &mut header,
        );
        output(&header);

        let shared = Arc::clone(&self.inner.shared);
        let handle = std::thread::spawn(move || serializer_loop(shared, output));
        *self.inner.worker.lock().unwrap() = Some(handle);
        Ok(())
    }

    /// Whether an output callback has been installed.
    pub fn is_active(&self) -> bool {
        self.inner.active.load(Ordering::SeqCst)
    }

    /// Moves `data` into the submission queue (swap when the queue is
    /// empty, append-and-clear otherwise), wakes the serializer, and
    /// returns the submission counter to pass to [`Recorder::flush_to`].
    /// The caller's vector keeps its capacity.
    pub fn send_record(&self, data: &mut Vec<Event>) -> u64 {
        let shared = &self.inner.shared;
        let mut queue = shared.queue.lock().unwrap();
        queue.submitted += data.len() as u64;
        if queue.data.is_empty() {
            mem::swap(&mut queue.data, data);
        } else {
            queue.data.append(data);
        }
        shared.queue_cond.notify_one();
        queue.submitted
    }

    /// Blocks until the serializer has handed at least `ticket`
    /// submitted events to the output callback.
    pub fn flush_to(&self, ticket: u64) {
        let shared = &self.inner.shared;
        let mut flushed = shared.flushed.lock().unwrap();
        while *flushed < ticket {
            flushed = shared.flushed_cond.wait(flushed).unwrap();
        }
    }
}

impl Default for Recorder {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.shared.stop.store(true, Ordering::SeqCst);
        self.shared.queue_cond.notify_all();
        if let Some(worker) = self.worker.lock().unwrap().take() {
            let _ = worker.join();
        }
    }
}

fn serializer_loop<F>(shared: Arc<Shared>, mut output: F)
where
    F: FnMut(&[u8]),
{
    let mut data: Vec<Event> = Vec::with_capacity(1024);
    let mut raw: Vec<u8> = Vec::with_capacity(1024 * 128);

    loop {
        {
            let mut queue = shared.queue.lock().unwrap();
            while queue.data.is_empty() && !shared.stop.load(Ordering::SeqCst) {
                queue = shared.queue_cond.wait(queue).unwrap();
            }
            // Exit only once stopped with nothing left to drain.
            if queue.data.is_empty() {
                break;
            }
            mem::swap(&mut queue.data, &mut data);
        }

        let size = data.len() as u64;
        for event in &data {
            encode(event, &mut raw);
        }
        output(&raw);
        data.clear();
        raw.clear();

        let mut flushed = shared.flushed.lock().unwrap();
        *flushed += size;
        shared.flushed_cond.notify_all();
    }
}

/// Per-thread append buffer. Events are captured with the calling
/// thread's id and the nanoseconds since the process reference start;
/// nothing blocks until [`LocalRecorder::flush`].
pub struct LocalRecorder {
    data: Vec<Event>,
    recorder: Recorder,
}

impl LocalRecorder {
    pub fn new(recorder: &Recorder) -> Self {
        Self {
            data: Vec::with_capacity(1024),
            recorder: recorder.clone(),
        }
    }

    pub fn zone_start(&mut self, line: u32, file: &str, function: &str, name: &str, color: u32) {
        self.data.push(
            StartZoneEvent {
                color,
                line,
                file: file.to_string(),
                function: function.to_string(),
                name: name.to_string(),
                thread_id: current_thread_id(),
                time: now_nanos(),
            }
            .into(),
        );
    }

    pub fn zone_end(&mut self) {
        self.data.push(
            EndZoneEvent {
                thread_id: current_thread_id(),
                time: now_nanos(),
            }
            .into(),
        );
    }

    pub fn message(&mut self, message: &str, color: u32) {
        self.data.push(
            MessageEvent {
                message: message.to_string(),
                color,
                thread_id: current_thread_id(),
                time: now_nanos(),
            }
            .into(),
        );
    }

    pub fn name_thread(&mut self, name: &str) {
        self.data.push(
            ThreadNameEvent {
                name: name.to_string(),
                thread_id: current_thread_id(),
                time: now_nanos(),
            }
            .into(),
        );
    }

    /// Submits the buffer to the serializer and blocks until those
    /// events have been handed to the output callback. With no output
    /// installed yet the events stay buffered here and the call returns
    /// immediately.
    pub fn flush(&mut self) {
        if !self.recorder.is_active() {
            return;
        }
        let ticket = self.recorder.send_record(&mut self.data);
        self.recorder.flush_to(ticket);
    }
}

impl Drop for LocalRecorder {
    fn drop(&mut self) {
        self.flush();
    }
}

lazy_static! {
    static ref GLOBAL: Recorder = Recorder::new();
}

thread_local! {
    static LOCAL: RefCell<LocalRecorder> = RefCell::new(LocalRecorder::new(&GLOBAL));
}

/// Installs the output callback of the process-wide default recorder.
pub fn set_flush_callback<F>(output: F) -> Result<(), RecorderError>
where
    F: FnMut(&[u8]) + Send + 'static,
{
    GLOBAL.set_output(output)
}

/// An output callback appending the raw stream to a freshly created
/// file.
pub fn file_output<P: AsRef<Path>>(path: P) -> Result<impl FnMut(&[u8]) + Send + 'static, RecorderError> {
    let mut file = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)?;
    Ok(move |bytes: &[u8]| {
        // The callback has no error channel; a failed write truncates
        // the trace at a batch boundary.
        let _ = file.write_all(bytes);
    })
}

pub fn zone_start(line: u32, file: &str, function: &str, name: &str, color: u32) {
    LOCAL.with(|local| {
        local
            .borrow_mut()
            .zone_start(line, file, function, name, color)
    });
}

pub fn zone_end() {
    LOCAL.with(|local| local.borrow_mut().zone_end());
}

pub fn message(text: &str, color: u32) {
    LOCAL.with(|local| local.borrow_mut().message(text, color));
}

pub fn name_thread(name: &str) {
    LOCAL.with(|local| local.borrow_mut().name_thread(name));
}

/// Flushes the calling thread's buffer through the default recorder.
pub fn flush() {
    LOCAL.with(|local| local.borrow_mut().flush());
}
