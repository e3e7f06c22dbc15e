//! Host-side replay tool: merges recorded trace files from one or more
//! processes and re-emits their events into a live profiler frontend
//! as a unified timeline.
use std::io::{BufRead, BufReader};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::Context;
use crossbeam_channel as channel;
use structopt::StructOpt;
use thiserror::Error;

mod diag;
mod log;
mod playback;
mod sinks;
mod sources;

use playback::{Playback, ReplayClock, Stats};
use sinks::SharedSink;

/// Replay recorded trace streams into a live profiler frontend.
#[derive(Debug, StructOpt)]
struct Opts {
    /// PATH, relative, or absolute path to the frontend to forward the
    /// replayed trace to. Tested in that order.
    #[structopt(long = "frontend", short = "F", default_value = "dummy")]
    frontend: String,

    /// Log every replayed event.
    #[structopt(long = "trace")]
    trace: bool,

    /// Trace files, or directories scanned one level deep for them.
    /// Files without the trace magic are skipped.
    #[structopt(name = "PATH", parse(from_os_str), required = true)]
    paths: Vec<PathBuf>,
}

#[derive(Debug, Error)]
pub enum TraceplayError {
    // adhoc errors
    #[error("I/O operation failed: {0}")]
    IOError(#[from] std::io::Error),

    // transparent errors
    #[error(transparent)]
    SourceError(#[from] sources::SourceError),
    #[error(transparent)]
    SinkError(#[from] sinks::SinkError),
    #[error(transparent)]
    PlaybackError(#[from] playback::PlaybackError),

    // everything else
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl diag::DiagnosableError for TraceplayError {
    fn diagnose(&self) -> Vec<String> {
        match self {
            TraceplayError::SinkError(_) => vec![
                "a frontend executable is resolved as traceplay-frontend-<name> on PATH, then as a relative or absolute path".to_string(),
            ],
            _ => vec![],
        }
    }
}

impl TraceplayError {
    pub fn render(&self) {
        log::err(format!("{:#?}", self));

        // print eventual hints
        use crate::diag::DiagnosableError;
        type DE = dyn DiagnosableError;
        for hint in self.diagnose().iter().chain(
            match self {
                Self::SourceError(e) => Some(e as &DE),
                Self::SinkError(e) => Some(e as &DE),
                Self::PlaybackError(e) => Some(e as &DE),
                _ => None,
            }
            .map(|e| e.diagnose())
            .unwrap_or_default()
            .iter(),
        ) {
            log::hint(hint.to_owned());
        }
    }
}

fn main() {
    if let Err(e) = main_try() {
        e.render();
        std::process::exit(1);
    }
}

fn main_try() -> Result<(), TraceplayError> {
    let opts = Opts::from_args();

    // Collect replayable streams from the given paths.
    let mut playback = Playback::new();
    for path in &opts.paths {
        if path.is_dir() {
            for file in sources::file::files_in(path)? {
                add_trace_file(&mut playback, &file)?;
            }
        } else {
            add_trace_file(&mut playback, path)?;
        }
    }

    if playback.stream_count() == 0 {
        log::warn("no replayable trace files among the given paths".to_string());
        return Ok(());
    }

    // Spawn the frontend child and connect to its socket.
    let (mut child, stderr, frontend_name) = spawn_frontend(&opts.frontend)?;
    let sink: SharedSink = {
        let socket_path = {
            let stdout = child
                .stdout
                .take()
                .context("Failed to pipe frontend stdout")?;
            BufReader::new(stdout)
                .lines()
                .next()
                .context("Failed to read socket path from frontend child process")??
        };
        let socket =
            UnixStream::connect(&socket_path).map_err(sinks::SinkError::SetupIOError)?;
        Arc::new(Mutex::new(sinks::FrontendSink::new(socket)))
    };

    // Forward frontend stderr through the status logger as it appears.
    let stderr_pump = {
        let name = frontend_name.clone();
        std::thread::spawn(move || {
            for line in BufReader::new(stderr).lines() {
                match line {
                    Ok(line) => log::frontend(format!("{}: {}", name, line)),
                    Err(_) => break,
                }
            }
        })
    };

    // Halt replay between dispatches on SIGINT.
    let (halt_tx, halt) = channel::bounded(1);
    ctrlc::set_handler(move || {
        let _ = halt_tx.try_send(());
    })
    .context("Failed to install SIGINT handler")?;

    log::status(
        "Calibrating",
        "profiler clock rate (takes one second)...".to_string(),
    );
    let clock = ReplayClock::calibrate(&sink);

    log::status(
        "Replaying",
        format!("{} trace stream(s)...", playback.stream_count()),
    );
    let instant = Instant::now();
    let stats = playback.play(&sink, clock, opts.trace, Some(&halt))?;

    // Tear down the workers (naming any unnamed replay threads), then
    // close the socket so the frontend sees EOF and exits.
    drop(playback);
    drop(sink);

    let duration = instant.elapsed();
    log::status(
        "Replayed",
        format!("{}.", format_status_message(&stats, &duration)),
    );

    let status = child.wait()?;
    let _ = stderr_pump.join();
    if !status.success() {
        log::err(format!(
            "frontend {} exited non-zero: {}",
            frontend_name, status
        ));
    }

    Ok(())
}

/// Probes a path and enqueues it when it is a trace file. Unreadable
/// paths abort; files without the magic or without a leading Start are
/// skipped.
fn add_trace_file(playback: &mut Playback, path: &Path) -> Result<(), TraceplayError> {
    if let Some(stream) = sources::file::open_trace_file(path)? {
        log::status("Adding", format!("trace file {}", path.display()));
        if let Err(e) = playback.add_stream(stream) {
            log::warn(format!("skipping {}: {}", path.display(), e));
        }
    }
    Ok(())
}

fn spawn_frontend(
    frontend: &str,
) -> Result<(process::Child, process::ChildStderr, String), TraceplayError> {
    // Try to spawn the frontend from PATH. If that fails, try a
    // relative path instead.
    let executables = [
        format!("traceplay-frontend-{}", frontend), // PATH
        format!("./{}", frontend),                  // relative
        format!("/{}", frontend),                   // absolute
    ];
    let mut child = executables
        .iter()
        .find_map(|e| {
            process::Command::new(e)
                .stdout(process::Stdio::piped())
                .stderr(process::Stdio::piped())
                .spawn()
                .ok()
        })
        .with_context(|| {
            format!(
                "Failed to spawn a frontend child process from tested paths (PATH, relative, absolute): {:#?}",
                executables
            )
        })?;

    let stderr = child
        .stderr
        .take()
        .context("Failed to take frontend stderr")?;
    Ok((child, stderr, frontend.to_string()))
}

fn format_status_message(stats: &Stats, duration: &Duration) -> String {
    fn format_duration(duration: &Duration) -> String {
        match duration.as_secs() {
            duration if duration >= 60 * 60 => {
                let secs = duration % 60;
                let mins = (duration / 60) % 60;
                let hours = duration / 60 / 60;

                format!("{}h {}min {}s", hours, mins, secs)
            }
            duration if duration >= 60 => {
                let secs = duration % 60;
                let mins = (duration / 60) % 60;

                format!("{}min {}s", mins, secs)
            }
            duration => {
                let secs = duration % 60;

                format!("{}s", secs)
            }
        }
    }

    format!(
        "{} event(s) from {} stream(s) in {time} (~{rate:.1} events/s)",
        stats.events,
        stats.streams,
        time = format_duration(duration),
        rate = stats.events as f64 / duration.as_secs_f64(),
    )
}
