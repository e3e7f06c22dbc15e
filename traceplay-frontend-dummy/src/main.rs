//! Reference frontend implementation for traceplay.
//!
//! Binds a socket in a temporary directory, prints its path on stdout
//! for the replay backend to connect to, and writes each received
//! [`api::ReplayEvent`] to stderr with its delta time.
use anyhow::{Context, Result};
use serde_json::Deserializer;
use traceplay_api as api;

fn main() -> Result<()> {
    // Create the frontend socket in a temporary directory, print it
    // for the parent backend.
    let socket_dir = tempfile::TempDir::new()
        .context("Failed to create temporary directory for frontend socket")?;
    let socket_path = socket_dir.path().join("traceplay-frontend.socket");
    let listener = std::os::unix::net::UnixListener::bind(&socket_path)
        .context("Failed to bind frontend socket")?;
    println!("{}", socket_path.display());

    let (socket, _addr) = listener.accept().context("Failed to accept()")?;
    let stream = Deserializer::from_reader(socket).into_iter::<api::ReplayEvent>();

    let mut prev_time = 0u64;
    for event in stream {
        let event = event.context("Failed to deserialize replay event")?;
        let time = match &event {
            api::ReplayEvent::ZoneBegin { time, .. }
            | api::ReplayEvent::ZoneEnd { time }
            | api::ReplayEvent::Message { time, .. } => Some(*time),
            api::ReplayEvent::ThreadName { .. } => None,
        };

        match event {
            api::ReplayEvent::ZoneBegin { time, loc } => eprintln!(
                "@{time} (+{delta} ticks): zone \"{name}\" opened at {file}:{line} ({function})",
                delta = time - prev_time,
                name = loc.name,
                file = loc.file,
                line = loc.line,
                function = loc.function,
            ),
            api::ReplayEvent::ZoneEnd { time } => eprintln!(
                "@{time} (+{delta} ticks): zone closed",
                delta = time - prev_time,
            ),
            api::ReplayEvent::Message { time, text, color } => eprintln!(
                "@{time} (+{delta} ticks): message {color:?}: {text}",
                delta = time - prev_time,
            ),
            api::ReplayEvent::ThreadName { name, group } => {
                eprintln!("thread renamed to \"{name}\" (group {group})")
            }
        }

        if let Some(time) = time {
            prev_time = time;
        }
    }

    Ok(())
}
