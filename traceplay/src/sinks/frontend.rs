//! Sub-process sink which receives JSON-serialized
//! [`api::ReplayEvent`]s over its Unix socket.
use std::collections::HashMap;
use std::io::Write;
use std::os::unix::net::UnixStream;
use std::time::Instant;

use traceplay_api as api;

use super::{ProfilerSink, SinkError, SourceLocation, SourceLocationHandle};

pub struct FrontendSink {
    socket: UnixStream,
    /// Epoch of the tick clock reported through `now()`.
    epoch: Instant,
    /// Locations allocated but not yet claimed by a `zone_begin`.
    locations: HashMap<u64, api::SourceLocation>,
    next_location: u64,
}

impl FrontendSink {
    pub fn new(socket: UnixStream) -> Self {
        Self {
            socket,
            epoch: Instant::now(),
            locations: HashMap::new(),
            next_location: 0,
        }
    }

    fn drain(&mut self, event: &api::ReplayEvent) -> Result<(), SinkError> {
        let json = serde_json::to_string(event)?
        // reportedly required for async frontends
        + "\n";

        self.socket
            .write_all(json.as_bytes())
            .map_err(SinkError::DrainIOError)
    }
}

impl ProfilerSink for FrontendSink {
    fn now(&mut self) -> u64 {
        self.epoch.elapsed().as_nanos() as u64
    }

    fn alloc_source_location(&mut self, loc: &SourceLocation) -> SourceLocationHandle {
        self.next_location += 1;
        self.locations.insert(
            self.next_location,
            api::SourceLocation {
                line: loc.line,
                file: loc.file.to_string(),
                function: loc.function.to_string(),
                name: loc.name.to_string(),
                color: loc.color,
            },
        );
        SourceLocationHandle::new(self.next_location)
    }

    fn zone_begin(&mut self, time: u64, loc: SourceLocationHandle) -> Result<(), SinkError> {
        let loc = self.locations.remove(&loc.raw()).unwrap_or(api::SourceLocation {
            line: 0,
            file: String::new(),
            function: String::new(),
            name: String::new(),
            color: 0,
        });
        self.drain(&api::ReplayEvent::ZoneBegin { time, loc })
    }

    fn zone_end(&mut self, time: u64) -> Result<(), SinkError> {
        self.drain(&api::ReplayEvent::ZoneEnd { time })
    }

    fn message(&mut self, time: u64, text: &str) -> Result<(), SinkError> {
        self.drain(&api::ReplayEvent::Message {
            time,
            text: text.to_string(),
            color: None,
        })
    }

    fn message_colored(
        &mut self,
        time: u64,
        text: &str,
        r: u8,
        g: u8,
        b: u8,
    ) -> Result<(), SinkError> {
        self.drain(&api::ReplayEvent::Message {
            time,
            text: text.to_string(),
            color: Some((r, g, b)),
        })
    }

    fn set_thread_name_with_hint(&mut self, name: &str, group: u32) -> Result<(), SinkError> {
        self.drain(&api::ReplayEvent::ThreadName {
            name: name.to_string(),
            group,
        })
    }

    fn describe(&self) -> String {
        format!("frontend using socket {:?}", self.socket)
    }
}
