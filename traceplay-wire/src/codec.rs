//! Length-prefixed binary serialization of [`Event`]s.
//!
//! An event is a `u32` kind tag followed by the variant body. Scalars
//! are packed native-endian without padding; a string is a `u64` byte
//! length followed by the raw bytes. The format is therefore not
//! portable across architectures of different endianness, matching the
//! trace files already in the wild.

use std::io::Read;

use crate::event::{
    EndZoneEvent, Event, EventKind, MessageEvent, StartEvent, StartZoneEvent, ThreadNameEvent,
};

fn put_u32(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_ne_bytes());
}

fn put_u64(out: &mut Vec<u8>, value: u64) {
    out.extend_from_slice(&value.to_ne_bytes());
}

fn put_str(out: &mut Vec<u8>, value: &str) {
    put_u64(out, value.len() as u64);
    out.extend_from_slice(value.as_bytes());
}

fn read_u32<R: Read>(data: &mut R) -> Option<u32> {
    let mut buf = [0u8; 4];
    data.read_exact(&mut buf).ok()?;
    Some(u32::from_ne_bytes(buf))
}

fn read_u64<R: Read>(data: &mut R) -> Option<u64> {
    let mut buf = [0u8; 8];
    data.read_exact(&mut buf).ok()?;
    Some(u64::from_ne_bytes(buf))
}

fn read_string<R: Read>(data: &mut R) -> Option<String> {
    let len = read_u64(data)?;
    let mut buf = vec![0u8; len as usize];
    data.read_exact(&mut buf).ok()?;
    String::from_utf8(buf).ok()
}

/// Appends the serialized form of `event` to `out`.
pub fn encode(event: &Event, out: &mut Vec<u8>) {
    put_u32(out, event.kind() as u32);
    match event {
        Event::Start(e) => {
            put_str(out, &e.host);
            put_u64(out, e.unix_time);
            put_u64(out, e.process_id);
        }
        Event::StartZone(e) => {
            put_u64(out, e.time);
            put_u64(out, e.thread_id);
            put_str(out, &e.file);
            put_str(out, &e.function);
            put_str(out, &e.name);
            put_u32(out, e.line);
            put_u32(out, e.color);
        }
        Event::EndZone(e) => {
            put_u64(out, e.time);
            put_u64(out, e.thread_id);
        }
        Event::Message(e) => {
            put_u64(out, e.time);
            put_u64(out, e.thread_id);
            put_str(out, &e.message);
            put_u32(out, e.color);
        }
        Event::ThreadName(e) => {
            put_u64(out, e.time);
            put_u64(out, e.thread_id);
            put_str(out, &e.name);
        }
    }
}

/// Decodes the next event from `data`.
///
/// Returns `None` on end of stream, on truncation, on an unknown kind
/// tag, and on string bytes that are not valid UTF-8. Callers treat
/// `None` as "stream exhausted"; no bytes beyond the decoded event are
/// consumed.
pub fn decode<R: Read>(data: &mut R) -> Option<Event> {
    let kind = EventKind::from_tag(read_u32(data)?)?;
    match kind {
        EventKind::Start => {
            let host = read_string(data)?;
            let unix_time = read_u64(data)?;
            let process_id = read_u64(data)?;
            Some(
                StartEvent {
                    host,
                    unix_time,
                    process_id,
                }
                .into(),
            )
        }
        EventKind::StartZone => {
            let time = read_u64(data)?;
            let thread_id = read_u64(data)?;
            let file = read_string(data)?;
            let function = read_string(data)?;
            let name = read_string(data)?;
            let line = read_u32(data)?;
            let color = read_u32(data)?;
            Some(
                StartZoneEvent {
                    color,
                    line,
                    file,
                    function,
                    name,
                    thread_id,
                    time,
                }
                .into(),
            )
        }
        EventKind::EndZone => {
            let time = read_u64(data)?;
            let thread_id = read_u64(data)?;
            Some(EndZoneEvent { thread_id, time }.into())
        }
        EventKind::Message => {
            let time = read_u64(data)?;
            let thread_id = read_u64(data)?;
            let message = read_string(data)?;
            let color = read_u32(data)?;
            Some(
                MessageEvent {
                    message,
                    color,
                    thread_id,
                    time,
                }
                .into(),
            )
        }
        EventKind::ThreadName => {
            let time = read_u64(data)?;
            let thread_id = read_u64(data)?;
            let name = read_string(data)?;
            Some(
                ThreadNameEvent {
                    name,
                    thread_id,
                    time,
                }
                .into(),
            )
        }
        EventKind::None => None,
    }
}
