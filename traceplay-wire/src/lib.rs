//! Wire contract shared by the traceplay recorder and replay tool: the
//! trace [`Event`] model, its binary codec, and the trace file magic.

use std::io::{self, Read};

use thiserror::Error;

mod codec;
mod event;

pub use codec::{decode, encode};
pub use event::{
    EndZoneEvent, Event, EventKind, MessageEvent, StartEvent, StartZoneEvent, ThreadNameEvent,
};

/// 12-byte header at the start of every trace file. Written once by the
/// recorder before the leading [`StartEvent`]; stripped once before the
/// event codec sees the stream.
pub const MAGIC: [u8; 12] = *b"TRCYPLAY\x01\x00\x00\x00";

#[derive(Debug, Error)]
pub enum WireError {
    #[error("File does not start with the trace magic header")]
    BadMagic,
    #[error("Failed to read file header: {0}")]
    HeaderIo(#[source] io::Error),
}

/// Consumes and verifies the file magic, leaving `data` positioned at
/// the first event. A file too short to hold the magic is reported as
/// [`WireError::BadMagic`], like any other non-trace file.
pub fn read_magic<R: Read>(data: &mut R) -> Result<(), WireError> {
    let mut header = [0u8; 12];
    match data.read_exact(&mut header) {
        Ok(()) if header == MAGIC => Ok(()),
        Ok(()) => Err(WireError::BadMagic),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Err(WireError::BadMagic),
        Err(e) => Err(WireError::HeaderIo(e)),
    }
}
