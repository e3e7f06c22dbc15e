//! Trace files on disk: magic probing and shallow directory discovery.
use std::fs;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use traceplay_wire::{read_magic, WireError};

use super::{EventStream, SourceError};

/// Opens `path` and probes it for the trace file magic.
///
/// Returns `Ok(None)` when the file is readable but does not carry the
/// magic, so directory scans can skip foreign files silently. The magic
/// is consumed here; the stream starts at the first event.
pub fn open_trace_file(path: &Path) -> Result<Option<EventStream>, SourceError> {
    let file =
        fs::File::open(path).map_err(|e| SourceError::SetupIOError(path.to_path_buf(), e))?;
    let mut reader = BufReader::new(file);
    match read_magic(&mut reader) {
        Ok(()) => Ok(Some(EventStream::new(
            reader,
            path.display().to_string(),
        ))),
        Err(WireError::BadMagic) => Ok(None),
        Err(WireError::HeaderIo(e)) => Err(SourceError::SetupIOError(path.to_path_buf(), e)),
    }
}

/// Regular files directly inside `dir`. The scan is one level deep:
/// nested directories are not descended into.
pub fn files_in(dir: &Path) -> Result<Vec<PathBuf>, SourceError> {
    let entries =
        fs::read_dir(dir).map_err(|e| SourceError::ReadDirError(dir.to_path_buf(), e))?;

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| SourceError::ReadDirError(dir.to_path_buf(), e))?;
        if entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
            files.push(entry.path());
        }
    }
    files.sort();
    Ok(files)
}
