//! Clipboard content source: a rewindable file or a captured buffer.
//!
//! Decided once at startup: a source that supports seeking is re-read
//! from its start for every paste request, anything else (pipes,
//! terminals, standard input) is read to the end up front and the
//! captured bytes are reused for every request.

use std::borrow::Cow;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;

/// Bytes handed to requesting clients.
#[derive(Debug)]
pub enum SourceBuffer {
    /// Re-read from offset 0 on every request.
    Replayable(File),
    /// Captured once, served unchanged.
    Materialized(Vec<u8>),
}

impl SourceBuffer {
    /// Open the source named on the command line.
    ///
    /// `-` reads standard input.
    pub fn open(path: &Path) -> io::Result<Self> {
        if path == Path::new("-") {
            let mut data = Vec::new();
            io::stdin().lock().read_to_end(&mut data)?;
            return Ok(Self::Materialized(data));
        }
        Self::from_file(File::open(path)?)
    }

    /// Classify an already opened file by probing whether it can seek.
    pub fn from_file(mut file: File) -> io::Result<Self> {
        match file.seek(SeekFrom::Start(0)) {
            Ok(_) => Ok(Self::Replayable(file)),
            Err(e) if e.raw_os_error() == Some(nix::libc::ESPIPE) => {
                let mut data = Vec::new();
                file.read_to_end(&mut data)?;
                Ok(Self::Materialized(data))
            }
            Err(e) => Err(e),
        }
    }

    pub fn is_replayable(&self) -> bool {
        matches!(self, Self::Replayable(_))
    }

    /// Full content for one request.
    pub fn contents(&self) -> io::Result<Cow<'_, [u8]>> {
        match self {
            Self::Replayable(file) => {
                let mut file = file;
                file.seek(SeekFrom::Start(0))?;
                let mut data = Vec::new();
                file.read_to_end(&mut data)?;
                Ok(Cow::Owned(data))
            }
            Self::Materialized(data) => Ok(Cow::Borrowed(data)),
        }
    }
}
