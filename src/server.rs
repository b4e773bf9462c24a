//! Content server: writes the clipboard bytes into a requester's pipe.

use std::fs::File;
use std::io::{self, Write};
use std::os::fd::AsFd;

use nix::fcntl::{FcntlArg, OFlag, fcntl};

use crate::selection::mailbox::PendingRequest;
use crate::source::SourceBuffer;

/// Failure serving a single request. The serve loop logs and moves on.
#[derive(Debug, thiserror::Error)]
pub enum ServeError {
    #[error("failed to make destination blocking: {0}")]
    Blocking(nix::Error),
    #[error("failed to read source: {0}")]
    Source(io::Error),
    #[error("failed to write to requester: {0}")]
    Write(io::Error),
}

/// Write the full source content to the request's destination.
///
/// The destination is closed on every return path. Returns the number
/// of bytes written.
pub fn serve(request: PendingRequest, source: &SourceBuffer) -> Result<usize, ServeError> {
    let PendingRequest {
        content_type,
        destination,
    } = request;

    clear_nonblocking(&destination).map_err(ServeError::Blocking)?;

    let data = source.contents().map_err(ServeError::Source)?;
    let mut destination = File::from(destination);
    let written = write_fully(&mut destination, &data).map_err(ServeError::Write)?;

    tracing::debug!(%content_type, bytes = written, "request served");
    Ok(written)
}

/// Requesters may hand over a non-blocking pipe, where a full pipe
/// buffer turns into a short write.
fn clear_nonblocking(fd: impl AsFd) -> nix::Result<()> {
    let fd = fd.as_fd();
    let flags = OFlag::from_bits_truncate(fcntl(fd, FcntlArg::F_GETFL)?);
    if flags.contains(OFlag::O_NONBLOCK) {
        fcntl(fd, FcntlArg::F_SETFL(flags - OFlag::O_NONBLOCK))?;
    }
    Ok(())
}

/// Write all of `data`, retrying short writes, `EINTR` and `EAGAIN`.
///
/// Any other error aborts. A zero-length write is reported as
/// `WriteZero` rather than looping forever.
pub fn write_fully(dst: &mut impl Write, mut data: &[u8]) -> io::Result<usize> {
    let total = data.len();
    while !data.is_empty() {
        match dst.write(data) {
            Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
            Ok(n) => data = &data[n..],
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => std::thread::yield_now(),
            Err(e) => return Err(e),
        }
    }
    dst.flush()?;
    Ok(total)
}
