//! Demultiplexer for Docker's raw-stream framing.
//!
//! When a non-TTY exec is attached through the engine API, stdout and stderr
//! share one connection. Every frame starts with an 8-byte header:
//! `[kind, 0, 0, 0, len (u32, big endian)]` followed by `len` payload bytes.

use std::io::{self, Read, Write};

const HEADER_LEN: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Stdin,
    Stdout,
    Stderr,
    SystemErr,
}

impl StreamKind {
    fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(StreamKind::Stdin),
            1 => Some(StreamKind::Stdout),
            2 => Some(StreamKind::Stderr),
            3 => Some(StreamKind::SystemErr),
            _ => None,
        }
    }
}

/// Copy frames from `reader` into `stdout` / `stderr` until end of stream.
///
/// Returns the number of payload bytes written. A stream that ends exactly on a
/// frame boundary is a clean end; one that ends mid-frame is `UnexpectedEof`.
/// Stdin frames are written to `stdout`, the same way the Docker client does.
pub fn demux<R, O, E>(mut reader: R, stdout: &mut O, stderr: &mut E) -> io::Result<u64>
where
    R: Read,
    O: Write + ?Sized,
    E: Write + ?Sized,
{
    let mut header = [0u8; HEADER_LEN];
    let mut written = 0u64;

    loop {
        if !read_header(&mut reader, &mut header)? {
            return Ok(written);
        }

        let kind = StreamKind::from_byte(header[0]).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unknown stream id {} in frame header", header[0]),
            )
        })?;
        let len = u32::from_be_bytes([header[4], header[5], header[6], header[7]]) as u64;

        let mut payload = (&mut reader).take(len);
        let copied = match kind {
            StreamKind::Stdin | StreamKind::Stdout => io::copy(&mut payload, stdout)?,
            StreamKind::Stderr => io::copy(&mut payload, stderr)?,
            StreamKind::SystemErr => {
                let mut message = String::new();
                payload.read_to_string(&mut message)?;
                return Err(io::Error::new(
                    io::ErrorKind::Other,
                    format!("runtime reported error: {}", message.trim()),
                ));
            }
        };

        if copied < len {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("frame truncated: expected {} bytes, got {}", len, copied),
            ));
        }
        written += copied;
    }
}

/// Fill `header`; `Ok(false)` means the stream ended before the first byte.
fn read_header<R: Read>(reader: &mut R, header: &mut [u8; HEADER_LEN]) -> io::Result<bool> {
    let mut filled = 0;
    while filled < HEADER_LEN {
        match reader.read(&mut header[filled..]) {
            Ok(0) if filled == 0 => return Ok(false),
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "stream ended inside a frame header",
                ))
            }
            Ok(n) => filled += n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        }
    }
    Ok(true)
}
