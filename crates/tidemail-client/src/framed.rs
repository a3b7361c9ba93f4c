//! Framing for the read half of a client connection.
//!
//! The wire format is CRLF-terminated lines, except that a line may end in
//! a literal header `{n}`, in which case exactly `n` raw octets follow
//! before line framing resumes. The reader assembles one complete unit —
//! the line plus every embedded literal — so the token decoder never has
//! to suspend mid-line.

use std::io;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};

use crate::{Error, Result};

const BUFFER_SIZE: usize = 8192;

/// Upper bound on a single line, to bound memory under a hostile peer.
const MAX_LINE_LENGTH: usize = 1024 * 1024;

/// Upper bound on a single literal, same reasoning.
const MAX_LITERAL_SIZE: usize = 100 * 1024 * 1024;

/// Buffered reader assembling complete framed units.
pub struct FramedReader<R> {
    reader: BufReader<R>,
}

impl<R: AsyncRead + Unpin> FramedReader<R> {
    /// Wraps the read half of a connection.
    pub fn new(read: R) -> Self {
        Self {
            reader: BufReader::with_capacity(BUFFER_SIZE, read),
        }
    }

    /// Reads one complete unit: a CRLF-terminated line plus any literals
    /// its headers announce.
    ///
    /// # Errors
    ///
    /// Fails on connection loss, oversized input, or a malformed literal
    /// header; all are fatal to the connection.
    pub async fn read_unit(&mut self) -> Result<Vec<u8>> {
        let mut unit = Vec::new();
        loop {
            let line_start = unit.len();
            self.read_line(&mut unit).await?;
            match literal_length(&unit[line_start..]) {
                Some(len) if len > MAX_LITERAL_SIZE => {
                    return Err(Error::Protocol(format!(
                        "literal too large: {len} bytes (max {MAX_LITERAL_SIZE})"
                    )));
                }
                Some(len) => {
                    let payload_start = unit.len();
                    unit.resize(payload_start + len, 0);
                    self.reader.read_exact(&mut unit[payload_start..]).await?;
                }
                None => return Ok(unit),
            }
        }
    }

    async fn read_line(&mut self, out: &mut Vec<u8>) -> Result<()> {
        let start = out.len();
        loop {
            let buf = self.reader.fill_buf().await?;
            if buf.is_empty() {
                return Err(Error::Io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed",
                )));
            }
            if let Some(pos) = buf.windows(2).position(|w| w == b"\r\n") {
                out.extend_from_slice(&buf[..pos + 2]);
                self.reader.consume(pos + 2);
                return Ok(());
            }
            let len = buf.len();
            out.extend_from_slice(buf);
            self.reader.consume(len);
            if out.len() - start > MAX_LINE_LENGTH {
                return Err(Error::Protocol("line too long".to_string()));
            }
        }
    }
}

/// Extracts the literal length if the line ends with `{n}` or `{n+}`
/// before its CRLF.
fn literal_length(line: &[u8]) -> Option<usize> {
    let line = line.strip_suffix(b"\r\n")?;
    let line = line.strip_suffix(b"}")?;
    let line = line.strip_suffix(b"+").unwrap_or(line);
    let open = line.iter().rposition(|&b| b == b'{')?;
    std::str::from_utf8(&line[open + 1..]).ok()?.parse().ok()
}
