//! `Content-Length` framing for JSON-RPC over byte streams.
//!
//! A frame is a header block terminated by an empty line, followed by
//! exactly `Content-Length` bytes of JSON:
//!
//! ```text
//! Content-Length: 52\r\n
//! \r\n
//! {"jsonrpc":"2.0","id":1,"method":"initialize",...}
//! ```
//!
//! Framing is strict. Every deviation is a [`FrameError`] and the stream
//! must be abandoned afterwards; there is no resynchronization.

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

/// Upper bound on the header block, separator included.
pub const MAX_HEADER_BYTES: usize = 8 * 1024;

/// Upper bound on a single body. clangd's largest replies (symbol trees of
/// generated headers) stay far below this.
pub const MAX_BODY_BYTES: usize = 64 * 1024 * 1024;

/// Errors from reading or writing frames. All of them are fatal to the stream.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("stream closed in the middle of a frame")]
    UnexpectedEof,

    #[error("header block exceeds 8 KiB")]
    HeaderTooLarge,

    #[error("malformed header line: {0:?}")]
    MalformedHeader(String),

    #[error("missing Content-Length header")]
    MissingContentLength,

    #[error("invalid Content-Length: {0:?}")]
    InvalidContentLength(String),

    #[error("body of {expected} bytes truncated by end of stream")]
    TruncatedBody { expected: usize },

    #[error("body is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

/// Serialize `value` into one frame.
pub fn encode_frame(value: &Value) -> Vec<u8> {
    let body = value.to_string();
    let mut out = format!("Content-Length: {}\r\n\r\n", body.len()).into_bytes();
    out.extend_from_slice(body.as_bytes());
    out
}

/// Write one frame and flush.
pub async fn write_frame<W>(writer: &mut W, value: &Value) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    writer.write_all(&encode_frame(value)).await?;
    writer.flush().await?;
    Ok(())
}

/// Parse a header block (without the terminating empty line) and return
/// the declared content length.
///
/// Lines are separated by `\r\n`. Header names are matched
/// case-insensitively; `Content-Type` is accepted and ignored, any other
/// header is rejected.
pub fn parse_header_block(block: &str) -> Result<usize, FrameError> {
    let mut length = None;
    for line in block.split("\r\n").filter(|l| !l.is_empty()) {
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| FrameError::MalformedHeader(line.to_string()))?;
        let value = value.trim();
        if name.eq_ignore_ascii_case("content-length") {
            if length.is_some() {
                return Err(FrameError::MalformedHeader(line.to_string()));
            }
            let n = value
                .parse::<usize>()
                .map_err(|_| FrameError::InvalidContentLength(value.to_string()))?;
            if n > MAX_BODY_BYTES {
                return Err(FrameError::InvalidContentLength(value.to_string()));
            }
            length = Some(n);
        } else if !name.eq_ignore_ascii_case("content-type") {
            return Err(FrameError::MalformedHeader(line.to_string()));
        }
    }
    length.ok_or(FrameError::MissingContentLength)
}

/// Reads frames from an async byte stream.
pub struct FrameReader<R> {
    inner: BufReader<R>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            inner: BufReader::new(reader),
        }
    }

    /// Read the next frame.
    ///
    /// Returns `Ok(None)` on a clean end of stream between frames.
    pub async fn read_frame(&mut self) -> Result<Option<Value>, FrameError> {
        let Some(block) = self.read_header_block().await? else {
            return Ok(None);
        };
        let length = parse_header_block(&block)?;

        let mut body = vec![0u8; length];
        match self.inner.read_exact(&mut body).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Err(FrameError::TruncatedBody { expected: length });
            }
            Err(e) => return Err(e.into()),
        }

        tracing::trace!(bytes = length, "frame received");
        Ok(Some(serde_json::from_slice(&body)?))
    }

    async fn read_header_block(&mut self) -> Result<Option<String>, FrameError> {
        let mut block = Vec::new();
        let mut line = Vec::new();
        loop {
            line.clear();
            let limit = (MAX_HEADER_BYTES - block.len()) as u64;
            let n = (&mut self.inner)
                .take(limit)
                .read_until(b'\n', &mut line)
                .await?;
            if n == 0 {
                if block.is_empty() {
                    return Ok(None);
                }
                return Err(if limit == 0 {
                    FrameError::HeaderTooLarge
                } else {
                    FrameError::UnexpectedEof
                });
            }
            if !line.ends_with(b"\n") {
                return Err(if n as u64 == limit {
                    FrameError::HeaderTooLarge
                } else {
                    FrameError::UnexpectedEof
                });
            }
            if !line.ends_with(b"\r\n") {
                return Err(FrameError::MalformedHeader(
                    String::from_utf8_lossy(&line).into_owned(),
                ));
            }
            if line.as_slice() == b"\r\n" {
                let text = String::from_utf8(block).map_err(|e| {
                    FrameError::MalformedHeader(String::from_utf8_lossy(e.as_bytes()).into_owned())
                })?;
                return Ok(Some(text));
            }
            block.extend_from_slice(&line);
        }
    }
}
