//! HTTP/1.1 framing-aware byte relay.
//!
//! Relays one message (request or response) from a source to a sink without
//! altering its bytes. Headers pass through verbatim; only `Content-Length`
//! and `Transfer-Encoding` are inspected to decide how the body is framed.
//! Bodies stream through a fixed-size buffer, never fully in memory.

use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;
use tracing::debug;

use crate::error::{CrossbarError, CrossbarResult};

/// Buffer size for body transfer
pub const BUFFER_SIZE: usize = 8192;

/// Which side of the exchange a message belongs to.
///
/// Only responses may use close-delimited bodies; a request with no announced
/// length has no body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Request,
    Response,
}

/// Framing facts extracted while the headers stream through
struct HeaderInfo {
    /// Announced body length; -1 when absent or malformed
    content_length: i64,
    chunked: bool,
}

/// Relay one complete HTTP message from `src` to `sink`.
///
/// `read_timeout` bounds every read from the source; `None` leaves reads
/// unbounded (the client side of the proxy).
pub async fn relay_message<R, W>(
    src: &mut R,
    sink: &mut W,
    direction: Direction,
    read_timeout: Option<Duration>,
) -> CrossbarResult<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let info = relay_headers(src, sink, read_timeout).await?;

    if info.chunked {
        relay_chunked_body(src, sink, read_timeout).await?;
    } else if info.content_length > 0 {
        relay_fixed_body(src, sink, info.content_length as u64, read_timeout).await?;
    } else if info.content_length == -1 && direction == Direction::Response {
        // No announced length on a response: the body runs to end-of-stream
        relay_until_eof(src, sink, read_timeout).await?;
    }
    // content_length == 0, or a request with no announced length: no body

    sink.flush().await?;
    Ok(())
}

/// Stream header lines through verbatim until the blank line, recognizing the
/// two framing headers case-insensitively along the way.
async fn relay_headers<R, W>(
    src: &mut R,
    sink: &mut W,
    read_timeout: Option<Duration>,
) -> CrossbarResult<HeaderInfo>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut info = HeaderInfo {
        content_length: -1,
        chunked: false,
    };
    let mut line = Vec::with_capacity(256);

    loop {
        line.clear();
        if read_line(src, &mut line, read_timeout).await? == 0 {
            // Source ended before the headers did
            break;
        }
        sink.write_all(&line).await?;

        let text = String::from_utf8_lossy(&line);
        let text = text.trim();
        if text.is_empty() {
            break;
        }

        let lower = text.to_ascii_lowercase();
        if let Some(value) = lower.strip_prefix("content-length:") {
            match value.trim().parse::<i64>() {
                Ok(n) if n >= 0 => info.content_length = n,
                _ => debug!("Ignoring malformed Content-Length header: {}", text),
            }
        } else if lower.starts_with("transfer-encoding:") && lower.contains("chunked") {
            info.chunked = true;
        }
    }

    Ok(info)
}

/// Chunked transfer coding relay: size lines, chunk data, and trailing CRLFs
/// all pass through untouched. Chunk extensions are stripped only for
/// parsing; an unparsable size aborts the message.
async fn relay_chunked_body<R, W>(
    src: &mut R,
    sink: &mut W,
    read_timeout: Option<Duration>,
) -> CrossbarResult<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut line = Vec::with_capacity(64);

    loop {
        line.clear();
        if read_line(src, &mut line, read_timeout).await? == 0 {
            break;
        }
        sink.write_all(&line).await?;

        let text = String::from_utf8_lossy(&line);
        let size_text = text.trim().split(';').next().unwrap_or("").trim();
        let size = u64::from_str_radix(size_text, 16).map_err(|_| {
            CrossbarError::proxy(format!("malformed chunk size: {:?}", text.trim()))
        })?;

        if size == 0 {
            // Final chunk: one more line carries the trailing CRLF (or a
            // trailer), then the message is done
            line.clear();
            if read_line(src, &mut line, read_timeout).await? > 0 {
                sink.write_all(&line).await?;
            }
            break;
        }

        copy_exact(src, sink, size, read_timeout).await?;

        // CRLF after the chunk data
        line.clear();
        if read_line(src, &mut line, read_timeout).await? > 0 {
            sink.write_all(&line).await?;
        }
    }

    Ok(())
}

/// Copy exactly `length` body bytes; a short read ends the body early
async fn relay_fixed_body<R, W>(
    src: &mut R,
    sink: &mut W,
    length: u64,
    read_timeout: Option<Duration>,
) -> CrossbarResult<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    copy_exact(src, sink, length, read_timeout).await
}

/// Copy until the source reports end-of-stream
async fn relay_until_eof<R, W>(
    src: &mut R,
    sink: &mut W,
    read_timeout: Option<Duration>,
) -> CrossbarResult<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buffer = [0u8; BUFFER_SIZE];
    loop {
        let read = read_some(src, &mut buffer, read_timeout).await?;
        if read == 0 {
            break;
        }
        sink.write_all(&buffer[..read]).await?;
    }
    Ok(())
}

async fn copy_exact<R, W>(
    src: &mut R,
    sink: &mut W,
    length: u64,
    read_timeout: Option<Duration>,
) -> CrossbarResult<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buffer = [0u8; BUFFER_SIZE];
    let mut remaining = length;

    while remaining > 0 {
        let want = remaining.min(BUFFER_SIZE as u64) as usize;
        let read = read_some(src, &mut buffer[..want], read_timeout).await?;
        if read == 0 {
            debug!("Source closed {} bytes before announced length", remaining);
            break;
        }
        sink.write_all(&buffer[..read]).await?;
        remaining -= read as u64;
    }

    Ok(())
}

async fn read_line<R>(
    src: &mut R,
    buf: &mut Vec<u8>,
    read_timeout: Option<Duration>,
) -> CrossbarResult<usize>
where
    R: AsyncBufRead + Unpin,
{
    match read_timeout {
        Some(limit) => timeout(limit, src.read_until(b'\n', buf))
            .await
            .map_err(|_| CrossbarError::timeout(limit, "socket read"))?
            .map_err(Into::into),
        None => src.read_until(b'\n', buf).await.map_err(Into::into),
    }
}

async fn read_some<R>(
    src: &mut R,
    buf: &mut [u8],
    read_timeout: Option<Duration>,
) -> CrossbarResult<usize>
where
    R: AsyncRead + Unpin,
{
    match read_timeout {
        Some(limit) => timeout(limit, src.read(buf))
            .await
            .map_err(|_| CrossbarError::timeout(limit, "socket read"))?
            .map_err(Into::into),
        None => src.read(buf).await.map_err(Into::into),
    }
}
