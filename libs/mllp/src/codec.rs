//! Stream-level MLLP frame reader and writer.

use std::time::Duration;

use bytes::{Buf, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;
use tracing::warn;

use crate::{MllpError, Result, CR, DEFAULT_MAX_FRAME, EB, SB};

const READ_CHUNK: usize = 8 * 1024;

/// Incremental MLLP decoder over a byte stream.
///
/// Owns the stream plus a carry-over buffer so that bytes read past one
/// frame boundary are available to the next [`read_frame`] call. Bytes
/// arriving before the first start-of-block are keep-alive noise and are
/// discarded silently.
///
/// [`read_frame`]: FrameReader::read_frame
pub struct FrameReader<S> {
    stream: S,
    buf: BytesMut,
    max_frame: usize,
}

impl<S> FrameReader<S> {
    /// Wrap a stream with the default 16 MiB frame cap.
    pub fn new(stream: S) -> Self {
        Self::with_max_frame(stream, DEFAULT_MAX_FRAME)
    }

    /// Wrap a stream with an explicit frame cap.
    pub fn with_max_frame(stream: S, max_frame: usize) -> Self {
        Self {
            stream,
            buf: BytesMut::with_capacity(READ_CHUNK),
            max_frame,
        }
    }

    /// Access the underlying stream, e.g. to write a reply.
    pub fn get_mut(&mut self) -> &mut S {
        &mut self.stream
    }

    /// Consume the reader, returning the stream.
    pub fn into_inner(self) -> S {
        self.stream
    }
}

impl<S: AsyncRead + Unpin> FrameReader<S> {
    /// Read one framed payload, bounded by `deadline`.
    ///
    /// Returns `Ok(None)` when the stream ends cleanly before a frame
    /// starts. A close between `SB` and `EB` is a framing error. The one
    /// byte following `EB` is consumed; a missing or non-CR trailer is
    /// tolerated and logged.
    pub async fn read_frame(&mut self, deadline: Duration) -> Result<Option<Bytes>> {
        match timeout(deadline, self.read_frame_inner()).await {
            Ok(result) => result,
            Err(_) => Err(MllpError::Timeout {
                timeout_ms: deadline.as_millis() as u64,
            }),
        }
    }

    async fn read_frame_inner(&mut self) -> Result<Option<Bytes>> {
        // Discard everything up to and including the first SB.
        loop {
            if let Some(pos) = find_byte(&self.buf, SB) {
                self.buf.advance(pos + 1);
                break;
            }
            self.buf.clear();
            if self.fill().await? == 0 {
                return Ok(None);
            }
        }

        // Accumulate payload until EB.
        let mut scanned = 0;
        let payload = loop {
            if let Some(pos) = find_byte(&self.buf[scanned..], EB) {
                let payload = self.buf.split_to(scanned + pos);
                self.buf.advance(1); // the EB itself
                break payload;
            }
            scanned = self.buf.len();
            if scanned > self.max_frame {
                return Err(MllpError::FrameTooLarge {
                    size: scanned,
                    max: self.max_frame,
                });
            }
            if self.fill().await? == 0 {
                return Err(MllpError::UnexpectedEof {
                    bytes_buffered: scanned,
                });
            }
        };

        if payload.len() > self.max_frame {
            return Err(MllpError::FrameTooLarge {
                size: payload.len(),
                max: self.max_frame,
            });
        }

        // Consume exactly one trailer byte, expected CR.
        if self.buf.is_empty() && self.fill().await? == 0 {
            warn!("stream ended before MLLP trailer byte");
            return Ok(Some(payload.freeze()));
        }
        let trailer = self.buf[0];
        self.buf.advance(1);
        if trailer != CR {
            warn!(byte = trailer, "unexpected MLLP trailer byte, expected CR");
        }

        Ok(Some(payload.freeze()))
    }

    async fn fill(&mut self) -> std::io::Result<usize> {
        self.buf.reserve(READ_CHUNK);
        self.stream.read_buf(&mut self.buf).await
    }
}

/// Write one framed payload and flush.
///
/// The payload is written exactly once, never mutated; when it does not
/// already end in CR one is inserted before the `EB CR` trailer.
pub async fn write_frame<S: AsyncWrite + Unpin>(stream: &mut S, payload: &[u8]) -> Result<()> {
    stream.write_all(&[SB]).await?;
    stream.write_all(payload).await?;
    if payload.last() != Some(&CR) {
        stream.write_all(&[CR]).await?;
    }
    stream.write_all(&[EB, CR]).await?;
    stream.flush().await?;
    Ok(())
}

fn find_byte(haystack: &[u8], needle: u8) -> Option<usize> {
    haystack.iter().position(|&b| b == needle)
}
