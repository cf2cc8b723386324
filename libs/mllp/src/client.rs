//! One-shot MLLP client used by outbound senders.

use std::time::Duration;

use bytes::Bytes;
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::codec::{write_frame, FrameReader};
use crate::{MllpError, Result};

/// TCP client that frames outgoing HL7 payloads and reads framed replies.
///
/// Connection, read and write are each bounded by explicit timeouts; the
/// caller decides whether a reply is required.
pub struct MllpClient {
    reader: FrameReader<TcpStream>,
    read_timeout: Duration,
    peer: String,
}

impl MllpClient {
    /// Connect to `addr`, bounded by `connect_timeout`.
    pub async fn connect<A: ToSocketAddrs + std::fmt::Display>(
        addr: A,
        connect_timeout: Duration,
        read_timeout: Duration,
    ) -> Result<Self> {
        let peer = addr.to_string();
        let stream = timeout(connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| MllpError::ConnectTimeout {
                addr: peer.clone(),
                timeout_ms: connect_timeout.as_millis() as u64,
            })??;

        if let Err(e) = stream.set_nodelay(true) {
            warn!(peer = %peer, "failed to set TCP_NODELAY: {e}");
        }
        debug!(peer = %peer, "MLLP connection established");

        Ok(Self {
            reader: FrameReader::new(stream),
            read_timeout,
            peer,
        })
    }

    /// Send one framed payload and flush.
    pub async fn send(&mut self, payload: &[u8]) -> Result<()> {
        write_frame(self.reader.get_mut(), payload).await?;
        debug!(peer = %self.peer, bytes = payload.len(), "sent MLLP frame");
        Ok(())
    }

    /// Read one framed reply, bounded by the client's read timeout.
    ///
    /// Any well-framed reply counts; the payload is not parsed here.
    pub async fn read_reply(&mut self) -> Result<Option<Bytes>> {
        let reply = self.reader.read_frame(self.read_timeout).await?;
        if let Some(frame) = &reply {
            debug!(peer = %self.peer, bytes = frame.len(), "received MLLP reply");
        }
        Ok(reply)
    }

    /// Remote endpoint as given at connect time.
    pub fn peer(&self) -> &str {
        &self.peer
    }
}
