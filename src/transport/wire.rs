use crate::error::{Result, SpanError};
use std::io::ErrorKind;
use std::net::Ipv4Addr;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// A stream speaking the coordinator protocol: fixed-width integers sent
/// back to back in native byte order, no framing.
///
/// Every failure is reported with the step being performed and the peer
/// label this stream was created with.
pub struct WireStream<S> {
    stream: S,
    peer: String,
}

impl<S: AsyncRead + AsyncWrite + Unpin> WireStream<S> {
    pub fn new(stream: S, peer: impl Into<String>) -> Self {
        Self {
            stream,
            peer: peer.into(),
        }
    }

    pub async fn send_u64(&mut self, value: u64, step: &'static str) -> Result<()> {
        self.send(&value.to_ne_bytes(), step).await
    }

    pub async fn send_i32(&mut self, value: i32, step: &'static str) -> Result<()> {
        self.send(&value.to_ne_bytes(), step).await
    }

    pub async fn send_u16(&mut self, value: u16, step: &'static str) -> Result<()> {
        self.send(&value.to_ne_bytes(), step).await
    }

    /// Send an IPv4 address as its four octets in network order, or the
    /// all-ones sentinel for `None`.
    pub async fn send_ipv4(&mut self, addr: Option<Ipv4Addr>, step: &'static str) -> Result<()> {
        let octets = addr.map_or(crate::types::NO_PARENT.to_be_bytes(), |a| a.octets());
        self.send(&octets, step).await
    }

    pub async fn recv_u64(&mut self, step: &'static str) -> Result<u64> {
        Ok(u64::from_ne_bytes(self.recv::<8>(step).await?))
    }

    pub async fn recv_i32(&mut self, step: &'static str) -> Result<i32> {
        Ok(i32::from_ne_bytes(self.recv::<4>(step).await?))
    }

    pub async fn recv_u16(&mut self, step: &'static str) -> Result<u16> {
        Ok(u16::from_ne_bytes(self.recv::<2>(step).await?))
    }

    /// Counterpart of [`send_ipv4`](Self::send_ipv4).
    pub async fn recv_ipv4(&mut self, step: &'static str) -> Result<Option<Ipv4Addr>> {
        let octets = self.recv::<4>(step).await?;
        if u32::from_be_bytes(octets) == crate::types::NO_PARENT {
            Ok(None)
        } else {
            Ok(Some(Ipv4Addr::from(octets)))
        }
    }

    /// Wait while the peer is expected to stay silent. Resolves only when
    /// it closes the connection or breaks the protocol by sending data.
    ///
    /// Cancel safe: dropping the future consumes nothing from the stream.
    pub async fn wait_closed(&mut self, step: &'static str) -> SpanError {
        let mut byte = [0u8; 1];
        match self.stream.read(&mut byte).await {
            Ok(0) => SpanError::transport(step, &self.peer, ErrorKind::UnexpectedEof.into()),
            Ok(_) => SpanError::MalformedHandshake(format!(
                "{} sent data during {step}",
                self.peer
            )),
            Err(e) => SpanError::transport(step, &self.peer, e),
        }
    }

    async fn send(&mut self, bytes: &[u8], step: &'static str) -> Result<()> {
        self.stream
            .write_all(bytes)
            .await
            .map_err(|e| SpanError::transport(step, &self.peer, e))
    }

    async fn recv<const N: usize>(&mut self, step: &'static str) -> Result<[u8; N]> {
        let mut buf = [0u8; N];
        self.stream
            .read_exact(&mut buf)
            .await
            .map_err(|e| SpanError::transport(step, &self.peer, e))?;
        Ok(buf)
    }
}
