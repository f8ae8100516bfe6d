//! Length-prefixed framing over a byte stream.
//!
//! Frame layout: `LENGTH(u32, big-endian) || FLAGS(u8) || BODY`.
//! `LENGTH` counts the body only. Flag bit 0 marks an LZ4-compressed body.

use crate::compression::{self, COMPRESS_THRESHOLD};
use crate::config::NetConfig;
use crate::error::{FilechainError, Result};
use crate::peers::PeerAddr;
use crate::protocol::{Command, ACK};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

const FLAG_LZ4: u8 = 0b0000_0001;

/// Write one frame, compressing large bodies.
pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, body: &[u8]) -> Result<()> {
    let (flags, payload) = if body.len() > COMPRESS_THRESHOLD {
        (FLAG_LZ4, compression::compress(body))
    } else {
        (0, body.to_vec())
    };
    let len = u32::try_from(payload.len())
        .map_err(|_| FilechainError::Protocol("frame too large to send".into()))?;

    let mut header = [0u8; 5];
    header[..4].copy_from_slice(&len.to_be_bytes());
    header[4] = flags;
    writer.write_all(&header).await?;
    writer.write_all(&payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one frame, refusing bodies larger than `max_bytes`.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R, max_bytes: usize) -> Result<Vec<u8>> {
    let mut header = [0u8; 5];
    reader.read_exact(&mut header).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            FilechainError::Protocol("connection closed before frame".into())
        } else {
            FilechainError::Io(e)
        }
    })?;
    let len = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as usize;
    let flags = header[4];
    if len > max_bytes {
        return Err(FilechainError::Protocol(format!(
            "frame of {} bytes exceeds limit of {}",
            len, max_bytes
        )));
    }
    if flags & !FLAG_LZ4 != 0 {
        return Err(FilechainError::Protocol(format!("unknown frame flags {:#04x}", flags)));
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    if flags & FLAG_LZ4 != 0 {
        Ok(compression::decompress(&payload, max_bytes)?)
    } else {
        Ok(payload)
    }
}

/// One command exchange over a TCP connection; every operation is time-bounded.
pub struct Session {
    stream: TcpStream,
    peer: String,
    net: NetConfig,
}

impl Session {
    /// Wrap an accepted connection.
    pub fn new(stream: TcpStream, peer: String, net: NetConfig) -> Self {
        Self { stream, peer, net }
    }

    /// Connect to a node.
    pub async fn connect(addr: &PeerAddr, net: &NetConfig) -> Result<Self> {
        let target = (addr.host.as_str(), addr.port);
        let stream = match timeout(net.connect_timeout(), TcpStream::connect(target)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                return Err(FilechainError::PeerUnreachable {
                    peer: addr.to_string(),
                    reason: e.to_string(),
                })
            }
            Err(_) => {
                return Err(FilechainError::PeerUnreachable {
                    peer: addr.to_string(),
                    reason: "connect timed out".into(),
                })
            }
        };
        stream.set_nodelay(true)?;
        Ok(Self::new(stream, addr.to_string(), net.clone()))
    }

    /// Connect, send `command` and wait for the acknowledgement.
    pub async fn open(addr: &PeerAddr, command: Command, net: &NetConfig) -> Result<Self> {
        let mut session = Self::connect(addr, net).await?;
        session.send_token(command.token()).await?;
        let reply = session.recv_token().await?;
        if reply != ACK {
            return Err(FilechainError::Protocol(format!(
                "{} answered '{}' to {}",
                addr, reply, command
            )));
        }
        Ok(session)
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub async fn send_bytes(&mut self, body: &[u8]) -> Result<()> {
        let io_timeout = self.net.io_timeout();
        match timeout(io_timeout, write_frame(&mut self.stream, body)).await {
            Ok(result) => result,
            Err(_) => Err(FilechainError::Timeout(format!("write to {}", self.peer))),
        }
    }

    pub async fn recv_bytes(&mut self) -> Result<Vec<u8>> {
        let io_timeout = self.net.io_timeout();
        let max = self.net.max_frame_bytes;
        match timeout(io_timeout, read_frame(&mut self.stream, max)).await {
            Ok(result) => result,
            Err(_) => Err(FilechainError::Timeout(format!("read from {}", self.peer))),
        }
    }

    pub async fn send_token(&mut self, token: &str) -> Result<()> {
        self.send_bytes(token.as_bytes()).await
    }

    pub async fn recv_token(&mut self) -> Result<String> {
        let body = self.recv_bytes().await?;
        String::from_utf8(body).map_err(|_| FilechainError::Protocol("token is not UTF-8".into()))
    }

    pub async fn send<T: Serialize>(&mut self, value: &T) -> Result<()> {
        let body = serde_json::to_vec(value)?;
        self.send_bytes(&body).await
    }

    pub async fn recv<T: DeserializeOwned>(&mut self) -> Result<T> {
        let body = self.recv_bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }

    /// Send a count frame followed by one frame per item.
    pub async fn send_seq<T: Serialize>(&mut self, items: &[T]) -> Result<()> {
        self.send(&(items.len() as u64)).await?;
        for item in items {
            self.send(item).await?;
        }
        Ok(())
    }

    /// Receive a counted sequence, refusing counts above `limit`.
    pub async fn recv_seq<T: DeserializeOwned>(&mut self, limit: u64) -> Result<Vec<T>> {
        let count: u64 = self.recv().await?;
        if count > limit {
            return Err(FilechainError::Protocol(format!(
                "sequence of {} items exceeds limit of {}",
                count, limit
            )));
        }
        let mut items = Vec::with_capacity(count.min(1024) as usize);
        for _ in 0..count {
            items.push(self.recv().await?);
        }
        Ok(items)
    }

    /// Close the write side; a peer that already hung up is not an error.
    pub async fn close(mut self) {
        match timeout(self.net.io_timeout(), self.stream.shutdown()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => log::debug!("closing connection to {}: {}", self.peer, e),
            Err(_) => log::debug!("closing connection to {} timed out", self.peer),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn small_and_large_frames() {
        let (mut a, mut b) = tokio::io::duplex(1 << 16);
        let small = b"INSERT_FILE".to_vec();
        let large = vec![42u8; 20_000];

        write_frame(&mut a, &small).await.unwrap();
        write_frame(&mut a, &large).await.unwrap();
        write_frame(&mut a, b"").await.unwrap();

        assert_eq!(read_frame(&mut b, 1 << 20).await.unwrap(), small);
        assert_eq!(read_frame(&mut b, 1 << 20).await.unwrap(), large);
        assert!(read_frame(&mut b, 1 << 20).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn oversized_frame_rejected() {
        let (mut a, mut b) = tokio::io::duplex(1 << 16);
        write_frame(&mut a, &[1u8; 512]).await.unwrap();
        assert!(matches!(
            read_frame(&mut b, 100).await,
            Err(FilechainError::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn closed_stream_is_protocol_error() {
        let (a, mut b) = tokio::io::duplex(64);
        drop(a);
        assert!(matches!(
            read_frame(&mut b, 100).await,
            Err(FilechainError::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn unknown_flags_rejected() {
        let (mut a, mut b) = tokio::io::duplex(64);
        a.write_all(&[0, 0, 0, 1, 0x80, 7]).await.unwrap();
        assert!(matches!(
            read_frame(&mut b, 100).await,
            Err(FilechainError::Protocol(_))
        ));
    }
}
