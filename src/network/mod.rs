//! Network Module
//!
//! Framed TCP request/response transport shared by client queries and
//! replication. Each frame is `[length u32 LE][crc32 u32 LE][body]`.

mod client;
mod server;

pub use client::{NetworkClient, DEFAULT_MAX_RESPONSE_SIZE};
pub use server::{NetworkServer, ServerOptions};

use async_trait::async_trait;
use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Error, Result};

/// Handles one request body and produces the response body
#[async_trait]
pub trait RequestHandler: Send + Sync + 'static {
    async fn handle(&self, request: Vec<u8>) -> Vec<u8>;
}

/// Frame header for wire protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Body length
    pub length: u32,
    /// Body checksum
    pub checksum: u32,
}

impl FrameHeader {
    /// Header size in bytes
    pub const SIZE: usize = 8;

    /// Create a header describing `data`
    pub fn new(data: &[u8]) -> Result<Self> {
        let length = u32::try_from(data.len()).map_err(|_| Error::MessageTooLarge {
            size: data.len(),
            limit: u32::MAX as usize,
        })?;
        Ok(Self {
            length,
            checksum: crc32fast::hash(data),
        })
    }

    /// Serialize header to bytes
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0u8; Self::SIZE];
        bytes[0..4].copy_from_slice(&self.length.to_le_bytes());
        bytes[4..8].copy_from_slice(&self.checksum.to_le_bytes());
        bytes
    }

    /// Deserialize header from bytes
    pub fn from_bytes(bytes: &[u8; Self::SIZE]) -> Self {
        let [l0, l1, l2, l3, c0, c1, c2, c3] = *bytes;
        Self {
            length: u32::from_le_bytes([l0, l1, l2, l3]),
            checksum: u32::from_le_bytes([c0, c1, c2, c3]),
        }
    }
}

/// Read one frame body, rejecting bodies longer than `max_len`
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R, max_len: usize) -> Result<Vec<u8>> {
    let mut header_bytes = [0u8; FrameHeader::SIZE];
    reader.read_exact(&mut header_bytes).await?;
    let header = FrameHeader::from_bytes(&header_bytes);

    let length = header.length as usize;
    if length > max_len {
        return Err(Error::MessageTooLarge {
            size: length,
            limit: max_len,
        });
    }

    let mut body = vec![0u8; length];
    reader.read_exact(&mut body).await?;

    if crc32fast::hash(&body) != header.checksum {
        return Err(Error::Network("Message checksum mismatch".into()));
    }

    Ok(body)
}

/// Write one frame
pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, body: &[u8]) -> Result<()> {
    let header = FrameHeader::new(body)?;

    let mut frame = BytesMut::with_capacity(FrameHeader::SIZE + body.len());
    frame.put_slice(&header.to_bytes());
    frame.put_slice(body);

    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Whether an error just means the peer hung up
pub(crate) fn is_disconnect(error: &Error) -> bool {
    match error {
        Error::Io(e) => matches!(
            e.kind(),
            std::io::ErrorKind::UnexpectedEof
                | std::io::ErrorKind::ConnectionReset
                | std::io::ErrorKind::BrokenPipe
        ),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_header() {
        let data = b"test data";
        let header = FrameHeader::new(data).unwrap();
        let restored = FrameHeader::from_bytes(&header.to_bytes());

        assert_eq!(header, restored);
        assert_eq!(restored.length, 9);
    }

    #[tokio::test]
    async fn test_frame_over_duplex() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        write_frame(&mut a, b"GET key").await.unwrap();
        assert_eq!(read_frame(&mut b, 64).await.unwrap(), b"GET key".to_vec());
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        write_frame(&mut a, &[7u8; 100]).await.unwrap();

        match read_frame(&mut b, 10).await {
            Err(Error::MessageTooLarge { size, limit }) => {
                assert_eq!(size, 100);
                assert_eq!(limit, 10);
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_checksum_mismatch() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        let mut header = FrameHeader::new(b"abc").unwrap();
        header.checksum ^= 1;
        a.write_all(&header.to_bytes()).await.unwrap();
        a.write_all(b"abc").await.unwrap();

        assert!(matches!(read_frame(&mut b, 64).await, Err(Error::Network(_))));
    }

    #[tokio::test]
    async fn test_eof_is_disconnect() {
        let (a, mut b) = tokio::io::duplex(64);
        drop(a);
        let err = read_frame(&mut b, 64).await.unwrap_err();
        assert!(is_disconnect(&err));
    }
}
