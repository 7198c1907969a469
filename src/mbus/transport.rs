//! # Byte Transport
//!
//! The transaction engine only needs a narrow contract from the physical link:
//! write a request, read single bytes with a timeout and drain late bytes.
//! [`Transport`] captures that contract; [`StreamTransport`] implements it for
//! any tokio byte stream (serial port or TCP socket).

use std::time::Duration;

use async_trait::async_trait;
use bytes::{Buf, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::MBusError;

/// Upper bound on bytes discarded by one purge, so a babbling line cannot stall the engine.
pub const MAX_PURGE_BYTES: usize = 4096;

/// Raw byte access to an M-Bus segment.
#[async_trait]
pub trait Transport: Send {
    /// Writes all bytes of one request.
    async fn write_all(&mut self, bytes: &[u8]) -> Result<(), MBusError>;

    /// Reads one byte, failing with [`MBusError::Timeout`] if none arrives in time.
    async fn read_byte(&mut self, timeout: Duration) -> Result<u8, MBusError>;

    /// Discards bytes until the line stays quiet for `quiet`; returns how many were dropped.
    async fn purge(&mut self, quiet: Duration) -> Result<usize, MBusError> {
        let mut purged = 0;
        while purged < MAX_PURGE_BYTES {
            match self.read_byte(quiet).await {
                Ok(_) => purged += 1,
                Err(MBusError::Timeout) => break,
                Err(e) => return Err(e),
            }
        }
        Ok(purged)
    }

    /// Releases the link.
    async fn close(&mut self) -> Result<(), MBusError> {
        Ok(())
    }

    /// Human readable description for log messages.
    fn describe(&self) -> String {
        "transport".to_string()
    }
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Box<T> {
    async fn write_all(&mut self, bytes: &[u8]) -> Result<(), MBusError> {
        (**self).write_all(bytes).await
    }

    async fn read_byte(&mut self, timeout: Duration) -> Result<u8, MBusError> {
        (**self).read_byte(timeout).await
    }

    async fn purge(&mut self, quiet: Duration) -> Result<usize, MBusError> {
        (**self).purge(quiet).await
    }

    async fn close(&mut self) -> Result<(), MBusError> {
        (**self).close().await
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

/// [`Transport`] over a tokio byte stream with a small read-ahead buffer.
#[derive(Debug)]
pub struct StreamTransport<S> {
    stream: S,
    read_ahead: BytesMut,
    description: String,
}

impl<S> StreamTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(stream: S, description: impl Into<String>) -> Self {
        Self {
            stream,
            read_ahead: BytesMut::with_capacity(256),
            description: description.into(),
        }
    }
}

#[async_trait]
impl<S> Transport for StreamTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn write_all(&mut self, bytes: &[u8]) -> Result<(), MBusError> {
        self.stream.write_all(bytes).await?;
        self.stream.flush().await?;
        Ok(())
    }

    async fn read_byte(&mut self, timeout: Duration) -> Result<u8, MBusError> {
        if self.read_ahead.has_remaining() {
            return Ok(self.read_ahead.get_u8());
        }

        let mut chunk = [0u8; 256];
        match tokio::time::timeout(timeout, self.stream.read(&mut chunk)).await {
            Err(_) => Err(MBusError::Timeout),
            Ok(Err(e)) => Err(e.into()),
            Ok(Ok(0)) => Err(MBusError::TransportIo {
                kind: std::io::ErrorKind::UnexpectedEof,
                message: format!("{} closed by peer", self.description),
            }),
            Ok(Ok(n)) => {
                self.read_ahead.extend_from_slice(&chunk[..n]);
                Ok(self.read_ahead.get_u8())
            }
        }
    }

    async fn close(&mut self) -> Result<(), MBusError> {
        self.read_ahead.clear();
        self.stream.shutdown().await?;
        Ok(())
    }

    fn describe(&self) -> String {
        self.description.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn test_stream_transport_reads_bytes_in_order() {
        let (client, mut server) = duplex(64);
        let mut transport = StreamTransport::new(client, "duplex");

        server.write_all(&[0xE5, 0x10]).await.unwrap();
        let timeout = Duration::from_millis(100);
        assert_eq!(transport.read_byte(timeout).await.unwrap(), 0xE5);
        assert_eq!(transport.read_byte(timeout).await.unwrap(), 0x10);
        assert_eq!(
            transport.read_byte(Duration::from_millis(20)).await,
            Err(MBusError::Timeout)
        );
    }

    #[tokio::test]
    async fn test_stream_transport_write_and_purge() {
        let (client, mut server) = duplex(64);
        let mut transport = StreamTransport::new(client, "duplex");

        transport.write_all(&[0x10, 0x40, 0x01, 0x41, 0x16]).await.unwrap();
        let mut buf = [0u8; 5];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf, [0x10, 0x40, 0x01, 0x41, 0x16]);

        server.write_all(&[1, 2, 3]).await.unwrap();
        let purged = transport.purge(Duration::from_millis(20)).await.unwrap();
        assert_eq!(purged, 3);
    }

    #[tokio::test]
    async fn test_scripted_stream_exchange() {
        let stream = tokio_test::io::Builder::new()
            .write(&[0x10, 0x40, 0x01, 0x41, 0x16])
            .read(&[0xE5])
            .read_error(std::io::Error::from(std::io::ErrorKind::ConnectionReset))
            .build();
        let mut transport = StreamTransport::new(stream, "scripted");

        transport.write_all(&[0x10, 0x40, 0x01, 0x41, 0x16]).await.unwrap();
        assert_eq!(transport.read_byte(Duration::from_millis(100)).await.unwrap(), 0xE5);

        let err = transport.read_byte(Duration::from_millis(100)).await.unwrap_err();
        assert!(err.is_transport_failure());
    }

    #[tokio::test]
    async fn test_stream_transport_eof_is_transport_failure() {
        let (client, server) = duplex(64);
        let mut transport = StreamTransport::new(client, "duplex");
        drop(server);

        let err = transport.read_byte(Duration::from_millis(50)).await.unwrap_err();
        assert!(err.is_transport_failure());
    }
}
