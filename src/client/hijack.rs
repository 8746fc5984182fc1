//! Hijacked connections.
//!
//! Attach and exec sessions upgrade their HTTP connection into a raw duplex byte stream.
//! The [`HijackedStream`] owns that connection; its read and write sides can be used
//! independently, and on transports that support it the write side can be closed while the
//! read side keeps receiving output.
//!
//! # Examples
//!
//! ```ignore
//! use dockhand::{ApiRequest, EngineClient, EndpointConfig};
//! use tokio::io::{AsyncReadExt, AsyncWriteExt};
//!
//! let client = EngineClient::new(EndpointConfig::default())?;
//! let request = ApiRequest::post("containers/web/attach")
//!     .with_query("stream", "1")
//!     .with_query("stdin", "1");
//! let session = client.request_hijacked(request, &[]).await?;
//!
//! let (mut reader, mut writer) = session.into_split();
//! writer.write_all(b"echo hi\n").await?;
//! writer.close_write().await?;
//!
//! let mut output = Vec::new();
//! reader.read_to_end(&mut output).await?;
//! ```

use crate::error::{EngineError, Result};
use std::fmt;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf, ReadHalf, WriteHalf};

/// Byte stream a hijacked session runs over.
pub(crate) trait HijackIo: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> HijackIo for T {}

type BoxedIo = Box<dyn HijackIo>;

fn half_close_unsupported() -> EngineError {
    EngineError::UnsupportedOperation("the transport cannot close only the write side".into())
}

/// Duplex byte channel over an upgraded connection.
///
/// Dropping it closes the connection.
pub struct HijackedStream {
    io: BoxedIo,
    can_close_write: bool,
}

impl HijackedStream {
    pub(crate) fn new<T>(io: T, can_close_write: bool) -> Self
    where
        T: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        HijackedStream {
            io: Box::new(io),
            can_close_write,
        }
    }

    /// True if [`close_write`](Self::close_write) is supported.
    pub fn can_close_write(&self) -> bool {
        self.can_close_write
    }

    /// Signal end of input to the remote side while keeping the read side open.
    ///
    /// # Errors
    ///
    /// [`EngineError::UnsupportedOperation`] on transports without half-close.
    pub async fn close_write(&mut self) -> Result<()> {
        if !self.can_close_write {
            return Err(half_close_unsupported());
        }
        self.io.shutdown().await?;
        Ok(())
    }

    /// Split into halves that can be moved to different tasks.
    pub fn into_split(self) -> (HijackReader, HijackWriter) {
        let (reader, writer) = tokio::io::split(self.io);
        (
            HijackReader { inner: reader },
            HijackWriter {
                inner: writer,
                can_close_write: self.can_close_write,
            },
        )
    }
}

impl fmt::Debug for HijackedStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HijackedStream")
            .field("can_close_write", &self.can_close_write)
            .finish_non_exhaustive()
    }
}

impl AsyncRead for HijackedStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.io).poll_read(cx, buf)
    }
}

impl AsyncWrite for HijackedStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.io).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.io).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.io).poll_shutdown(cx)
    }
}

/// Read half of a [`HijackedStream`].
pub struct HijackReader {
    inner: ReadHalf<BoxedIo>,
}

impl fmt::Debug for HijackReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HijackReader").finish_non_exhaustive()
    }
}

impl AsyncRead for HijackReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

/// Write half of a [`HijackedStream`].
pub struct HijackWriter {
    inner: WriteHalf<BoxedIo>,
    can_close_write: bool,
}

impl HijackWriter {
    /// True if [`close_write`](Self::close_write) is supported.
    pub fn can_close_write(&self) -> bool {
        self.can_close_write
    }

    /// Signal end of input to the remote side.
    pub async fn close_write(&mut self) -> Result<()> {
        if !self.can_close_write {
            return Err(half_close_unsupported());
        }
        self.inner.shutdown().await?;
        Ok(())
    }
}

impl fmt::Debug for HijackWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HijackWriter")
            .field("can_close_write", &self.can_close_write)
            .finish_non_exhaustive()
    }
}

impl AsyncWrite for HijackWriter {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn test_half_close_keeps_read_side() {
        let (local, mut remote) = tokio::io::duplex(64);
        let mut stream = HijackedStream::new(local, true);

        stream.write_all(b"input").await.unwrap();
        stream.close_write().await.unwrap();

        let mut received = Vec::new();
        remote.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, b"input");

        remote.write_all(b"output").await.unwrap();
        drop(remote);

        let mut output = Vec::new();
        stream.read_to_end(&mut output).await.unwrap();
        assert_eq!(output, b"output");
    }

    #[tokio::test]
    async fn test_close_write_unsupported() {
        let mock = tokio_test::io::Builder::new().build();
        let mut stream = HijackedStream::new(mock, false);
        assert!(!stream.can_close_write());
        let err = stream.close_write().await.unwrap_err();
        assert!(matches!(err, EngineError::UnsupportedOperation(_)));
    }

    #[tokio::test]
    async fn test_split_halves_on_separate_tasks() {
        let mock = tokio_test::io::Builder::new()
            .write(b"stdin data")
            .read(b"stdout data")
            .build();
        let (mut reader, mut writer) = HijackedStream::new(mock, true).into_split();

        let write = tokio::spawn(async move {
            writer.write_all(b"stdin data").await.unwrap();
        });
        let mut buf = vec![0u8; 11];
        reader.read_exact(&mut buf).await.unwrap();
        write.await.unwrap();
        assert_eq!(buf, b"stdout data");
    }

    #[tokio::test]
    async fn test_writer_close_write_unsupported() {
        let (local, _remote) = tokio::io::duplex(8);
        let (_reader, mut writer) = HijackedStream::new(local, false).into_split();
        assert!(!writer.can_close_write());
        assert!(writer.close_write().await.is_err());
    }
}
