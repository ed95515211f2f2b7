//! Field reader for the handshake protocol

use tokio::io::{AsyncRead, AsyncReadExt};

use super::error::WireError;
use super::handshake::{Handshake, long_to_size};

/// Reads handshake fields and file bytes from an async reader
pub struct WireReader<R> {
    reader: R,
}

impl<R> WireReader<R> {
    /// Create a new wire reader
    pub fn new(reader: R) -> Self {
        Self { reader }
    }
}

impl<R: AsyncRead + Unpin> WireReader<R> {
    /// Read one `String` field
    ///
    /// # Errors
    ///
    /// Returns `ConnectionClosed` if the stream ends inside the field,
    /// `InvalidUtf8` for malformed text, or an I/O error.
    pub async fn read_string(&mut self) -> Result<String, WireError> {
        let length = self
            .reader
            .read_u16()
            .await
            .map_err(WireError::from_read)?;

        let mut bytes = vec![0u8; usize::from(length)];
        self.reader
            .read_exact(&mut bytes)
            .await
            .map_err(WireError::from_read)?;

        String::from_utf8(bytes).map_err(|_| WireError::InvalidUtf8)
    }

    /// Read one `Long` field
    ///
    /// # Errors
    ///
    /// Returns `ConnectionClosed` if the stream ends inside the field or an I/O error.
    pub async fn read_long(&mut self) -> Result<i64, WireError> {
        self.reader.read_i64().await.map_err(WireError::from_read)
    }

    /// Read a `Long` field that must hold a non-negative byte count
    ///
    /// # Errors
    ///
    /// Returns `InvalidLength` for negative values, plus the errors of [`read_long`](Self::read_long).
    pub async fn read_size(&mut self) -> Result<u64, WireError> {
        long_to_size(self.read_long().await?)
    }

    /// Read the three handshake fields sent by a peer
    ///
    /// # Errors
    ///
    /// Returns an error if any field is malformed or the stream fails.
    pub async fn read_handshake(&mut self) -> Result<Handshake, WireError> {
        let transfer_id = self.read_string().await?;
        let file_name = self.read_string().await?;
        let file_size = self.read_size().await?;

        Ok(Handshake {
            transfer_id,
            file_name,
            file_size,
        })
    }

    /// Read up to `buf.len()` raw bytes
    ///
    /// Returns `Ok(0)` at end of stream; callers that expect more bytes treat
    /// that as a truncated transfer.
    ///
    /// # Errors
    ///
    /// Returns an error if an I/O error occurs.
    pub async fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize, WireError> {
        Ok(self.reader.read(buf).await?)
    }
}
