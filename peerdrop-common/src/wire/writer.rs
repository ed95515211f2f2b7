//! Field writer for the handshake protocol

use tokio::io::{AsyncWrite, AsyncWriteExt};

use super::MAX_STRING_LENGTH;
use super::error::WireError;
use super::handshake::{Handshake, size_to_long};

/// Append a length-prefixed UTF-8 string to `out`
pub(crate) fn encode_string(out: &mut Vec<u8>, value: &str) -> Result<(), WireError> {
    let bytes = value.as_bytes();
    if bytes.len() > MAX_STRING_LENGTH {
        return Err(WireError::StringTooLong(bytes.len()));
    }
    out.extend_from_slice(&(bytes.len() as u16).to_be_bytes());
    out.extend_from_slice(bytes);
    Ok(())
}

/// Append a big-endian signed 64-bit integer to `out`
pub(crate) fn encode_long(out: &mut Vec<u8>, value: i64) {
    out.extend_from_slice(&value.to_be_bytes());
}

/// Writes handshake fields and file bytes to an async writer
pub struct WireWriter<W> {
    writer: W,
}

impl<W> WireWriter<W> {
    /// Create a new wire writer
    pub fn new(writer: W) -> Self {
        Self { writer }
    }
}

impl<W: AsyncWrite + Unpin> WireWriter<W> {
    /// Write a `String` field (not flushed)
    ///
    /// # Errors
    ///
    /// Returns an error if the string exceeds 65535 bytes or an I/O error occurs.
    pub async fn write_string(&mut self, value: &str) -> Result<(), WireError> {
        let mut bytes = Vec::with_capacity(value.len() + super::STRING_PREFIX_LENGTH);
        encode_string(&mut bytes, value)?;
        self.writer.write_all(&bytes).await?;
        Ok(())
    }

    /// Write a `Long` field (not flushed)
    ///
    /// # Errors
    ///
    /// Returns an error if an I/O error occurs.
    pub async fn write_long(&mut self, value: i64) -> Result<(), WireError> {
        self.writer.write_i64(value).await?;
        Ok(())
    }

    /// Write the three handshake fields and flush
    ///
    /// # Errors
    ///
    /// Returns an error if a field cannot be encoded or an I/O error occurs.
    pub async fn write_handshake(&mut self, handshake: &Handshake) -> Result<(), WireError> {
        self.write_string(&handshake.transfer_id).await?;
        self.write_string(&handshake.file_name).await?;
        self.write_long(size_to_long(handshake.file_size)?).await?;
        self.flush().await
    }

    /// Write a response token (`ACCEPT`, `COMPLETE`) and flush
    ///
    /// # Errors
    ///
    /// Returns an error if an I/O error occurs.
    pub async fn write_token(&mut self, token: &str) -> Result<(), WireError> {
        self.write_string(token).await?;
        self.flush().await
    }

    /// Write one chunk of raw file bytes and flush
    ///
    /// # Errors
    ///
    /// Returns an error if an I/O error occurs.
    pub async fn write_chunk(&mut self, chunk: &[u8]) -> Result<(), WireError> {
        self.writer.write_all(chunk).await?;
        self.flush().await
    }

    /// Flush buffered bytes to the stream
    ///
    /// # Errors
    ///
    /// Returns an error if an I/O error occurs.
    pub async fn flush(&mut self) -> Result<(), WireError> {
        self.writer.flush().await?;
        Ok(())
    }
}
