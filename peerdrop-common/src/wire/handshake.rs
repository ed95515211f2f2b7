//! Transfer handshake message

use uuid::Uuid;

use super::error::WireError;
use super::writer::{encode_long, encode_string};

/// Metadata the sender announces before streaming a file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    /// Transfer identifier chosen by the sender (UUID for this implementation)
    pub transfer_id: String,
    /// Bare file name, no directory components
    pub file_name: String,
    /// Exact number of bytes that follow the `ACCEPT` token
    pub file_size: u64,
}

impl Handshake {
    /// Create a handshake with a fresh random transfer id
    pub fn new(file_name: impl Into<String>, file_size: u64) -> Self {
        Self {
            transfer_id: Uuid::new_v4().to_string(),
            file_name: file_name.into(),
            file_size,
        }
    }

    /// Encode the handshake exactly as it appears on the wire
    ///
    /// # Errors
    ///
    /// Returns an error if a string exceeds the length prefix or the size
    /// does not fit a signed 64-bit integer.
    pub fn to_bytes(&self) -> Result<Vec<u8>, WireError> {
        let mut bytes = Vec::with_capacity(
            self.transfer_id.len() + self.file_name.len() + 2 * super::STRING_PREFIX_LENGTH
                + super::LONG_LENGTH,
        );
        encode_string(&mut bytes, &self.transfer_id)?;
        encode_string(&mut bytes, &self.file_name)?;
        encode_long(&mut bytes, size_to_long(self.file_size)?);
        Ok(bytes)
    }
}

/// Convert a file size to the signed wire representation
pub(crate) fn size_to_long(size: u64) -> Result<i64, WireError> {
    i64::try_from(size).map_err(|_| WireError::InvalidLength(i128::from(size)))
}

/// Convert a decoded wire value back to a file size
pub(crate) fn long_to_size(value: i64) -> Result<u64, WireError> {
    u64::try_from(value).map_err(|_| WireError::InvalidLength(i128::from(value)))
}
