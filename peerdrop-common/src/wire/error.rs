//! Wire codec errors

use std::io;

use thiserror::Error;

/// Error while encoding or decoding handshake fields
#[derive(Debug, Error)]
pub enum WireError {
    /// Underlying stream failure
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Stream ended in the middle of a field
    #[error("connection closed")]
    ConnectionClosed,

    /// String does not fit the 2-byte length prefix
    #[error("string of {0} bytes exceeds the 65535 byte limit")]
    StringTooLong(usize),

    /// String field bytes are not valid UTF-8
    #[error("string field is not valid UTF-8")]
    InvalidUtf8,

    /// File size is negative or does not fit a signed 64-bit integer
    #[error("invalid file size: {0}")]
    InvalidLength(i128),
}

impl WireError {
    /// Map an I/O error, treating unexpected EOF as a closed connection
    pub(crate) fn from_read(err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            Self::ConnectionClosed
        } else {
            Self::Io(err)
        }
    }

    /// Returns true if the peer closed the stream
    #[must_use]
    pub fn is_connection_closed(&self) -> bool {
        match self {
            Self::ConnectionClosed => true,
            Self::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::UnexpectedEof
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::BrokenPipe
            ),
            _ => false,
        }
    }
}

impl From<WireError> for io::Error {
    fn from(err: WireError) -> Self {
        match err {
            WireError::Io(e) => e,
            WireError::ConnectionClosed => {
                io::Error::new(io::ErrorKind::UnexpectedEof, "connection closed")
            }
            other => io::Error::new(io::ErrorKind::InvalidData, other.to_string()),
        }
    }
}
