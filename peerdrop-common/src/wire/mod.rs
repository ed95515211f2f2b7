//! Handshake wire format
//!
//! Every field is big-endian and written back to back on a single
//! bidirectional stream. There is no record framing beyond field order, so
//! both peers must read fields in exactly the sequence they were written.
//!
//! **Field encodings:**
//! - `String`: 2-byte unsigned length (in bytes) followed by UTF-8 bytes
//! - `Long`: 8 bytes, two's-complement
//!
//! **Exchange for one file:**
//! 1. Sender: `transfer_id` (String), `file_name` (String), `file_size` (Long)
//! 2. Receiver: `"ACCEPT"` (String)
//! 3. Sender: exactly `file_size` raw bytes
//! 4. Receiver: `"COMPLETE"` (String)

mod error;
mod handshake;
mod reader;
mod writer;

pub use error::WireError;
pub use handshake::Handshake;
pub use reader::WireReader;
pub use writer::WireWriter;

/// Token the receiver sends once it is ready to take the file bytes
pub const TOKEN_ACCEPT: &str = "ACCEPT";

/// Token the receiver sends after writing the last byte
pub const TOKEN_COMPLETE: &str = "COMPLETE";

/// Maximum encoded length of a `String` field in bytes
pub const MAX_STRING_LENGTH: usize = u16::MAX as usize;

/// Size of the `String` length prefix
pub const STRING_PREFIX_LENGTH: usize = 2;

/// Size of a `Long` field
pub const LONG_LENGTH: usize = 8;
