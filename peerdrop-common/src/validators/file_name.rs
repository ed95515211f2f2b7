//! File name validation
//!
//! Validates the bare file name a sender announces in its handshake before
//! the receiver joins it onto its target directory.

/// Maximum length for a received file name in bytes
pub const MAX_FILE_NAME_LENGTH: usize = 1024;

/// Validation error for file names
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileNameError {
    /// Name is empty
    Empty,
    /// Name exceeds maximum length
    TooLong,
    /// Name contains null bytes
    ContainsNull,
    /// Name contains a path separator
    ContainsSeparator,
    /// Name is `.` or `..`
    Reserved,
    /// Name contains control characters
    InvalidCharacters,
}

impl std::fmt::Display for FileNameError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let message = match self {
            Self::Empty => "file name is empty",
            Self::TooLong => "file name is too long",
            Self::ContainsNull => "file name contains a null byte",
            Self::ContainsSeparator => "file name contains a path separator",
            Self::Reserved => "file name is a reserved directory entry",
            Self::InvalidCharacters => "file name contains control characters",
        };
        f.write_str(message)
    }
}

impl std::error::Error for FileNameError {}

/// Validate a file name received from a peer
///
/// Checks:
/// - Not empty and not longer than 1024 bytes
/// - No null bytes or other control characters
/// - A single path component: no `/` or `\`, not `.` or `..`
///
/// # Errors
///
/// Returns a `FileNameError` variant describing the validation failure.
pub fn validate_file_name(name: &str) -> Result<(), FileNameError> {
    if name.is_empty() {
        return Err(FileNameError::Empty);
    }
    if name.len() > MAX_FILE_NAME_LENGTH {
        return Err(FileNameError::TooLong);
    }
    if name == "." || name == ".." {
        return Err(FileNameError::Reserved);
    }

    for ch in name.chars() {
        if ch == '\0' {
            return Err(FileNameError::ContainsNull);
        }
        if ch == '/' || ch == '\\' {
            return Err(FileNameError::ContainsSeparator);
        }
        if ch.is_control() {
            return Err(FileNameError::InvalidCharacters);
        }
    }

    Ok(())
}
