//! Utility functions shared by config loading and the file document store.

use std::fs;
use std::io;
use std::path::Path;

use crate::error::{Result, WaypointError};

/// Maximum file size that can be read into memory (4 MB).
///
/// A progress document with dozens of roadmaps stays far below this; anything
/// larger is treated as corrupt rather than loaded.
pub const MAX_FILE_SIZE: u64 = 4 * 1024 * 1024;

/// Read a file into a string, refusing files larger than [`MAX_FILE_SIZE`].
///
/// # Errors
///
/// Returns [`WaypointError::Storage`] if the file cannot be read or exceeds
/// the limit.
pub fn read_to_string_limited(path: &Path) -> Result<String> {
    read_to_string_with_limit(path, MAX_FILE_SIZE)
}

/// Read a file into a string with a custom size limit.
pub fn read_to_string_with_limit(path: &Path, max_size: u64) -> Result<String> {
    let metadata = fs::metadata(path).map_err(|e| WaypointError::storage(path, e))?;

    let size = metadata.len();
    if size > max_size {
        return Err(WaypointError::storage(
            path,
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("file is too large ({} bytes, max {} bytes)", size, max_size),
            ),
        ));
    }

    fs::read_to_string(path).map_err(|e| WaypointError::storage(path, e))
}

/// Turn an opaque id into a safe file stem.
///
/// ASCII alphanumerics, `-` and `_` pass through; every other byte is written
/// as `%XX`, so distinct ids never collide and no id can escape the directory.
pub fn encode_file_stem(id: &str) -> String {
    let mut out = String::with_capacity(id.len());
    for byte in id.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{:02X}", byte));
        }
    }
    out
}
