//! Storage Module
//!
//! Local file persistence consumed by the replication coordinator and the
//! peer request handler.

mod disk;

pub use disk::DiskStore;

use crate::error::{Error, Result};
use crate::types::Timestamp;

/// Longest accepted filename in bytes (exclusive)
pub const MAX_FILENAME_LEN: usize = 255;

/// Storage adapter for a node's replicated files
#[async_trait::async_trait]
pub trait FileStore: Send + Sync {
    /// Whether the file exists locally
    async fn exists(&self, name: &str) -> Result<bool>;

    /// Local modification time, or `None` when absent
    async fn mod_time(&self, name: &str) -> Result<Option<Timestamp>>;

    /// Read the whole file
    async fn read(&self, name: &str) -> Result<Vec<u8>>;

    /// Read the whole file together with its modification time, both taken
    /// from one open handle. `None` when absent.
    async fn read_versioned(&self, name: &str) -> Result<Option<(Vec<u8>, Timestamp)>>;

    /// Atomically replace the file; `modified` pins its modification time
    async fn write(&self, name: &str, data: &[u8], modified: Option<Timestamp>) -> Result<()>;

    /// Names of all stored files, sorted
    async fn list(&self) -> Result<Vec<String>>;
}

/// Reject names that could escape the data directory or collide with temp files
pub fn validate_filename(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name.len() < MAX_FILENAME_LEN
        && !name.contains('/')
        && !name.contains('\\')
        && !name.contains("..")
        && !name.starts_with('.')
        && !name.contains('\0');

    if valid {
        Ok(())
    } else {
        Err(Error::InvalidFilename(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_filename() {
        assert!(validate_filename("report.txt").is_ok());
        assert!(validate_filename("x").is_ok());

        for bad in ["", "a/b", "a\\b", "..", "x..y", ".hidden", "nul\0byte"] {
            assert!(
                matches!(validate_filename(bad), Err(Error::InvalidFilename(_))),
                "{:?} should be rejected",
                bad
            );
        }

        assert!(validate_filename(&"a".repeat(254)).is_ok());
        assert!(validate_filename(&"a".repeat(255)).is_err());
    }
}
