//! Pluggable object stores.
//!
//! A backend stores opaque byte blobs addressed by hex identifiers: one
//! keyring blob per keyring id (plus a "default keyring" alias), one backup
//! set blob per manifest id, and one blob per chunk id. The engine never
//! knows where the bytes live; retry policy belongs to the implementation.

use crate::error::Result;

mod file;
mod memory;
mod s3;

pub use file::FileBackend;
pub use memory::MemoryBackend;
pub use s3::S3Backend;

pub trait Backend {
    /// Store a wrapped keyring blob under its id. The first keyring stored
    /// becomes the default.
    fn write_secrets(&self, keyring_id: &str, data: &[u8]) -> Result<()>;

    /// Fetch the default keyring blob.
    fn read_secrets(&self) -> Result<Vec<u8>>;

    fn write_backup_set(&self, keyring_id: &str, set_id: &str, data: &[u8]) -> Result<()>;

    fn read_backup_set(&self, keyring_id: &str, set_id: &str) -> Result<Option<Vec<u8>>>;

    fn write_chunk(&self, keyring_id: &str, chunk_id: &str, data: &[u8]) -> Result<()>;

    fn read_chunk(&self, keyring_id: &str, chunk_id: &str) -> Result<Option<Vec<u8>>>;
}

/// Sharded relative path for a chunk id: `aa/bb/cc/dd/<chunk_id>`.
pub(crate) fn chunk_rel_path(chunk_id: &str) -> String {
    // chunk ids are 96 hex chars; anything shorter is a caller bug
    format!(
        "{}/{}/{}/{}/{}",
        &chunk_id[0..2],
        &chunk_id[2..4],
        &chunk_id[4..6],
        &chunk_id[6..8],
        chunk_id
    )
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn chunk_paths_are_sharded() {
        let id = "deadbeef".repeat(12);
        assert_eq!(
            chunk_rel_path(&id),
            format!("de/ad/be/ef/{id}")
        );
    }
}
