//! In-memory object store, used by tests.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::Result;

use super::Backend;

#[derive(Default)]
struct Inner {
    secrets: HashMap<String, Vec<u8>>,
    default_secrets: Option<Vec<u8>>,
    backup_sets: HashMap<String, Vec<u8>>,
    chunks: HashMap<String, Vec<u8>>,
}

#[derive(Default)]
pub struct MemoryBackend {
    inner: Mutex<Inner>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct chunk blobs stored; used by dedup tests.
    pub fn chunk_count(&self) -> usize {
        self.inner.lock().unwrap().chunks.len()
    }
}

impl Backend for MemoryBackend {
    fn write_secrets(&self, keyring_id: &str, data: &[u8]) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.secrets.insert(keyring_id.to_string(), data.to_vec());
        if inner.default_secrets.is_none() {
            inner.default_secrets = Some(data.to_vec());
        }
        Ok(())
    }

    fn read_secrets(&self) -> Result<Vec<u8>> {
        self.inner
            .lock()
            .unwrap()
            .default_secrets
            .clone()
            .ok_or_else(|| {
                crate::error::Error::io(
                    "defaultSecrets",
                    std::io::Error::new(std::io::ErrorKind::NotFound, "no default keyring"),
                )
            })
    }

    fn write_backup_set(&self, _keyring_id: &str, set_id: &str, data: &[u8]) -> Result<()> {
        self.inner
            .lock()
            .unwrap()
            .backup_sets
            .insert(set_id.to_string(), data.to_vec());
        Ok(())
    }

    fn read_backup_set(&self, _keyring_id: &str, set_id: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.inner.lock().unwrap().backup_sets.get(set_id).cloned())
    }

    fn write_chunk(&self, _keyring_id: &str, chunk_id: &str, data: &[u8]) -> Result<()> {
        self.inner
            .lock()
            .unwrap()
            .chunks
            .insert(chunk_id.to_string(), data.to_vec());
        Ok(())
    }

    fn read_chunk(&self, _keyring_id: &str, chunk_id: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.inner.lock().unwrap().chunks.get(chunk_id).cloned())
    }
}
