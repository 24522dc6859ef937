//! Local directory object store.
//!
//! Layout under the root:
//!
//! ```text
//! <root>/defaultSecrets                      -> symlink to a secrets file
//! <root>/<keyring_id>/secrets
//! <root>/<keyring_id>/sets/<manifest_id>
//! <root>/<keyring_id>/chunks/aa/bb/cc/dd/<chunk_id>
//! ```

use std::fs;
use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

use super::{chunk_rel_path, Backend};

pub struct FileBackend {
    root: PathBuf,
}

impl FileBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn write_blob(&self, path: &Path, data: &[u8], mode: u32) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| Error::io(parent.display(), err))?;
        }
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(mode)
            .open(path)
            .map_err(|err| Error::io(path.display(), err))?;
        file.write_all(data)
            .map_err(|err| Error::io(path.display(), err))?;
        Ok(())
    }

    fn read_blob(&self, path: &Path) -> Result<Option<Vec<u8>>> {
        match fs::read(path) {
            Ok(data) => Ok(Some(data)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(Error::io(path.display(), err)),
        }
    }
}

impl Backend for FileBackend {
    fn write_secrets(&self, keyring_id: &str, data: &[u8]) -> Result<()> {
        let path = self.root.join(keyring_id).join("secrets");
        self.write_blob(&path, data, 0o600)?;

        // first keyring stored becomes the default
        let default_path = self.root.join("defaultSecrets");
        if let Err(err) = std::os::unix::fs::symlink(&path, &default_path) {
            if err.kind() != std::io::ErrorKind::AlreadyExists {
                return Err(Error::io(default_path.display(), err));
            }
        }
        Ok(())
    }

    fn read_secrets(&self) -> Result<Vec<u8>> {
        let path = self.root.join("defaultSecrets");
        fs::read(&path).map_err(|err| Error::io(path.display(), err))
    }

    fn write_backup_set(&self, keyring_id: &str, set_id: &str, data: &[u8]) -> Result<()> {
        let path = self.root.join(keyring_id).join("sets").join(set_id);
        self.write_blob(&path, data, 0o600)
    }

    fn read_backup_set(&self, keyring_id: &str, set_id: &str) -> Result<Option<Vec<u8>>> {
        self.read_blob(&self.root.join(keyring_id).join("sets").join(set_id))
    }

    fn write_chunk(&self, keyring_id: &str, chunk_id: &str, data: &[u8]) -> Result<()> {
        let path = self
            .root
            .join(keyring_id)
            .join("chunks")
            .join(chunk_rel_path(chunk_id));
        self.write_blob(&path, data, 0o600)
    }

    fn read_chunk(&self, keyring_id: &str, chunk_id: &str) -> Result<Option<Vec<u8>>> {
        self.read_blob(
            &self
                .root
                .join(keyring_id)
                .join("chunks")
                .join(chunk_rel_path(chunk_id)),
        )
    }
}
