//! Configuration directory probing for the local object store.

use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::PathBuf;

use crate::error::{Error, Result};

/// Locate `~/.cypherback`, creating it mode 0700 if missing.
///
/// A pre-existing directory with group or other permission bits set is
/// refused: it holds the wrapped keyring.
pub fn ensure_config_dir() -> Result<PathBuf> {
    let home = std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(|| {
            nix::unistd::User::from_uid(nix::unistd::getuid())
                .ok()
                .flatten()
                .map(|user| user.dir)
        })
        .ok_or_else(|| {
            Error::io(
                "$HOME",
                std::io::Error::new(std::io::ErrorKind::NotFound, "cannot determine home directory"),
            )
        })?;

    let config_dir = home.join(".cypherback");
    match std::fs::metadata(&config_dir) {
        Ok(metadata) => {
            if !metadata.is_dir() {
                return Err(Error::io(
                    config_dir.display(),
                    std::io::Error::new(std::io::ErrorKind::Other, "not a directory"),
                ));
            }
            if metadata.mode() & 0o077 != 0 {
                return Err(Error::io(
                    config_dir.display(),
                    std::io::Error::new(
                        std::io::ErrorKind::PermissionDenied,
                        "bad permissions (group/other access)",
                    ),
                ));
            }
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            std::fs::create_dir(&config_dir)
                .map_err(|err| Error::io(config_dir.display(), err))?;
            let permissions = std::fs::Permissions::from_mode(0o700);
            std::fs::set_permissions(&config_dir, permissions)
                .map_err(|err| Error::io(config_dir.display(), err))?;
        }
        Err(err) => return Err(Error::io(config_dir.display(), err)),
    }
    Ok(config_dir)
}
