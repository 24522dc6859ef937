//! Inverse walk: materialize a backup set's records under a target
//! directory.
//!
//! Records are applied in stream order, so within a run every directory
//! precedes its children and hard link targets precede the links. Directory
//! permissions and timestamps are applied in a final reverse pass, after all
//! children exist. Ownership, timestamps and device nodes are restored
//! best-effort; failures are logged and do not abort the walk.

use std::fs::{self, File};
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::{Component, Path, PathBuf};

use nix::sys::stat::{mknod, utimensat, Mode, SFlag, UtimensatFlags};
use nix::sys::time::TimeSpec;
use nix::unistd::{fchownat, FchownatFlags, Gid, Uid};

use crate::backend::Backend;
use crate::backup_set::BackupSet;
use crate::chunk::decode_chunk;
use crate::error::{Error, Result};
use crate::record::{BaseFileInfo, Record};

pub fn restore(set: &BackupSet, backend: &dyn Backend, target: &Path) -> Result<()> {
    let keyring_id = set.keyring.hex_id()?;
    let mut directories: Vec<(PathBuf, &BaseFileInfo)> = Vec::new();

    for record in set.records() {
        match record {
            Record::Start { .. } | Record::End { .. } => {}
            Record::Directory { info } => {
                let path = reroot(target, &info.name)?;
                fs::create_dir_all(&path).map_err(|err| Error::io(path.display(), err))?;
                directories.push((path, info));
            }
            Record::RegularFile { info, size, chunks } => {
                restore_file(set, backend, &keyring_id, target, info, *size, chunks)?;
            }
            Record::Symlink { info, target: link_target } => {
                let path = reroot(target, &info.name)?;
                remove_existing(&path)?;
                std::os::unix::fs::symlink(link_target, &path)
                    .map_err(|err| Error::io(path.display(), err))?;
                apply_ownership(&path, info);
            }
            Record::HardLink { name, target: link_target } => {
                let path = reroot(target, name)?;
                let original = reroot(target, link_target)?;
                remove_existing(&path)?;
                fs::hard_link(&original, &path)
                    .map_err(|err| Error::io(path.display(), err))?;
            }
            Record::Fifo { info } => {
                let path = reroot(target, &info.name)?;
                remove_existing(&path)?;
                let mode = Mode::from_bits_truncate(info.mode as u32);
                mknod(&path, SFlag::S_IFIFO, mode, 0)
                    .map_err(|errno| io_error(&path, errno))?;
                apply_metadata(&path, info);
            }
            Record::CharDevice { info, rdev } => {
                restore_device(target, info, SFlag::S_IFCHR, *rdev)?;
            }
            Record::BlockDevice { info, rdev } => {
                restore_device(target, info, SFlag::S_IFBLK, *rdev)?;
            }
        }
    }

    // children first, so a read-only directory mode cannot block its own
    // contents, and parent mtimes are not clobbered afterwards
    for (path, info) in directories.iter().rev() {
        apply_metadata(path, info);
    }
    Ok(())
}

fn restore_file(
    set: &BackupSet,
    backend: &dyn Backend,
    keyring_id: &str,
    target: &Path,
    info: &BaseFileInfo,
    size: i64,
    chunks: &[String],
) -> Result<()> {
    let path = reroot(target, &info.name)?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|err| Error::io(parent.display(), err))?;
    }

    let mut file = File::create(&path).map_err(|err| Error::io(path.display(), err))?;
    let mut written = 0u64;
    for chunk_id in chunks {
        let blob = backend.read_chunk(keyring_id, chunk_id)?.ok_or_else(|| {
            Error::CorruptBackupSet(format!("chunk {chunk_id} is missing from the store"))
        })?;
        let plaintext = decode_chunk(set.keyring, &blob)?;
        file.write_all(&plaintext)
            .map_err(|err| Error::io(path.display(), err))?;
        written += plaintext.len() as u64;
    }
    drop(file);

    if written != size as u64 {
        log::warn!(
            "{}: restored {} bytes but record declares {}",
            path.display(),
            written,
            size
        );
    }

    apply_metadata(&path, info);
    Ok(())
}

fn restore_device(target: &Path, info: &BaseFileInfo, kind: SFlag, rdev: u64) -> Result<()> {
    let path = reroot(target, &info.name)?;
    remove_existing(&path)?;
    let mode = Mode::from_bits_truncate(info.mode as u32);
    match mknod(&path, kind, mode, rdev) {
        Ok(()) => apply_metadata(&path, info),
        Err(errno) => {
            // creating device nodes needs privileges; keep going
            log::warn!("{}: cannot create device node: {}", path.display(), errno);
        }
    }
    Ok(())
}

/// Re-root a recorded path under the restore target, refusing anything that
/// would escape it.
fn reroot(target: &Path, name: &str) -> Result<PathBuf> {
    let mut path = target.to_path_buf();
    for component in Path::new(name).components() {
        match component {
            Component::RootDir | Component::CurDir => {}
            Component::Normal(part) => path.push(part),
            Component::ParentDir | Component::Prefix(_) => {
                return Err(Error::corrupt_record(format!(
                    "record path {name:?} escapes the restore target"
                )));
            }
        }
    }
    Ok(path)
}

fn remove_existing(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(Error::io(path.display(), err)),
    }
}

fn io_error(path: &Path, errno: nix::errno::Errno) -> Error {
    Error::io(
        path.display(),
        std::io::Error::from_raw_os_error(errno as i32),
    )
}

/// Permissions, ownership and timestamps, best-effort.
fn apply_metadata(path: &Path, info: &BaseFileInfo) {
    let permissions = fs::Permissions::from_mode(info.mode as u32 & 0o7777);
    if let Err(err) = fs::set_permissions(path, permissions) {
        log::warn!("{}: cannot set permissions: {}", path.display(), err);
    }
    apply_ownership(path, info);

    let atime = TimeSpec::new(
        info.atime_ns.div_euclid(1_000_000_000),
        info.atime_ns.rem_euclid(1_000_000_000),
    );
    let mtime = TimeSpec::new(
        info.mtime_ns.div_euclid(1_000_000_000),
        info.mtime_ns.rem_euclid(1_000_000_000),
    );
    if let Err(errno) = utimensat(
        None,
        path,
        &atime,
        &mtime,
        UtimensatFlags::NoFollowSymlink,
    ) {
        log::warn!("{}: cannot set timestamps: {}", path.display(), errno);
    }
}

fn apply_ownership(path: &Path, info: &BaseFileInfo) {
    let result = fchownat(
        None,
        path,
        Some(Uid::from_raw(info.uid as u32)),
        Some(Gid::from_raw(info.gid as u32)),
        FchownatFlags::NoFollowSymlink,
    );
    if let Err(errno) = result {
        log::debug!("{}: cannot set ownership: {}", path.display(), errno);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn reroot_strips_leading_root() {
        let path = reroot(Path::new("/restore"), "/srv/data/file").unwrap();
        assert_eq!(path, PathBuf::from("/restore/srv/data/file"));
    }

    #[test]
    fn reroot_rejects_parent_components() {
        assert!(reroot(Path::new("/restore"), "../evil").is_err());
        assert!(reroot(Path::new("/restore"), "a/../../evil").is_err());
    }
}
