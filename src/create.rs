//! Filesystem walk: one record per directory entry, regular files split
//! into fixed-size chunks and staged as encrypted blobs.
//!
//! Traversal is recursive, depth-first, in the order the OS hands out
//! directory entries. Every probe is an `lstat`; symlinks are recorded, not
//! followed. Read errors abort the current entry with its path attached;
//! records already emitted stay valid and the caller decides whether to
//! continue with other roots.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use nix::sys::stat::{lstat, FileStat};
use nix::unistd::{Gid, Group, Uid, User};

use crate::backup_set::BackupSet;
use crate::chunk::{chunk_id, compress_into};
use crate::chunk_writer::ChunkWriter;
use crate::error::{Error, Result};
use crate::file_formats::CHUNK_SIZE;
use crate::record::{BaseFileInfo, Record};

/// Walk `path` and append one record per entry to the open run.
pub fn process_path(set: &mut BackupSet, path: &Path) -> Result<()> {
    set.assert_recording()?;
    walk(set, path)
}

fn walk(set: &mut BackupSet, path: &Path) -> Result<()> {
    let stat = lstat(path).map_err(|errno| {
        Error::io(path.display(), std::io::Error::from_raw_os_error(errno as i32))
    })?;

    let record = record_for_entry(set, path, &stat)?;
    log::debug!("recording {} (tag {})", path.display(), record.tag());
    set.records.push(record);

    if stat.st_mode & libc::S_IFMT == libc::S_IFDIR {
        let entries = std::fs::read_dir(path).map_err(|err| Error::io(path.display(), err))?;
        for entry in entries {
            let entry = entry.map_err(|err| Error::io(path.display(), err))?;
            walk(set, &entry.path())?;
        }
    }
    Ok(())
}

/// Pick the record variant for one directory entry; handles hard link
/// detection and, for regular files, the chunking pass.
fn record_for_entry(set: &mut BackupSet, path: &Path, stat: &FileStat) -> Result<Record> {
    let name = path.to_string_lossy().into_owned();

    let inode = (stat.st_dev, stat.st_ino);
    if let Some(target) = set.hard_links.get(&inode) {
        return Ok(Record::HardLink {
            name,
            target: target.clone(),
        });
    }

    let record = match stat.st_mode & libc::S_IFMT {
        libc::S_IFDIR => Record::Directory {
            info: base_file_info(name, stat),
        },
        libc::S_IFLNK => {
            let target = std::fs::read_link(path)
                .map_err(|err| Error::io(path.display(), err))?
                .to_string_lossy()
                .into_owned();
            Record::Symlink {
                info: base_file_info(name, stat),
                target,
            }
        }
        libc::S_IFCHR => Record::CharDevice {
            info: base_file_info(name, stat),
            rdev: stat.st_rdev,
        },
        libc::S_IFBLK => Record::BlockDevice {
            info: base_file_info(name, stat),
            rdev: stat.st_rdev,
        },
        libc::S_IFIFO => Record::Fifo {
            info: base_file_info(name, stat),
        },
        libc::S_IFSOCK => {
            return Err(Error::UnsupportedFileKind {
                path: path.to_path_buf(),
                kind: "socket",
            });
        }
        _ => regular_file_record(set, path, name, stat)?,
    };

    set.hard_links
        .insert(inode, path.to_string_lossy().into_owned());
    Ok(record)
}

/// Chunk a regular file: hash every 256 KiB slice into its content address,
/// record the id (duplicates included, so restore reassembles in order) and
/// stage each first-seen chunk as an encrypted blob in the temp area.
fn regular_file_record(
    set: &mut BackupSet,
    path: &Path,
    name: String,
    stat: &FileStat,
) -> Result<Record> {
    let info = base_file_info(name, stat);
    let size = stat.st_size;
    let mut chunks = Vec::new();

    if size > 0 {
        let mut file = File::open(path).map_err(|err| Error::io(path.display(), err))?;
        let mut buf = vec![0u8; CHUNK_SIZE];
        loop {
            let n = read_full(&mut file, &mut buf)
                .map_err(|err| Error::io(path.display(), err))?;
            if n == 0 {
                break;
            }

            let id = chunk_id(set.keyring, &buf[..n])?;
            let hex_id = hex::encode(id);
            chunks.push(hex_id.clone());

            if set.seen_chunks.insert(id) {
                stage_chunk(set, &hex_id, &buf[..n])?;
            }

            if n < CHUNK_SIZE {
                break;
            }
        }
    }

    Ok(Record::RegularFile { info, size, chunks })
}

/// Compress and encrypt one chunk into the run's temp area.
fn stage_chunk(set: &BackupSet, hex_id: &str, plaintext: &[u8]) -> Result<()> {
    let chunk_path = set.temp_path().join(hex_id);
    let sink = File::create(&chunk_path).map_err(|err| Error::io(chunk_path.display(), err))?;
    let mut writer = ChunkWriter::new(sink, set.keyring)?;
    compress_into(plaintext, &mut writer)?;
    writer.close()?;
    Ok(())
}

/// Read until `buf` is full or the file ends; returns the filled length.
fn read_full(file: &mut File, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = file.read(&mut buf[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

fn base_file_info(name: String, stat: &FileStat) -> BaseFileInfo {
    let user_name = User::from_uid(Uid::from_raw(stat.st_uid))
        .ok()
        .flatten()
        .map(|user| user.name)
        .unwrap_or_default();
    let group_name = Group::from_gid(Gid::from_raw(stat.st_gid))
        .ok()
        .flatten()
        .map(|group| group.name)
        .unwrap_or_default();

    BaseFileInfo {
        mode: stat.st_mode as i64,
        uid: stat.st_uid as i64,
        gid: stat.st_gid as i64,
        atime_ns: stat.st_atime * 1_000_000_000 + stat.st_atime_nsec,
        mtime_ns: stat.st_mtime * 1_000_000_000 + stat.st_mtime_nsec,
        ctime_ns: stat.st_ctime * 1_000_000_000 + stat.st_ctime_nsec,
        name,
        user_name,
        group_name,
    }
}
