//! Typed length-prefixed records describing filesystem entities.
//!
//! Each record on the wire is a 2 byte header (`u8` version, `u8` tag)
//! followed by a tag-specific payload. Strings are a big-endian `u32` length
//! followed by raw UTF-8 bytes. There is no alignment or padding.
//!
//! Runs inside a backup set are framed by alternating start/end pairs; the
//! start record's length field is back-patched when the run is sealed.

use crate::error::{Error, Result};
use crate::file_formats::{
    CHUNK_ID_HEX_BYTES, RECORD_VERSION, TAG_BLOCK_DEVICE, TAG_CHAR_DEVICE, TAG_DIRECTORY, TAG_END,
    TAG_FIFO, TAG_HARD_LINK, TAG_REGULAR_FILE, TAG_START, TAG_SYMLINK,
};
use crate::key_derivation::DIGEST_BYTES;

/// Metadata common to every directory entry variant.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BaseFileInfo {
    pub mode: i64,
    pub uid: i64,
    pub gid: i64,
    pub atime_ns: i64,
    pub mtime_ns: i64,
    pub ctime_ns: i64,
    /// Path of the entry as walked; restore re-roots it under a target.
    pub name: String,
    pub user_name: String,
    pub group_name: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Record {
    Start {
        /// Epoch seconds at `start_backup` time.
        timestamp: i64,
        /// Byte sum of the run's records, back-patched by `end_backup`.
        length: u32,
    },
    HardLink {
        name: String,
        /// First observed path of the shared inode within this run.
        target: String,
    },
    Directory {
        info: BaseFileInfo,
    },
    RegularFile {
        info: BaseFileInfo,
        size: i64,
        /// Hex chunk ids in file order, duplicates included.
        chunks: Vec<String>,
    },
    Fifo {
        info: BaseFileInfo,
    },
    Symlink {
        info: BaseFileInfo,
        target: String,
    },
    CharDevice {
        info: BaseFileInfo,
        rdev: u64,
    },
    BlockDevice {
        info: BaseFileInfo,
        rdev: u64,
    },
    End {
        /// SHA-384 digest of the run, see `BackupSet::end_backup`.
        digest: [u8; DIGEST_BYTES],
    },
}

fn string_len(field: &'static str, s: &str) -> Result<usize> {
    if s.len() > u32::MAX as usize {
        return Err(Error::RecordTooLarge {
            field,
            len: s.len() as u64,
        });
    }
    Ok(4 + s.len())
}

fn base_info_len(info: &BaseFileInfo) -> Result<usize> {
    Ok(6 * 8
        + string_len("name", &info.name)?
        + string_len("user name", &info.user_name)?
        + string_len("group name", &info.group_name)?)
}

fn put_string(out: &mut Vec<u8>, field: &'static str, s: &str) -> Result<()> {
    string_len(field, s)?;
    out.extend_from_slice(&(s.len() as u32).to_be_bytes());
    out.extend_from_slice(s.as_bytes());
    Ok(())
}

fn put_base_info(out: &mut Vec<u8>, info: &BaseFileInfo) -> Result<()> {
    out.extend_from_slice(&info.mode.to_be_bytes());
    out.extend_from_slice(&info.uid.to_be_bytes());
    out.extend_from_slice(&info.gid.to_be_bytes());
    out.extend_from_slice(&info.atime_ns.to_be_bytes());
    out.extend_from_slice(&info.mtime_ns.to_be_bytes());
    out.extend_from_slice(&info.ctime_ns.to_be_bytes());
    put_string(out, "name", &info.name)?;
    put_string(out, "user name", &info.user_name)?;
    put_string(out, "group name", &info.group_name)
}

impl Record {
    pub fn tag(&self) -> u8 {
        match self {
            Record::Start { .. } => TAG_START,
            Record::HardLink { .. } => TAG_HARD_LINK,
            Record::Directory { .. } => TAG_DIRECTORY,
            Record::RegularFile { .. } => TAG_REGULAR_FILE,
            Record::Fifo { .. } => TAG_FIFO,
            Record::Symlink { .. } => TAG_SYMLINK,
            Record::CharDevice { .. } => TAG_CHAR_DEVICE,
            Record::BlockDevice { .. } => TAG_BLOCK_DEVICE,
            Record::End { .. } => TAG_END,
        }
    }

    /// Exact on-wire size including the 2 byte header. Pure.
    pub fn len(&self) -> Result<usize> {
        let payload = match self {
            Record::Start { .. } => 8 + 4,
            Record::HardLink { name, target } => {
                string_len("name", name)? + string_len("link target", target)?
            }
            Record::Directory { info } | Record::Fifo { info } => base_info_len(info)?,
            Record::RegularFile { info, chunks, .. } => {
                if chunks.len() > u32::MAX as usize {
                    return Err(Error::RecordTooLarge {
                        field: "chunk count",
                        len: chunks.len() as u64,
                    });
                }
                base_info_len(info)? + 8 + 4 + chunks.len() * CHUNK_ID_HEX_BYTES
            }
            Record::Symlink { info, target } => base_info_len(info)? + string_len("link target", target)?,
            Record::CharDevice { info, .. } | Record::BlockDevice { info, .. } => {
                base_info_len(info)? + 8
            }
            Record::End { .. } => DIGEST_BYTES,
        };
        Ok(2 + payload)
    }

    /// Append the framed record (version, tag, payload) to `out`.
    pub fn append_to(&self, out: &mut Vec<u8>) -> Result<()> {
        out.push(RECORD_VERSION);
        out.push(self.tag());
        match self {
            Record::Start { timestamp, length } => {
                out.extend_from_slice(&timestamp.to_be_bytes());
                out.extend_from_slice(&length.to_be_bytes());
            }
            Record::HardLink { name, target } => {
                put_string(out, "name", name)?;
                put_string(out, "link target", target)?;
            }
            Record::Directory { info } | Record::Fifo { info } => {
                put_base_info(out, info)?;
            }
            Record::RegularFile { info, size, chunks } => {
                put_base_info(out, info)?;
                out.extend_from_slice(&size.to_be_bytes());
                if chunks.len() > u32::MAX as usize {
                    return Err(Error::RecordTooLarge {
                        field: "chunk count",
                        len: chunks.len() as u64,
                    });
                }
                out.extend_from_slice(&(chunks.len() as u32).to_be_bytes());
                for chunk in chunks {
                    if chunk.len() != CHUNK_ID_HEX_BYTES {
                        return Err(Error::corrupt_record(format!(
                            "chunk id has length {} (expected {})",
                            chunk.len(),
                            CHUNK_ID_HEX_BYTES
                        )));
                    }
                    out.extend_from_slice(chunk.as_bytes());
                }
            }
            Record::Symlink { info, target } => {
                put_base_info(out, info)?;
                put_string(out, "link target", target)?;
            }
            Record::CharDevice { info, rdev } | Record::BlockDevice { info, rdev } => {
                put_base_info(out, info)?;
                out.extend_from_slice(&rdev.to_be_bytes());
            }
            Record::End { digest } => {
                out.extend_from_slice(digest);
            }
        }
        Ok(())
    }

    /// The framed bytes of this record, as fed to the run digest.
    pub fn framed(&self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(self.len()?);
        self.append_to(&mut out)?;
        Ok(out)
    }

    /// Decode one record from the front of `buf`, returning it and the
    /// number of bytes consumed.
    pub fn decode(buf: &[u8]) -> Result<(Record, usize)> {
        let mut cursor = Cursor::new(buf);
        let version = cursor.u8()?;
        if version != RECORD_VERSION {
            return Err(Error::corrupt_record(format!(
                "unsupported record version {version}"
            )));
        }
        let tag = cursor.u8()?;
        let record = match tag {
            TAG_START => Record::Start {
                timestamp: cursor.i64()?,
                length: cursor.u32()?,
            },
            TAG_HARD_LINK => Record::HardLink {
                name: cursor.string()?,
                target: cursor.string()?,
            },
            TAG_DIRECTORY => Record::Directory {
                info: cursor.base_info()?,
            },
            TAG_REGULAR_FILE => {
                let info = cursor.base_info()?;
                let size = cursor.i64()?;
                let count = cursor.u32()? as usize;
                let mut chunks = Vec::with_capacity(count.min(1 << 16));
                for _ in 0..count {
                    chunks.push(cursor.chunk_id()?);
                }
                Record::RegularFile { info, size, chunks }
            }
            TAG_FIFO => Record::Fifo {
                info: cursor.base_info()?,
            },
            TAG_SYMLINK => Record::Symlink {
                info: cursor.base_info()?,
                target: cursor.string()?,
            },
            TAG_CHAR_DEVICE => Record::CharDevice {
                info: cursor.base_info()?,
                rdev: cursor.u64()?,
            },
            TAG_BLOCK_DEVICE => Record::BlockDevice {
                info: cursor.base_info()?,
                rdev: cursor.u64()?,
            },
            TAG_END => {
                let bytes = cursor.bytes(DIGEST_BYTES)?;
                let mut digest = [0u8; DIGEST_BYTES];
                digest.copy_from_slice(bytes);
                Record::End { digest }
            }
            other => {
                return Err(Error::corrupt_record(format!("unknown record tag {other}")));
            }
        };
        Ok((record, cursor.pos))
    }
}

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        if self.buf.len() - self.pos < len {
            return Err(Error::corrupt_record("unexpected end of record stream"));
        }
        let out = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.bytes(1)?[0])
    }

    fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_be_bytes(self.bytes(4)?.try_into().unwrap()))
    }

    fn u64(&mut self) -> Result<u64> {
        Ok(u64::from_be_bytes(self.bytes(8)?.try_into().unwrap()))
    }

    fn i64(&mut self) -> Result<i64> {
        Ok(i64::from_be_bytes(self.bytes(8)?.try_into().unwrap()))
    }

    fn string(&mut self) -> Result<String> {
        let len = self.u32()? as usize;
        let bytes = self.bytes(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| Error::corrupt_record("string field is not valid UTF-8"))
    }

    fn base_info(&mut self) -> Result<BaseFileInfo> {
        Ok(BaseFileInfo {
            mode: self.i64()?,
            uid: self.i64()?,
            gid: self.i64()?,
            atime_ns: self.i64()?,
            mtime_ns: self.i64()?,
            ctime_ns: self.i64()?,
            name: self.string()?,
            user_name: self.string()?,
            group_name: self.string()?,
        })
    }

    fn chunk_id(&mut self) -> Result<String> {
        let bytes = self.bytes(CHUNK_ID_HEX_BYTES)?;
        if !bytes.iter().all(|b| b.is_ascii_hexdigit()) {
            return Err(Error::corrupt_record("chunk id is not hex"));
        }
        Ok(String::from_utf8(bytes.to_vec()).unwrap())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn sample_info(name: &str) -> BaseFileInfo {
        BaseFileInfo {
            mode: 0o100644,
            uid: 1000,
            gid: 1000,
            atime_ns: 1_700_000_000_000_000_001,
            mtime_ns: 1_700_000_000_000_000_002,
            ctime_ns: 1_700_000_000_000_000_003,
            name: name.to_string(),
            user_name: "alice".to_string(),
            group_name: "users".to_string(),
        }
    }

    fn roundtrip(record: Record) {
        let encoded = record.framed().unwrap();
        assert_eq!(encoded.len(), record.len().unwrap());
        let (decoded, consumed) = Record::decode(&encoded).unwrap();
        assert_eq!(consumed, encoded.len());
        assert_eq!(decoded, record);
    }

    #[test]
    fn all_variants_roundtrip() {
        roundtrip(Record::Start {
            timestamp: 1_700_000_000,
            length: 1234,
        });
        roundtrip(Record::HardLink {
            name: "/srv/data/b".to_string(),
            target: "/srv/data/a".to_string(),
        });
        roundtrip(Record::Directory {
            info: sample_info("/srv/data"),
        });
        roundtrip(Record::RegularFile {
            info: sample_info("/srv/data/a"),
            size: 5,
            chunks: vec!["ab".repeat(48), "cd".repeat(48), "ab".repeat(48)],
        });
        roundtrip(Record::Fifo {
            info: sample_info("/srv/data/pipe"),
        });
        roundtrip(Record::Symlink {
            info: sample_info("/srv/data/link"),
            target: "a".to_string(),
        });
        roundtrip(Record::CharDevice {
            info: sample_info("/dev/null"),
            rdev: 0x0103,
        });
        roundtrip(Record::BlockDevice {
            info: sample_info("/dev/loop0"),
            rdev: 0x0700,
        });
        roundtrip(Record::End { digest: [7u8; 48] });
    }

    #[test]
    fn records_decode_back_to_back() {
        let mut buf = Vec::new();
        let first = Record::Start {
            timestamp: 1,
            length: 0,
        };
        let second = Record::End { digest: [0u8; 48] };
        first.append_to(&mut buf).unwrap();
        second.append_to(&mut buf).unwrap();

        let (a, used) = Record::decode(&buf).unwrap();
        let (b, rest) = Record::decode(&buf[used..]).unwrap();
        assert_eq!(a, first);
        assert_eq!(b, second);
        assert_eq!(used + rest, buf.len());
    }

    #[test]
    fn unknown_tag_is_corrupt() {
        let buf = [RECORD_VERSION, 99];
        assert!(matches!(
            Record::decode(&buf),
            Err(Error::CorruptRecord(_))
        ));
    }

    #[test]
    fn truncated_record_is_corrupt() {
        let encoded = Record::HardLink {
            name: "b".to_string(),
            target: "a".to_string(),
        }
        .framed()
        .unwrap();
        assert!(matches!(
            Record::decode(&encoded[..encoded.len() - 1]),
            Err(Error::CorruptRecord(_))
        ));
    }

    #[test]
    fn bad_version_is_corrupt() {
        let mut encoded = Record::End { digest: [0u8; 48] }.framed().unwrap();
        encoded[0] = 1;
        assert!(matches!(
            Record::decode(&encoded),
            Err(Error::CorruptRecord(_))
        ));
    }

    #[test]
    fn fifo_and_regular_use_distinct_tags() {
        let fifo = Record::Fifo {
            info: sample_info("/srv/pipe"),
        };
        let file = Record::RegularFile {
            info: sample_info("/srv/file"),
            size: 0,
            chunks: vec![],
        };
        assert_eq!(fifo.tag(), 4);
        assert_eq!(file.tag(), 3);
    }
}
