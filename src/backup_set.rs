//! The backup set: an encrypted, authenticated container around the record
//! stream describing one tag.
//!
//! Blob layout:
//!
//! ```text
//! byte 0        version = 0
//! byte 1..49    48 byte random nonce
//! byte 49..N-48 AES-256-CTR ciphertext of:
//!                 u32 tag_len ‖ tag ‖ 48 byte early-exit MAC ‖ records
//! byte N-48..N  HMAC-SHA-384 trailer over every preceding byte
//! ```
//!
//! The early-exit MAC covers (version ‖ nonce ‖ key ‖ iv ‖ tag_len ‖ tag)
//! and is verified right after the tag is recovered, so a caller holding the
//! wrong keyring is rejected before any record is parsed. The outer MAC
//! covers every byte that reaches the sink. Both are keyed with
//! `metadata_auth`.
//!
//! The record stream is append-only: each backup run contributes one start
//! record, its body, and one end record. The object store never sees the
//! tag; sets are addressed by `HMAC-SHA-384(metadata_storage, tag)`.

use std::collections::{HashMap, HashSet};
use std::time::{SystemTime, UNIX_EPOCH};

use openssl::symm::Cipher;
use tempfile::TempDir;

use crate::backend::Backend;
use crate::error::{Error, Result};
use crate::file_formats::{
    FORMAT_VERSION, MAC_BYTES, METADATA_ENCRYPTION_LABEL, RECORD_VERSION, SET_NONCE_BYTES, TAG_END,
};
use crate::key_derivation::{hmac_sha384, nist_concat_kdf, HmacSha384, Sha384, DIGEST_BYTES};
use crate::keyring::Keyring;
use crate::record::Record;
use crate::tools;

/// Object store name for a tag. The tag itself never leaves the ciphertext.
pub fn manifest_id(keyring: &Keyring, tag: &str) -> Result<String> {
    Ok(hex::encode(hmac_sha384(
        keyring.metadata_storage(),
        tag.as_bytes(),
    )?))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum State {
    /// Freshly loaded or persisted; no run is open.
    Idle,
    /// Between `start_backup` and `end_backup`.
    Recording,
    /// Run sealed, waiting for `write`.
    Sealed,
}

pub struct BackupSet<'a> {
    pub(crate) keyring: &'a Keyring,
    tag: String,
    pub(crate) records: Vec<Record>,
    state: State,
    /// Index of the currently open start record while recording.
    run_start: usize,
    /// (device, inode) of every entry seen this run, for hard link detection.
    pub(crate) hard_links: HashMap<(u64, u64), String>,
    /// Chunk ids already staged this run.
    pub(crate) seen_chunks: HashSet<[u8; DIGEST_BYTES]>,
    /// Staging area for encrypted chunk blobs prior to upload.
    temp_dir: Option<TempDir>,
}

impl<'a> BackupSet<'a> {
    /// Return the set stored under `tag`, or a fresh empty one.
    pub fn ensure(keyring: &'a Keyring, backend: &dyn Backend, tag: &str) -> Result<Self> {
        let set_id = manifest_id(keyring, tag)?;
        match backend.read_backup_set(&keyring.hex_id()?, &set_id)? {
            Some(blob) => Self::decode(keyring, tag, &blob),
            None => Ok(Self::empty(keyring, tag)),
        }
    }

    fn empty(keyring: &'a Keyring, tag: &str) -> Self {
        Self {
            keyring,
            tag: tag.to_string(),
            records: Vec::new(),
            state: State::Idle,
            run_start: 0,
            hard_links: HashMap::new(),
            seen_chunks: HashSet::new(),
            temp_dir: None,
        }
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub(crate) fn assert_recording(&self) -> Result<()> {
        if self.state != State::Recording {
            return Err(Error::WrongState("no backup run is recording"));
        }
        Ok(())
    }

    pub(crate) fn temp_path(&self) -> &std::path::Path {
        // set in start_backup, cleared after write; recording implies present
        self.temp_dir
            .as_ref()
            .expect("temp dir exists while recording")
            .path()
    }

    /// Open a new run. Requires no open run and a record list that is empty
    /// or ends with an end record.
    pub fn start_backup(&mut self) -> Result<()> {
        if self.state != State::Idle {
            return Err(Error::WrongState("a backup run is already open"));
        }
        match self.records.last() {
            None | Some(Record::End { .. }) => {}
            Some(_) => {
                return Err(Error::CorruptBackupSet(
                    "record stream does not end with an end record".to_string(),
                ));
            }
        }

        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);

        self.run_start = self.records.len();
        self.records.push(Record::Start {
            timestamp,
            length: 0,
        });
        self.hard_links.clear();
        self.seen_chunks.clear();
        self.temp_dir = Some(
            tempfile::Builder::new()
                .prefix("cypherback")
                .tempdir()
                .map_err(|err| Error::io("temp dir", err))?,
        );
        self.state = State::Recording;
        Ok(())
    }

    /// Seal the open run: back-patch the start record's length and append
    /// the end record carrying the run digest.
    ///
    /// The length is the byte sum of every record after the start plus the
    /// end record's 48 byte digest. The digest is SHA-384 over the framed
    /// bytes of those records followed by the end record's own header.
    pub fn end_backup(&mut self) -> Result<()> {
        self.assert_recording()?;

        let mut sum = 0u64;
        let mut digest = Sha384::new()?;
        for record in &self.records[self.run_start + 1..] {
            sum += record.len()? as u64;
            digest.update(&record.framed()?)?;
        }
        digest.update(&[RECORD_VERSION, TAG_END])?;

        let length = sum + DIGEST_BYTES as u64;
        let length = u32::try_from(length).map_err(|_| Error::RecordTooLarge {
            field: "start.length",
            len: length,
        })?;

        match &mut self.records[self.run_start] {
            Record::Start { length: slot, .. } => *slot = length,
            _ => unreachable!("run_start indexes a start record"),
        }
        self.records.push(Record::End {
            digest: digest.finish()?,
        });
        self.state = State::Sealed;
        Ok(())
    }

    /// Upload this run's staged chunks, then the set blob itself. Chunks go
    /// first so a reader of the manifest never chases a dangling chunk id.
    pub fn write(&mut self, backend: &dyn Backend) -> Result<()> {
        if self.state != State::Sealed {
            return Err(Error::WrongState("backup run is not sealed"));
        }
        let keyring_id = self.keyring.hex_id()?;

        if let Some(temp_dir) = &self.temp_dir {
            let entries = std::fs::read_dir(temp_dir.path())
                .map_err(|err| Error::io(temp_dir.path().display(), err))?;
            for entry in entries {
                let entry = entry.map_err(|err| Error::io(temp_dir.path().display(), err))?;
                let chunk_id = entry.file_name().to_string_lossy().into_owned();
                let data = std::fs::read(entry.path())
                    .map_err(|err| Error::io(entry.path().display(), err))?;
                backend.write_chunk(&keyring_id, &chunk_id, &data)?;
            }
        }

        let blob = self.encode()?;
        backend.write_backup_set(&keyring_id, &manifest_id(self.keyring, &self.tag)?, &blob)?;

        if let Some(temp_dir) = self.temp_dir.take() {
            temp_dir
                .close()
                .map_err(|err| Error::io("temp dir", err))?;
        }
        self.state = State::Idle;
        Ok(())
    }

    /// Serialize all runs into one encrypted, authenticated blob.
    pub fn encode(&self) -> Result<Vec<u8>> {
        if self.tag.len() > u32::MAX as usize {
            return Err(Error::RecordTooLarge {
                field: "tag",
                len: self.tag.len() as u64,
            });
        }

        let mut nonce = [0u8; SET_NONCE_BYTES];
        tools::fill_random(&mut nonce)?;

        let derived = nist_concat_kdf(
            self.keyring.metadata_master(),
            METADATA_ENCRYPTION_LABEL,
            &nonce,
            48,
        )?;
        let (key, iv) = derived.split_at(32);

        let mut early_mac = HmacSha384::new(self.keyring.metadata_auth())?;
        early_mac.update(&[FORMAT_VERSION])?;
        early_mac.update(&nonce)?;
        early_mac.update(key)?;
        early_mac.update(iv)?;
        early_mac.update(&(self.tag.len() as u32).to_be_bytes())?;
        early_mac.update(self.tag.as_bytes())?;

        let mut plaintext = Vec::new();
        plaintext.extend_from_slice(&(self.tag.len() as u32).to_be_bytes());
        plaintext.extend_from_slice(self.tag.as_bytes());
        plaintext.extend_from_slice(&early_mac.finish()?);
        for record in &self.records {
            record.append_to(&mut plaintext)?;
        }

        let ciphertext =
            openssl::symm::encrypt(Cipher::aes_256_ctr(), key, Some(iv), &plaintext)?;

        let mut blob = Vec::with_capacity(1 + SET_NONCE_BYTES + ciphertext.len() + MAC_BYTES);
        blob.push(FORMAT_VERSION);
        blob.extend_from_slice(&nonce);
        blob.extend_from_slice(&ciphertext);

        let mut outer_mac = HmacSha384::new(self.keyring.metadata_auth())?;
        outer_mac.update(&blob)?;
        let trailer = outer_mac.finish()?;
        blob.extend_from_slice(&trailer);
        Ok(blob)
    }

    /// Parse and verify a backup set blob.
    ///
    /// The early-exit MAC is checked as soon as the tag is recovered; a
    /// wrong keyring fails there, before any record body is parsed. The
    /// outer MAC is checked over the full blob at the tail.
    pub fn decode(keyring: &'a Keyring, expected_tag: &str, blob: &[u8]) -> Result<Self> {
        let min = 1 + SET_NONCE_BYTES + 4 + MAC_BYTES + MAC_BYTES;
        if blob.len() < min {
            return Err(Error::CorruptBackupSet(format!(
                "blob too small ({} bytes)",
                blob.len()
            )));
        }
        if blob[0] != FORMAT_VERSION {
            return Err(Error::CorruptBackupSet(format!(
                "unsupported version {}",
                blob[0]
            )));
        }

        let nonce = &blob[1..1 + SET_NONCE_BYTES];
        let ciphertext = &blob[1 + SET_NONCE_BYTES..blob.len() - MAC_BYTES];
        let trailer = &blob[blob.len() - MAC_BYTES..];

        let derived = nist_concat_kdf(
            keyring.metadata_master(),
            METADATA_ENCRYPTION_LABEL,
            nonce,
            48,
        )?;
        let (key, iv) = derived.split_at(32);

        let plaintext =
            openssl::symm::decrypt(Cipher::aes_256_ctr(), key, Some(iv), ciphertext)?;

        let tag_len = u32::from_be_bytes(plaintext[0..4].try_into().unwrap()) as usize;
        if plaintext.len() < 4 + tag_len + MAC_BYTES {
            // an implausible tag length means wrong keys or a truncated
            // blob; either way the object cannot authenticate
            return Err(Error::BackupSetAuthenticationFailed);
        }
        let tag_bytes = &plaintext[4..4 + tag_len];
        let stored_early = &plaintext[4 + tag_len..4 + tag_len + MAC_BYTES];

        let mut early_mac = HmacSha384::new(keyring.metadata_auth())?;
        early_mac.update(&[FORMAT_VERSION])?;
        early_mac.update(nonce)?;
        early_mac.update(key)?;
        early_mac.update(iv)?;
        early_mac.update(&(tag_len as u32).to_be_bytes())?;
        early_mac.update(tag_bytes)?;
        if !tools::constant_time_eq(&early_mac.finish()?, stored_early) {
            return Err(Error::BackupSetAuthenticationFailed);
        }

        let tag = String::from_utf8(tag_bytes.to_vec())
            .map_err(|_| Error::CorruptBackupSet("tag is not valid UTF-8".to_string()))?;
        if tag != expected_tag {
            return Err(Error::CorruptBackupSet(format!(
                "blob carries tag {tag:?}, expected {expected_tag:?}"
            )));
        }

        let records = decode_records(&plaintext[4 + tag_len + MAC_BYTES..])?;

        let mut outer_mac = HmacSha384::new(keyring.metadata_auth())?;
        outer_mac.update(&blob[..blob.len() - MAC_BYTES])?;
        if !tools::constant_time_eq(&outer_mac.finish()?, trailer) {
            return Err(Error::BackupSetAuthenticationFailed);
        }

        let mut set = Self::empty(keyring, &tag);
        set.records = records;
        Ok(set)
    }
}

/// Decode the concatenated runs of a record stream, enforcing the framing
/// invariants: alternating start/end pairs and length accounting.
fn decode_records(mut buf: &[u8]) -> Result<Vec<Record>> {
    let mut records = Vec::new();
    let mut open_run: Option<(u32, u64)> = None; // (declared length, running sum)

    while !buf.is_empty() {
        let (record, used) = Record::decode(buf)?;
        buf = &buf[used..];

        match (&record, &mut open_run) {
            (Record::Start { length, .. }, None) => {
                open_run = Some((*length, 0));
            }
            (Record::Start { .. }, Some(_)) => {
                return Err(Error::CorruptBackupSet(
                    "start record inside an open run".to_string(),
                ));
            }
            (Record::End { .. }, Some((declared, sum))) => {
                let total = *sum + DIGEST_BYTES as u64;
                if total != *declared as u64 {
                    return Err(Error::CorruptBackupSet(format!(
                        "run length mismatch: start declares {declared}, records sum to {total}"
                    )));
                }
                open_run = None;
            }
            (Record::End { .. }, None) => {
                return Err(Error::CorruptBackupSet(
                    "end record without an open run".to_string(),
                ));
            }
            (_, Some((_, sum))) => {
                *sum += record.len()? as u64;
            }
            (_, None) => {
                return Err(Error::CorruptBackupSet(
                    "record outside a start/end run".to_string(),
                ));
            }
        }
        records.push(record);
    }

    if open_run.is_some() {
        return Err(Error::CorruptBackupSet(
            "record stream ends inside an open run".to_string(),
        ));
    }
    Ok(records)
}
