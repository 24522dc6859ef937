//! Error taxonomy for the backup engine.
//!
//! Cryptographic authentication failures poison the affected object and are
//! never recovered locally. Per-entry filesystem failures during a walk carry
//! the path; the caller decides whether to continue with the next entry.

use std::path::PathBuf;

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    /// A store or filesystem failure, preserving the origin.
    #[error("I/O error on {source}: {cause}")]
    Io {
        source: String,
        #[source]
        cause: std::io::Error,
    },

    /// Keyring witness mismatch.
    #[error("bad password")]
    BadPassword,

    /// Keyring trailer MAC mismatch.
    #[error("keyring authentication failed")]
    KeyringAuthenticationFailed,

    /// Backup set MAC mismatch (early-exit or outer trailer).
    #[error("backup set authentication failed")]
    BackupSetAuthenticationFailed,

    /// Chunk trailer MAC mismatch.
    #[error("chunk authentication failed")]
    ChunkAuthenticationFailed,

    #[error("corrupt keyring: {0}")]
    CorruptKeyring(String),

    #[error("corrupt backup set: {0}")]
    CorruptBackupSet(String),

    #[error("corrupt chunk: {0}")]
    CorruptChunk(String),

    #[error("corrupt record: {0}")]
    CorruptRecord(String),

    /// API misuse, e.g. `process_path` outside a recording run.
    #[error("wrong state: {0}")]
    WrongState(&'static str),

    #[error("{path:?}: unsupported file kind ({kind})")]
    UnsupportedFileKind { path: PathBuf, kind: &'static str },

    /// A length field would exceed the wire format's 32 bit limit.
    #[error("record field '{field}' too large ({len} bytes)")]
    RecordTooLarge { field: &'static str, len: u64 },

    #[error(transparent)]
    Ssl(#[from] openssl::error::ErrorStack),
}

impl Error {
    /// Wrap an I/O error with the path or store location it came from.
    pub fn io(source: impl std::fmt::Display, cause: std::io::Error) -> Self {
        Error::Io {
            source: source.to_string(),
            cause,
        }
    }

    pub fn corrupt_record(msg: impl Into<String>) -> Self {
        Error::CorruptRecord(msg.into())
    }
}
