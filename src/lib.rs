//! Encrypted, content-addressed, deduplicating backup engine.
//!
//! # Data formats
//!
//! A backup run walks one or more filesystem roots and produces two kinds
//! of object: an encrypted *backup set* blob describing every directory
//! entry as a typed record stream, and one encrypted *chunk* blob per
//! distinct 256 KiB slice of regular file content. Chunks are content
//! addressed by `HMAC-SHA-384(chunk_storage, plaintext)`, so identical
//! slices are stored once; the set's file records carry the chunk ids
//! needed to reassemble each file in order.
//!
//! Every object is encrypted with AES-256-CTR under a key derived per
//! object (NIST SP 800-108 concat KDF over a random nonce) and
//! authenticated with an HMAC-SHA-384 trailer. The six long-lived keys
//! behind those derivations form the [keyring](keyring::Keyring), which is
//! itself stored password-wrapped (PBKDF2) in the object store.
//!
//! Object stores are pluggable behind the [`backend::Backend`] trait; the
//! engine only ever addresses opaque blobs by hex identifier. A user-chosen
//! tag names a backup set, but only its HMAC under `metadata_storage` ever
//! reaches the store.
//!
//! # Structure
//!
//! The codecs compose as writer-wrapping-writer and reader-wrapping-reader
//! pipelines; buffers cross layer boundaries by slice. One backup run owns
//! its keyring reference; nothing here spawns threads.

pub mod backend;
pub mod backup_set;
pub mod chunk;
pub mod chunk_reader;
pub mod chunk_writer;
pub mod config;
pub mod create;
pub mod error;
pub mod file_formats;
pub mod key_derivation;
pub mod keyring;
pub mod record;
pub mod restore;
pub mod tools;

pub use backend::{Backend, FileBackend, MemoryBackend, S3Backend};
pub use backup_set::{manifest_id, BackupSet};
pub use chunk::{chunk_id, decode_chunk, encode_chunk};
pub use chunk_reader::ChunkReader;
pub use chunk_writer::ChunkWriter;
pub use create::process_path;
pub use error::{Error, Result};
pub use keyring::Keyring;
pub use record::{BaseFileInfo, Record};
pub use restore::restore;
