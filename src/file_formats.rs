//! On-wire constants for the keyring, chunk and backup set formats.

// WARNING: PLEASE DO NOT MODIFY THOSE VALUES - they pin the storage format

use crate::key_derivation::DIGEST_BYTES;

/// Version byte of every format defined here.
pub const FORMAT_VERSION: u8 = 0;

/// Length of an HMAC-SHA-384 trailer.
pub const MAC_BYTES: usize = DIGEST_BYTES;

// --- keyring blob (409 bytes total) ---

pub const KEYRING_SALT_BYTES: usize = 32;
pub const KEYRING_IV_BYTES: usize = 16;
/// PBKDF2 output: 32 byte AES-256 wrap key followed by 48 byte wrap-auth key.
pub const KEYRING_WRAP_KEY_BYTES: usize = 80;
/// The six keys in canonical serialization order: 32 + 48 + 48 + 32 + 48 + 48.
pub const KEYRING_BODY_BYTES: usize = 256;
/// 1 version + 32 salt + 8 iterations + 48 witness + 16 IV + 256 body + 48 MAC.
pub const KEYRING_BLOB_BYTES: usize =
    1 + KEYRING_SALT_BYTES + 8 + DIGEST_BYTES + KEYRING_IV_BYTES + KEYRING_BODY_BYTES + MAC_BYTES;

/// Domain separator prefixed to the six keys when computing the keyring id.
pub const KEYRING_ID_PREFIX: &[u8] = b"cypherback\x00";

// --- chunk envelope ---

/// Fixed chunk size used when splitting regular files.
pub const CHUNK_SIZE: usize = 256 * 1024;

pub const CHUNK_NONCE_BYTES: usize = 48;
/// 1 version + 48 nonce + 1 compressed flag.
pub const CHUNK_HEADER_BYTES: usize = 1 + CHUNK_NONCE_BYTES + 1;
/// Smallest well-formed chunk blob: header plus MAC trailer.
pub const CHUNK_MIN_BYTES: usize = CHUNK_HEADER_BYTES + MAC_BYTES;

/// KDF label for per-chunk key material.
pub const CHUNK_ENCRYPTION_LABEL: &[u8] = b"\x00chunk encryption\x00";

/// Hex-encoded chunk identifier length (HMAC-SHA-384).
pub const CHUNK_ID_HEX_BYTES: usize = 2 * DIGEST_BYTES;

// --- backup set blob ---

pub const SET_NONCE_BYTES: usize = 48;

/// KDF label for per-manifest key material.
pub const METADATA_ENCRYPTION_LABEL: &[u8] = b"metadata encryption";

// --- record stream ---

pub const RECORD_VERSION: u8 = 0;

pub const TAG_START: u8 = 0;
pub const TAG_HARD_LINK: u8 = 1;
pub const TAG_DIRECTORY: u8 = 2;
pub const TAG_REGULAR_FILE: u8 = 3;
pub const TAG_FIFO: u8 = 4;
pub const TAG_SYMLINK: u8 = 5;
pub const TAG_CHAR_DEVICE: u8 = 6;
pub const TAG_BLOCK_DEVICE: u8 = 7;
pub const TAG_END: u8 = 8;
