//! Streaming encrypt-then-MAC writer for one chunk blob.
//!
//! Envelope layout:
//!
//! ```text
//! byte 0        version = 0
//! byte 1..49    48 byte random nonce
//! byte 49       compressed flag (encrypted; always written as 1)
//! byte 50..N-48 AES-256-CTR ciphertext of the compressed plaintext
//! byte N-48..N  HMAC-SHA-384 trailer
//! ```
//!
//! The per-chunk AES key and CTR IV are derived from `chunk_master` via the
//! concat KDF with the nonce as context. The MAC is keyed with `chunk_auth`
//! and covers version, nonce, derived key and IV, every ciphertext byte, and
//! finally the body length, so rolling any envelope parameter cannot go
//! undetected.

use std::io::Write;

use openssl::symm::{Cipher, Crypter, Mode};

use crate::error::{Error, Result};
use crate::file_formats::{CHUNK_ENCRYPTION_LABEL, CHUNK_HEADER_BYTES, CHUNK_NONCE_BYTES, FORMAT_VERSION};
use crate::key_derivation::{nist_concat_kdf, HmacSha384};
use crate::keyring::Keyring;
use crate::tools;

const ENCRYPT_BUFFER_BYTES: usize = 64 * 1024;

fn ssl_io_err(err: openssl::error::ErrorStack) -> std::io::Error {
    std::io::Error::new(
        std::io::ErrorKind::Other,
        format!("crypter update failed - {err}"),
    )
}

pub struct ChunkWriter<W: Write> {
    sink: W,
    crypter: Crypter,
    mac: HmacSha384,
    encr_buf: Box<[u8; ENCRYPT_BUFFER_BYTES]>,
    /// Envelope bytes written so far, excluding the trailer; goes into the
    /// MAC at close time as a big-endian u32.
    bytes_written: u32,
}

impl<W: Write> ChunkWriter<W> {
    /// Derive per-chunk keys, write the envelope header to `sink` and open
    /// the stream cipher.
    pub fn new(mut sink: W, keyring: &Keyring) -> Result<Self> {
        let mut nonce = [0u8; CHUNK_NONCE_BYTES];
        tools::fill_random(&mut nonce)?;

        let derived = nist_concat_kdf(keyring.chunk_master(), CHUNK_ENCRYPTION_LABEL, &nonce, 48)?;
        let (key, iv) = derived.split_at(32);

        let mut mac = HmacSha384::new(keyring.chunk_auth())?;
        mac.update(&[FORMAT_VERSION])?;
        mac.update(&nonce)?;
        mac.update(key)?;
        mac.update(iv)?;

        sink.write_all(&[FORMAT_VERSION])
            .and_then(|()| sink.write_all(&nonce))
            .map_err(|err| Error::io("chunk sink", err))?;

        let mut crypter = Crypter::new(Cipher::aes_256_ctr(), Mode::Encrypt, key, Some(iv))?;

        // compression flag, always set, first byte of the cipher stream
        let mut flag_ct = [0u8; 2];
        let count = crypter.update(&[1u8], &mut flag_ct)?;
        debug_assert_eq!(count, 1);
        mac.update(&flag_ct[..count])?;
        sink.write_all(&flag_ct[..count])
            .map_err(|err| Error::io("chunk sink", err))?;

        Ok(Self {
            sink,
            crypter,
            mac,
            encr_buf: Box::new([0u8; ENCRYPT_BUFFER_BYTES]),
            bytes_written: CHUNK_HEADER_BYTES as u32,
        })
    }

    /// Flush the cipher, fold the body length into the MAC and write the
    /// trailer. Returns the sink.
    pub fn close(mut self) -> Result<W> {
        let rest = self.crypter.finalize(self.encr_buf.as_mut())?;
        if rest > 0 {
            self.mac.update(&self.encr_buf[..rest])?;
            self.sink
                .write_all(&self.encr_buf[..rest])
                .map_err(|err| Error::io("chunk sink", err))?;
            self.bytes_written = self
                .bytes_written
                .checked_add(rest as u32)
                .ok_or(Error::RecordTooLarge {
                    field: "chunk body",
                    len: u32::MAX as u64,
                })?;
        }

        self.mac.update(&self.bytes_written.to_be_bytes())?;
        let trailer = self.mac.finish()?;
        self.sink
            .write_all(&trailer)
            .and_then(|()| self.sink.flush())
            .map_err(|err| Error::io("chunk sink", err))?;
        Ok(self.sink)
    }
}

impl<W: Write> Write for ChunkWriter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut write_size = buf.len();
        if write_size > self.encr_buf.len() - 1 {
            write_size = self.encr_buf.len() - 1;
        }
        let count = self
            .crypter
            .update(&buf[..write_size], self.encr_buf.as_mut())
            .map_err(ssl_io_err)?;

        self.mac
            .update(&self.encr_buf[..count])
            .map_err(|err| std::io::Error::new(std::io::ErrorKind::Other, err.to_string()))?;
        self.sink.write_all(&self.encr_buf[..count])?;

        self.bytes_written = self
            .bytes_written
            .checked_add(count as u32)
            .ok_or_else(|| {
                std::io::Error::new(std::io::ErrorKind::Other, "chunk body exceeds u32 range")
            })?;

        Ok(write_size)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.sink.flush()
    }
}
