//! Authenticated streaming reader for one chunk blob.
//!
//! The reader mirrors [`ChunkWriter`](crate::chunk_writer::ChunkWriter): it
//! reconstructs the per-chunk key and IV from the nonce, tees every
//! ciphertext byte into the MAC while decrypting, and compares the trailer
//! in constant time at [`close`](ChunkReader::close) time. The caller must
//! pass the total blob length up front; the body end is found by length, not
//! by sink EOF.

use std::io::Read;

use openssl::symm::{Cipher, Crypter, Mode};

use crate::error::{Error, Result};
use crate::file_formats::{
    CHUNK_ENCRYPTION_LABEL, CHUNK_HEADER_BYTES, CHUNK_MIN_BYTES, CHUNK_NONCE_BYTES, FORMAT_VERSION,
    MAC_BYTES,
};
use crate::key_derivation::{nist_concat_kdf, HmacSha384};
use crate::keyring::Keyring;
use crate::tools;

const DECRYPT_BUFFER_BYTES: usize = 64 * 1024;

pub struct ChunkReader<R: Read> {
    source: R,
    crypter: Crypter,
    mac: HmacSha384,
    compressed: bool,
    /// Envelope length excluding the MAC trailer.
    length: usize,
    num_read: usize,
    ct_buf: Vec<u8>,
    pt_buf: Vec<u8>,
}

impl<R: Read> ChunkReader<R> {
    /// Read and check the envelope header, derive keys and prepare the
    /// cipher stream. `declared_length` is the total blob size in bytes.
    pub fn new(mut source: R, keyring: &Keyring, declared_length: usize) -> Result<Self> {
        if declared_length < CHUNK_MIN_BYTES {
            return Err(Error::CorruptChunk(format!(
                "blob too small ({declared_length} bytes)"
            )));
        }

        let mut version = [0u8; 1];
        source
            .read_exact(&mut version)
            .map_err(|err| Error::io("chunk source", err))?;
        if version[0] != FORMAT_VERSION {
            return Err(Error::CorruptChunk(format!(
                "unsupported version {}",
                version[0]
            )));
        }

        let mut nonce = [0u8; CHUNK_NONCE_BYTES];
        source
            .read_exact(&mut nonce)
            .map_err(|err| Error::io("chunk source", err))?;

        let derived = nist_concat_kdf(keyring.chunk_master(), CHUNK_ENCRYPTION_LABEL, &nonce, 48)?;
        let (key, iv) = derived.split_at(32);

        let mut mac = HmacSha384::new(keyring.chunk_auth())?;
        mac.update(&[FORMAT_VERSION])?;
        mac.update(&nonce)?;
        mac.update(key)?;
        mac.update(iv)?;

        let mut crypter = Crypter::new(Cipher::aes_256_ctr(), Mode::Decrypt, key, Some(iv))?;

        let mut flag_ct = [0u8; 1];
        source
            .read_exact(&mut flag_ct)
            .map_err(|err| Error::io("chunk source", err))?;
        mac.update(&flag_ct)?;
        let mut flag_pt = [0u8; 2];
        let count = crypter.update(&flag_ct, &mut flag_pt)?;
        debug_assert_eq!(count, 1);
        let compressed = match flag_pt[0] {
            0 => false,
            1 => true,
            other => {
                return Err(Error::CorruptChunk(format!(
                    "invalid compression flag {other}"
                )));
            }
        };

        Ok(Self {
            source,
            crypter,
            mac,
            compressed,
            length: declared_length - MAC_BYTES,
            num_read: CHUNK_HEADER_BYTES,
            ct_buf: vec![0u8; DECRYPT_BUFFER_BYTES],
            pt_buf: vec![0u8; DECRYPT_BUFFER_BYTES + 1],
        })
    }

    /// Whether the envelope's compression flag was set.
    pub fn compressed(&self) -> bool {
        self.compressed
    }

    /// Read the trailer and compare it against the running MAC in constant
    /// time. Fails unless the body was read to its declared end.
    pub fn close(mut self) -> Result<R> {
        self.mac.update(&(self.length as u32).to_be_bytes())?;
        let computed = self.mac.finish()?;

        let mut trailer = [0u8; MAC_BYTES];
        self.source
            .read_exact(&mut trailer)
            .map_err(|err| Error::io("chunk source", err))?;

        if !tools::constant_time_eq(&computed, &trailer) {
            return Err(Error::ChunkAuthenticationFailed);
        }
        Ok(self.source)
    }
}

impl<R: Read> Read for ChunkReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let remaining = self.length - self.num_read;
        if remaining == 0 || buf.is_empty() {
            return Ok(0);
        }

        let want = buf.len().min(remaining).min(self.ct_buf.len());
        let count = self.source.read(&mut self.ct_buf[..want])?;
        if count == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "chunk body ends before its declared length",
            ));
        }

        self.mac
            .update(&self.ct_buf[..count])
            .map_err(|err| std::io::Error::new(std::io::ErrorKind::Other, err.to_string()))?;

        let written = self
            .crypter
            .update(&self.ct_buf[..count], &mut self.pt_buf)
            .map_err(|err| {
                std::io::Error::new(
                    std::io::ErrorKind::Other,
                    format!("crypter update failed - {err}"),
                )
            })?;
        debug_assert_eq!(written, count);
        buf[..written].copy_from_slice(&self.pt_buf[..written]);

        self.num_read += count;
        Ok(written)
    }
}
