//! Key derivation primitives.
//!
//! Everything in the scheme hangs off two constructions: PBKDF2 (used once,
//! to turn a passphrase into keyring wrapping material) and the NIST SP
//! 800-108 counter-mode concatenation KDF (used per object, to derive chunk
//! and manifest keys from the long-lived master keys). Both use SHA-384.

use openssl::hash::{Hasher, MessageDigest};
use openssl::pkey::{PKey, Private};
use openssl::sign::Signer;

use crate::error::Result;

/// Size of a SHA-384 digest and of every HMAC-SHA-384 tag.
pub const DIGEST_BYTES: usize = 48;

/// PBKDF2 iteration count used when wrapping a keyring.
pub const PBKDF2_ITERATIONS: u64 = 131072;

/// Incremental HMAC-SHA-384.
///
/// The openssl `Signer` borrows its `PKey`; boxing the key keeps its address
/// stable while this struct moves, so the signer may live alongside it.
pub struct HmacSha384 {
    signer: Signer<'static>,
    _pkey: Box<PKey<Private>>,
}

impl HmacSha384 {
    pub fn new(key: &[u8]) -> Result<Self> {
        let pkey = Box::new(PKey::hmac(key)?);
        let signer = Signer::new(MessageDigest::sha384(), &pkey)?;
        let signer =
            unsafe { std::mem::transmute::<Signer<'_>, Signer<'static>>(signer) };
        Ok(Self {
            signer,
            _pkey: pkey,
        })
    }

    pub fn update(&mut self, data: &[u8]) -> Result<()> {
        self.signer.update(data)?;
        Ok(())
    }

    pub fn finish(self) -> Result<[u8; DIGEST_BYTES]> {
        let mut tag = [0u8; DIGEST_BYTES];
        self.signer.sign(&mut tag)?;
        Ok(tag)
    }
}

/// One-shot HMAC-SHA-384.
pub fn hmac_sha384(key: &[u8], data: &[u8]) -> Result<[u8; DIGEST_BYTES]> {
    let mut mac = HmacSha384::new(key)?;
    mac.update(data)?;
    mac.finish()
}

/// One-shot SHA-384.
pub fn sha384(data: &[u8]) -> Result<[u8; DIGEST_BYTES]> {
    let mut hasher = Sha384::new()?;
    hasher.update(data)?;
    hasher.finish()
}

/// Incremental SHA-384.
pub struct Sha384 {
    hasher: Hasher,
}

impl Sha384 {
    pub fn new() -> Result<Self> {
        Ok(Self {
            hasher: Hasher::new(MessageDigest::sha384())?,
        })
    }

    pub fn update(&mut self, data: &[u8]) -> Result<()> {
        self.hasher.update(data)?;
        Ok(())
    }

    pub fn finish(mut self) -> Result<[u8; DIGEST_BYTES]> {
        let digest = self.hasher.finish()?;
        let mut out = [0u8; DIGEST_BYTES];
        out.copy_from_slice(&digest);
        Ok(out)
    }
}

/// NIST SP 800-108 KDF in counter mode with an HMAC-SHA-384 PRF.
///
/// Block i is `HMAC(key, BE64(i) ‖ label ‖ 0x00 ‖ context ‖ BE64(L))` where
/// `L` is the requested output size in bits. Blocks are concatenated and
/// truncated to `out_bytes`.
pub fn nist_concat_kdf(
    key: &[u8],
    label: &[u8],
    context: &[u8],
    out_bytes: usize,
) -> Result<Vec<u8>> {
    let iterations = (out_bytes + DIGEST_BYTES - 1) / DIGEST_BYTES;
    let bits = (out_bytes as u64) * 8;

    let mut key_material = Vec::with_capacity(iterations * DIGEST_BYTES);
    for i in 0..iterations as u64 {
        let mut mac = HmacSha384::new(key)?;
        mac.update(&i.to_be_bytes())?;
        mac.update(label)?;
        mac.update(&[0u8])?;
        mac.update(context)?;
        mac.update(&bits.to_be_bytes())?;
        key_material.extend_from_slice(&mac.finish()?);
    }
    key_material.truncate(out_bytes);
    Ok(key_material)
}

/// PBKDF2 with an HMAC-SHA-384 PRF.
pub fn pbkdf2_sha384(
    password: &[u8],
    salt: &[u8],
    iterations: u64,
    out: &mut [u8],
) -> Result<()> {
    openssl::pkcs5::pbkdf2_hmac(
        password,
        salt,
        iterations as usize,
        MessageDigest::sha384(),
        out,
    )?;
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn concat_kdf_is_deterministic() {
        let key = [7u8; 32];
        let a = nist_concat_kdf(&key, b"label", b"ctx", 48).unwrap();
        let b = nist_concat_kdf(&key, b"label", b"ctx", 48).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 48);
    }

    #[test]
    fn concat_kdf_separates_label_and_context() {
        let key = [7u8; 32];
        let base = nist_concat_kdf(&key, b"label", b"ctx", 48).unwrap();
        assert_ne!(base, nist_concat_kdf(&key, b"label2", b"ctx", 48).unwrap());
        assert_ne!(base, nist_concat_kdf(&key, b"label", b"ctx2", 48).unwrap());
        assert_ne!(base, nist_concat_kdf(&[8u8; 32], b"label", b"ctx", 48).unwrap());
    }

    #[test]
    fn concat_kdf_output_length_is_bound_into_blocks() {
        // L is part of every PRF input, so a longer request is not an
        // extension of a shorter one.
        let key = [7u8; 32];
        let short = nist_concat_kdf(&key, b"label", b"ctx", 48).unwrap();
        let long = nist_concat_kdf(&key, b"label", b"ctx", 96).unwrap();
        assert_eq!(long.len(), 96);
        assert_ne!(short[..], long[..48]);
    }

    #[test]
    fn concat_kdf_truncates_partial_blocks() {
        let key = [7u8; 32];
        let out = nist_concat_kdf(&key, b"label", b"ctx", 100).unwrap();
        assert_eq!(out.len(), 100);
    }

    #[test]
    fn hmac_and_digest_sizes() {
        assert_eq!(hmac_sha384(b"key", b"data").unwrap().len(), 48);
        assert_eq!(sha384(b"data").unwrap().len(), 48);
    }

    #[test]
    fn incremental_hmac_matches_one_shot() {
        let mut mac = HmacSha384::new(b"key").unwrap();
        mac.update(b"da").unwrap();
        mac.update(b"ta").unwrap();
        assert_eq!(mac.finish().unwrap(), hmac_sha384(b"key", b"data").unwrap());
    }

    #[test]
    fn incremental_sha_matches_one_shot() {
        let mut hasher = Sha384::new().unwrap();
        hasher.update(b"da").unwrap();
        hasher.update(b"ta").unwrap();
        assert_eq!(hasher.finish().unwrap(), sha384(b"data").unwrap());
    }
}
