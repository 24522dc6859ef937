//! The keyring: six long-lived secret keys and their password-wrapped
//! storage format.
//!
//! Wrapped layout (409 bytes, all integers big-endian):
//!
//! ```text
//! off  len  field
//!   0    1  version = 0x00
//!   1   32  PBKDF2 salt
//!  33    8  PBKDF2 iterations
//!  41   48  SHA-384 witness digest of the 80 byte PBKDF2 output
//!  89   16  CTR IV
//! 105  256  AES-256-CTR(metadata_master ‖ metadata_auth ‖ metadata_storage
//!                       ‖ chunk_master ‖ chunk_auth ‖ chunk_storage)
//! 361   48  HMAC-SHA-384 trailer over all preceding bytes
//! ```
//!
//! The witness digest is stored in the clear so a wrong password is detected
//! before the authentication pass.

use openssl::symm::Cipher;
use zeroize::Zeroize;

use crate::error::{Error, Result};
use crate::file_formats::{
    FORMAT_VERSION, KEYRING_BLOB_BYTES, KEYRING_BODY_BYTES, KEYRING_ID_PREFIX, KEYRING_IV_BYTES,
    KEYRING_SALT_BYTES, KEYRING_WRAP_KEY_BYTES, MAC_BYTES,
};
use crate::key_derivation::{pbkdf2_sha384, sha384, HmacSha384, Sha384, PBKDF2_ITERATIONS};
use crate::tools;

const MASTER_KEY_BYTES: usize = 32;
const AUTH_KEY_BYTES: usize = 48;

/// The six-key bundle parameterizing the whole scheme.
///
/// Keys live in fixed-capacity buffers that are never reallocated, and are
/// overwritten with zeroes on drop.
pub struct Keyring {
    metadata_master: Box<[u8]>,
    metadata_auth: Box<[u8]>,
    metadata_storage: Box<[u8]>,
    chunk_master: Box<[u8]>,
    chunk_auth: Box<[u8]>,
    chunk_storage: Box<[u8]>,
}

impl Keyring {
    /// Draw all six keys at their fixed lengths from the OS CSPRNG.
    pub fn generate() -> Result<Self> {
        Ok(Self {
            metadata_master: tools::random_data(MASTER_KEY_BYTES)?.into_boxed_slice(),
            metadata_auth: tools::random_data(AUTH_KEY_BYTES)?.into_boxed_slice(),
            metadata_storage: tools::random_data(AUTH_KEY_BYTES)?.into_boxed_slice(),
            chunk_master: tools::random_data(MASTER_KEY_BYTES)?.into_boxed_slice(),
            chunk_auth: tools::random_data(AUTH_KEY_BYTES)?.into_boxed_slice(),
            chunk_storage: tools::random_data(AUTH_KEY_BYTES)?.into_boxed_slice(),
        })
    }

    pub fn metadata_master(&self) -> &[u8] {
        &self.metadata_master
    }

    pub fn metadata_auth(&self) -> &[u8] {
        &self.metadata_auth
    }

    pub fn metadata_storage(&self) -> &[u8] {
        &self.metadata_storage
    }

    pub fn chunk_master(&self) -> &[u8] {
        &self.chunk_master
    }

    pub fn chunk_auth(&self) -> &[u8] {
        &self.chunk_auth
    }

    pub fn chunk_storage(&self) -> &[u8] {
        &self.chunk_storage
    }

    /// SHA-384 over a domain separator and the six keys in canonical order.
    pub fn id(&self) -> Result<[u8; 48]> {
        let mut hasher = Sha384::new()?;
        hasher.update(KEYRING_ID_PREFIX)?;
        hasher.update(&self.metadata_master)?;
        hasher.update(&self.metadata_auth)?;
        hasher.update(&self.metadata_storage)?;
        hasher.update(&self.chunk_master)?;
        hasher.update(&self.chunk_auth)?;
        hasher.update(&self.chunk_storage)?;
        hasher.finish()
    }

    /// Hex form of [`Keyring::id`], as used for object store paths.
    pub fn hex_id(&self) -> Result<String> {
        Ok(hex::encode(self.id()?))
    }

    /// Serialize the keyring into the password-wrapped 409 byte blob.
    pub fn wrap(&self, password: &[u8]) -> Result<Vec<u8>> {
        let salt = tools::random_data(KEYRING_SALT_BYTES)?;

        let mut wrap_keys = [0u8; KEYRING_WRAP_KEY_BYTES];
        pbkdf2_sha384(password, &salt, PBKDF2_ITERATIONS, &mut wrap_keys)?;
        let witness = sha384(&wrap_keys)?;
        let (enc_key, auth_key) = wrap_keys.split_at(32);

        let iv = tools::random_data(KEYRING_IV_BYTES)?;

        let mut body = Vec::with_capacity(KEYRING_BODY_BYTES);
        body.extend_from_slice(&self.metadata_master);
        body.extend_from_slice(&self.metadata_auth);
        body.extend_from_slice(&self.metadata_storage);
        body.extend_from_slice(&self.chunk_master);
        body.extend_from_slice(&self.chunk_auth);
        body.extend_from_slice(&self.chunk_storage);
        let ciphertext =
            openssl::symm::encrypt(Cipher::aes_256_ctr(), enc_key, Some(&iv), &body);
        body.zeroize();
        let ciphertext = ciphertext?;

        let mut blob = Vec::with_capacity(KEYRING_BLOB_BYTES);
        blob.push(FORMAT_VERSION);
        blob.extend_from_slice(&salt);
        blob.extend_from_slice(&PBKDF2_ITERATIONS.to_be_bytes());
        blob.extend_from_slice(&witness);
        blob.extend_from_slice(&iv);
        blob.extend_from_slice(&ciphertext);

        let mut mac = HmacSha384::new(auth_key)?;
        mac.update(&blob)?;
        let trailer = mac.finish()?;
        blob.extend_from_slice(&trailer);

        wrap_keys.zeroize();
        Ok(blob)
    }

    /// Parse and decrypt a wrapped keyring blob.
    ///
    /// A witness mismatch is reported as [`Error::BadPassword`] before any
    /// decryption; a trailer mismatch zeroes the recovered material and is
    /// reported as [`Error::KeyringAuthenticationFailed`].
    pub fn unwrap(blob: &[u8], password: &[u8]) -> Result<Self> {
        if blob.len() != KEYRING_BLOB_BYTES {
            return Err(Error::CorruptKeyring(format!(
                "unexpected length {} (expected {})",
                blob.len(),
                KEYRING_BLOB_BYTES
            )));
        }
        if blob[0] != FORMAT_VERSION {
            return Err(Error::CorruptKeyring(format!(
                "unsupported version {}",
                blob[0]
            )));
        }

        let salt = &blob[1..33];
        let iterations = u64::from_be_bytes(blob[33..41].try_into().unwrap());
        let stored_witness = &blob[41..89];
        let iv = &blob[89..105];
        let ciphertext = &blob[105..105 + KEYRING_BODY_BYTES];
        let trailer = &blob[KEYRING_BLOB_BYTES - MAC_BYTES..];

        if iterations == 0 || iterations > 1 << 32 {
            return Err(Error::CorruptKeyring(format!(
                "implausible iteration count {iterations}"
            )));
        }

        let mut wrap_keys = [0u8; KEYRING_WRAP_KEY_BYTES];
        pbkdf2_sha384(password, salt, iterations, &mut wrap_keys)?;
        let witness = sha384(&wrap_keys)?;
        if !tools::constant_time_eq(&witness, stored_witness) {
            wrap_keys.zeroize();
            return Err(Error::BadPassword);
        }

        let (enc_key, auth_key) = wrap_keys.split_at(32);

        let mut mac = HmacSha384::new(auth_key)?;
        mac.update(&blob[..KEYRING_BLOB_BYTES - MAC_BYTES])?;
        let computed = mac.finish()?;

        let body = openssl::symm::decrypt(Cipher::aes_256_ctr(), enc_key, Some(iv), ciphertext);
        let mut body = match body {
            Ok(body) => body,
            Err(err) => {
                wrap_keys.zeroize();
                return Err(err.into());
            }
        };

        if !tools::constant_time_eq(&computed, trailer) {
            body.zeroize();
            wrap_keys.zeroize();
            return Err(Error::KeyringAuthenticationFailed);
        }

        let keyring = Self {
            metadata_master: body[0..32].to_vec().into_boxed_slice(),
            metadata_auth: body[32..80].to_vec().into_boxed_slice(),
            metadata_storage: body[80..128].to_vec().into_boxed_slice(),
            chunk_master: body[128..160].to_vec().into_boxed_slice(),
            chunk_auth: body[160..208].to_vec().into_boxed_slice(),
            chunk_storage: body[208..256].to_vec().into_boxed_slice(),
        };
        body.zeroize();
        wrap_keys.zeroize();
        Ok(keyring)
    }
}

/// Overwrite a key buffer which must be `length` bytes long.
///
/// A length mismatch means some code replaced a key buffer, which leaves
/// unzeroed key material unreachable; continuing is unsafe.
fn zero_key(key: &mut [u8], length: usize, what: &str) {
    if key.len() != length {
        panic!(
            "SERIOUS ERROR: {} is {} bytes, not {} bytes; destroy all items encrypted under this keyring",
            what,
            key.len(),
            length
        );
    }
    key.zeroize();
}

impl Zeroize for Keyring {
    fn zeroize(&mut self) {
        zero_key(&mut self.metadata_master, MASTER_KEY_BYTES, "metadata master key");
        zero_key(&mut self.metadata_auth, AUTH_KEY_BYTES, "metadata authentication key");
        zero_key(&mut self.metadata_storage, AUTH_KEY_BYTES, "metadata storage key");
        zero_key(&mut self.chunk_master, MASTER_KEY_BYTES, "chunk master key");
        zero_key(&mut self.chunk_auth, AUTH_KEY_BYTES, "chunk authentication key");
        zero_key(&mut self.chunk_storage, AUTH_KEY_BYTES, "chunk storage key");
    }
}

impl Drop for Keyring {
    fn drop(&mut self) {
        self.zeroize();
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn generated_keys_have_fixed_lengths() {
        let keyring = Keyring::generate().unwrap();
        assert_eq!(keyring.metadata_master().len(), 32);
        assert_eq!(keyring.metadata_auth().len(), 48);
        assert_eq!(keyring.metadata_storage().len(), 48);
        assert_eq!(keyring.chunk_master().len(), 32);
        assert_eq!(keyring.chunk_auth().len(), 48);
        assert_eq!(keyring.chunk_storage().len(), 48);
    }

    #[test]
    fn hex_id_is_96_chars_and_stable() {
        let keyring = Keyring::generate().unwrap();
        let id = keyring.hex_id().unwrap();
        assert_eq!(id.len(), 96);
        assert_eq!(id, keyring.hex_id().unwrap());
    }

    #[test]
    fn distinct_keyrings_have_distinct_ids() {
        let a = Keyring::generate().unwrap();
        let b = Keyring::generate().unwrap();
        assert_ne!(a.id().unwrap(), b.id().unwrap());
    }
}
