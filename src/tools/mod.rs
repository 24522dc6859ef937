//! Small helpers shared across the crate.

use crate::error::Result;

pub mod tty;

/// Fill `buf` with bytes from the OS CSPRNG.
///
/// Failure to draw the requested number of bytes is fatal and propagated.
pub fn fill_random(buf: &mut [u8]) -> Result<()> {
    openssl::rand::rand_bytes(buf)?;
    Ok(())
}

/// Draw `len` fresh random bytes.
pub fn random_data(len: usize) -> Result<Vec<u8>> {
    let mut data = vec![0u8; len];
    fill_random(&mut data)?;
    Ok(data)
}

/// Constant-time equality for MAC and digest comparisons.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && openssl::memcmp::eq(a, b)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn random_data_has_requested_length() {
        let data = random_data(48).unwrap();
        assert_eq!(data.len(), 48);
        // not a randomness test, just a smoke check that we did not get zeroes
        assert_ne!(data, vec![0u8; 48]);
    }

    #[test]
    fn constant_time_eq_rejects_length_mismatch() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"abcd"));
    }
}
