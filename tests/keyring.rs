use cypherback::error::Error;
use cypherback::file_formats::KEYRING_BLOB_BYTES;
use cypherback::Keyring;
use zeroize::Zeroize;

#[test]
fn wrap_unwrap_roundtrip() {
    let keyring = Keyring::generate().unwrap();
    let blob = keyring.wrap(b"pw").unwrap();
    assert_eq!(blob.len(), KEYRING_BLOB_BYTES);

    let unwrapped = Keyring::unwrap(&blob, b"pw").unwrap();
    assert_eq!(keyring.metadata_master(), unwrapped.metadata_master());
    assert_eq!(keyring.metadata_auth(), unwrapped.metadata_auth());
    assert_eq!(keyring.metadata_storage(), unwrapped.metadata_storage());
    assert_eq!(keyring.chunk_master(), unwrapped.chunk_master());
    assert_eq!(keyring.chunk_auth(), unwrapped.chunk_auth());
    assert_eq!(keyring.chunk_storage(), unwrapped.chunk_storage());
    assert_eq!(keyring.id().unwrap(), unwrapped.id().unwrap());
}

#[test]
fn wrap_is_randomized() {
    let keyring = Keyring::generate().unwrap();
    // fresh salt and IV every time
    assert_ne!(keyring.wrap(b"pw").unwrap(), keyring.wrap(b"pw").unwrap());
}

#[test]
fn wrong_password_is_detected_by_witness() {
    let keyring = Keyring::generate().unwrap();
    let blob = keyring.wrap(b"pw").unwrap();
    assert!(matches!(
        Keyring::unwrap(&blob, b"px"),
        Err(Error::BadPassword)
    ));
}

#[test]
fn bad_version_is_corrupt() {
    let keyring = Keyring::generate().unwrap();
    let mut blob = keyring.wrap(b"pw").unwrap();
    blob[0] = 1;
    assert!(matches!(
        Keyring::unwrap(&blob, b"pw"),
        Err(Error::CorruptKeyring(_))
    ));
}

#[test]
fn truncated_blob_is_corrupt() {
    let keyring = Keyring::generate().unwrap();
    let blob = keyring.wrap(b"pw").unwrap();
    assert!(matches!(
        Keyring::unwrap(&blob[..blob.len() - 1], b"pw"),
        Err(Error::CorruptKeyring(_))
    ));
}

#[test]
fn flipped_ciphertext_fails_authentication() {
    let keyring = Keyring::generate().unwrap();
    let mut blob = keyring.wrap(b"pw").unwrap();
    // inside the encrypted key body; the witness still matches
    blob[150] ^= 0x01;
    assert!(matches!(
        Keyring::unwrap(&blob, b"pw"),
        Err(Error::KeyringAuthenticationFailed)
    ));
}

#[test]
fn flipped_trailer_fails_authentication() {
    let keyring = Keyring::generate().unwrap();
    let mut blob = keyring.wrap(b"pw").unwrap();
    let last = blob.len() - 1;
    blob[last] ^= 0x80;
    assert!(matches!(
        Keyring::unwrap(&blob, b"pw"),
        Err(Error::KeyringAuthenticationFailed)
    ));
}

#[test]
fn zeroize_overwrites_every_key_byte() {
    let mut keyring = Keyring::generate().unwrap();
    keyring.zeroize();
    assert!(keyring.metadata_master().iter().all(|&b| b == 0));
    assert!(keyring.metadata_auth().iter().all(|&b| b == 0));
    assert!(keyring.metadata_storage().iter().all(|&b| b == 0));
    assert!(keyring.chunk_master().iter().all(|&b| b == 0));
    assert!(keyring.chunk_auth().iter().all(|&b| b == 0));
    assert!(keyring.chunk_storage().iter().all(|&b| b == 0));
}
