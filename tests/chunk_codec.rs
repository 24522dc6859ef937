use std::io::Read;

use lazy_static::lazy_static;

use cypherback::error::Error;
use cypherback::file_formats::{CHUNK_HEADER_BYTES, MAC_BYTES};
use cypherback::{chunk_id, decode_chunk, encode_chunk, ChunkReader, Keyring};

lazy_static! {
    static ref KEYRING: Keyring = Keyring::generate().unwrap();
    static ref TEST_DATA: Vec<u8> = {
        let mut data = Vec::new();
        for i in 0..100_000 {
            data.push((i % 255) as u8);
        }
        data
    };
}

#[test]
fn small_chunk_roundtrip() {
    let blob = encode_chunk(&KEYRING, b"hello").unwrap();
    assert!(blob.len() >= CHUNK_HEADER_BYTES + 1 + MAC_BYTES);
    assert_eq!(decode_chunk(&KEYRING, &blob).unwrap(), b"hello");
}

#[test]
fn large_chunk_roundtrip() {
    let blob = encode_chunk(&KEYRING, &TEST_DATA).unwrap();
    assert_eq!(decode_chunk(&KEYRING, &blob).unwrap(), *TEST_DATA);
}

#[test]
fn encoding_is_randomized() {
    // a fresh nonce per envelope; identical plaintext never repeats on disk
    let a = encode_chunk(&KEYRING, b"hello").unwrap();
    let b = encode_chunk(&KEYRING, b"hello").unwrap();
    assert_ne!(a, b);
    assert_eq!(decode_chunk(&KEYRING, &a).unwrap(), b"hello");
    assert_eq!(decode_chunk(&KEYRING, &b).unwrap(), b"hello");
}

#[test]
fn streaming_reader_with_small_buffers() {
    let blob = encode_chunk(&KEYRING, &TEST_DATA).unwrap();

    for size in [1usize, 3, 64 * 1024] {
        let mut reader = ChunkReader::new(&blob[..], &KEYRING, blob.len()).unwrap();
        assert!(reader.compressed());

        let mut body = Vec::new();
        let mut buf = vec![0u8; size];
        loop {
            let count = reader.read(&mut buf).unwrap();
            if count == 0 {
                break;
            }
            body.extend_from_slice(&buf[..count]);
        }
        reader.close().unwrap();

        let mut plaintext = Vec::new();
        let mut decoder = weezl::decode::Decoder::new(weezl::BitOrder::Lsb, 8);
        decoder
            .into_stream(&mut plaintext)
            .decode_all(&body[..])
            .status
            .unwrap();
        assert_eq!(plaintext, *TEST_DATA);
    }
}

#[test]
fn flipped_version_byte_is_corrupt() {
    let mut blob = encode_chunk(&KEYRING, b"hello").unwrap();
    blob[0] ^= 0x01;
    assert!(matches!(
        decode_chunk(&KEYRING, &blob),
        Err(Error::CorruptChunk(_))
    ));
}

#[test]
fn flipped_nonce_fails() {
    let mut blob = encode_chunk(&KEYRING, b"hello").unwrap();
    blob[10] ^= 0x01;
    // the nonce feeds the key derivation, so the decrypted flag byte is
    // garbage; failure may surface structurally or at the MAC
    match decode_chunk(&KEYRING, &blob) {
        Err(Error::ChunkAuthenticationFailed) | Err(Error::CorruptChunk(_)) => {}
        other => panic!("expected failure, got {other:?}"),
    }
}

#[test]
fn flipped_flag_byte_fails_authentication() {
    let mut blob = encode_chunk(&KEYRING, b"hello").unwrap();
    // the low bit turns the decrypted flag into 0 (uncompressed), which is
    // structurally legal, so the failure must come from the MAC
    blob[49] ^= 0x01;
    assert!(matches!(
        decode_chunk(&KEYRING, &blob),
        Err(Error::ChunkAuthenticationFailed)
    ));
}

#[test]
fn flipped_body_byte_fails_authentication_not_decompression() {
    let mut blob = encode_chunk(&KEYRING, b"hello").unwrap();
    blob[50] ^= 0x01;
    assert!(matches!(
        decode_chunk(&KEYRING, &blob),
        Err(Error::ChunkAuthenticationFailed)
    ));
}

#[test]
fn flipped_trailer_fails_authentication() {
    let mut blob = encode_chunk(&KEYRING, b"hello").unwrap();
    let last = blob.len() - 1;
    blob[last] ^= 0x80;
    assert!(matches!(
        decode_chunk(&KEYRING, &blob),
        Err(Error::ChunkAuthenticationFailed)
    ));
}

#[test]
fn undersized_blob_is_corrupt() {
    let blob = encode_chunk(&KEYRING, b"hello").unwrap();
    assert!(matches!(
        ChunkReader::new(&blob[..], &KEYRING, CHUNK_HEADER_BYTES + MAC_BYTES - 1),
        Err(Error::CorruptChunk(_))
    ));
}

#[test]
fn chunk_ids_are_deterministic_and_distinct() {
    let a = chunk_id(&KEYRING, b"hello").unwrap();
    assert_eq!(a, chunk_id(&KEYRING, b"hello").unwrap());
    assert_ne!(a, chunk_id(&KEYRING, b"hellp").unwrap());

    // the id is keyed; another keyring names the same content differently
    let other = Keyring::generate().unwrap();
    assert_ne!(a, chunk_id(&other, b"hello").unwrap());
}

#[test]
fn wrong_keyring_fails() {
    let blob = encode_chunk(&KEYRING, b"hello").unwrap();
    let other = Keyring::generate().unwrap();
    // the wrong key garbles the compression flag, so this surfaces either
    // as a structural failure or as a MAC mismatch, never as plaintext
    match decode_chunk(&other, &blob) {
        Err(Error::ChunkAuthenticationFailed) | Err(Error::CorruptChunk(_)) => {}
        other => panic!("expected failure, got {other:?}"),
    }
}
