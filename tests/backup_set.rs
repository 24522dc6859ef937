use std::fs;

use lazy_static::lazy_static;

use cypherback::error::Error;
use cypherback::key_derivation::sha384;
use cypherback::{manifest_id, process_path, BackupSet, Keyring, MemoryBackend, Record};

lazy_static! {
    static ref KEYRING: Keyring = Keyring::generate().unwrap();
}

#[test]
fn manifest_id_hides_the_tag() {
    let id = manifest_id(&KEYRING, "t").unwrap();
    assert_eq!(id.len(), 96);
    assert_eq!(id, manifest_id(&KEYRING, "t").unwrap());
    assert_ne!(id, manifest_id(&KEYRING, "u").unwrap());

    let other = Keyring::generate().unwrap();
    assert_ne!(id, manifest_id(&other, "t").unwrap());
}

#[test]
fn empty_run_roundtrip() {
    let backend = MemoryBackend::new();
    let mut set = BackupSet::ensure(&KEYRING, &backend, "t").unwrap();
    assert!(set.records().is_empty());

    set.start_backup().unwrap();
    set.end_backup().unwrap();
    set.write(&backend).unwrap();

    let reloaded = BackupSet::ensure(&KEYRING, &backend, "t").unwrap();
    assert_eq!(reloaded.records().len(), 2);
    match &reloaded.records()[0] {
        Record::Start { length, .. } => assert_eq!(*length, 48),
        other => panic!("expected start record, got {other:?}"),
    }
    match &reloaded.records()[1] {
        // the hash of a zero-record run covers only the end record's own
        // header bytes, which pins this constant
        Record::End { digest } => assert_eq!(*digest, sha384(&[0u8, 8u8]).unwrap()),
        other => panic!("expected end record, got {other:?}"),
    }
}

#[test]
fn runs_append() {
    let backend = MemoryBackend::new();
    let mut set = BackupSet::ensure(&KEYRING, &backend, "t").unwrap();
    set.start_backup().unwrap();
    set.end_backup().unwrap();
    set.write(&backend).unwrap();

    let mut set = BackupSet::ensure(&KEYRING, &backend, "t").unwrap();
    set.start_backup().unwrap();
    set.end_backup().unwrap();
    set.write(&backend).unwrap();

    let reloaded = BackupSet::ensure(&KEYRING, &backend, "t").unwrap();
    assert_eq!(reloaded.records().len(), 4);
}

#[test]
fn wrong_states_are_rejected() {
    let backend = MemoryBackend::new();
    let mut set = BackupSet::ensure(&KEYRING, &backend, "t").unwrap();

    let dir = tempfile::tempdir().unwrap();
    assert!(matches!(
        process_path(&mut set, dir.path()),
        Err(Error::WrongState(_))
    ));
    assert!(matches!(set.write(&backend), Err(Error::WrongState(_))));

    set.start_backup().unwrap();
    assert!(matches!(set.start_backup(), Err(Error::WrongState(_))));
    assert!(matches!(set.write(&backend), Err(Error::WrongState(_))));

    set.end_backup().unwrap();
    assert!(matches!(set.end_backup(), Err(Error::WrongState(_))));
}

/// Build a set over a scratch tree with several entry kinds and return its
/// encoded blob along with the records it carries.
fn encoded_sample_set() -> (Vec<u8>, Vec<Record>) {
    let dir = tempfile::tempdir().unwrap();
    fs::create_dir(dir.path().join("sub")).unwrap();
    fs::write(dir.path().join("sub/file"), b"some file content").unwrap();
    std::os::unix::fs::symlink("sub/file", dir.path().join("link")).unwrap();

    let backend = MemoryBackend::new();
    let mut set = BackupSet::ensure(&KEYRING, &backend, "sample").unwrap();
    set.start_backup().unwrap();
    process_path(&mut set, dir.path()).unwrap();
    set.end_backup().unwrap();

    let blob = set.encode().unwrap();
    (blob, set.records().to_vec())
}

#[test]
fn record_stream_roundtrips_in_order() {
    let (blob, records) = encoded_sample_set();
    let decoded = BackupSet::decode(&KEYRING, "sample", &blob).unwrap();
    assert_eq!(decoded.records(), &records[..]);
}

#[test]
fn wrong_keyring_fails_before_records_are_parsed() {
    let (blob, _) = encoded_sample_set();
    let other = Keyring::generate().unwrap();
    assert!(matches!(
        BackupSet::decode(&other, "sample", &blob),
        Err(Error::BackupSetAuthenticationFailed)
    ));
}

#[test]
fn flipped_version_is_corrupt() {
    let (mut blob, _) = encoded_sample_set();
    blob[0] ^= 0x01;
    assert!(matches!(
        BackupSet::decode(&KEYRING, "sample", &blob),
        Err(Error::CorruptBackupSet(_))
    ));
}

#[test]
fn flipped_nonce_fails_authentication() {
    let (mut blob, _) = encoded_sample_set();
    blob[5] ^= 0x01;
    assert!(matches!(
        BackupSet::decode(&KEYRING, "sample", &blob),
        Err(Error::BackupSetAuthenticationFailed)
    ));
}

#[test]
fn flipped_trailer_fails_authentication() {
    let (mut blob, _) = encoded_sample_set();
    let last = blob.len() - 1;
    blob[last] ^= 0x80;
    assert!(matches!(
        BackupSet::decode(&KEYRING, "sample", &blob),
        Err(Error::BackupSetAuthenticationFailed)
    ));
}

#[test]
fn every_flipped_record_byte_fails() {
    let (blob, _) = encoded_sample_set();
    // the record area starts after version, nonce, and the encrypted tag
    // prefix; sample a byte every 64 across it
    let start = 1 + 48 + 4 + "sample".len() + 48;
    let mut offset = start;
    while offset < blob.len() {
        let mut tampered = blob.clone();
        tampered[offset] ^= 0x01;
        assert!(
            BackupSet::decode(&KEYRING, "sample", &tampered).is_err(),
            "bit flip at byte {offset} went undetected"
        );
        offset += 64;
    }
}
