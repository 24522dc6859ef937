//! Whole-blob chunk helpers: content addressing and one-shot encode/decode.
//!
//! The streaming halves live in [`chunk_writer`](crate::chunk_writer) and
//! [`chunk_reader`](crate::chunk_reader); these functions wire them up with
//! the LZW layer for callers that hold a complete chunk in memory.

use std::io::Read;

use weezl::BitOrder;

use crate::chunk_reader::ChunkReader;
use crate::chunk_writer::ChunkWriter;
use crate::error::{Error, Result};
use crate::key_derivation::{hmac_sha384, DIGEST_BYTES};
use crate::keyring::Keyring;

/// LZW parameters matching the writer side: LSB-first, 8 bit initial width.
const LZW_CODE_WIDTH: u8 = 8;

/// Content address of a plaintext chunk: `HMAC-SHA-384(chunk_storage, m)`.
pub fn chunk_id(keyring: &Keyring, plaintext: &[u8]) -> Result<[u8; DIGEST_BYTES]> {
    hmac_sha384(keyring.chunk_storage(), plaintext)
}

/// Compress, encrypt and authenticate one chunk into a blob.
pub fn encode_chunk(keyring: &Keyring, plaintext: &[u8]) -> Result<Vec<u8>> {
    let mut writer = ChunkWriter::new(Vec::new(), keyring)?;
    compress_into(plaintext, &mut writer)?;
    writer.close()
}

/// Compress `plaintext` through the LZW layer into `sink`.
pub fn compress_into<W: std::io::Write>(plaintext: &[u8], sink: &mut W) -> Result<()> {
    let mut encoder = weezl::encode::Encoder::new(BitOrder::Lsb, LZW_CODE_WIDTH);
    let result = encoder.into_stream(sink).encode_all(plaintext);
    result.status.map_err(|err| {
        Error::io(
            "lzw encoder",
            std::io::Error::new(std::io::ErrorKind::Other, err.to_string()),
        )
    })?;
    Ok(())
}

/// Authenticate and decrypt a chunk blob, then decompress it.
///
/// The MAC is verified over the whole body before any decompression, so a
/// tampered blob fails with [`Error::ChunkAuthenticationFailed`] rather than
/// with an LZW error.
pub fn decode_chunk(keyring: &Keyring, blob: &[u8]) -> Result<Vec<u8>> {
    let mut reader = ChunkReader::new(blob, keyring, blob.len())?;
    let mut body = Vec::new();
    reader
        .read_to_end(&mut body)
        .map_err(|err| Error::io("chunk source", err))?;
    let compressed = reader.compressed();
    reader.close()?;

    if !compressed {
        return Ok(body);
    }

    let mut plaintext = Vec::new();
    let mut decoder = weezl::decode::Decoder::new(BitOrder::Lsb, LZW_CODE_WIDTH);
    let result = decoder.into_stream(&mut plaintext).decode_all(&body[..]);
    result
        .status
        .map_err(|_| Error::CorruptChunk("lzw stream does not decode".to_string()))?;
    Ok(plaintext)
}
