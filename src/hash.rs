//! Content identity: canonical hash form and BLAKE3 streaming digests

use crate::error::{RegistryError, RegistryResult};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

/// Prefix of the canonical hash form.
pub const CANONICAL_PREFIX: &str = "blake3:";

/// Streaming chunk size for file digests.
pub const HASH_CHUNK_SIZE: usize = 8 * 1024 * 1024;

const DIGEST_HEX_LEN: usize = 64;

/// Normalize and validate a canonical hash string (`blake3:` + 64 lowercase
/// hex chars). Returns the normalized form.
pub fn parse_canonical_hash(input: &str) -> RegistryResult<String> {
    let normalized = input.trim().to_ascii_lowercase();
    let digest = normalized
        .strip_prefix(CANONICAL_PREFIX)
        .ok_or_else(|| RegistryError::InvalidHash(input.to_string()))?;
    if digest.len() != DIGEST_HEX_LEN || !digest.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(RegistryError::InvalidHash(input.to_string()));
    }
    // Hex digits must already be lowercase after normalization.
    Ok(normalized)
}

/// True when `input` is already a valid canonical hash.
pub fn is_canonical_hash(input: &str) -> bool {
    parse_canonical_hash(input).is_ok()
}

/// Wrap a bare hex digest in the canonical form.
pub fn to_canonical(digest_hex: &str) -> String {
    format!("{CANONICAL_PREFIX}{digest_hex}")
}

/// Compute the BLAKE3 digest of a file, returned as bare lowercase hex.
///
/// The file is opened read-only and consumed in [`HASH_CHUNK_SIZE`] chunks.
pub fn hash_file(path: &Path) -> RegistryResult<String> {
    let mut file = File::open(path)?;
    hash_stream(&mut file)
}

/// Compute the BLAKE3 digest of any seekable byte source.
///
/// The source is rewound to the start before hashing and the original
/// position is restored afterwards, including on read failure.
pub fn hash_reader<R: Read + Seek>(reader: &mut R) -> RegistryResult<String> {
    let original = reader.stream_position()?;
    if original != 0 {
        reader.seek(SeekFrom::Start(0))?;
    }
    let result = hash_stream(reader);
    if original != 0 {
        reader.seek(SeekFrom::Start(original))?;
    }
    result
}

/// Hash a file on a blocking worker thread so async callers never stall the
/// event loop on file IO or digest computation.
pub async fn hash_file_async(path: impl AsRef<Path>) -> RegistryResult<String> {
    let path = path.as_ref().to_path_buf();
    tokio::task::spawn_blocking(move || hash_file(&path))
        .await
        .map_err(|e| RegistryError::Internal(format!("hash worker panicked: {e}")))?
}

fn hash_stream<R: Read>(reader: &mut R) -> RegistryResult<String> {
    let mut hasher = blake3::Hasher::new();
    let mut buf = vec![0u8; HASH_CHUNK_SIZE];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize().to_hex().to_string())
}
