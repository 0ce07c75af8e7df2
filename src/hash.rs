//! Content fingerprinting for deduplication.
//!
//! The fingerprint is the lowercase hex SHA-256 of the file's bytes. Files
//! are streamed through the digest in fixed-size chunks so memory use is
//! constant regardless of document size.

use sha2::{Digest, Sha256};
use std::path::Path;
use tokio::io::{AsyncRead, AsyncReadExt};

const CHUNK_SIZE: usize = 64 * 1024;

/// Stream `reader` to EOF and return its hex SHA-256 digest.
pub async fn fingerprint_reader<R>(mut reader: R) -> std::io::Result<String>
where
    R: AsyncRead + Unpin,
{
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Fingerprint a local file.
pub async fn fingerprint_file(path: &Path) -> std::io::Result<String> {
    let file = tokio::fs::File::open(path).await?;
    fingerprint_reader(file).await
}
