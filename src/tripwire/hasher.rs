//! FR-030: SHA-256 hashing for artifacts, recipes, and cache keys.

use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::Path;

const STREAM_BUF_SIZE: usize = 65536;

/// Hash a file's contents. Returns lowercase hex and the byte count.
pub fn sha256_file(path: &Path) -> Result<(String, u64), String> {
    let mut file =
        std::fs::File::open(path).map_err(|e| format!("cannot open {}: {}", path.display(), e))?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; STREAM_BUF_SIZE];
    let mut total = 0u64;
    loop {
        let n = file
            .read(&mut buf)
            .map_err(|e| format!("read error {}: {}", path.display(), e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        total += n as u64;
    }
    Ok((hex::encode(hasher.finalize()), total))
}

/// Hash a string. Returns lowercase hex.
pub fn sha256_string(s: &str) -> String {
    hex::encode(Sha256::digest(s.as_bytes()))
}

/// First `len` hex characters of the string's hash, for file names.
pub fn short_hash(s: &str, len: usize) -> String {
    let mut full = sha256_string(s);
    full.truncate(len);
    full
}

/// Case-insensitive checksum comparison; an optional `sha256:` prefix is ignored.
pub fn checksum_matches(expected: &str, actual: &str) -> bool {
    let strip = |s: &str| s.trim().trim_start_matches("sha256:").to_ascii_lowercase();
    strip(expected) == strip(actual)
}
