//! Content hashing used for log signatures and socket naming.

use sha2::{Digest, Sha256};

/// Hex SHA-256 of `bytes`.
#[must_use]
pub fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Hash of log text as written line by line (each line plus `\n`).
///
/// Trailing whitespace and blank lines do not change the hash, so a log
/// that only differs in layout is not reported as modified.
#[must_use]
pub fn log_content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    for line in text.lines() {
        let line = line.trim_end();
        if line.is_empty() {
            continue;
        }
        hasher.update(line.as_bytes());
        hasher.update(b"\n");
    }
    format!("{:x}", hasher.finalize())
}

/// First `len` hex characters of the SHA-256 of `input`.
#[must_use]
pub fn short_hash(input: &str, len: usize) -> String {
    let mut hex = sha256_hex(input.as_bytes());
    hex.truncate(len);
    hex
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_hash_ignores_layout() {
        let a = "{\"id\":\"bd-1\"}\n{\"id\":\"bd-2\"}\n";
        let b = "{\"id\":\"bd-1\"}   \n\n{\"id\":\"bd-2\"}";
        assert_eq!(log_content_hash(a), log_content_hash(b));
    }

    #[test]
    fn log_hash_detects_content_change() {
        assert_ne!(
            log_content_hash("{\"id\":\"bd-1\"}\n"),
            log_content_hash("{\"id\":\"bd-2\"}\n")
        );
    }

    #[test]
    fn short_hash_length() {
        assert_eq!(short_hash("/tmp/repo/.beads", 16).len(), 16);
        assert_eq!(short_hash("x", 16), short_hash("x", 16));
    }
}
