//! Shared utilities for `beads_daemon`.
//!
//! - Content hashing (SHA256) for log signatures and socket names
//! - Time formatting/parsing (RFC3339) and duration parsing
//! - ID generation (base36 adaptive)

mod hash;
pub mod id;
pub mod time;

pub use hash::{log_content_hash, sha256_hex, short_hash};
pub use id::{IdConfig, IdGenerator, IdSeed, is_valid_id_format, normalize_id, validate_prefix};

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

/// Write `contents` to `path` atomically: temp file in the same directory,
/// `sync_all`, then rename over the target. The file ends up mode 0600.
///
/// # Errors
///
/// Returns an I/O error if any step fails; the temp file is removed on failure.
pub fn write_atomic(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let temp_path = path.with_extension(format!(
        "{}.tmp",
        path.extension().and_then(|e| e.to_str()).unwrap_or("")
    ));

    let result = (|| {
        let mut options = OpenOptions::new();
        options.create(true).write(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options.open(&temp_path)?;
        file.write_all(contents)?;
        file.sync_all()?;
        fs::rename(&temp_path, path)
    })();

    if result.is_err() {
        let _ = fs::remove_file(&temp_path);
    }
    result
}
