//! Advisory locks: the daemon's single-instance lock and the shared sync lock.
//!
//! Both are `flock`-style locks via `fs2`, released by the kernel if the
//! holder dies, so a stale file never blocks a new daemon.

use crate::error::{BeadsError, Result};
use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

/// Contents of the daemon lock file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockInfo {
    pub pid: u32,
    pub started_at: DateTime<Utc>,
    pub socket: PathBuf,
}

/// Exclusive lock held for the lifetime of a running daemon.
#[derive(Debug)]
pub struct DaemonLock {
    file: File,
    path: PathBuf,
    info: LockInfo,
}

impl DaemonLock {
    /// Take the lock without waiting.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyRunning` (with the holder's pid when readable) if
    /// another daemon holds it, or an I/O error.
    pub fn acquire(path: &Path, socket: &Path) -> Result<Self> {
        let mut file = open_lock_file(path)?;
        if let Err(err) = file.try_lock_exclusive() {
            if err.kind() == fs2::lock_contended_error().kind() {
                return Err(BeadsError::AlreadyRunning {
                    path: path.to_path_buf(),
                    pid: read_info(path).map(|info| info.pid),
                });
            }
            return Err(err.into());
        }

        let info = LockInfo {
            pid: std::process::id(),
            started_at: Utc::now(),
            socket: socket.to_path_buf(),
        };
        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        file.write_all(&serde_json::to_vec(&info)?)?;
        file.sync_all()?;

        tracing::debug!(path = %path.display(), pid = info.pid, "daemon lock acquired");
        Ok(Self {
            file,
            path: path.to_path_buf(),
            info,
        })
    }

    /// Check that the lock file still exists and still names this process.
    ///
    /// # Errors
    ///
    /// Returns `LockCorrupt` if the file was removed, replaced or rewritten.
    pub fn verify(&self) -> Result<()> {
        let corrupt = |reason: String| BeadsError::LockCorrupt {
            path: self.path.clone(),
            reason,
        };

        let on_disk = fs::metadata(&self.path).map_err(|err| corrupt(err.to_string()))?;
        let held = self.file.metadata()?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::MetadataExt;
            if on_disk.ino() != held.ino() || on_disk.dev() != held.dev() {
                return Err(corrupt("lock file was replaced".to_string()));
            }
        }
        #[cfg(not(unix))]
        let _ = (on_disk, held);

        let mut contents = String::new();
        (&self.file).seek(SeekFrom::Start(0))?;
        (&self.file).read_to_string(&mut contents)?;
        let info: LockInfo = serde_json::from_str(&contents)
            .map_err(|err| corrupt(format!("unreadable lock metadata: {err}")))?;
        if info != self.info {
            return Err(corrupt(format!(
                "lock names pid {} but this daemon is pid {}",
                info.pid, self.info.pid
            )));
        }
        Ok(())
    }
}

impl Drop for DaemonLock {
    fn drop(&mut self) {
        // Empty the file before unlocking so readers never see a dead pid.
        let _ = self.file.set_len(0);
        let _ = FileExt::unlock(&self.file);
        tracing::debug!(path = %self.path.display(), "daemon lock released");
    }
}

/// Metadata of the daemon holding (or last holding) the lock, if readable.
#[must_use]
pub fn read_info(path: &Path) -> Option<LockInfo> {
    let contents = fs::read_to_string(path).ok()?;
    serde_json::from_str(&contents).ok()
}

/// Whether some process currently holds the daemon lock.
#[must_use]
pub fn is_held(path: &Path) -> bool {
    let Ok(file) = OpenOptions::new().read(true).open(path) else {
        return false;
    };
    match FileExt::try_lock_shared(&file) {
        Ok(()) => {
            let _ = FileExt::unlock(&file);
            false
        }
        Err(_) => true,
    }
}

/// Exclusive lock serializing every writer of the Store and the log file
/// across processes: the daemon's reconcile and direct-file clients.
#[derive(Debug)]
pub struct SyncLock {
    file: File,
}

impl SyncLock {
    /// Wait up to `timeout` for the lock, backing off between attempts.
    ///
    /// # Errors
    ///
    /// Returns `LockTimeout` if the lock is still held when the timeout expires.
    pub fn acquire(path: &Path, timeout: Duration) -> Result<Self> {
        let file = open_lock_file(path)?;
        let start = Instant::now();
        let mut delay = Duration::from_millis(10);

        loop {
            match file.try_lock_exclusive() {
                Ok(()) => return Ok(Self { file }),
                Err(err) if err.kind() != fs2::lock_contended_error().kind() => {
                    return Err(err.into());
                }
                Err(_) if start.elapsed() < timeout => {
                    thread::sleep(delay);
                    delay = (delay * 2).min(Duration::from_millis(200));
                }
                Err(_) => {
                    return Err(BeadsError::LockTimeout {
                        path: path.to_path_buf(),
                    });
                }
            }
        }
    }
}

impl Drop for SyncLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

fn open_lock_file(path: &Path) -> Result<File> {
    let mut options = OpenOptions::new();
    options.read(true).write(true).create(true).truncate(false);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    Ok(options.open(path)?)
}
