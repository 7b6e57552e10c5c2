use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use fs2::FileExt;

/// Exclusive advisory lock on one cache slot, held by the deploy populating it.
///
/// Released on drop. The lock file itself is left behind; it is empty and
/// reused by the next deploy of the same revision.
#[derive(Debug)]
pub struct SlotLock {
    file: File,
    path: PathBuf,
}

impl SlotLock {
    /// Wait for the lock, polling with backoff, for at most `timeout`.
    ///
    /// Fails with `ErrorKind::TimedOut` when another deploy keeps the slot
    /// longer than that.
    pub fn acquire(lock_path: &Path, timeout: Duration) -> io::Result<Self> {
        let file = open_lock_file(lock_path)?;
        let deadline = Instant::now() + timeout;
        let mut backoff = Backoff::new();

        while !try_lock(&file)? {
            if Instant::now() >= deadline {
                return Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!(
                        "{} still held after {:?}",
                        lock_path.display(),
                        timeout
                    ),
                ));
            }
            log::debug!("slot lock {} is busy, waiting", lock_path.display());
            backoff.sleep();
        }

        Ok(Self {
            file,
            path: lock_path.to_path_buf(),
        })
    }
}

impl Drop for SlotLock {
    fn drop(&mut self) {
        if let Err(e) = self.file.unlock() {
            log::warn!("failed to release {}: {}", self.path.display(), e);
        }
    }
}

fn open_lock_file(lock_path: &Path) -> io::Result<File> {
    if let Some(parent) = lock_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(false)
        .open(lock_path)
}

/// `Ok(false)` when another handle holds the lock.
fn try_lock(file: &File) -> io::Result<bool> {
    match file.try_lock_exclusive() {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(false),
        Err(e) => Err(e),
    }
}

/// Doubling sleep between polls, 10ms up to 500ms.
struct Backoff {
    next: Duration,
}

impl Backoff {
    const FIRST: Duration = Duration::from_millis(10);
    const MAX: Duration = Duration::from_millis(500);

    fn new() -> Self {
        Self { next: Self::FIRST }
    }

    fn sleep(&mut self) {
        std::thread::sleep(self.next);
        self.next = (self.next * 2).min(Self::MAX);
    }
}
