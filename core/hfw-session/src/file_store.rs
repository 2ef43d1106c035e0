//! File-backed shared store.
//!
//! One JSON file per session scope lets separate processes act as tabs of one
//! browser session. Layout under the store directory:
//!
//! ```text
//! {storage_key}.json   # SharedSession, version 1
//! {storage_key}.lock/  # present while some tab is mid-update
//! ```
//!
//! # Mutual Exclusion
//!
//! A lock directory holding an `owner` file with a per-acquire token. The
//! directory is staged under a private name and renamed into place, and a
//! rename onto an existing non-empty directory fails, so taking the lock is
//! an atomic create-with-owner.
//!
//! A lock whose owner file is older than the stale age belongs to a tab that
//! died mid-update. It is moved aside under a unique name and deleted only if
//! the moved directory still carries the token that was judged stale; a live
//! lock moved by mistake is put back. Release follows the same rule, so no tab
//! ever deletes a lock it does not own.
//!
//! The stale age defaults to half the lock timeout (at most
//! [`STALE_LOCK_AGE`]), so an abandoned lock is reclaimed before waiters give
//! up.
//!
//! # Defensive Reads
//!
//! - Missing file → empty session
//! - Empty file or corrupt JSON → empty session, logged
//! - Version mismatch → empty session, logged
//!
//! # Atomic Writes
//!
//! Temp file + rename, so a reader never sees a partial write.

use std::ffi::OsString;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant, SystemTime};

use fs_err as fs;
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::error::{HfwError, Result};
use crate::storage::{CookieScope, SharedSession, SharedStore, SHARED_SESSION_VERSION};

/// Upper bound on the stale age; locks older than this are always abandoned.
pub const STALE_LOCK_AGE: Duration = Duration::from_secs(10);

const LOCK_RETRY_DELAY: Duration = Duration::from_millis(10);
const LOCK_OWNER_FILE: &str = "owner";

pub struct FileSharedStore {
    data_path: PathBuf,
    lock_dir: PathBuf,
    lock_timeout: Duration,
    stale_lock_age: Duration,
}

impl FileSharedStore {
    pub fn new(store_dir: &Path, scope: &CookieScope, lock_timeout: Duration) -> Self {
        let key = scope.storage_key();
        FileSharedStore {
            data_path: store_dir.join(format!("{}.json", key)),
            lock_dir: store_dir.join(format!("{}.lock", key)),
            lock_timeout,
            stale_lock_age: (lock_timeout / 2).min(STALE_LOCK_AGE),
        }
    }

    pub fn with_stale_lock_age(mut self, age: Duration) -> Self {
        self.stale_lock_age = age;
        self
    }

    pub fn data_path(&self) -> &Path {
        &self.data_path
    }

    pub fn stale_lock_age(&self) -> Duration {
        self.stale_lock_age
    }

    fn acquire(&self) -> Result<LockGuard> {
        let store_dir = self.lock_dir.parent().ok_or_else(|| {
            HfwError::io(
                "Session lock path has no parent directory",
                std::io::Error::from(std::io::ErrorKind::InvalidInput),
            )
        })?;
        fs::create_dir_all(store_dir)
            .map_err(|err| HfwError::io("Failed to create session store dir", err))?;

        let token = ulid::Ulid::new().to_string();
        let staging = sibling(&self.lock_dir, &format!("{}.new", token));
        fs::create_dir_all(&staging)
            .map_err(|err| HfwError::io("Failed to stage session lock", err))?;

        let started = Instant::now();
        loop {
            // Rewritten on every attempt: the owner file's mtime is the lock's age.
            if let Err(err) = fs::write(staging.join(LOCK_OWNER_FILE), &token) {
                let _ = std::fs::remove_dir_all(&staging);
                return Err(HfwError::io("Failed to write session lock owner", err));
            }
            match std::fs::rename(&staging, &self.lock_dir) {
                Ok(()) => {
                    return Ok(LockGuard {
                        lock_dir: self.lock_dir.clone(),
                        token,
                    })
                }
                // Held, or released since the rename failed: either way, retry.
                Err(_) if staging.exists() => {}
                Err(err) => {
                    let _ = std::fs::remove_dir_all(&staging);
                    return Err(HfwError::io("Failed to take session lock", err));
                }
            }

            if let Some(holder) = stale_holder(&self.lock_dir, self.stale_lock_age) {
                warn!(
                    lock = %self.lock_dir.display(),
                    holder = holder.as_deref().unwrap_or("unknown"),
                    "Taking over stale session lock"
                );
                if reap(&self.lock_dir, holder.as_deref()) {
                    continue;
                }
            }
            if started.elapsed() >= self.lock_timeout {
                let _ = std::fs::remove_dir_all(&staging);
                return Err(HfwError::LockTimeout(self.lock_dir.clone()));
            }
            thread::sleep(LOCK_RETRY_DELAY);
        }
    }

    fn read(&self) -> Result<SharedSession> {
        let content = match fs::read_to_string(&self.data_path) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(SharedSession::default())
            }
            Err(err) => return Err(HfwError::io("Failed to read shared session", err)),
        };

        if content.trim().is_empty() {
            warn!(path = %self.data_path.display(), "Empty shared session file, starting fresh");
            return Ok(SharedSession::default());
        }

        match serde_json::from_str::<SharedSession>(&content) {
            Ok(session) if session.version == SHARED_SESSION_VERSION => Ok(session),
            Ok(session) => {
                warn!(
                    version = session.version,
                    expected = SHARED_SESSION_VERSION,
                    "Unsupported shared session version, starting fresh"
                );
                Ok(SharedSession::default())
            }
            Err(err) => {
                warn!(error = %err, "Corrupt shared session file, starting fresh");
                Ok(SharedSession::default())
            }
        }
    }

    fn write(&self, session: &SharedSession) -> Result<()> {
        let content = serde_json::to_string_pretty(session)
            .map_err(|err| HfwError::json("Failed to serialize shared session", err))?;

        let parent_dir = self.data_path.parent().ok_or_else(|| {
            HfwError::io(
                "Shared session path has no parent directory",
                std::io::Error::from(std::io::ErrorKind::InvalidInput),
            )
        })?;
        let mut temp_file = NamedTempFile::new_in(parent_dir)
            .map_err(|err| HfwError::io("Temp file error", err))?;
        temp_file
            .write_all(content.as_bytes())
            .map_err(|err| HfwError::io("Failed to write temp session file", err))?;
        temp_file
            .flush()
            .map_err(|err| HfwError::io("Failed to flush temp session file", err))?;
        temp_file
            .persist(&self.data_path)
            .map_err(|err| HfwError::io("Failed to commit shared session", err.error))?;
        Ok(())
    }
}

impl SharedStore for FileSharedStore {
    fn load(&self) -> Result<SharedSession> {
        self.read()
    }

    fn update(&self, apply: &mut dyn FnMut(&mut SharedSession)) -> Result<()> {
        let _guard = self.acquire()?;
        let mut session = self.read()?;
        let before = session.clone();
        apply(&mut session);

        if session == before {
            return Ok(());
        }
        if session.is_empty() {
            debug!(path = %self.data_path.display(), "Shared session emptied, removing file");
            return match fs::remove_file(&self.data_path) {
                Ok(()) => Ok(()),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(err) => Err(HfwError::io("Failed to remove shared session", err)),
            };
        }
        self.write(&session)
    }
}

struct LockGuard {
    lock_dir: PathBuf,
    token: String,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if read_owner(&self.lock_dir).as_deref() != Some(self.token.as_str()) {
            warn!(lock = %self.lock_dir.display(), "Session lock was taken over while held");
            return;
        }
        if !reap(&self.lock_dir, Some(&self.token)) {
            warn!(lock = %self.lock_dir.display(), "Failed to release session lock");
        }
    }
}

/// `{lock_dir}.{suffix}`, next to the lock.
fn sibling(lock_dir: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(lock_dir.as_os_str());
    name.push(".");
    name.push(suffix);
    PathBuf::from(name)
}

fn read_owner(lock_dir: &Path) -> Option<String> {
    std::fs::read_to_string(lock_dir.join(LOCK_OWNER_FILE))
        .ok()
        .map(|token| token.trim().to_string())
}

/// `Some(owner)` when the lock at `lock_dir` is older than `max_age`.
/// Ownerless locks are aged by the directory itself.
fn stale_holder(lock_dir: &Path, max_age: Duration) -> Option<Option<String>> {
    let owner = read_owner(lock_dir);
    let aged_path = match owner {
        Some(_) => lock_dir.join(LOCK_OWNER_FILE),
        None => lock_dir.to_path_buf(),
    };
    let age = std::fs::metadata(aged_path)
        .and_then(|meta| meta.modified())
        .ok()
        .and_then(|modified| SystemTime::now().duration_since(modified).ok())?;
    (age > max_age).then_some(owner)
}

/// Moves the lock aside and deletes it if it still belongs to `expected`.
/// A lock with any other owner is moved back. Returns true when deleted.
fn reap(lock_dir: &Path, expected: Option<&str>) -> bool {
    let moved = sibling(lock_dir, &format!("{}.reap", ulid::Ulid::new()));
    if std::fs::rename(lock_dir, &moved).is_err() {
        return false;
    }
    if read_owner(&moved).as_deref() == expected {
        if let Err(err) = std::fs::remove_dir_all(&moved) {
            warn!(error = %err, lock = %moved.display(), "Failed to delete reaped session lock");
        }
        return true;
    }
    if let Err(err) = std::fs::rename(&moved, lock_dir) {
        warn!(error = %err, lock = %lock_dir.display(), "Failed to restore live session lock");
        let _ = std::fs::remove_dir_all(&moved);
    }
    false
}
