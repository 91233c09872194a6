// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Session directories.
//
// Every run works in its own `scanwerk-XXXX` directory under the scratch
// root and holds an exclusive lock on the `lockfile` inside it. A directory
// whose lock can be taken belongs to no running process: it is left over
// from a crash.

use std::fs::{File, TryLockError};
use std::path::{Path, PathBuf};

use scanwerk_core::error::{Result, ScanwerkError};
use tracing::{debug, info, instrument, warn};

const PREFIX: &str = "scanwerk-";
const LOCKFILE: &str = "lockfile";
pub const SESSION_DB: &str = "session.db";

/// The scratch directory of the running session.
#[derive(Debug)]
pub struct Session {
    // Declared first so the lock is released before the directory goes.
    lock: File,
    dir: PathBuf,
    remove_on_drop: bool,
}

impl Session {
    /// Create a fresh session directory under `root`.
    #[instrument(skip_all, fields(root = %root.as_ref().display()))]
    pub fn create(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        std::fs::create_dir_all(root).map_err(|err| ScanwerkError::scratch(root, err))?;
        let dir = tempfile::Builder::new()
            .prefix(PREFIX)
            .rand_bytes(4)
            .tempdir_in(root)
            .map_err(|err| ScanwerkError::scratch(root, err))?
            .keep();
        let lock = acquire(&dir)?;
        info!(dir = %dir.display(), "using session directory");
        Ok(Self {
            lock,
            dir,
            remove_on_drop: true,
        })
    }

    /// Take over a crashed session's directory.
    #[instrument(skip_all, fields(dir = %dir.as_ref().display()))]
    pub fn restore(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        if !dir.is_dir() {
            return Err(ScanwerkError::Session(format!("{} is not a directory", dir.display())));
        }
        let lock = acquire(&dir)?;
        info!("restored session directory");
        Ok(Self {
            lock,
            dir,
            remove_on_drop: true,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn db_path(&self) -> PathBuf {
        self.dir.join(SESSION_DB)
    }

    /// Leave the directory behind when the session ends.
    pub fn keep(&mut self) {
        self.remove_on_drop = false;
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Err(err) = self.lock.unlock() {
            debug!(error = %err, "unable to release session lock");
        }
        if self.remove_on_drop {
            match std::fs::remove_dir_all(&self.dir) {
                Ok(()) => debug!(dir = %self.dir.display(), "removed session directory"),
                Err(err) => warn!(dir = %self.dir.display(), error = %err, "unable to remove session directory"),
            }
        }
    }
}

/// Lock `dir`'s lockfile, failing if another process holds it.
fn acquire(dir: &Path) -> Result<File> {
    let path = dir.join(LOCKFILE);
    let file = File::create(&path).map_err(|err| ScanwerkError::scratch(&path, err))?;
    match file.try_lock() {
        Ok(()) => Ok(file),
        Err(TryLockError::WouldBlock) => Err(ScanwerkError::Session(format!(
            "{} is in use by another process",
            dir.display()
        ))),
        Err(TryLockError::Error(err)) => Err(ScanwerkError::scratch(&path, err)),
    }
}

/// A session directory no running process owns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrashedSession {
    pub dir: PathBuf,
    /// Whether it holds a session database to reload pages from.
    pub restorable: bool,
}

fn is_session_name(name: &str) -> bool {
    name.strip_prefix(PREFIX)
        .is_some_and(|rest| rest.chars().count() == 4)
}

/// Session directories under `root` whose lock is free.
#[instrument(skip_all, fields(root = %root.as_ref().display()))]
pub fn crashed_sessions(root: impl AsRef<Path>) -> Result<Vec<CrashedSession>> {
    let root = root.as_ref();
    if !root.is_dir() {
        return Ok(Vec::new());
    }
    let mut crashed = Vec::new();
    for entry in std::fs::read_dir(root)? {
        let entry = entry?;
        let dir = entry.path();
        let named = entry.file_name().to_str().is_some_and(is_session_name);
        if !named || !dir.is_dir() {
            continue;
        }
        let Ok(lock) = File::options().write(true).open(dir.join(LOCKFILE)) else {
            continue;
        };
        match lock.try_lock() {
            Ok(()) => {
                let restorable = dir.join(SESSION_DB).is_file();
                debug!(dir = %dir.display(), restorable, "found crashed session");
                crashed.push(CrashedSession { dir, restorable });
            }
            Err(TryLockError::WouldBlock) => debug!(dir = %dir.display(), "session is live"),
            Err(TryLockError::Error(err)) => warn!(dir = %dir.display(), error = %err, "unable to probe session lock"),
        }
    }
    crashed.sort_by(|a, b| a.dir.cmp(&b.dir));
    info!(count = crashed.len(), "checked for crashed sessions");
    Ok(crashed)
}

/// Remove a crashed session's directory.
pub fn delete_session(session: &CrashedSession) -> Result<()> {
    std::fs::remove_dir_all(&session.dir).map_err(|err| ScanwerkError::scratch(&session.dir, err))?;
    info!(dir = %session.dir.display(), "deleted crashed session");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake_crash(root: &Path, name: &str, with_db: bool) -> PathBuf {
        let dir = root.join(name);
        std::fs::create_dir(&dir).unwrap();
        std::fs::write(dir.join(LOCKFILE), b"").unwrap();
        if with_db {
            std::fs::write(dir.join(SESSION_DB), b"").unwrap();
        }
        dir
    }

    #[test]
    fn session_directory_is_removed_on_drop() {
        let root = tempfile::tempdir().unwrap();
        let session = Session::create(root.path()).unwrap();
        let dir = session.dir().to_path_buf();
        assert!(dir.join(LOCKFILE).is_file());
        assert!(is_session_name(&dir.file_name().unwrap().to_string_lossy()));
        drop(session);
        assert!(!dir.exists());
    }

    #[test]
    fn live_sessions_are_not_crashed() {
        let root = tempfile::tempdir().unwrap();
        let _live = Session::create(root.path()).unwrap();
        let crashed_dir = fake_crash(root.path(), "scanwerk-dead", true);
        let unrestorable = fake_crash(root.path(), "scanwerk-gone", false);
        fake_crash(root.path(), "unrelated", true);

        let crashed = crashed_sessions(root.path()).unwrap();
        assert_eq!(
            crashed,
            vec![
                CrashedSession {
                    dir: crashed_dir,
                    restorable: true
                },
                CrashedSession {
                    dir: unrestorable,
                    restorable: false
                },
            ]
        );
    }

    #[test]
    fn restoring_locks_the_directory() {
        let root = tempfile::tempdir().unwrap();
        let dir = fake_crash(root.path(), "scanwerk-dead", true);
        let mut session = Session::restore(&dir).unwrap();
        session.keep();
        assert!(crashed_sessions(root.path()).unwrap().is_empty());
        assert!(Session::restore(&dir).is_err());
        drop(session);
        assert!(dir.exists());
    }

    #[test]
    fn crashed_sessions_can_be_deleted() {
        let root = tempfile::tempdir().unwrap();
        let dir = fake_crash(root.path(), "scanwerk-dead", false);
        let crashed = crashed_sessions(root.path()).unwrap();
        delete_session(&crashed[0]).unwrap();
        assert!(!dir.exists());
    }
}
