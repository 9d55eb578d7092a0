//! Pid-file locking in place of full daemonization.
//!
//! Full double-fork daemonization isn't implemented here; what this module
//! provides instead, so two instances never run against the same working
//! directory, is an advisory exclusive lock on the pid file, held for the
//! process lifetime.

use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum PidFileError {
    #[error("failed to open pid file {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("pid file {path} is locked by another running instance")]
    AlreadyLocked { path: String },
    #[error("failed to write pid file {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Holds the advisory lock on the pid file for as long as it's alive;
/// dropping it releases the lock.
pub struct PidFileGuard {
    #[cfg_attr(not(unix), allow(dead_code))]
    file: std::fs::File,
}

#[cfg(unix)]
pub fn acquire(path: &Path) -> Result<PidFileGuard, PidFileError> {
    use fs2::FileExt;
    use std::io::Write as _;

    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .write(true)
        .open(path)
        .map_err(|source| PidFileError::Open {
            path: path.display().to_string(),
            source,
        })?;

    file.try_lock_exclusive().map_err(|_| PidFileError::AlreadyLocked {
        path: path.display().to_string(),
    })?;

    file.set_len(0).map_err(|source| PidFileError::Write {
        path: path.display().to_string(),
        source,
    })?;
    writeln!(file, "{}", std::process::id()).map_err(|source| PidFileError::Write {
        path: path.display().to_string(),
        source,
    })?;

    Ok(PidFileGuard { file })
}

#[cfg(not(unix))]
pub fn acquire(path: &Path) -> Result<PidFileGuard, PidFileError> {
    let file = std::fs::OpenOptions::new()
        .create(true)
        .write(true)
        .open(path)
        .map_err(|source| PidFileError::Open {
            path: path.display().to_string(),
            source,
        })?;
    Ok(PidFileGuard { file })
}
