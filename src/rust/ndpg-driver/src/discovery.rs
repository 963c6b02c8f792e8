// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

//! Cross-process lock around device discovery.
//!
//! Scanning serial ports opens every candidate device, which collides with a
//! second process doing the same. The lock is an advisory lock on a shared
//! file; it only covers discovery and is released once a link is open. The
//! operating system drops the lock of a process that dies, and the file itself
//! is never removed.
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use fs4::fs_std::FileExt;
use ndpg_log::{debug, warn};

use crate::{Error, Result};

const RETRY_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug)]
pub struct DiscoveryLock {
    path: PathBuf,
    file: File,
}

impl DiscoveryLock {
    /// Acquire the lock, waiting at most `timeout`.
    pub fn acquire(path: &Path, timeout: Duration) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        let deadline = Instant::now() + timeout;
        while !FileExt::try_lock_exclusive(&file)? {
            if Instant::now() >= deadline {
                return Err(Error::Lock {
                    path: path.to_path_buf(),
                    timeout,
                });
            }
            thread::sleep(RETRY_INTERVAL);
        }
        // Owner pid, for whoever inspects the file.
        file.set_len(0)?;
        write!(&file, "{}", std::process::id())?;
        debug!("Acquired discovery lock {}", path.display());
        Ok(DiscoveryLock {
            path: path.to_path_buf(),
            file,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for DiscoveryLock {
    fn drop(&mut self) {
        if let Err(err) = FileExt::unlock(&self.file) {
            warn!(
                "Failed to release discovery lock {}: {}",
                self.path.display(),
                err
            );
        }
    }
}
