// SPDX-License-Identifier: AGPL-3.0-or-later
// LatticeDB - Verifiable Retrieval Database
// Copyright (C) 2026 Sushanth Reddy Vanagala (https://github.com/sushanthpy)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Single-writer discipline per database root.
//!
//! An OS-level exclusive advisory lock on `<root>/.writer.lock`. Concurrent
//! builds serialize here; manifest append order equals lock-acquire order.
//! Readers never take the lock.

use std::fs::{self, OpenOptions};
use std::path::Path;
use std::time::Duration;

use fs2::FileExt;
use tracing::debug;

use latticedb_core::deadline::Deadline;
use latticedb_core::error::{LatticeError, Result};

/// How long to wait for a contended writer lock when the caller set no
/// deadline.
const DEFAULT_LOCK_WAIT: Duration = Duration::from_secs(5);

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Held for the duration of one seal (build → manifest → router → db
/// receipt). Released on drop.
#[derive(Debug)]
pub struct WriterLock {
    file: fs::File,
}

impl WriterLock {
    /// Acquire the exclusive writer lock, polling until the deadline (or a
    /// default wait) elapses. Contention timeout surfaces as `Busy`.
    pub fn acquire(lock_path: &Path, deadline: Deadline) -> Result<Self> {
        if let Some(parent) = lock_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(lock_path)?;

        let fallback = Deadline::within(DEFAULT_LOCK_WAIT);
        loop {
            match file.try_lock_exclusive() {
                Ok(()) => {
                    debug!(path = %lock_path.display(), "writer lock acquired");
                    return Ok(Self { file });
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    deadline.check()?;
                    if fallback.is_expired() {
                        return Err(LatticeError::Busy(format!(
                            "writer lock contended: {}",
                            lock_path.display()
                        )));
                    }
                    std::thread::sleep(POLL_INTERVAL);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

impl Drop for WriterLock {
    fn drop(&mut self) {
        let _ = fs2::FileExt::unlock(&self.file);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_and_reacquire_after_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".writer.lock");
        let lock = WriterLock::acquire(&path, Deadline::none()).unwrap();
        drop(lock);
        let _again = WriterLock::acquire(&path, Deadline::none()).unwrap();
    }

    #[test]
    fn expired_deadline_fails_fast_on_contention() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".writer.lock");
        let _held = WriterLock::acquire(&path, Deadline::none()).unwrap();

        // Same-process relocking through a second handle: fs2 advisory
        // locks conflict between handles on all supported platforms.
        let expired = Deadline::at(std::time::Instant::now() - Duration::from_millis(1));
        let err = WriterLock::acquire(&path, expired).unwrap_err();
        assert!(matches!(
            err,
            LatticeError::DeadlineExceeded | LatticeError::Busy(_)
        ));
    }
}
