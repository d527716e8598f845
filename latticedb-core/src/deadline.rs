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

//! Operation deadlines.
//!
//! Every public operation accepts a [`Deadline`]. Expiry is observed at
//! CG iteration boundaries and before I/O steps; on expiry the in-flight
//! iterate is discarded and no receipt is emitted.

use std::time::{Duration, Instant};

use crate::error::{LatticeError, Result};

/// An absolute point in time after which an operation must stop.
#[derive(Debug, Clone, Copy, Default)]
pub struct Deadline(Option<Instant>);

impl Deadline {
    /// No deadline; the operation runs to completion.
    pub fn none() -> Self {
        Self(None)
    }

    /// Deadline `budget` from now.
    pub fn within(budget: Duration) -> Self {
        Self(Some(Instant::now() + budget))
    }

    /// Deadline at an absolute instant.
    pub fn at(instant: Instant) -> Self {
        Self(Some(instant))
    }

    pub fn is_expired(&self) -> bool {
        matches!(self.0, Some(t) if Instant::now() >= t)
    }

    /// Fail with `DeadlineExceeded` if expired.
    pub fn check(&self) -> Result<()> {
        if self.is_expired() {
            Err(LatticeError::DeadlineExceeded)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn none_never_expires() {
        assert!(!Deadline::none().is_expired());
        assert!(Deadline::none().check().is_ok());
    }

    #[test]
    fn past_deadline_expires() {
        let d = Deadline::at(Instant::now() - Duration::from_millis(1));
        assert!(d.is_expired());
        assert!(matches!(d.check(), Err(LatticeError::DeadlineExceeded)));
    }

    #[test]
    fn generous_deadline_passes() {
        let d = Deadline::within(Duration::from_secs(3600));
        assert!(d.check().is_ok());
    }
}
