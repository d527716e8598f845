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

//! Error taxonomy for the LatticeDB core and store.
//!
//! Every failure mode is enumerated and returned as a value; panics are
//! reserved for programmer errors (violated preconditions). The writer path
//! performs compensating cleanup (temp-dir removal) before surfacing an
//! error; nothing here is ever swallowed.

use std::io;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, LatticeError>;

/// The complete failure surface of LatticeDB operations.
#[derive(Debug, thiserror::Error)]
pub enum LatticeError {
    /// A referenced entity (lattice, group, manifest row) does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Malformed caller input: bad vectors, bad paging, empty chunk set.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A supplied vector's dimension disagrees with the configured space.
    #[error("embedding dim mismatch: expected {expected}, got {got}")]
    EmbedDimMismatch { expected: usize, got: usize },

    /// A CG intermediate became NaN/Inf; the build or compose is aborted
    /// and no receipt is emitted.
    #[error("non-finite value in CG solve (coordinate {coordinate})")]
    CgNonFinite { coordinate: usize },

    /// The bounded in-flight query counter is saturated, or the writer
    /// lock could not be acquired in time.
    #[error("busy: {0}")]
    Busy(String),

    /// Strict-claims mode is on and the caller supplied no ACL claims.
    #[error("acl denied: claims required but absent")]
    AclDenyMissingClaims,

    /// The operation's deadline expired; any in-flight iterate was
    /// discarded and no receipt was emitted.
    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// Underlying filesystem failure.
    #[error("io: {0}")]
    Io(#[from] io::Error),

    /// A hash, Merkle root, schema version, or artifact consistency check
    /// failed. Never auto-healed; writes are blocked until resolved.
    #[error("integrity: {0}")]
    Integrity(String),
}

impl LatticeError {
    /// Stable reason code for transport layers and logs.
    pub fn code(&self) -> &'static str {
        match self {
            LatticeError::NotFound(_) => "not_found",
            LatticeError::InvalidInput(_) => "invalid_input",
            LatticeError::EmbedDimMismatch { .. } => "embed_dim_mismatch",
            LatticeError::CgNonFinite { .. } => "cg_non_finite",
            LatticeError::Busy(_) => "busy",
            LatticeError::AclDenyMissingClaims => "acl_deny_missing_claims",
            LatticeError::DeadlineExceeded => "deadline_exceeded",
            LatticeError::Io(_) => "io",
            LatticeError::Integrity(_) => "integrity",
        }
    }
}
