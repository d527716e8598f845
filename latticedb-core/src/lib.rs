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

//! # latticedb-core
//!
//! The deterministic kernel of LatticeDB, a local-first verifiable
//! retrieval database. This crate has no filesystem access; it provides:
//!
//! - canonical JSON + SHA-256 + Merkle attestation ([`canonical`],
//!   [`merkle`])
//! - the embedding space adapter and vector block type ([`embed`])
//! - mutual-kNN graph construction with canonical serialization
//!   ([`graph`])
//! - the SPD assembler, Jacobi-preconditioned CG solver, and energy
//!   accounting shared by ingest and compose ([`solver`])
//! - normalized configuration and the receipt types ([`config`],
//!   [`receipts`])
//!
//! Everything here is bit-deterministic: the same inputs produce the same
//! edges, the same U*, and the same receipt bytes on any platform.

pub mod canonical;
pub mod config;
pub mod deadline;
pub mod embed;
pub mod error;
pub mod graph;
pub mod merkle;
pub mod receipts;
pub mod solver;

pub use canonical::CanonicalF64;
pub use config::LatticeConfig;
pub use deadline::Deadline;
pub use embed::{EmbeddingSpace, StubEmbedder, VectorBlock};
pub use error::{LatticeError, Result};
pub use receipts::{CompositeReceipt, DbReceipt, LatticeReceipt};
pub use solver::{settle, Lambdas, SettleOutcome, SettleParams};
