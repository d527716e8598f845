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

//! # latticedb-store
//!
//! Everything in LatticeDB that owns disk or concurrency: the append-only
//! store layout and durable file primitives, the single-writer lock, the
//! manifest, the memory-mapped centroid router with ACL gating, the
//! lattice builder and composite settler, the verification protocol, the
//! readiness probe, and the [`LatticeDb`] facade tying them together.
//!
//! The deterministic numerics live in `latticedb-core`; this crate only
//! sequences them against sealed state.

pub mod acl;
pub mod builder;
pub mod compose;
pub mod db;
pub mod fsio;
pub mod layout;
pub mod lock;
pub mod manifest;
pub mod readiness;
pub mod router;
pub mod verify;

pub use acl::{AclBinding, AclClaims};
pub use builder::{ChunkInput, SourceMeta};
pub use compose::{Abstention, ComposeOptions, ComposeOutcome, ContextItem, ContextPack};
pub use db::{DbOptions, IngestRequest, LatticeDb};
pub use layout::DbLayout;
pub use manifest::{ManifestFilter, ManifestRow, ManifestSort, ManifestSortKey, Page};
pub use readiness::ReadinessReport;
pub use router::{RouteHit, Router};
pub use verify::Verification;
