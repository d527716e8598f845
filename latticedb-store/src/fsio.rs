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

//! Durable file primitives.
//!
//! Readers are lock-free and must only ever observe sealed state, so every
//! mutation goes through temp-file + fsync + atomic rename, followed by an
//! fsync of the parent directory. Append-only logs (the ingest WAL, the
//! dedup map) are the one exception: they append a line and fsync; readers
//! tolerate a torn final line after a crash.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;

use latticedb_core::error::{LatticeError, Result};

/// Fsync a directory so a just-renamed entry survives power loss.
pub fn sync_dir(dir: &Path) -> Result<()> {
    File::open(dir)?.sync_all()?;
    Ok(())
}

/// Write bytes durably: temp file in the target's directory, fsync,
/// rename over the target, fsync the directory.
pub fn atomic_write_bytes(path: &Path, data: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| LatticeError::InvalidInput(format!("path has no parent: {}", path.display())))?;
    fs::create_dir_all(parent)?;
    let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
    tmp.write_all(data)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path)
        .map_err(|e| LatticeError::Io(e.error))?;
    sync_dir(parent)
}

/// Serialize a value as canonical JSON and write it durably.
pub fn atomic_write_canonical_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let v = serde_json::to_value(value)
        .map_err(|e| LatticeError::Integrity(format!("{}: serialization: {e}", path.display())))?;
    atomic_write_bytes(path, latticedb_core::canonical::canonical_json(&v).as_bytes())
}

/// Read and parse a canonical-JSON artifact.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let bytes = fs::read(path)?;
    serde_json::from_slice(&bytes)
        .map_err(|e| LatticeError::Integrity(format!("{}: {e}", path.display())))
}

/// Read a JSON artifact as an untyped value.
pub fn read_json_value(path: &Path) -> Result<serde_json::Value> {
    read_json(path)
}

/// Append one JSON line to a log and fsync it.
pub fn append_jsonl<T: Serialize>(path: &Path, record: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut line = serde_json::to_string(record)
        .map_err(|e| LatticeError::Integrity(format!("{}: serialization: {e}", path.display())))?;
    line.push('\n');
    let mut f = OpenOptions::new().create(true).append(true).open(path)?;
    f.write_all(line.as_bytes())?;
    f.sync_all()?;
    Ok(())
}

/// Read all records of a JSONL file. A missing file reads as empty.
///
/// A parse failure on the final line is a torn append from a crash and is
/// skipped with a warning; a failure anywhere else is an integrity error.
pub fn read_jsonl<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let lines: Vec<String> = BufReader::new(File::open(path)?)
        .lines()
        .collect::<std::io::Result<_>>()?;
    let last_nonempty = lines.iter().rposition(|l| !l.trim().is_empty());
    let mut out = Vec::with_capacity(lines.len());
    for (idx, line) in lines.iter().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str(line) {
            Ok(rec) => out.push(rec),
            Err(e) if Some(idx) == last_nonempty => {
                warn!(path = %path.display(), line = idx + 1, "skipping torn final line: {e}");
            }
            Err(e) => {
                return Err(LatticeError::Integrity(format!(
                    "{}: line {}: {e}",
                    path.display(),
                    idx + 1
                )))
            }
        }
    }
    Ok(out)
}

/// Rewrite a JSONL file durably from a full record set.
pub fn atomic_write_jsonl<T: Serialize>(path: &Path, records: &[T]) -> Result<()> {
    let mut buf = Vec::new();
    for rec in records {
        serde_json::to_writer(&mut buf, rec)
            .map_err(|e| LatticeError::Integrity(format!("{}: serialization: {e}", path.display())))?;
        buf.push(b'\n');
    }
    atomic_write_bytes(path, &buf)
}

// =============================================================================
// Raw f32 blocks
// =============================================================================

/// Encode a flat f32 buffer as little-endian bytes (`*.f32` layout).
pub fn encode_f32(values: &[f32]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(values.len() * 4);
    for v in values {
        buf.extend_from_slice(&v.to_le_bytes());
    }
    buf
}

/// Decode a little-endian `*.f32` buffer.
pub fn decode_f32(bytes: &[u8]) -> Result<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return Err(LatticeError::Integrity(format!(
            "f32 buffer of {} bytes is not 4-aligned",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

/// Read a whole `*.f32` file.
pub fn read_f32_file(path: &Path) -> Result<Vec<f32>> {
    decode_f32(&fs::read(path)?)
}
