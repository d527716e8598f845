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

//! # Canonical JSON & SHA-256
//!
//! Every hashed artifact in LatticeDB (receipts, config, the Merkle root
//! preimages) goes through one canonical byte encoding so that identical
//! logical content produces identical bytes on any platform:
//!
//! - object keys sorted lexicographically (UTF-8 byte order)
//! - no insignificant whitespace
//! - strict JSON string escaping
//! - numbers in the shortest round-tripping decimal form
//! - arrays preserve order
//!
//! Computed floating-point quantities (ΔH, residuals) never enter hashed
//! fields as raw JSON numbers. They are carried as [`CanonicalF64`], a
//! fixed-precision decimal string (17 significant digits), so that
//! cross-implementation equality of receipts is byte-exact.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// SHA-256 digest of raw bytes as a 32-byte array.
pub fn sha256_digest(bytes: &[u8]) -> [u8; 32] {
    let mut h = Sha256::new();
    h.update(bytes);
    h.finalize().into()
}

/// SHA-256 digest of raw bytes, lowercase hex (64 chars).
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(sha256_digest(bytes))
}

/// Canonical JSON encoding of a value.
///
/// The encoder is explicit rather than delegating to `serde_json::to_string`
/// so the canonical rules are visible in one place. Number formatting is
/// serde_json's shortest round-tripping decimal (ryu/itoa), which is
/// deterministic for any finite f64.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::with_capacity(256);
    write_canonical(&mut out, value);
    out
}

fn write_canonical(out: &mut String, value: &Value) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => out.push_str(&n.to_string()),
        Value::String(s) => {
            // serde_json's string serializer implements strict JSON escaping.
            out.push_str(&serde_json::to_string(s).expect("string serialization is infallible"));
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(out, item);
            }
            out.push(']');
        }
        Value::Object(map) => {
            // Sort keys by UTF-8 byte order regardless of the map's backing
            // store, so canonical output does not depend on build features.
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort_unstable();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::to_string(key).expect("string serialization is infallible"));
                out.push(':');
                write_canonical(out, &map[key]);
            }
            out.push('}');
        }
    }
}

/// SHA-256 over the canonical JSON of a value.
pub fn canonical_sha256_hex(value: &Value) -> String {
    sha256_hex(canonical_json(value).as_bytes())
}

/// State signature of a receipt-shaped value: SHA-256 over the canonical
/// JSON of the value with its own `state_sig` member removed.
pub fn state_sig_of(value: &Value) -> String {
    let mut v = value.clone();
    if let Value::Object(map) = &mut v {
        map.remove("state_sig");
    }
    canonical_sha256_hex(&v)
}

// =============================================================================
// Fixed-precision decimal floats
// =============================================================================

/// A computed f64 carried through receipts as a canonical decimal string.
///
/// Serialized as `{:.16e}` — one leading digit plus 16 fractional digits,
/// i.e. 17 significant digits, which round-trips any f64 exactly. Raw
/// IEEE-754 bits never appear in hash preimages.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct CanonicalF64(pub f64);

impl CanonicalF64 {
    /// The canonical decimal rendering used in hashed fields.
    pub fn render(&self) -> String {
        format!("{:.16e}", self.0)
    }

    pub fn value(&self) -> f64 {
        self.0
    }
}

impl From<f64> for CanonicalF64 {
    fn from(x: f64) -> Self {
        Self(x)
    }
}

impl Serialize for CanonicalF64 {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.render())
    }
}

impl<'de> Deserialize<'de> for CanonicalF64 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        // Accept the canonical string form; tolerate plain numbers so that
        // receipts produced by older encoders remain readable.
        let v = Value::deserialize(deserializer)?;
        match v {
            Value::String(s) => s
                .parse::<f64>()
                .map(CanonicalF64)
                .map_err(|e| serde::de::Error::custom(format!("bad canonical decimal: {e}"))),
            Value::Number(n) => n
                .as_f64()
                .map(CanonicalF64)
                .ok_or_else(|| serde::de::Error::custom("non-finite number")),
            other => Err(serde::de::Error::custom(format!(
                "expected decimal string, got {other}"
            ))),
        }
    }
}
