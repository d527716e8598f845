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

//! # SPD Assembler & Conjugate-Gradient Solver
//!
//! The settling core shared by per-lattice builds and composite queries.
//! Given embeddings X, edge set E, pin target q and pin mask b, it solves
//!
//! ```text
//! M x = r,   M = λG·I + λC·L + λQ·diag(b),
//!            r_j = λG·X[:,j] + λQ·b·q[j]
//! ```
//!
//! per output coordinate with Jacobi-preconditioned CG, warm-started from
//! X's own column. M is symmetric positive definite for λG, λC, λQ > 0, and
//! the Laplacian is applied implicitly from the sorted edge list — it is
//! never materialized.
//!
//! ## Determinism
//!
//! All arithmetic is f64 in strictly ascending index order within a
//! coordinate solve. Columns are independent, so the solve parallelizes
//! across coordinates (rayon); the only cross-coordinate reductions are an
//! integer sum (`cg_iters`) and a float max (`final_residual`), both
//! order-independent. Identical inputs produce bit-identical U*.
//!
//! ## Energy
//!
//! `H(Y) = 0.5·[λG‖Y−X‖_F² + λC·Σ_E‖y_i−y_j‖² + λQ·Σ b_i‖y_i−q‖²]`,
//! reported as `ΔH = max(0, H(X) − H(U*))`.

use rayon::prelude::*;
use tracing::warn;

use crate::deadline::Deadline;
use crate::embed::VectorBlock;
use crate::error::{LatticeError, Result};
use crate::graph::{degrees, Edge};

/// The three SPD regularizers. All must be positive.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Lambdas {
    pub g: f64,
    pub c: f64,
    pub q: f64,
}

impl Lambdas {
    pub fn validate(&self) -> Result<()> {
        if self.g > 0.0 && self.c > 0.0 && self.q > 0.0 {
            Ok(())
        } else {
            Err(LatticeError::InvalidInput(format!(
                "lambdas must be positive: g={}, c={}, q={}",
                self.g, self.c, self.q
            )))
        }
    }
}

/// Solver controls: relative tolerance and the iteration cap.
#[derive(Debug, Clone, Copy)]
pub struct SettleParams {
    pub lambdas: Lambdas,
    pub tol: f64,
    pub max_iter: u32,
}

/// Result of a settle: solved positions plus the receipt-bound statistics.
#[derive(Debug, Clone)]
pub struct SettleOutcome {
    /// U* — solved positions, same shape as the input block.
    pub ustar: VectorBlock,
    /// Energy drop `max(0, H(X) − H(U*))`.
    pub delta_h: f64,
    /// Sum of CG iterations across output coordinates.
    pub cg_iters: u64,
    /// Max final residual norm across output coordinates.
    pub final_residual: f64,
    /// False iff some coordinate stopped at `max_iter` above tolerance.
    /// A soft outcome: the last iterate is still returned and recorded.
    pub converged: bool,
}

struct Topology {
    adjacency: Vec<Vec<u32>>,
    degree: Vec<u32>,
}

fn topology(n: usize, edges: &[Edge]) -> Topology {
    let mut adjacency = vec![Vec::new(); n];
    for &(i, j) in edges {
        adjacency[i as usize].push(j);
        adjacency[j as usize].push(i);
    }
    for list in adjacency.iter_mut() {
        list.sort_unstable();
    }
    Topology {
        adjacency,
        degree: degrees(n, edges),
    }
}

/// Settle a block against the pin target.
///
/// `pin_target` has length `dim`; `pin_mask` has length `n`. The deadline
/// is observed at CG iteration boundaries; on expiry the iterate is
/// discarded and `DeadlineExceeded` is returned.
pub fn settle(
    x: &VectorBlock,
    edges: &[Edge],
    pin_target: &[f32],
    pin_mask: &[bool],
    params: &SettleParams,
    deadline: Deadline,
) -> Result<SettleOutcome> {
    params.lambdas.validate()?;
    let n = x.n();
    let dim = x.dim();
    if pin_target.len() != dim {
        return Err(LatticeError::InvalidInput(format!(
            "pin target has dim {}, block has dim {}",
            pin_target.len(),
            dim
        )));
    }
    if pin_mask.len() != n {
        return Err(LatticeError::InvalidInput(format!(
            "pin mask has {} entries for {} rows",
            pin_mask.len(),
            n
        )));
    }
    if params.tol <= 0.0 || !params.tol.is_finite() {
        return Err(LatticeError::InvalidInput(format!(
            "tol must be a positive finite value, got {}",
            params.tol
        )));
    }

    let topo = topology(n, edges);
    let lam = params.lambdas;

    // Jacobi preconditioner: the diagonal of M.
    let diag: Vec<f64> = (0..n)
        .map(|i| lam.g + lam.c * topo.degree[i] as f64 + if pin_mask[i] { lam.q } else { 0.0 })
        .collect();

    // Columns are independent; solve them in parallel and reassemble in
    // index order so the output does not depend on scheduling.
    let columns: Result<Vec<Column>> = (0..dim)
        .into_par_iter()
        .map(|j| solve_column(j, x, &topo, pin_target, pin_mask, &diag, params, deadline))
        .collect();
    let columns = columns?;

    let mut cg_iters: u64 = 0;
    let mut final_residual: f64 = 0.0;
    let mut converged = true;
    let mut flat = vec![0.0f32; n * dim];
    for col in &columns {
        cg_iters += col.iters as u64;
        final_residual = final_residual.max(col.residual);
        converged &= col.converged;
        for i in 0..n {
            flat[i * dim + col.j] = col.values[i] as f32;
        }
    }
    if !converged {
        warn!(
            cg_iters,
            final_residual, "CG stopped at max_iter above tolerance; recording last iterate"
        );
    }

    let ustar = VectorBlock::from_flat(flat, dim)?;
    let h_x = energy(x, x, edges, pin_target, pin_mask, lam);
    let h_u = energy(&ustar, x, edges, pin_target, pin_mask, lam);
    let delta_h = (h_x - h_u).max(0.0);

    Ok(SettleOutcome {
        ustar,
        delta_h,
        cg_iters,
        final_residual,
        converged,
    })
}

struct Column {
    j: usize,
    values: Vec<f64>,
    iters: u32,
    residual: f64,
    converged: bool,
}

/// Apply `M v` for one column vector, in ascending index order.
fn apply_m(
    v: &[f64],
    topo: &Topology,
    pin_mask: &[bool],
    lam: Lambdas,
    out: &mut [f64],
) {
    for i in 0..v.len() {
        let mut neighbor_sum = 0.0;
        for &jn in &topo.adjacency[i] {
            neighbor_sum += v[jn as usize];
        }
        let laplacian = topo.degree[i] as f64 * v[i] - neighbor_sum;
        let pin = if pin_mask[i] { v[i] } else { 0.0 };
        out[i] = lam.g * v[i] + lam.c * laplacian + lam.q * pin;
    }
}

fn norm2(v: &[f64]) -> f64 {
    v.iter().map(|x| x * x).sum::<f64>().sqrt()
}

#[allow(clippy::too_many_arguments)]
fn solve_column(
    j: usize,
    x: &VectorBlock,
    topo: &Topology,
    pin_target: &[f32],
    pin_mask: &[bool],
    diag: &[f64],
    params: &SettleParams,
    deadline: Deadline,
) -> Result<Column> {
    let n = x.n();
    let lam = params.lambdas;
    let qj = pin_target[j] as f64;

    let mut sol: Vec<f64> = (0..n).map(|i| x.row(i)[j] as f64).collect();
    let rhs: Vec<f64> = (0..n)
        .map(|i| lam.g * sol[i] + if pin_mask[i] { lam.q * qj } else { 0.0 })
        .collect();
    let threshold = params.tol * norm2(&rhs).max(1.0);

    // Warm start: residual of X's own column.
    let mut mv = vec![0.0f64; n];
    apply_m(&sol, topo, pin_mask, lam, &mut mv);
    let mut res: Vec<f64> = (0..n).map(|i| rhs[i] - mv[i]).collect();
    let mut res_norm = norm2(&res);
    if !res_norm.is_finite() {
        return Err(LatticeError::CgNonFinite { coordinate: j });
    }

    let mut z: Vec<f64> = (0..n).map(|i| res[i] / diag[i]).collect();
    let mut p = z.clone();
    let mut rz: f64 = res.iter().zip(&z).map(|(a, b)| a * b).sum();

    let mut iters = 0u32;
    while res_norm > threshold && iters < params.max_iter {
        deadline.check()?;

        apply_m(&p, topo, pin_mask, lam, &mut mv);
        let p_mp: f64 = p.iter().zip(&mv).map(|(a, b)| a * b).sum();
        let alpha = rz / p_mp;
        if !alpha.is_finite() {
            return Err(LatticeError::CgNonFinite { coordinate: j });
        }
        for i in 0..n {
            sol[i] += alpha * p[i];
            res[i] -= alpha * mv[i];
        }
        for i in 0..n {
            z[i] = res[i] / diag[i];
        }
        let rz_next: f64 = res.iter().zip(&z).map(|(a, b)| a * b).sum();
        let beta = rz_next / rz;
        if !beta.is_finite() {
            return Err(LatticeError::CgNonFinite { coordinate: j });
        }
        for i in 0..n {
            p[i] = z[i] + beta * p[i];
        }
        rz = rz_next;
        res_norm = norm2(&res);
        if !res_norm.is_finite() {
            return Err(LatticeError::CgNonFinite { coordinate: j });
        }
        iters += 1;
    }

    Ok(Column {
        j,
        values: sol,
        iters,
        residual: res_norm,
        converged: res_norm <= threshold,
    })
}

/// Quadratic energy of positions `y` against anchors `x`.
pub fn energy(
    y: &VectorBlock,
    x: &VectorBlock,
    edges: &[Edge],
    pin_target: &[f32],
    pin_mask: &[bool],
    lam: Lambdas,
) -> f64 {
    let n = y.n();
    let mut anchor = 0.0f64;
    for i in 0..n {
        for (a, b) in y.row(i).iter().zip(x.row(i)) {
            let d = *a as f64 - *b as f64;
            anchor += d * d;
        }
    }
    let mut smooth = 0.0f64;
    for &(i, j) in edges {
        for (a, b) in y.row(i as usize).iter().zip(y.row(j as usize)) {
            let d = *a as f64 - *b as f64;
            smooth += d * d;
        }
    }
    let mut pin = 0.0f64;
    for i in 0..n {
        if pin_mask[i] {
            for (a, q) in y.row(i).iter().zip(pin_target) {
                let d = *a as f64 - *q as f64;
                pin += d * d;
            }
        }
    }
    0.5 * (lam.g * anchor + lam.c * smooth + lam.q * pin)
}

/// Per-row pin-energy contribution drop between anchor and solved
/// positions: `0.5·λQ·max(0, ‖x_i−q‖² − ‖u_i−q‖²)` for pinned rows,
/// 0 for unpinned. Used by the composite settler's coherence floor.
pub fn pin_contributions(
    ustar: &VectorBlock,
    x: &VectorBlock,
    pin_target: &[f32],
    pin_mask: &[bool],
    lambda_q: f64,
) -> Vec<f64> {
    (0..x.n())
        .map(|i| {
            if !pin_mask[i] {
                return 0.0;
            }
            let before: f64 = x
                .row(i)
                .iter()
                .zip(pin_target)
                .map(|(a, q)| {
                    let d = *a as f64 - *q as f64;
                    d * d
                })
                .sum();
            let after: f64 = ustar
                .row(i)
                .iter()
                .zip(pin_target)
                .map(|(a, q)| {
                    let d = *a as f64 - *q as f64;
                    d * d
                })
                .sum();
            0.5 * lambda_q * (before - after).max(0.0)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embed::{StubEmbedder, VectorBlock};
    use crate::graph::mutual_knn;

    fn params() -> SettleParams {
        SettleParams {
            lambdas: Lambdas { g: 1.0, c: 0.5, q: 4.0 },
            tol: 1e-6,
            max_iter: 256,
        }
    }

    fn settle_block(texts: &[&str], dim: usize, k: usize) -> (VectorBlock, SettleOutcome) {
        let block = StubEmbedder::new(dim).embed(texts).unwrap();
        let edges = mutual_knn(&block, k);
        let q = block.normalized_centroid();
        let mask = vec![true; block.n()];
        let out = settle(&block, &edges, &q, &mask, &params(), Deadline::none()).unwrap();
        (block, out)
    }

    #[test]
    fn residual_meets_bound_or_max_iter() {
        let (block, out) = settle_block(&["a", "b", "c", "d", "e", "f"], 4, 2);
        assert!(out.converged || out.cg_iters >= 256);
        assert!(out.delta_h >= 0.0);
        assert_eq!(out.ustar.n(), block.n());
        assert_eq!(out.ustar.dim(), block.dim());
    }

    #[test]
    fn single_row_is_fixed_point() {
        // n=1: q equals the row itself after normalization, so the warm
        // start already solves the system exactly.
        let block = StubEmbedder::new(8).embed(&["solo"]).unwrap();
        let q = block.normalized_centroid();
        let out = settle(&block, &[], &q, &[true], &params(), Deadline::none()).unwrap();
        assert_eq!(out.cg_iters, 0);
        assert_eq!(out.ustar.row(0), block.row(0));
        assert_eq!(out.delta_h, 0.0);
        assert!(out.converged);
    }

    #[test]
    fn deterministic_across_runs() {
        let (_, o1) = settle_block(&["p", "q", "r", "s", "t", "u"], 6, 3);
        let (_, o2) = settle_block(&["p", "q", "r", "s", "t", "u"], 6, 3);
        assert_eq!(o1.ustar.as_flat(), o2.ustar.as_flat());
        assert_eq!(o1.cg_iters, o2.cg_iters);
        assert_eq!(o1.delta_h, o2.delta_h);
        assert_eq!(o1.final_residual, o2.final_residual);
    }

    #[test]
    fn settling_reduces_energy() {
        let block = StubEmbedder::new(8)
            .embed(&["one", "two", "three", "four", "five", "six", "seven", "eight"])
            .unwrap();
        let edges = mutual_knn(&block, 3);
        let q = block.normalized_centroid();
        let mask = vec![true; block.n()];
        let p = params();
        let out = settle(&block, &edges, &q, &mask, &p, Deadline::none()).unwrap();
        let h_x = energy(&block, &block, &edges, &q, &mask, p.lambdas);
        let h_u = energy(&out.ustar, &block, &edges, &q, &mask, p.lambdas);
        assert!(h_u <= h_x + 1e-9);
        assert!((out.delta_h - (h_x - h_u).max(0.0)).abs() < 1e-9);
        assert!(out.delta_h > 0.0, "pinned settle should drop energy");
    }

    #[test]
    fn expired_deadline_aborts_iterations() {
        let block = StubEmbedder::new(8)
            .embed(&["a", "b", "c", "d", "e", "f", "g", "h"])
            .unwrap();
        let edges = mutual_knn(&block, 3);
        let q = block.normalized_centroid();
        let mask = vec![true; block.n()];
        let expired = Deadline::at(std::time::Instant::now() - std::time::Duration::from_secs(1));
        let err = settle(&block, &edges, &q, &mask, &params(), expired).unwrap_err();
        assert!(matches!(err, LatticeError::DeadlineExceeded));
    }

    #[test]
    fn non_positive_lambda_rejected() {
        let block = StubEmbedder::new(4).embed(&["a", "b"]).unwrap();
        let q = block.normalized_centroid();
        let p = SettleParams {
            lambdas: Lambdas { g: 0.0, c: 0.5, q: 4.0 },
            tol: 1e-6,
            max_iter: 16,
        };
        assert!(settle(&block, &[], &q, &[true, false], &p, Deadline::none()).is_err());
    }

    #[test]
    fn non_finite_input_is_reported() {
        let mut flat = vec![0.5f32; 8];
        flat[3] = f32::NAN;
        let block = VectorBlock::from_flat(flat, 4).unwrap();
        let q = vec![1.0, 0.0, 0.0, 0.0];
        let err = settle(&block, &[(0, 1)], &q, &[true, true], &params(), Deadline::none())
            .unwrap_err();
        assert!(matches!(err, LatticeError::CgNonFinite { .. }));
    }

    #[test]
    fn pin_contributions_nonnegative_and_masked() {
        let block = StubEmbedder::new(4).embed(&["a", "b", "c"]).unwrap();
        let edges = mutual_knn(&block, 2);
        let q = block.normalized_centroid();
        let mask = vec![true, false, true];
        let out = settle(&block, &edges, &q, &mask, &params(), Deadline::none()).unwrap();
        let contrib = pin_contributions(&out.ustar, &block, &q, &mask, 4.0);
        assert_eq!(contrib.len(), 3);
        assert_eq!(contrib[1], 0.0);
        assert!(contrib.iter().all(|c| *c >= 0.0));
    }
}
