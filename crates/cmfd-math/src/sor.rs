//! Red-Black Successive Over-Relaxation (SOR) solver on CSR operators.
//!
//! Rows are grouped into blocks of `block` consecutive unknowns (one block
//! per coarse cell, one row per energy group). Every block carries a colour;
//! all red blocks are relaxed first, then all black blocks, so that with a
//! finite-volume stencil a cell only ever reads neighbours of the other
//! colour during its own pass. Rows inside one block are relaxed in order
//! (Gauss-Seidel across energy groups).

use crate::linalg::relative_residual;
use crate::sparse::CsrMatrix;
use cmfd_types::error::{CmfdError, CmfdResult};

/// Inner linear solve controls.
#[derive(Debug, Clone, Copy)]
pub struct SorConfig {
    /// Relaxation factor (1.0 = Gauss-Seidel).
    pub omega: f64,
    /// Relative residual ‖b - Ax‖ / ‖b‖ that ends the solve.
    pub tol: f64,
    pub max_iters: usize,
    /// Sweeps performed before the residual is tested.
    pub min_iters: usize,
    /// Values at or below zero are replaced by this floor after each update.
    pub floor: Option<f64>,
}

impl Default for SorConfig {
    fn default() -> Self {
        SorConfig {
            omega: 1.5,
            tol: 1e-10,
            max_iters: 10_000,
            min_iters: 1,
            floor: None,
        }
    }
}

/// Outcome of a red-black SOR solve.
#[derive(Debug, Clone, Copy)]
pub struct SorResult {
    pub iterations: usize,
    /// Final relative residual.
    pub residual: f64,
    pub converged: bool,
    /// Updates replaced by the floor across all sweeps.
    pub clamped: usize,
}

/// Perform one Red-Black SOR iteration.
///
/// `colors[cell]` is 0 (red) or 1 (black); row `r` belongs to cell
/// `r / block`. `diag` is the precomputed diagonal of `a`. Returns the number
/// of clamped updates.
#[allow(clippy::too_many_arguments)]
pub fn sor_step(
    a: &CsrMatrix,
    diag: &[f64],
    x: &mut [f64],
    b: &[f64],
    colors: &[u8],
    block: usize,
    omega: f64,
    floor: Option<f64>,
) -> usize {
    let mut clamped = 0;
    for color in 0..2u8 {
        for (cell, &c) in colors.iter().enumerate() {
            if c != color {
                continue;
            }
            for row in cell * block..(cell + 1) * block {
                clamped += usize::from(update_row(a, diag, x, b, row, omega, floor));
            }
        }
    }
    clamped
}

/// Relax until the relative residual drops below `cfg.tol` or the sweep cap
/// is reached. Non-convergence is reported in the result, not as an error.
pub fn sor_solve(
    a: &CsrMatrix,
    x: &mut [f64],
    b: &[f64],
    colors: &[u8],
    block: usize,
    cfg: &SorConfig,
) -> CmfdResult<SorResult> {
    let n = a.n_rows();
    if a.n_cols() != n || x.len() != n || b.len() != n {
        return Err(CmfdError::LinAlg(format!(
            "SOR shape mismatch: A is {}x{}, x has {}, b has {}",
            n,
            a.n_cols(),
            x.len(),
            b.len()
        )));
    }
    if block == 0 || colors.len() * block != n {
        return Err(CmfdError::LinAlg(format!(
            "SOR colouring covers {} blocks of {block} rows, matrix has {n}",
            colors.len()
        )));
    }
    if !cfg.omega.is_finite() || cfg.omega <= 0.0 || cfg.omega >= 2.0 {
        return Err(CmfdError::LinAlg(format!(
            "SOR omega must be in (0, 2), got {}",
            cfg.omega
        )));
    }
    let diag = a.diagonal();
    if let Some(row) = diag.iter().position(|d| !d.is_finite() || *d <= 0.0) {
        return Err(CmfdError::LinAlg(format!(
            "SOR requires a positive diagonal, row {row} has {}",
            diag[row]
        )));
    }

    let mut clamped = 0;
    let mut residual = relative_residual(a, x, b);
    for iter in 0..cfg.max_iters {
        clamped += sor_step(a, &diag, x, b, colors, block, cfg.omega, cfg.floor);
        residual = relative_residual(a, x, b);
        log::trace!("SOR iter {}: residual = {:.6e}", iter + 1, residual);
        if !residual.is_finite() {
            return Err(CmfdError::SolverDiverged {
                iteration: iter + 1,
                message: "SOR produced a non-finite residual".to_string(),
            });
        }
        if iter + 1 >= cfg.min_iters && residual < cfg.tol {
            return Ok(SorResult {
                iterations: iter + 1,
                residual,
                converged: true,
                clamped,
            });
        }
    }

    Ok(SorResult {
        iterations: cfg.max_iters,
        residual,
        converged: false,
        clamped,
    })
}

/// Update a single row using the SOR stencil. Returns true if clamped.
#[inline(always)]
fn update_row(
    a: &CsrMatrix,
    diag: &[f64],
    x: &mut [f64],
    b: &[f64],
    row: usize,
    omega: f64,
    floor: Option<f64>,
) -> bool {
    let off: f64 = a
        .row(row)
        .filter(|&(col, _)| col != row)
        .map(|(col, v)| v * x[col])
        .sum();

    // Gauss-Seidel prediction
    let x_star = (b[row] - off) / diag[row];

    // SOR update
    let mut value = (1.0 - omega) * x[row] + omega * x_star;
    let mut clamped = false;
    if let Some(f) = floor {
        if value <= 0.0 {
            value = f;
            clamped = true;
        }
    }
    x[row] = value;
    clamped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sparse::CsrBuilder;

    /// 1D diffusion-like operator: n cells, g groups, down-scatter coupling.
    fn operator(n: usize, g: usize) -> CsrMatrix {
        let mut b = CsrBuilder::new_square(n * g);
        for c in 0..n {
            for e in 0..g {
                let row = c * g + e;
                b.add(row, row, 2.5 + e as f64);
                if c > 0 {
                    b.add(row, (c - 1) * g + e, -1.0);
                }
                if c + 1 < n {
                    b.add(row, (c + 1) * g + e, -1.0);
                }
                if e > 0 {
                    b.add(row, c * g + e - 1, -0.3);
                }
            }
        }
        b.build()
    }

    fn colors(n: usize) -> Vec<u8> {
        (0..n).map(|c| (c % 2) as u8).collect()
    }

    #[test]
    fn test_sor_converges_on_dominant_system() {
        let a = operator(12, 2);
        let b = vec![1.0; 24];
        let mut x = vec![0.0; 24];
        let cfg = SorConfig {
            omega: 1.3,
            tol: 1e-12,
            ..SorConfig::default()
        };
        let res = sor_solve(&a, &mut x, &b, &colors(12), 2, &cfg).expect("solve");
        assert!(res.converged, "SOR should converge: {res:?}");
        assert!(relative_residual(&a, &x, &b) < 1e-12);
        assert!(!x.iter().any(|v| v.is_nan()), "No NaN allowed");
    }

    #[test]
    fn test_sor_zero_source_stays_zero() {
        let a = operator(8, 1);
        let b = vec![0.0; 8];
        let mut x = vec![0.0; 8];
        let cfg = SorConfig {
            max_iters: 50,
            ..SorConfig::default()
        };
        sor_solve(&a, &mut x, &b, &colors(8), 1, &cfg).expect("solve");
        let max_val = x.iter().cloned().fold(0.0_f64, |m, v| m.max(v.abs()));
        assert!(max_val < 1e-15, "Should stay zero with zero source");
    }

    #[test]
    fn test_sor_residual_decreases() {
        let a = operator(16, 2);
        let b: Vec<f64> = (0..32).map(|i| 1.0 + (i as f64).sin().abs()).collect();
        let mut x = vec![0.0; 32];
        let diag = a.diagonal();
        let before = relative_residual(&a, &x, &b);
        for _ in 0..20 {
            sor_step(&a, &diag, &mut x, &b, &colors(16), 2, 1.2, None);
        }
        let after = relative_residual(&a, &x, &b);
        assert!(after < before, "Residual should decrease: {before} -> {after}");
    }

    #[test]
    fn test_floor_clamps_negative_updates() {
        // Negative right-hand side drives the solution negative.
        let a = operator(4, 1);
        let b = vec![-1.0; 4];
        let mut x = vec![1.0; 4];
        let diag = a.diagonal();
        let clamped = sor_step(&a, &diag, &mut x, &b, &colors(4), 1, 1.0, Some(1e-12));
        assert!(clamped > 0);
        assert!(x.iter().all(|&v| v > 0.0));
    }

    #[test]
    fn test_cap_reports_non_convergence() {
        let a = operator(32, 1);
        let b = vec![1.0; 32];
        let mut x = vec![0.0; 32];
        let cfg = SorConfig {
            omega: 1.0,
            tol: 1e-14,
            max_iters: 2,
            ..SorConfig::default()
        };
        let res = sor_solve(&a, &mut x, &b, &colors(32), 1, &cfg).expect("solve");
        assert!(!res.converged);
        assert_eq!(res.iterations, 2);
    }

    #[test]
    fn test_rejects_zero_diagonal() {
        let mut bld = CsrBuilder::new_square(2);
        bld.add(0, 0, 1.0);
        bld.add(1, 0, 1.0);
        let a = bld.build();
        let mut x = vec![0.0; 2];
        let err = sor_solve(&a, &mut x, &[1.0, 1.0], &[0, 1], 1, &SorConfig::default())
            .expect_err("zero diagonal must fail");
        match err {
            CmfdError::LinAlg(msg) => assert!(msg.contains("positive diagonal")),
            other => panic!("Unexpected error: {other:?}"),
        }
    }
}
