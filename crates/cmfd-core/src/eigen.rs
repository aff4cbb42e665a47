// ─────────────────────────────────────────────────────────────────────
// SCPN CMFD — Eigenvalue Solver
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Power iteration on `A φ = (1/k) M φ` with red-black SOR inner solves.
//!
//! The fission source is kept normalized to a mean of one per row, so `k`
//! is read off directly from the growth of the source sum.

use cmfd_math::linalg::{relative_rms_change, scale, sum};
use cmfd_math::sor::{sor_solve, SorConfig};
use cmfd_math::sparse::CsrMatrix;
use cmfd_types::config::SolverConfig;
use cmfd_types::constants::{
    FLUX_FLOOR, LINEAR_TOLERANCE_FACTOR, MAX_EIGEN_ITERATIONS, MAX_LINEAR_SOLVE_ITERATIONS,
    MIN_LINEAR_SOLVE_ITERATIONS,
};
use cmfd_types::error::{CmfdError, CmfdResult};

#[derive(Debug, Clone, Copy)]
pub struct EigenConfig {
    pub sor_factor: f64,
    /// Relative RMS change of the fission source that ends the iteration.
    pub source_convergence_threshold: f64,
    pub max_iterations: usize,
    pub max_linear_iterations: usize,
    /// Replacement for non-positive fluxes produced by the inner solve.
    pub flux_floor: f64,
}

impl EigenConfig {
    pub fn from_solver(solver: &SolverConfig) -> Self {
        EigenConfig {
            sor_factor: solver.sor_factor,
            source_convergence_threshold: solver.source_convergence_threshold,
            ..EigenConfig::default()
        }
    }
}

impl Default for EigenConfig {
    fn default() -> Self {
        EigenConfig {
            sor_factor: 1.5,
            source_convergence_threshold: 1e-7,
            max_iterations: MAX_EIGEN_ITERATIONS,
            max_linear_iterations: MAX_LINEAR_SOLVE_ITERATIONS,
            flux_floor: FLUX_FLOOR,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct EigenOutcome {
    pub k_eff: f64,
    pub converged: bool,
    pub iterations: usize,
    /// Final relative RMS source change.
    pub residual: f64,
    /// SOR sweeps summed over all inner solves.
    pub linear_iterations: usize,
    /// Flux updates replaced by the floor.
    pub clamped: usize,
}

pub struct EigenSolver<'a> {
    a: &'a CsrMatrix,
    m: &'a CsrMatrix,
    colors: &'a [u8],
    block: usize,
    cfg: EigenConfig,
}

impl<'a> EigenSolver<'a> {
    /// `colors` holds the red-black colour of each block of `block` rows.
    pub fn new(
        a: &'a CsrMatrix,
        m: &'a CsrMatrix,
        colors: &'a [u8],
        block: usize,
        cfg: EigenConfig,
    ) -> CmfdResult<Self> {
        let n = a.n_rows();
        if a.n_cols() != n || m.n_rows() != n || m.n_cols() != n {
            return Err(CmfdError::LinAlg(format!(
                "Eigen operators must be square and equal: A {}x{}, M {}x{}",
                n,
                a.n_cols(),
                m.n_rows(),
                m.n_cols()
            )));
        }
        if n == 0 {
            return Err(CmfdError::LinAlg("Empty eigenvalue problem".to_string()));
        }
        if !(cfg.source_convergence_threshold > 0.0) {
            return Err(CmfdError::ConfigError(format!(
                "Source convergence threshold must be > 0, got {}",
                cfg.source_convergence_threshold
            )));
        }
        Ok(EigenSolver {
            a,
            m,
            colors,
            block,
            cfg,
        })
    }

    /// Solve in place. `flux` holds the initial guess on entry and the
    /// eigenvector (source normalized to mean one) on exit.
    pub fn solve(&self, flux: &mut [f64], k_seed: f64) -> CmfdResult<EigenOutcome> {
        let n = self.a.n_rows();
        if flux.len() != n {
            return Err(CmfdError::IndexOutOfBounds {
                what: "eigen flux",
                index: flux.len(),
                len: n,
            });
        }
        let mut k = if k_seed.is_finite() && k_seed > 0.0 {
            k_seed
        } else {
            1.0
        };

        let mut old_source = vec![0.0; n];
        let mut new_source = vec![0.0; n];
        let mut rhs = vec![0.0; n];
        self.m.mul_vec_parallel(flux, &mut old_source);
        let total = sum(&old_source);
        if !(total > 0.0 && total.is_finite()) {
            return Err(CmfdError::PhysicsViolation(format!(
                "Initial CMFD fission source sums to {total}"
            )));
        }
        let norm = n as f64 / total;
        scale(&mut old_source, norm);
        scale(flux, norm);

        let sor = SorConfig {
            omega: self.cfg.sor_factor,
            tol: self.cfg.source_convergence_threshold * LINEAR_TOLERANCE_FACTOR,
            max_iters: self.cfg.max_linear_iterations,
            min_iters: MIN_LINEAR_SOLVE_ITERATIONS,
            floor: Some(self.cfg.flux_floor),
        };

        let mut linear_iterations = 0;
        let mut clamped = 0;
        let mut residual = f64::INFINITY;
        for iter in 1..=self.cfg.max_iterations {
            for (r, s) in rhs.iter_mut().zip(old_source.iter()) {
                *r = s / k;
            }
            let inner = sor_solve(self.a, flux, &rhs, self.colors, self.block, &sor)?;
            linear_iterations += inner.iterations;
            clamped += inner.clamped;
            if !inner.converged {
                log::warn!(
                    "CMFD iter {iter}: inner SOR stopped at residual {:.3e} after {} sweeps",
                    inner.residual,
                    inner.iterations
                );
            }

            self.m.mul_vec_parallel(flux, &mut new_source);
            let new_total = sum(&new_source);
            if !(new_total > 0.0 && new_total.is_finite()) {
                return Err(CmfdError::SolverDiverged {
                    iteration: iter,
                    message: format!("fission source sums to {new_total}"),
                });
            }
            k *= new_total / n as f64;
            let norm = n as f64 / new_total;
            scale(&mut new_source, norm);
            scale(flux, norm);

            residual = relative_rms_change(&new_source, &old_source);
            std::mem::swap(&mut old_source, &mut new_source);
            log::debug!("CMFD iter {iter}: k = {k:.6}, residual = {residual:.3e}");

            if residual < self.cfg.source_convergence_threshold {
                if clamped > 0 {
                    log::warn!(
                        "CMFD clamped {clamped} negative flux updates to {:e}",
                        self.cfg.flux_floor
                    );
                }
                return Ok(EigenOutcome {
                    k_eff: k,
                    converged: true,
                    iterations: iter,
                    residual,
                    linear_iterations,
                    clamped,
                });
            }
        }

        log::warn!(
            "CMFD power iteration did not converge in {} iterations (residual {residual:.3e}, k = {k:.6})",
            self.cfg.max_iterations
        );
        Ok(EigenOutcome {
            k_eff: k,
            converged: false,
            iterations: self.cfg.max_iterations,
            residual,
            linear_iterations,
            clamped,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cmfd_math::sparse::CsrBuilder;

    /// 1-group slab of `n` cells with vacuum ends.
    fn slab(n: usize, d: f64, sigma_a: f64, nu_sigma_f: f64) -> (CsrMatrix, CsrMatrix) {
        let mut a = CsrBuilder::new_square(n);
        let mut m = CsrBuilder::new_square(n);
        for i in 0..n {
            a.add(i, i, sigma_a + 2.0 * d);
            if i > 0 {
                a.add(i, i - 1, -d);
            }
            if i + 1 < n {
                a.add(i, i + 1, -d);
            }
            m.add(i, i, nu_sigma_f);
        }
        (a.build(), m.build())
    }

    fn colors(n: usize) -> Vec<u8> {
        (0..n).map(|i| (i % 2) as u8).collect()
    }

    #[test]
    fn test_single_cell_k_is_production_over_absorption() {
        let (a, m) = slab(1, 0.0, 0.08, 0.1);
        let solver = EigenSolver::new(&a, &m, &[0], 1, EigenConfig::default()).unwrap();
        let mut flux = vec![3.0];
        let out = solver.solve(&mut flux, 1.0).unwrap();
        assert!(out.converged);
        assert!((out.k_eff - 1.25).abs() < 1e-8);
    }

    #[test]
    fn test_slab_matches_analytic_fundamental_mode() {
        let n = 20;
        let (d, sa, nsf) = (1.0, 0.1, 0.15);
        let (a, m) = slab(n, d, sa, nsf);
        let cfg = EigenConfig {
            source_convergence_threshold: 1e-10,
            ..EigenConfig::default()
        };
        let c = colors(n);
        let solver = EigenSolver::new(&a, &m, &c, 1, cfg).unwrap();
        let mut flux = vec![1.0; n];
        let out = solver.solve(&mut flux, 1.0).unwrap();
        assert!(out.converged, "{out:?}");
        // Zero-flux ghost cells at both ends: lambda = 2d(1 - cos(pi/(n+1))).
        let leak = 2.0 * d * (1.0 - (std::f64::consts::PI / (n as f64 + 1.0)).cos());
        let k_exact = nsf / (sa + leak);
        assert!((out.k_eff - k_exact).abs() < 1e-6, "k = {} vs {k_exact}", out.k_eff);
        assert!(flux.iter().all(|&f| f > 0.0));
        assert!((flux[3] - flux[n - 4]).abs() < 1e-6);
    }

    #[test]
    fn test_iteration_cap_reports_failure() {
        let (a, m) = slab(30, 1.0, 0.01, 0.02);
        let cfg = EigenConfig {
            max_iterations: 2,
            max_linear_iterations: 50,
            source_convergence_threshold: 1e-14,
            ..EigenConfig::default()
        };
        let c = colors(30);
        let solver = EigenSolver::new(&a, &m, &c, 1, cfg).unwrap();
        let mut flux: Vec<f64> = (0..30).map(|i| 1.0 + i as f64).collect();
        let out = solver.solve(&mut flux, 1.0).unwrap();
        assert!(!out.converged);
        assert_eq!(out.iterations, 2);
        assert!(out.k_eff.is_finite());
    }

    #[test]
    fn test_no_fission_is_physics_violation() {
        let (a, m) = slab(4, 1.0, 0.1, 0.0);
        let c = colors(4);
        let solver = EigenSolver::new(&a, &m, &c, 1, EigenConfig::default()).unwrap();
        let err = solver.solve(&mut [1.0; 4], 1.0).unwrap_err();
        assert!(matches!(err, CmfdError::PhysicsViolation(_)));
    }

    #[test]
    fn test_shape_mismatch_rejected() {
        let (a, _) = slab(3, 1.0, 0.1, 0.1);
        let (_, m) = slab(4, 1.0, 0.1, 0.1);
        assert!(EigenSolver::new(&a, &m, &[0, 1, 0], 1, EigenConfig::default()).is_err());
    }
}
