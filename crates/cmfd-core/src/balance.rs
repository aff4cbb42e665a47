// ─────────────────────────────────────────────────────────────────────
// SCPN CMFD — Neutron Balance
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Global production / loss bookkeeping of a converged coarse solution.

use crate::collapse::CollapsedXs;
use cmfd_math::linalg::sum;
use cmfd_math::sparse::CsrMatrix;
use cmfd_types::constants::BALANCE_TOLERANCE;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BalanceReport {
    /// Σ M φ / k
    pub production: f64,
    /// Σ A φ
    pub loss: f64,
    pub absorption: f64,
    /// Net leakage out of the domain, `loss - absorption`.
    pub leakage: f64,
    /// |loss − production| / production
    pub relative_imbalance: f64,
    /// Largest |(A φ − M φ / k)_i| relative to the mean row production.
    pub max_row_imbalance: f64,
}

impl BalanceReport {
    pub fn is_balanced(&self) -> bool {
        self.relative_imbalance <= BALANCE_TOLERANCE
    }
}

/// Compare loss and production of `flux` (rows `cell * G + group`).
pub fn check_neutron_balance(
    a: &CsrMatrix,
    m: &CsrMatrix,
    flux: &[f64],
    k_eff: f64,
    xs: &CollapsedXs,
) -> BalanceReport {
    let n = flux.len();
    let ng = xs.num_groups();
    let mut loss_rows = vec![0.0; n];
    let mut prod_rows = vec![0.0; n];
    a.mul_vec_parallel(flux, &mut loss_rows);
    m.mul_vec_parallel(flux, &mut prod_rows);
    for p in &mut prod_rows {
        *p /= k_eff;
    }

    let loss = sum(&loss_rows);
    let production = sum(&prod_rows);
    let absorption: f64 = (0..xs.num_cells())
        .flat_map(|cell| (0..ng).map(move |g| (cell, g)))
        .map(|(cell, g)| xs.absorption(cell, g) * xs.volume[cell] * flux[cell * ng + g])
        .sum();

    let relative_imbalance = if production > 0.0 {
        (loss - production).abs() / production
    } else {
        (loss - production).abs()
    };
    let mean_production = if n > 0 { production / n as f64 } else { 0.0 };
    let max_row = loss_rows
        .iter()
        .zip(prod_rows.iter())
        .map(|(l, p)| (l - p).abs())
        .fold(0.0_f64, f64::max);
    let max_row_imbalance = if mean_production > 0.0 {
        max_row / mean_production
    } else {
        max_row
    };

    let report = BalanceReport {
        production,
        loss,
        absorption,
        leakage: loss - absorption,
        relative_imbalance,
        max_row_imbalance,
    };
    if report.is_balanced() {
        log::debug!("CMFD neutron balance: {report:?}");
    } else {
        log::warn!(
            "CMFD neutron imbalance {:.3e} exceeds {:.0e} (production {:.6e}, loss {:.6e})",
            relative_imbalance,
            BALANCE_TOLERANCE,
            production,
            loss
        );
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use cmfd_math::sparse::CsrBuilder;
    use ndarray::{Array1, Array2, Array3};

    fn one_cell(sigma_t: f64, nu_sigma_f: f64) -> CollapsedXs {
        CollapsedXs {
            sigma_t: Array2::from_elem((1, 1), sigma_t),
            nu_sigma_f: Array2::from_elem((1, 1), nu_sigma_f),
            chi: Array2::ones((1, 1)),
            sigma_s: Array3::zeros((1, 1, 1)),
            diffusion: Array2::from_elem((1, 1), 1.0 / (3.0 * sigma_t)),
            volume: Array1::from_elem(1, 2.0),
            flux: Array2::ones((1, 1)),
        }
    }

    fn diag(v: f64) -> CsrMatrix {
        let mut b = CsrBuilder::new_square(1);
        b.add(0, 0, v);
        b.build()
    }

    #[test]
    fn test_exact_eigenpair_is_balanced() {
        let xs = one_cell(0.4, 0.5);
        // A includes 0.1 V of leakage on top of absorption.
        let a = diag((0.4 + 0.1) * 2.0);
        let m = diag(0.5 * 2.0);
        let report = check_neutron_balance(&a, &m, &[3.0], 1.0, &xs);
        assert!(report.is_balanced());
        assert!((report.absorption - 0.4 * 2.0 * 3.0).abs() < 1e-12);
        assert!((report.leakage - 0.1 * 2.0 * 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_wrong_k_is_flagged() {
        let xs = one_cell(0.4, 0.5);
        let a = diag(0.8);
        let m = diag(1.0);
        let report = check_neutron_balance(&a, &m, &[1.0], 1.0, &xs);
        assert!(!report.is_balanced());
        assert!((report.relative_imbalance - 0.2).abs() < 1e-12);
    }
}
