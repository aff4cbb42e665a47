// ─────────────────────────────────────────────────────────────────────
// SCPN CMFD — Coarse Operators
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Assembly of the loss operator `A` (removal, in-scatter, leakage) and the
//! fission production operator `M` of the generalized eigenproblem
//! `A φ = (1/k) M φ`. Rows and columns are `cell * num_groups + group`.

use crate::diffusion::{DiffusionContext, SurfaceCoupling};
use crate::lattice::face_sense;
use cmfd_math::sparse::{CsrBuilder, CsrMatrix};
use cmfd_types::constants::NUM_FACES;

#[derive(Debug, Clone)]
pub struct Operators {
    pub a: CsrMatrix,
    pub m: CsrMatrix,
    num_groups: usize,
    /// Face couplings, `(cell * NUM_FACES + face) * num_groups + group`.
    /// Inactive faces stay zero.
    pub couplings: Vec<SurfaceCoupling>,
}

impl Operators {
    pub fn coupling(&self, cell: usize, face: usize, group: usize) -> SurfaceCoupling {
        self.couplings[(cell * NUM_FACES + face) * self.num_groups + group]
    }
}

/// Build `A` and `M` from the collapsed cross sections and face couplings.
pub fn build_operators(ctx: &DiffusionContext<'_>) -> Operators {
    let lattice = ctx.lattice;
    let xs = ctx.xs;
    let ng = xs.num_groups();
    let num_cells = lattice.num_cells();
    let n = num_cells * ng;
    let mut a = CsrBuilder::new_square(n);
    let mut m = CsrBuilder::new_square(n);
    let mut couplings = vec![SurfaceCoupling::default(); num_cells * NUM_FACES * ng];

    for cell in 0..num_cells {
        let volume = xs.volume[cell];
        for e in 0..ng {
            let row = cell * ng + e;

            a.add(row, row, xs.removal(cell, e) * volume);
            for g in 0..ng {
                let in_scatter = xs.sigma_s[[cell, g, e]];
                if g != e && in_scatter != 0.0 {
                    a.add(row, cell * ng + g, -in_scatter * volume);
                }
                let fission = xs.chi[[cell, e]] * xs.nu_sigma_f[[cell, g]] * volume;
                if fission != 0.0 {
                    m.add(row, cell * ng + g, fission);
                }
            }

            for &face in lattice.active_faces() {
                let c = ctx.surface_coupling(cell, face, e);
                couplings[(cell * NUM_FACES + face) * ng + e] = c;
                let sense = face_sense(face);
                let area = lattice.surface_area(cell, face);
                a.add(row, row, (c.dif_surf - sense * c.dif_surf_corr) * area);
                if let Some(next) = lattice.cell_next(cell, face) {
                    a.add(
                        row,
                        next * ng + e,
                        -(c.dif_surf + sense * c.dif_surf_corr) * area,
                    );
                }
            }
        }
    }

    let a = a.build();
    let m = m.build();
    log::debug!(
        "Assembled CMFD operators: n = {n}, nnz(A) = {}, nnz(M) = {}",
        a.nnz(),
        m.nnz()
    );
    Operators {
        a,
        m,
        num_groups: ng,
        couplings,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collapse::CollapsedXs;
    use crate::lattice::{Lattice, SURFACE_X_MAX};
    use cmfd_types::constants::NUM_SURFACES;
    use cmfd_types::material::BoundaryType;
    use ndarray::{Array1, Array2, Array3};

    fn two_group_xs(num_cells: usize) -> CollapsedXs {
        let mut sigma_s = Array3::zeros((num_cells, 2, 2));
        for c in 0..num_cells {
            sigma_s[[c, 0, 0]] = 0.4;
            sigma_s[[c, 0, 1]] = 0.05;
            sigma_s[[c, 1, 1]] = 1.1;
        }
        let mut chi = Array2::zeros((num_cells, 2));
        chi.column_mut(0).fill(1.0);
        let mut nu_sigma_f = Array2::zeros((num_cells, 2));
        nu_sigma_f.column_mut(0).fill(0.02);
        nu_sigma_f.column_mut(1).fill(0.3);
        let mut sigma_t = Array2::zeros((num_cells, 2));
        sigma_t.column_mut(0).fill(0.5);
        sigma_t.column_mut(1).fill(1.3);
        let diffusion = sigma_t.mapv(|t: f64| 1.0 / (3.0 * t));
        CollapsedXs {
            sigma_t,
            nu_sigma_f,
            chi,
            sigma_s,
            diffusion,
            volume: Array1::from_elem(num_cells, 2.0),
            flux: Array2::ones((num_cells, 2)),
        }
    }

    fn build(bc: BoundaryType) -> (Lattice, Operators, CollapsedXs) {
        let l = Lattice::uniform(
            [3, 3, 1],
            [3.0 * 2f64.sqrt(), 3.0 * 2f64.sqrt(), 1.0],
            [bc; NUM_FACES],
            false,
        )
        .unwrap();
        let xs = two_group_xs(9);
        let currents = vec![0.0; 9 * NUM_SURFACES * 2];
        let ctx = DiffusionContext {
            lattice: &l,
            xs: &xs,
            flux: &xs.flux,
            currents: &currents,
            angles: None,
            moc_iteration: 0,
        };
        let ops = build_operators(&ctx);
        (l, ops, xs)
    }

    #[test]
    fn test_reflective_rows_are_pure_reaction() {
        let (_, ops, xs) = build(BoundaryType::Reflective);
        // Uniform flux: leakage cancels.
        let ones = vec![1.0; 18];
        let mut y = vec![0.0; 18];
        ops.a.mul_vec(&ones, &mut y);
        for cell in 0..9 {
            // Row sums are removal minus in-scatter.
            assert!((y[cell * 2] - xs.removal(cell, 0) * 2.0).abs() < 1e-12);
            let expected = (1.3 - 1.1 - 0.05) * 2.0;
            assert!((y[cell * 2 + 1] - expected).abs() < 1e-12);
        }
    }

    #[test]
    fn test_structure_and_signs() {
        let (l, ops, _) = build(BoundaryType::Vacuum);
        assert_eq!(ops.a.n_rows(), 18);
        assert!(ops.a.is_diagonally_dominant());
        // Diffusion coupling is symmetric without correction.
        let center = l.cell_index(1, 1, 0);
        let right = l.cell_index(2, 1, 0);
        let a_cr = ops.a.get(center * 2, right * 2);
        assert!(a_cr < 0.0);
        assert!((a_cr - ops.a.get(right * 2, center * 2)).abs() < 1e-14);
        // No up-scatter entry, down-scatter is negative.
        assert_eq!(ops.a.get(center * 2, center * 2 + 1), 0.0);
        assert!((ops.a.get(center * 2 + 1, center * 2) + 0.05 * 2.0).abs() < 1e-14);
        // Fission enters only the fast rows.
        assert!((ops.m.get(center * 2, center * 2 + 1) - 0.3 * 2.0).abs() < 1e-14);
        assert_eq!(ops.m.get(center * 2 + 1, center * 2 + 1), 0.0);
        assert!(ops.coupling(center, SURFACE_X_MAX, 0).dif_surf > 0.0);
    }
}
