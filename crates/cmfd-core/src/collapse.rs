// ─────────────────────────────────────────────────────────────────────
// SCPN CMFD — Cross Section Collapse
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Flux-volume weighted homogenization of fine-region cross sections into
//! coarse cells and coarse groups.

use crate::groups::GroupMap;
use crate::tally::TallyStore;
use cmfd_types::error::{CmfdError, CmfdResult};
use ndarray::{Array1, Array2, Array3};
use rayon::prelude::*;

/// Coarse-cell, coarse-group cross sections. 2-D arrays are `[cell, group]`,
/// scattering is `[cell, from, to]`.
#[derive(Debug, Clone)]
pub struct CollapsedXs {
    pub sigma_t: Array2<f64>,
    pub nu_sigma_f: Array2<f64>,
    pub chi: Array2<f64>,
    pub sigma_s: Array3<f64>,
    pub diffusion: Array2<f64>,
    pub volume: Array1<f64>,
    /// Volume-averaged scalar flux.
    pub flux: Array2<f64>,
}

impl CollapsedXs {
    pub fn num_cells(&self) -> usize {
        self.volume.len()
    }

    pub fn num_groups(&self) -> usize {
        self.sigma_t.ncols()
    }

    /// Σt − Σs(g→g)
    pub fn removal(&self, cell: usize, group: usize) -> f64 {
        self.sigma_t[[cell, group]] - self.sigma_s[[cell, group, group]]
    }

    /// Σt minus all out-scatter.
    pub fn absorption(&self, cell: usize, group: usize) -> f64 {
        let out: f64 = (0..self.num_groups())
            .map(|to| self.sigma_s[[cell, group, to]])
            .sum();
        self.sigma_t[[cell, group]] - out
    }
}

struct CellXs {
    sigma_t: Vec<f64>,
    nu_sigma_f: Vec<f64>,
    chi: Vec<f64>,
    sigma_s: Vec<f64>,
    diffusion: Vec<f64>,
    volume: f64,
    flux: Vec<f64>,
}

fn collapse_cell(tallies: &TallyStore, groups: &GroupMap, cell: usize) -> CmfdResult<CellXs> {
    let nc = groups.num_coarse_groups();
    let volume = tallies.volume(cell);
    if !(volume > 0.0 && volume.is_finite()) {
        return Err(CmfdError::PhysicsViolation(format!(
            "CMFD cell {cell} has non-positive tallied volume {volume}"
        )));
    }
    let chi_total: f64 = (0..groups.num_fine_groups())
        .map(|h| tallies.chi(cell, h))
        .sum();

    let mut xs = CellXs {
        sigma_t: vec![0.0; nc],
        nu_sigma_f: vec![0.0; nc],
        chi: vec![0.0; nc],
        sigma_s: vec![0.0; nc * nc],
        diffusion: vec![0.0; nc],
        volume,
        flux: vec![0.0; nc],
    };
    for e in 0..nc {
        let mut flux_volume = 0.0;
        let mut total = 0.0;
        let mut nu_fission = 0.0;
        let mut diffusion = 0.0;
        let mut chi = 0.0;
        let mut scattering = vec![0.0; nc];
        for h in groups.fine_range(e) {
            flux_volume += tallies.flux_volume(cell, h);
            total += tallies.total(cell, h);
            nu_fission += tallies.nu_fission(cell, h);
            diffusion += tallies.diffusion(cell, h);
            chi += tallies.chi(cell, h);
            for (to, s) in scattering.iter_mut().enumerate() {
                *s += tallies.scattering(cell, h, to);
            }
        }
        if !(flux_volume > 0.0 && flux_volume.is_finite()) {
            return Err(CmfdError::PhysicsViolation(format!(
                "CMFD cell {cell} group {e}: flux-volume tally is {flux_volume}"
            )));
        }
        xs.sigma_t[e] = total / flux_volume;
        xs.nu_sigma_f[e] = nu_fission / flux_volume;
        xs.diffusion[e] = diffusion / flux_volume;
        xs.chi[e] = if chi_total > 0.0 { chi / chi_total } else { 0.0 };
        xs.flux[e] = flux_volume / volume;
        for (to, s) in scattering.into_iter().enumerate() {
            xs.sigma_s[e * nc + to] = s / flux_volume;
        }
    }
    Ok(xs)
}

/// Collapse reduced tallies into coarse cross sections, cells in parallel.
pub fn collapse_cross_sections(tallies: &TallyStore, groups: &GroupMap) -> CmfdResult<CollapsedXs> {
    let num_cells = tallies.num_cells();
    let nc = groups.num_coarse_groups();
    let cells: Vec<CellXs> = (0..num_cells)
        .into_par_iter()
        .map(|cell| collapse_cell(tallies, groups, cell))
        .collect::<CmfdResult<_>>()?;

    let mut out = CollapsedXs {
        sigma_t: Array2::zeros((num_cells, nc)),
        nu_sigma_f: Array2::zeros((num_cells, nc)),
        chi: Array2::zeros((num_cells, nc)),
        sigma_s: Array3::zeros((num_cells, nc, nc)),
        diffusion: Array2::zeros((num_cells, nc)),
        volume: Array1::zeros(num_cells),
        flux: Array2::zeros((num_cells, nc)),
    };
    for (i, c) in cells.into_iter().enumerate() {
        out.volume[i] = c.volume;
        for e in 0..nc {
            out.sigma_t[[i, e]] = c.sigma_t[e];
            out.nu_sigma_f[[i, e]] = c.nu_sigma_f[e];
            out.chi[[i, e]] = c.chi[e];
            out.diffusion[[i, e]] = c.diffusion[e];
            out.flux[[i, e]] = c.flux[e];
            for to in 0..nc {
                out.sigma_s[[i, e, to]] = c.sigma_s[e * nc + to];
            }
        }
    }
    log::debug!("Collapsed cross sections for {num_cells} cells x {nc} groups");
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::SerialCommunicator;
    use cmfd_types::material::Material;
    use std::sync::Arc;

    fn two_group() -> Arc<Material> {
        Arc::new(
            Material::new(
                "fuel",
                vec![0.6, 1.4],
                vec![0.4, 0.05, 0.01, 1.1],
                vec![0.02, 0.3],
                vec![1.0, 0.0],
            )
            .unwrap(),
        )
    }

    fn store(groups: &GroupMap, cells: &[usize], flux: &[f64]) -> TallyStore {
        let n = cells.len();
        let num_cells = 1 + cells.iter().max().copied().unwrap_or(0);
        let mut s = TallyStore::new(2, num_cells, 2, groups.num_coarse_groups()).unwrap();
        s.accumulate_regions(cells, &vec![0.5; n], &vec![two_group(); n], flux, groups)
            .unwrap();
        s.reduce(&SerialCommunicator).unwrap();
        s
    }

    #[test]
    fn test_identity_collapse_reproduces_fine_xs() {
        let groups = GroupMap::automatic(2).unwrap();
        let flux = [1.0, 0.3, 2.0, 0.7];
        let xs = collapse_cross_sections(&store(&groups, &[0, 0], &flux), &groups).unwrap();
        let m = two_group();
        for g in 0..2 {
            assert!((xs.sigma_t[[0, g]] - m.sigma_t[g]).abs() < 1e-12);
            assert!((xs.nu_sigma_f[[0, g]] - m.nu_sigma_f[g]).abs() < 1e-12);
            assert!((xs.diffusion[[0, g]] - 1.0 / (3.0 * m.sigma_t[g])).abs() < 1e-12);
            for to in 0..2 {
                assert!((xs.sigma_s[[0, g, to]] - m.sigma_s(g, to)).abs() < 1e-12);
            }
        }
        assert!((xs.chi[[0, 0]] - 1.0).abs() < 1e-12);
        assert!((xs.volume[0] - 1.0).abs() < 1e-12);
        assert!((xs.flux[[0, 0]] - 1.5).abs() < 1e-12);
    }

    #[test]
    fn test_single_coarse_group_is_flux_weighted() {
        let groups = GroupMap::explicit(&[vec![0, 1]], 2).unwrap();
        let flux = [3.0, 1.0];
        let xs = collapse_cross_sections(&store(&groups, &[0], &flux), &groups).unwrap();
        let expected_t = (0.6 * 3.0 + 1.4 * 1.0) / 4.0;
        assert!((xs.sigma_t[[0, 0]] - expected_t).abs() < 1e-12);
        let expected_s = (0.45 * 3.0 + 1.11 * 1.0) / 4.0;
        assert!((xs.sigma_s[[0, 0, 0]] - expected_s).abs() < 1e-12);
        assert!((xs.absorption(0, 0) - (expected_t - expected_s)).abs() < 1e-12);
        assert!((xs.chi[[0, 0]] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_zero_flux_is_physics_violation() {
        let groups = GroupMap::automatic(2).unwrap();
        let err = collapse_cross_sections(&store(&groups, &[0], &[1.0, 0.0]), &groups).unwrap_err();
        assert!(matches!(err, CmfdError::PhysicsViolation(_)));
    }

    #[test]
    fn test_empty_cell_is_physics_violation() {
        let groups = GroupMap::automatic(2).unwrap();
        // Cell 0 never receives a region.
        let err = collapse_cross_sections(&store(&groups, &[1], &[1.0, 1.0]), &groups).unwrap_err();
        assert!(matches!(err, CmfdError::PhysicsViolation(_)));
    }
}
