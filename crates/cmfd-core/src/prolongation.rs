// ─────────────────────────────────────────────────────────────────────
// SCPN CMFD — Flux Prolongation
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Mapping the coarse solution back onto the fine transport flux.
//!
//! Every fine region is scaled by the ratio of new to old coarse flux of
//! its coarse group, taken either from its own cell or interpolated from
//! the k nearest cell centres around the region centroid.

use crate::groups::GroupMap;
use crate::lattice::Lattice;
use cmfd_math::linalg::{scale, sum};
use cmfd_math::sparse::CsrMatrix;
use cmfd_types::constants::FLUX_RATIO_GUARD;
use cmfd_types::error::{CmfdError, CmfdResult};
use ndarray::Array2;
use rayon::prelude::*;

/// Per-region neighbour stencils: `(cell, distance)` sorted by distance.
#[derive(Debug, Clone)]
pub struct KNearestStencils {
    stencils: Vec<Vec<(usize, f64)>>,
}

impl KNearestStencils {
    /// Scan the 3×3 (2D) or 3×3×3 (3D) neighbourhood of each region's cell
    /// and keep the `k` cell centres nearest to the region centroid.
    pub fn generate(
        lattice: &Lattice,
        centroids: &[[f64; 3]],
        region_cells: &[usize],
        k: usize,
    ) -> CmfdResult<Self> {
        if centroids.len() != region_cells.len() {
            return Err(CmfdError::ConfigError(format!(
                "{} centroids supplied for {} regions",
                centroids.len(),
                region_cells.len()
            )));
        }
        if k == 0 {
            return Err(CmfdError::ConfigError(
                "k-nearest stencil needs k >= 1".to_string(),
            ));
        }
        let solve_3d = lattice.solve_3d();
        let dz_range = if solve_3d { -1..=1 } else { 0..=0 };
        let stencils = region_cells
            .par_iter()
            .zip(centroids.par_iter())
            .map(|(&cell, centroid)| {
                let mut stencil = Vec::with_capacity(27);
                for dz in dz_range.clone() {
                    for dy in -1..=1 {
                        for dx in -1..=1 {
                            if let Some(n) = lattice.cell_by_offset(cell, [dx, dy, dz]) {
                                let d = distance(centroid, &lattice.cell_center(n), solve_3d);
                                stencil.push((n, d));
                            }
                        }
                    }
                }
                stencil.sort_unstable_by(|a, b| a.1.total_cmp(&b.1));
                stencil.truncate(k);
                stencil
            })
            .collect();
        Ok(KNearestStencils { stencils })
    }

    pub fn stencil(&self, region: usize) -> &[(usize, f64)] {
        &self.stencils[region]
    }

    /// Distance-weighted ratio for `region`: weights `1 - d / Σd` over the
    /// stencil. Falls back to `own_cell` for a single-entry stencil.
    pub fn update_ratio(
        &self,
        region: usize,
        own_cell: usize,
        ratios: &Array2<f64>,
        group: usize,
    ) -> f64 {
        let stencil = &self.stencils[region];
        let own = ratios[[own_cell, group]];
        if stencil.len() <= 1 {
            return own;
        }
        let total: f64 = stencil.iter().map(|(_, d)| d).sum();
        if total <= 0.0 {
            return own;
        }
        let mut weighted = 0.0;
        let mut weights = 0.0;
        for &(cell, d) in stencil {
            let w = 1.0 - d / total;
            weighted += w * ratios[[cell, group]];
            weights += w;
        }
        if weights > 0.0 {
            weighted / weights
        } else {
            own
        }
    }
}

fn distance(a: &[f64; 3], b: &[f64; 3], solve_3d: bool) -> f64 {
    let dz = if solve_3d { a[2] - b[2] } else { 0.0 };
    ((a[0] - b[0]).powi(2) + (a[1] - b[1]).powi(2) + dz * dz).sqrt()
}

/// Scale `new_flux` so that its total fission production matches `old_flux`.
/// Returns the applied factor; 1 when either production is not positive.
pub fn rescale_flux(m: &CsrMatrix, old_flux: &[f64], new_flux: &mut [f64]) -> f64 {
    let mut tmp = vec![0.0; old_flux.len()];
    m.mul_vec_parallel(old_flux, &mut tmp);
    let old_source = sum(&tmp);
    m.mul_vec_parallel(new_flux, &mut tmp);
    let new_source = sum(&tmp);
    if !(old_source > 0.0 && new_source > 0.0) {
        log::warn!(
            "Skipping CMFD flux rescale: old source {old_source:e}, new source {new_source:e}"
        );
        return 1.0;
    }
    let factor = old_source / new_source;
    scale(new_flux, factor);
    factor
}

/// `new / old` per cell and group; 1 where the old flux is negligible.
pub fn compute_flux_ratio(old_flux: &Array2<f64>, new_flux: &Array2<f64>) -> Array2<f64> {
    let mut ratio = Array2::ones(old_flux.raw_dim());
    ndarray::Zip::from(&mut ratio)
        .and(old_flux)
        .and(new_flux)
        .for_each(|r, &old, &new| {
            if old.abs() >= FLUX_RATIO_GUARD {
                *r = new / old;
            }
        });
    ratio
}

/// Fine-region data the prolongation reads.
pub struct FineFluxMap<'a> {
    pub region_cells: &'a [usize],
    pub groups: &'a GroupMap,
    /// `Some` when centroid-weighted interpolation is on.
    pub stencils: Option<&'a KNearestStencils>,
}

impl FineFluxMap<'_> {
    fn region_ratio(&self, region: usize, coarse: usize, ratios: &Array2<f64>) -> f64 {
        let cell = self.region_cells[region];
        match self.stencils {
            Some(s) => s.update_ratio(region, cell, ratios, coarse),
            None => ratios[[cell, coarse]],
        }
    }

    /// Multiply the fine scalar flux `[region][fine group]` and, if given,
    /// the flux moments `[region][fine group][3]` by the coarse ratios.
    pub fn update_moc_flux(
        &self,
        ratios: &Array2<f64>,
        scalar_flux: &mut [f64],
        flux_moments: Option<&mut [f64]>,
    ) -> CmfdResult<()> {
        let nf = self.groups.num_fine_groups();
        let nc = self.groups.num_coarse_groups();
        let num_regions = self.region_cells.len();
        if scalar_flux.len() != num_regions * nf {
            return Err(CmfdError::IndexOutOfBounds {
                what: "scalar flux",
                index: scalar_flux.len(),
                len: num_regions * nf,
            });
        }

        let region_ratios: Vec<f64> = (0..num_regions)
            .into_par_iter()
            .flat_map_iter(|r| (0..nc).map(move |e| (r, e)))
            .map(|(r, e)| self.region_ratio(r, e, ratios))
            .collect();

        scalar_flux
            .par_chunks_mut(nf)
            .enumerate()
            .for_each(|(r, phi)| {
                for (h, value) in phi.iter_mut().enumerate() {
                    *value *= region_ratios[r * nc + self.groups.cmfd_group(h)];
                }
            });

        if let Some(moments) = flux_moments {
            if moments.len() != num_regions * nf * 3 {
                return Err(CmfdError::IndexOutOfBounds {
                    what: "flux moments",
                    index: moments.len(),
                    len: num_regions * nf * 3,
                });
            }
            moments
                .par_chunks_mut(nf * 3)
                .enumerate()
                .for_each(|(r, m)| {
                    for (h, axes) in m.chunks_mut(3).enumerate() {
                        let ratio = region_ratios[r * nc + self.groups.cmfd_group(h)];
                        for v in axes {
                            *v *= ratio;
                        }
                    }
                });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cmfd_math::sparse::CsrBuilder;
    use cmfd_types::constants::NUM_FACES;
    use cmfd_types::material::BoundaryType;

    fn lattice() -> Lattice {
        Lattice::uniform([3, 3, 1], [3.0, 3.0, 1.0], [BoundaryType::Vacuum; NUM_FACES], false)
            .unwrap()
    }

    #[test]
    fn test_stencil_sorted_and_truncated() {
        let l = lattice();
        // Region in the centre cell, slightly toward +x.
        let s = KNearestStencils::generate(&l, &[[1.6, 1.5, 0.0]], &[4], 3).unwrap();
        let st = s.stencil(0);
        assert_eq!(st.len(), 3);
        assert_eq!(st[0].0, 4);
        assert_eq!(st[1].0, 5);
        assert!(st.windows(2).all(|w| w[0].1 <= w[1].1));
    }

    #[test]
    fn test_corner_stencil_stays_in_domain() {
        let l = lattice();
        let s = KNearestStencils::generate(&l, &[[0.1, 0.1, 0.0]], &[0], 9).unwrap();
        assert_eq!(s.stencil(0).len(), 4);
    }

    #[test]
    fn test_uniform_ratio_is_preserved() {
        let l = lattice();
        let s = KNearestStencils::generate(&l, &[[1.2, 1.7, 0.0]], &[4], 5).unwrap();
        let ratios = Array2::from_elem((9, 2), 1.3);
        assert!((s.update_ratio(0, 4, &ratios, 1) - 1.3).abs() < 1e-14);
    }

    #[test]
    fn test_single_entry_stencil_uses_own_cell() {
        let l = lattice();
        let s = KNearestStencils::generate(&l, &[[1.5, 1.5, 0.0]], &[4], 1).unwrap();
        let mut ratios = Array2::ones((9, 1));
        ratios[[4, 0]] = 2.0;
        assert_eq!(s.update_ratio(0, 4, &ratios, 0), 2.0);
    }

    #[test]
    fn test_flux_ratio_guard() {
        let old = Array2::from_shape_vec((1, 2), vec![0.0, 2.0]).unwrap();
        let new = Array2::from_shape_vec((1, 2), vec![5.0, 3.0]).unwrap();
        let r = compute_flux_ratio(&old, &new);
        assert_eq!(r[[0, 0]], 1.0);
        assert_eq!(r[[0, 1]], 1.5);
    }

    #[test]
    fn test_rescale_matches_production() {
        let mut b = CsrBuilder::new_square(2);
        b.add(0, 0, 0.5);
        b.add(0, 1, 0.25);
        let m = b.build();
        let old = [2.0, 4.0];
        let mut new = [1.0, 1.0];
        let f = rescale_flux(&m, &old, &mut new);
        assert!((f - 2.0 / 0.75).abs() < 1e-14);
        assert!((0.5 * new[0] + 0.25 * new[1] - 2.0).abs() < 1e-14);
        // Idempotent once matched.
        let f2 = rescale_flux(&m, &old, &mut new);
        assert!((f2 - 1.0).abs() < 1e-14);
    }

    #[test]
    fn test_update_moc_flux_own_cell() {
        let groups = GroupMap::explicit(&[vec![0, 1], vec![2]], 3).unwrap();
        let cells = [0usize, 1];
        let map = FineFluxMap {
            region_cells: &cells,
            groups: &groups,
            stencils: None,
        };
        let ratios = Array2::from_shape_vec((2, 2), vec![2.0, 3.0, 0.5, 1.0]).unwrap();
        let mut flux = vec![1.0; 6];
        let mut moments = vec![1.0; 18];
        map.update_moc_flux(&ratios, &mut flux, Some(&mut moments)).unwrap();
        assert_eq!(flux, vec![2.0, 2.0, 3.0, 0.5, 0.5, 1.0]);
        assert_eq!(&moments[6..9], &[3.0, 3.0, 3.0]);
        assert_eq!(moments[9], 0.5);
        assert!(map.update_moc_flux(&ratios, &mut flux[..5], None).is_err());
    }
}
