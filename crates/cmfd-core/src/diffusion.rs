// ─────────────────────────────────────────────────────────────────────
// SCPN CMFD — Surface Diffusion Coefficients
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Finite-difference surface coupling and the nonlinear current correction.
//!
//! For a face between cells `i` and `n` the coarse current in the positive
//! axis direction is written as
//!
//! ```text
//! J = -sense · D̃ · (φ_n − φ_i) − D̂ · (φ_n + φ_i)
//! ```
//!
//! where `D̃` is the harmonic-mean coupling and `D̂` is chosen so that `J`
//! reproduces the current tallied by the transport sweep.

use crate::collapse::CollapsedXs;
use crate::lattice::{face_sense, opposite_face, Lattice};
use crate::quadrature::Quadrature;
use cmfd_types::constants::NUM_SURFACES;
use cmfd_types::error::{CmfdError, CmfdResult};
use cmfd_types::material::BoundaryType;
use ndarray::Array2;

/// Directions over which the Larsen factor is averaged: cosine to the
/// surface normal and normalized weight.
#[derive(Debug, Clone)]
pub struct AngularSet {
    mus: Vec<f64>,
    weights: Vec<f64>,
}

impl AngularSet {
    /// Half-space polar set of the first azimuthal angle.
    pub fn polar(quadrature: &dyn Quadrature) -> CmfdResult<Self> {
        let half = quadrature.num_polar() / 2;
        let mut mus = Vec::with_capacity(half);
        let mut weights = Vec::with_capacity(half);
        for p in 0..half {
            mus.push(cos_from_sin(quadrature.sin_theta(0, p)));
            weights.push(quadrature.polar_weight(0, p));
        }
        Self::normalized(mus, weights)
    }

    /// Full 3D set: every first-quadrant azimuthal angle and upper polar
    /// angle, weighted by track weight over track spacing.
    pub fn with_spacings(
        quadrature: &dyn Quadrature,
        azim_spacings: &[f64],
        polar_spacings: &[Vec<f64>],
    ) -> CmfdResult<Self> {
        let half = quadrature.num_polar() / 2;
        let mut mus = Vec::new();
        let mut weights = Vec::new();
        for (a, &da) in azim_spacings.iter().enumerate() {
            let row = polar_spacings.get(a).ok_or(CmfdError::IndexOutOfBounds {
                what: "polar spacing row",
                index: a,
                len: polar_spacings.len(),
            })?;
            for p in 0..half {
                let dp = row.get(p).copied().ok_or(CmfdError::IndexOutOfBounds {
                    what: "polar spacing",
                    index: p,
                    len: row.len(),
                })?;
                mus.push(cos_from_sin(quadrature.sin_theta(a, p)));
                weights.push(quadrature.weight(a, p) / (da * dp));
            }
        }
        Self::normalized(mus, weights)
    }

    fn normalized(mus: Vec<f64>, mut weights: Vec<f64>) -> CmfdResult<Self> {
        let total: f64 = weights.iter().sum();
        if !(total > 0.0 && total.is_finite()) {
            return Err(CmfdError::ConfigError(format!(
                "Angular weights for the diffusion correction sum to {total}"
            )));
        }
        for w in &mut weights {
            *w /= total;
        }
        Ok(AngularSet { mus, weights })
    }

    pub fn len(&self) -> usize {
        self.mus.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mus.is_empty()
    }
}

#[inline]
fn cos_from_sin(sin_theta: f64) -> f64 {
    (1.0 - sin_theta * sin_theta).max(0.0).sqrt()
}

/// Larsen's effective diffusion coefficient factor for a cell of thickness
/// `delta`. Always ≥ 1, tends to 1 for optically thin cells.
pub fn larsen_edc_factor(dif_coef: f64, delta: f64, angles: &AngularSet) -> f64 {
    let mut rho = 0.0;
    for (&mu, &w) in angles.mus.iter().zip(angles.weights.iter()) {
        if mu <= 0.0 {
            continue;
        }
        let x = delta / (3.0 * dif_coef * mu);
        // coth(x/2) - 2/x, series below 1e-3 to avoid cancellation
        let alpha = if x < 1e-3 {
            x / 6.0 - x * x * x / 360.0
        } else {
            1.0 / (0.5 * x).tanh() - 2.0 / x
        };
        rho += 2.0 * mu * w * alpha;
    }
    1.0 + delta * rho / (2.0 * dif_coef)
}

/// Coupling terms of one face: finite-difference coefficient `D̃` and
/// nonlinear correction `D̂`.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SurfaceCoupling {
    pub dif_surf: f64,
    pub dif_surf_corr: f64,
}

/// Everything needed to evaluate face couplings in one outer iteration.
pub struct DiffusionContext<'a> {
    pub lattice: &'a Lattice,
    pub xs: &'a CollapsedXs,
    /// Collapsed flux `[cell, group]` the correction is fitted to.
    pub flux: &'a Array2<f64>,
    /// Split currents, flat `(cell, surface, group)`.
    pub currents: &'a [f64],
    /// `None` disables the Larsen factor.
    pub angles: Option<&'a AngularSet>,
    /// Outer transport iteration; 0 means no currents have been tallied yet.
    pub moc_iteration: usize,
}

impl DiffusionContext<'_> {
    pub fn num_groups(&self) -> usize {
        self.xs.num_groups()
    }

    #[inline]
    fn current(&self, cell: usize, surface: usize, group: usize) -> f64 {
        self.currents[(cell * NUM_SURFACES + surface) * self.num_groups() + group]
    }

    fn effective_diffusion(&self, cell: usize, group: usize, delta: f64) -> f64 {
        let d = self.xs.diffusion[[cell, group]];
        match self.angles {
            Some(angles) => d * larsen_edc_factor(d, delta, angles),
            None => d,
        }
    }

    /// Coupling of `face` of `cell` in `group`.
    pub fn surface_coupling(&self, cell: usize, face: usize, group: usize) -> SurfaceCoupling {
        let lattice = self.lattice;
        let sense = face_sense(face);
        let area = lattice.surface_area(cell, face);
        let delta = lattice.perpendicular_width(cell, face);
        let d = self.effective_diffusion(cell, group, delta);
        let phi = self.flux[[cell, group]];
        let next = lattice.cell_next(cell, face);

        let Some(next) = next else {
            return match lattice.boundary(face) {
                BoundaryType::Reflective => SurfaceCoupling::default(),
                // A periodic face always has a neighbour; treat a
                // missing one like vacuum.
                BoundaryType::Vacuum | BoundaryType::Periodic => {
                    let dif_surf = 2.0 * d / delta / (1.0 + 4.0 * d / delta);
                    let dif_surf_corr = if self.moc_iteration == 0 || phi <= 0.0 {
                        0.0
                    } else {
                        let current = sense * self.current(cell, face, group) / area;
                        (sense * dif_surf * phi - current) / phi
                    };
                    SurfaceCoupling {
                        dif_surf,
                        dif_surf_corr,
                    }
                }
            };
        };

        let delta_next = lattice.perpendicular_width(next, face);
        let d_next = self.effective_diffusion(next, group, delta_next);
        let phi_next = self.flux[[next, group]];
        let mut dif_surf = 2.0 * d * d_next / (d * delta_next + d_next * delta);
        if self.moc_iteration == 0 || phi + phi_next <= 0.0 {
            return SurfaceCoupling {
                dif_surf,
                dif_surf_corr: 0.0,
            };
        }

        let out = self.current(cell, face, group);
        let inc = self.current(next, opposite_face(face), group);
        let current = sense * (out - inc) / area;
        let mut dif_surf_corr =
            -(sense * dif_surf * (phi_next - phi) + current) / (phi_next + phi);

        // Keep the coarse operator an M-matrix when the correction dominates.
        if dif_surf_corr.abs() > dif_surf {
            let sign = dif_surf_corr.signum();
            dif_surf = if sense == sign {
                (current / (2.0 * phi_next)).abs()
            } else {
                (current / (2.0 * phi)).abs()
            };
            dif_surf_corr = sign * dif_surf;
        }
        SurfaceCoupling {
            dif_surf,
            dif_surf_corr,
        }
    }

    /// `D̂` if `correction`, otherwise `D̃`.
    pub fn surface_diffusion_coefficient(
        &self,
        cell: usize,
        face: usize,
        group: usize,
        correction: bool,
    ) -> f64 {
        let c = self.surface_coupling(cell, face, group);
        if correction {
            c.dif_surf_corr
        } else {
            c.dif_surf
        }
    }
}
