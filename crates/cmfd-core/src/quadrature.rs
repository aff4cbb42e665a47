// ─────────────────────────────────────────────────────────────────────
// SCPN CMFD — Angular Quadrature
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Angular quadrature seen by the accelerator.
//!
//! The transport solver owns the quadrature; CMFD only reads combined track
//! weights (to tally currents), polar sines and polar weights (for the
//! Larsen diffusion correction).

use cmfd_types::error::{CmfdError, CmfdResult};
use std::f64::consts::PI;

pub trait Quadrature: Send + Sync {
    fn num_azim(&self) -> usize;

    /// Total number of polar angles over both half spaces.
    fn num_polar(&self) -> usize;

    /// Combined azimuthal × polar × spacing weight of a track direction.
    fn weight(&self, azim: usize, polar: usize) -> f64;

    fn sin_theta(&self, azim: usize, polar: usize) -> f64;

    fn polar_weight(&self, azim: usize, polar: usize) -> f64;
}

/// Tabuchi-Yamamoto polar sets, half space.
const TY_SIN_THETA: [&[f64]; 3] = [
    &[0.798184],
    &[0.363900, 0.899900],
    &[0.166648, 0.537707, 0.932954],
];
const TY_WEIGHTS: [&[f64]; 3] = [
    &[1.0],
    &[0.212854, 0.787146],
    &[0.046233, 0.283619, 0.670148],
];

/// Product quadrature with uniform azimuthal weights and a tabulated polar set.
#[derive(Debug, Clone)]
pub struct TabulatedQuadrature {
    num_azim: usize,
    /// Per polar index over both half spaces.
    sin_theta: Vec<f64>,
    polar_weights: Vec<f64>,
    /// Per azimuthal index in the half circle.
    azim_weights: Vec<f64>,
    azim_spacing: f64,
}

impl TabulatedQuadrature {
    /// `num_azim` must be a multiple of 4, `num_polar` one of 2, 4, 6.
    pub fn tabuchi_yamamoto(num_azim: usize, num_polar: usize, azim_spacing: f64) -> CmfdResult<Self> {
        if num_azim == 0 || num_azim % 4 != 0 {
            return Err(CmfdError::ConfigError(format!(
                "Number of azimuthal angles must be a positive multiple of 4, got {num_azim}"
            )));
        }
        let half = num_polar / 2;
        if num_polar % 2 != 0 || !(1..=3).contains(&half) {
            return Err(CmfdError::ConfigError(format!(
                "Tabuchi-Yamamoto supports 2, 4 or 6 polar angles, got {num_polar}"
            )));
        }
        if !azim_spacing.is_finite() || azim_spacing <= 0.0 {
            return Err(CmfdError::ConfigError(format!(
                "Azimuthal spacing must be finite > 0, got {azim_spacing}"
            )));
        }
        Self::from_half_space(
            num_azim,
            TY_SIN_THETA[half - 1],
            TY_WEIGHTS[half - 1],
            azim_spacing,
        )
    }

    /// Arbitrary half-space polar set, mirrored into the lower half.
    pub fn from_half_space(
        num_azim: usize,
        sin_theta: &[f64],
        polar_weights: &[f64],
        azim_spacing: f64,
    ) -> CmfdResult<Self> {
        if sin_theta.is_empty() || sin_theta.len() != polar_weights.len() {
            return Err(CmfdError::ConfigError(
                "Polar sines and weights must be non-empty and equally long".to_string(),
            ));
        }
        if sin_theta.iter().any(|s| !(*s > 0.0 && *s <= 1.0)) {
            return Err(CmfdError::ConfigError(
                "Polar sines must lie in (0, 1]".to_string(),
            ));
        }
        let mirror = |v: &[f64]| -> Vec<f64> { v.iter().rev().chain(v.iter()).copied().collect() };
        let half_azim = (num_azim / 2).max(1);
        Ok(TabulatedQuadrature {
            num_azim,
            sin_theta: mirror(sin_theta),
            polar_weights: mirror(polar_weights),
            azim_weights: vec![1.0 / half_azim as f64; half_azim],
            azim_spacing,
        })
    }
}

impl Quadrature for TabulatedQuadrature {
    fn num_azim(&self) -> usize {
        self.num_azim
    }

    fn num_polar(&self) -> usize {
        self.sin_theta.len()
    }

    fn weight(&self, azim: usize, polar: usize) -> f64 {
        4.0 * PI
            * self.azim_weights[azim % self.azim_weights.len()]
            * self.polar_weights[polar]
            * self.azim_spacing
            * self.sin_theta[polar]
    }

    fn sin_theta(&self, _azim: usize, polar: usize) -> f64 {
        self.sin_theta[polar]
    }

    fn polar_weight(&self, _azim: usize, polar: usize) -> f64 {
        self.polar_weights[polar]
    }
}
