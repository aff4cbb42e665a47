// ─────────────────────────────────────────────────────────────────────
// SCPN CMFD — Material
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Fine-group macroscopic cross sections as handed over by the material
//! catalog, plus the boundary tags used on exterior lattice faces.

use crate::error::{CmfdError, CmfdResult};
use serde::{Deserialize, Serialize};

/// Boundary condition on an exterior lattice face.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BoundaryType {
    #[default]
    Vacuum,
    Reflective,
    Periodic,
}

/// Multi-group macroscopic cross sections of one material [1/cm].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Material {
    pub name: String,
    /// Total cross section per fine group.
    pub sigma_t: Vec<f64>,
    /// Transport-corrected total cross section. Falls back to `sigma_t`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sigma_tr: Option<Vec<f64>>,
    /// Scattering matrix, row-major `[from * G + to]`.
    pub sigma_s: Vec<f64>,
    pub nu_sigma_f: Vec<f64>,
    /// Fission emission spectrum.
    pub chi: Vec<f64>,
}

impl Material {
    pub fn new(
        name: &str,
        sigma_t: Vec<f64>,
        sigma_s: Vec<f64>,
        nu_sigma_f: Vec<f64>,
        chi: Vec<f64>,
    ) -> CmfdResult<Self> {
        let material = Material {
            name: name.to_string(),
            sigma_t,
            sigma_tr: None,
            sigma_s,
            nu_sigma_f,
            chi,
        };
        material.validate()?;
        Ok(material)
    }

    /// Attach a transport-corrected total cross section.
    pub fn with_transport_xs(mut self, sigma_tr: Vec<f64>) -> CmfdResult<Self> {
        self.sigma_tr = Some(sigma_tr);
        self.validate()?;
        Ok(self)
    }

    pub fn num_groups(&self) -> usize {
        self.sigma_t.len()
    }

    #[inline]
    pub fn sigma_s(&self, from: usize, to: usize) -> f64 {
        self.sigma_s[from * self.num_groups() + to]
    }

    /// Cross section used for diffusion coefficients: 1 / (3 Σtr).
    #[inline]
    pub fn transport_xs(&self, group: usize) -> f64 {
        match &self.sigma_tr {
            Some(tr) => tr[group],
            None => self.sigma_t[group],
        }
    }

    /// Σt minus all out-scatter (including self-scatter).
    pub fn sigma_a(&self, group: usize) -> f64 {
        let ng = self.num_groups();
        let scatter: f64 = (0..ng).map(|to| self.sigma_s(group, to)).sum();
        self.sigma_t[group] - scatter
    }

    pub fn is_fissionable(&self) -> bool {
        self.nu_sigma_f.iter().any(|&v| v > 0.0)
    }

    pub fn validate(&self) -> CmfdResult<()> {
        let ng = self.num_groups();
        if ng == 0 {
            return Err(CmfdError::ConfigError(format!(
                "Material '{}' has no energy groups",
                self.name
            )));
        }
        if self.sigma_s.len() != ng * ng {
            return Err(CmfdError::ConfigError(format!(
                "Material '{}': scattering matrix has {} entries, expected {}",
                self.name,
                self.sigma_s.len(),
                ng * ng
            )));
        }
        if self.nu_sigma_f.len() != ng || self.chi.len() != ng {
            return Err(CmfdError::ConfigError(format!(
                "Material '{}': nu_sigma_f/chi must have {ng} groups",
                self.name
            )));
        }
        if let Some(tr) = &self.sigma_tr {
            if tr.len() != ng {
                return Err(CmfdError::ConfigError(format!(
                    "Material '{}': sigma_tr must have {ng} groups",
                    self.name
                )));
            }
            if tr.iter().any(|&v| !v.is_finite() || v <= 0.0) {
                return Err(CmfdError::PhysicsViolation(format!(
                    "Material '{}': sigma_tr must be finite and > 0",
                    self.name
                )));
            }
        }
        if self.sigma_t.iter().any(|&v| !v.is_finite() || v <= 0.0) {
            return Err(CmfdError::PhysicsViolation(format!(
                "Material '{}': sigma_t must be finite and > 0",
                self.name
            )));
        }
        let all = self
            .sigma_s
            .iter()
            .chain(self.nu_sigma_f.iter())
            .chain(self.chi.iter());
        for &v in all {
            if !v.is_finite() || v < 0.0 {
                return Err(CmfdError::PhysicsViolation(format!(
                    "Material '{}': cross sections must be finite and >= 0",
                    self.name
                )));
            }
        }
        Ok(())
    }
}
