// ─────────────────────────────────────────────────────────────────────
// SCPN CMFD — Config
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
use crate::constants::{MAX_STENCIL_2D, MAX_STENCIL_3D, NUM_FACES};
use crate::error::{CmfdError, CmfdResult};
use crate::material::BoundaryType;
use serde::{Deserialize, Serialize};

/// Top-level CMFD accelerator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CmfdConfig {
    pub lattice: LatticeConfig,
    /// Exterior faces in order x-min, y-min, z-min, x-max, y-max, z-max.
    #[serde(default)]
    pub boundaries: [BoundaryType; NUM_FACES],
    #[serde(default)]
    pub solver: SolverConfig,
    /// Number of fine (transport) energy groups.
    pub num_moc_groups: usize,
    /// Fine groups (0-based) per coarse group. `None` maps one-to-one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_structure: Option<Vec<Vec<usize>>>,
    #[serde(default = "default_true")]
    pub flux_update_on: bool,
    #[serde(default)]
    pub centroid_update_on: bool,
    #[serde(default = "default_k_nearest")]
    pub k_nearest: usize,
    #[serde(default)]
    pub solve_3d: bool,
    /// Apply Larsen's effective diffusion coefficient factor.
    #[serde(default = "default_true")]
    pub larsen_edc: bool,
    /// Track spacing per azimuthal angle in the first quadrant [cm].
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub azim_spacings: Vec<f64>,
    /// Polar track spacing `[azim][polar]` for 3D tracks [cm].
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub polar_spacings: Vec<Vec<f64>>,
}

/// Coarse mesh dimensions. Widths are for the full domain along each axis
/// unless explicit per-cell widths are supplied.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LatticeConfig {
    pub num_x: usize,
    pub num_y: usize,
    #[serde(default = "default_one_usize")]
    pub num_z: usize,
    pub width_x: f64,
    pub width_y: f64,
    /// Axial extent; 1.0 in 2D so surface "areas" are lengths.
    #[serde(default = "default_one_f64")]
    pub width_z: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub widths_x: Option<Vec<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub widths_y: Option<Vec<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub widths_z: Option<Vec<f64>>,
    /// Lower corner of the mesh in geometry coordinates.
    #[serde(default)]
    pub offset: [f64; 3],
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolverConfig {
    /// Gauss-Seidel SOR relaxation factor, in (0, 2).
    #[serde(default = "default_sor_factor")]
    pub sor_factor: f64,
    /// Relative RMS fission source change that ends power iteration.
    #[serde(default = "default_source_threshold")]
    pub source_convergence_threshold: f64,
}

fn default_true() -> bool {
    true
}
fn default_k_nearest() -> usize {
    3
}
fn default_one_usize() -> usize {
    1
}
fn default_one_f64() -> f64 {
    1.0
}
fn default_sor_factor() -> f64 {
    1.5
}
fn default_source_threshold() -> f64 {
    1e-7
}

impl Default for SolverConfig {
    fn default() -> Self {
        SolverConfig {
            sor_factor: default_sor_factor(),
            source_convergence_threshold: default_source_threshold(),
        }
    }
}

impl Default for LatticeConfig {
    fn default() -> Self {
        LatticeConfig {
            num_x: 1,
            num_y: 1,
            num_z: 1,
            width_x: 1.0,
            width_y: 1.0,
            width_z: 1.0,
            widths_x: None,
            widths_y: None,
            widths_z: None,
            offset: [0.0; 3],
        }
    }
}

impl Default for CmfdConfig {
    fn default() -> Self {
        CmfdConfig {
            lattice: LatticeConfig::default(),
            boundaries: [BoundaryType::Vacuum; NUM_FACES],
            solver: SolverConfig::default(),
            num_moc_groups: 1,
            group_structure: None,
            flux_update_on: true,
            centroid_update_on: false,
            k_nearest: default_k_nearest(),
            solve_3d: false,
            larsen_edc: true,
            azim_spacings: Vec::new(),
            polar_spacings: Vec::new(),
        }
    }
}

impl LatticeConfig {
    /// Per-cell widths along `axis` (0 = x, 1 = y, 2 = z).
    pub fn cell_widths(&self, axis: usize) -> Vec<f64> {
        let (num, width, explicit) = match axis {
            0 => (self.num_x, self.width_x, &self.widths_x),
            1 => (self.num_y, self.width_y, &self.widths_y),
            _ => (self.num_z, self.width_z, &self.widths_z),
        };
        match explicit {
            Some(w) => w.clone(),
            None => vec![width / num.max(1) as f64; num],
        }
    }

    pub fn validate(&self) -> CmfdResult<()> {
        for (axis, (num, width)) in [
            (self.num_x, self.width_x),
            (self.num_y, self.width_y),
            (self.num_z, self.width_z),
        ]
        .into_iter()
        .enumerate()
        {
            if num == 0 {
                return Err(CmfdError::ConfigError(format!(
                    "Lattice axis {axis} must have at least one cell"
                )));
            }
            if !width.is_finite() || width <= 0.0 {
                return Err(CmfdError::ConfigError(format!(
                    "Lattice axis {axis} width must be finite > 0, got {width}"
                )));
            }
            let widths = self.cell_widths(axis);
            if widths.len() != num {
                return Err(CmfdError::ConfigError(format!(
                    "Lattice axis {axis}: {} explicit widths for {num} cells",
                    widths.len()
                )));
            }
            if widths.iter().any(|w| !w.is_finite() || *w <= 0.0) {
                return Err(CmfdError::ConfigError(format!(
                    "Lattice axis {axis}: cell widths must be finite > 0"
                )));
            }
        }
        if self.offset.iter().any(|v| !v.is_finite()) {
            return Err(CmfdError::ConfigError(
                "Lattice offset must be finite".to_string(),
            ));
        }
        Ok(())
    }
}

impl CmfdConfig {
    /// Load from a JSON file.
    pub fn from_file(path: &str) -> CmfdResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    pub fn from_json_str(json: &str) -> CmfdResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> CmfdResult<()> {
        self.lattice.validate()?;
        if !self.solve_3d && self.lattice.num_z != 1 {
            return Err(CmfdError::ConfigError(format!(
                "2D CMFD requires num_z = 1, got {}",
                self.lattice.num_z
            )));
        }
        let omega = self.solver.sor_factor;
        if !omega.is_finite() || omega <= 0.0 || omega >= 2.0 {
            return Err(CmfdError::ConfigError(format!(
                "SOR factor must be in (0, 2), got {omega}"
            )));
        }
        let thresh = self.solver.source_convergence_threshold;
        if !thresh.is_finite() || thresh <= 0.0 {
            return Err(CmfdError::ConfigError(format!(
                "Source convergence threshold must be finite > 0, got {thresh}"
            )));
        }
        if self.num_moc_groups == 0 {
            return Err(CmfdError::ConfigError(
                "num_moc_groups must be >= 1".to_string(),
            ));
        }
        let max_k = if self.solve_3d {
            MAX_STENCIL_3D
        } else {
            MAX_STENCIL_2D
        };
        if self.k_nearest == 0 || self.k_nearest > max_k {
            return Err(CmfdError::ConfigError(format!(
                "k_nearest must be in 1..={max_k}, got {}",
                self.k_nearest
            )));
        }
        if !self.polar_spacings.is_empty() && self.polar_spacings.len() != self.azim_spacings.len()
        {
            return Err(CmfdError::ConfigError(format!(
                "polar_spacings has {} azimuthal rows, azim_spacings has {}",
                self.polar_spacings.len(),
                self.azim_spacings.len()
            )));
        }
        let spacings = self
            .azim_spacings
            .iter()
            .chain(self.polar_spacings.iter().flatten());
        for &s in spacings {
            if !s.is_finite() || s <= 0.0 {
                return Err(CmfdError::ConfigError(format!(
                    "Track spacings must be finite > 0, got {s}"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    /// CARGO_MANIFEST_DIR points to crates/cmfd-types/, the repo root is
    /// two levels up.
    fn config_path(relative: &str) -> String {
        PathBuf::from(env!("CARGO_MANIFEST_DIR"))
            .join("..")
            .join("..")
            .join(relative)
            .to_string_lossy()
            .to_string()
    }

    #[test]
    fn test_load_lattice_config() {
        let cfg = CmfdConfig::from_file(&config_path("configs/lattice_3x3.json")).unwrap();
        assert_eq!(cfg.lattice.num_x, 3);
        assert_eq!(cfg.lattice.num_y, 3);
        assert_eq!(cfg.lattice.num_z, 1);
        assert_eq!(cfg.num_moc_groups, 7);
        assert_eq!(cfg.group_structure.as_ref().map(|g| g.len()), Some(2));
        assert_eq!(cfg.boundaries[0], BoundaryType::Reflective);
        assert_eq!(cfg.boundaries[3], BoundaryType::Vacuum);
        assert!((cfg.solver.sor_factor - 1.5).abs() < 1e-12);
        assert!(cfg.centroid_update_on);
    }

    #[test]
    fn test_defaults_fill_missing_fields() {
        let json = r#"{
            "lattice": { "num_x": 2, "num_y": 2, "width_x": 4.0, "width_y": 4.0 },
            "num_moc_groups": 2
        }"#;
        let cfg = CmfdConfig::from_json_str(json).unwrap();
        assert_eq!(cfg.lattice.num_z, 1);
        assert_eq!(cfg.k_nearest, 3);
        assert!(cfg.flux_update_on);
        assert!(!cfg.centroid_update_on);
        assert!(cfg.larsen_edc);
        assert_eq!(cfg.boundaries, [BoundaryType::Vacuum; NUM_FACES]);
        assert_eq!(cfg.lattice.cell_widths(0), vec![2.0, 2.0]);
    }

    #[test]
    fn test_rejects_bad_sor_factor() {
        let mut cfg = CmfdConfig::default();
        cfg.solver.sor_factor = 2.0;
        match cfg.validate() {
            Err(CmfdError::ConfigError(msg)) => assert!(msg.contains("SOR")),
            other => panic!("Unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_rejects_zero_cells() {
        let mut cfg = CmfdConfig::default();
        cfg.lattice.num_y = 0;
        assert!(matches!(cfg.validate(), Err(CmfdError::ConfigError(_))));
    }

    #[test]
    fn test_rejects_2d_with_axial_cells() {
        let mut cfg = CmfdConfig::default();
        cfg.lattice.num_z = 4;
        assert!(cfg.validate().is_err());
        cfg.solve_3d = true;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_rejects_k_nearest_beyond_stencil() {
        let mut cfg = CmfdConfig::default();
        cfg.k_nearest = 10;
        assert!(cfg.validate().is_err());
        cfg.solve_3d = true;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_explicit_widths_must_match_cells() {
        let mut cfg = CmfdConfig::default();
        cfg.lattice.num_x = 2;
        cfg.lattice.widths_x = Some(vec![1.0, 2.0, 3.0]);
        assert!(cfg.validate().is_err());
        cfg.lattice.widths_x = Some(vec![1.0, 2.0]);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_roundtrip_serialization() {
        let cfg = CmfdConfig::from_file(&config_path("configs/lattice_3x3.json")).unwrap();
        let json = serde_json::to_string_pretty(&cfg).unwrap();
        let cfg2 = CmfdConfig::from_json_str(&json).unwrap();
        assert_eq!(cfg.lattice.num_x, cfg2.lattice.num_x);
        assert_eq!(cfg.boundaries, cfg2.boundaries);
        assert_eq!(cfg.group_structure, cfg2.group_structure);
    }
}
