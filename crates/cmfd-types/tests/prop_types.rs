// ─────────────────────────────────────────────────────────────────────
// SCPN CMFD — Property-Based Tests (proptest) for cmfd-types
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Property-based tests for cmfd-types using proptest.
//!
//! Covers: lattice width partitioning, configuration serialization
//! roundtrip, material absorption bookkeeping.

use cmfd_types::config::{CmfdConfig, LatticeConfig};
use cmfd_types::material::Material;
use proptest::prelude::*;

// ── Lattice Width Invariants ─────────────────────────────────────────

proptest! {
    /// Uniform cell widths partition the full axis without gaps.
    #[test]
    fn uniform_widths_partition_axis(
        num_x in 1usize..64,
        num_y in 1usize..64,
        width_x in 0.1f64..500.0,
        width_y in 0.1f64..500.0,
    ) {
        let lattice = LatticeConfig {
            num_x,
            num_y,
            width_x,
            width_y,
            ..LatticeConfig::default()
        };
        prop_assert!(lattice.validate().is_ok());

        let wx = lattice.cell_widths(0);
        let wy = lattice.cell_widths(1);
        prop_assert_eq!(wx.len(), num_x);
        prop_assert_eq!(wy.len(), num_y);
        prop_assert!((wx.iter().sum::<f64>() - width_x).abs() < 1e-9 * width_x.max(1.0));
        prop_assert!((wy.iter().sum::<f64>() - width_y).abs() < 1e-9 * width_y.max(1.0));
    }

    /// A valid configuration survives a JSON roundtrip unchanged.
    #[test]
    fn config_json_roundtrip(
        num_x in 1usize..16,
        num_y in 1usize..16,
        omega in 0.05f64..1.95,
        k_nearest in 1usize..=9,
        groups in 1usize..12,
    ) {
        let mut cfg = CmfdConfig::default();
        cfg.lattice.num_x = num_x;
        cfg.lattice.num_y = num_y;
        cfg.solver.sor_factor = omega;
        cfg.k_nearest = k_nearest;
        cfg.num_moc_groups = groups;

        let json = serde_json::to_string(&cfg).unwrap();
        let back = CmfdConfig::from_json_str(&json).unwrap();
        prop_assert_eq!(back.lattice.num_x, num_x);
        prop_assert_eq!(back.lattice.num_y, num_y);
        prop_assert_eq!(back.k_nearest, k_nearest);
        prop_assert_eq!(back.num_moc_groups, groups);
        prop_assert!((back.solver.sor_factor - omega).abs() < 1e-15);
    }
}

// ── Material Invariants ──────────────────────────────────────────────

proptest! {
    /// Absorption plus total out-scatter reproduces the total cross section.
    #[test]
    fn absorption_plus_scatter_is_total(
        sigma_t in proptest::collection::vec(0.1f64..5.0, 1..6),
        scatter_fraction in 0.0f64..0.99,
    ) {
        let ng = sigma_t.len();
        let mut sigma_s = vec![0.0; ng * ng];
        for from in 0..ng {
            let per_group = scatter_fraction * sigma_t[from] / ng as f64;
            for to in 0..ng {
                sigma_s[from * ng + to] = per_group;
            }
        }
        let m = Material::new("m", sigma_t.clone(), sigma_s, vec![0.0; ng], vec![0.0; ng])
            .unwrap();
        for g in 0..ng {
            let out: f64 = (0..ng).map(|to| m.sigma_s(g, to)).sum();
            prop_assert!((m.sigma_a(g) + out - sigma_t[g]).abs() < 1e-12);
            prop_assert!(m.sigma_a(g) >= 0.0);
        }
    }
}
