// ─────────────────────────────────────────────────────────────────────
// SCPN CMFD — Constants
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
/// Faces per coarse cell (x-min, y-min, z-min, x-max, y-max, z-max).
pub const NUM_FACES: usize = 6;

/// Edges per coarse cell.
pub const NUM_EDGES: usize = 12;

/// Vertices per coarse cell.
pub const NUM_VERTICES: usize = 8;

/// Faces + edges + vertices. Surface currents are tallied on all of them.
pub const NUM_SURFACES: usize = NUM_FACES + NUM_EDGES + NUM_VERTICES;

/// Distance below which a point counts as lying on a cell surface [cm].
pub const ON_SURFACE_THRESH: f64 = 1e-12;

/// Floor applied to non-positive fluxes during Gauss-Seidel updates.
pub const FLUX_FLOOR: f64 = 1e-12;

/// Coarse fluxes below this are treated as zero when forming ratios.
pub const FLUX_RATIO_GUARD: f64 = 1e-30;

/// Outer (power iteration) cap for one `compute_keff` call.
pub const MAX_EIGEN_ITERATIONS: usize = 1000;

/// Inner (red-black SOR) cap for one linear solve.
pub const MAX_LINEAR_SOLVE_ITERATIONS: usize = 10_000;

/// Minimum inner sweeps before the linear residual is trusted.
pub const MIN_LINEAR_SOLVE_ITERATIONS: usize = 3;

/// Inner tolerance relative to the source convergence threshold.
pub const LINEAR_TOLERANCE_FACTOR: f64 = 1e-2;

/// Relative neutron imbalance reported as a warning.
pub const BALANCE_TOLERANCE: f64 = 1e-6;

/// Largest k-nearest stencil in 2D (3x3 neighbourhood).
pub const MAX_STENCIL_2D: usize = 9;

/// Largest k-nearest stencil in 3D (3x3x3 neighbourhood).
pub const MAX_STENCIL_3D: usize = 27;
