// ─────────────────────────────────────────────────────────────────────
// SCPN CMFD — Core
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Coarse Mesh Finite Difference (CMFD) acceleration.
//!
//! Tally → collapse → operator assembly → eigenvalue solve → prolongation.
//! [`cmfd::Cmfd`] ties the stages together; the remaining modules are usable
//! on their own.

pub mod balance;
pub mod cmfd;
pub mod collapse;
pub mod comm;
pub mod currents;
pub mod diffusion;
pub mod eigen;
pub mod groups;
pub mod lattice;
pub mod matrices;
pub mod prolongation;
pub mod quadrature;
pub mod tally;

pub use cmfd::{Cmfd, KeffResult};
