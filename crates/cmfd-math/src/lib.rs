//! Sparse linear algebra primitives for SCPN CMFD.

pub mod linalg;
pub mod sor;
pub mod sparse;
