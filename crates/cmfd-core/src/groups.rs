// ─────────────────────────────────────────────────────────────────────
// SCPN CMFD — Energy Group Condensation Map
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Fine (transport) to coarse (CMFD) energy group mapping.
//!
//! Coarse groups are contiguous, ordered runs of fine groups: the map is
//! total over the fine groups and monotonically non-decreasing.

use cmfd_types::error::{CmfdError, CmfdResult};
use std::ops::Range;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupMap {
    /// Coarse group of every fine group.
    coarse_of: Vec<usize>,
    /// First fine group of every coarse group, plus the end sentinel.
    starts: Vec<usize>,
}

impl GroupMap {
    /// One coarse group per fine group.
    pub fn automatic(num_fine: usize) -> CmfdResult<Self> {
        let starts: Vec<usize> = (0..num_fine).collect();
        Self::from_boundaries(num_fine, &starts)
    }

    /// Explicit structure: `groups[G]` lists the fine groups of coarse group
    /// `G`. The concatenation must be exactly `0..num_fine` in order.
    pub fn explicit(groups: &[Vec<usize>], num_fine: usize) -> CmfdResult<Self> {
        let mut expected = 0usize;
        let mut starts = Vec::with_capacity(groups.len());
        for (coarse, fine) in groups.iter().enumerate() {
            if fine.is_empty() {
                return Err(CmfdError::ConfigError(format!(
                    "Coarse group {coarse} contains no fine groups"
                )));
            }
            starts.push(expected);
            for &g in fine {
                if g != expected {
                    return Err(CmfdError::ConfigError(format!(
                        "Coarse group {coarse}: expected fine group {expected}, found {g} \
                         (groups must be contiguous and ordered)"
                    )));
                }
                expected += 1;
            }
        }
        if expected != num_fine {
            return Err(CmfdError::ConfigError(format!(
                "Group structure covers {expected} fine groups, transport has {num_fine}"
            )));
        }
        Self::from_boundaries(num_fine, &starts)
    }

    /// Coarse groups starting at the given fine groups; `starts[0]` must be 0.
    pub fn from_boundaries(num_fine: usize, starts: &[usize]) -> CmfdResult<Self> {
        if num_fine == 0 {
            return Err(CmfdError::ConfigError(
                "At least one fine group is required".to_string(),
            ));
        }
        if starts.first() != Some(&0) {
            return Err(CmfdError::ConfigError(
                "First coarse group must start at fine group 0".to_string(),
            ));
        }
        if starts.windows(2).any(|w| w[1] <= w[0]) || starts.iter().any(|&s| s >= num_fine) {
            return Err(CmfdError::ConfigError(format!(
                "Coarse group boundaries {starts:?} must increase strictly within 0..{num_fine}"
            )));
        }
        let mut bounds = starts.to_vec();
        bounds.push(num_fine);
        let mut coarse_of = vec![0; num_fine];
        for (coarse, w) in bounds.windows(2).enumerate() {
            for slot in &mut coarse_of[w[0]..w[1]] {
                *slot = coarse;
            }
        }
        Ok(GroupMap {
            coarse_of,
            starts: bounds,
        })
    }

    /// Build from an optional explicit structure, falling back to one-to-one.
    pub fn from_structure(structure: Option<&[Vec<usize>]>, num_fine: usize) -> CmfdResult<Self> {
        match structure {
            Some(groups) => Self::explicit(groups, num_fine),
            None => Self::automatic(num_fine),
        }
    }

    #[inline]
    pub fn cmfd_group(&self, fine: usize) -> usize {
        self.coarse_of[fine]
    }

    /// Fine groups collapsed into `coarse`.
    pub fn fine_range(&self, coarse: usize) -> Range<usize> {
        self.starts[coarse]..self.starts[coarse + 1]
    }

    pub fn num_fine_groups(&self) -> usize {
        self.coarse_of.len()
    }

    pub fn num_coarse_groups(&self) -> usize {
        self.starts.len() - 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_automatic_is_identity() {
        let m = GroupMap::automatic(4).unwrap();
        assert_eq!(m.num_coarse_groups(), 4);
        for g in 0..4 {
            assert_eq!(m.cmfd_group(g), g);
            assert_eq!(m.fine_range(g), g..g + 1);
        }
    }

    #[test]
    fn test_explicit_structure() {
        let m = GroupMap::explicit(&[vec![0, 1, 2], vec![3, 4, 5, 6]], 7).unwrap();
        assert_eq!(m.num_coarse_groups(), 2);
        assert_eq!(m.num_fine_groups(), 7);
        assert_eq!(m.cmfd_group(2), 0);
        assert_eq!(m.cmfd_group(3), 1);
        assert_eq!(m.fine_range(1), 3..7);
    }

    #[test]
    fn test_rejects_gaps_and_reordering() {
        assert!(GroupMap::explicit(&[vec![0, 2], vec![1]], 3).is_err());
        assert!(GroupMap::explicit(&[vec![0], vec![2]], 3).is_err());
        assert!(GroupMap::explicit(&[vec![0, 1]], 3).is_err());
        assert!(GroupMap::explicit(&[vec![0], vec![]], 1).is_err());
    }

    #[test]
    fn test_from_boundaries_validation() {
        assert!(GroupMap::from_boundaries(5, &[0, 2]).is_ok());
        assert!(GroupMap::from_boundaries(5, &[1, 2]).is_err());
        assert!(GroupMap::from_boundaries(5, &[0, 2, 2]).is_err());
        assert!(GroupMap::from_boundaries(5, &[0, 5]).is_err());
        assert!(GroupMap::from_boundaries(0, &[0]).is_err());
    }
}
