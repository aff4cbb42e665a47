// ─────────────────────────────────────────────────────────────────────
// SCPN CMFD — Reaction Tallies
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Per-thread reaction-rate tallies over coarse cells.
//!
//! One flat arena holds a slot per worker thread; every slot stores the
//! flux-volume, total, nu-fission, diffusion, fission-emission and
//! scattering-to-coarse-group tallies of every `(cell, fine group)` pair,
//! plus a per-cell volume. Workers write only their own slot, so no locking
//! is needed. [`TallyStore::reduce`] sums the slots and then all ranks.

use crate::comm::Communicator;
use crate::groups::GroupMap;
use cmfd_types::error::{CmfdError, CmfdResult};
use cmfd_types::material::Material;
use rayon::prelude::*;
use std::sync::Arc;

/// Offsets of the tally kinds inside one slot.
#[derive(Debug, Clone, Copy)]
struct Layout {
    num_cells: usize,
    num_fine: usize,
    num_coarse: usize,
    flux_volume: usize,
    total: usize,
    nu_fission: usize,
    diffusion: usize,
    chi: usize,
    scattering: usize,
    len: usize,
}

impl Layout {
    fn new(num_cells: usize, num_fine: usize, num_coarse: usize) -> CmfdResult<Self> {
        let overflow = || {
            CmfdError::Allocation(format!(
                "Tally size overflows for {num_cells} cells x {num_fine} groups"
            ))
        };
        let per_group = num_cells.checked_mul(num_fine).ok_or_else(overflow)?;
        let scattering_len = per_group.checked_mul(num_coarse).ok_or_else(overflow)?;
        let flux_volume = num_cells;
        let total = flux_volume + per_group;
        let nu_fission = total + per_group;
        let diffusion = nu_fission + per_group;
        let chi = diffusion + per_group;
        let scattering = chi + per_group;
        let len = scattering.checked_add(scattering_len).ok_or_else(overflow)?;
        Ok(Layout {
            num_cells,
            num_fine,
            num_coarse,
            flux_volume,
            total,
            nu_fission,
            diffusion,
            chi,
            scattering,
            len,
        })
    }

    #[inline]
    fn group(&self, cell: usize, fine: usize) -> usize {
        cell * self.num_fine + fine
    }
}

/// Mutable view of one worker slot.
pub struct TallySlot<'a> {
    layout: Layout,
    data: &'a mut [f64],
}

impl TallySlot<'_> {
    /// Add the reaction rates of one fine region with volume `volume` and
    /// scalar flux `flux[fine group]` to `cell`.
    pub fn add_region(
        &mut self,
        cell: usize,
        volume: f64,
        material: &Material,
        flux: &[f64],
        groups: &GroupMap,
    ) {
        let l = self.layout;
        let d = &mut *self.data;
        d[cell] += volume;
        let fission_source: f64 = (0..l.num_fine)
            .map(|h| material.nu_sigma_f[h] * flux[h] * volume)
            .sum();
        for g in 0..l.num_fine {
            let idx = l.group(cell, g);
            let flux_volume = flux[g] * volume;
            d[l.flux_volume + idx] += flux_volume;
            d[l.total + idx] += material.sigma_t[g] * flux_volume;
            d[l.nu_fission + idx] += material.nu_sigma_f[g] * flux_volume;
            d[l.diffusion + idx] += flux_volume / (3.0 * material.transport_xs(g));
            d[l.chi + idx] += material.chi[g] * fission_source;
            let scat = l.scattering + idx * l.num_coarse;
            for to in 0..l.num_fine {
                d[scat + groups.cmfd_group(to)] += material.sigma_s(g, to) * flux_volume;
            }
        }
    }
}

/// Thread-slotted tally arena plus the reduced totals.
#[derive(Debug, Clone)]
pub struct TallyStore {
    layout: Layout,
    num_threads: usize,
    slots: Vec<f64>,
    reduced: Vec<f64>,
}

fn allocate(len: usize) -> CmfdResult<Vec<f64>> {
    let mut v = Vec::new();
    v.try_reserve_exact(len)
        .map_err(|e| CmfdError::Allocation(format!("Cannot allocate {len} tally entries: {e}")))?;
    v.resize(len, 0.0);
    Ok(v)
}

impl TallyStore {
    pub fn new(
        num_threads: usize,
        num_cells: usize,
        num_fine: usize,
        num_coarse: usize,
    ) -> CmfdResult<Self> {
        if num_threads == 0 {
            return Err(CmfdError::ConfigError(
                "Tallies need at least one worker slot".to_string(),
            ));
        }
        let layout = Layout::new(num_cells, num_fine, num_coarse)?;
        let total = layout.len.checked_mul(num_threads).ok_or_else(|| {
            CmfdError::Allocation(format!("Tally arena overflows for {num_threads} threads"))
        })?;
        Ok(TallyStore {
            layout,
            num_threads,
            slots: allocate(total)?,
            reduced: allocate(layout.len)?,
        })
    }

    pub fn num_threads(&self) -> usize {
        self.num_threads
    }

    pub fn zero(&mut self) {
        self.slots.fill(0.0);
        self.reduced.fill(0.0);
    }

    pub fn slot_mut(&mut self, thread: usize) -> CmfdResult<TallySlot<'_>> {
        if thread >= self.num_threads {
            return Err(CmfdError::IndexOutOfBounds {
                what: "tally thread slot",
                index: thread,
                len: self.num_threads,
            });
        }
        let len = self.layout.len;
        Ok(TallySlot {
            layout: self.layout,
            data: &mut self.slots[thread * len..(thread + 1) * len],
        })
    }

    /// Tally every fine region. Regions are split into contiguous chunks,
    /// one per worker slot, and processed on the rayon pool.
    pub fn accumulate_regions(
        &mut self,
        region_cells: &[usize],
        volumes: &[f64],
        materials: &[Arc<Material>],
        scalar_flux: &[f64],
        groups: &GroupMap,
    ) -> CmfdResult<()> {
        let num_regions = region_cells.len();
        let nf = self.layout.num_fine;
        if volumes.len() != num_regions || materials.len() != num_regions {
            return Err(CmfdError::ConfigError(format!(
                "Region data mismatch: {num_regions} cells, {} volumes, {} materials",
                volumes.len(),
                materials.len()
            )));
        }
        if scalar_flux.len() != num_regions * nf {
            return Err(CmfdError::IndexOutOfBounds {
                what: "scalar flux",
                index: scalar_flux.len(),
                len: num_regions * nf,
            });
        }
        if let Some(&cell) = region_cells.iter().find(|&&c| c >= self.layout.num_cells) {
            return Err(CmfdError::IndexOutOfBounds {
                what: "coarse cell",
                index: cell,
                len: self.layout.num_cells,
            });
        }

        let layout = self.layout;
        let chunk = num_regions.div_ceil(self.num_threads).max(1);
        self.slots
            .par_chunks_mut(layout.len)
            .enumerate()
            .for_each(|(thread, data)| {
                let start = (thread * chunk).min(num_regions);
                let end = (start + chunk).min(num_regions);
                let mut slot = TallySlot { layout, data };
                for r in start..end {
                    slot.add_region(
                        region_cells[r],
                        volumes[r],
                        &materials[r],
                        &scalar_flux[r * nf..(r + 1) * nf],
                        groups,
                    );
                }
            });
        Ok(())
    }

    /// Sum all worker slots into the reduced buffer, then across ranks.
    pub fn reduce(&mut self, comm: &dyn Communicator) -> CmfdResult<()> {
        self.reduced.fill(0.0);
        for slot in self.slots.chunks(self.layout.len) {
            for (r, v) in self.reduced.iter_mut().zip(slot) {
                *r += v;
            }
        }
        comm.all_reduce_sum(&mut self.reduced)
    }

    pub fn num_cells(&self) -> usize {
        self.layout.num_cells
    }

    pub fn num_fine_groups(&self) -> usize {
        self.layout.num_fine
    }

    pub fn num_coarse_groups(&self) -> usize {
        self.layout.num_coarse
    }

    // Accessors below read the reduced totals.

    pub fn volume(&self, cell: usize) -> f64 {
        self.reduced[cell]
    }

    pub fn flux_volume(&self, cell: usize, fine: usize) -> f64 {
        self.reduced[self.layout.flux_volume + self.layout.group(cell, fine)]
    }

    pub fn total(&self, cell: usize, fine: usize) -> f64 {
        self.reduced[self.layout.total + self.layout.group(cell, fine)]
    }

    pub fn nu_fission(&self, cell: usize, fine: usize) -> f64 {
        self.reduced[self.layout.nu_fission + self.layout.group(cell, fine)]
    }

    pub fn diffusion(&self, cell: usize, fine: usize) -> f64 {
        self.reduced[self.layout.diffusion + self.layout.group(cell, fine)]
    }

    pub fn chi(&self, cell: usize, fine: usize) -> f64 {
        self.reduced[self.layout.chi + self.layout.group(cell, fine)]
    }

    /// Scattering out of fine group `fine` into coarse group `to_coarse`.
    pub fn scattering(&self, cell: usize, fine: usize, to_coarse: usize) -> f64 {
        let l = &self.layout;
        self.reduced[l.scattering + l.group(cell, fine) * l.num_coarse + to_coarse]
    }
}
