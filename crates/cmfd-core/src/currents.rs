// ─────────────────────────────────────────────────────────────────────
// SCPN CMFD — Surface Currents
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Outgoing partial currents on the 26 surfaces of every coarse cell.
//!
//! Transport sweep threads add to the currents concurrently; each cell has
//! its own lock so that threads crossing different cells never contend.
//! Before the diffusion operators are built, currents tallied on edges and
//! vertices are redistributed onto faces.

use crate::comm::Communicator;
use crate::lattice::{face_for_axis, surface_direction, surface_from_direction, Lattice};
use cmfd_types::constants::{NUM_FACES, NUM_SURFACES};
use cmfd_types::error::{CmfdError, CmfdResult};
use parking_lot::Mutex;

/// Surface crossed by a track segment, on the cell the segment leaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SurfaceCrossing {
    pub cell: usize,
    pub surface: usize,
}

impl SurfaceCrossing {
    /// Packed `cell * 26 + surface` form used in segment metadata.
    pub fn encode(&self) -> usize {
        self.cell * NUM_SURFACES + self.surface
    }

    pub fn decode(packed: usize) -> Self {
        SurfaceCrossing {
            cell: packed / NUM_SURFACES,
            surface: packed % NUM_SURFACES,
        }
    }
}

/// Coarse surfaces crossed at the forward and backward ends of a segment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SegmentCrossings {
    pub forward: Option<SurfaceCrossing>,
    pub backward: Option<SurfaceCrossing>,
}

impl SegmentCrossings {
    pub fn crossing(&self, forward: bool) -> Option<SurfaceCrossing> {
        if forward {
            self.forward
        } else {
            self.backward
        }
    }
}

/// Partial currents indexed `(cell, surface, coarse group)`.
#[derive(Debug)]
pub struct SurfaceCurrents {
    num_groups: usize,
    /// One lock per cell guarding `NUM_SURFACES * num_groups` values.
    cells: Vec<Mutex<Vec<f64>>>,
}

impl SurfaceCurrents {
    pub fn new(num_cells: usize, num_groups: usize) -> CmfdResult<Self> {
        let per_cell = NUM_SURFACES.checked_mul(num_groups).ok_or_else(|| {
            CmfdError::Allocation(format!("Current storage overflows for {num_groups} groups"))
        })?;
        let mut cells = Vec::new();
        cells.try_reserve_exact(num_cells).map_err(|e| {
            CmfdError::Allocation(format!("Cannot allocate currents for {num_cells} cells: {e}"))
        })?;
        cells.extend((0..num_cells).map(|_| Mutex::new(vec![0.0; per_cell])));
        Ok(SurfaceCurrents { num_groups, cells })
    }

    pub fn num_cells(&self) -> usize {
        self.cells.len()
    }

    pub fn num_groups(&self) -> usize {
        self.num_groups
    }

    pub fn zero(&mut self) {
        for cell in &mut self.cells {
            cell.get_mut().fill(0.0);
        }
    }

    /// Add one value per coarse group to `(cell, surface)` under the cell lock.
    pub fn increment(&self, cell: usize, surface: usize, values: &[f64]) -> CmfdResult<()> {
        if values.len() != self.num_groups {
            return Err(CmfdError::IndexOutOfBounds {
                what: "current group",
                index: values.len(),
                len: self.num_groups,
            });
        }
        self.accumulate(cell, surface, |row| {
            for (slot, v) in row.iter_mut().zip(values) {
                *slot += v;
            }
        })
    }

    /// Run `add` on the `num_groups` currents of `(cell, surface)` while the
    /// cell lock is held, without staging them in a temporary buffer.
    pub fn accumulate<F>(&self, cell: usize, surface: usize, add: F) -> CmfdResult<()>
    where
        F: FnOnce(&mut [f64]),
    {
        let lock = self.cells.get(cell).ok_or(CmfdError::IndexOutOfBounds {
            what: "coarse cell",
            index: cell,
            len: self.cells.len(),
        })?;
        if surface >= NUM_SURFACES {
            return Err(CmfdError::IndexOutOfBounds {
                what: "cell surface",
                index: surface,
                len: NUM_SURFACES,
            });
        }
        let mut data = lock.lock();
        let base = surface * self.num_groups;
        add(&mut data[base..base + self.num_groups]);
        Ok(())
    }

    pub fn get(&self, cell: usize, surface: usize, group: usize) -> f64 {
        self.cells[cell].lock()[surface * self.num_groups + group]
    }

    /// Copy into a flat `(cell, surface, group)` buffer.
    pub fn to_flat(&self) -> Vec<f64> {
        let mut flat = Vec::with_capacity(self.cells.len() * NUM_SURFACES * self.num_groups);
        for cell in &self.cells {
            flat.extend_from_slice(&cell.lock());
        }
        flat
    }

    fn load_flat(&mut self, flat: &[f64]) {
        let per_cell = NUM_SURFACES * self.num_groups;
        for (cell, chunk) in self.cells.iter_mut().zip(flat.chunks(per_cell)) {
            cell.get_mut().copy_from_slice(chunk);
        }
    }

    /// Sum currents over all ranks.
    pub fn reduce(&mut self, comm: &dyn Communicator) -> CmfdResult<()> {
        if comm.num_ranks() == 1 {
            return Ok(());
        }
        let mut flat = self.to_flat();
        comm.all_reduce_sum(&mut flat)?;
        self.load_flat(&flat);
        Ok(())
    }

    /// Redistribute vertex currents onto faces and neighbour edges. Must run
    /// before [`Self::split_edge_currents`], which consumes those edges.
    pub fn split_vertex_currents(&mut self, lattice: &Lattice) {
        if !lattice.solve_3d() {
            return;
        }
        let mut flat = self.to_flat();
        split_vertices(&mut flat, self.num_groups, lattice);
        self.load_flat(&flat);
    }

    /// Redistribute edge currents onto faces of the owning cell and faces
    /// of the neighbours across the edge.
    pub fn split_edge_currents(&mut self, lattice: &Lattice) {
        let mut flat = self.to_flat();
        split_edges(&mut flat, self.num_groups, lattice);
        self.load_flat(&flat);
    }

    /// Σ over faces of `cell` for one group.
    pub fn face_total(&self, cell: usize, group: usize) -> f64 {
        let data = self.cells[cell].lock();
        (0..NUM_FACES)
            .map(|f| data[f * self.num_groups + group])
            .sum()
    }
}

#[inline]
fn index(ng: usize, cell: usize, surface: usize, group: usize) -> usize {
    (cell * NUM_SURFACES + surface) * ng + group
}

fn split_vertices(flat: &mut [f64], ng: usize, lattice: &Lattice) {
    for cell in 0..lattice.num_cells() {
        for vertex in 18..NUM_SURFACES {
            let dir = surface_direction(vertex);
            for g in 0..ng {
                let i = index(ng, cell, vertex, g);
                let share = flat[i] / 3.0;
                if share == 0.0 {
                    continue;
                }
                flat[i] = 0.0;
                for axis in 0..3 {
                    let face = face_for_axis(axis, dir[axis]);
                    flat[index(ng, cell, face, g)] += share;
                    if let Some(next) = lattice.cell_next(cell, face) {
                        let mut edge_dir = dir;
                        edge_dir[axis] = 0;
                        if let Some(edge) = surface_from_direction(edge_dir) {
                            flat[index(ng, next, edge, g)] += share;
                        }
                    }
                }
            }
        }
    }
}

fn split_edges(flat: &mut [f64], ng: usize, lattice: &Lattice) {
    let edges = if lattice.solve_3d() { 6..18 } else { 6..10 };
    for cell in 0..lattice.num_cells() {
        for edge in edges.clone() {
            let dir = surface_direction(edge);
            let axes: Vec<usize> = (0..3).filter(|a| dir[*a] != 0).collect();
            for g in 0..ng {
                let i = index(ng, cell, edge, g);
                let share = flat[i] / 2.0;
                if share == 0.0 {
                    continue;
                }
                flat[i] = 0.0;
                for (k, &axis) in axes.iter().enumerate() {
                    let other = axes[1 - k];
                    let face = face_for_axis(axis, dir[axis]);
                    flat[index(ng, cell, face, g)] += share;
                    if let Some(next) = lattice.cell_next(cell, face) {
                        let across = face_for_axis(other, dir[other]);
                        flat[index(ng, next, across, g)] += share;
                    }
                }
            }
        }
    }
}
