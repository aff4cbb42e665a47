// ─────────────────────────────────────────────────────────────────────
// SCPN CMFD — Accelerator
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Coarse mesh accelerator driven by a transport solver.
//!
//! Lifecycle per outer transport iteration:
//! 1. [`Cmfd::zero_currents`] before the sweep
//! 2. [`Cmfd::tally_current`] from sweep threads at every coarse crossing
//! 3. [`Cmfd::compute_keff`] after the sweep: collapse, build operators,
//!    solve the coarse eigenproblem and rescale the fine flux

use crate::balance::{check_neutron_balance, BalanceReport};
use crate::collapse::{collapse_cross_sections, CollapsedXs};
use crate::comm::{Communicator, SerialCommunicator};
use crate::currents::{SegmentCrossings, SurfaceCurrents};
use crate::diffusion::{AngularSet, DiffusionContext};
use crate::eigen::{EigenConfig, EigenSolver};
use crate::groups::GroupMap;
use crate::lattice::Lattice;
use crate::matrices::{build_operators, Operators};
use crate::prolongation::{compute_flux_ratio, rescale_flux, FineFluxMap, KNearestStencils};
use crate::quadrature::Quadrature;
use crate::tally::TallyStore;
use cmfd_types::config::CmfdConfig;
use cmfd_types::constants::{NUM_FACES, NUM_SURFACES};
use cmfd_types::error::{CmfdError, CmfdResult};
use cmfd_types::material::{BoundaryType, Material};
use ndarray::Array2;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Result of one coarse eigenvalue solve.
#[derive(Debug, Clone, Copy)]
pub struct KeffResult {
    pub k_eff: f64,
    pub converged: bool,
    pub iterations: usize,
    pub residual: f64,
    pub linear_iterations: usize,
    /// Whether the fine flux was rescaled.
    pub flux_updated: bool,
    pub balance: BalanceReport,
    pub solve_time_ms: f64,
}

/// Wall-clock seconds accumulated over all `compute_keff` calls.
#[derive(Debug, Clone, Copy, Default)]
pub struct CmfdTimings {
    pub total: f64,
    pub collapse: f64,
    pub matrix: f64,
    pub solve: f64,
    pub update: f64,
    pub num_solves: usize,
}

/// Coarse quantities of the latest solve.
#[derive(Debug, Clone)]
pub struct CoarseSolution {
    pub xs: CollapsedXs,
    pub operators: Operators,
    /// Collapsed transport flux `[cell, group]`.
    pub old_flux: Array2<f64>,
    /// Coarse eigenvector rescaled to the transport production.
    pub new_flux: Array2<f64>,
    pub flux_ratio: Array2<f64>,
    pub balance: BalanceReport,
}

/// State built by [`Cmfd::initialize`].
struct CmfdCore {
    groups: GroupMap,
    quadrature: Arc<dyn Quadrature>,
    region_cells: Vec<usize>,
    colors: Vec<u8>,
    tallies: TallyStore,
    currents: SurfaceCurrents,
    /// Set once currents have been reduced and split for this sweep.
    currents_ready: bool,
    /// Raised by tallies that arrive after the split of this sweep.
    late_tallies: AtomicBool,
    stencils: Option<KNearestStencils>,
    angles: Option<AngularSet>,
    solution: Option<CoarseSolution>,
}

pub struct Cmfd {
    config: CmfdConfig,
    quadrature: Option<Arc<dyn Quadrature>>,
    comm: Arc<dyn Communicator>,
    num_threads: usize,
    /// Expected number of flat source regions, checked at initialization.
    num_fsrs: Option<usize>,
    fsr_volumes: Vec<f64>,
    fsr_materials: Vec<Arc<Material>>,
    fsr_centroids: Option<Vec<[f64; 3]>>,
    cell_fsrs: Vec<Vec<usize>>,
    lattice: Option<Lattice>,
    core: Option<CmfdCore>,
    k_eff: f64,
    timings: CmfdTimings,
}

fn not_initialized(what: &str) -> CmfdError {
    CmfdError::ConfigError(format!("CMFD {what} requested before initialization"))
}

impl Cmfd {
    pub fn new(config: CmfdConfig) -> Self {
        Cmfd {
            config,
            quadrature: None,
            comm: Arc::new(SerialCommunicator),
            num_threads: rayon::current_num_threads(),
            num_fsrs: None,
            fsr_volumes: Vec::new(),
            fsr_materials: Vec::new(),
            fsr_centroids: None,
            cell_fsrs: Vec::new(),
            lattice: None,
            core: None,
            k_eff: 1.0,
            timings: CmfdTimings::default(),
        }
    }

    pub fn from_file(path: &str) -> CmfdResult<Self> {
        let config = CmfdConfig::from_file(path)?;
        Ok(Self::new(config))
    }

    fn invalidate(&mut self) {
        self.core = None;
    }

    fn invalidate_lattice(&mut self) {
        self.lattice = None;
        self.core = None;
    }

    fn configured_num_cells(&self) -> usize {
        let l = &self.config.lattice;
        l.num_x * l.num_y * l.num_z
    }

    // ── Configuration ────────────────────────────────────────────────

    pub fn set_lattice_structure(&mut self, num_x: usize, num_y: usize, num_z: usize) -> CmfdResult<()> {
        if num_x == 0 || num_y == 0 || num_z == 0 {
            return Err(CmfdError::ConfigError(format!(
                "Lattice needs at least one cell per axis, got {num_x}x{num_y}x{num_z}"
            )));
        }
        let l = &mut self.config.lattice;
        l.num_x = num_x;
        l.num_y = num_y;
        l.num_z = num_z;
        l.widths_x = None;
        l.widths_y = None;
        l.widths_z = None;
        self.cell_fsrs.clear();
        self.invalidate_lattice();
        Ok(())
    }

    /// Total extent of the lattice along `axis`.
    pub fn set_width(&mut self, axis: usize, width: f64) -> CmfdResult<()> {
        if !width.is_finite() || width <= 0.0 {
            return Err(CmfdError::ConfigError(format!(
                "Lattice width must be finite > 0, got {width}"
            )));
        }
        let l = &mut self.config.lattice;
        match axis {
            0 => l.width_x = width,
            1 => l.width_y = width,
            2 => l.width_z = width,
            _ => {
                return Err(CmfdError::IndexOutOfBounds {
                    what: "lattice axis",
                    index: axis,
                    len: 3,
                })
            }
        }
        self.invalidate_lattice();
        Ok(())
    }

    /// Explicit non-uniform cell widths along `axis`.
    pub fn set_cell_widths(&mut self, axis: usize, widths: Vec<f64>) -> CmfdResult<()> {
        let l = &mut self.config.lattice;
        let slot = match axis {
            0 => &mut l.widths_x,
            1 => &mut l.widths_y,
            2 => &mut l.widths_z,
            _ => {
                return Err(CmfdError::IndexOutOfBounds {
                    what: "lattice axis",
                    index: axis,
                    len: 3,
                })
            }
        };
        *slot = Some(widths);
        self.invalidate_lattice();
        Ok(())
    }

    pub fn set_lattice_offset(&mut self, offset: [f64; 3]) {
        self.config.lattice.offset = offset;
        self.invalidate_lattice();
    }

    pub fn set_boundary(&mut self, face: usize, boundary: BoundaryType) -> CmfdResult<()> {
        if face >= NUM_FACES {
            return Err(CmfdError::IndexOutOfBounds {
                what: "lattice face",
                index: face,
                len: NUM_FACES,
            });
        }
        self.config.boundaries[face] = boundary;
        self.invalidate_lattice();
        Ok(())
    }

    pub fn set_sor_relaxation_factor(&mut self, omega: f64) -> CmfdResult<()> {
        if !omega.is_finite() || omega <= 0.0 || omega >= 2.0 {
            return Err(CmfdError::ConfigError(format!(
                "SOR relaxation factor must be in (0, 2), got {omega}"
            )));
        }
        self.config.solver.sor_factor = omega;
        Ok(())
    }

    pub fn set_source_convergence_threshold(&mut self, threshold: f64) -> CmfdResult<()> {
        if !threshold.is_finite() || threshold <= 0.0 {
            return Err(CmfdError::ConfigError(format!(
                "Source convergence threshold must be finite > 0, got {threshold}"
            )));
        }
        self.config.solver.source_convergence_threshold = threshold;
        Ok(())
    }

    pub fn set_num_moc_groups(&mut self, num_groups: usize) {
        self.config.num_moc_groups = num_groups;
        self.invalidate();
    }

    /// Fine groups (0-based) of every coarse group.
    pub fn set_group_structure(&mut self, groups: Vec<Vec<usize>>) {
        self.config.group_structure = Some(groups);
        self.invalidate();
    }

    pub fn set_flux_update_on(&mut self, on: bool) {
        self.config.flux_update_on = on;
    }

    pub fn set_centroid_update_on(&mut self, on: bool) {
        self.config.centroid_update_on = on;
        self.invalidate();
    }

    pub fn set_k_nearest(&mut self, k: usize) -> CmfdResult<()> {
        if k == 0 {
            return Err(CmfdError::ConfigError("k_nearest must be >= 1".to_string()));
        }
        self.config.k_nearest = k;
        self.invalidate();
        Ok(())
    }

    pub fn set_solve_3d(&mut self, solve_3d: bool) {
        self.config.solve_3d = solve_3d;
        self.invalidate_lattice();
    }

    pub fn set_larsen_edc(&mut self, on: bool) {
        self.config.larsen_edc = on;
        self.invalidate();
    }

    pub fn set_azim_spacings(&mut self, spacings: Vec<f64>) {
        self.config.azim_spacings = spacings;
        self.invalidate();
    }

    pub fn set_polar_spacings(&mut self, spacings: Vec<Vec<f64>>) {
        self.config.polar_spacings = spacings;
        self.invalidate();
    }

    pub fn set_quadrature(&mut self, quadrature: Arc<dyn Quadrature>) {
        self.quadrature = Some(quadrature);
        self.invalidate();
    }

    pub fn set_communicator(&mut self, comm: Arc<dyn Communicator>) {
        self.comm = comm;
    }

    /// Number of tally slots; one per transport worker thread.
    pub fn set_num_threads(&mut self, num_threads: usize) -> CmfdResult<()> {
        if num_threads == 0 {
            return Err(CmfdError::ConfigError(
                "At least one thread is required".to_string(),
            ));
        }
        self.num_threads = num_threads;
        self.invalidate();
        Ok(())
    }

    pub fn set_num_fsrs(&mut self, num_fsrs: usize) {
        self.num_fsrs = Some(num_fsrs);
        self.invalidate();
    }

    /// Volume and material of every flat source region.
    pub fn set_fine_regions(&mut self, volumes: Vec<f64>, materials: Vec<Arc<Material>>) -> CmfdResult<()> {
        if volumes.len() != materials.len() {
            return Err(CmfdError::ConfigError(format!(
                "{} FSR volumes but {} materials",
                volumes.len(),
                materials.len()
            )));
        }
        self.fsr_volumes = volumes;
        self.fsr_materials = materials;
        self.invalidate();
        Ok(())
    }

    pub fn set_fsr_centroids(&mut self, centroids: Vec<[f64; 3]>) {
        self.fsr_centroids = Some(centroids);
        self.invalidate();
    }

    pub fn add_fsr_to_cell(&mut self, cell: usize, fsr: usize) -> CmfdResult<()> {
        let num_cells = self.configured_num_cells();
        if cell >= num_cells {
            return Err(CmfdError::IndexOutOfBounds {
                what: "coarse cell",
                index: cell,
                len: num_cells,
            });
        }
        if self.cell_fsrs.len() != num_cells {
            self.cell_fsrs = vec![Vec::new(); num_cells];
        }
        self.cell_fsrs[cell].push(fsr);
        self.invalidate();
        Ok(())
    }

    pub fn set_cell_fsrs(&mut self, cell_fsrs: Vec<Vec<usize>>) {
        self.cell_fsrs = cell_fsrs;
        self.invalidate();
    }

    // ── Setup ────────────────────────────────────────────────────────

    /// Build the coarse lattice so cells and surfaces can be located while
    /// the geometry is still being segmented.
    pub fn initialize_lattice(&mut self) -> CmfdResult<()> {
        let lattice = Lattice::new(
            &self.config.lattice,
            self.config.boundaries,
            self.config.solve_3d,
        )?;
        if self.cell_fsrs.len() != lattice.num_cells() {
            self.cell_fsrs = vec![Vec::new(); lattice.num_cells()];
        }
        self.lattice = Some(lattice);
        Ok(())
    }

    /// Validate the configuration and allocate tallies, currents and
    /// stencils.
    pub fn initialize(&mut self) -> CmfdResult<()> {
        self.config.validate()?;
        if self.lattice.is_none() {
            self.initialize_lattice()?;
        }
        let lattice = self.lattice.as_ref().ok_or_else(|| not_initialized("lattice"))?;
        let quadrature = self.quadrature.clone().ok_or_else(|| {
            CmfdError::ConfigError("A quadrature must be set before initialization".to_string())
        })?;
        let nf = self.config.num_moc_groups;
        let groups = GroupMap::from_structure(self.config.group_structure.as_deref(), nf)?;

        let num_fsrs = self.fsr_volumes.len();
        if num_fsrs == 0 {
            return Err(CmfdError::ConfigError(
                "No flat source regions were registered".to_string(),
            ));
        }
        if let Some(expected) = self.num_fsrs {
            if expected != num_fsrs {
                return Err(CmfdError::ConfigError(format!(
                    "Expected {expected} flat source regions, {num_fsrs} were registered"
                )));
            }
        }
        if self.fsr_materials.len() != num_fsrs {
            return Err(CmfdError::ConfigError(format!(
                "{num_fsrs} FSR volumes but {} materials",
                self.fsr_materials.len()
            )));
        }
        for (fsr, (v, m)) in self.fsr_volumes.iter().zip(&self.fsr_materials).enumerate() {
            if !(v.is_finite() && *v > 0.0) {
                return Err(CmfdError::PhysicsViolation(format!(
                    "FSR {fsr} has non-positive volume {v}"
                )));
            }
            if m.num_groups() != nf {
                return Err(CmfdError::ConfigError(format!(
                    "FSR {fsr} material '{}' has {} groups, transport uses {nf}",
                    m.name,
                    m.num_groups()
                )));
            }
        }

        let num_cells = lattice.num_cells();
        if self.cell_fsrs.len() != num_cells {
            return Err(CmfdError::ConfigError(format!(
                "FSR lists given for {} cells, lattice has {num_cells}",
                self.cell_fsrs.len()
            )));
        }
        let mut region_cells = vec![usize::MAX; num_fsrs];
        for (cell, fsrs) in self.cell_fsrs.iter().enumerate() {
            if fsrs.is_empty() {
                return Err(CmfdError::ConfigError(format!(
                    "CMFD cell {cell} contains no flat source regions"
                )));
            }
            for &fsr in fsrs {
                let slot = region_cells.get_mut(fsr).ok_or(CmfdError::IndexOutOfBounds {
                    what: "flat source region",
                    index: fsr,
                    len: num_fsrs,
                })?;
                if *slot != usize::MAX {
                    return Err(CmfdError::ConfigError(format!(
                        "FSR {fsr} assigned to cells {} and {cell}",
                        *slot
                    )));
                }
                *slot = cell;
            }
        }
        if let Some(fsr) = region_cells.iter().position(|&c| c == usize::MAX) {
            return Err(CmfdError::ConfigError(format!(
                "FSR {fsr} is not assigned to any CMFD cell"
            )));
        }

        let half_polar = quadrature.num_polar() / 2;
        if !self.config.azim_spacings.is_empty()
            && self.config.azim_spacings.len() != quadrature.num_azim() / 4
        {
            return Err(CmfdError::ConfigError(format!(
                "{} azimuthal spacings for {} azimuthal angles",
                self.config.azim_spacings.len(),
                quadrature.num_azim()
            )));
        }
        if let Some(row) = self.config.polar_spacings.iter().find(|r| r.len() != half_polar) {
            return Err(CmfdError::ConfigError(format!(
                "Polar spacing row has {} entries, quadrature has {half_polar} polar angles per half space",
                row.len()
            )));
        }

        let stencils = if self.config.centroid_update_on {
            let centroids = self.fsr_centroids.as_ref().ok_or_else(|| {
                CmfdError::ConfigError("Centroid update requires FSR centroids".to_string())
            })?;
            Some(KNearestStencils::generate(
                lattice,
                centroids,
                &region_cells,
                self.config.k_nearest,
            )?)
        } else {
            None
        };

        let angles = if !self.config.larsen_edc {
            None
        } else if self.config.solve_3d
            && !self.config.azim_spacings.is_empty()
            && !self.config.polar_spacings.is_empty()
        {
            Some(AngularSet::with_spacings(
                quadrature.as_ref(),
                &self.config.azim_spacings,
                &self.config.polar_spacings,
            )?)
        } else {
            Some(AngularSet::polar(quadrature.as_ref())?)
        };

        let nc = groups.num_coarse_groups();
        let tallies = TallyStore::new(self.num_threads, num_cells, nf, nc)?;
        let currents = SurfaceCurrents::new(num_cells, nc)?;
        log::info!(
            "CMFD initialized: {}x{}x{} cells, {nf} -> {nc} groups, {num_fsrs} FSRs, {} threads",
            lattice.num_x(),
            lattice.num_y(),
            lattice.num_z(),
            self.num_threads
        );

        self.core = Some(CmfdCore {
            groups,
            quadrature,
            region_cells,
            colors: lattice.cell_colors(),
            tallies,
            currents,
            currents_ready: false,
            late_tallies: AtomicBool::new(false),
            stencils,
            angles,
            solution: None,
        });
        Ok(())
    }

    fn core(&self) -> CmfdResult<&CmfdCore> {
        self.core.as_ref().ok_or_else(|| not_initialized("state"))
    }

    fn require_lattice(&self) -> CmfdResult<&Lattice> {
        self.lattice.as_ref().ok_or_else(|| not_initialized("lattice"))
    }

    // ── Geometry queries ─────────────────────────────────────────────

    pub fn find_cmfd_cell(&self, point: [f64; 3]) -> CmfdResult<Option<usize>> {
        Ok(self.require_lattice()?.find_cell(point))
    }

    pub fn find_cmfd_surface(&self, cell: usize, point: [f64; 3]) -> CmfdResult<Option<usize>> {
        let lattice = self.require_lattice()?;
        check_cell(lattice, cell)?;
        Ok(lattice.find_surface(cell, point))
    }

    pub fn find_cmfd_surface_otf(
        &self,
        cell: usize,
        z: f64,
        surface_2d: Option<usize>,
    ) -> CmfdResult<Option<usize>> {
        let lattice = self.require_lattice()?;
        check_cell(lattice, cell)?;
        Ok(lattice.find_surface_otf(cell, z, surface_2d))
    }

    // ── Sweep interface ──────────────────────────────────────────────

    pub fn zero_currents(&mut self) -> CmfdResult<()> {
        let core = self.core.as_mut().ok_or_else(|| not_initialized("current reset"))?;
        core.currents.zero();
        core.currents_ready = false;
        *core.late_tallies.get_mut() = false;
        Ok(())
    }

    /// Tally the outgoing angular flux of a segment end onto the coarse
    /// surface it crosses. Safe to call concurrently from sweep threads.
    ///
    /// In 2D `angular_flux` is laid out `[fine group][polar in half space]`
    /// and every polar angle is weighted; in 3D it is `[fine group]` with a
    /// single `(azim, polar)` weight.
    ///
    /// Each sweep must start with [`Cmfd::zero_currents`]. Tallies made after
    /// a solve without that reset are added to the previous sweep's currents
    /// and are not reduced across ranks.
    pub fn tally_current(
        &self,
        segment: &SegmentCrossings,
        angular_flux: &[f64],
        azim: usize,
        polar: usize,
        forward: bool,
    ) -> CmfdResult<()> {
        let Some(crossing) = segment.crossing(forward) else {
            return Ok(());
        };
        let core = self.core()?;
        let groups = &core.groups;
        let quadrature = core.quadrature.as_ref();
        let nf = groups.num_fine_groups();
        if core.currents_ready
            && !core.late_tallies.load(Ordering::Relaxed)
            && !core.late_tallies.swap(true, Ordering::Relaxed)
        {
            log::warn!(
                "Currents tallied after the last CMFD solve without zero_currents(); \
                 they are added to the previous sweep"
            );
        }

        if self.config.solve_3d {
            if angular_flux.len() < nf {
                return Err(CmfdError::IndexOutOfBounds {
                    what: "angular flux",
                    index: angular_flux.len(),
                    len: nf,
                });
            }
            let weight = quadrature.weight(azim, polar);
            core.currents.accumulate(crossing.cell, crossing.surface, |row| {
                for (e, psi) in angular_flux[..nf].iter().enumerate() {
                    row[groups.cmfd_group(e)] += psi * weight;
                }
            })
        } else {
            let half = quadrature.num_polar() / 2;
            if angular_flux.len() < nf * half {
                return Err(CmfdError::IndexOutOfBounds {
                    what: "angular flux",
                    index: angular_flux.len(),
                    len: nf * half,
                });
            }
            core.currents.accumulate(crossing.cell, crossing.surface, |row| {
                for e in 0..nf {
                    let g = groups.cmfd_group(e);
                    for p in 0..half {
                        row[g] += angular_flux[e * half + p] * quadrature.weight(azim, p);
                    }
                }
            })
        }
    }

    // ── Solve ────────────────────────────────────────────────────────

    /// Solve the coarse eigenproblem for the current transport flux and,
    /// when enabled, rescale `scalar_flux` (`[fsr][fine group]`) and
    /// `flux_moments` (`[fsr][fine group][3]`) in place.
    ///
    /// Non-convergence is reported through [`KeffResult::converged`]; the
    /// fine flux is left untouched in that case.
    pub fn compute_keff(
        &mut self,
        scalar_flux: &mut [f64],
        flux_moments: Option<&mut [f64]>,
        moc_iteration: usize,
    ) -> CmfdResult<KeffResult> {
        let start = Instant::now();
        let lattice = self.lattice.as_ref().ok_or_else(|| not_initialized("lattice"))?;
        let core = self.core.as_mut().ok_or_else(|| not_initialized("solve"))?;
        let comm = self.comm.as_ref();
        let nf = core.groups.num_fine_groups();
        let nc = core.groups.num_coarse_groups();
        let expected = core.region_cells.len() * nf;
        if scalar_flux.len() != expected {
            return Err(CmfdError::IndexOutOfBounds {
                what: "scalar flux",
                index: scalar_flux.len(),
                len: expected,
            });
        }
        if let Some(i) = scalar_flux.iter().position(|f| !f.is_finite()) {
            return Err(CmfdError::PhysicsViolation(format!(
                "Non-finite scalar flux at index {i}"
            )));
        }

        let t = Instant::now();
        core.tallies.zero();
        core.tallies.accumulate_regions(
            &core.region_cells,
            &self.fsr_volumes,
            &self.fsr_materials,
            scalar_flux,
            &core.groups,
        )?;
        core.tallies.reduce(comm)?;
        let xs = collapse_cross_sections(&core.tallies, &core.groups)?;
        if !core.currents_ready {
            core.currents.reduce(comm)?;
            core.currents.split_vertex_currents(lattice);
            core.currents.split_edge_currents(lattice);
            core.currents_ready = true;
        } else if *core.late_tallies.get_mut() {
            // Split entries are already zero, so a second split only moves
            // the late edge and vertex tallies.
            if comm.num_ranks() > 1 {
                log::warn!("Late current tallies are local to rank {}", comm.rank());
            }
            core.currents.split_vertex_currents(lattice);
            core.currents.split_edge_currents(lattice);
        }
        *core.late_tallies.get_mut() = false;
        let currents = core.currents.to_flat();
        let collapse_s = t.elapsed().as_secs_f64();

        let t = Instant::now();
        let old_flux = xs.flux.clone();
        let ctx = DiffusionContext {
            lattice,
            xs: &xs,
            flux: &old_flux,
            currents: &currents,
            angles: core.angles.as_ref(),
            moc_iteration,
        };
        let operators = build_operators(&ctx);
        let matrix_s = t.elapsed().as_secs_f64();

        let t = Instant::now();
        let mut new_flux = old_flux.clone();
        let solver = EigenSolver::new(
            &operators.a,
            &operators.m,
            &core.colors,
            nc,
            EigenConfig::from_solver(&self.config.solver),
        )?;
        let outcome = {
            let flat = new_flux
                .as_slice_mut()
                .ok_or_else(|| CmfdError::LinAlg("Coarse flux is not contiguous".to_string()))?;
            solver.solve(flat, self.k_eff)?
        };
        let solve_s = t.elapsed().as_secs_f64();

        let t = Instant::now();
        {
            let old = old_flux
                .as_slice()
                .ok_or_else(|| CmfdError::LinAlg("Coarse flux is not contiguous".to_string()))?;
            let new = new_flux
                .as_slice_mut()
                .ok_or_else(|| CmfdError::LinAlg("Coarse flux is not contiguous".to_string()))?;
            rescale_flux(&operators.m, old, new);
        }
        let flux_ratio = compute_flux_ratio(&old_flux, &new_flux);
        let flux_updated = self.config.flux_update_on && outcome.converged;
        if self.config.flux_update_on && !outcome.converged {
            log::warn!("CMFD solve did not converge; fine flux left unchanged");
        }
        if flux_updated {
            let map = FineFluxMap {
                region_cells: &core.region_cells,
                groups: &core.groups,
                stencils: core.stencils.as_ref(),
            };
            map.update_moc_flux(&flux_ratio, scalar_flux, flux_moments)?;
        }
        let update_s = t.elapsed().as_secs_f64();

        let balance = {
            let flat = new_flux
                .as_slice()
                .ok_or_else(|| CmfdError::LinAlg("Coarse flux is not contiguous".to_string()))?;
            check_neutron_balance(&operators.a, &operators.m, flat, outcome.k_eff, &xs)
        };

        if outcome.k_eff.is_finite() && outcome.k_eff > 0.0 {
            self.k_eff = outcome.k_eff;
        }
        core.solution = Some(CoarseSolution {
            xs,
            operators,
            old_flux,
            new_flux,
            flux_ratio,
            balance,
        });

        let total_s = start.elapsed().as_secs_f64();
        let tm = &mut self.timings;
        tm.total += total_s;
        tm.collapse += collapse_s;
        tm.matrix += matrix_s;
        tm.solve += solve_s;
        tm.update += update_s;
        tm.num_solves += 1;
        log::debug!(
            "CMFD phases [s]: collapse {collapse_s:.3e}, matrix {matrix_s:.3e}, solve {solve_s:.3e}, update {update_s:.3e}"
        );

        log::info!(
            "CMFD k_eff = {:.6} after {} iterations (residual {:.3e}, converged = {})",
            outcome.k_eff,
            outcome.iterations,
            outcome.residual,
            outcome.converged
        );
        Ok(KeffResult {
            k_eff: outcome.k_eff,
            converged: outcome.converged,
            iterations: outcome.iterations,
            residual: outcome.residual,
            linear_iterations: outcome.linear_iterations,
            flux_updated,
            balance,
            solve_time_ms: total_s * 1000.0,
        })
    }

    /// Re-evaluate the balance of the latest coarse solution.
    pub fn check_neutron_balance(&self) -> CmfdResult<BalanceReport> {
        let sol = self
            .core()?
            .solution
            .as_ref()
            .ok_or_else(|| not_initialized("balance check"))?;
        let flat = sol
            .new_flux
            .as_slice()
            .ok_or_else(|| CmfdError::LinAlg("Coarse flux is not contiguous".to_string()))?;
        Ok(check_neutron_balance(
            &sol.operators.a,
            &sol.operators.m,
            flat,
            self.k_eff,
            &sol.xs,
        ))
    }

    pub fn print_timer_report(&self) {
        let t = &self.timings;
        log::info!("CMFD timing over {} solves:", t.num_solves);
        log::info!("  total            {:>10.4} s", t.total);
        log::info!("  collapse/tally   {:>10.4} s", t.collapse);
        log::info!("  matrix assembly  {:>10.4} s", t.matrix);
        log::info!("  eigen solve      {:>10.4} s", t.solve);
        log::info!("  flux update      {:>10.4} s", t.update);
    }

    // ── Accessors ────────────────────────────────────────────────────

    pub fn config(&self) -> &CmfdConfig {
        &self.config
    }

    pub fn timings(&self) -> &CmfdTimings {
        &self.timings
    }

    pub fn k_eff(&self) -> f64 {
        self.k_eff
    }

    pub fn solution(&self) -> Option<&CoarseSolution> {
        self.core.as_ref().and_then(|c| c.solution.as_ref())
    }

    pub fn lattice(&self) -> Option<&Lattice> {
        self.lattice.as_ref()
    }

    pub fn cmfd_group(&self, fine: usize) -> CmfdResult<usize> {
        let groups = &self.core()?.groups;
        if fine >= groups.num_fine_groups() {
            return Err(CmfdError::IndexOutOfBounds {
                what: "fine group",
                index: fine,
                len: groups.num_fine_groups(),
            });
        }
        Ok(groups.cmfd_group(fine))
    }

    pub fn num_cmfd_groups(&self) -> usize {
        match &self.core {
            Some(core) => core.groups.num_coarse_groups(),
            None => self
                .config
                .group_structure
                .as_ref()
                .map_or(self.config.num_moc_groups, |g| g.len()),
        }
    }

    pub fn num_moc_groups(&self) -> usize {
        self.config.num_moc_groups
    }

    pub fn num_x(&self) -> usize {
        self.config.lattice.num_x
    }

    pub fn num_y(&self) -> usize {
        self.config.lattice.num_y
    }

    pub fn num_z(&self) -> usize {
        self.config.lattice.num_z
    }

    pub fn num_cells(&self) -> usize {
        self.configured_num_cells()
    }

    pub fn boundary(&self, face: usize) -> CmfdResult<BoundaryType> {
        self.config
            .boundaries
            .get(face)
            .copied()
            .ok_or(CmfdError::IndexOutOfBounds {
                what: "boundary face",
                index: face,
                len: NUM_FACES,
            })
    }

    pub fn num_fsrs(&self) -> usize {
        self.fsr_volumes.len()
    }

    pub fn is_flux_update_on(&self) -> bool {
        self.config.flux_update_on
    }

    pub fn is_centroid_update_on(&self) -> bool {
        self.config.centroid_update_on
    }

    pub fn cell_fsrs(&self, cell: usize) -> &[usize] {
        self.cell_fsrs.get(cell).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn convert_fsr_to_cell(&self, fsr: usize) -> Option<usize> {
        match &self.core {
            Some(core) => core.region_cells.get(fsr).copied(),
            None => self.cell_fsrs.iter().position(|fsrs| fsrs.contains(&fsr)),
        }
    }

    /// Split surface current of the latest solve, `None` before one ran.
    pub fn surface_current(&self, cell: usize, surface: usize, group: usize) -> Option<f64> {
        let core = self.core.as_ref()?;
        if cell >= core.currents.num_cells()
            || surface >= NUM_SURFACES
            || group >= core.currents.num_groups()
        {
            return None;
        }
        Some(core.currents.get(cell, surface, group))
    }
}

fn check_cell(lattice: &Lattice, cell: usize) -> CmfdResult<()> {
    if cell >= lattice.num_cells() {
        return Err(CmfdError::IndexOutOfBounds {
            what: "coarse cell",
            index: cell,
            len: lattice.num_cells(),
        });
    }
    Ok(())
}
