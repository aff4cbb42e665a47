// ─────────────────────────────────────────────────────────────────────
// SCPN CMFD — Coarse Lattice
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Structured coarse mesh laid over the transport geometry.
//!
//! Cells are numbered `x + num_x * (y + num_y * z)`. Every cell owns 26
//! surfaces: 6 faces, 12 edges and 8 vertices, each identified by the
//! direction vector pointing out of the cell through it.

use cmfd_types::config::LatticeConfig;
use cmfd_types::constants::{NUM_FACES, NUM_SURFACES, ON_SURFACE_THRESH};
use cmfd_types::error::{CmfdError, CmfdResult};
use cmfd_types::material::BoundaryType;

pub const SURFACE_X_MIN: usize = 0;
pub const SURFACE_Y_MIN: usize = 1;
pub const SURFACE_Z_MIN: usize = 2;
pub const SURFACE_X_MAX: usize = 3;
pub const SURFACE_Y_MAX: usize = 4;
pub const SURFACE_Z_MAX: usize = 5;

/// Outward direction of every surface, faces first, then edges, then vertices.
const SURFACE_DIRECTIONS: [[i8; 3]; NUM_SURFACES] = [
    // faces
    [-1, 0, 0],
    [0, -1, 0],
    [0, 0, -1],
    [1, 0, 0],
    [0, 1, 0],
    [0, 0, 1],
    // xy edges
    [-1, -1, 0],
    [1, -1, 0],
    [-1, 1, 0],
    [1, 1, 0],
    // xz edges
    [-1, 0, -1],
    [1, 0, -1],
    [-1, 0, 1],
    [1, 0, 1],
    // yz edges
    [0, -1, -1],
    [0, 1, -1],
    [0, -1, 1],
    [0, 1, 1],
    // vertices
    [-1, -1, -1],
    [1, -1, -1],
    [-1, 1, -1],
    [1, 1, -1],
    [-1, -1, 1],
    [1, -1, 1],
    [-1, 1, 1],
    [1, 1, 1],
];

const FACES_2D: [usize; 4] = [SURFACE_X_MIN, SURFACE_Y_MIN, SURFACE_X_MAX, SURFACE_Y_MAX];
const FACES_3D: [usize; NUM_FACES] = [0, 1, 2, 3, 4, 5];

/// Outward direction of `surface`.
#[inline]
pub fn surface_direction(surface: usize) -> [i8; 3] {
    SURFACE_DIRECTIONS[surface]
}

/// Surface whose outward direction is `dir`, `None` for the zero vector.
pub fn surface_from_direction(dir: [i8; 3]) -> Option<usize> {
    SURFACE_DIRECTIONS.iter().position(|d| *d == dir)
}

/// Face on `axis` pointing toward `dir` (negative → min face).
#[inline]
pub fn face_for_axis(axis: usize, dir: i8) -> usize {
    if dir < 0 {
        axis
    } else {
        axis + 3
    }
}

#[inline]
pub fn face_axis(face: usize) -> usize {
    face % 3
}

#[inline]
pub fn opposite_face(face: usize) -> usize {
    (face + 3) % NUM_FACES
}

/// -1 for min faces, +1 for max faces.
#[inline]
pub fn face_sense(face: usize) -> f64 {
    if face < 3 {
        -1.0
    } else {
        1.0
    }
}

#[inline]
pub fn is_face(surface: usize) -> bool {
    surface < NUM_FACES
}

/// Number of non-zero components in the surface direction: 1 face, 2 edge, 3 vertex.
#[inline]
pub fn surface_order(surface: usize) -> usize {
    SURFACE_DIRECTIONS[surface].iter().filter(|d| **d != 0).count()
}

/// Structured coarse mesh with per-axis cell widths.
#[derive(Debug, Clone)]
pub struct Lattice {
    num: [usize; 3],
    widths: [Vec<f64>; 3],
    /// Cell boundary coordinates per axis, `num + 1` entries.
    bounds: [Vec<f64>; 3],
    boundaries: [BoundaryType; NUM_FACES],
    solve_3d: bool,
}

impl Lattice {
    /// Build from configuration. In 2D the axial width is forced to 1 so
    /// face areas reduce to lengths and volumes to areas.
    pub fn new(
        cfg: &LatticeConfig,
        boundaries: [BoundaryType; NUM_FACES],
        solve_3d: bool,
    ) -> CmfdResult<Self> {
        cfg.validate()?;
        if !solve_3d && cfg.num_z != 1 {
            return Err(CmfdError::ConfigError(format!(
                "2D lattice must have a single axial cell, got {}",
                cfg.num_z
            )));
        }
        let widths_z = if solve_3d {
            cfg.cell_widths(2)
        } else {
            vec![1.0]
        };
        Self::from_widths(
            [cfg.cell_widths(0), cfg.cell_widths(1), widths_z],
            cfg.offset,
            boundaries,
            solve_3d,
        )
    }

    /// Uniform mesh of `num` cells spanning `width` along each axis.
    pub fn uniform(
        num: [usize; 3],
        width: [f64; 3],
        boundaries: [BoundaryType; NUM_FACES],
        solve_3d: bool,
    ) -> CmfdResult<Self> {
        let cfg = LatticeConfig {
            num_x: num[0],
            num_y: num[1],
            num_z: num[2],
            width_x: width[0],
            width_y: width[1],
            width_z: width[2],
            ..LatticeConfig::default()
        };
        Self::new(&cfg, boundaries, solve_3d)
    }

    /// Non-uniform mesh from explicit per-cell widths.
    pub fn from_widths(
        widths: [Vec<f64>; 3],
        offset: [f64; 3],
        boundaries: [BoundaryType; NUM_FACES],
        solve_3d: bool,
    ) -> CmfdResult<Self> {
        for (axis, w) in widths.iter().enumerate() {
            if w.is_empty() || w.iter().any(|v| !v.is_finite() || *v <= 0.0) {
                return Err(CmfdError::ConfigError(format!(
                    "Axis {axis} needs at least one cell of finite positive width"
                )));
            }
        }
        let bounds = [0, 1, 2].map(|axis| {
            let mut b = Vec::with_capacity(widths[axis].len() + 1);
            let mut pos = offset[axis];
            b.push(pos);
            for w in &widths[axis] {
                pos += w;
                b.push(pos);
            }
            b
        });
        Ok(Lattice {
            num: [widths[0].len(), widths[1].len(), widths[2].len()],
            widths,
            bounds,
            boundaries,
            solve_3d,
        })
    }

    pub fn num_x(&self) -> usize {
        self.num[0]
    }

    pub fn num_y(&self) -> usize {
        self.num[1]
    }

    pub fn num_z(&self) -> usize {
        self.num[2]
    }

    pub fn num_cells(&self) -> usize {
        self.num[0] * self.num[1] * self.num[2]
    }

    pub fn solve_3d(&self) -> bool {
        self.solve_3d
    }

    pub fn boundary(&self, face: usize) -> BoundaryType {
        self.boundaries[face]
    }

    /// Faces that carry leakage: x/y in 2D, all six in 3D.
    pub fn active_faces(&self) -> &'static [usize] {
        if self.solve_3d {
            &FACES_3D
        } else {
            &FACES_2D
        }
    }

    #[inline]
    pub fn cell_index(&self, x: usize, y: usize, z: usize) -> usize {
        x + self.num[0] * (y + self.num[1] * z)
    }

    #[inline]
    pub fn cell_coords(&self, cell: usize) -> [usize; 3] {
        let x = cell % self.num[0];
        let y = (cell / self.num[0]) % self.num[1];
        let z = cell / (self.num[0] * self.num[1]);
        [x, y, z]
    }

    pub fn cell_width(&self, cell: usize, axis: usize) -> f64 {
        self.widths[axis][self.cell_coords(cell)[axis]]
    }

    pub fn cell_volume(&self, cell: usize) -> f64 {
        let c = self.cell_coords(cell);
        self.widths[0][c[0]] * self.widths[1][c[1]] * self.widths[2][c[2]]
    }

    pub fn cell_center(&self, cell: usize) -> [f64; 3] {
        let c = self.cell_coords(cell);
        [0, 1, 2].map(|axis| 0.5 * (self.bounds[axis][c[axis]] + self.bounds[axis][c[axis] + 1]))
    }

    /// Area of `face` of `cell`: product of the two widths orthogonal to it.
    pub fn surface_area(&self, cell: usize, face: usize) -> f64 {
        let axis = face_axis(face);
        (0..3)
            .filter(|a| *a != axis)
            .map(|a| self.cell_width(cell, a))
            .product()
    }

    /// Cell width measured across `face`.
    pub fn perpendicular_width(&self, cell: usize, face: usize) -> f64 {
        self.cell_width(cell, face_axis(face))
    }

    /// Cell containing `point`, `None` outside the mesh. Points on an
    /// interior boundary belong to the upper cell, points on the outer max
    /// boundary to the last cell.
    pub fn find_cell(&self, point: [f64; 3]) -> Option<usize> {
        let mut idx = [0usize; 3];
        let axes = if self.solve_3d { 3 } else { 2 };
        for axis in 0..axes {
            idx[axis] = self.locate(axis, point[axis])?;
        }
        Some(self.cell_index(idx[0], idx[1], idx[2]))
    }

    fn locate(&self, axis: usize, coord: f64) -> Option<usize> {
        let b = &self.bounds[axis];
        let lo = b[0];
        let hi = b[b.len() - 1];
        if !coord.is_finite() || coord < lo - ON_SURFACE_THRESH || coord > hi + ON_SURFACE_THRESH {
            return None;
        }
        let upper = b[1..].partition_point(|edge| *edge <= coord);
        Some(upper.min(self.num[axis] - 1))
    }

    /// Surface of `cell` that `point` lies on, `None` if it is interior.
    pub fn find_surface(&self, cell: usize, point: [f64; 3]) -> Option<usize> {
        let c = self.cell_coords(cell);
        let axes = if self.solve_3d { 3 } else { 2 };
        let mut dir = [0i8; 3];
        for axis in 0..axes {
            dir[axis] = self.side(axis, c[axis], point[axis]);
        }
        surface_from_direction(dir)
    }

    /// On-the-fly variant for 3D ray tracing over 2D tracks: combine the
    /// radial surface found in the 2D plane with the axial position `z`.
    pub fn find_surface_otf(&self, cell: usize, z: f64, surface_2d: Option<usize>) -> Option<usize> {
        let mut dir = surface_2d.map(surface_direction).unwrap_or([0; 3]);
        dir[2] = 0;
        if self.solve_3d {
            dir[2] = self.side(2, self.cell_coords(cell)[2], z);
        }
        surface_from_direction(dir)
    }

    fn side(&self, axis: usize, index: usize, coord: f64) -> i8 {
        if (coord - self.bounds[axis][index]).abs() < ON_SURFACE_THRESH {
            -1
        } else if (coord - self.bounds[axis][index + 1]).abs() < ON_SURFACE_THRESH {
            1
        } else {
            0
        }
    }

    /// Cell across `surface` of `cell`. Periodic exterior faces wrap, other
    /// boundary types have no neighbour.
    pub fn cell_next(&self, cell: usize, surface: usize) -> Option<usize> {
        let dir = SURFACE_DIRECTIONS[surface];
        let mut c = self.cell_coords(cell);
        for axis in 0..3 {
            if dir[axis] == 0 {
                continue;
            }
            let n = self.num[axis];
            let face = face_for_axis(axis, dir[axis]);
            c[axis] = if dir[axis] < 0 {
                match c[axis].checked_sub(1) {
                    Some(v) => v,
                    None if self.boundaries[face] == BoundaryType::Periodic => n - 1,
                    None => return None,
                }
            } else if c[axis] + 1 < n {
                c[axis] + 1
            } else if self.boundaries[face] == BoundaryType::Periodic {
                0
            } else {
                return None;
            };
        }
        Some(self.cell_index(c[0], c[1], c[2]))
    }

    /// Cell at a fixed offset without wrapping, `None` outside the mesh.
    pub fn cell_by_offset(&self, cell: usize, offset: [i64; 3]) -> Option<usize> {
        let c = self.cell_coords(cell);
        let mut out = [0usize; 3];
        for axis in 0..3 {
            let v = c[axis] as i64 + offset[axis];
            if v < 0 || v >= self.num[axis] as i64 {
                return None;
            }
            out[axis] = v as usize;
        }
        Some(self.cell_index(out[0], out[1], out[2]))
    }

    /// Red-black colour of every cell: `(x + y + z) mod 2`.
    pub fn cell_colors(&self) -> Vec<u8> {
        (0..self.num_cells())
            .map(|cell| {
                let c = self.cell_coords(cell);
                ((c[0] + c[1] + c[2]) % 2) as u8
            })
            .collect()
    }
}
