//! Toroidal grid geometry: shapes, flat indexing, wrapped coordinate math.
//!
//! The grid is a flat-packed n-dimensional torus. Axis 0 varies fastest, so
//! for a `(8, 8)` shape the flat index of `(x, y)` is `y * 8 + x`. Every
//! coordinate operation wraps modulo each dimension; [`Shape::target_coord`]
//! is the only sanctioned way to move a pointer.

use thiserror::Error;

/// Errors raised while constructing a [`Shape`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GeometryError {
    /// A shape must have at least one dimension.
    #[error("shape has no dimensions")]
    NoDimensions,
    /// Every dimension must be non-zero.
    #[error("dimension {axis} is zero")]
    ZeroDimension {
        /// Axis index of the offending dimension.
        axis: usize,
    },
}

/// Immutable description of a toroidal grid's dimensions and strides.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shape {
    dims: Vec<u32>,
    strides: Vec<usize>,
    volume: usize,
}

impl Shape {
    /// Builds a shape from per-axis extents. Fails fast on an empty or
    /// zero-sized dimension list.
    pub fn new(dims: &[u32]) -> Result<Self, GeometryError> {
        if dims.is_empty() {
            return Err(GeometryError::NoDimensions);
        }
        for (axis, &d) in dims.iter().enumerate() {
            if d == 0 {
                return Err(GeometryError::ZeroDimension { axis });
            }
        }
        let mut strides = Vec::with_capacity(dims.len());
        let mut stride = 1usize;
        for &d in dims {
            strides.push(stride);
            stride *= d as usize;
        }
        Ok(Self {
            dims: dims.to_vec(),
            strides,
            volume: stride,
        })
    }

    /// Per-axis extents.
    #[must_use]
    pub fn dims(&self) -> &[u32] {
        &self.dims
    }

    /// Number of axes.
    #[must_use]
    pub fn dim_count(&self) -> usize {
        self.dims.len()
    }

    /// Total number of cells (`∏ dims`).
    #[must_use]
    pub fn volume(&self) -> usize {
        self.volume
    }

    /// Wraps one component into `0..dims[axis]`.
    #[must_use]
    pub fn wrap_component(&self, axis: usize, value: i32) -> i32 {
        value.rem_euclid(self.dims[axis] as i32)
    }

    /// Wraps a full coordinate onto the torus.
    #[must_use]
    pub fn wrap(&self, coord: &[i32]) -> Vec<i32> {
        debug_assert_eq!(coord.len(), self.dims.len());
        coord
            .iter()
            .enumerate()
            .map(|(axis, &c)| self.wrap_component(axis, c))
            .collect()
    }

    /// Flat index of a coordinate, wrapping each component first.
    #[must_use]
    pub fn flat_index(&self, coord: &[i32]) -> usize {
        debug_assert_eq!(coord.len(), self.dims.len());
        coord
            .iter()
            .enumerate()
            .map(|(axis, &c)| self.wrap_component(axis, c) as usize * self.strides[axis])
            .sum()
    }

    /// Coordinate of a flat index. Inverse of [`Shape::flat_index`] for
    /// in-range indices.
    #[must_use]
    pub fn coord_of(&self, flat: usize) -> Vec<i32> {
        debug_assert!(flat < self.volume, "flat index {flat} out of range");
        let mut rest = flat;
        self.dims
            .iter()
            .map(|&d| {
                let c = (rest % d as usize) as i32;
                rest /= d as usize;
                c
            })
            .collect()
    }

    /// `(origin + delta) mod shape` — the only way pointers move.
    #[must_use]
    pub fn target_coord(&self, origin: &[i32], delta: &[i32]) -> Vec<i32> {
        debug_assert_eq!(origin.len(), delta.len());
        origin
            .iter()
            .zip(delta)
            .enumerate()
            .map(|(axis, (&o, &d))| self.wrap_component(axis, o.wrapping_add(d)))
            .collect()
    }

    /// Moves `steps` cells along `dv` from `origin`.
    #[must_use]
    pub fn advance(&self, origin: &[i32], dv: &[i32], steps: i32) -> Vec<i32> {
        let scaled: Vec<i32> = dv.iter().map(|&d| d.wrapping_mul(steps)).collect();
        self.target_coord(origin, &scaled)
    }

    /// Toroidal Manhattan distance: per axis `min(|a−b|, dim−|a−b|)`, summed.
    #[must_use]
    pub fn torus_distance(&self, a: &[i32], b: &[i32]) -> u64 {
        debug_assert_eq!(a.len(), self.dims.len());
        debug_assert_eq!(b.len(), self.dims.len());
        a.iter()
            .zip(b)
            .enumerate()
            .map(|(axis, (&ca, &cb))| {
                let d = i64::from(self.dims[axis]);
                let diff = (i64::from(self.wrap_component(axis, ca))
                    - i64::from(self.wrap_component(axis, cb)))
                .abs();
                diff.min(d - diff) as u64
            })
            .sum()
    }
}
