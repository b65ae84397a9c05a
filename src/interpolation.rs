//! Piecewise-linear interpolation on a [`StateGrid`].
//!
//! Queries outside `[grid.min(), grid.max()]` are clamped to the nearest
//! boundary value. The interpolant never extrapolates linearly, so it is
//! non-expansive in the sup norm and keeps the job-search map a contraction.

use crate::error::{DpError, Result};
use crate::grid::StateGrid;

/// Linear interpolant of `values` sampled at the points of `grid`.
#[derive(Clone, Copy, Debug)]
pub struct LinearInterpolator<'a> {
    grid: &'a [f64],
    values: &'a [f64],
}

impl<'a> LinearInterpolator<'a> {
    /// Pairs a grid with function values, one per grid point.
    pub fn new(grid: &'a StateGrid, values: &'a [f64]) -> Result<Self> {
        if values.len() != grid.len() {
            return Err(DpError::dimension_mismatch(
                "interpolation values",
                grid.len(),
                values.len(),
            ));
        }
        Ok(Self {
            grid: grid.as_slice(),
            values,
        })
    }

    /// Evaluates the interpolant at `x`, clamping outside the grid.
    #[inline]
    pub fn evaluate(&self, x: f64) -> f64 {
        if x.is_nan() {
            return f64::NAN;
        }
        let n = self.grid.len();
        if x <= self.grid[0] {
            return self.values[0];
        }
        if x >= self.grid[n - 1] {
            return self.values[n - 1];
        }

        // grid[upper - 1] <= x < grid[upper], with 1 <= upper <= n - 1 here.
        let upper = self.grid.partition_point(|&p| p <= x);
        let lower = upper - 1;
        let (x0, x1) = (self.grid[lower], self.grid[upper]);
        let (y0, y1) = (self.values[lower], self.values[upper]);
        y0 + (y1 - y0) * (x - x0) / (x1 - x0)
    }
}
