//! State grids and finite Markov chains shared by the solvers.

use std::ops::Index;

use nalgebra::{DMatrix, DVector};

use crate::error::{DpError, Result};

/// Maximum deviation from one tolerated when checking transition kernel rows.
pub const ROW_SUM_TOLERANCE: f64 = 1e-9;

/// A strictly increasing, finite sequence of sample points for a continuous state.
#[derive(Clone, Debug, PartialEq)]
pub struct StateGrid {
    points: DVector<f64>,
}

impl StateGrid {
    /// Validates and wraps the supplied points.
    pub fn new(points: DVector<f64>) -> Result<Self> {
        if points.is_empty() {
            return Err(DpError::dimension_mismatch("state grid", 1, 0));
        }
        if points.iter().any(|p| !p.is_finite()) {
            return Err(DpError::NumericalError {
                context: "state grid construction",
            });
        }
        for (index, pair) in points.as_slice().windows(2).enumerate() {
            if pair[1] <= pair[0] {
                return Err(DpError::configuration(
                    "grid",
                    format!(
                        "points must be strictly increasing; point {} ({}) does not exceed {}",
                        index + 1,
                        pair[1],
                        pair[0]
                    ),
                ));
            }
        }
        Ok(Self { points })
    }

    /// Evenly spaced grid over `[min, max]` with both endpoints included exactly.
    pub fn linspace(min: f64, max: f64, size: usize) -> Result<Self> {
        if size < 2 {
            return Err(DpError::configuration(
                "grid_size",
                format!("at least two points are required, found {size}"),
            ));
        }
        if !min.is_finite() || !max.is_finite() {
            return Err(DpError::configuration("grid bounds", "bounds must be finite"));
        }
        if max <= min {
            return Err(DpError::configuration(
                "grid bounds",
                format!("upper bound {max} must exceed lower bound {min}"),
            ));
        }

        let step = (max - min) / (size - 1) as f64;
        let points = DVector::from_fn(size, |i, _| {
            if i == size - 1 {
                max
            } else {
                min + step * i as f64
            }
        });
        Self::new(points)
    }

    /// Asset grid over `[0, max]`; the zero lower bound keeps saving nothing feasible.
    pub fn asset_grid(size: usize, max: f64) -> Result<Self> {
        Self::linspace(0.0, max, size)
    }

    /// Number of grid points.
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Always `false`; grids are validated to be non-empty.
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Smallest grid point.
    pub fn min(&self) -> f64 {
        self.points[0]
    }

    /// Largest grid point.
    pub fn max(&self) -> f64 {
        self.points[self.points.len() - 1]
    }

    /// Number of grid points less than or equal to `value`.
    ///
    /// Equivalently, the largest `idx` such that `grid[idx - 1] <= value`.
    pub fn count_at_most(&self, value: f64) -> usize {
        self.points.as_slice().partition_point(|&p| p <= value)
    }

    /// Returns the points as a contiguous slice.
    pub fn as_slice(&self) -> &[f64] {
        self.points.as_slice()
    }

    /// Returns a read-only view of the underlying vector.
    pub fn points(&self) -> &DVector<f64> {
        &self.points
    }

    /// Iterates over grid points in increasing order.
    pub fn iter(&self) -> impl Iterator<Item = &f64> {
        self.points.iter()
    }
}

impl Index<usize> for StateGrid {
    type Output = f64;

    fn index(&self, index: usize) -> &f64 {
        &self.points[index]
    }
}

/// Finite-state Markov chain: state values plus a row-stochastic transition kernel.
#[derive(Clone, Debug)]
pub struct MarkovChain {
    states: StateGrid,
    transition: DMatrix<f64>,
}

impl MarkovChain {
    /// Validates that `transition` is square, matches the states and is row-stochastic.
    pub fn new(states: StateGrid, transition: DMatrix<f64>) -> Result<Self> {
        let n = states.len();
        if transition.nrows() != n {
            return Err(DpError::dimension_mismatch(
                "transition rows",
                n,
                transition.nrows(),
            ));
        }
        if transition.ncols() != n {
            return Err(DpError::dimension_mismatch(
                "transition columns",
                n,
                transition.ncols(),
            ));
        }

        for (row, probabilities) in transition.row_iter().enumerate() {
            for (col, value) in probabilities.iter().enumerate() {
                if !value.is_finite() {
                    return Err(DpError::NumericalError {
                        context: "transition kernel validation",
                    });
                }
                if *value < 0.0 {
                    return Err(DpError::NegativeProbability {
                        row,
                        col,
                        value: *value,
                    });
                }
            }
            let sum = probabilities.sum();
            if (sum - 1.0).abs() > ROW_SUM_TOLERANCE {
                return Err(DpError::NonStochasticRow { row, sum });
            }
        }

        Ok(Self { states, transition })
    }

    /// Degenerate one-state chain that stays at `value` forever.
    pub fn constant(value: f64) -> Result<Self> {
        let states = StateGrid::new(DVector::from_element(1, value))?;
        Self::new(states, DMatrix::from_element(1, 1, 1.0))
    }

    /// Number of states.
    pub fn len(&self) -> usize {
        self.states.len()
    }

    /// Always `false`; chains carry at least one state.
    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// State values in increasing order.
    pub fn states(&self) -> &StateGrid {
        &self.states
    }

    /// Transition kernel, indexed by (current state, next state).
    pub fn transition(&self) -> &DMatrix<f64> {
        &self.transition
    }

    /// Applies a strictly increasing map to the state values, keeping the kernel.
    ///
    /// Used to turn log-income states into income levels.
    pub fn map_states<F>(&self, f: F) -> Result<Self>
    where
        F: Fn(f64) -> f64,
    {
        let mapped = self.states.points().map(f);
        Ok(Self {
            states: StateGrid::new(mapped)?,
            transition: self.transition.clone(),
        })
    }
}

/// Discretizes an AR(1) process `x' = drift + persistence * x + volatility * e`.
///
/// Implementations (for example Rouwenhorst's or Tauchen's method) live outside
/// this crate; any closure with the matching signature can be used.
pub trait MarkovDiscretizer {
    /// Returns a chain with `size` states approximating the process.
    fn discretize(
        &self,
        size: usize,
        drift: f64,
        volatility: f64,
        persistence: f64,
    ) -> Result<MarkovChain>;
}

impl<F> MarkovDiscretizer for F
where
    F: Fn(usize, f64, f64, f64) -> Result<MarkovChain>,
{
    fn discretize(
        &self,
        size: usize,
        drift: f64,
        volatility: f64,
        persistence: f64,
    ) -> Result<MarkovChain> {
        self(size, drift, volatility, persistence)
    }
}
