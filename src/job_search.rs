//! Job search with persistent and transitory wage components.
//!
//! Wage offers are `w = exp(z) + y` with transitory part `y = exp(μ + s ζ)` and
//! persistent state `z' = d + ρ z + σ ε`, where `ζ, ε ~ N(0, 1)`. With log
//! utility the continuation value `f` is the fixed point of
//!
//! ```text
//! Qf(z) = ln(c) + β E max{ ln(w') / (1 - β), f(z') }
//! ```
//!
//! `f` is stored on a grid over `z`, evaluated off-grid by clamped linear
//! interpolation, and the expectation is a Monte Carlo average over a fixed set
//! of draws. Once `f*` is known, an offer `w` in state `z` is accepted when
//! `ln(w) / (1 - β) > f*(z)`, so the reservation wage is
//! `w*(z) = exp(f*(z) (1 - β))`.

use log::debug;
use nalgebra::DVector;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{DpError, Result};
use crate::grid::StateGrid;
use crate::integration::ShockDraws;
use crate::interpolation::LinearInterpolator;
use crate::solving::{
    iterate_to_fixed_point, FixedPointSummary, IterationOptions, LogReporter, Operator,
    ProgressReporter,
};

/// Half-width of the state grid, in standard deviations around the mean.
const GRID_STD_DEVIATIONS: f64 = 3.0;

/// Parameters of the job-search model.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobSearchParameters {
    /// Location μ of the log transitory component.
    pub transitory_mean: f64,
    /// Scale s of the log transitory component.
    pub transitory_volatility: f64,
    /// AR(1) intercept d of the persistent component.
    pub drift: f64,
    /// AR(1) coefficient ρ of the persistent component.
    pub persistence: f64,
    /// AR(1) innovation scale σ of the persistent component.
    pub volatility: f64,
    /// Discount factor β.
    pub discount_factor: f64,
    /// Unemployment compensation c received while searching.
    pub unemployment_compensation: f64,
    /// Number of Monte Carlo draws used for the expectation.
    pub mc_size: usize,
    /// Number of points on the persistent-state grid.
    pub grid_size: usize,
}

impl Default for JobSearchParameters {
    fn default() -> Self {
        Self {
            transitory_mean: 0.0,
            transitory_volatility: 1.0,
            drift: 0.0,
            persistence: 0.9,
            volatility: 0.1,
            discount_factor: 0.98,
            unemployment_compensation: 5.0,
            mc_size: 5_000,
            grid_size: 200,
        }
    }
}

impl JobSearchParameters {
    /// Checks every scalar against its admissible range.
    pub fn validate(&self) -> Result<()> {
        let beta = self.discount_factor;
        if !(beta > 0.0 && beta < 1.0) {
            return Err(DpError::configuration(
                "discount_factor",
                format!("must lie in (0, 1), found {beta}"),
            ));
        }
        let c = self.unemployment_compensation;
        if !(c.is_finite() && c > 0.0) {
            return Err(DpError::configuration(
                "unemployment_compensation",
                format!("must be positive, found {c}"),
            ));
        }
        if !(self.persistence.abs() < 1.0) {
            return Err(DpError::configuration(
                "persistence",
                format!("must lie in (-1, 1), found {}", self.persistence),
            ));
        }
        if !(self.volatility.is_finite() && self.volatility > 0.0) {
            return Err(DpError::configuration(
                "volatility",
                format!("must be positive, found {}", self.volatility),
            ));
        }
        if !(self.transitory_volatility.is_finite() && self.transitory_volatility >= 0.0) {
            return Err(DpError::configuration(
                "transitory_volatility",
                format!("must be non-negative, found {}", self.transitory_volatility),
            ));
        }
        if !(self.drift.is_finite() && self.transitory_mean.is_finite()) {
            return Err(DpError::configuration(
                "drift",
                "drift and transitory mean must be finite",
            ));
        }
        if self.mc_size == 0 {
            return Err(DpError::configuration("mc_size", "must be positive"));
        }
        if self.grid_size < 2 {
            return Err(DpError::configuration(
                "grid_size",
                format!("at least two points are required, found {}", self.grid_size),
            ));
        }
        Ok(())
    }

    /// Grid covering three stationary standard deviations either side of the
    /// mean of the persistent component, using `sd = sqrt(σ / (1 - ρ²))`.
    pub fn state_grid(&self) -> Result<StateGrid> {
        self.validate()?;
        let rho = self.persistence;
        let mean = self.drift / (1.0 - rho);
        let sd = (self.volatility / (1.0 - rho * rho)).sqrt();
        StateGrid::linspace(
            mean - GRID_STD_DEVIATIONS * sd,
            mean + GRID_STD_DEVIATIONS * sd,
            self.grid_size,
        )
    }
}

/// A validated job-search problem with its state grid and fixed shock draws.
#[derive(Clone, Debug)]
pub struct JobSearch {
    parameters: JobSearchParameters,
    grid: StateGrid,
    draws: ShockDraws,
}

impl JobSearch {
    /// Builds the problem around externally generated draws (`2 x mc_size`).
    pub fn new(parameters: JobSearchParameters, draws: ShockDraws) -> Result<Self> {
        parameters.validate()?;
        if draws.draw_count() != parameters.mc_size {
            return Err(DpError::dimension_mismatch(
                "shock draw count",
                parameters.mc_size,
                draws.draw_count(),
            ));
        }
        let grid = parameters.state_grid()?;
        Ok(Self {
            parameters,
            grid,
            draws,
        })
    }

    /// Builds the problem, drawing `mc_size` standard-normal pairs from `seed`.
    pub fn with_seed(parameters: JobSearchParameters, seed: u64) -> Result<Self> {
        parameters.validate()?;
        let draws = ShockDraws::standard_normal(parameters.mc_size, seed)?;
        Self::new(parameters, draws)
    }

    /// Problem parameters.
    pub fn parameters(&self) -> &JobSearchParameters {
        &self.parameters
    }

    /// Grid over the persistent component `z`.
    pub fn grid(&self) -> &StateGrid {
        &self.grid
    }

    /// Monte Carlo draws shared by every sweep.
    pub fn draws(&self) -> &ShockDraws {
        &self.draws
    }

    /// Applies `Q` to `f_in`, writing the result to `f_out`.
    ///
    /// Grid points are processed in parallel, each against the full set of draws.
    pub fn continuation_update(
        &self,
        f_in: &DVector<f64>,
        f_out: &mut DVector<f64>,
    ) -> Result<()> {
        let n = self.grid.len();
        if f_out.len() != n {
            return Err(DpError::dimension_mismatch(
                "output continuation values",
                n,
                f_out.len(),
            ));
        }
        let interpolant = LinearInterpolator::new(&self.grid, f_in.as_slice())?;

        let JobSearchParameters {
            transitory_mean: mu,
            transitory_volatility: s,
            drift: d,
            persistence: rho,
            volatility: sigma,
            discount_factor: beta,
            unemployment_compensation: c,
            ..
        } = self.parameters;
        let flow = c.ln();
        let mc_size = self.draws.draw_count() as f64;

        f_out
            .as_mut_slice()
            .par_iter_mut()
            .zip(self.grid.as_slice().par_iter())
            .for_each(|(out, &z)| {
                let mut total = 0.0;
                for (e1, e2) in self.draws.pairs() {
                    let z_next = d + rho * z + sigma * e1;
                    let go_val = interpolant.evaluate(z_next);
                    let y_next = (mu + s * e2).exp();
                    let w_next = z_next.exp() + y_next;
                    let stop_val = w_next.ln() / (1.0 - beta);
                    total += stop_val.max(go_val);
                }
                *out = flow + beta * total / mc_size;
            });

        if f_out.iter().any(|value| !value.is_finite()) {
            return Err(DpError::NumericalError {
                context: "continuation value update",
            });
        }
        Ok(())
    }

    /// Iterates `Q` from `f ≡ ln(c)`, reporting progress to the log.
    pub fn solve(&self, options: &IterationOptions) -> Result<JobSearchSolution> {
        self.solve_with_reporter(options, &mut LogReporter)
    }

    /// Iterates `Q` from `f ≡ ln(c)`, sending progress to `reporter`.
    pub fn solve_with_reporter<R>(
        &self,
        options: &IterationOptions,
        reporter: &mut R,
    ) -> Result<JobSearchSolution>
    where
        R: ProgressReporter + ?Sized,
    {
        debug!(
            "continuation value iteration on {} grid points with {} draws",
            self.grid.len(),
            self.draws.draw_count()
        );
        let initial = DVector::from_element(
            self.grid.len(),
            self.parameters.unemployment_compensation.ln(),
        );
        let mut operator = ContractionOperator::new(self);
        let fixed_point = iterate_to_fixed_point(&mut operator, initial, options, reporter)?;
        Ok(JobSearchSolution {
            continuation: fixed_point.value,
            summary: fixed_point.summary,
        })
    }

    /// Reservation wages `exp(f(z) (1 - β))` at each grid point.
    pub fn reservation_wages(&self, continuation: &DVector<f64>) -> Result<DVector<f64>> {
        if continuation.len() != self.grid.len() {
            return Err(DpError::dimension_mismatch(
                "continuation values",
                self.grid.len(),
                continuation.len(),
            ));
        }
        let scale = 1.0 - self.parameters.discount_factor;
        Ok(continuation.map(|f| (f * scale).exp()))
    }

    /// Whether an offer `wage` in persistent state `z` beats continued search.
    pub fn accepts(&self, continuation: &DVector<f64>, wage: f64, z: f64) -> Result<bool> {
        let interpolant = LinearInterpolator::new(&self.grid, continuation.as_slice())?;
        if wage <= 0.0 {
            return Ok(false);
        }
        let stop_val = wage.ln() / (1.0 - self.parameters.discount_factor);
        Ok(stop_val > interpolant.evaluate(z))
    }
}

/// The job-search continuation-value map `Q`.
#[derive(Clone, Copy, Debug)]
pub struct ContractionOperator<'a> {
    problem: &'a JobSearch,
}

impl<'a> ContractionOperator<'a> {
    /// Wraps `problem`.
    pub fn new(problem: &'a JobSearch) -> Self {
        Self { problem }
    }
}

impl Operator for ContractionOperator<'_> {
    type State = DVector<f64>;

    fn apply(&mut self, input: &DVector<f64>, output: &mut DVector<f64>) -> Result<()> {
        self.problem.continuation_update(input, output)
    }
}

/// Result of continuation value iteration.
#[derive(Clone, Debug)]
pub struct JobSearchSolution {
    /// Continuation value `f` on the persistent-state grid.
    pub continuation: DVector<f64>,
    /// Iteration diagnostics.
    pub summary: FixedPointSummary,
}

impl JobSearchSolution {
    /// `true` when iteration met the tolerance.
    pub fn converged(&self) -> bool {
        self.summary.converged()
    }
}
