//! Fixed-point iteration driver, its configuration and diagnostics.
//!
//! Both solvers in this crate are instances of the same loop: apply an
//! operator to the previous iterate, measure the sup-norm gap, and stop once
//! the gap falls below a tolerance or the iteration budget runs out. The
//! driver keeps two buffers and swaps them each sweep, so an operator never
//! reads from the array it is writing.

use std::mem;

use log::{debug, info, warn};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use crate::error::{DpError, Result};

/// Configuration for fixed-point iteration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IterationOptions {
    /// Supremum norm tolerance for convergence.
    pub tolerance: f64,
    /// Maximum number of sweeps allowed before giving up.
    pub max_iterations: usize,
    /// A progress report is emitted every `report_interval` sweeps.
    pub report_interval: usize,
}

impl Default for IterationOptions {
    fn default() -> Self {
        Self {
            tolerance: 1e-4,
            max_iterations: 1_000,
            report_interval: 25,
        }
    }
}

impl IterationOptions {
    /// Builds validated options.
    pub fn new(tolerance: f64, max_iterations: usize, report_interval: usize) -> Result<Self> {
        let options = Self {
            tolerance,
            max_iterations,
            report_interval,
        };
        options.validate()?;
        Ok(options)
    }

    /// Overrides the tolerance.
    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    /// Overrides the iteration budget.
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Overrides the progress report interval.
    pub fn with_report_interval(mut self, report_interval: usize) -> Self {
        self.report_interval = report_interval;
        self
    }

    /// Checks that the tolerance is positive and the report interval non-zero.
    pub fn validate(&self) -> Result<()> {
        if !(self.tolerance.is_finite() && self.tolerance > 0.0) {
            return Err(DpError::configuration(
                "tolerance",
                format!("must be positive and finite, found {}", self.tolerance),
            ));
        }
        if self.report_interval == 0 {
            return Err(DpError::configuration(
                "report_interval",
                "must be at least one",
            ));
        }
        Ok(())
    }
}

/// Terminal state of a fixed-point run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SolveStatus {
    /// The sup-norm gap fell to or below the tolerance.
    Converged,
    /// The iteration budget ran out first.
    Exhausted,
}

/// Diagnostics returned alongside the final iterate.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FixedPointSummary {
    /// How the run ended.
    pub status: SolveStatus,
    /// Number of sweeps performed.
    pub iterations: usize,
    /// Sup-norm gap observed in the final sweep (`+inf` if no sweep ran).
    pub max_gap: f64,
}

impl FixedPointSummary {
    /// `true` when the run met the tolerance.
    pub fn converged(&self) -> bool {
        self.status == SolveStatus::Converged
    }
}

/// Final iterate plus diagnostics.
#[derive(Clone, Debug)]
pub struct FixedPoint<S> {
    /// Last array produced by the operator (or the initial array if none was).
    pub value: S,
    /// Run diagnostics.
    pub summary: FixedPointSummary,
}

/// Arrays the driver can measure convergence on.
pub trait FixedPointState: Clone {
    /// `max_i |self_i - other_i|`.
    fn sup_distance(&self, other: &Self) -> f64;
}

fn sup_distance_slices(a: &[f64], b: &[f64]) -> f64 {
    a.iter()
        .zip(b.iter())
        .fold(0.0_f64, |gap, (x, y)| gap.max((x - y).abs()))
}

impl FixedPointState for DVector<f64> {
    fn sup_distance(&self, other: &Self) -> f64 {
        sup_distance_slices(self.as_slice(), other.as_slice())
    }
}

impl FixedPointState for DMatrix<f64> {
    fn sup_distance(&self, other: &Self) -> f64 {
        sup_distance_slices(self.as_slice(), other.as_slice())
    }
}

/// A map from the current iterate to the next one.
pub trait Operator {
    /// The array type being iterated.
    type State: FixedPointState;

    /// Writes `T(input)` into `output`. Must not read `output`.
    fn apply(&mut self, input: &Self::State, output: &mut Self::State) -> Result<()>;
}

/// One-way sink for `(iteration, error)` progress observations.
pub trait ProgressReporter {
    /// Receives the 1-based iteration count and the sup-norm gap of that sweep.
    fn report(&mut self, iteration: usize, error: f64);
}

impl<F> ProgressReporter for F
where
    F: FnMut(usize, f64),
{
    fn report(&mut self, iteration: usize, error: f64) {
        self(iteration, error)
    }
}

/// Forwards progress to the `log` facade at `info` level.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogReporter;

impl ProgressReporter for LogReporter {
    fn report(&mut self, iteration: usize, error: f64) {
        info!("error at iteration {iteration} is {error}");
    }
}

/// Repeatedly applies `operator` starting from `initial` until the sup-norm
/// gap between successive iterates is at most `options.tolerance`.
///
/// Running out of iterations is reported through [`SolveStatus::Exhausted`],
/// not as an error; only invalid options and operator failures return `Err`.
pub fn iterate_to_fixed_point<O, R>(
    operator: &mut O,
    initial: O::State,
    options: &IterationOptions,
    reporter: &mut R,
) -> Result<FixedPoint<O::State>>
where
    O: Operator,
    R: ProgressReporter + ?Sized,
{
    options.validate()?;
    debug!(
        "starting fixed-point iteration (tolerance {}, max iterations {})",
        options.tolerance, options.max_iterations
    );

    let mut current = initial;
    if options.max_iterations == 0 {
        warn!("iteration budget is zero; returning the initial array");
        return Ok(FixedPoint {
            value: current,
            summary: FixedPointSummary {
                status: SolveStatus::Exhausted,
                iterations: 0,
                max_gap: f64::INFINITY,
            },
        });
    }

    let mut next = current.clone();
    let mut iteration = 0usize;
    let mut max_gap = f64::INFINITY;

    while iteration < options.max_iterations {
        operator.apply(&current, &mut next)?;
        max_gap = current.sup_distance(&next);
        if max_gap.is_nan() {
            return Err(DpError::NumericalError {
                context: "fixed-point sup-norm gap",
            });
        }
        iteration += 1;

        if iteration % options.report_interval == 0 {
            reporter.report(iteration, max_gap);
        }

        if max_gap <= options.tolerance {
            info!("converged in {iteration} iterations");
            return Ok(FixedPoint {
                value: next,
                summary: FixedPointSummary {
                    status: SolveStatus::Converged,
                    iterations: iteration,
                    max_gap,
                },
            });
        }

        mem::swap(&mut current, &mut next);
    }

    warn!("failed to converge after {iteration} iterations; last gap {max_gap}");
    Ok(FixedPoint {
        value: current,
        summary: FixedPointSummary {
            status: SolveStatus::Exhausted,
            iterations: iteration,
            max_gap,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// `x -> a * x + b` applied elementwise; fixed point `b / (1 - a)`.
    struct Affine {
        slope: f64,
        intercept: f64,
        calls: usize,
    }

    impl Operator for Affine {
        type State = DVector<f64>;

        fn apply(&mut self, input: &DVector<f64>, output: &mut DVector<f64>) -> Result<()> {
            self.calls += 1;
            for (out, x) in output.iter_mut().zip(input.iter()) {
                *out = self.slope * x + self.intercept;
            }
            Ok(())
        }
    }

    struct Failing;

    impl Operator for Failing {
        type State = DVector<f64>;

        fn apply(&mut self, _input: &DVector<f64>, _output: &mut DVector<f64>) -> Result<()> {
            Err(DpError::NumericalError { context: "test" })
        }
    }

    fn affine(slope: f64, intercept: f64) -> Affine {
        Affine {
            slope,
            intercept,
            calls: 0,
        }
    }

    #[test]
    fn converges_to_affine_fixed_point() {
        let mut op = affine(0.5, 1.0);
        let options = IterationOptions::default().with_tolerance(1e-10);
        let result =
            iterate_to_fixed_point(&mut op, DVector::zeros(3), &options, &mut LogReporter)
                .unwrap();
        assert!(result.summary.converged());
        assert!(result.summary.max_gap <= 1e-10);
        assert_eq!(op.calls, result.summary.iterations);
        for value in result.value.iter() {
            assert_relative_eq!(*value, 2.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn zero_budget_returns_initial_array() {
        let mut op = affine(0.5, 1.0);
        let initial = DVector::from_vec(vec![3.0, -4.0]);
        let options = IterationOptions::default().with_max_iterations(0);
        let result =
            iterate_to_fixed_point(&mut op, initial.clone(), &options, &mut LogReporter).unwrap();
        assert_eq!(result.summary.status, SolveStatus::Exhausted);
        assert_eq!(result.summary.iterations, 0);
        assert_eq!(result.value, initial);
        assert_eq!(op.calls, 0);
    }

    #[test]
    fn exhausted_run_returns_last_iterate() {
        let mut op = affine(0.5, 1.0);
        let options = IterationOptions::default()
            .with_tolerance(1e-12)
            .with_max_iterations(3);
        let result =
            iterate_to_fixed_point(&mut op, DVector::zeros(1), &options, &mut LogReporter)
                .unwrap();
        assert_eq!(result.summary.status, SolveStatus::Exhausted);
        assert_eq!(result.summary.iterations, 3);
        // 0 -> 1 -> 1.5 -> 1.75
        assert_relative_eq!(result.value[0], 1.75, epsilon = 1e-15);
        assert_relative_eq!(result.summary.max_gap, 0.25, epsilon = 1e-15);
    }

    #[test]
    fn reports_every_interval() {
        let mut op = affine(0.9, 0.0);
        let options = IterationOptions::default()
            .with_tolerance(1e-12)
            .with_max_iterations(10)
            .with_report_interval(4);
        let mut seen = Vec::new();
        let mut reporter = |iteration: usize, error: f64| seen.push((iteration, error));
        iterate_to_fixed_point(&mut op, DVector::from_element(2, 1.0), &options, &mut reporter)
            .unwrap();
        let iterations: Vec<usize> = seen.iter().map(|(i, _)| *i).collect();
        assert_eq!(iterations, vec![4, 8]);
        assert!(seen[1].1 < seen[0].1);
    }

    #[test]
    fn invalid_options_fail_before_any_sweep() {
        let mut op = affine(0.5, 1.0);
        for options in [
            IterationOptions::default().with_tolerance(0.0),
            IterationOptions::default().with_tolerance(-1.0),
            IterationOptions::default().with_report_interval(0),
        ] {
            let err = iterate_to_fixed_point(&mut op, DVector::zeros(1), &options, &mut LogReporter)
                .unwrap_err();
            assert!(err.is_configuration());
        }
        assert_eq!(op.calls, 0);
        assert!(IterationOptions::new(f64::NAN, 10, 1).is_err());
    }

    #[test]
    fn operator_errors_propagate() {
        let options = IterationOptions::default();
        let result =
            iterate_to_fixed_point(&mut Failing, DVector::zeros(1), &options, &mut LogReporter);
        assert!(matches!(result, Err(DpError::NumericalError { .. })));
    }

    #[test]
    fn options_deserialize_with_defaults() {
        let options: IterationOptions = serde_json::from_str(r#"{"tolerance": 1e-6}"#).unwrap();
        assert_eq!(options.tolerance, 1e-6);
        assert_eq!(options.max_iterations, 1_000);
        assert_eq!(options.report_interval, 25);
    }
}
