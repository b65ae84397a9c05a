//! Optimal savings problem solved by value function iteration.
//!
//! The Bellman equation is
//!
//! ```text
//! v(x, z) = max_{x'} { u(R x + w z - x') + β Σ_{z'} v(x', z') Q(z, z') }
//! ```
//!
//! with `0 <= x' <= R x + w z` and CRRA utility `u(c) = c^{1-γ} / (1-γ)`.
//! Assets `x` live on a [`StateGrid`] starting at zero, income states `z` on the
//! states of a [`MarkovChain`] whose kernel is `Q`.

use log::debug;
use nalgebra::DMatrix;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{DpError, Result};
use crate::grid::{MarkovChain, MarkovDiscretizer, StateGrid};
use crate::solving::{
    iterate_to_fixed_point, FixedPointSummary, IterationOptions, LogReporter, Operator,
    ProgressReporter,
};

/// Shift added to consumption so that `u(0)` stays finite.
pub const CONSUMPTION_FLOOR: f64 = 1e-10;

/// CRRA utility `(c + 1e-10)^(1-γ) / (1-γ)`; `γ = 1` is not supported.
#[inline]
pub fn crra_utility(consumption: f64, risk_aversion: f64) -> f64 {
    let exponent = 1.0 - risk_aversion;
    (consumption + CONSUMPTION_FLOOR).powf(exponent) / exponent
}

/// Economic and numerical parameters of the savings problem.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SavingsParameters {
    /// Discount factor β.
    pub discount_factor: f64,
    /// Curvature γ of CRRA utility.
    pub risk_aversion: f64,
    /// AR(1) coefficient ρ of log income.
    pub persistence: f64,
    /// AR(1) intercept d of log income.
    pub drift: f64,
    /// AR(1) innovation scale σ of log income.
    pub volatility: f64,
    /// Net interest rate r; the gross factor is `1 + r`.
    pub interest_rate: f64,
    /// Wage level w multiplying the income state.
    pub wage: f64,
    /// Number of income states.
    pub shock_grid_size: usize,
    /// Number of asset grid points.
    pub asset_grid_size: usize,
    /// Upper bound of the asset grid.
    pub asset_grid_max: f64,
}

impl Default for SavingsParameters {
    fn default() -> Self {
        Self {
            discount_factor: 0.96,
            risk_aversion: 2.5,
            persistence: 0.9,
            drift: 0.0,
            volatility: 0.1,
            interest_rate: 0.04,
            wage: 1.0,
            shock_grid_size: 25,
            asset_grid_size: 200,
            asset_grid_max: 15.0,
        }
    }
}

impl SavingsParameters {
    /// Gross interest factor `R = 1 + r`.
    pub fn gross_interest(&self) -> f64 {
        1.0 + self.interest_rate
    }

    /// Checks every scalar against its admissible range.
    pub fn validate(&self) -> Result<()> {
        self.validate_model()?;
        if self.asset_grid_size < 2 {
            return Err(DpError::configuration(
                "asset_grid_size",
                format!("at least two points are required, found {}", self.asset_grid_size),
            ));
        }
        if !(self.asset_grid_max.is_finite() && self.asset_grid_max > 0.0) {
            return Err(DpError::configuration(
                "asset_grid_max",
                format!("must be positive, found {}", self.asset_grid_max),
            ));
        }
        Ok(())
    }

    /// Checks everything except `asset_grid_size` and `asset_grid_max`.
    pub fn validate_model(&self) -> Result<()> {
        let beta = self.discount_factor;
        if !(beta > 0.0 && beta < 1.0) {
            return Err(DpError::configuration(
                "discount_factor",
                format!("must lie in (0, 1), found {beta}"),
            ));
        }
        let gamma = self.risk_aversion;
        if !(gamma.is_finite() && gamma > 0.0) {
            return Err(DpError::configuration(
                "risk_aversion",
                format!("must be positive and finite, found {gamma}"),
            ));
        }
        if gamma == 1.0 {
            return Err(DpError::configuration(
                "risk_aversion",
                "log utility (γ = 1) is not supported",
            ));
        }
        // Zero consumption is always a candidate, so u(0) must be representable.
        if !crra_utility(0.0, gamma).is_finite() {
            return Err(DpError::configuration(
                "risk_aversion",
                format!("utility of zero consumption overflows for γ = {gamma}"),
            ));
        }
        if !(self.interest_rate.is_finite() && self.interest_rate > -1.0) {
            return Err(DpError::configuration(
                "interest_rate",
                format!("must exceed -1, found {}", self.interest_rate),
            ));
        }
        if !(self.wage.is_finite() && self.wage >= 0.0) {
            return Err(DpError::configuration(
                "wage",
                format!("must be non-negative, found {}", self.wage),
            ));
        }
        if !(self.persistence.is_finite() && self.drift.is_finite()) {
            return Err(DpError::configuration(
                "income process",
                "persistence and drift must be finite",
            ));
        }
        if !(self.volatility.is_finite() && self.volatility >= 0.0) {
            return Err(DpError::configuration(
                "volatility",
                format!("must be non-negative, found {}", self.volatility),
            ));
        }
        if self.shock_grid_size == 0 {
            return Err(DpError::configuration("shock_grid_size", "must be positive"));
        }
        Ok(())
    }
}

/// A fully validated savings problem: parameters, asset grid and income chain.
#[derive(Clone, Debug)]
pub struct SavingsProblem {
    parameters: SavingsParameters,
    asset_grid: StateGrid,
    income: MarkovChain,
}

impl SavingsProblem {
    /// Builds the problem from income levels `z` and their transition kernel.
    ///
    /// The asset grid is `linspace(0, asset_grid_max, asset_grid_size)`.
    pub fn new(parameters: SavingsParameters, income: MarkovChain) -> Result<Self> {
        parameters.validate()?;
        let asset_grid =
            StateGrid::asset_grid(parameters.asset_grid_size, parameters.asset_grid_max)?;
        Self::from_parts(parameters, asset_grid, income)
    }

    /// Discretizes log income with `discretizer` and exponentiates the states.
    pub fn with_discretizer<D>(parameters: SavingsParameters, discretizer: &D) -> Result<Self>
    where
        D: MarkovDiscretizer + ?Sized,
    {
        parameters.validate()?;
        let log_income = discretizer.discretize(
            parameters.shock_grid_size,
            parameters.drift,
            parameters.volatility,
            parameters.persistence,
        )?;
        let income = log_income.map_states(f64::exp)?;
        Self::new(parameters, income)
    }

    /// Builds the problem from an explicit asset grid. `asset_grid_size` and
    /// `asset_grid_max` in `parameters` are ignored.
    ///
    /// Assets and income levels must be non-negative.
    pub fn from_parts(
        parameters: SavingsParameters,
        asset_grid: StateGrid,
        income: MarkovChain,
    ) -> Result<Self> {
        parameters.validate_model()?;
        if income.len() != parameters.shock_grid_size {
            return Err(DpError::dimension_mismatch(
                "income states",
                parameters.shock_grid_size,
                income.len(),
            ));
        }
        if asset_grid.min() < 0.0 {
            return Err(DpError::configuration(
                "asset grid",
                format!("borrowing is not allowed; minimum is {}", asset_grid.min()),
            ));
        }
        if income.states().min() < 0.0 {
            return Err(DpError::configuration(
                "income states",
                format!("income levels must be non-negative; minimum is {}", income.states().min()),
            ));
        }
        Ok(Self {
            parameters,
            asset_grid,
            income,
        })
    }

    /// Problem parameters.
    pub fn parameters(&self) -> &SavingsParameters {
        &self.parameters
    }

    /// Asset grid `x`.
    pub fn asset_grid(&self) -> &StateGrid {
        &self.asset_grid
    }

    /// Income chain (levels `z` and kernel `Q`).
    pub fn income(&self) -> &MarkovChain {
        &self.income
    }

    /// Shape `(assets, income states)` of value and policy arrays.
    pub fn shape(&self) -> (usize, usize) {
        (self.asset_grid.len(), self.income.len())
    }

    /// Resources `R x_i + w z_j` available at the start of the period.
    pub fn cash_on_hand(&self, asset_index: usize, shock_index: usize) -> f64 {
        self.parameters.gross_interest() * self.asset_grid[asset_index]
            + self.parameters.wage * self.income.states()[shock_index]
    }

    /// Applies the Bellman operator to `v`, writing `Tv` to `v_out` and the
    /// greedy next-asset indices to `policy`.
    ///
    /// Income states are processed in parallel; each task writes only its own
    /// column of `v_out` and `policy`. Ties resolve to the smallest index.
    pub fn bellman_update(
        &self,
        v: &DMatrix<f64>,
        v_out: &mut DMatrix<f64>,
        policy: &mut DMatrix<usize>,
    ) -> Result<()> {
        let (n, m) = self.shape();
        for (context, shape) in [
            ("value array", v.shape()),
            ("output value array", v_out.shape()),
            ("policy array", policy.shape()),
        ] {
            if shape.0 != n {
                return Err(DpError::dimension_mismatch(context, n, shape.0));
            }
            if shape.1 != m {
                return Err(DpError::dimension_mismatch(context, m, shape.1));
            }
        }

        let beta = self.parameters.discount_factor;
        let gamma = self.parameters.risk_aversion;
        let gross = self.parameters.gross_interest();
        let wage = self.parameters.wage;
        let assets = self.asset_grid.as_slice();
        let income = self.income.states().as_slice();

        // expected[(k, j)] = Σ_{j'} v[(k, j')] Q[(j, j')]
        let expected = v * self.income.transition().transpose();

        v_out
            .as_mut_slice()
            .par_chunks_mut(n)
            .zip(policy.as_mut_slice().par_chunks_mut(n))
            .enumerate()
            .try_for_each(|(j, (values, choices))| {
                let continuation = expected.column(j);
                for i in 0..n {
                    let cash = gross * assets[i] + wage * income[j];
                    let feasible = if cash.is_finite() && cash >= 0.0 {
                        self.asset_grid.count_at_most(cash)
                    } else {
                        0
                    };
                    if feasible == 0 {
                        return Err(DpError::InfeasibleChoice {
                            asset_index: i,
                            shock_index: j,
                            cash_on_hand: cash,
                        });
                    }

                    let mut best_index = 0usize;
                    let mut best_value = f64::NEG_INFINITY;
                    for k in 0..feasible {
                        let value =
                            crra_utility(cash - assets[k], gamma) + beta * continuation[k];
                        if value > best_value {
                            best_value = value;
                            best_index = k;
                        }
                    }
                    if !best_value.is_finite() {
                        return Err(DpError::NumericalError {
                            context: "Bellman maximisation",
                        });
                    }

                    values[i] = best_value;
                    choices[i] = best_index;
                }
                Ok(())
            })
    }

    /// Runs value function iteration from `v ≡ 1`, reporting progress to the log.
    pub fn solve(&self, options: &IterationOptions) -> Result<SavingsSolution> {
        self.solve_with_reporter(options, &mut LogReporter)
    }

    /// Runs value function iteration, sending progress to `reporter`.
    pub fn solve_with_reporter<R>(
        &self,
        options: &IterationOptions,
        reporter: &mut R,
    ) -> Result<SavingsSolution>
    where
        R: ProgressReporter + ?Sized,
    {
        let (n, m) = self.shape();
        debug!("value function iteration on a {n} x {m} grid");
        let initial = DMatrix::from_element(n, m, 1.0);
        let mut operator = BellmanOperator::new(self);
        let fixed_point = iterate_to_fixed_point(&mut operator, initial, options, reporter)?;
        Ok(SavingsSolution {
            values: fixed_point.value,
            policy: operator.into_policy(),
            summary: fixed_point.summary,
        })
    }

    /// Next-period asset levels `x[π[i, j]]`.
    pub fn next_assets(&self, policy: &DMatrix<usize>) -> DMatrix<f64> {
        policy.map(|k| self.asset_grid[k])
    }

    /// Consumption `R x_i + w z_j - x[π[i, j]]` implied by `policy`.
    pub fn consumption(&self, policy: &DMatrix<usize>) -> DMatrix<f64> {
        DMatrix::from_fn(policy.nrows(), policy.ncols(), |i, j| {
            self.cash_on_hand(i, j) - self.asset_grid[policy[(i, j)]]
        })
    }
}

/// The savings Bellman operator together with its policy buffer.
#[derive(Debug)]
pub struct BellmanOperator<'a> {
    problem: &'a SavingsProblem,
    policy: DMatrix<usize>,
}

impl<'a> BellmanOperator<'a> {
    /// Allocates the policy buffer for `problem`.
    pub fn new(problem: &'a SavingsProblem) -> Self {
        let (n, m) = problem.shape();
        Self {
            problem,
            policy: DMatrix::zeros(n, m),
        }
    }

    /// Greedy policy from the most recent application.
    pub fn policy(&self) -> &DMatrix<usize> {
        &self.policy
    }

    /// Consumes the operator, returning the policy buffer.
    pub fn into_policy(self) -> DMatrix<usize> {
        self.policy
    }
}

impl Operator for BellmanOperator<'_> {
    type State = DMatrix<f64>;

    fn apply(&mut self, input: &DMatrix<f64>, output: &mut DMatrix<f64>) -> Result<()> {
        self.problem.bellman_update(input, output, &mut self.policy)
    }
}

/// Result of value function iteration.
#[derive(Clone, Debug)]
pub struct SavingsSolution {
    /// Value function on the (asset, income) grid.
    pub values: DMatrix<f64>,
    /// Index of the chosen next-period asset level at each grid cell.
    /// All zeros if no sweep was performed.
    pub policy: DMatrix<usize>,
    /// Iteration diagnostics.
    pub summary: FixedPointSummary,
}

impl SavingsSolution {
    /// `true` when iteration met the tolerance.
    pub fn converged(&self) -> bool {
        self.summary.converged()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solving::SolveStatus;
    use approx::assert_relative_eq;
    use nalgebra::DVector;

    fn two_state_income() -> MarkovChain {
        MarkovChain::new(
            StateGrid::new(DVector::from_vec(vec![0.5, 1.5])).unwrap(),
            DMatrix::from_row_slice(2, 2, &[0.8, 0.2, 0.3, 0.7]),
        )
        .unwrap()
    }

    fn small_problem() -> SavingsProblem {
        let parameters = SavingsParameters {
            shock_grid_size: 2,
            asset_grid_size: 30,
            asset_grid_max: 6.0,
            ..SavingsParameters::default()
        };
        SavingsProblem::new(parameters, two_state_income()).unwrap()
    }

    #[test]
    fn utility_matches_crra_formula() {
        assert_relative_eq!(crra_utility(1.0, 2.0), -1.0, epsilon = 1e-9);
        assert_relative_eq!(crra_utility(4.0, 0.5), 4.0, epsilon = 1e-9);
        assert!(crra_utility(0.0, 2.5).is_finite());
    }

    #[test]
    fn invalid_parameters_fail_at_construction() {
        let cases = [
            SavingsParameters {
                risk_aversion: 1.0,
                ..SavingsParameters::default()
            },
            SavingsParameters {
                discount_factor: 1.0,
                ..SavingsParameters::default()
            },
            SavingsParameters {
                asset_grid_size: 0,
                ..SavingsParameters::default()
            },
            SavingsParameters {
                asset_grid_max: 0.0,
                ..SavingsParameters::default()
            },
            SavingsParameters {
                shock_grid_size: 0,
                ..SavingsParameters::default()
            },
        ];
        for parameters in cases {
            let err = SavingsProblem::new(parameters, two_state_income()).unwrap_err();
            assert!(err.is_configuration(), "unexpected error {err}");
        }
    }

    #[test]
    fn income_chain_must_match_configured_size() {
        let err = SavingsProblem::new(SavingsParameters::default(), two_state_income()).unwrap_err();
        assert!(matches!(err, DpError::DimensionMismatch { expected: 25, found: 2, .. }));
    }

    #[test]
    fn discretizer_states_are_exponentiated() {
        let discretizer = |size: usize, drift: f64, volatility: f64, persistence: f64| {
            assert_eq!(size, 3);
            assert_eq!((drift, volatility, persistence), (0.0, 0.1, 0.9));
            MarkovChain::new(
                StateGrid::new(DVector::from_vec(vec![-0.5, 0.0, 0.5]))?,
                DMatrix::from_row_slice(3, 3, &[0.5, 0.5, 0.0, 0.25, 0.5, 0.25, 0.0, 0.5, 0.5]),
            )
        };
        let parameters = SavingsParameters {
            shock_grid_size: 3,
            asset_grid_size: 10,
            ..SavingsParameters::default()
        };
        let problem = SavingsProblem::with_discretizer(parameters, &discretizer).unwrap();
        assert_relative_eq!(problem.income().states()[0], (-0.5f64).exp(), epsilon = 1e-12);
        assert_relative_eq!(problem.income().states()[1], 1.0, epsilon = 1e-12);
        assert_eq!(problem.asset_grid().max(), 15.0);
    }

    #[test]
    fn single_state_recursion_matches_closed_form() {
        // With assets {0, 100} and one income state z = 1, the poorest agent can only
        // choose x' = 0, so v(0) = u(1) + β v(0).
        let parameters = SavingsParameters {
            risk_aversion: 2.0,
            shock_grid_size: 1,
            ..SavingsParameters::default()
        };
        let assets = StateGrid::new(DVector::from_vec(vec![0.0, 100.0])).unwrap();
        let problem =
            SavingsProblem::from_parts(parameters, assets, MarkovChain::constant(1.0).unwrap())
                .unwrap();
        let options = IterationOptions::default()
            .with_tolerance(1e-9)
            .with_max_iterations(5_000);
        let solution = problem.solve(&options).unwrap();

        assert!(solution.converged());
        assert_eq!(solution.policy[(0, 0)], 0);
        let beta = problem.parameters().discount_factor;
        assert_relative_eq!(
            solution.values[(0, 0)],
            crra_utility(1.0, 2.0) / (1.0 - beta),
            epsilon = 1e-6
        );
    }

    #[test]
    fn policy_is_feasible_on_every_sweep() {
        let problem = small_problem();
        let (n, m) = problem.shape();
        let mut v = DMatrix::from_element(n, m, 1.0);
        let mut v_out = DMatrix::zeros(n, m);
        let mut policy = DMatrix::zeros(n, m);

        for _ in 0..40 {
            problem.bellman_update(&v, &mut v_out, &mut policy).unwrap();
            for j in 0..m {
                for i in 0..n {
                    let chosen = problem.asset_grid()[policy[(i, j)]];
                    assert!(chosen <= problem.cash_on_hand(i, j));
                }
            }
            std::mem::swap(&mut v, &mut v_out);
        }

        let consumption = problem.consumption(&policy);
        assert!(consumption.iter().all(|c| *c >= 0.0));
    }

    #[test]
    fn sup_norm_gaps_do_not_increase() {
        let problem = small_problem();
        let options = IterationOptions::default()
            .with_tolerance(1e-12)
            .with_max_iterations(60)
            .with_report_interval(1);
        let mut gaps = Vec::new();
        let mut reporter = |_: usize, gap: f64| gaps.push(gap);
        let solution = problem.solve_with_reporter(&options, &mut reporter).unwrap();

        assert_eq!(solution.summary.status, SolveStatus::Exhausted);
        assert_eq!(gaps.len(), 60);
        for pair in gaps.windows(2) {
            assert!(pair[1] <= pair[0] + 1e-9, "gap rose from {} to {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn input_array_is_left_untouched() {
        let problem = small_problem();
        let (n, m) = problem.shape();
        let v = DMatrix::from_fn(n, m, |i, j| -(i as f64) - 0.5 * j as f64);
        let snapshot = v.clone();
        let mut v_out = DMatrix::zeros(n, m);
        let mut policy = DMatrix::zeros(n, m);
        problem.bellman_update(&v, &mut v_out, &mut policy).unwrap();
        assert_eq!(v, snapshot);
    }

    #[test]
    fn cash_below_grid_minimum_is_a_domain_error() {
        let parameters = SavingsParameters {
            interest_rate: -0.5,
            wage: 0.0,
            shock_grid_size: 1,
            ..SavingsParameters::default()
        };
        let assets = StateGrid::new(DVector::from_vec(vec![1.0, 2.0, 3.0])).unwrap();
        let problem =
            SavingsProblem::from_parts(parameters, assets, MarkovChain::constant(1.0).unwrap())
                .unwrap();
        let err = problem.solve(&IterationOptions::default()).unwrap_err();
        assert!(matches!(
            err,
            DpError::InfeasibleChoice {
                asset_index: 0,
                shock_index: 0,
                ..
            }
        ));
    }

    #[test]
    fn ties_resolve_to_lowest_asset_index() {
        // A huge continuation value swamps utility differences, making candidates tie.
        let parameters = SavingsParameters {
            shock_grid_size: 1,
            ..SavingsParameters::default()
        };
        let assets = StateGrid::new(DVector::from_vec(vec![0.0, 1.0, 2.0])).unwrap();
        let problem =
            SavingsProblem::from_parts(parameters, assets, MarkovChain::constant(1.0).unwrap())
                .unwrap();
        let v = DMatrix::from_element(3, 1, 1e20);
        let mut v_out = DMatrix::zeros(3, 1);
        let mut policy = DMatrix::from_element(3, 1, usize::MAX);
        problem.bellman_update(&v, &mut v_out, &mut policy).unwrap();
        assert_eq!(policy, DMatrix::from_element(3, 1, 0usize));
    }

    #[test]
    fn explicit_grid_ignores_asset_grid_fields() {
        let parameters = SavingsParameters {
            shock_grid_size: 1,
            asset_grid_size: 1,
            asset_grid_max: -3.0,
            ..SavingsParameters::default()
        };
        assert!(parameters.validate().is_err());
        let assets = StateGrid::new(DVector::from_vec(vec![0.0, 0.5, 4.0])).unwrap();
        let problem =
            SavingsProblem::from_parts(parameters, assets, MarkovChain::constant(1.0).unwrap())
                .unwrap();
        assert_eq!(problem.shape(), (3, 1));
    }

    #[test]
    fn overflowing_utility_fails_at_construction() {
        let parameters = SavingsParameters {
            risk_aversion: 40.0,
            wage: 0.0,
            shock_grid_size: 1,
            ..SavingsParameters::default()
        };
        let income = MarkovChain::constant(1.0).unwrap();
        let err = SavingsProblem::new(parameters, income).unwrap_err();
        assert!(matches!(
            err,
            DpError::InvalidConfiguration {
                parameter: "risk_aversion",
                ..
            }
        ));
        assert!(SavingsParameters {
            risk_aversion: 30.0,
            ..SavingsParameters::default()
        }
        .validate()
        .is_ok());
    }

    #[test]
    fn mismatched_buffers_are_rejected() {
        let problem = small_problem();
        let v = DMatrix::from_element(3, 2, 0.0);
        let mut v_out = DMatrix::zeros(30, 2);
        let mut policy = DMatrix::zeros(30, 2);
        assert!(matches!(
            problem.bellman_update(&v, &mut v_out, &mut policy),
            Err(DpError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn parameters_deserialize_with_defaults() {
        let parameters: SavingsParameters =
            serde_json::from_str(r#"{"risk_aversion": 2.0, "asset_grid_size": 50}"#).unwrap();
        assert_eq!(parameters.risk_aversion, 2.0);
        assert_eq!(parameters.asset_grid_size, 50);
        assert_eq!(parameters.discount_factor, 0.96);
        assert_relative_eq!(parameters.gross_interest(), 1.04, epsilon = 1e-12);
    }
}
