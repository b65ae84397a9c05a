//! Grid-based dynamic programming: value function iteration and Monte Carlo
//! fixed-point solvers for discrete-time problems on continuous state spaces.
//!
//! Two problems are provided out of the box:
//!
//! - an optimal savings problem (`savings` module) solved by Bellman value
//!   iteration over an (asset, income) grid with a Markov income process, and
//! - a job search problem (`job_search` module) with persistent and transitory
//!   wage components, solved through its continuation value function using
//!   Monte Carlo integration and linear interpolation.
//!
//! Both reuse the same building blocks: state grids and Markov chains (`grid`),
//! pre-generated shocks (`integration`), clamped linear interpolation
//! (`interpolation`) and a generic iterate-to-convergence driver (`solving`).
//! Each sweep of an operator is evaluated in parallel with `rayon`.
//!
//! # Quick start
//!
//! ```no_run
//! use dpgrid::job_search::{JobSearch, JobSearchParameters};
//! use dpgrid::IterationOptions;
//!
//! let problem = JobSearch::with_seed(JobSearchParameters::default(), 1234)
//!     .expect("valid parameters");
//! let solution = problem
//!     .solve(&IterationOptions::default())
//!     .expect("well-posed problem");
//! if solution.converged() {
//!     let wages = problem.reservation_wages(&solution.continuation).unwrap();
//!     println!("reservation wages: {wages}");
//! }
//! ```
//!
//! The savings problem needs a discretized income process. Any
//! [`MarkovDiscretizer`](grid::MarkovDiscretizer), such as a Rouwenhorst
//! implementation, can be plugged in through
//! [`SavingsProblem::with_discretizer`](savings::SavingsProblem::with_discretizer),
//! or a ready-made [`MarkovChain`](grid::MarkovChain) of income levels can be
//! supplied directly.

pub mod error;
pub mod grid;
pub mod integration;
pub mod interpolation;
pub mod job_search;
pub mod savings;
pub mod solving;

pub use error::{DpError, Result};
pub use grid::{MarkovChain, MarkovDiscretizer, StateGrid};
pub use job_search::{JobSearch, JobSearchParameters, JobSearchSolution};
pub use savings::{SavingsParameters, SavingsProblem, SavingsSolution};
pub use solving::{
    iterate_to_fixed_point, FixedPointSummary, IterationOptions, LogReporter, Operator,
    ProgressReporter, SolveStatus,
};
