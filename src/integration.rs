//! Monte Carlo integration draws for the job-search expectation operator.

use nalgebra::DMatrix;
use rand::rngs::SmallRng;
use rand::SeedableRng;
use rand_distr::{Distribution, StandardNormal};

use crate::error::{DpError, Result};

/// Pre-generated standard-normal shocks, one column per Monte Carlo draw.
///
/// Row 0 carries the persistent-component innovation and row 1 the transitory
/// one. The buffer is built once per problem and reused by every sweep so the
/// estimated contraction map stays deterministic.
#[derive(Clone, Debug)]
pub struct ShockDraws {
    draws: DMatrix<f64>,
}

impl ShockDraws {
    /// Number of shock components per draw.
    pub const COMPONENTS: usize = 2;

    /// Wraps externally generated draws laid out as a `2 x M` matrix.
    pub fn new(draws: DMatrix<f64>) -> Result<Self> {
        if draws.nrows() != Self::COMPONENTS {
            return Err(DpError::dimension_mismatch(
                "shock draw rows",
                Self::COMPONENTS,
                draws.nrows(),
            ));
        }
        if draws.ncols() == 0 {
            return Err(DpError::configuration(
                "mc_size",
                "at least one Monte Carlo draw is required",
            ));
        }
        if draws.iter().any(|value| !value.is_finite()) {
            return Err(DpError::NumericalError {
                context: "shock draw validation",
            });
        }
        Ok(Self { draws })
    }

    /// Generates `size` i.i.d. standard normal draws from a seeded generator.
    pub fn standard_normal(size: usize, seed: u64) -> Result<Self> {
        let mut rng = SmallRng::seed_from_u64(seed);
        let values: Vec<f64> = Distribution::<f64>::sample_iter(StandardNormal, &mut rng)
            .take(Self::COMPONENTS * size)
            .collect();
        Self::new(DMatrix::from_vec(Self::COMPONENTS, size, values))
    }

    /// Number of Monte Carlo draws.
    pub fn draw_count(&self) -> usize {
        self.draws.ncols()
    }

    /// Returns the `(persistent, transitory)` innovations of draw `index`.
    #[inline]
    pub fn pair(&self, index: usize) -> (f64, f64) {
        (self.draws[(0, index)], self.draws[(1, index)])
    }

    /// Iterates over `(persistent, transitory)` innovation pairs.
    pub fn pairs(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.draws
            .as_slice()
            .chunks_exact(Self::COMPONENTS)
            .map(|column| (column[0], column[1]))
    }

    /// Returns a view of the draw matrix.
    pub fn draws(&self) -> &DMatrix<f64> {
        &self.draws
    }
}
