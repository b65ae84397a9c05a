use thiserror::Error;

/// Unified error type for `dpgrid` operations.
#[derive(Debug, Error)]
pub enum DpError {
    /// Raised at construction time when a parameter is outside its admissible range.
    #[error("invalid configuration for `{parameter}`: {reason}")]
    InvalidConfiguration {
        /// Name of the offending parameter.
        parameter: &'static str,
        /// Human-readable description of the violated constraint.
        reason: String,
    },

    /// Raised when provided arrays or matrices have incompatible dimensions.
    #[error("dimension mismatch in {context}: expected {expected} but found {found}")]
    DimensionMismatch {
        /// Human-readable context describing the operation.
        context: &'static str,
        /// The required dimension.
        expected: usize,
        /// The dimension that was actually supplied.
        found: usize,
    },

    /// Raised when a transition kernel row does not sum to one.
    #[error("transition kernel row {row} sums to {sum}, expected 1")]
    NonStochasticRow { row: usize, sum: f64 },

    /// Raised when a transition kernel carries a negative entry.
    #[error("transition kernel entry ({row}, {col}) is negative: {value}")]
    NegativeProbability { row: usize, col: usize, value: f64 },

    /// Raised when cash-on-hand admits no point of the asset grid.
    #[error(
        "no feasible asset choice at state ({asset_index}, {shock_index}): cash on hand {cash_on_hand}"
    )]
    InfeasibleChoice {
        /// Row of the value array being updated.
        asset_index: usize,
        /// Column of the value array being updated.
        shock_index: usize,
        /// Resources available for consumption and saving.
        cash_on_hand: f64,
    },

    /// Raised when numerical routines produce NaN or infinities.
    #[error("encountered non-finite value during {context}")]
    NumericalError { context: &'static str },
}

impl DpError {
    /// Helper to format an [`InvalidConfiguration`](DpError::InvalidConfiguration) error.
    pub fn configuration(parameter: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidConfiguration {
            parameter,
            reason: reason.into(),
        }
    }

    /// Helper to format a [`DimensionMismatch`](DpError::DimensionMismatch) error.
    pub fn dimension_mismatch(context: &'static str, expected: usize, found: usize) -> Self {
        Self::DimensionMismatch {
            context,
            expected,
            found,
        }
    }

    /// Returns `true` for errors raised while validating inputs, before any solving.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::InvalidConfiguration { .. }
                | Self::DimensionMismatch { .. }
                | Self::NonStochasticRow { .. }
                | Self::NegativeProbability { .. }
        )
    }
}

/// Type alias for results returned by this crate.
pub type Result<T> = std::result::Result<T, DpError>;
