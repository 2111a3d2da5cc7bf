//! Error types for method selection.
//!
//! Input problems that cleaning can recover from (non-numeric cells, empty
//! groups) never surface here; these variants are what remains when nothing
//! analyzable is left, or when a model cannot be fitted.

use thiserror::Error;

/// Which factor of a two-way design an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Factor {
    /// Factor A (row factor).
    A,
    /// Factor B (column factor).
    B,
}

impl std::fmt::Display for Factor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Factor::A => write!(f, "Factor A"),
            Factor::B => write!(f, "Factor B"),
        }
    }
}

/// Margin of a contingency table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Margin {
    /// A row (outcome category).
    Row,
    /// A column (group).
    Column,
}

impl std::fmt::Display for Margin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Margin::Row => write!(f, "row"),
            Margin::Column => write!(f, "column"),
        }
    }
}

/// Reasons an analysis could not produce a decision.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AnalysisError {
    /// Fewer usable groups than the design needs.
    #[error("insufficient data: need at least {required} groups with observations, found {actual}")]
    TooFewGroups {
        /// Minimum number of non-empty groups.
        required: usize,
        /// Non-empty groups after cleaning.
        actual: usize,
    },

    /// A contingency table failed validation.
    #[error("insufficient data: invalid contingency table: {reason}")]
    InvalidTable {
        /// What is wrong with the table.
        reason: String,
    },

    /// A contingency table row or column sums to zero.
    #[error("insufficient data: {margin} '{label}' has zero total")]
    EmptyMargin {
        /// Row or column.
        margin: Margin,
        /// Label of the empty margin.
        label: String,
    },

    /// A factor has a single level once incomplete records are dropped.
    #[error("{factor} has only one level after filtering")]
    SingleLevel {
        /// The offending factor.
        factor: Factor,
    },

    /// A combination of factor levels has no observations.
    #[error("no observations for cell ({a}, {b}); every factor-level combination needs data")]
    EmptyCell {
        /// Factor A level.
        a: String,
        /// Factor B level.
        b: String,
    },

    /// The model has as many parameters as observations.
    #[error("zero residual degrees of freedom: {observations} observations for {parameters} parameters")]
    NoResidualDf {
        /// Number of observations.
        observations: usize,
        /// Number of estimated parameters.
        parameters: usize,
    },

    /// The normal equations could not be solved.
    #[error("singular design matrix in {model} model")]
    SingularDesign {
        /// Which nested model failed.
        model: &'static str,
    },

    /// The chosen test is undefined for this data.
    #[error("insufficient data: {method} is undefined for this data ({reason})")]
    Degenerate {
        /// Display name of the test.
        method: &'static str,
        /// Why the statistic is undefined.
        reason: &'static str,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_deficiency() {
        let e = AnalysisError::SingleLevel { factor: Factor::B };
        assert_eq!(e.to_string(), "Factor B has only one level after filtering");

        let e = AnalysisError::TooFewGroups {
            required: 2,
            actual: 1,
        };
        assert!(e.to_string().starts_with("insufficient data"));

        let e = AnalysisError::EmptyMargin {
            margin: Margin::Column,
            label: "Placebo".into(),
        };
        assert_eq!(
            e.to_string(),
            "insufficient data: column 'Placebo' has zero total"
        );
    }
}
