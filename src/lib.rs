//! # u-hypothesis
//!
//! Statistical method selection: given two or more samples, a contingency
//! table, or a two-factor design, pick the appropriate hypothesis test from
//! normality and variance pre-tests, run it, and report a structured
//! decision.
//!
//! The crate operates on plain `f64` observations and string labels. It has
//! no knowledge of spreadsheets or user interfaces; a front-end parses its
//! cells with [`table`], builds a [`selector::Design`] and renders the
//! serializable [`selector::Analysis`] it gets back.
//!
//! ## Modules
//!
//! - [`selector`]: The decision tree (Student / Welch / Mann-Whitney,
//!   ANOVA / Kruskal-Wallis, chi-square / Fisher, two-way ANOVA)
//! - [`testing`]: Hypothesis tests and the Shapiro-Wilk / Levene diagnostics
//! - [`posthoc`]: Tukey HSD and Bonferroni-thresholded pairwise comparisons
//! - [`twoway`]: Two-way ANOVA with Type II sums of squares
//! - [`table`]: Cell parsing, wide/long reshaping, contingency tables
//! - [`special`]: Distribution functions
//! - [`error`]: [`AnalysisError`]
//!
//! ## Design Philosophy
//!
//! - **Deterministic**: No randomness, no hidden state; the same input always
//!   selects the same test with the same p-value
//! - **Explicit skips**: Unparseable cells are skipped and counted, never
//!   raised as errors
//! - **Research-backed**: Algorithms reference the statistical literature

pub mod error;
pub mod posthoc;
pub mod selector;
pub mod special;
pub mod table;
pub mod testing;
pub mod twoway;

pub use error::AnalysisError;
pub use selector::{analyze, Analysis, Design, Method, SelectorConfig};
