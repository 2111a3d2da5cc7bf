//! Statistical method selection.
//!
//! Given a [`Design`], runs the diagnostics that decide between parametric
//! and rank-based tests, runs the chosen test, and returns a structured
//! decision:
//!
//! | Design | Normal & homogeneous | Normal only | Otherwise |
//! |---|---|---|---|
//! | two samples | Student t | Welch t | Mann-Whitney U |
//! | k ≥ 3 samples | one-way ANOVA | Kruskal-Wallis | Kruskal-Wallis |
//!
//! Contingency tables go to Fisher's exact test when they are 2×2 and small
//! (N below the exact threshold or an expected count below the minimum),
//! otherwise to Pearson chi-square. Two-factor designs always get two-way
//! ANOVA, with residual normality and cell homogeneity reported alongside.
//!
//! Selection is pure: the same design and configuration always give the
//! same decision.
//!
//! # Examples
//!
//! ```
//! use u_hypothesis::selector::{analyze, Design, Method, SelectorConfig};
//! use u_hypothesis::table::GroupedSamples;
//!
//! let groups: GroupedSamples = [
//!     ("Control", vec![10.2, 11.5, 10.8, 12.1, 11.3, 10.9]),
//!     ("Treatment", vec![13.5, 14.2, 15.1, 14.8, 13.9, 15.5]),
//! ]
//! .into_iter()
//! .collect();
//!
//! let design = Design::from_groups(&groups).unwrap();
//! let analysis = analyze(&design, &SelectorConfig::default()).unwrap();
//! assert_eq!(analysis.method(), Method::StudentT);
//! assert!(analysis.p_value() < 0.001);
//! ```

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::AnalysisError;
use crate::posthoc::{pairwise_mann_whitney, tukey_hsd, PostHoc};
use crate::table::{ContingencyTable, GroupedSamples, Sample, TwoFactorRecord};
use crate::testing::{
    chi_squared_independence, fisher_exact_test, kruskal_wallis_test, levene_test,
    mann_whitney_u_test, one_way_anova, shapiro_wilk_test, student_t_test, welch_t_test,
    ShapiroWilkResult, TestResult,
};
use crate::twoway::{two_way_anova, TwoWayAnovaResult};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Thresholds and switches for method selection.
///
/// Missing fields take their defaults when deserialized.
///
/// ```
/// use u_hypothesis::selector::SelectorConfig;
///
/// let c = SelectorConfig::default();
/// assert_eq!(c.alpha, 0.05);
/// assert_eq!(c.min_normality_size, 3);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectorConfig {
    /// Significance level of the main test and post-hoc comparisons.
    pub alpha: f64,
    /// A group is normal iff its Shapiro-Wilk p exceeds this.
    pub normality_alpha: f64,
    /// Variances are homogeneous iff Levene's p exceeds this.
    pub homogeneity_alpha: f64,
    /// Smallest group that is tested for normality.
    pub min_normality_size: usize,
    /// 2×2 tables with fewer observations use Fisher's exact test.
    pub exact_total_threshold: f64,
    /// Expected counts below this make chi-square unreliable.
    pub min_expected_count: f64,
    /// Yates continuity correction on 1-df chi-square tests.
    pub yates_correction: bool,
    /// Take the parametric branch only if at least one group was actually
    /// tested for normality.
    pub require_verified_normality: bool,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            alpha: 0.05,
            normality_alpha: 0.05,
            homogeneity_alpha: 0.05,
            min_normality_size: 3,
            exact_total_threshold: 40.0,
            min_expected_count: 5.0,
            yates_correction: true,
            require_verified_normality: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Design
// ---------------------------------------------------------------------------

/// Shape of the data to analyze.
#[derive(Debug, Clone, PartialEq)]
pub enum Design {
    /// Two independent samples.
    TwoSample {
        /// First group.
        first: Sample,
        /// Second group.
        second: Sample,
    },
    /// Three or more independent samples.
    KSample(Vec<Sample>),
    /// Two crossed factors, long format.
    TwoWay(Vec<TwoFactorRecord>),
    /// Counts of outcome (rows) by group (columns).
    Contingency(ContingencyTable),
}

impl Design {
    /// Builds a location design from grouped samples.
    ///
    /// Non-finite values and groups left empty are dropped; two remaining
    /// groups give [`Design::TwoSample`], more give [`Design::KSample`].
    ///
    /// # Errors
    ///
    /// [`AnalysisError::TooFewGroups`] if fewer than two groups remain.
    pub fn from_groups(groups: &GroupedSamples) -> Result<Self, AnalysisError> {
        match <[Sample; 2]>::try_from(clean_groups(groups.groups())) {
            Ok([first, second]) => Ok(Design::TwoSample { first, second }),
            Err(cleaned) if cleaned.len() > 2 => Ok(Design::KSample(cleaned)),
            Err(cleaned) => Err(AnalysisError::TooFewGroups {
                required: 2,
                actual: cleaned.len(),
            }),
        }
    }

    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Design::TwoSample { .. } => "two-sample",
            Design::KSample(_) => "k-sample",
            Design::TwoWay(_) => "two-way",
            Design::Contingency(_) => "contingency",
        }
    }
}

fn clean_groups(groups: &[Sample]) -> Vec<Sample> {
    groups
        .iter()
        .map(|g| Sample {
            name: g.name.clone(),
            values: g.values.iter().copied().filter(|v| v.is_finite()).collect(),
        })
        .filter(|g| !g.values.is_empty())
        .collect()
}

// ---------------------------------------------------------------------------
// Decisions
// ---------------------------------------------------------------------------

/// The test a decision ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Method {
    /// Independent t-test with pooled variance.
    StudentT,
    /// Welch's unequal-variance t-test.
    WelchT,
    /// Mann-Whitney U test.
    MannWhitneyU,
    /// One-way ANOVA.
    OneWayAnova,
    /// Kruskal-Wallis H test.
    KruskalWallis,
    /// Two-way ANOVA with interaction.
    TwoWayAnova,
    /// Pearson chi-square test of independence.
    ChiSquare,
    /// Fisher's exact test on a 2×2 table.
    FisherExact,
}

impl Method {
    /// Human-readable name.
    pub fn name(self) -> &'static str {
        match self {
            Method::StudentT => "Student's t-test",
            Method::WelchT => "Welch's t-test",
            Method::MannWhitneyU => "Mann-Whitney U test",
            Method::OneWayAnova => "One-way ANOVA",
            Method::KruskalWallis => "Kruskal-Wallis H test",
            Method::TwoWayAnova => "Two-way ANOVA",
            Method::ChiSquare => "Chi-square test of independence",
            Method::FisherExact => "Fisher's exact test",
        }
    }

    /// `true` for tests that assume normal errors.
    pub fn is_parametric(self) -> bool {
        matches!(
            self,
            Method::StudentT | Method::WelchT | Method::OneWayAnova | Method::TwoWayAnova
        )
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Overall normality verdict across groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Normality {
    /// Every tested group passed, and at least one was tested.
    Normal,
    /// At least one tested group failed.
    NonNormal,
    /// No group could be tested.
    Unverified,
}

/// Why a group was not tested for normality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum NormalitySkip {
    /// Fewer observations than the configured minimum.
    SampleSize,
    /// Every observation equal.
    ZeroRange,
}

/// Outcome of the normality check of one group.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum NormalityCheck {
    /// Shapiro-Wilk was run.
    Tested {
        /// Test result.
        result: ShapiroWilkResult,
        /// `p_value > normality_alpha`.
        normal: bool,
    },
    /// Not tested; does not count against normality.
    Skipped(NormalitySkip),
}

/// Normality check of a named group.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupNormality {
    /// Group label.
    pub group: String,
    /// Observations in the group.
    pub n: usize,
    /// What happened.
    pub check: NormalityCheck,
}

/// Levene's test across groups.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Homogeneity {
    /// Test result; `None` when it could not be computed.
    pub test: Option<TestResult>,
    /// `p_value > homogeneity_alpha`; false when not computed.
    pub homogeneous: bool,
}

/// Non-fatal reliability notes attached to a decision.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum AnalysisWarning {
    /// Some expected cell count is below the configured minimum.
    LowExpectedCount {
        /// Smallest expected count.
        min_expected: f64,
        /// Configured minimum.
        threshold: f64,
    },
    /// Non-integer counts were rounded for the exact test.
    RoundedCounts,
    /// No group could be tested for normality.
    NormalityUnverified,
    /// An effect was significant but its post-hoc comparisons could not be
    /// computed (too few error degrees of freedom or zero error variance).
    PostHocUnavailable,
}

impl std::fmt::Display for AnalysisWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AnalysisWarning::LowExpectedCount {
                min_expected,
                threshold,
            } => write!(
                f,
                "minimum expected count {min_expected:.2} is below {threshold}; chi-square p-value may be unreliable"
            ),
            AnalysisWarning::RoundedCounts => {
                write!(f, "non-integer counts were rounded for the exact test")
            }
            AnalysisWarning::NormalityUnverified => write!(
                f,
                "no group could be tested for normality"
            ),
            AnalysisWarning::PostHocUnavailable => write!(
                f,
                "effect is significant but post-hoc comparisons could not be computed"
            ),
        }
    }
}

/// Decision for a two- or k-sample location comparison.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocationDecision {
    /// Test that was run.
    pub method: Method,
    /// t, U, F or H.
    pub statistic: f64,
    /// Degrees of freedom of the main test (0 for Mann-Whitney).
    pub df: f64,
    /// p-value of the main test.
    pub p_value: f64,
    /// `p_value < alpha`.
    pub significant: bool,
    /// Per-group normality checks, in group order.
    pub normality: Vec<GroupNormality>,
    /// Overall normality verdict.
    pub overall_normality: Normality,
    /// Homogeneity of variance.
    pub homogeneity: Homogeneity,
    /// Pairwise comparisons, for k > 2 and a significant main test.
    pub post_hoc: Option<PostHoc>,
    /// Reliability notes.
    pub warnings: Vec<AnalysisWarning>,
}

/// Conclusion of a test of independence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Association {
    /// p < α.
    Significant,
    /// No evidence against independence.
    Independent,
}

/// Decision for a contingency table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssociationDecision {
    /// Chi-square or Fisher's exact test.
    pub method: Method,
    /// χ² or the sample odds ratio.
    pub statistic: f64,
    /// (R − 1)(C − 1) for chi-square, 0 for Fisher.
    pub df: f64,
    /// p-value.
    pub p_value: f64,
    /// Conclusion at `alpha`.
    pub association: Association,
    /// Expected counts under independence, row-major.
    pub expected: Vec<f64>,
    /// Smallest expected count.
    pub min_expected: f64,
    /// Table total.
    pub total: f64,
    /// Reliability notes.
    pub warnings: Vec<AnalysisWarning>,
}

/// How to read the main effects of a two-way design.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Interpretation {
    /// Interaction p < α: main effects cannot be read on their own;
    /// follow up with simple effects.
    InteractionSignificant,
    /// Main effects can be interpreted independently.
    MainEffectsIndependent,
}

/// Decision for a two-factor design.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TwoWayDecision {
    /// Always [`Method::TwoWayAnova`].
    pub method: Method,
    /// The ANOVA table.
    pub anova: TwoWayAnovaResult,
    /// Shapiro-Wilk on residuals, when at least 3 residuals with nonzero range.
    pub residual_normality: Option<ShapiroWilkResult>,
    /// Levene across all cells.
    pub homogeneity: Homogeneity,
    /// How the main effects should be read.
    pub interpretation: Interpretation,
    /// Tukey HSD across cells when any effect is significant.
    pub post_hoc: Option<PostHoc>,
    /// Reliability notes.
    pub warnings: Vec<AnalysisWarning>,
}

/// Result of [`analyze`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Analysis {
    /// Two- or k-sample comparison.
    Location(LocationDecision),
    /// Contingency table.
    Association(AssociationDecision),
    /// Two-factor design.
    TwoWay(TwoWayDecision),
}

impl Analysis {
    /// Test that was run.
    pub fn method(&self) -> Method {
        match self {
            Analysis::Location(d) => d.method,
            Analysis::Association(d) => d.method,
            Analysis::TwoWay(d) => d.method,
        }
    }

    /// Main p-value (the model F-test for two-way designs).
    pub fn p_value(&self) -> f64 {
        match self {
            Analysis::Location(d) => d.p_value,
            Analysis::Association(d) => d.p_value,
            Analysis::TwoWay(d) => d.anova.model_p,
        }
    }

    /// Main test statistic (the model F for two-way designs).
    pub fn statistic(&self) -> f64 {
        match self {
            Analysis::Location(d) => d.statistic,
            Analysis::Association(d) => d.statistic,
            Analysis::TwoWay(d) => d.anova.model_f,
        }
    }

    /// Post-hoc comparisons, if any were run.
    pub fn post_hoc(&self) -> Option<&PostHoc> {
        match self {
            Analysis::Location(d) => d.post_hoc.as_ref(),
            Analysis::Association(_) => None,
            Analysis::TwoWay(d) => d.post_hoc.as_ref(),
        }
    }

    /// Reliability notes.
    pub fn warnings(&self) -> &[AnalysisWarning] {
        match self {
            Analysis::Location(d) => &d.warnings,
            Analysis::Association(d) => &d.warnings,
            Analysis::TwoWay(d) => &d.warnings,
        }
    }
}

// ---------------------------------------------------------------------------
// Selection
// ---------------------------------------------------------------------------

/// Selects and runs the appropriate test for `design`.
///
/// # Errors
///
/// Any [`AnalysisError`] from the selected branch: too few groups, empty
/// table margins, two-way model-fit failures, or data for which the chosen
/// statistic is undefined.
pub fn analyze(design: &Design, config: &SelectorConfig) -> Result<Analysis, AnalysisError> {
    debug!(design = design.kind(), "selecting method");
    match design {
        Design::TwoSample { first, second } => {
            select_location(&[first.clone(), second.clone()], config).map(Analysis::Location)
        }
        Design::KSample(groups) => select_location(groups, config).map(Analysis::Location),
        Design::Contingency(table) => {
            select_association(table, config).map(Analysis::Association)
        }
        Design::TwoWay(records) => select_two_way(records, config).map(Analysis::TwoWay),
    }
}

fn check_normality(group: &Sample, config: &SelectorConfig) -> GroupNormality {
    let n = group.values.len();
    let check = if n < config.min_normality_size.max(3) {
        NormalityCheck::Skipped(NormalitySkip::SampleSize)
    } else {
        match shapiro_wilk_test(&group.values) {
            Some(result) => NormalityCheck::Tested {
                result,
                normal: result.p_value > config.normality_alpha,
            },
            None => NormalityCheck::Skipped(NormalitySkip::ZeroRange),
        }
    };

    match check {
        NormalityCheck::Tested { result, normal } => debug!(
            group = %group.name,
            n,
            w = result.w,
            p = result.p_value,
            normal,
            "Shapiro-Wilk"
        ),
        NormalityCheck::Skipped(reason) => {
            debug!(group = %group.name, n, ?reason, "normality not tested")
        }
    }

    GroupNormality {
        group: group.name.clone(),
        n,
        check,
    }
}

fn overall_normality(checks: &[GroupNormality]) -> Normality {
    let mut tested = false;
    for c in checks {
        if let NormalityCheck::Tested { normal, .. } = c.check {
            if !normal {
                return Normality::NonNormal;
            }
            tested = true;
        }
    }
    if tested {
        Normality::Normal
    } else {
        Normality::Unverified
    }
}

fn check_homogeneity(groups: &[&[f64]], alpha: f64) -> Homogeneity {
    let test = if groups.len() >= 2 {
        levene_test(groups)
    } else {
        None
    };
    let homogeneous = test.is_some_and(|t| t.p_value > alpha);
    match test {
        Some(t) => debug!(f = t.statistic, p = t.p_value, homogeneous, "Levene"),
        None => debug!("Levene not computable; treating variances as unequal"),
    }
    Homogeneity { test, homogeneous }
}

fn degenerate(method: Method, reason: &'static str) -> AnalysisError {
    AnalysisError::Degenerate {
        method: method.name(),
        reason,
    }
}

/// Compares the location of two or more independent samples.
///
/// Non-finite values and empty groups are dropped first. See the module
/// table for the branch taken; with three or more groups and a significant
/// result, Tukey HSD (ANOVA) or Bonferroni-thresholded pairwise Mann-Whitney
/// tests (Kruskal-Wallis) follow.
///
/// # Errors
///
/// - [`AnalysisError::TooFewGroups`] if fewer than two groups have data
/// - [`AnalysisError::Degenerate`] if the chosen statistic is undefined
///   (for example every observation tied)
///
/// # Examples
///
/// ```
/// use u_hypothesis::selector::{select_location, Method, SelectorConfig};
/// use u_hypothesis::table::GroupedSamples;
///
/// let g: GroupedSamples = [
///     ("a", vec![1.0, 1.1, 1.2, 1.0, 1.3, 1.1, 1.2, 25.0]),
///     ("b", vec![2.0, 2.1, 2.4, 2.2, 2.3, 2.5, 2.2, 2.3]),
/// ]
/// .into_iter()
/// .collect();
/// let d = select_location(g.groups(), &SelectorConfig::default()).unwrap();
/// assert_eq!(d.method, Method::MannWhitneyU);
/// ```
pub fn select_location(
    groups: &[Sample],
    config: &SelectorConfig,
) -> Result<LocationDecision, AnalysisError> {
    let groups = clean_groups(groups);
    let k = groups.len();
    if k < 2 {
        return Err(AnalysisError::TooFewGroups {
            required: 2,
            actual: k,
        });
    }
    let slices: Vec<&[f64]> = groups.iter().map(|g| g.values.as_slice()).collect();

    let normality: Vec<GroupNormality> = groups
        .iter()
        .map(|g| check_normality(g, config))
        .collect();
    let overall = overall_normality(&normality);
    let homogeneity = check_homogeneity(&slices, config.homogeneity_alpha);

    let mut warnings = Vec::new();
    let parametric = match overall {
        Normality::Normal => true,
        Normality::NonNormal => false,
        Normality::Unverified => {
            warn!(groups = k, "normality could not be verified for any group");
            warnings.push(AnalysisWarning::NormalityUnverified);
            !config.require_verified_normality
        }
    };

    let (method, result) = if k == 2 {
        let (a, b) = (slices[0], slices[1]);
        match (parametric, homogeneity.homogeneous) {
            (true, true) => (
                Method::StudentT,
                student_t_test(a, b).ok_or(degenerate(Method::StudentT, "zero pooled variance"))?,
            ),
            (true, false) => (
                Method::WelchT,
                welch_t_test(a, b).ok_or(degenerate(
                    Method::WelchT,
                    "each group needs two observations and nonzero variance",
                ))?,
            ),
            (false, _) => (
                Method::MannWhitneyU,
                mann_whitney_u_test(a, b)
                    .ok_or(degenerate(Method::MannWhitneyU, "all observations tied"))?,
            ),
        }
    } else if parametric && homogeneity.homogeneous {
        let anova = one_way_anova(&slices)
            .ok_or(degenerate(Method::OneWayAnova, "all observations identical"))?;
        (
            Method::OneWayAnova,
            TestResult {
                statistic: anova.f_statistic,
                df: anova.df_between as f64,
                p_value: anova.p_value,
            },
        )
    } else {
        (
            Method::KruskalWallis,
            kruskal_wallis_test(&slices)
                .ok_or(degenerate(Method::KruskalWallis, "all observations tied"))?,
        )
    };

    let significant = result.p_value < config.alpha;
    debug!(
        %method,
        statistic = result.statistic,
        p = result.p_value,
        significant,
        "location test selected"
    );

    let post_hoc = if k > 2 && significant {
        let ph = match method {
            Method::OneWayAnova => tukey_hsd(&groups, config.alpha),
            _ => pairwise_mann_whitney(&groups, config.alpha),
        };
        match &ph {
            Some(ph) => debug!(
                method = ?ph.method,
                pairs = ph.comparisons.len(),
                significant = ph.significant().count(),
                "post-hoc comparisons"
            ),
            None => {
                warn!(%method, "post-hoc comparisons unavailable");
                warnings.push(AnalysisWarning::PostHocUnavailable);
            }
        }
        ph
    } else {
        None
    };

    Ok(LocationDecision {
        method,
        statistic: result.statistic,
        df: result.df,
        p_value: result.p_value,
        significant,
        normality,
        overall_normality: overall,
        homogeneity,
        post_hoc,
        warnings,
    })
}

/// Tests a contingency table for association.
///
/// 2×2 tables with N below `exact_total_threshold` or an expected count
/// below `min_expected_count` use Fisher's exact test on rounded counts;
/// everything else uses Pearson chi-square.
///
/// # Errors
///
/// - [`AnalysisError::EmptyMargin`] if a row or column sums to zero
/// - [`AnalysisError::Degenerate`] if the chosen statistic is undefined
///
/// # Examples
///
/// ```
/// use u_hypothesis::selector::{select_association, Method, SelectorConfig};
/// use u_hypothesis::table::ContingencyTable;
///
/// let t = ContingencyTable::new(
///     vec!["improved".into(), "not improved".into()],
///     vec!["drug".into(), "placebo".into()],
///     vec![vec![3.0, 7.0], vec![3.0, 7.0]],
/// )
/// .unwrap();
/// let d = select_association(&t, &SelectorConfig::default()).unwrap();
/// assert_eq!(d.method, Method::FisherExact);
/// ```
pub fn select_association(
    table: &ContingencyTable,
    config: &SelectorConfig,
) -> Result<AssociationDecision, AnalysisError> {
    let expected = table.expected()?;
    let min_expected = expected.iter().copied().fold(f64::INFINITY, f64::min);
    let total = table.total();
    let mut warnings = Vec::new();

    let exact = table.is_2x2()
        && (total < config.exact_total_threshold || min_expected < config.min_expected_count);

    let (method, result) = if exact {
        let counts = [table.get(0, 0), table.get(0, 1), table.get(1, 0), table.get(1, 1)];
        if counts.iter().any(|c| (c - c.round()).abs() > 1e-9) {
            warn!(?counts, "rounding non-integer counts for the exact test");
            warnings.push(AnalysisWarning::RoundedCounts);
        }
        let [a, b, c, d] = counts.map(|c| c.round() as u64);
        (
            Method::FisherExact,
            fisher_exact_test(a, b, c, d).ok_or(degenerate(
                Method::FisherExact,
                "a margin is empty after rounding",
            ))?,
        )
    } else {
        if min_expected < config.min_expected_count {
            warn!(
                min_expected,
                threshold = config.min_expected_count,
                "low expected counts for chi-square"
            );
            warnings.push(AnalysisWarning::LowExpectedCount {
                min_expected,
                threshold: config.min_expected_count,
            });
        }
        (
            Method::ChiSquare,
            chi_squared_independence(
                table.as_slice(),
                table.n_rows(),
                table.n_cols(),
                config.yates_correction,
            )
            .ok_or(degenerate(Method::ChiSquare, "invalid table"))?,
        )
    };

    let association = if result.p_value < config.alpha {
        Association::Significant
    } else {
        Association::Independent
    };
    debug!(
        %method,
        total,
        min_expected,
        statistic = result.statistic,
        p = result.p_value,
        ?association,
        "association test selected"
    );

    Ok(AssociationDecision {
        method,
        statistic: result.statistic,
        df: result.df,
        p_value: result.p_value,
        association,
        expected,
        min_expected,
        total,
        warnings,
    })
}

/// Fits a two-way ANOVA and reports diagnostics and follow-ups.
///
/// # Errors
///
/// Any model-fit error from [`two_way_anova`].
///
/// # Examples
///
/// ```
/// use u_hypothesis::selector::{select_two_way, Interpretation, SelectorConfig};
/// use u_hypothesis::table::two_factor_from_long;
///
/// let records = two_factor_from_long([
///     ("a1", "b1", "10"), ("a1", "b1", "11"),
///     ("a1", "b2", "1"), ("a1", "b2", "2"),
///     ("a2", "b1", "1"), ("a2", "b1", "2"),
///     ("a2", "b2", "10"), ("a2", "b2", "11"),
/// ]);
/// let d = select_two_way(&records, &SelectorConfig::default()).unwrap();
/// assert_eq!(d.interpretation, Interpretation::InteractionSignificant);
/// ```
pub fn select_two_way(
    records: &[TwoFactorRecord],
    config: &SelectorConfig,
) -> Result<TwoWayDecision, AnalysisError> {
    let anova = two_way_anova(records)?;

    let residual_normality = shapiro_wilk_test(&anova.residuals);
    match residual_normality {
        Some(r) => debug!(w = r.w, p = r.p_value, "Shapiro-Wilk on residuals"),
        None => debug!(n = anova.residuals.len(), "residual normality not tested"),
    }
    let cell_slices: Vec<&[f64]> = anova.cells.iter().map(|c| c.values.as_slice()).collect();
    let homogeneity = check_homogeneity(&cell_slices, config.homogeneity_alpha);

    let interpretation = if anova.interaction.p_value < config.alpha {
        Interpretation::InteractionSignificant
    } else {
        Interpretation::MainEffectsIndependent
    };

    let any_effect = [anova.factor_a, anova.factor_b, anova.interaction]
        .iter()
        .any(|e| e.p_value < config.alpha);
    let post_hoc = if any_effect {
        tukey_hsd(&anova.cells, config.alpha)
    } else {
        None
    };
    let mut warnings = Vec::new();
    if any_effect && post_hoc.is_none() {
        warn!(
            df_residual = anova.df_residual,
            "Tukey HSD unavailable across cells"
        );
        warnings.push(AnalysisWarning::PostHocUnavailable);
    }

    debug!(
        p_a = anova.factor_a.p_value,
        p_b = anova.factor_b.p_value,
        p_ab = anova.interaction.p_value,
        ?interpretation,
        post_hoc = post_hoc.is_some(),
        "two-way ANOVA selected"
    );

    Ok(TwoWayDecision {
        method: Method::TwoWayAnova,
        anova,
        residual_normality,
        homogeneity,
        interpretation,
        post_hoc,
        warnings,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Margin;
    use crate::posthoc::PostHocMethod;

    const CONTROL: [f64; 6] = [10.2, 11.5, 10.8, 12.1, 11.3, 10.9];
    const TREATMENT: [f64; 6] = [13.5, 14.2, 15.1, 14.8, 13.9, 15.5];
    const OUTLIER: [f64; 10] = [1.0, 1.1, 1.2, 1.0, 1.3, 1.1, 1.2, 25.0, 1.05, 1.15];

    fn samples(layout: &[(&str, &[f64])]) -> Vec<Sample> {
        layout
            .iter()
            .map(|(n, v)| Sample {
                name: n.to_string(),
                values: v.to_vec(),
            })
            .collect()
    }

    fn shifted(base: &[f64], by: f64) -> Vec<f64> {
        base.iter().map(|v| v + by).collect()
    }

    fn table(rows: Vec<Vec<f64>>) -> ContingencyTable {
        let r = (0..rows.len()).map(|i| format!("r{i}")).collect();
        let c = (0..rows[0].len()).map(|j| format!("c{j}")).collect();
        ContingencyTable::new(r, c, rows).expect("valid table")
    }

    fn config() -> SelectorConfig {
        SelectorConfig::default()
    }

    // -----------------------------------------------------------------------
    // Location
    // -----------------------------------------------------------------------

    #[test]
    fn control_vs_treatment_selects_student() {
        let d = select_location(
            &samples(&[("Control", &CONTROL), ("Treatment", &TREATMENT)]),
            &config(),
        )
        .expect("should select");

        assert_eq!(d.method, Method::StudentT);
        assert_eq!(d.overall_normality, Normality::Normal);
        assert!(d.homogeneity.homogeneous);
        assert_eq!(d.df, 10.0);
        assert!(d.significant);
        assert!(d.post_hoc.is_none());
        assert!(d.warnings.is_empty());
    }

    #[test]
    fn non_normal_group_selects_mann_whitney() {
        let d = select_location(
            &samples(&[("skewed", &OUTLIER), ("Treatment", &TREATMENT)]),
            &config(),
        )
        .expect("should select");

        assert_eq!(d.method, Method::MannWhitneyU);
        assert_eq!(d.overall_normality, Normality::NonNormal);
        assert!(matches!(
            d.normality[0].check,
            NormalityCheck::Tested { normal: false, .. }
        ));
    }

    #[test]
    fn unequal_variance_selects_welch() {
        let wide: Vec<f64> = CONTROL.iter().map(|v| (v - 11.0) * 10.0 + 11.0).collect();
        let d = select_location(
            &samples(&[("narrow", &CONTROL), ("wide", &wide)]),
            &config(),
        )
        .expect("should select");

        assert_eq!(d.overall_normality, Normality::Normal);
        assert!(!d.homogeneity.homogeneous);
        assert_eq!(d.method, Method::WelchT);
    }

    #[test]
    fn shifted_groups_select_anova_with_tukey() {
        let up = shifted(&CONTROL, 3.0);
        let mid = shifted(&CONTROL, 1.5);
        let d = select_location(
            &samples(&[("base", &CONTROL), ("up", &up), ("mid", &mid)]),
            &config(),
        )
        .expect("should select");

        assert_eq!(d.method, Method::OneWayAnova);
        assert_eq!(d.df, 2.0);
        let ph = d.post_hoc.expect("significant ANOVA runs post-hoc");
        assert_eq!(ph.method, PostHocMethod::TukeyHsd);
        assert_eq!(ph.comparisons.len(), 3);
        assert_eq!(ph.threshold, 0.05);
    }

    #[test]
    fn non_normal_groups_select_kruskal_with_rank_pairs() {
        let high = shifted(&TREATMENT, 5.0);
        let d = select_location(
            &samples(&[("skewed", &OUTLIER), ("mid", &TREATMENT), ("high", &high)]),
            &config(),
        )
        .expect("should select");

        assert_eq!(d.method, Method::KruskalWallis);
        assert!(d.p_value < 0.01);
        let ph = d.post_hoc.expect("significant result runs post-hoc");
        assert_eq!(ph.method, PostHocMethod::BonferroniMannWhitney);
        assert_eq!(ph.comparisons.len(), 3);
        assert!((ph.threshold - 0.05 / 3.0).abs() < 1e-15);
    }

    #[test]
    fn small_groups_are_unverified() {
        let g = samples(&[("a", &[1.0, 2.0]), ("b", &[3.0, 5.0])]);

        let d = select_location(&g, &config()).expect("should select");
        assert_eq!(d.overall_normality, Normality::Unverified);
        assert_eq!(d.method, Method::MannWhitneyU);
        assert_eq!(d.warnings, vec![AnalysisWarning::NormalityUnverified]);
        assert!(d.normality.iter().all(|n| matches!(
            n.check,
            NormalityCheck::Skipped(NormalitySkip::SampleSize)
        )));

        let lenient = SelectorConfig {
            require_verified_normality: false,
            ..config()
        };
        let d = select_location(&g, &lenient).expect("should select");
        assert_eq!(d.overall_normality, Normality::Unverified);
        assert!(d.method.is_parametric());
    }

    #[test]
    fn large_normal_groups_are_tested() {
        let n = 6000;
        let scores: Vec<f64> = (1..=n)
            .map(|i| {
                crate::special::inverse_normal_cdf((i as f64 - 0.375) / (n as f64 + 0.25))
            })
            .collect();
        let up = shifted(&scores, 0.1);
        let g = samples(&[("a", scores.as_slice()), ("b", up.as_slice())]);

        let d = select_location(&g, &config()).expect("should select");
        assert_eq!(d.overall_normality, Normality::Normal);
        assert_eq!(d.method, Method::StudentT);
        assert!(d.warnings.is_empty());
        assert!(d
            .normality
            .iter()
            .all(|n| matches!(n.check, NormalityCheck::Tested { normal: true, .. })));
    }

    #[test]
    fn constant_group_is_skipped_not_failed() {
        let d = select_location(
            &samples(&[("flat", &[5.0, 5.0, 5.0, 5.0]), ("Control", &CONTROL)]),
            &config(),
        )
        .expect("should select");
        assert!(matches!(
            d.normality[0].check,
            NormalityCheck::Skipped(NormalitySkip::ZeroRange)
        ));
        assert_eq!(d.overall_normality, Normality::Normal);
    }

    #[test]
    fn empty_and_non_finite_values_are_dropped() {
        let d = select_location(
            &samples(&[
                ("Control", &CONTROL),
                ("empty", &[]),
                ("nan", &[f64::NAN]),
                ("Treatment", &TREATMENT),
            ]),
            &config(),
        )
        .expect("should select");
        assert_eq!(d.method, Method::StudentT);
        assert_eq!(d.normality.len(), 2);
    }

    #[test]
    fn too_few_groups() {
        let err = select_location(&samples(&[("a", &CONTROL), ("b", &[])]), &config())
            .unwrap_err();
        assert_eq!(
            err,
            AnalysisError::TooFewGroups {
                required: 2,
                actual: 1
            }
        );

        let g: GroupedSamples = [("only", CONTROL.to_vec())].into_iter().collect();
        assert!(Design::from_groups(&g).is_err());
    }

    #[test]
    fn all_tied_is_degenerate() {
        let err = select_location(
            &samples(&[("a", &[2.0, 2.0, 2.0]), ("b", &[2.0, 2.0])]),
            &config(),
        )
        .unwrap_err();
        assert!(matches!(err, AnalysisError::Degenerate { .. }));
        assert!(err.to_string().starts_with("insufficient data"));
    }

    // -----------------------------------------------------------------------
    // Association
    // -----------------------------------------------------------------------

    #[test]
    fn small_2x2_selects_fisher() {
        let d = select_association(&table(vec![vec![3.0, 7.0], vec![3.0, 7.0]]), &config())
            .expect("should select");
        assert_eq!(d.method, Method::FisherExact);
        assert_eq!(d.total, 20.0);
        assert!((d.min_expected - 3.0).abs() < 1e-12);
        assert_eq!(d.association, Association::Independent);
        assert!((d.p_value - 1.0).abs() < 1e-9);
    }

    #[test]
    fn large_2x2_selects_chi_square() {
        let d = select_association(
            &table(vec![vec![40.0, 60.0], vec![40.0, 60.0]]),
            &config(),
        )
        .expect("should select");
        assert_eq!(d.method, Method::ChiSquare);
        assert_eq!(d.df, 1.0);
        assert!((d.min_expected - 40.0).abs() < 1e-12);
        assert_eq!(d.association, Association::Independent);
        assert!(d.warnings.is_empty());
    }

    #[test]
    fn strong_association_is_significant() {
        let d = select_association(
            &table(vec![vec![80.0, 20.0], vec![20.0, 80.0]]),
            &config(),
        )
        .expect("should select");
        assert_eq!(d.method, Method::ChiSquare);
        assert_eq!(d.association, Association::Significant);
    }

    #[test]
    fn fractional_counts_are_rounded_with_warning() {
        let d = select_association(&table(vec![vec![2.6, 7.0], vec![3.0, 7.0]]), &config())
            .expect("should select");
        assert_eq!(d.method, Method::FisherExact);
        assert_eq!(d.warnings, vec![AnalysisWarning::RoundedCounts]);
    }

    #[test]
    fn larger_table_low_expected_warns() {
        let d = select_association(
            &table(vec![vec![2.0, 3.0, 9.0], vec![8.0, 1.0, 4.0]]),
            &config(),
        )
        .expect("should select");
        assert_eq!(d.method, Method::ChiSquare);
        assert_eq!(d.df, 2.0);
        assert!(matches!(
            d.warnings[..],
            [AnalysisWarning::LowExpectedCount { .. }]
        ));
    }

    #[test]
    fn zero_margin_is_an_error() {
        let err = select_association(&table(vec![vec![0.0, 5.0], vec![0.0, 3.0]]), &config())
            .unwrap_err();
        assert!(matches!(
            err,
            AnalysisError::EmptyMargin {
                margin: Margin::Column,
                ..
            }
        ));
    }

    // -----------------------------------------------------------------------
    // Two-way
    // -----------------------------------------------------------------------

    fn two_way_records(layout: &[(&str, &str, &[f64])]) -> Vec<TwoFactorRecord> {
        layout
            .iter()
            .flat_map(|(a, b, vs)| {
                vs.iter().map(move |&value| TwoFactorRecord {
                    a: a.to_string(),
                    b: b.to_string(),
                    value,
                })
            })
            .collect()
    }

    #[test]
    fn additive_design_reads_main_effects() {
        let d = select_two_way(
            &two_way_records(&[
                ("low", "ctrl", &[4.0, 6.0]),
                ("low", "drug", &[7.0, 9.0]),
                ("high", "ctrl", &[6.0, 8.0]),
                ("high", "drug", &[13.0, 15.0]),
            ]),
            &config(),
        )
        .expect("should fit");

        assert_eq!(d.method, Method::TwoWayAnova);
        assert_eq!(d.interpretation, Interpretation::MainEffectsIndependent);
        assert!(d.residual_normality.is_some());
        let ph = d.post_hoc.expect("factor B is significant");
        assert_eq!(ph.comparisons.len(), 6);
    }

    #[test]
    fn crossover_flags_interaction() {
        let d = select_two_way(
            &two_way_records(&[
                ("a1", "b1", &[10.0, 11.0]),
                ("a1", "b2", &[1.0, 2.0]),
                ("a2", "b1", &[1.0, 2.0]),
                ("a2", "b2", &[10.0, 11.0]),
            ]),
            &config(),
        )
        .expect("should fit");
        assert_eq!(d.interpretation, Interpretation::InteractionSignificant);
        assert!(d.anova.factor_a.p_value > 0.05);
    }

    #[test]
    fn unavailable_post_hoc_is_reported() {
        let d = select_two_way(
            &two_way_records(&[
                ("a1", "b1", &[1.0, 1.01]),
                ("a1", "b2", &[10.0]),
                ("a2", "b1", &[20.0]),
                ("a2", "b2", &[50.0]),
            ]),
            &config(),
        )
        .expect("should fit");
        assert_eq!(d.anova.df_residual, 1);
        assert!(d.anova.interaction.p_value < 0.05);
        assert!(d.post_hoc.is_none());
        assert_eq!(d.warnings, vec![AnalysisWarning::PostHocUnavailable]);

        let a = Analysis::TwoWay(d);
        assert_eq!(a.warnings(), &[AnalysisWarning::PostHocUnavailable]);
    }

    #[test]
    fn two_way_errors_propagate() {
        let err = select_two_way(
            &two_way_records(&[("a1", "b", &[1.0, 2.0]), ("a2", "b", &[3.0, 4.0])]),
            &config(),
        )
        .unwrap_err();
        assert_eq!(err.to_string(), "Factor B has only one level after filtering");
    }

    // -----------------------------------------------------------------------
    // Dispatch, configuration, serialization
    // -----------------------------------------------------------------------

    #[test]
    fn from_groups_picks_design() {
        let g: GroupedSamples = [
            ("a", CONTROL.to_vec()),
            ("b", TREATMENT.to_vec()),
            ("c", vec![]),
        ]
        .into_iter()
        .collect();
        let d = Design::from_groups(&g).expect("two groups");
        assert_eq!(d.kind(), "two-sample");
        match d {
            Design::TwoSample { first, second } => {
                assert_eq!(first.name, "a");
                assert_eq!(second.name, "b");
            }
            other => panic!("unexpected design {other:?}"),
        }
    }

    #[test]
    fn analyze_is_idempotent() {
        let design = Design::KSample(samples(&[
            ("base", &CONTROL),
            ("up", &shifted(&CONTROL, 3.0)),
            ("skewed", &OUTLIER),
        ]));
        let first = analyze(&design, &config()).expect("should select");
        let second = analyze(&design, &config()).expect("should select");
        assert_eq!(first, second);
        assert_eq!(first.method(), Method::KruskalWallis);
    }

    #[test]
    fn analyze_dispatches_every_design() {
        let c = config();
        let t = Design::Contingency(table(vec![vec![3.0, 7.0], vec![3.0, 7.0]]));
        assert_eq!(analyze(&t, &c).map(|a| a.method()), Ok(Method::FisherExact));

        let w = Design::TwoWay(two_way_records(&[
            ("x", "p", &[1.0, 3.0]),
            ("x", "q", &[2.0, 6.0]),
            ("y", "p", &[5.0, 7.0]),
            ("y", "q", &[0.0, 1.0]),
        ]));
        let a = analyze(&w, &c).expect("should fit");
        assert_eq!(a.method(), Method::TwoWayAnova);
        assert!((0.0..=1.0).contains(&a.p_value()));
        assert!(a.warnings().is_empty());
    }

    #[test]
    fn config_deserializes_with_defaults() {
        let c: SelectorConfig =
            serde_json::from_str(r#"{"alpha": 0.01, "yates_correction": false}"#)
                .expect("valid json");
        assert_eq!(c.alpha, 0.01);
        assert!(!c.yates_correction);
        assert_eq!(c.normality_alpha, 0.05);
        assert_eq!(c.exact_total_threshold, 40.0);
        assert!(c.require_verified_normality);
    }

    #[test]
    fn decision_serializes() {
        let a = analyze(
            &Design::TwoSample {
                first: samples(&[("Control", &CONTROL)]).remove(0),
                second: samples(&[("Treatment", &TREATMENT)]).remove(0),
            },
            &config(),
        )
        .expect("should select");
        let json = serde_json::to_value(&a).expect("serializable");
        assert_eq!(json["Location"]["method"], "StudentT");
        assert_eq!(json["Location"]["overall_normality"], "Normal");
    }

    #[test]
    fn method_names() {
        assert_eq!(Method::MannWhitneyU.to_string(), "Mann-Whitney U test");
        assert!(!Method::FisherExact.is_parametric());
        assert!(Method::WelchT.is_parametric());
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    fn group_sets() -> impl Strategy<Value = Vec<Vec<f64>>> {
        proptest::collection::vec(proptest::collection::vec(-50.0_f64..50.0, 2..12), 2..6)
    }

    fn to_samples(groups: Vec<Vec<f64>>) -> Vec<Sample> {
        groups
            .into_iter()
            .enumerate()
            .map(|(i, values)| Sample {
                name: format!("g{i}"),
                values,
            })
            .collect()
    }

    proptest! {
        #[test]
        fn parametric_iff_normal_and_homogeneous(groups in group_sets()) {
            let config = SelectorConfig::default();
            let k = groups.len();
            if let Ok(d) = select_location(&to_samples(groups), &config) {
                let parametric = d.overall_normality == Normality::Normal;
                let expected = match (k, parametric, d.homogeneity.homogeneous) {
                    (2, true, true) => Method::StudentT,
                    (2, true, false) => Method::WelchT,
                    (2, false, _) => Method::MannWhitneyU,
                    (_, true, true) => Method::OneWayAnova,
                    _ => Method::KruskalWallis,
                };
                prop_assert_eq!(d.method, expected);
                prop_assert!((0.0..=1.0).contains(&d.p_value));
            }
        }

        #[test]
        fn post_hoc_covers_all_pairs(groups in group_sets()) {
            let k = groups.len();
            if let Ok(d) = select_location(&to_samples(groups), &SelectorConfig::default()) {
                if let Some(ph) = d.post_hoc {
                    prop_assert!(k > 2);
                    prop_assert!(d.significant);
                    prop_assert_eq!(ph.comparisons.len(), k * (k - 1) / 2);
                }
            }
        }

        #[test]
        fn selection_is_idempotent(groups in group_sets()) {
            let design = Design::KSample(to_samples(groups));
            let config = SelectorConfig::default();
            let a = analyze(&design, &config).map(|a| (a.method(), a.p_value().to_bits()));
            let b = analyze(&design, &config).map(|a| (a.method(), a.p_value().to_bits()));
            prop_assert_eq!(a, b);
        }

        #[test]
        fn small_2x2_tables_are_exact(
            cells in proptest::collection::vec(1_u32..9, 4),
        ) {
            // N < 40 always
            let rows = vec![
                vec![cells[0] as f64, cells[1] as f64],
                vec![cells[2] as f64, cells[3] as f64],
            ];
            let t = ContingencyTable::new(
                vec!["yes".into(), "no".into()],
                vec!["g1".into(), "g2".into()],
                rows,
            ).expect("valid table");
            let d = select_association(&t, &SelectorConfig::default()).expect("no empty margins");
            prop_assert_eq!(d.method, Method::FisherExact);
            prop_assert!((0.0..=1.0).contains(&d.p_value));
        }
    }
}
