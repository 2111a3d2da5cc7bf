//! Hypothesis testing.
//!
//! The tests the method selector chooses between, plus the diagnostics it
//! runs first: t-tests (pooled and Welch), one-way ANOVA, Mann-Whitney U,
//! Kruskal-Wallis, Pearson chi-squared and Fisher exact tests of
//! independence, Shapiro-Wilk normality and Levene homogeneity.
//!
//! Every function takes clean finite data and returns `None` when the
//! statistic is undefined (too few observations, zero variance, degenerate
//! margins) rather than producing NaN.
//!
//! # Examples
//!
//! ```
//! use u_hypothesis::testing::{student_t_test, TestResult};
//!
//! let a = [5.1, 4.9, 5.2, 5.0, 4.8];
//! let b = [7.1, 6.9, 7.2, 7.0, 6.8];
//! let r: TestResult = student_t_test(&a, &b).unwrap();
//! assert!(r.p_value < 0.01);
//! ```

use serde::Serialize;
use statrs::statistics::{Data, Median, Statistics};

use crate::special;

/// Result of a hypothesis test.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TestResult {
    /// Test statistic (t, F, χ², U, H or odds ratio depending on test).
    pub statistic: f64,
    /// Degrees of freedom (fractional for Welch, 0 where not applicable).
    pub df: f64,
    /// Two-tailed p-value.
    pub p_value: f64,
}

fn all_finite(data: &[f64]) -> bool {
    data.iter().all(|v| v.is_finite())
}

fn mean(data: &[f64]) -> f64 {
    data.iter().mean()
}

fn sum_sq_dev(data: &[f64], center: f64) -> f64 {
    data.iter().map(|&x| (x - center).powi(2)).sum()
}

// ---------------------------------------------------------------------------
// t-tests
// ---------------------------------------------------------------------------

/// Independent two-sample t-test with pooled variance: H₀: μ₁ = μ₂.
///
/// # Algorithm
///
/// s²ₚ = [Σ(x₁ - x̄₁)² + Σ(x₂ - x̄₂)²] / (n₁ + n₂ - 2)
/// t = (x̄₁ - x̄₂) / √(s²ₚ (1/n₁ + 1/n₂)), df = n₁ + n₂ - 2.
///
/// # Returns
///
/// `None` if either sample is empty, n₁ + n₂ < 3, the pooled variance is
/// zero, or values are non-finite.
///
/// # Examples
///
/// ```
/// use u_hypothesis::testing::student_t_test;
///
/// let a = [10.2, 11.5, 10.8, 12.1, 11.3, 10.9];
/// let b = [13.5, 14.2, 15.1, 14.8, 13.9, 15.5];
/// let r = student_t_test(&a, &b).unwrap();
/// assert_eq!(r.df, 10.0);
/// assert!(r.p_value < 0.001);
/// ```
pub fn student_t_test(a: &[f64], b: &[f64]) -> Option<TestResult> {
    let (n1, n2) = (a.len(), b.len());
    if n1 == 0 || n2 == 0 || n1 + n2 < 3 {
        return None;
    }
    if !all_finite(a) || !all_finite(b) {
        return None;
    }

    let mean1 = mean(a);
    let mean2 = mean(b);
    let df = (n1 + n2 - 2) as f64;
    let pooled = (sum_sq_dev(a, mean1) + sum_sq_dev(b, mean2)) / df;

    let se_sq = pooled * (1.0 / n1 as f64 + 1.0 / n2 as f64);
    if se_sq < 1e-300 {
        return None;
    }

    let t = (mean1 - mean2) / se_sq.sqrt();
    let p_value = special::t_two_tailed(t, df)?;

    Some(TestResult {
        statistic: t,
        df,
        p_value,
    })
}

/// Two-sample Welch t-test: H₀: μ₁ = μ₂ (unequal variances).
///
/// # Algorithm
///
/// t = (x̄₁ - x̄₂) / √(s₁²/n₁ + s₂²/n₂)
/// df = Welch-Satterthwaite approximation.
///
/// # Returns
///
/// `None` if either sample has fewer than 2 observations, both variances
/// are zero, or values are non-finite.
///
/// # References
///
/// Welch (1947). "The generalization of Student's problem when several
/// different population variances are involved". Biometrika, 34, 28–35.
///
/// # Examples
///
/// ```
/// use u_hypothesis::testing::welch_t_test;
///
/// let a = [5.1, 4.9, 5.2, 5.0, 4.8];
/// let b = [7.1, 2.9, 9.2, 11.0, 4.8];
/// let r = welch_t_test(&a, &b).unwrap();
/// assert!(r.df < 8.0); // Satterthwaite df shrinks toward the noisy group
/// ```
pub fn welch_t_test(a: &[f64], b: &[f64]) -> Option<TestResult> {
    let (n1, n2) = (a.len(), b.len());
    if n1 < 2 || n2 < 2 {
        return None;
    }
    if !all_finite(a) || !all_finite(b) {
        return None;
    }

    let (n1f, n2f) = (n1 as f64, n2 as f64);
    let mean1 = mean(a);
    let mean2 = mean(b);
    let v1 = sum_sq_dev(a, mean1) / (n1f - 1.0) / n1f;
    let v2 = sum_sq_dev(b, mean2) / (n2f - 1.0) / n2f;

    let se_sq = v1 + v2;
    if se_sq < 1e-300 {
        return None;
    }

    let t = (mean1 - mean2) / se_sq.sqrt();

    // Welch-Satterthwaite degrees of freedom
    let df = se_sq.powi(2) / (v1 * v1 / (n1f - 1.0) + v2 * v2 / (n2f - 1.0));
    let p_value = special::t_two_tailed(t, df)?;

    Some(TestResult {
        statistic: t,
        df,
        p_value,
    })
}

// ---------------------------------------------------------------------------
// ANOVA
// ---------------------------------------------------------------------------

/// Result of one-way ANOVA.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnovaResult {
    /// F-statistic.
    pub f_statistic: f64,
    /// Degrees of freedom between groups.
    pub df_between: usize,
    /// Degrees of freedom within groups.
    pub df_within: usize,
    /// p-value.
    pub p_value: f64,
    /// Sum of squares between groups.
    pub ss_between: f64,
    /// Sum of squares within groups.
    pub ss_within: f64,
    /// Mean square within (pooled error variance).
    pub ms_within: f64,
    /// Group means.
    pub group_means: Vec<f64>,
}

/// One-way ANOVA: H₀: all group means are equal.
///
/// # Algorithm
///
/// F = MS_between / MS_within where
/// MS_between = SS_between / (k-1),
/// MS_within = SS_within / (N-k).
///
/// Groups of a single observation are allowed as long as N > k.
///
/// # Returns
///
/// `None` if fewer than 2 groups, an empty group, N ≤ k, all observations
/// identical, or non-finite values.
///
/// # References
///
/// Fisher (1925). "Statistical Methods for Research Workers".
///
/// # Examples
///
/// ```
/// use u_hypothesis::testing::one_way_anova;
///
/// let group1 = [5.0, 6.0, 7.0, 5.5, 6.5];
/// let group2 = [8.0, 9.0, 8.5, 9.5, 8.0];
/// let group3 = [4.0, 3.0, 3.5, 4.5, 4.0];
/// let r = one_way_anova(&[&group1, &group2, &group3]).unwrap();
/// assert!(r.p_value < 0.01);
/// ```
pub fn one_way_anova(groups: &[&[f64]]) -> Option<AnovaResult> {
    let k = groups.len();
    if k < 2 {
        return None;
    }
    if groups.iter().any(|g| g.is_empty() || !all_finite(g)) {
        return None;
    }

    let total_n: usize = groups.iter().map(|g| g.len()).sum();
    if total_n <= k {
        return None;
    }

    let grand_mean = groups.iter().flat_map(|g| g.iter()).sum::<f64>() / total_n as f64;
    let group_means: Vec<f64> = groups.iter().map(|g| mean(g)).collect();

    let ss_between: f64 = groups
        .iter()
        .zip(&group_means)
        .map(|(g, &gm)| g.len() as f64 * (gm - grand_mean).powi(2))
        .sum();
    let ss_within: f64 = groups
        .iter()
        .zip(&group_means)
        .map(|(g, &gm)| sum_sq_dev(g, gm))
        .sum();

    if ss_between + ss_within < 1e-300 {
        return None; // all observations identical
    }

    let df_between = k - 1;
    let df_within = total_n - k;
    let ms_between = ss_between / df_between as f64;
    let ms_within = ss_within / df_within as f64;

    let f_statistic = if ms_within > 1e-300 {
        ms_between / ms_within
    } else {
        f64::INFINITY
    };
    let p_value = special::f_upper_tail(f_statistic, df_between as f64, df_within as f64)?;

    Some(AnovaResult {
        f_statistic,
        df_between,
        df_within,
        p_value,
        ss_between,
        ss_within,
        ms_within,
        group_means,
    })
}

// ---------------------------------------------------------------------------
// Contingency tables
// ---------------------------------------------------------------------------

/// Pearson chi-squared test of independence on a contingency table.
///
/// # Arguments
///
/// * `table` - Flat row-major observed counts.
/// * `n_rows`, `n_cols` - Table shape.
/// * `yates` - Apply Yates' continuity correction when df = 1.
///
/// # Algorithm
///
/// Eᵢⱼ = (rowᵢ × colⱼ) / N.
/// χ² = Σᵢⱼ (|Oᵢⱼ - Eᵢⱼ| - c)² / Eᵢⱼ, df = (r-1)(c-1), where the
/// correction c = min(0.5, |Oᵢⱼ - Eᵢⱼ|) with Yates on a 1-df table and 0
/// otherwise.
///
/// # Returns
///
/// `None` if fewer than 2 rows or columns, a negative cell, or any zero
/// marginal.
///
/// # Examples
///
/// ```
/// use u_hypothesis::testing::chi_squared_independence;
///
/// let table = [30.0, 10.0, 20.0, 40.0];
/// let r = chi_squared_independence(&table, 2, 2, false).unwrap();
/// assert!(r.p_value < 0.01);
/// ```
pub fn chi_squared_independence(
    table: &[f64],
    n_rows: usize,
    n_cols: usize,
    yates: bool,
) -> Option<TestResult> {
    if n_rows < 2 || n_cols < 2 || table.len() != n_rows * n_cols {
        return None;
    }
    if table.iter().any(|&v| v < 0.0 || !v.is_finite()) {
        return None;
    }

    let mut row_sums = vec![0.0; n_rows];
    let mut col_sums = vec![0.0; n_cols];
    for (idx, &v) in table.iter().enumerate() {
        row_sums[idx / n_cols] += v;
        col_sums[idx % n_cols] += v;
    }
    if row_sums.iter().chain(&col_sums).any(|&s| s <= 0.0) {
        return None;
    }
    let total: f64 = row_sums.iter().sum();

    let df = ((n_rows - 1) * (n_cols - 1)) as f64;
    let correct = yates && df == 1.0;

    let mut chi2 = 0.0;
    for (idx, &observed) in table.iter().enumerate() {
        let expected = row_sums[idx / n_cols] * col_sums[idx % n_cols] / total;
        let mut diff = (observed - expected).abs();
        if correct {
            diff -= diff.min(0.5);
        }
        chi2 += diff * diff / expected;
    }

    let p_value = special::chi_squared_upper_tail(chi2, df)?;

    Some(TestResult {
        statistic: chi2,
        df,
        p_value,
    })
}

/// Fisher exact test for a 2×2 contingency table.
///
/// ```text
///          Col1   Col2
///   Row1 |  a   |  b  |
///   Row2 |  c   |  d  |
/// ```
///
/// # Algorithm
///
/// 1. Probability of each table with the observed marginals from the
///    hypergeometric distribution (log-factorials for stability).
/// 2. Two-tailed p-value = sum of probabilities ≤ P(observed).
///
/// The statistic is the sample odds ratio (a·d)/(b·c), infinite when
/// b·c = 0.
///
/// # Returns
///
/// `None` if any marginal total is zero.
///
/// # References
///
/// Fisher (1922). "On the interpretation of χ² from contingency tables,
/// and the calculation of P". JRSS, 85(1), 87–94.
///
/// # Examples
///
/// ```
/// use u_hypothesis::testing::fisher_exact_test;
///
/// // Tea-tasting experiment
/// let r = fisher_exact_test(3, 1, 1, 3).unwrap();
/// assert!((r.p_value - 0.4857).abs() < 1e-3);
/// ```
pub fn fisher_exact_test(a: u64, b: u64, c: u64, d: u64) -> Option<TestResult> {
    let row1 = a + b;
    let row2 = c + d;
    let col1 = a + c;
    let col2 = b + d;
    let n = row1 + row2;

    if row1 == 0 || row2 == 0 || col1 == 0 || col2 == 0 {
        return None;
    }

    let fixed = special::ln_factorial(row1)
        + special::ln_factorial(row2)
        + special::ln_factorial(col1)
        + special::ln_factorial(col2)
        - special::ln_factorial(n);
    let log_prob = |a_i: u64| -> f64 {
        let b_i = row1 - a_i;
        let c_i = col1 - a_i;
        let d_i = row2 - c_i;
        fixed
            - special::ln_factorial(a_i)
            - special::ln_factorial(b_i)
            - special::ln_factorial(c_i)
            - special::ln_factorial(d_i)
    };

    let a_min = col1.saturating_sub(row2);
    let a_max = row1.min(col1);
    let log_p_obs = log_prob(a);

    let p_value: f64 = (a_min..=a_max)
        .map(log_prob)
        .filter(|&lp| lp <= log_p_obs + 1e-7)
        .map(f64::exp)
        .sum();

    let odds_ratio = if b > 0 && c > 0 {
        (a as f64 * d as f64) / (b as f64 * c as f64)
    } else {
        f64::INFINITY
    };

    Some(TestResult {
        statistic: odds_ratio,
        df: 0.0,
        p_value: p_value.min(1.0),
    })
}

// ---------------------------------------------------------------------------
// Normality
// ---------------------------------------------------------------------------

/// Result of the Shapiro-Wilk normality test.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ShapiroWilkResult {
    /// The W statistic (0 < W ≤ 1). Values close to 1 suggest normality.
    pub w: f64,
    /// The p-value. Small values reject the null hypothesis of normality.
    pub p_value: f64,
}

/// Shapiro-Wilk normality test: H₀: data is normally distributed.
///
/// # Algorithm
///
/// Royston (1992, 1995) approximation (AS R94):
/// 1. Coefficients from Blom scores of normal order statistics with
///    polynomial corrections on the outermost one or two
/// 2. W = (Σ aᵢ (x₍ₙ₊₁₋ᵢ₎ - x₍ᵢ₎))² / Σ (xᵢ - x̄)²
/// 3. Normalizing transform of ln(1 - W), then the upper normal tail
///
/// n = 3 uses the exact distribution. Royston validated the approximation
/// up to n = 5000; larger samples still use it, with W increasingly
/// sensitive to trivial departures from normality.
///
/// # Returns
///
/// `None` if n < 3, all values identical, or non-finite values.
///
/// # References
///
/// - Shapiro & Wilk (1965). "An analysis of variance test for normality".
///   Biometrika, 52(3–4), 591–611.
/// - Royston (1995). "Remark AS R94: A remark on Algorithm AS 181".
///   Applied Statistics, 44(4), 547–551.
///
/// # Examples
///
/// ```
/// use u_hypothesis::testing::shapiro_wilk_test;
///
/// let data = [-1.5, -1.0, -0.5, 0.0, 0.5, 1.0, 1.5];
/// let r = shapiro_wilk_test(&data).unwrap();
/// assert!(r.p_value > 0.05);
/// ```
pub fn shapiro_wilk_test(data: &[f64]) -> Option<ShapiroWilkResult> {
    let n = data.len();
    if n < 3 || !all_finite(data) {
        return None;
    }

    let mut x = data.to_vec();
    x.sort_by(|a, b| a.total_cmp(b));
    if x[n - 1] - x[0] < 1e-300 {
        return None;
    }

    let nn2 = n / 2;
    let a = sw_coefficients(n, nn2)?;

    let numerator: f64 = (0..nn2).map(|i| a[i] * (x[n - 1 - i] - x[i])).sum();
    let ss = sum_sq_dev(&x, mean(&x));
    if ss < 1e-300 {
        return None;
    }
    let w = (numerator * numerator / ss).min(1.0);

    let p_value = if n == 3 {
        // Exact: p = (6/π)(asin √W − asin √(3/4))
        let w = w.max(0.75);
        6.0 / std::f64::consts::PI * (w.sqrt().asin() - 0.75_f64.sqrt().asin())
    } else {
        sw_p_value(w, n)
    };

    Some(ShapiroWilkResult {
        w,
        p_value: p_value.clamp(0.0, 1.0),
    })
}

// Royston polynomial coefficients (AS R94)
const SW_C1: [f64; 6] = [0.0, 0.221157, -0.147981, -2.07119, 4.434685, -2.706056];
const SW_C2: [f64; 6] = [0.0, 0.042981, -0.293762, -1.752461, 5.682633, -3.582633];
const SW_C3: [f64; 4] = [0.544, -0.39978, 0.025054, -6.714e-4];
const SW_C4: [f64; 4] = [1.3822, -0.77857, 0.062767, -0.0020322];
const SW_C5: [f64; 4] = [-1.5861, -0.31082, -0.083751, 0.0038915];
const SW_C6: [f64; 3] = [-0.4803, -0.082676, 0.0030302];
const SW_G: [f64; 2] = [-2.273, 0.459];

// c[0] + c[1]·x + c[2]·x² + … (Horner)
fn poly(c: &[f64], x: f64) -> f64 {
    c.iter().rev().fold(0.0, |acc, &ci| acc * x + ci)
}

// Antisymmetric half of the coefficient vector, largest first.
fn sw_coefficients(n: usize, nn2: usize) -> Option<Vec<f64>> {
    if n == 3 {
        return Some(vec![std::f64::consts::FRAC_1_SQRT_2]);
    }

    let nf = n as f64;
    let m: Vec<f64> = (1..=nn2)
        .map(|i| special::inverse_normal_cdf((i as f64 - 0.375) / (nf + 0.25)))
        .collect();
    let summ2 = 2.0 * m.iter().map(|v| v * v).sum::<f64>();
    let ssumm2 = summ2.sqrt();
    let rsn = 1.0 / nf.sqrt();

    let a1 = poly(&SW_C1, rsn) - m[0] / ssumm2;
    let mut a = vec![0.0; nn2];
    a[0] = a1;

    // n ≤ 5 corrects only the extreme coefficient
    let corrected = if n > 5 { 2 } else { 1 };
    let (fac_sq, one_minus) = if corrected == 2 {
        let a2 = -m[1] / ssumm2 + poly(&SW_C2, rsn);
        a[1] = a2;
        (
            summ2 - 2.0 * (m[0] * m[0] + m[1] * m[1]),
            1.0 - 2.0 * (a1 * a1 + a2 * a2),
        )
    } else {
        (summ2 - 2.0 * m[0] * m[0], 1.0 - 2.0 * a1 * a1)
    };
    if fac_sq <= 0.0 || one_minus <= 0.0 {
        return None;
    }
    let fac = (fac_sq / one_minus).sqrt();
    for i in corrected..nn2 {
        a[i] = -m[i] / fac;
    }

    Some(a)
}

fn sw_p_value(w: f64, n: usize) -> f64 {
    let nf = n as f64;
    let w1 = 1.0 - w;
    if w1 <= 0.0 {
        return 1.0;
    }
    let y = w1.ln();

    let (y, m, s) = if n <= 11 {
        let gamma = poly(&SW_G, nf);
        if y >= gamma {
            return 0.0;
        }
        (
            -(gamma - y).ln(),
            poly(&SW_C3, nf),
            poly(&SW_C4, nf).exp(),
        )
    } else {
        let ln_n = nf.ln();
        (y, poly(&SW_C5, ln_n), poly(&SW_C6, ln_n).exp())
    };
    if s < 1e-300 {
        return 0.0;
    }
    special::standard_normal_sf((y - m) / s)
}

// ---------------------------------------------------------------------------
// Homogeneity of variance
// ---------------------------------------------------------------------------

/// Levene test for equality of variances: H₀: all groups have equal variance.
///
/// Uses the **median** centre (Brown-Forsythe), robust to non-normal data.
///
/// # Algorithm
///
/// 1. zᵢⱼ = |xᵢⱼ - median(groupᵢ)|
/// 2. One-way ANOVA on the zᵢⱼ
///
/// # Returns
///
/// `None` if fewer than 2 groups, an empty group, N ≤ k, or every zᵢⱼ is
/// zero.
///
/// # References
///
/// - Levene (1960). "Robust tests for equality of variances".
/// - Brown & Forsythe (1974). JASA, 69(346), 364–367.
///
/// # Examples
///
/// ```
/// use u_hypothesis::testing::levene_test;
///
/// let g1 = [4.9, 5.0, 5.0, 5.1, 5.0];
/// let g2 = [0.0, 3.0, 5.0, 7.0, 10.0];
/// let r = levene_test(&[&g1, &g2]).unwrap();
/// assert!(r.p_value < 0.05);
/// ```
pub fn levene_test(groups: &[&[f64]]) -> Option<TestResult> {
    if groups.len() < 2 || groups.iter().any(|g| g.is_empty() || !all_finite(g)) {
        return None;
    }

    let z_groups: Vec<Vec<f64>> = groups
        .iter()
        .map(|g| {
            let median = Data::new(g.to_vec()).median();
            g.iter().map(|&x| (x - median).abs()).collect()
        })
        .collect();
    let z_refs: Vec<&[f64]> = z_groups.iter().map(Vec::as_slice).collect();
    let anova = one_way_anova(&z_refs)?;

    Some(TestResult {
        statistic: anova.f_statistic,
        df: anova.df_between as f64,
        p_value: anova.p_value,
    })
}

// ---------------------------------------------------------------------------
// Rank tests
// ---------------------------------------------------------------------------

/// Largest smaller sample for which Mann-Whitney uses the exact null
/// distribution (tie-free data only).
pub const MANN_WHITNEY_EXACT_MAX: usize = 8;

/// Mann-Whitney U test: H₀: the two populations have the same distribution.
///
/// # Algorithm
///
/// 1. Rank the pooled observations (average ranks for ties)
/// 2. U₁ = R₁ - n₁(n₁+1)/2, reported as the statistic
/// 3. Without ties and min(n₁, n₂) ≤ 8: exact two-sided p-value from the
///    permutation distribution of U
/// 4. Otherwise: normal approximation with tie-corrected variance and
///    continuity correction, z = (max(U₁, U₂) - n₁n₂/2 - 0.5) / σ
///
/// # Returns
///
/// `None` if either sample is empty, every observation is tied, or values are
/// non-finite.
///
/// # References
///
/// Mann & Whitney (1947). Annals of Mathematical Statistics, 18(1), 50–60.
///
/// # Examples
///
/// ```
/// use u_hypothesis::testing::mann_whitney_u_test;
///
/// let a = [1.0, 2.0, 3.0, 4.0, 5.0];
/// let b = [6.0, 7.0, 8.0, 9.0, 10.0];
/// let r = mann_whitney_u_test(&a, &b).unwrap();
/// assert_eq!(r.statistic, 0.0);
/// assert!((r.p_value - 2.0 / 252.0).abs() < 1e-12); // exact
/// ```
pub fn mann_whitney_u_test(a: &[f64], b: &[f64]) -> Option<TestResult> {
    let (n1, n2) = (a.len(), b.len());
    if n1 == 0 || n2 == 0 || !all_finite(a) || !all_finite(b) {
        return None;
    }

    let mut combined: Vec<(f64, usize)> = a
        .iter()
        .map(|&v| (v, 0))
        .chain(b.iter().map(|&v| (v, 1)))
        .collect();
    combined.sort_by(|x, y| x.0.total_cmp(&y.0));
    let ranks = average_ranks(&combined);

    let r1: f64 = combined
        .iter()
        .zip(&ranks)
        .filter(|((_, g), _)| *g == 0)
        .map(|(_, &r)| r)
        .sum();

    let (n1f, n2f) = (n1 as f64, n2 as f64);
    let u1 = r1 - n1f * (n1f + 1.0) / 2.0;
    let u_max = u1.max(n1f * n2f - u1);
    let ties = tie_correction(&combined);

    let p_value = if ties == 0.0 && n1.min(n2) <= MANN_WHITNEY_EXACT_MAX {
        let dist = mann_whitney_exact_counts(n1, n2);
        let total: f64 = dist.iter().sum();
        let start = u_max.round() as usize;
        2.0 * dist[start.min(dist.len())..].iter().sum::<f64>() / total
    } else {
        let nf = n1f + n2f;
        let sigma_sq = n1f * n2f / 12.0 * (nf + 1.0 - ties / (nf * (nf - 1.0)));
        if sigma_sq <= 1e-300 {
            return None;
        }
        let z = (u_max - n1f * n2f / 2.0 - 0.5) / sigma_sq.sqrt();
        2.0 * special::standard_normal_sf(z)
    };

    Some(TestResult {
        statistic: u1,
        df: 0.0,
        p_value: p_value.clamp(0.0, 1.0),
    })
}

// Frequencies of U = 0..=n1·n2 over all C(n1+n2, n1) arrangements: the
// coefficients of the Gaussian binomial [n1+n2 choose n1]_q, built up one
// factor (1 - q^(n+i)) / (1 - q^i) at a time.
fn mann_whitney_exact_counts(n1: usize, n2: usize) -> Vec<f64> {
    let (m, n) = (n1.min(n2), n1.max(n2));
    let mut c = vec![1.0];
    for i in 1..=m {
        let shift = n + i;
        c.resize(c.len() + shift, 0.0);
        for k in (shift..c.len()).rev() {
            c[k] -= c[k - shift];
        }
        for k in i..c.len() {
            c[k] += c[k - i];
        }
        c.truncate(i * n + 1);
    }
    c
}

// Average ranks (1-based) for sorted (value, tag) pairs.
fn average_ranks(sorted: &[(f64, usize)]) -> Vec<f64> {
    let n = sorted.len();
    let mut ranks = vec![0.0; n];
    let mut i = 0;
    while i < n {
        let mut j = i + 1;
        while j < n && sorted[j].0 == sorted[i].0 {
            j += 1;
        }
        let avg_rank = (i + 1 + j) as f64 / 2.0;
        ranks[i..j].fill(avg_rank);
        i = j;
    }
    ranks
}

// Σ (t³ - t) over tie groups of sorted values.
fn tie_correction(sorted: &[(f64, usize)]) -> f64 {
    sorted
        .chunk_by(|x, y| x.0 == y.0)
        .map(|run| {
            let t = run.len() as f64;
            t * t * t - t
        })
        .sum()
}

/// Kruskal-Wallis test: H₀: all groups have the same distribution.
///
/// # Algorithm
///
/// 1. Rank the pooled observations (average ranks for ties)
/// 2. H = (12 / N(N+1)) Σ nᵢ (R̄ᵢ - R̄)², divided by the tie correction
///    1 - Σ(t³ - t)/(N³ - N)
/// 3. H ~ χ²(k-1) under H₀
///
/// # Returns
///
/// `None` if fewer than 2 groups, an empty group, every observation tied, or
/// non-finite values.
///
/// # References
///
/// Kruskal & Wallis (1952). "Use of ranks in one-criterion variance
/// analysis". JASA, 47(260), 583–621.
///
/// # Examples
///
/// ```
/// use u_hypothesis::testing::kruskal_wallis_test;
///
/// let g1 = [1.0, 2.0, 3.0, 4.0, 5.0];
/// let g2 = [6.0, 7.0, 8.0, 9.0, 10.0];
/// let g3 = [11.0, 12.0, 13.0, 14.0, 15.0];
/// let r = kruskal_wallis_test(&[&g1, &g2, &g3]).unwrap();
/// assert!(r.p_value < 0.01);
/// ```
pub fn kruskal_wallis_test(groups: &[&[f64]]) -> Option<TestResult> {
    let k = groups.len();
    if k < 2 || groups.iter().any(|g| g.is_empty() || !all_finite(g)) {
        return None;
    }

    let mut combined: Vec<(f64, usize)> = groups
        .iter()
        .enumerate()
        .flat_map(|(gi, g)| g.iter().map(move |&v| (v, gi)))
        .collect();
    combined.sort_by(|a, b| a.0.total_cmp(&b.0));
    let nf = combined.len() as f64;

    let ties = 1.0 - tie_correction(&combined) / (nf * nf * nf - nf);
    if ties <= 1e-15 {
        return None;
    }

    let ranks = average_ranks(&combined);
    let mut rank_sums = vec![0.0; k];
    for ((_, gi), &r) in combined.iter().zip(&ranks) {
        rank_sums[*gi] += r;
    }

    let mean_rank = (nf + 1.0) / 2.0;
    let h: f64 = groups
        .iter()
        .zip(&rank_sums)
        .map(|(g, &rs)| {
            let ni = g.len() as f64;
            ni * (rs / ni - mean_rank).powi(2)
        })
        .sum::<f64>()
        * 12.0
        / (nf * (nf + 1.0))
        / ties;

    let df = (k - 1) as f64;
    let p_value = special::chi_squared_upper_tail(h, df)?;

    Some(TestResult {
        statistic: h,
        df,
        p_value,
    })
}

// ---------------------------------------------------------------------------
// Multiple comparison correction
// ---------------------------------------------------------------------------

/// Bonferroni correction: adjusted_pᵢ = min(pᵢ × m, 1).
///
/// # Returns
///
/// `None` if the slice is empty or contains non-finite values.
pub fn bonferroni_correction(p_values: &[f64]) -> Option<Vec<f64>> {
    if p_values.is_empty() || !all_finite(p_values) {
        return None;
    }
    let m = p_values.len() as f64;
    Some(p_values.iter().map(|&p| (p * m).min(1.0)).collect())
}

/// Per-comparison threshold α / m for `m` comparisons.
///
/// ```
/// use u_hypothesis::testing::bonferroni_threshold;
///
/// assert!((bonferroni_threshold(0.05, 3) - 0.05 / 3.0).abs() < 1e-15);
/// ```
pub fn bonferroni_threshold(alpha: f64, comparisons: usize) -> f64 {
    alpha / comparisons.max(1) as f64
}
