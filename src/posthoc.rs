//! Post-hoc pairwise comparisons.
//!
//! Run after a significant k-sample result to locate which pairs differ:
//!
//! - [`tukey_hsd`]: Tukey's honestly-significant-difference test
//!   (Tukey-Kramer form for unequal sizes), p-values adjusted through the
//!   studentized range distribution.
//! - [`pairwise_mann_whitney`]: every pair tested with Mann-Whitney U,
//!   judged against the Bonferroni threshold α / m.
//!
//! Both report all k(k−1)/2 pairs, in (0,1), (0,2), …, (k−2,k−1) order.

use serde::Serialize;
use statrs::statistics::{Data, Median, Statistics};

use crate::special;
use crate::table::Sample;
use crate::testing::{bonferroni_correction, bonferroni_threshold, mann_whitney_u_test};

/// Procedure used for the pairwise comparisons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PostHocMethod {
    /// Tukey HSD on group means.
    TukeyHsd,
    /// Mann-Whitney U per pair, Bonferroni-corrected threshold.
    BonferroniMannWhitney,
}

/// One pair of groups.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PairwiseComparison {
    /// First group label.
    pub first: String,
    /// Second group label.
    pub second: String,
    /// Second minus first: difference in means (Tukey) or medians (rank).
    pub difference: f64,
    /// Studentized range q (Tukey) or U of the first group (rank).
    pub statistic: f64,
    /// Family-wise adjusted p-value (Tukey) or raw p-value (rank).
    pub p_value: f64,
    /// Family-wise adjusted p-value: equal to `p_value` for Tukey,
    /// Bonferroni min(p × m, 1) for rank pairs.
    pub adjusted_p_value: f64,
    /// `p_value` below the procedure's threshold.
    pub significant: bool,
}

/// All pairwise comparisons of one post-hoc run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PostHoc {
    /// Procedure used.
    pub method: PostHocMethod,
    /// Threshold each `p_value` was compared against.
    pub threshold: f64,
    /// Every pair, significant or not.
    pub comparisons: Vec<PairwiseComparison>,
}

impl PostHoc {
    /// Pairs flagged significant.
    pub fn significant(&self) -> impl Iterator<Item = &PairwiseComparison> {
        self.comparisons.iter().filter(|c| c.significant)
    }
}

/// Number of unordered pairs among `k` groups: k(k−1)/2.
pub fn pair_count(k: usize) -> usize {
    k * k.saturating_sub(1) / 2
}

// ---------------------------------------------------------------------------
// Studentized range distribution
// ---------------------------------------------------------------------------

const WPROB_NODES: [f64; 6] = [
    0.981560634246719250690549090149,
    0.904117256370474856678465866119,
    0.769902674194304687036893833213,
    0.587317954286617447296702418941,
    0.367831498998180193752691536644,
    0.125233408511468915472441369464,
];
const WPROB_WEIGHTS: [f64; 6] = [
    0.047175336386511827194615961485,
    0.106939325995318430960254718194,
    0.160078328543346226334652529543,
    0.203167426723065921749064455810,
    0.233492536538354808760849898925,
    0.249147045813402785000562436043,
];
const DF_NODES: [f64; 8] = [
    0.989400934991649932596154173450,
    0.944575023073232576077988415535,
    0.865631202387831743880467897712,
    0.755404408355003033895101194847,
    0.617876244402643748446671764049,
    0.458016777657227386342419442984,
    0.281603550779258913230460501460,
    0.950125098376374401853193354250e-1,
];
const DF_WEIGHTS: [f64; 8] = [
    0.271524594117540948517805724560e-1,
    0.622535239386478928628438369944e-1,
    0.951585116824927848099251076022e-1,
    0.124628971255533872052476282192,
    0.149595988816576732081501730547,
    0.169156519395002538189312079030,
    0.182603415044923588866763667969,
    0.189450610455068496285396723208,
];

// P(range of k standard normals < w), Hartley's form integrated with
// 12-point Gauss-Legendre over two or three panels on (w/2, 8).
fn range_probability(w: f64, k: f64) -> f64 {
    let half = w * 0.5;
    if half >= 8.0 {
        return 1.0;
    }

    let mut pr_w = 2.0 * special::standard_normal_cdf(half) - 1.0;
    pr_w = if pr_w >= (-50.0 / k).exp() {
        pr_w.powf(k)
    } else {
        0.0
    };

    let panels = if w > 3.0 { 2 } else { 3 };
    let width = (8.0 - half) / panels as f64;
    let k1 = k - 1.0;
    let mut lower = half;
    let mut integral = 0.0_f64;

    for _ in 0..panels {
        let upper = lower + width;
        let mid = 0.5 * (upper + lower);
        let radius = 0.5 * (upper - lower);
        let mut panel = 0.0_f64;

        for jj in 0..12 {
            let (node, weight) = if jj < 6 {
                (-WPROB_NODES[jj], WPROB_WEIGHTS[jj])
            } else {
                (WPROB_NODES[11 - jj], WPROB_WEIGHTS[11 - jj])
            };
            let x = mid + radius * node;
            let x2 = x * x;
            if x2 > 60.0 {
                break;
            }
            let inner = special::standard_normal_cdf(x) - special::standard_normal_cdf(x - w);
            if inner >= (-30.0 / k1).exp() {
                panel += weight * (-0.5 * x2).exp() * inner.powf(k1);
            }
        }

        integral += panel * 2.0 * radius * k / (2.0 * std::f64::consts::PI).sqrt();
        lower = upper;
    }

    pr_w += integral;
    if pr_w <= (-30.0_f64).exp() {
        return 0.0;
    }
    pr_w.min(1.0)
}

/// CDF of the studentized range distribution for `k` groups and `df` error
/// degrees of freedom.
///
/// # Algorithm
///
/// Copenhaver & Holland (1988): Gauss-Legendre quadrature over the
/// chi distribution of the error standard deviation, with the inner range
/// probability from Hartley's form. For df > 25 000 the normal-theory range
/// distribution is used directly.
///
/// # Returns
///
/// NaN for k < 2 or df < 2.
///
/// # References
///
/// Copenhaver & Holland (1988). "Computation of the distribution of the
/// maximum studentized range statistic with application to multiple
/// significance testing of simple effects". J. Statist. Comput. Simul.,
/// 30, 1–15.
///
/// # Examples
///
/// ```
/// use u_hypothesis::posthoc::studentized_range_cdf;
///
/// // 95% point of q(3, 12) is 3.7729
/// let p = studentized_range_cdf(3.772929, 3, 12.0);
/// assert!((p - 0.95).abs() < 1e-5);
/// ```
pub fn studentized_range_cdf(q: f64, k: usize, df: f64) -> f64 {
    if k < 2 || df < 2.0 || q.is_nan() {
        return f64::NAN;
    }
    if q <= 0.0 {
        return 0.0;
    }
    if q.is_infinite() {
        return 1.0;
    }
    let k = k as f64;
    if df > 25_000.0 {
        return range_probability(q, k);
    }

    let f2 = df * 0.5;
    let f21 = f2 - 1.0;
    let ff4 = df * 0.25;
    let step: f64 = if df <= 100.0 {
        1.0
    } else if df <= 800.0 {
        0.5
    } else if df <= 5000.0 {
        0.25
    } else {
        0.125
    };
    let lead = f2 * df.ln() - df * std::f64::consts::LN_2 - special::ln_gamma(f2) + step.ln();

    let mut total = 0.0_f64;
    for i in 1..=50 {
        let center = (2 * i - 1) as f64 * step;
        let mut interval = 0.0_f64;

        for jj in 0..16 {
            let (j, offset) = if jj < 8 {
                (jj, -DF_NODES[jj] * step)
            } else {
                (jj - 8, DF_NODES[jj - 8] * step)
            };
            let u = center + offset;
            let log_density = lead + f21 * u.ln() - u * ff4;
            if log_density >= -30.0 {
                let w = q * (u * 0.5).sqrt();
                interval += range_probability(w, k) * DF_WEIGHTS[j] * log_density.exp();
            }
        }

        if i as f64 * step >= 1.0 && interval <= 1e-14 {
            break;
        }
        total += interval;
    }

    total.min(1.0)
}

// ---------------------------------------------------------------------------
// Procedures
// ---------------------------------------------------------------------------

fn pairs(k: usize) -> impl Iterator<Item = (usize, usize)> {
    (0..k).flat_map(move |i| (i + 1..k).map(move |j| (i, j)))
}

/// Tukey HSD over all pairs of groups.
///
/// # Algorithm
///
/// MSE = Σ within-group SS / (N − k).
/// qᵢⱼ = |x̄ⱼ − x̄ᵢ| / √(MSE/2 · (1/nᵢ + 1/nⱼ)),
/// adjusted p = 1 − P(Q(k, N−k) ≤ qᵢⱼ).
///
/// # Returns
///
/// `None` if fewer than 2 groups, an empty group, N − k < 2, or zero MSE.
///
/// # References
///
/// Tukey (1949); Kramer (1956). "Extension of multiple range tests to group
/// means with unequal numbers of replications". Biometrics, 12(3), 307–310.
///
/// # Examples
///
/// ```
/// use u_hypothesis::posthoc::tukey_hsd;
/// use u_hypothesis::table::GroupedSamples;
///
/// let g: GroupedSamples = [
///     ("a", vec![5.0, 6.0, 7.0, 5.5, 6.5]),
///     ("b", vec![8.0, 9.0, 8.5, 9.5, 8.0]),
///     ("c", vec![5.2, 6.1, 6.8, 5.7, 6.4]),
/// ]
/// .into_iter()
/// .collect();
/// let r = tukey_hsd(g.groups(), 0.05).unwrap();
/// assert_eq!(r.comparisons.len(), 3);
/// let sig: Vec<_> = r.significant().map(|c| (c.first.as_str(), c.second.as_str())).collect();
/// assert_eq!(sig, vec![("a", "b"), ("b", "c")]);
/// ```
pub fn tukey_hsd(groups: &[Sample], alpha: f64) -> Option<PostHoc> {
    let k = groups.len();
    if k < 2 || groups.iter().any(|g| g.values.is_empty()) {
        return None;
    }
    let total: usize = groups.iter().map(|g| g.values.len()).sum();
    let df = total.checked_sub(k).filter(|&d| d >= 2)? as f64;

    let means: Vec<f64> = groups.iter().map(|g| g.values.iter().mean()).collect();
    let ss_within: f64 = groups
        .iter()
        .zip(&means)
        .map(|(g, &m)| g.values.iter().map(|&x| (x - m).powi(2)).sum::<f64>())
        .sum();
    let mse = ss_within / df;
    if mse.is_nan() || mse <= 1e-300 {
        return None;
    }

    let comparisons = pairs(k)
        .map(|(i, j)| {
            let (ni, nj) = (groups[i].values.len() as f64, groups[j].values.len() as f64);
            let difference = means[j] - means[i];
            let se = (mse / 2.0 * (1.0 / ni + 1.0 / nj)).sqrt();
            let q = difference.abs() / se;
            let p_value = (1.0 - studentized_range_cdf(q, k, df)).clamp(0.0, 1.0);
            PairwiseComparison {
                first: groups[i].name.clone(),
                second: groups[j].name.clone(),
                difference,
                statistic: q,
                p_value,
                adjusted_p_value: p_value,
                significant: p_value < alpha,
            }
        })
        .collect();

    Some(PostHoc {
        method: PostHocMethod::TukeyHsd,
        threshold: alpha,
        comparisons,
    })
}

/// Pairwise Mann-Whitney U tests with a Bonferroni threshold α / m,
/// m = k(k−1)/2.
///
/// Raw p-values are reported alongside their Bonferroni-adjusted values;
/// `significant` compares the raw p-value to the corrected threshold. A pair whose pooled observations are all tied has no rank
/// information and is reported with U = n₁n₂/2 and p = 1.
///
/// # Returns
///
/// `None` if fewer than 2 groups or an empty group.
///
/// # Examples
///
/// ```
/// use u_hypothesis::posthoc::pairwise_mann_whitney;
/// use u_hypothesis::table::GroupedSamples;
///
/// let g: GroupedSamples = [
///     ("a", vec![1.0, 2.0, 3.0]),
///     ("b", vec![4.0, 5.0, 6.0]),
///     ("c", vec![7.0, 8.0, 9.0]),
///     ("d", vec![10.0, 11.0, 12.0]),
/// ]
/// .into_iter()
/// .collect();
/// let r = pairwise_mann_whitney(g.groups(), 0.05).unwrap();
/// assert_eq!(r.comparisons.len(), 6);
/// assert!((r.threshold - 0.05 / 6.0).abs() < 1e-15);
/// ```
pub fn pairwise_mann_whitney(groups: &[Sample], alpha: f64) -> Option<PostHoc> {
    let k = groups.len();
    if k < 2 || groups.iter().any(|g| g.values.is_empty()) {
        return None;
    }
    let threshold = bonferroni_threshold(alpha, pair_count(k));
    let medians: Vec<f64> = groups
        .iter()
        .map(|g| Data::new(g.values.clone()).median())
        .collect();

    let raw: Vec<(usize, usize, f64, f64)> = pairs(k)
        .map(|(i, j)| {
            let (a, b) = (&groups[i].values, &groups[j].values);
            match mann_whitney_u_test(a, b) {
                Some(r) => (i, j, r.statistic, r.p_value),
                None => (i, j, (a.len() * b.len()) as f64 / 2.0, 1.0),
            }
        })
        .collect();
    let p_values: Vec<f64> = raw.iter().map(|&(.., p)| p).collect();
    let adjusted = bonferroni_correction(&p_values)?;

    let comparisons = raw
        .into_iter()
        .zip(adjusted)
        .map(|((i, j, statistic, p_value), adjusted_p_value)| PairwiseComparison {
            first: groups[i].name.clone(),
            second: groups[j].name.clone(),
            difference: medians[j] - medians[i],
            statistic,
            p_value,
            adjusted_p_value,
            significant: p_value < threshold,
        })
        .collect();

    Some(PostHoc {
        method: PostHocMethod::BonferroniMannWhitney,
        threshold,
        comparisons,
    })
}
