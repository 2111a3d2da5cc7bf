//! Two-way ANOVA with interaction.
//!
//! Two fixed factors, every factor-level combination observed at least once.
//! Effects use Type II sums of squares, so unbalanced designs give each main
//! effect adjusted for the other:
//!
//! - SS_A  = RSS(B) − RSS(A + B)
//! - SS_B  = RSS(A) − RSS(A + B)
//! - SS_AB = RSS(A + B) − RSS(A + B + AB)
//!
//! RSS(A), RSS(B) and the full-model RSS are within-level and within-cell
//! sums of squares. The additive model has no closed form off-balance and is
//! fitted by least squares on a treatment-coded design matrix.
//!
//! # References
//!
//! Langsrud (2003). "ANOVA for unbalanced data: Use Type II instead of
//! Type III sums of squares". Statistics and Computing, 13, 163–167.

use std::collections::HashMap;

use serde::Serialize;
use tracing::debug;

use crate::error::{AnalysisError, Factor};
use crate::special;
use crate::table::{Sample, TwoFactorRecord};

/// One line of the ANOVA table.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EffectRow {
    /// Sum of squares.
    pub sum_sq: f64,
    /// Degrees of freedom.
    pub df: usize,
    /// Mean square, `sum_sq / df`.
    pub mean_sq: f64,
    /// F = mean_sq / MS_residual.
    pub f_statistic: f64,
    /// Upper-tail p-value of F.
    pub p_value: f64,
}

/// Result of a two-way ANOVA.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TwoWayAnovaResult {
    /// Factor A levels in first-appearance order.
    pub levels_a: Vec<String>,
    /// Factor B levels in first-appearance order.
    pub levels_b: Vec<String>,
    /// Main effect of A.
    pub factor_a: EffectRow,
    /// Main effect of B.
    pub factor_b: EffectRow,
    /// A × B interaction.
    pub interaction: EffectRow,
    /// Residual sum of squares of the full model.
    pub ss_residual: f64,
    /// Residual degrees of freedom, N − ab.
    pub df_residual: usize,
    /// Residual mean square.
    pub ms_residual: f64,
    /// F of the full model against the intercept-only model.
    pub model_f: f64,
    /// p-value of `model_f` on (ab − 1, N − ab) df.
    pub model_p: f64,
    /// Observation minus its cell mean, in record order.
    pub residuals: Vec<f64>,
    /// Observations per cell, named `"a:b"`, A-major order.
    pub cells: Vec<Sample>,
}

fn level_index<'a>(
    levels: &mut Vec<String>,
    lookup: &mut HashMap<&'a str, usize>,
    label: &'a str,
) -> usize {
    *lookup.entry(label).or_insert_with(|| {
        levels.push(label.to_string());
        levels.len() - 1
    })
}

// Σ (x - mean)² within each bucket.
fn within_ss(values: &[f64], bucket: &[usize], n_buckets: usize) -> f64 {
    let mut sums = vec![0.0; n_buckets];
    let mut counts = vec![0usize; n_buckets];
    for (&v, &g) in values.iter().zip(bucket) {
        sums[g] += v;
        counts[g] += 1;
    }
    let means: Vec<f64> = sums
        .iter()
        .zip(&counts)
        .map(|(&s, &c)| if c > 0 { s / c as f64 } else { 0.0 })
        .collect();
    values
        .iter()
        .zip(bucket)
        .map(|(&v, &g)| (v - means[g]).powi(2))
        .sum()
}

/// Residual sum of squares of the least-squares fit of `y` on the row-major
/// design `x` (`y.len()` rows × `ncols` columns), solving the normal
/// equations by Gaussian elimination with partial pivoting.
///
/// Returns `None` when X'X is singular.
fn least_squares_rss(x: &[f64], y: &[f64], ncols: usize) -> Option<f64> {
    let width = ncols + 1;

    // Augmented [X'X | X'y]
    let mut aug = vec![0.0_f64; ncols * width];
    for (row, &yi) in x.chunks_exact(ncols).zip(y) {
        for j in 0..ncols {
            for k in j..ncols {
                aug[j * width + k] += row[j] * row[k];
            }
            aug[j * width + ncols] += row[j] * yi;
        }
    }
    for j in 0..ncols {
        for k in (j + 1)..ncols {
            aug[k * width + j] = aug[j * width + k];
        }
    }

    let scale = (0..ncols)
        .map(|j| aug[j * width + j].abs())
        .fold(0.0_f64, f64::max)
        .max(1.0);

    for col in 0..ncols {
        let pivot_row = (col..ncols)
            .max_by(|&a, &b| {
                aug[a * width + col]
                    .abs()
                    .total_cmp(&aug[b * width + col].abs())
            })
            .unwrap_or(col);
        if aug[pivot_row * width + col].abs() < 1e-12 * scale {
            return None;
        }
        if pivot_row != col {
            for j in 0..width {
                aug.swap(col * width + j, pivot_row * width + j);
            }
        }

        let pivot = aug[col * width + col];
        for row in (col + 1)..ncols {
            let factor = aug[row * width + col] / pivot;
            for j in col..width {
                aug[row * width + j] -= factor * aug[col * width + j];
            }
        }
    }

    let mut beta = vec![0.0_f64; ncols];
    for i in (0..ncols).rev() {
        let tail: f64 = ((i + 1)..ncols).map(|j| aug[i * width + j] * beta[j]).sum();
        beta[i] = (aug[i * width + ncols] - tail) / aug[i * width + i];
    }

    let rss = x
        .chunks_exact(ncols)
        .zip(y)
        .map(|(row, &yi)| {
            let fitted: f64 = row.iter().zip(&beta).map(|(&xv, &b)| xv * b).sum();
            (yi - fitted).powi(2)
        })
        .sum();
    Some(rss)
}

fn effect(sum_sq: f64, df: usize, ms_residual: f64, df_residual: usize) -> Option<EffectRow> {
    let sum_sq = sum_sq.max(0.0);
    let mean_sq = sum_sq / df as f64;
    let f_statistic = mean_sq / ms_residual;
    let p_value = special::f_upper_tail(f_statistic, df as f64, df_residual as f64)?;
    Some(EffectRow {
        sum_sq,
        df,
        mean_sq,
        f_statistic,
        p_value,
    })
}

/// Two-way ANOVA with interaction on long-format records.
///
/// Records with non-finite values are dropped before levels are collected.
///
/// # Errors
///
/// Checked in this order:
/// - [`AnalysisError::SingleLevel`] if either factor has fewer than 2 levels
/// - [`AnalysisError::EmptyCell`] for the first unobserved (A, B) combination
/// - [`AnalysisError::NoResidualDf`] if N ≤ ab
/// - [`AnalysisError::SingularDesign`] if the additive model cannot be solved
/// - [`AnalysisError::Degenerate`] if every cell is constant
///
/// # Examples
///
/// ```
/// use u_hypothesis::table::two_factor_from_long;
/// use u_hypothesis::twoway::two_way_anova;
///
/// let records = two_factor_from_long([
///     ("low", "ctrl", "4"), ("low", "ctrl", "6"),
///     ("low", "drug", "7"), ("low", "drug", "9"),
///     ("high", "ctrl", "6"), ("high", "ctrl", "8"),
///     ("high", "drug", "13"), ("high", "drug", "15"),
/// ]);
/// let r = two_way_anova(&records).unwrap();
/// assert!((r.factor_b.f_statistic - 25.0).abs() < 1e-9);
/// assert_eq!(r.df_residual, 4);
/// ```
pub fn two_way_anova(records: &[TwoFactorRecord]) -> Result<TwoWayAnovaResult, AnalysisError> {
    let records: Vec<&TwoFactorRecord> = records.iter().filter(|r| r.value.is_finite()).collect();

    let mut levels_a = Vec::new();
    let mut levels_b = Vec::new();
    let mut lookup_a = HashMap::new();
    let mut lookup_b = HashMap::new();
    let coded: Vec<(usize, usize)> = records
        .iter()
        .map(|r| {
            (
                level_index(&mut levels_a, &mut lookup_a, &r.a),
                level_index(&mut levels_b, &mut lookup_b, &r.b),
            )
        })
        .collect();

    let (na, nb) = (levels_a.len(), levels_b.len());
    if na < 2 {
        return Err(AnalysisError::SingleLevel { factor: Factor::A });
    }
    if nb < 2 {
        return Err(AnalysisError::SingleLevel { factor: Factor::B });
    }

    let n_cells = na * nb;
    let cell_of: Vec<usize> = coded.iter().map(|&(i, j)| i * nb + j).collect();
    let mut cells: Vec<Sample> = levels_a
        .iter()
        .flat_map(|a| {
            levels_b.iter().map(move |b| Sample {
                name: format!("{a}:{b}"),
                values: Vec::new(),
            })
        })
        .collect();
    for (r, &c) in records.iter().zip(&cell_of) {
        cells[c].values.push(r.value);
    }
    if let Some(empty) = cells.iter().position(|c| c.values.is_empty()) {
        return Err(AnalysisError::EmptyCell {
            a: levels_a[empty / nb].clone(),
            b: levels_b[empty % nb].clone(),
        });
    }

    let n = records.len();
    if n <= n_cells {
        return Err(AnalysisError::NoResidualDf {
            observations: n,
            parameters: n_cells,
        });
    }

    let y: Vec<f64> = records.iter().map(|r| r.value).collect();
    let a_idx: Vec<usize> = coded.iter().map(|&(i, _)| i).collect();
    let b_idx: Vec<usize> = coded.iter().map(|&(_, j)| j).collect();

    let rss_full = within_ss(&y, &cell_of, n_cells);
    let rss_a = within_ss(&y, &a_idx, na);
    let rss_b = within_ss(&y, &b_idx, nb);
    let sst = within_ss(&y, &vec![0; n], 1);

    // Intercept + (a-1) + (b-1) treatment-coded columns, first level as reference.
    let ncols = na + nb - 1;
    let mut design = vec![0.0_f64; n * ncols];
    for (row, &(i, j)) in design.chunks_exact_mut(ncols).zip(&coded) {
        row[0] = 1.0;
        if i > 0 {
            row[i] = 1.0;
        }
        if j > 0 {
            row[na - 1 + j] = 1.0;
        }
    }
    let rss_additive = least_squares_rss(&design, &y, ncols)
        .ok_or(AnalysisError::SingularDesign { model: "additive" })?;

    let df_residual = n - n_cells;
    let ms_residual = rss_full / df_residual as f64;
    if ms_residual.is_nan() || ms_residual <= 1e-300 || ms_residual <= sst * 1e-24 {
        return Err(AnalysisError::Degenerate {
            method: "Two-way ANOVA",
            reason: "zero variance within every cell",
        });
    }

    let degenerate = AnalysisError::Degenerate {
        method: "Two-way ANOVA",
        reason: "F distribution undefined",
    };
    let factor_a = effect(rss_b - rss_additive, na - 1, ms_residual, df_residual)
        .ok_or_else(|| degenerate.clone())?;
    let factor_b = effect(rss_a - rss_additive, nb - 1, ms_residual, df_residual)
        .ok_or_else(|| degenerate.clone())?;
    let interaction = effect(
        rss_additive - rss_full,
        (na - 1) * (nb - 1),
        ms_residual,
        df_residual,
    )
    .ok_or_else(|| degenerate.clone())?;
    let model = effect(sst - rss_full, n_cells - 1, ms_residual, df_residual)
        .ok_or(degenerate)?;

    let cell_means: Vec<f64> = cells
        .iter()
        .map(|c| c.values.iter().sum::<f64>() / c.values.len() as f64)
        .collect();
    let residuals = y
        .iter()
        .zip(&cell_of)
        .map(|(&v, &c)| v - cell_means[c])
        .collect();

    debug!(
        levels_a = na,
        levels_b = nb,
        observations = n,
        f_a = factor_a.f_statistic,
        f_b = factor_b.f_statistic,
        f_ab = interaction.f_statistic,
        "two-way ANOVA fitted"
    );

    Ok(TwoWayAnovaResult {
        levels_a,
        levels_b,
        factor_a,
        factor_b,
        interaction,
        ss_residual: rss_full,
        df_residual,
        ms_residual,
        model_f: model.f_statistic,
        model_p: model.p_value,
        residuals,
        cells,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn records(layout: &[(&str, &str, &[f64])]) -> Vec<TwoFactorRecord> {
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
    fn balanced_reference_table() {
        let r = two_way_anova(&records(&[
            ("low", "ctrl", &[4.0, 6.0]),
            ("low", "drug", &[7.0, 9.0]),
            ("high", "ctrl", &[6.0, 8.0]),
            ("high", "drug", &[13.0, 15.0]),
        ]))
        .expect("should fit");

        assert_eq!(r.levels_a, vec!["low", "high"]);
        assert_eq!(r.levels_b, vec!["ctrl", "drug"]);
        assert!((r.factor_a.sum_sq - 32.0).abs() < 1e-9);
        assert!((r.factor_b.sum_sq - 50.0).abs() < 1e-9);
        assert!((r.interaction.sum_sq - 8.0).abs() < 1e-9);
        assert!((r.ss_residual - 8.0).abs() < 1e-9);
        assert_eq!(r.df_residual, 4);
        assert!((r.ms_residual - 2.0).abs() < 1e-12);
        assert!((r.factor_a.f_statistic - 16.0).abs() < 1e-9);
        assert!((r.interaction.f_statistic - 4.0).abs() < 1e-9);
        assert!((r.model_f - 15.0).abs() < 1e-9);
        assert!(r.factor_b.p_value < 0.01);
        assert!(r.interaction.p_value > 0.05);
    }

    #[test]
    fn unbalanced_type_ii() {
        let r = two_way_anova(&records(&[
            ("low", "ctrl", &[4.0, 6.0, 5.0]),
            ("low", "drug", &[7.0, 9.0]),
            ("high", "ctrl", &[6.0, 8.0]),
            ("high", "drug", &[13.0, 15.0, 14.0, 12.0]),
        ]))
        .expect("should fit");

        // RSS(A+B) = 18.7368 from the additive least-squares fit
        assert!((r.factor_a.sum_sq - 37.396491228).abs() < 1e-6);
        assert!((r.factor_b.sum_sq - 59.396491228).abs() < 1e-6);
        assert!((r.interaction.sum_sq - 7.736842105).abs() < 1e-6);
        assert!((r.ss_residual - 11.0).abs() < 1e-9);
        assert_eq!(r.df_residual, 7);
    }

    #[test]
    fn residuals_and_cells() {
        let recs = records(&[
            ("x", "p", &[1.0, 3.0]),
            ("x", "q", &[2.0, 6.0]),
            ("y", "p", &[5.0, 7.0]),
            ("y", "q", &[0.0, 1.0]),
        ]);
        let r = two_way_anova(&recs).expect("should fit");
        assert_eq!(r.residuals.len(), 8);
        assert!(r.residuals.iter().sum::<f64>().abs() < 1e-12);
        assert_eq!((r.residuals[0], r.residuals[1]), (-1.0, 1.0));
        let names: Vec<&str> = r.cells.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["x:p", "x:q", "y:p", "y:q"]);
    }

    #[test]
    fn single_level_names_factor() {
        let err = two_way_anova(&records(&[
            ("a1", "only", &[1.0, 2.0]),
            ("a2", "only", &[3.0, 4.0]),
        ]))
        .unwrap_err();
        assert_eq!(err, AnalysisError::SingleLevel { factor: Factor::B });
        assert_eq!(err.to_string(), "Factor B has only one level after filtering");

        let err = two_way_anova(&[]).unwrap_err();
        assert_eq!(err, AnalysisError::SingleLevel { factor: Factor::A });
    }

    #[test]
    fn empty_cell_is_named() {
        let err = two_way_anova(&records(&[
            ("a1", "b1", &[1.0, 2.0]),
            ("a1", "b2", &[3.0, 4.0]),
            ("a2", "b1", &[5.0, 6.0]),
        ]))
        .unwrap_err();
        assert_eq!(
            err,
            AnalysisError::EmptyCell {
                a: "a2".into(),
                b: "b2".into()
            }
        );
    }

    #[test]
    fn one_observation_per_cell_has_no_residual_df() {
        let err = two_way_anova(&records(&[
            ("a1", "b1", &[1.0]),
            ("a1", "b2", &[3.0]),
            ("a2", "b1", &[5.0]),
            ("a2", "b2", &[8.0]),
        ]))
        .unwrap_err();
        assert_eq!(
            err,
            AnalysisError::NoResidualDf {
                observations: 4,
                parameters: 4
            }
        );
    }

    #[test]
    fn constant_cells_are_degenerate() {
        let err = two_way_anova(&records(&[
            ("a1", "b1", &[1.0, 1.0]),
            ("a1", "b2", &[3.0, 3.0]),
            ("a2", "b1", &[5.0, 5.0]),
            ("a2", "b2", &[8.0, 8.0]),
        ]))
        .unwrap_err();
        assert!(matches!(err, AnalysisError::Degenerate { .. }));
    }

    #[test]
    fn non_finite_records_dropped() {
        let mut recs = records(&[
            ("low", "ctrl", &[4.0, 6.0]),
            ("low", "drug", &[7.0, 9.0]),
            ("high", "ctrl", &[6.0, 8.0]),
            ("high", "drug", &[13.0, 15.0]),
        ]);
        recs.push(TwoFactorRecord {
            a: "low".into(),
            b: "ctrl".into(),
            value: f64::NAN,
        });
        let r = two_way_anova(&recs).expect("should fit");
        assert_eq!(r.df_residual, 4);
    }

    #[test]
    fn least_squares_detects_singular() {
        // Two identical columns
        let x = [1.0, 1.0, 1.0, 1.0, 1.0, 1.0];
        let y = [1.0, 2.0, 3.0];
        assert!(least_squares_rss(&x, &y, 2).is_none());
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn balanced_partition_of_total_ss(
            values in proptest::collection::vec(-100.0_f64..100.0, 18),
        ) {
            // 2 × 3 design, 3 replicates per cell
            let recs: Vec<TwoFactorRecord> = values
                .iter()
                .enumerate()
                .map(|(i, &value)| TwoFactorRecord {
                    a: format!("a{}", i / 9),
                    b: format!("b{}", (i / 3) % 3),
                    value,
                })
                .collect();

            if let Ok(r) = two_way_anova(&recs) {
                let mean = values.iter().sum::<f64>() / 18.0;
                let sst: f64 = values.iter().map(|v| (v - mean).powi(2)).sum();
                let parts = r.factor_a.sum_sq + r.factor_b.sum_sq
                    + r.interaction.sum_sq + r.ss_residual;
                prop_assert!((parts - sst).abs() <= 1e-6 * sst.max(1.0));
                prop_assert_eq!(r.factor_a.df, 1);
                prop_assert_eq!(r.factor_b.df, 2);
                prop_assert_eq!(r.interaction.df, 2);
                prop_assert_eq!(r.df_residual, 12);
                for p in [r.factor_a.p_value, r.factor_b.p_value, r.interaction.p_value] {
                    prop_assert!((0.0..=1.0).contains(&p));
                }
            }
        }
    }
}
