//! Tabular input: cell parsing, wide/long reshaping, contingency tables and
//! two-factor records.
//!
//! Every raw cell goes through [`parse_cell`], which returns an explicit
//! [`Cell`] instead of failing. Skipped cells are dropped before any
//! statistic is computed, so the test layer only ever sees finite `f64`
//! slices.
//!
//! # Examples
//!
//! ```
//! use u_hypothesis::table::WideTable;
//!
//! let wide = WideTable::new(
//!     vec!["Control".into(), "Treatment".into()],
//!     vec![
//!         vec!["10.2".into(), "13.5".into()],
//!         vec!["".into(), "14.2".into()],
//!         vec!["11.5".into(), "n/a".into()],
//!     ],
//! );
//! let long = wide.to_long();
//! assert_eq!(long.records.len(), 3);
//! assert_eq!(long.skipped, 2);
//!
//! let groups = long.to_groups();
//! assert_eq!(groups.get("Control").unwrap(), &[10.2, 11.5]);
//! ```

use std::collections::HashMap;

use serde::Serialize;

use crate::error::{AnalysisError, Margin};

// ---------------------------------------------------------------------------
// Cells
// ---------------------------------------------------------------------------

/// Why a cell was not used as a number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SkipReason {
    /// Blank or whitespace-only.
    Empty,
    /// Text that is not a number.
    NonNumeric,
    /// Parsed, but NaN or infinite.
    NonFinite,
}

/// Result of parsing one raw cell.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum Cell {
    /// A finite number.
    Number(f64),
    /// Dropped from analysis.
    Skip(SkipReason),
}

impl Cell {
    /// The numeric value, if any.
    pub fn value(self) -> Option<f64> {
        match self {
            Cell::Number(v) => Some(v),
            Cell::Skip(_) => None,
        }
    }
}

/// Parses a raw cell, trimming surrounding whitespace.
///
/// ```
/// use u_hypothesis::table::{parse_cell, Cell, SkipReason};
///
/// assert_eq!(parse_cell(" 3.5 "), Cell::Number(3.5));
/// assert_eq!(parse_cell(""), Cell::Skip(SkipReason::Empty));
/// assert_eq!(parse_cell("abc"), Cell::Skip(SkipReason::NonNumeric));
/// assert_eq!(parse_cell("NaN"), Cell::Skip(SkipReason::NonFinite));
/// ```
pub fn parse_cell(raw: &str) -> Cell {
    let s = raw.trim();
    if s.is_empty() {
        return Cell::Skip(SkipReason::Empty);
    }
    match s.parse::<f64>() {
        Ok(v) if v.is_finite() => Cell::Number(v),
        Ok(_) => Cell::Skip(SkipReason::NonFinite),
        Err(_) => Cell::Skip(SkipReason::NonNumeric),
    }
}

// ---------------------------------------------------------------------------
// Grouped samples
// ---------------------------------------------------------------------------

/// A named group and its observations.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Sample {
    /// Group label.
    pub name: String,
    /// Observations in input order.
    pub values: Vec<f64>,
}

/// Ordered mapping from group name to observations.
///
/// Groups keep first-appearance order; pushing to an existing name appends.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GroupedSamples {
    groups: Vec<Sample>,
}

impl GroupedSamples {
    /// Creates an empty collection.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends values to `name`, creating the group if needed.
    pub fn push(&mut self, name: impl Into<String>, values: impl IntoIterator<Item = f64>) {
        let name = name.into();
        match self.groups.iter_mut().find(|g| g.name == name) {
            Some(g) => g.values.extend(values),
            None => self.groups.push(Sample {
                name,
                values: values.into_iter().collect(),
            }),
        }
    }

    /// Builds groups from raw string cells, dropping skipped cells.
    pub fn from_raw<N, S>(groups: impl IntoIterator<Item = (N, Vec<S>)>) -> Self
    where
        N: Into<String>,
        S: AsRef<str>,
    {
        let mut out = Self::new();
        for (name, cells) in groups {
            out.push(
                name,
                cells.iter().filter_map(|c| parse_cell(c.as_ref()).value()),
            );
        }
        out
    }

    /// All groups, including empty ones.
    pub fn groups(&self) -> &[Sample] {
        &self.groups
    }

    /// Number of groups.
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    /// `true` if there are no groups.
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Observations of the named group.
    pub fn get(&self, name: &str) -> Option<&[f64]> {
        self.groups
            .iter()
            .find(|g| g.name == name)
            .map(|g| g.values.as_slice())
    }

    /// Group names in order.
    pub fn names(&self) -> Vec<&str> {
        self.groups.iter().map(|g| g.name.as_str()).collect()
    }

    /// Copy without groups that have no observations.
    pub fn non_empty(&self) -> Self {
        Self {
            groups: self
                .groups
                .iter()
                .filter(|g| !g.values.is_empty())
                .cloned()
                .collect(),
        }
    }

    /// Lays the groups out as columns, padding short columns with blanks.
    pub fn to_wide(&self) -> WideTable {
        let headers: Vec<String> = self.groups.iter().map(|g| g.name.clone()).collect();
        let height = self.groups.iter().map(|g| g.values.len()).max().unwrap_or(0);
        let rows = (0..height)
            .map(|i| {
                self.groups
                    .iter()
                    .map(|g| g.values.get(i).map(|v| v.to_string()).unwrap_or_default())
                    .collect()
            })
            .collect();
        WideTable::new(headers, rows)
    }
}

impl<N: Into<String>> FromIterator<(N, Vec<f64>)> for GroupedSamples {
    fn from_iter<T: IntoIterator<Item = (N, Vec<f64>)>>(iter: T) -> Self {
        let mut out = Self::new();
        for (name, values) in iter {
            out.push(name, values);
        }
        out
    }
}

// ---------------------------------------------------------------------------
// Wide / long
// ---------------------------------------------------------------------------

/// Table whose columns are groups and whose cells are observations.
#[derive(Debug, Clone, PartialEq)]
pub struct WideTable {
    /// Column headers (group names).
    pub headers: Vec<String>,
    /// Raw cell text, row-major. Rows may be ragged; missing cells are blank.
    pub rows: Vec<Vec<String>>,
}

/// One (group, value) observation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LongRecord {
    /// Group label.
    pub group: String,
    /// Observation.
    pub value: f64,
}

/// Long-format observations plus the number of cells dropped on the way.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LongTable {
    /// Records, column by column.
    pub records: Vec<LongRecord>,
    /// Cells that were empty, non-numeric or non-finite.
    pub skipped: usize,
}

impl WideTable {
    /// Creates a wide table from headers and raw rows.
    pub fn new(headers: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        Self { headers, rows }
    }

    /// Reshapes into (group, value) records, column by column.
    pub fn to_long(&self) -> LongTable {
        let mut out = LongTable::default();
        for (j, header) in self.headers.iter().enumerate() {
            for row in &self.rows {
                let raw = row.get(j).map(String::as_str).unwrap_or("");
                match parse_cell(raw) {
                    Cell::Number(value) => out.records.push(LongRecord {
                        group: header.clone(),
                        value,
                    }),
                    Cell::Skip(_) => out.skipped += 1,
                }
            }
        }
        out
    }
}

impl LongTable {
    /// Groups records by label in first-appearance order.
    pub fn to_groups(&self) -> GroupedSamples {
        let mut out = GroupedSamples::new();
        for r in &self.records {
            out.push(r.group.clone(), [r.value]);
        }
        out
    }
}

// ---------------------------------------------------------------------------
// Contingency tables
// ---------------------------------------------------------------------------

/// Labeled R×C matrix of non-negative counts (R, C ≥ 2).
///
/// Rows are outcome categories, columns are groups.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContingencyTable {
    row_labels: Vec<String>,
    col_labels: Vec<String>,
    counts: Vec<f64>,
}

impl ContingencyTable {
    /// Validates and builds a table from row-major counts.
    ///
    /// # Errors
    ///
    /// [`AnalysisError::InvalidTable`] if the shape is smaller than 2×2, rows
    /// are ragged, labels do not match the shape, or a cell is negative or
    /// non-finite.
    pub fn new(
        row_labels: Vec<String>,
        col_labels: Vec<String>,
        counts: Vec<Vec<f64>>,
    ) -> Result<Self, AnalysisError> {
        let invalid = |reason: String| AnalysisError::InvalidTable { reason };

        let n_rows = counts.len();
        let n_cols = counts.first().map_or(0, Vec::len);
        if n_rows < 2 || n_cols < 2 {
            return Err(invalid(format!(
                "shape {n_rows}x{n_cols}, need at least 2x2"
            )));
        }
        if let Some(i) = counts.iter().position(|r| r.len() != n_cols) {
            return Err(invalid(format!(
                "row {i} has {} cells, expected {n_cols}",
                counts[i].len()
            )));
        }
        if row_labels.len() != n_rows || col_labels.len() != n_cols {
            return Err(invalid(format!(
                "{} row labels and {} column labels for a {n_rows}x{n_cols} table",
                row_labels.len(),
                col_labels.len()
            )));
        }
        let flat: Vec<f64> = counts.into_iter().flatten().collect();
        if flat.iter().any(|v| !v.is_finite() || *v < 0.0) {
            return Err(invalid("counts must be finite and non-negative".into()));
        }

        Ok(Self {
            row_labels,
            col_labels,
            counts: flat,
        })
    }

    /// Counts co-occurrences of (row category, column category) pairs.
    ///
    /// Labels appear in first-appearance order.
    ///
    /// ```
    /// use u_hypothesis::table::ContingencyTable;
    ///
    /// let pairs = [("yes", "A"), ("no", "A"), ("yes", "B"), ("yes", "A")];
    /// let t = ContingencyTable::crosstab(pairs).unwrap();
    /// assert_eq!(t.get(0, 0), 2.0); // yes, A
    /// assert_eq!(t.get(1, 1), 0.0); // no, B
    /// ```
    pub fn crosstab<R, C>(pairs: impl IntoIterator<Item = (R, C)>) -> Result<Self, AnalysisError>
    where
        R: Into<String>,
        C: Into<String>,
    {
        let mut rows = LabelIndex::default();
        let mut cols = LabelIndex::default();
        let mut cells: HashMap<(usize, usize), f64> = HashMap::new();
        for (r, c) in pairs {
            let i = rows.index_of(r.into());
            let j = cols.index_of(c.into());
            *cells.entry((i, j)).or_insert(0.0) += 1.0;
        }
        let counts = (0..rows.labels.len())
            .map(|i| {
                (0..cols.labels.len())
                    .map(|j| cells.get(&(i, j)).copied().unwrap_or(0.0))
                    .collect()
            })
            .collect();
        Self::new(rows.labels, cols.labels, counts)
    }

    /// Number of rows.
    pub fn n_rows(&self) -> usize {
        self.row_labels.len()
    }

    /// Number of columns.
    pub fn n_cols(&self) -> usize {
        self.col_labels.len()
    }

    /// Row labels.
    pub fn row_labels(&self) -> &[String] {
        &self.row_labels
    }

    /// Column labels.
    pub fn col_labels(&self) -> &[String] {
        &self.col_labels
    }

    /// Count at row `i`, column `j`.
    ///
    /// # Panics
    ///
    /// If the indices are out of range.
    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.counts[i * self.n_cols() + j]
    }

    /// Flat row-major counts.
    pub fn as_slice(&self) -> &[f64] {
        &self.counts
    }

    /// Row totals.
    pub fn row_totals(&self) -> Vec<f64> {
        self.counts.chunks(self.n_cols()).map(|r| r.iter().sum()).collect()
    }

    /// Column totals.
    pub fn col_totals(&self) -> Vec<f64> {
        let mut totals = vec![0.0; self.n_cols()];
        for row in self.counts.chunks(self.n_cols()) {
            for (t, v) in totals.iter_mut().zip(row) {
                *t += v;
            }
        }
        totals
    }

    /// Grand total.
    pub fn total(&self) -> f64 {
        self.counts.iter().sum()
    }

    /// `true` for exactly two rows and two columns.
    pub fn is_2x2(&self) -> bool {
        self.n_rows() == 2 && self.n_cols() == 2
    }

    /// Expected counts under independence, row-major:
    /// Eᵢⱼ = rowᵢ × colⱼ / N.
    ///
    /// # Errors
    ///
    /// [`AnalysisError::EmptyMargin`] if a row or column sums to zero.
    pub fn expected(&self) -> Result<Vec<f64>, AnalysisError> {
        let rows = self.row_totals();
        let cols = self.col_totals();
        if let Some(i) = rows.iter().position(|&t| t <= 0.0) {
            return Err(AnalysisError::EmptyMargin {
                margin: Margin::Row,
                label: self.row_labels[i].clone(),
            });
        }
        if let Some(j) = cols.iter().position(|&t| t <= 0.0) {
            return Err(AnalysisError::EmptyMargin {
                margin: Margin::Column,
                label: self.col_labels[j].clone(),
            });
        }
        let total = self.total();
        Ok(rows
            .iter()
            .flat_map(|&r| cols.iter().map(move |&c| r * c / total))
            .collect())
    }
}

#[derive(Default)]
struct LabelIndex {
    labels: Vec<String>,
    positions: HashMap<String, usize>,
}

impl LabelIndex {
    fn index_of(&mut self, label: String) -> usize {
        if let Some(&i) = self.positions.get(&label) {
            return i;
        }
        let i = self.labels.len();
        self.positions.insert(label.clone(), i);
        self.labels.push(label);
        i
    }
}

// ---------------------------------------------------------------------------
// Two-factor records
// ---------------------------------------------------------------------------

/// One observation of a two-factor design.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TwoFactorRecord {
    /// Factor A level.
    pub a: String,
    /// Factor B level.
    pub b: String,
    /// Outcome.
    pub value: f64,
}

/// Builds records from long-format rows, dropping rows whose value cell is
/// skipped or whose factor levels are blank.
pub fn two_factor_from_long<A, B, V>(
    rows: impl IntoIterator<Item = (A, B, V)>,
) -> Vec<TwoFactorRecord>
where
    A: AsRef<str>,
    B: AsRef<str>,
    V: AsRef<str>,
{
    rows.into_iter()
        .filter_map(|(a, b, v)| {
            let (a, b) = (a.as_ref().trim(), b.as_ref().trim());
            if a.is_empty() || b.is_empty() {
                return None;
            }
            parse_cell(v.as_ref()).value().map(|value| TwoFactorRecord {
                a: a.to_string(),
                b: b.to_string(),
                value,
            })
        })
        .collect()
}

/// Builds records from a matrix: row `i` carries Factor A level
/// `row_labels[i]`, and each column listed in `assignment` contributes its
/// cells to the paired Factor B level. Unassigned columns are ignored; rows
/// without a label are ignored.
///
/// ```
/// use u_hypothesis::table::{two_factor_from_matrix, WideTable};
///
/// let m = WideTable::new(
///     vec!["r1".into(), "r2".into(), "d1".into()],
///     vec![
///         vec!["5.1".into(), "5.3".into(), "6.0".into()],
///         vec!["4.8".into(), "".into(), "6.4".into()],
///     ],
/// );
/// let rows = ["low", "high"];
/// let assign = [("r1", "ctrl"), ("r2", "ctrl"), ("d1", "drug")];
/// let recs = two_factor_from_matrix(&m, &rows, &assign);
/// assert_eq!(recs.len(), 5);
/// assert!(recs.iter().all(|r| r.a == "low" || r.a == "high"));
/// ```
pub fn two_factor_from_matrix<L, C, B>(
    matrix: &WideTable,
    row_labels: &[L],
    assignment: &[(C, B)],
) -> Vec<TwoFactorRecord>
where
    L: AsRef<str>,
    C: AsRef<str>,
    B: AsRef<str>,
{
    let columns: Vec<(usize, &str)> = assignment
        .iter()
        .filter_map(|(col, level)| {
            matrix
                .headers
                .iter()
                .position(|h| h == col.as_ref())
                .map(|j| (j, level.as_ref()))
        })
        .collect();

    let mut out = Vec::new();
    for (row, label) in matrix.rows.iter().zip(row_labels) {
        for &(j, level) in &columns {
            let raw = row.get(j).map(String::as_str).unwrap_or("");
            if let Some(value) = parse_cell(raw).value() {
                out.push(TwoFactorRecord {
                    a: label.as_ref().to_string(),
                    b: level.to_string(),
                    value,
                });
            }
        }
    }
    out
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    fn cell() -> impl Strategy<Value = String> {
        prop_oneof![
            (-1e4_f64..1e4).prop_map(|v| v.to_string()),
            Just(String::new()),
            Just("n/a".to_string()),
            Just("NaN".to_string()),
        ]
    }

    proptest! {
        #[test]
        fn wide_long_round_trip(
            columns in proptest::collection::vec(
                proptest::collection::vec(cell(), 0..12), 1..6)
        ) {
            let headers: Vec<String> = (0..columns.len()).map(|j| format!("g{j}")).collect();
            let height = columns.iter().map(Vec::len).max().unwrap_or(0);
            let rows: Vec<Vec<String>> = (0..height)
                .map(|i| columns.iter().map(|c| c.get(i).cloned().unwrap_or_default()).collect())
                .collect();
            let wide = WideTable::new(headers.clone(), rows);
            let groups = wide.to_long().to_groups();

            for (name, col) in headers.iter().zip(&columns) {
                let mut expected: Vec<f64> =
                    col.iter().filter_map(|c| parse_cell(c).value()).collect();
                let mut got = groups.get(name).map(<[f64]>::to_vec).unwrap_or_default();
                expected.sort_by(|a, b| a.partial_cmp(b).unwrap());
                got.sort_by(|a, b| a.partial_cmp(b).unwrap());
                prop_assert_eq!(expected, got);
            }
        }
    }
}
