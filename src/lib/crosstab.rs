use crate::error::Result;
use crate::fit::{fit_beta_binomial_with, FitOptions, FitResult};
use crate::model::{BetaParams, CountObservation};
use crate::optimizer::Minimizer;
use crate::stats::{mean, sample_standard_deviation};
use log::{debug, info};
use ordered_float::OrderedFloat;
use serde::Serialize;
use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet};

/// One binary outcome tagged with its row and column group.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct OutcomeRow<R, C> {
    pub outcome: bool,
    pub row: R,
    pub column: C,
}

impl<R, C> OutcomeRow<R, C> {
    pub fn new(outcome: bool, row: R, column: C) -> Self {
        Self {
            outcome,
            row,
            column,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CrosstabCell {
    pub successes: u64,
    pub trials: u64,
}

pub struct CrosstabBuilder<R, C> {
    cells: BTreeMap<(R, C), CrosstabCell>,
}

impl<R: Ord + Clone, C: Ord + Clone> CrosstabBuilder<R, C> {
    pub fn new() -> Self {
        Self {
            cells: BTreeMap::new(),
        }
    }

    pub fn push(&mut self, row: OutcomeRow<R, C>) {
        let cell = self.cells.entry((row.row, row.column)).or_default();
        cell.trials += 1;
        cell.successes += row.outcome as u64;
    }

    pub fn push_rows<I>(&mut self, rows: I)
    where
        I: IntoIterator<Item = OutcomeRow<R, C>>,
    {
        for row in rows {
            self.push(row);
        }
        debug!("Crosstab holds {} observed cells", self.cells.len());
    }

    pub fn build(self) -> Crosstab<R, C> {
        let rows: BTreeSet<R> = self.cells.keys().map(|(r, _)| r.clone()).collect();
        let columns: BTreeSet<C> = self.cells.keys().map(|(_, c)| c.clone()).collect();
        Crosstab {
            rows: rows.into_iter().collect(),
            columns: columns.into_iter().collect(),
            cells: self.cells,
        }
    }
}

impl<R: Ord + Clone, C: Ord + Clone> Default for CrosstabBuilder<R, C> {
    fn default() -> Self {
        Self::new()
    }
}

/// Success/trial counts per observed (row, column) group. Labels are kept in
/// ascending order.
#[derive(Clone, Debug, PartialEq)]
pub struct Crosstab<R, C> {
    rows: Vec<R>,
    columns: Vec<C>,
    cells: BTreeMap<(R, C), CrosstabCell>,
}

impl<R: Ord + Clone, C: Ord + Clone> Crosstab<R, C> {
    pub fn from_rows<I>(rows: I) -> Self
    where
        I: IntoIterator<Item = OutcomeRow<R, C>>,
    {
        let mut builder = CrosstabBuilder::new();
        builder.push_rows(rows);
        builder.build()
    }

    pub fn rows(&self) -> &[R] {
        &self.rows
    }

    pub fn columns(&self) -> &[C] {
        &self.columns
    }

    pub fn n_observed_cells(&self) -> usize {
        self.cells.len()
    }

    /// Counts for one combination; never-observed combinations are empty.
    pub fn cell(&self, row: &R, column: &C) -> CrosstabCell {
        self.cells
            .get(&(row.clone(), column.clone()))
            .copied()
            .unwrap_or_default()
    }

    /// One observation per observed cell, in (row, column) order.
    pub fn observations(&self) -> Vec<CountObservation> {
        self.cells
            .values()
            .filter_map(|cell| CountObservation::new(cell.successes, cell.trials))
            .collect()
    }

    /// Shrunken estimate for the full row x column grid, in label order.
    pub fn shrunken_matrix(&self, params: BetaParams) -> ShrunkenMatrix<R, C> {
        let values = self
            .rows
            .iter()
            .map(|r| {
                self.columns
                    .iter()
                    .map(|c| {
                        let cell = self.cell(r, c);
                        params.shrink(cell.successes, cell.trials)
                    })
                    .collect()
            })
            .collect();
        LabeledMatrix::new(self.rows.clone(), self.columns.clone(), values)
    }

    /// Number of outcome rows in every cell, in label order.
    pub fn count_matrix(&self) -> CountMatrix<R, C> {
        let values = self
            .rows
            .iter()
            .map(|r| self.columns.iter().map(|c| self.cell(r, c).trials).collect())
            .collect();
        LabeledMatrix::new(self.rows.clone(), self.columns.clone(), values)
    }

    pub fn shrinkage_table_with<M: Minimizer>(
        &self,
        options: &FitOptions,
        minimizer: &M,
    ) -> Result<ShrinkageTable<R, C>> {
        let fit = fit_beta_binomial_with(&self.observations(), options, minimizer)?;
        let shrunken = self.shrunken_matrix(fit.params);
        let counts = self.count_matrix();

        let row_order = descending_order(&shrunken.row_means());
        let column_order = descending_order(&shrunken.column_means());
        let shrunken = shrunken.reindex(&row_order, &column_order);
        let counts = counts.reindex(&row_order, &column_order);

        let diagnostics = Diagnostics::from_matrix(&shrunken);
        info!(
            "{} x {} table, SD of row means: {:?}, SD of column means: {:?}, SD of interaction: {:?}",
            shrunken.n_rows(),
            shrunken.n_columns(),
            diagnostics.row_mean_sd,
            diagnostics.column_mean_sd,
            diagnostics.interaction_sd
        );

        Ok(ShrinkageTable {
            shrunken,
            counts,
            fit,
            diagnostics,
        })
    }

    pub fn shrinkage_table(&self, options: &FitOptions) -> Result<ShrinkageTable<R, C>> {
        self.shrinkage_table_with(options, &options.nelder_mead())
    }
}

/// Indices ordering `values` from largest to smallest; equal values keep
/// their relative order.
pub fn descending_order(values: &[f64]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by_key(|&i| Reverse(OrderedFloat(values[i])));
    order
}

/// Dense matrix with row and column labels.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct LabeledMatrix<R, C, T> {
    rows: Vec<R>,
    columns: Vec<C>,
    values: Vec<Vec<T>>,
}

pub type ShrunkenMatrix<R, C> = LabeledMatrix<R, C, f64>;
pub type CountMatrix<R, C> = LabeledMatrix<R, C, u64>;

impl<R, C, T> LabeledMatrix<R, C, T> {
    pub fn new(rows: Vec<R>, columns: Vec<C>, values: Vec<Vec<T>>) -> Self {
        debug_assert_eq!(rows.len(), values.len());
        debug_assert!(values.iter().all(|v| v.len() == columns.len()));
        Self {
            rows,
            columns,
            values,
        }
    }

    pub fn rows(&self) -> &[R] {
        &self.rows
    }

    pub fn columns(&self) -> &[C] {
        &self.columns
    }

    pub fn n_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn n_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.n_rows(), self.n_columns())
    }

    pub fn row(&self, i: usize) -> &[T] {
        &self.values[i]
    }

    pub fn get(&self, i: usize, j: usize) -> Option<&T> {
        self.values.get(i).and_then(|row| row.get(j))
    }

    pub fn get_by_label(&self, row: &R, column: &C) -> Option<&T>
    where
        R: PartialEq,
        C: PartialEq,
    {
        let i = self.rows.iter().position(|r| r == row)?;
        let j = self.columns.iter().position(|c| c == column)?;
        self.get(i, j)
    }

    /// Matrix with rows and columns taken in the given index orders.
    pub fn reindex(&self, row_order: &[usize], column_order: &[usize]) -> Self
    where
        R: Clone,
        C: Clone,
        T: Clone,
    {
        Self {
            rows: row_order.iter().map(|&i| self.rows[i].clone()).collect(),
            columns: column_order.iter().map(|&j| self.columns[j].clone()).collect(),
            values: row_order
                .iter()
                .map(|&i| column_order.iter().map(|&j| self.values[i][j].clone()).collect())
                .collect(),
        }
    }

    pub fn relabel<R2, C2>(
        self,
        row_label: impl Fn(&R) -> R2,
        column_label: impl Fn(&C) -> C2,
    ) -> LabeledMatrix<R2, C2, T> {
        LabeledMatrix {
            rows: self.rows.iter().map(row_label).collect(),
            columns: self.columns.iter().map(column_label).collect(),
            values: self.values,
        }
    }
}

impl<R, C> LabeledMatrix<R, C, f64> {
    pub fn row_means(&self) -> Vec<f64> {
        self.values
            .iter()
            .map(|row| mean(row).unwrap_or(f64::NAN))
            .collect()
    }

    pub fn column_means(&self) -> Vec<f64> {
        (0..self.n_columns())
            .map(|j| {
                let column: Vec<f64> = self.values.iter().map(|row| row[j]).collect();
                mean(&column).unwrap_or(f64::NAN)
            })
            .collect()
    }
}

/// Spread of the row effects, column effects and the remaining interaction
/// of a shrunken matrix (sample standard deviations).
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Diagnostics {
    pub row_mean_sd: Option<f64>,
    pub column_mean_sd: Option<f64>,
    pub interaction_sd: Option<f64>,
}

impl Diagnostics {
    pub fn from_matrix<R, C>(matrix: &ShrunkenMatrix<R, C>) -> Self {
        let row_means = matrix.row_means();
        let column_means = matrix.column_means();
        let grand_mean = mean(&row_means).unwrap_or(0.0);
        let residuals: Vec<f64> = row_means
            .iter()
            .enumerate()
            .flat_map(|(i, rm)| {
                let column_means = &column_means;
                matrix
                    .row(i)
                    .iter()
                    .zip(column_means.iter())
                    .map(move |(v, cm)| v - rm - cm + grand_mean)
            })
            .collect();
        Self {
            row_mean_sd: sample_standard_deviation(&row_means),
            column_mean_sd: sample_standard_deviation(&column_means),
            interaction_sd: sample_standard_deviation(&residuals),
        }
    }
}

/// Sorted shrunken estimates with the matching counts, the prior fit and the
/// variance diagnostics.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ShrinkageTable<R, C> {
    pub shrunken: ShrunkenMatrix<R, C>,
    pub counts: CountMatrix<R, C>,
    pub fit: FitResult,
    pub diagnostics: Diagnostics,
}

/// Aggregates outcome rows per (row, column) group, fits the Beta prior and
/// returns the shrunken cell estimates sorted by descending row and column
/// means.
pub fn shrinkage_table<R, C, I>(rows: I, options: &FitOptions) -> Result<ShrinkageTable<R, C>>
where
    R: Ord + Clone,
    C: Ord + Clone,
    I: IntoIterator<Item = OutcomeRow<R, C>>,
{
    Crosstab::from_rows(rows).shrinkage_table(options)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::optimizer::testing::StayPut;
    use crate::shrink::shrink;

    fn row(outcome: u8, r: &'static str, c: &'static str) -> OutcomeRow<&'static str, &'static str> {
        OutcomeRow::new(outcome == 1, r, c)
    }

    fn scenario() -> Vec<OutcomeRow<&'static str, &'static str>> {
        vec![
            row(1, "A", "X"),
            row(0, "A", "X"),
            row(1, "A", "Y"),
            row(0, "B", "X"),
            row(0, "B", "X"),
            row(0, "B", "Y"),
            row(1, "B", "Y"),
        ]
    }

    fn assert_non_increasing(values: &[f64]) {
        for pair in values.windows(2) {
            assert!(pair[0] >= pair[1] - 1e-12, "{:?}", values);
        }
    }

    #[test]
    fn test_aggregation() {
        let crosstab = Crosstab::from_rows(scenario());
        assert_eq!(crosstab.rows(), &["A", "B"]);
        assert_eq!(crosstab.columns(), &["X", "Y"]);
        assert_eq!(crosstab.n_observed_cells(), 4);
        let expected = [
            (("A", "X"), (1, 2)),
            (("A", "Y"), (1, 1)),
            (("B", "X"), (0, 2)),
            (("B", "Y"), (1, 2)),
        ];
        for ((r, c), (k, n)) in expected {
            assert_eq!(crosstab.cell(&r, &c), CrosstabCell { successes: k, trials: n });
        }
        let obs = crosstab.observations();
        let pairs: Vec<(u64, u64)> = obs.iter().map(|o| (o.successes(), o.trials())).collect();
        assert_eq!(pairs, vec![(1, 2), (1, 1), (0, 2), (1, 2)]);
    }

    #[test]
    fn test_end_to_end_scenario() {
        let table = shrinkage_table(scenario(), &FitOptions::default()).unwrap();
        let (a, b) = (table.fit.params.alpha, table.fit.params.beta);
        assert!(table.fit.params.is_valid());
        assert_eq!(table.fit.n_observations, 4);
        assert_eq!(table.shrunken.shape(), (2, 2));
        assert_eq!(table.counts.shape(), (2, 2));
        assert_eq!(table.counts.rows(), table.shrunken.rows());
        assert_eq!(table.counts.columns(), table.shrunken.columns());

        let ax = *table.shrunken.get_by_label(&"A", &"X").unwrap();
        assert!((ax - (a + 1.0) / (a + b + 2.0)).abs() < 1e-12);
        let ay = *table.shrunken.get_by_label(&"A", &"Y").unwrap();
        assert!((ay - (a + 1.0) / (a + b + 1.0)).abs() < 1e-12);
        let bx = *table.shrunken.get_by_label(&"B", &"X").unwrap();
        assert!((bx - a / (a + b + 2.0)).abs() < 1e-12);

        assert_eq!(table.counts.get_by_label(&"A", &"X"), Some(&2));
        assert_eq!(table.counts.get_by_label(&"A", &"Y"), Some(&1));
        assert_eq!(table.counts.get_by_label(&"B", &"X"), Some(&2));
        assert_eq!(table.counts.get_by_label(&"B", &"Y"), Some(&2));

        assert_non_increasing(&table.shrunken.row_means());
        assert_non_increasing(&table.shrunken.column_means());
    }

    #[test]
    fn test_scenario_order_with_fixed_prior() {
        let options = FitOptions::default().with_initial(2.0, 2.0);
        let table = Crosstab::from_rows(scenario())
            .shrinkage_table_with(&options, &StayPut)
            .unwrap();
        // row A dominates row B cell by cell, column Y dominates column X
        assert_eq!(table.shrunken.rows(), &["A", "B"]);
        assert_eq!(table.shrunken.columns(), &["Y", "X"]);
        assert_eq!(table.shrunken.row(0), &[3.0 / 5.0, 3.0 / 6.0]);
        assert_eq!(table.shrunken.row(1), &[3.0 / 6.0, 2.0 / 6.0]);
        assert_eq!(table.counts.row(0), &[1, 2]);
        assert_eq!(table.counts.row(1), &[2, 2]);
    }

    #[test]
    fn test_missing_cells_get_prior_mean() {
        let rows = vec![row(1, "A", "X"), row(0, "A", "X"), row(0, "B", "Y"), row(1, "B", "Y"), row(1, "B", "Y")];
        let table = shrinkage_table(rows, &FitOptions::default()).unwrap();
        let prior_mean = table.fit.prior_mean();
        assert_eq!(table.shrunken.shape(), (2, 2));
        assert_eq!(*table.shrunken.get_by_label(&"A", &"Y").unwrap(), prior_mean);
        assert_eq!(*table.shrunken.get_by_label(&"B", &"X").unwrap(), prior_mean);
        assert_eq!(table.counts.get_by_label(&"A", &"Y"), Some(&0));
        assert_eq!(table.counts.get_by_label(&"B", &"X"), Some(&0));
        // fill value and shrink of an empty cell are the same number
        let p = table.fit.params;
        assert_eq!(shrink(0, 0, p.alpha, p.beta), prior_mean);
        assert_eq!(table.fit.n_observations, 2);
    }

    #[test]
    fn test_empty_rows() {
        let rows: Vec<OutcomeRow<&str, &str>> = vec![];
        assert!(matches!(
            shrinkage_table(rows, &FitOptions::default()),
            Err(Error::EmptyInput)
        ));
    }

    #[test]
    fn test_sorted_order_on_larger_table() {
        let mut rows = Vec::new();
        for r in 0..6u32 {
            for c in 0..5u32 {
                let n = 3 + (r * 7 + c * 3) % 11;
                for t in 0..n {
                    let outcome = (t * (r + 1) + c * 2) % 7 < 3;
                    rows.push(OutcomeRow::new(outcome, r, c));
                }
            }
        }
        // drop one combination entirely
        rows.retain(|o| !(o.row == 2 && o.column == 4));
        let table = shrinkage_table(rows, &FitOptions::default()).unwrap();
        assert_eq!(table.shrunken.shape(), (6, 5));
        assert_non_increasing(&table.shrunken.row_means());
        assert_non_increasing(&table.shrunken.column_means());
        assert_eq!(table.counts.get_by_label(&2, &4), Some(&0));
        for (i, r) in table.shrunken.rows().iter().enumerate() {
            for (j, c) in table.shrunken.columns().iter().enumerate() {
                let n = *table.counts.get(i, j).unwrap();
                let expected: u64 = if (*r, *c) == (2, 4) {
                    0
                } else {
                    (3 + (*r * 7 + *c * 3) % 11) as u64
                };
                assert_eq!(n, expected);
            }
        }
    }

    #[test]
    fn test_ties_keep_label_order() {
        let mut rows = Vec::new();
        for r in ["P", "Q", "R"] {
            rows.push(row(1, r, "X"));
            rows.push(row(0, r, "X"));
        }
        rows.push(row(1, "Q", "Y"));
        rows.push(row(1, "Q", "Y"));
        rows.push(row(0, "P", "Y"));
        rows.push(row(0, "R", "Y"));
        let table = Crosstab::from_rows(rows)
            .shrinkage_table_with(&FitOptions::default(), &StayPut)
            .unwrap();
        // P and R are identical
        assert_eq!(table.shrunken.rows(), &["Q", "P", "R"]);
    }

    #[test]
    fn test_descending_order() {
        assert_eq!(descending_order(&[0.2, 0.5, 0.2, 0.9]), vec![3, 1, 0, 2]);
        assert!(descending_order(&[]).is_empty());
    }

    #[test]
    fn test_reindex_and_relabel() {
        let m = LabeledMatrix::new(vec!["a", "b"], vec![1, 2, 3], vec![vec![1u64, 2, 3], vec![4, 5, 6]]);
        let r = m.reindex(&[1, 0], &[2, 0, 1]);
        assert_eq!(r.rows(), &["b", "a"]);
        assert_eq!(r.columns(), &[3, 1, 2]);
        assert_eq!(r.row(0), &[6, 4, 5]);
        assert_eq!(r.row(1), &[3, 1, 2]);
        let relabeled = r.relabel(|s| s.to_uppercase(), |c| format!("c{}", c));
        assert_eq!(relabeled.rows(), &["B".to_string(), "A".to_string()]);
        assert_eq!(relabeled.columns()[0], "c3");
        assert_eq!(relabeled.get_by_label(&"A".to_string(), &"c1".to_string()), Some(&1));
        assert_eq!(relabeled.get(5, 0), None);
    }

    #[test]
    fn test_diagnostics_additive_matrix() {
        let m = LabeledMatrix::new(vec![0, 1], vec![0, 1], vec![vec![0.1, 0.2], vec![0.3, 0.4]]);
        let d = Diagnostics::from_matrix(&m);
        assert!((d.row_mean_sd.unwrap() - 0.2 / 2f64.sqrt()).abs() < 1e-12);
        assert!((d.column_mean_sd.unwrap() - 0.1 / 2f64.sqrt()).abs() < 1e-12);
        assert!(d.interaction_sd.unwrap().abs() < 1e-12);
    }

    #[test]
    fn test_diagnostics_interaction() {
        // pure interaction: row and column means are all equal
        let m = LabeledMatrix::new(vec![0, 1], vec![0, 1], vec![vec![0.6, 0.4], vec![0.4, 0.6]]);
        let d = Diagnostics::from_matrix(&m);
        assert!(d.row_mean_sd.unwrap().abs() < 1e-12);
        assert!(d.column_mean_sd.unwrap().abs() < 1e-12);
        // residuals are +-0.1, sample sd over four cells
        let expected = (4.0 * 0.01f64 / 3.0).sqrt();
        assert!((d.interaction_sd.unwrap() - expected).abs() < 1e-12);
    }

    #[test]
    fn test_diagnostics_single_row() {
        let m = LabeledMatrix::new(vec![0], vec![0, 1, 2], vec![vec![0.1, 0.2, 0.6]]);
        let d = Diagnostics::from_matrix(&m);
        assert_eq!(d.row_mean_sd, None);
        assert!(d.column_mean_sd.is_some());
    }
}
