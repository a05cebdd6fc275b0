use anyhow::{anyhow, ensure, Result};
use ndarray::{Array2, ArrayView1, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

/// Centers columns on their mean and divides by the population standard deviation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StandardScaler {
    mean: Vec<f64>,
    scale: Vec<f64>,
}

impl StandardScaler {
    /// Fits one mean/scale pair per column. Constant columns get scale 1.
    #[must_use]
    pub fn fit(data: ArrayView2<'_, f64>) -> Self {
        let (mean, scale) = data
            .axis_iter(Axis(1))
            .map(|column| {
                let mean = column.mean().unwrap_or(0.0);
                let std = column.std(0.0);
                (mean, if std > 0.0 { std } else { 1.0 })
            })
            .unzip();
        Self { mean, scale }
    }

    /// Applies `(x - mean) / scale` to one value of column `idx`.
    #[must_use]
    pub fn apply(&self, idx: usize, value: f64) -> f64 {
        (value - self.mean[idx]) / self.scale[idx]
    }

    /// Fitted means.
    #[must_use]
    pub fn mean(&self) -> &[f64] {
        &self.mean
    }

    /// Fitted scales.
    #[must_use]
    pub fn scale(&self) -> &[f64] {
        &self.scale
    }
}

/// Maps columns onto [0, 1] using the fitted minimum and range.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MinMaxScaler {
    min: Vec<f64>,
    range: Vec<f64>,
}

impl MinMaxScaler {
    /// Fits one min/range pair per column. Constant columns get range 1.
    #[must_use]
    pub fn fit(data: ArrayView2<'_, f64>) -> Self {
        let (min, range) = data
            .axis_iter(Axis(1))
            .map(|column| {
                let (lo, hi) = bounds(column);
                let range = hi - lo;
                (lo, if range > 0.0 { range } else { 1.0 })
            })
            .unzip();
        Self { min, range }
    }

    /// Applies `(x - min) / range` to one value of column `idx`.
    #[must_use]
    pub fn apply(&self, idx: usize, value: f64) -> f64 {
        (value - self.min[idx]) / self.range[idx]
    }

    /// Fitted minimums.
    #[must_use]
    pub fn min(&self) -> &[f64] {
        &self.min
    }
}

fn bounds(column: ArrayView1<'_, f64>) -> (f64, f64) {
    if column.is_empty() {
        return (0.0, 0.0);
    }
    column
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        })
}

/// Scales selected columns and passes the rest through.
///
/// Output order: standard-scaled columns, then min-max scaled columns, then the remainder in
/// input order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ColumnTransformer {
    input_columns: Vec<String>,
    standard_idx: Vec<usize>,
    standard: StandardScaler,
    minmax_idx: Vec<usize>,
    minmax: MinMaxScaler,
    passthrough_idx: Vec<usize>,
}

impl ColumnTransformer {
    /// Fits both scalers on the given matrix whose columns are named by `columns`.
    pub fn fit(
        columns: &[String],
        standard_columns: &[String],
        minmax_columns: &[String],
        data: ArrayView2<'_, f64>,
    ) -> Result<Self> {
        ensure!(
            columns.len() == data.ncols(),
            "{} column names for a matrix with {} columns",
            columns.len(),
            data.ncols()
        );
        let locate = |names: &[String]| -> Result<Vec<usize>> {
            names
                .iter()
                .map(|name| {
                    columns
                        .iter()
                        .position(|column| column == name)
                        .ok_or_else(|| anyhow!("scaled column `{name}` not found"))
                })
                .collect()
        };
        let standard_idx = locate(standard_columns)?;
        let minmax_idx = locate(minmax_columns)?;
        let passthrough_idx = (0..columns.len())
            .filter(|idx| !standard_idx.contains(idx) && !minmax_idx.contains(idx))
            .collect();
        Ok(Self {
            input_columns: columns.to_vec(),
            standard: StandardScaler::fit(data.select(Axis(1), &standard_idx).view()),
            minmax: MinMaxScaler::fit(data.select(Axis(1), &minmax_idx).view()),
            standard_idx,
            minmax_idx,
            passthrough_idx,
        })
    }

    /// Column names of the transformed matrix.
    #[must_use]
    pub fn output_columns(&self) -> Vec<String> {
        self.standard_idx
            .iter()
            .chain(&self.minmax_idx)
            .chain(&self.passthrough_idx)
            .map(|&idx| self.input_columns[idx].clone())
            .collect()
    }

    /// Number of input (and output) columns.
    #[must_use]
    pub fn width(&self) -> usize {
        self.input_columns.len()
    }

    /// Scales and reorders a matrix with the fitted parameters.
    pub fn transform(&self, data: ArrayView2<'_, f64>) -> Result<Array2<f64>> {
        ensure!(
            data.ncols() == self.width(),
            "expected {} feature columns, got {}",
            self.width(),
            data.ncols()
        );
        let mut out = Array2::<f64>::zeros(data.dim());
        for (row_in, mut row_out) in data.outer_iter().zip(out.outer_iter_mut()) {
            let mut col = 0;
            for (pos, &idx) in self.standard_idx.iter().enumerate() {
                row_out[col] = self.standard.apply(pos, row_in[idx]);
                col += 1;
            }
            for (pos, &idx) in self.minmax_idx.iter().enumerate() {
                row_out[col] = self.minmax.apply(pos, row_in[idx]);
                col += 1;
            }
            for &idx in &self.passthrough_idx {
                row_out[col] = row_in[idx];
                col += 1;
            }
        }
        Ok(out)
    }
}
