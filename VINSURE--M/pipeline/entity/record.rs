use std::{fs, path::Path};

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};

/// Tabular data with ordered column names and string cells, as read from CSV.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RecordSet {
    columns: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl RecordSet {
    /// Builds a record set, rejecting rows whose width disagrees with the header.
    pub fn new(columns: Vec<String>, rows: Vec<Vec<String>>) -> Result<Self> {
        if let Some((idx, row)) = rows
            .iter()
            .enumerate()
            .find(|(_, row)| row.len() != columns.len())
        {
            bail!(
                "row {idx} has {} cells but the header has {} columns",
                row.len(),
                columns.len()
            );
        }
        Ok(Self { columns, rows })
    }

    /// Reads a CSV file with a header row.
    pub fn read_csv(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut reader = csv::Reader::from_path(path)
            .with_context(|| format!("opening csv {}", path.display()))?;
        let columns = reader
            .headers()
            .with_context(|| format!("reading header of {}", path.display()))?
            .iter()
            .map(str::to_owned)
            .collect::<Vec<_>>();
        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record.with_context(|| format!("reading row of {}", path.display()))?;
            rows.push(record.iter().map(str::to_owned).collect());
        }
        Self::new(columns, rows)
    }

    /// Writes the table as CSV with a header row, creating parent directories.
    pub fn write_csv(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let mut writer = csv::Writer::from_path(path)
            .with_context(|| format!("creating csv {}", path.display()))?;
        writer.write_record(&self.columns)?;
        for row in &self.rows {
            writer.write_record(row)?;
        }
        writer
            .flush()
            .with_context(|| format!("flushing csv {}", path.display()))?;
        Ok(())
    }

    /// Column names in order.
    #[must_use]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Data rows.
    #[must_use]
    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    /// Number of data rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// True when there are no data rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Number of columns.
    #[must_use]
    pub fn width(&self) -> usize {
        self.columns.len()
    }

    /// Position of a column, if present.
    #[must_use]
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|column| column == name)
    }

    /// True when the column is present.
    #[must_use]
    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    /// Iterates over one column's cells.
    pub fn column(&self, name: &str) -> Result<impl Iterator<Item = &str> + '_> {
        let idx = self
            .column_index(name)
            .ok_or_else(|| anyhow!("column `{name}` not found"))?;
        Ok(self.rows.iter().map(move |row| row[idx].as_str()))
    }

    /// Copies the given rows, in the given order, into a new table.
    #[must_use]
    pub fn select_rows(&self, indices: &[usize]) -> Self {
        Self {
            columns: self.columns.clone(),
            rows: indices.iter().map(|&idx| self.rows[idx].clone()).collect(),
        }
    }

    /// Splits one column off, returning the remaining table and the removed cells.
    pub fn take_column(&self, name: &str) -> Result<(Self, Vec<String>)> {
        let idx = self
            .column_index(name)
            .ok_or_else(|| anyhow!("column `{name}` not found"))?;
        let mut columns = self.columns.clone();
        columns.remove(idx);
        let mut taken = Vec::with_capacity(self.rows.len());
        let rows = self
            .rows
            .iter()
            .map(|row| {
                let mut row = row.clone();
                taken.push(row.remove(idx));
                row
            })
            .collect();
        Ok((Self { columns, rows }, taken))
    }
}

/// One applicant with the eleven engineered model inputs.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CustomerRecord {
    /// 1 for male, 0 for female.
    #[serde(rename = "Gender")]
    pub gender: i64,
    /// Age in years.
    #[serde(rename = "Age")]
    pub age: f64,
    /// 1 when the applicant holds a driving licence.
    #[serde(rename = "Driving_License")]
    pub driving_license: i64,
    /// Region code.
    #[serde(rename = "Region_Code")]
    pub region_code: f64,
    /// 1 when the applicant already has vehicle insurance.
    #[serde(rename = "Previously_Insured")]
    pub previously_insured: i64,
    /// Yearly premium.
    #[serde(rename = "Annual_Premium")]
    pub annual_premium: f64,
    /// Outreach channel code.
    #[serde(rename = "Policy_Sales_Channel")]
    pub policy_sales_channel: f64,
    /// Days associated with the company.
    #[serde(rename = "Vintage")]
    pub vintage: f64,
    /// 1 when the vehicle is less than a year old.
    #[serde(rename = "Vehicle_Age_lt_1_Year")]
    pub vehicle_age_lt_1_year: i64,
    /// 1 when the vehicle is more than two years old.
    #[serde(rename = "Vehicle_Age_gt_2_Years")]
    pub vehicle_age_gt_2_years: i64,
    /// 1 when the vehicle was damaged before.
    #[serde(rename = "Vehicle_Damage_Yes")]
    pub vehicle_damage_yes: i64,
}

impl CustomerRecord {
    /// Engineered column names, in the order [`CustomerRecord::values`] yields them.
    pub const COLUMNS: [&'static str; 11] = [
        "Gender",
        "Age",
        "Driving_License",
        "Region_Code",
        "Previously_Insured",
        "Annual_Premium",
        "Policy_Sales_Channel",
        "Vintage",
        "Vehicle_Age_lt_1_Year",
        "Vehicle_Age_gt_2_Years",
        "Vehicle_Damage_Yes",
    ];

    /// Field values keyed by engineered column name.
    #[allow(clippy::cast_precision_loss)]
    #[must_use]
    pub fn values(&self) -> [(&'static str, f64); 11] {
        let values = [
            self.gender as f64,
            self.age,
            self.driving_license as f64,
            self.region_code,
            self.previously_insured as f64,
            self.annual_premium,
            self.policy_sales_channel,
            self.vintage,
            self.vehicle_age_lt_1_year as f64,
            self.vehicle_age_gt_2_years as f64,
            self.vehicle_damage_yes as f64,
        ];
        std::array::from_fn(|idx| (Self::COLUMNS[idx], values[idx]))
    }
}
