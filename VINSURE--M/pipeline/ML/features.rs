use std::collections::BTreeSet;

use anyhow::{anyhow, bail, Context, Result};
use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::entity::{schema::BinaryColumn, RecordSet, SchemaRegistry};

/// Levels observed for a one-hot encoded column during fitting, sorted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OneHotColumn {
    /// Source column.
    pub name: String,
    /// All observed levels; the first one is dropped from the encoding.
    pub levels: Vec<String>,
}

impl OneHotColumn {
    /// Levels that get a dummy column.
    #[must_use]
    pub fn encoded_levels(&self) -> &[String] {
        self.levels.get(1..).unwrap_or_default()
    }
}

/// Turns a feature table (label already removed) into an all-numeric matrix.
///
/// Steps, in order: binary-map the binary column, drop identifier columns, replace each
/// categorical column by drop-first dummies appended after the numeric columns.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FeatureEngineer {
    binary: BinaryColumn,
    input_columns: Vec<String>,
    one_hot: Vec<OneHotColumn>,
    output_columns: Vec<String>,
}

impl FeatureEngineer {
    /// Learns category levels and the engineered column layout from the training features.
    pub fn fit(schema: &SchemaRegistry, features: &RecordSet) -> Result<Self> {
        let one_hot_names: Vec<&str> = schema.one_hot_columns().collect();
        let mut one_hot = Vec::with_capacity(one_hot_names.len());
        for name in &one_hot_names {
            let levels: BTreeSet<&str> = features.column(name)?.collect();
            one_hot.push(OneHotColumn {
                name: (*name).to_owned(),
                levels: levels.into_iter().map(str::to_owned).collect(),
            });
        }

        let mut output_columns: Vec<String> = features
            .columns()
            .iter()
            .filter(|column| {
                !schema.drop_columns.contains(*column) && !one_hot_names.contains(&column.as_str())
            })
            .cloned()
            .collect();
        for column in &one_hot {
            output_columns.extend(
                column
                    .encoded_levels()
                    .iter()
                    .map(|level| dummy_name(&column.name, level)),
            );
        }

        Ok(Self {
            binary: schema.binary_column.clone(),
            input_columns: features.columns().to_vec(),
            one_hot,
            output_columns,
        })
    }

    /// Engineered column names, in matrix order.
    #[must_use]
    pub fn columns(&self) -> &[String] {
        &self.output_columns
    }

    /// Encodes a feature table. Levels unseen during fitting encode as all zeros.
    pub fn transform(&self, features: &RecordSet) -> Result<Array2<f64>> {
        let missing: Vec<&str> = self
            .input_columns
            .iter()
            .filter(|column| !features.has_column(column))
            .map(String::as_str)
            .collect();
        if !missing.is_empty() {
            bail!("missing feature columns: {}", missing.join(", "));
        }

        let mut plan = Vec::with_capacity(self.output_columns.len());
        for column in &self.output_columns {
            plan.push(self.cell_source(features, column)?);
        }

        let mut matrix = Array2::<f64>::zeros((features.len(), plan.len()));
        for (row_idx, row) in features.rows().iter().enumerate() {
            for (col_idx, source) in plan.iter().enumerate() {
                matrix[[row_idx, col_idx]] = match source {
                    CellSource::Binary(idx) => self.encode_binary(&row[*idx]).with_context(|| {
                        format!("row {row_idx}, column `{}`", self.binary.name)
                    })?,
                    CellSource::Numeric(idx) => parse_number(&row[*idx]).with_context(|| {
                        format!("row {row_idx}, column `{}`", self.output_columns[col_idx])
                    })?,
                    CellSource::Dummy(idx, level) => f64::from(u8::from(row[*idx] == **level)),
                };
            }
        }
        Ok(matrix)
    }

    fn cell_source<'a>(&'a self, features: &RecordSet, output: &str) -> Result<CellSource<'a>> {
        let index_of = |name: &str| {
            features
                .column_index(name)
                .ok_or_else(|| anyhow!("column `{name}` not found"))
        };
        if output == self.binary.name {
            return Ok(CellSource::Binary(index_of(output)?));
        }
        for column in &self.one_hot {
            for level in column.encoded_levels() {
                if dummy_name(&column.name, level) == output {
                    return Ok(CellSource::Dummy(index_of(&column.name)?, level));
                }
            }
        }
        Ok(CellSource::Numeric(index_of(output)?))
    }

    fn encode_binary(&self, cell: &str) -> Result<f64> {
        let cell = cell.trim();
        if cell == self.binary.positive {
            Ok(1.0)
        } else if cell == self.binary.negative {
            Ok(0.0)
        } else {
            bail!(
                "expected `{}` or `{}`, got `{cell}`",
                self.binary.positive,
                self.binary.negative
            )
        }
    }
}

enum CellSource<'a> {
    Binary(usize),
    Numeric(usize),
    Dummy(usize, &'a String),
}

/// Dummy column name for a categorical level, e.g. `Vehicle_Age` + `< 1 Year` becomes
/// `Vehicle_Age_lt_1_Year`.
#[must_use]
pub fn dummy_name(column: &str, level: &str) -> String {
    format!("{column}_{level}")
        .replace('<', "lt")
        .replace('>', "gt")
        .replace(' ', "_")
}

/// Parses a numeric cell; integers and floats are both accepted.
pub fn parse_number(cell: &str) -> Result<f64> {
    let value: f64 = cell
        .trim()
        .parse()
        .with_context(|| format!("`{cell}` is not a number"))?;
    if !value.is_finite() {
        bail!("`{cell}` is not a finite number");
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::schema::tests::insurance_schema;

    fn table(rows: &[[&str; 11]]) -> RecordSet {
        let columns = [
            "id",
            "Gender",
            "Age",
            "Driving_License",
            "Region_Code",
            "Previously_Insured",
            "Vehicle_Age",
            "Vehicle_Damage",
            "Annual_Premium",
            "Policy_Sales_Channel",
            "Vintage",
        ];
        RecordSet::new(
            columns.iter().map(|c| (*c).to_owned()).collect(),
            rows.iter()
                .map(|row| row.iter().map(|c| (*c).to_owned()).collect())
                .collect(),
        )
        .unwrap()
    }

    fn train() -> RecordSet {
        table(&[
            ["1", "Male", "44", "1", "28.0", "0", "> 2 Years", "Yes", "40454.0", "26.0", "217"],
            ["2", "Female", "76", "1", "3.0", "0", "1-2 Year", "No", "33536.0", "26.0", "183"],
            ["3", "Male", "23", "1", "11.0", "1", "< 1 Year", "No", "2630.0", "152.0", "27"],
        ])
    }

    #[test]
    fn engineered_columns_follow_drop_first_dummies() {
        let engineer = FeatureEngineer::fit(&insurance_schema(), &train()).unwrap();
        assert_eq!(
            engineer.columns(),
            [
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
            ]
        );
    }

    #[test]
    fn encodes_rows_and_unseen_levels() {
        let engineer = FeatureEngineer::fit(&insurance_schema(), &train()).unwrap();
        let matrix = engineer.transform(&train()).unwrap();
        assert_eq!(matrix.dim(), (3, 11));
        assert_eq!(matrix.row(0).to_vec(), vec![
            1.0, 44.0, 1.0, 28.0, 0.0, 40454.0, 26.0, 217.0, 0.0, 1.0, 1.0
        ]);
        assert_eq!(matrix[[1, 0]], 0.0);
        assert_eq!(matrix[[2, 8]], 1.0);

        let unseen = table(&[[
            "9", "Female", "30", "1", "8.0", "1", "brand new", "No", "1000.0", "1.0", "10",
        ]]);
        let encoded = engineer.transform(&unseen).unwrap();
        assert_eq!(encoded[[0, 8]], 0.0);
        assert_eq!(encoded[[0, 9]], 0.0);
    }

    #[test]
    fn rejects_bad_cells() {
        let engineer = FeatureEngineer::fit(&insurance_schema(), &train()).unwrap();
        let bad_gender = table(&[[
            "9", "Other", "30", "1", "8.0", "1", "< 1 Year", "No", "1000.0", "1.0", "10",
        ]]);
        assert!(engineer.transform(&bad_gender).is_err());
        let bad_age = table(&[[
            "9", "Male", "thirty", "1", "8.0", "1", "< 1 Year", "No", "1000.0", "1.0", "10",
        ]]);
        let err = engineer.transform(&bad_age).unwrap_err();
        assert!(format!("{err:#}").contains("Age"));
    }

    #[test]
    fn canonicalises_dummy_names() {
        assert_eq!(dummy_name("Vehicle_Age", "< 1 Year"), "Vehicle_Age_lt_1_Year");
        assert_eq!(dummy_name("Vehicle_Age", "> 2 Years"), "Vehicle_Age_gt_2_Years");
    }
}
