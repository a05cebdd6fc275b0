use anyhow::{anyhow, Result};
use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};

use crate::{
    entity::{CustomerRecord, RecordSet, SchemaRegistry},
    ml::{features::FeatureEngineer, scaling::ColumnTransformer},
};

/// Feature engineering followed by column scaling, fitted once on the training partition and
/// persisted next to the classifier.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Preprocessor {
    engineer: FeatureEngineer,
    columns: ColumnTransformer,
}

impl Preprocessor {
    /// Fits category levels and scaler parameters on training features (label removed).
    pub fn fit(schema: &SchemaRegistry, features: &RecordSet) -> Result<Self> {
        let engineer = FeatureEngineer::fit(schema, features)?;
        let engineered = engineer.transform(features)?;
        let columns = ColumnTransformer::fit(
            engineer.columns(),
            &schema.num_features,
            &schema.mm_columns,
            engineered.view(),
        )?;
        Ok(Self { engineer, columns })
    }

    /// Encodes and scales a raw feature table without refitting.
    pub fn transform(&self, features: &RecordSet) -> Result<Array2<f64>> {
        let engineered = self.engineer.transform(features)?;
        self.columns.transform(engineered.view())
    }

    /// Scales an already engineered matrix (columns in [`FeatureEngineer::columns`] order).
    pub fn transform_engineered(&self, engineered: ArrayView2<'_, f64>) -> Result<Array2<f64>> {
        self.columns.transform(engineered)
    }

    /// Lays out a single applicant in engineered column order and scales it.
    pub fn transform_record(&self, record: &CustomerRecord) -> Result<Array2<f64>> {
        let values = record.values();
        let row = self
            .engineer
            .columns()
            .iter()
            .map(|column| {
                values
                    .iter()
                    .find(|(name, _)| *name == column.as_str())
                    .map(|(_, value)| *value)
                    .ok_or_else(|| anyhow!("model expects column `{column}` the record lacks"))
            })
            .collect::<Result<Vec<f64>>>()?;
        let engineered = Array2::from_shape_vec((1, row.len()), row)?;
        self.transform_engineered(engineered.view())
    }

    /// Columns of the scaled matrix fed to the classifier.
    #[must_use]
    pub fn output_columns(&self) -> Vec<String> {
        self.columns.output_columns()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{entity::schema::tests::insurance_schema, fixtures};

    #[test]
    fn test_transform_leaves_fitted_parameters_untouched() {
        let schema = insurance_schema();
        let table = fixtures::insurance_table(200, 11);
        let (features, _) = table.take_column("Response").unwrap();
        let train = features.select_rows(&(0..150).collect::<Vec<_>>());
        let test = features.select_rows(&(150..200).collect::<Vec<_>>());

        let preprocessor = Preprocessor::fit(&schema, &train).unwrap();
        let before = serde_json::to_value(&preprocessor).unwrap();
        let out = preprocessor.transform(&test).unwrap();
        assert_eq!(out.dim(), (50, 11));
        assert_eq!(serde_json::to_value(&preprocessor).unwrap(), before);
        assert_eq!(
            &preprocessor.output_columns()[..3],
            ["Age", "Vintage", "Annual_Premium"]
        );
    }

    #[test]
    fn record_matches_table_encoding() {
        let schema = insurance_schema();
        let table = fixtures::insurance_table(120, 5);
        let (features, _) = table.take_column("Response").unwrap();
        let preprocessor = Preprocessor::fit(&schema, &features).unwrap();

        let first = features.select_rows(&[0]);
        let from_table = preprocessor.transform(&first).unwrap();
        let record = fixtures::customer_record(&first);
        let from_record = preprocessor.transform_record(&record).unwrap();
        for (a, b) in from_table.iter().zip(from_record.iter()) {
            assert!((a - b).abs() < 1e-9);
        }
    }
}
