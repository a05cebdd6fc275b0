use std::{fs, path::Path};

use anyhow::{ensure, Context, Result};
use serde::{Deserialize, Serialize};

/// Declared column with its storage type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ColumnSpec {
    /// Column name as it appears in the CSV header.
    pub name: String,
    /// Informational dtype (`int`, `float`, `category`).
    pub dtype: String,
}

/// Binary categorical column encoded straight to {0,1}.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct BinaryColumn {
    /// Column name.
    pub name: String,
    /// Level encoded as 1.
    pub positive: String,
    /// Level encoded as 0.
    pub negative: String,
}

/// Declarative table contract: expected columns and their roles.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct SchemaRegistry {
    /// Label column.
    pub target_column: String,
    /// Every expected column, in source order.
    pub columns: Vec<ColumnSpec>,
    /// Columns that must be present and numeric.
    pub numerical_columns: Vec<String>,
    /// Columns that must be present and categorical.
    pub categorical_columns: Vec<String>,
    /// Columns standard-scaled after feature engineering.
    pub num_features: Vec<String>,
    /// Columns min-max scaled after feature engineering.
    pub mm_columns: Vec<String>,
    /// Identifier columns removed before encoding.
    pub drop_columns: Vec<String>,
    /// Categorical column mapped directly to {0,1} instead of one-hot expanded.
    pub binary_column: BinaryColumn,
}

impl SchemaRegistry {
    /// Loads the schema from a TOML document.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading schema {}", path.display()))?;
        Self::from_toml(&raw).with_context(|| format!("parsing schema {}", path.display()))
    }

    /// Parses the schema from TOML text.
    pub fn from_toml(raw: &str) -> Result<Self> {
        let schema: Self = toml::from_str(raw)?;
        schema.check()?;
        Ok(schema)
    }

    /// Number of columns a conforming table must have.
    #[must_use]
    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// Declared column names in order.
    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|column| column.name.as_str())
    }

    /// Categorical columns that get one-hot expanded (everything but the binary column).
    pub fn one_hot_columns(&self) -> impl Iterator<Item = &str> {
        self.categorical_columns
            .iter()
            .map(String::as_str)
            .filter(|name| *name != self.binary_column.name)
    }

    fn check(&self) -> Result<()> {
        ensure!(!self.columns.is_empty(), "schema declares no columns");
        let declared: Vec<&str> = self.column_names().collect();
        let roles = self
            .numerical_columns
            .iter()
            .chain(&self.categorical_columns)
            .chain(&self.drop_columns)
            .chain(std::iter::once(&self.target_column))
            .chain(std::iter::once(&self.binary_column.name));
        for name in roles {
            ensure!(
                declared.contains(&name.as_str()),
                "column `{name}` is referenced but not declared in `columns`"
            );
        }
        ensure!(
            self.categorical_columns.contains(&self.binary_column.name),
            "binary column `{}` must be categorical",
            self.binary_column.name
        );
        Ok(())
    }
}
