use std::borrow::Cow;

use indexmap::IndexMap;
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::dataloader::{ColumnKind, TabularDataset, TabularSchema};

/// Code produced for categorical values never seen during fitting.
pub const UNSEEN_CATEGORY_CODE: f64 = -1.0;

/// Per-column standardization fitted on training data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    /// Columns the scaler was fitted on, in feature order.
    pub columns: Vec<String>,
    /// Column means.
    pub means: Vec<f64>,
    /// Column population standard deviations (1.0 for constant columns).
    pub scales: Vec<f64>,
}

impl StandardScaler {
    /// Fits means and scales; `values[i]` holds every value of `columns[i]`.
    #[must_use]
    pub fn fit(columns: Vec<String>, values: &[Vec<f64>]) -> Self {
        let mut means = Vec::with_capacity(values.len());
        let mut scales = Vec::with_capacity(values.len());
        for column in values {
            if column.is_empty() {
                means.push(0.0);
                scales.push(1.0);
                continue;
            }
            let n = column.len() as f64;
            let mean = column.iter().sum::<f64>() / n;
            let variance = column.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
            let std = variance.sqrt();
            means.push(mean);
            scales.push(if std > f64::EPSILON { std } else { 1.0 });
        }
        Self {
            columns,
            means,
            scales,
        }
    }

    /// Scales a single value of the column at `idx`.
    #[must_use]
    pub fn transform_value(&self, idx: usize, value: f64) -> f64 {
        (value - self.means[idx]) / self.scales[idx]
    }

    /// Position of a fitted column.
    #[must_use]
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|column| column == name)
    }
}

/// Label encoder for one categorical column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryEncoder {
    /// Sorted distinct training values; a value encodes to its index.
    pub classes: Vec<String>,
}

impl CategoryEncoder {
    /// Fits the encoder on the training values.
    pub fn fit<'a>(values: impl IntoIterator<Item = &'a str>) -> Self {
        let mut classes: Vec<String> = values.into_iter().map(str::to_string).collect();
        classes.sort();
        classes.dedup();
        Self { classes }
    }

    /// Encodes a value, mapping unseen values to [`UNSEEN_CATEGORY_CODE`].
    #[must_use]
    pub fn encode(&self, value: &str) -> f64 {
        self.classes
            .binary_search_by(|class| class.as_str().cmp(value))
            .map_or(UNSEEN_CATEGORY_CODE, |idx| idx as f64)
    }

    /// Reverses [`Self::encode`] for known codes.
    #[must_use]
    pub fn decode(&self, code: f64) -> Option<&str> {
        if code < 0.0 || code.fract() != 0.0 {
            return None;
        }
        self.classes.get(code as usize).map(String::as_str)
    }
}

/// Encoders keyed by categorical column, in feature order.
pub type Encoders = IndexMap<String, CategoryEncoder>;

/// Options controlling [`preprocess_data`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PreprocessOptions {
    /// Drop rows holding `?` in any cell before fitting.
    pub drop_missing: bool,
}

impl Default for PreprocessOptions {
    fn default() -> Self {
        Self { drop_missing: true }
    }
}

/// Fitted transforms plus the schema they apply to.
#[derive(Debug, Clone, PartialEq)]
pub struct FittedPreprocessor {
    schema: TabularSchema,
    scaler: StandardScaler,
    encoders: Encoders,
}

impl FittedPreprocessor {
    /// Fits scaler and encoders on the training split only.
    pub fn fit(train: &TabularDataset, schema: &TabularSchema) -> Result<Self, PreprocessError> {
        if train.is_empty() {
            return Err(PreprocessError::EmptyDataset { split: "train" });
        }
        ensure_columns(train, schema, "train")?;

        let numeric = schema.numeric_columns();
        let mut numeric_values = Vec::with_capacity(numeric.len());
        for name in &numeric {
            numeric_values.push(parse_numeric_column(train, name)?);
        }
        let scaler = StandardScaler::fit(
            numeric.iter().map(|name| (*name).to_string()).collect(),
            &numeric_values,
        );

        let mut encoders = Encoders::new();
        for name in schema.categorical_columns() {
            let cells = train
                .column(name)
                .ok_or_else(|| PreprocessError::missing(name, "train"))?;
            encoders.insert(name.to_string(), CategoryEncoder::fit(cells));
        }

        Ok(Self {
            schema: schema.clone(),
            scaler,
            encoders,
        })
    }

    /// Rebuilds a preprocessor from persisted transforms.
    pub fn from_parts(
        schema: TabularSchema,
        scaler: StandardScaler,
        encoders: Encoders,
    ) -> Result<Self, PreprocessError> {
        let numeric: Vec<String> = schema
            .numeric_columns()
            .into_iter()
            .map(str::to_string)
            .collect();
        if scaler.columns != numeric {
            return Err(PreprocessError::SchemaMismatch(format!(
                "scaler columns {:?} do not match numeric columns {numeric:?}",
                scaler.columns
            )));
        }
        if scaler.means.len() != numeric.len() || scaler.scales.len() != numeric.len() {
            return Err(PreprocessError::SchemaMismatch(format!(
                "scaler holds {} means and {} scales for {} columns",
                scaler.means.len(),
                scaler.scales.len(),
                numeric.len()
            )));
        }
        for name in schema.categorical_columns() {
            if !encoders.contains_key(name) {
                return Err(PreprocessError::SchemaMismatch(format!(
                    "no encoder for categorical column {name}"
                )));
            }
        }
        Ok(Self {
            schema,
            scaler,
            encoders,
        })
    }

    /// Applies the fitted transforms, producing features and 0/1 labels.
    pub fn transform(
        &self,
        dataset: &TabularDataset,
        split: &'static str,
    ) -> Result<(Array2<f64>, Array1<f64>), PreprocessError> {
        ensure_columns(dataset, &self.schema, split)?;
        let width = self.schema.features.len();
        let positions: Vec<usize> = self
            .schema
            .features
            .iter()
            .filter_map(|column| dataset.column_index(&column.name))
            .collect();
        let label_idx = dataset
            .column_index(&self.schema.label)
            .ok_or_else(|| PreprocessError::missing(&self.schema.label, split))?;

        let mut features = Vec::with_capacity(dataset.len() * width);
        let mut labels = Vec::with_capacity(dataset.len());
        for (row_idx, row) in dataset.rows.iter().enumerate() {
            if row.len() != dataset.columns.len() {
                return Err(PreprocessError::RaggedRow {
                    row: row_idx,
                    expected: dataset.columns.len(),
                    found: row.len(),
                });
            }
            for (column, &pos) in self.schema.features.iter().zip(&positions) {
                let cell = row[pos].as_str();
                let value = match column.kind {
                    ColumnKind::Numeric => {
                        let raw = parse_number(cell, &column.name, row_idx)?;
                        let idx = self
                            .scaler
                            .column_index(&column.name)
                            .ok_or_else(|| PreprocessError::missing(&column.name, "scaler"))?;
                        self.scaler.transform_value(idx, raw)
                    }
                    ColumnKind::Categorical => self
                        .encoders
                        .get(&column.name)
                        .ok_or_else(|| PreprocessError::missing(&column.name, "encoders"))?
                        .encode(cell),
                };
                features.push(value);
            }
            labels.push(self.encode_label(&row[label_idx], row_idx)?);
        }

        let matrix = Array2::from_shape_vec((dataset.len(), width), features)
            .map_err(|err| PreprocessError::SchemaMismatch(err.to_string()))?;
        Ok((matrix, Array1::from(labels)))
    }

    fn encode_label(&self, value: &str, row: usize) -> Result<f64, PreprocessError> {
        let normalized = value.trim().trim_end_matches('.');
        if normalized == self.schema.positive_label {
            Ok(1.0)
        } else if normalized == self.schema.negative_label {
            Ok(0.0)
        } else {
            Err(PreprocessError::UnknownLabel {
                row,
                value: value.to_string(),
            })
        }
    }

    /// Feature names in matrix column order.
    #[must_use]
    pub fn feature_names(&self) -> Vec<String> {
        self.schema
            .features
            .iter()
            .map(|column| column.name.clone())
            .collect()
    }

    /// Fitted scaler.
    #[must_use]
    pub const fn scaler(&self) -> &StandardScaler {
        &self.scaler
    }

    /// Fitted encoders.
    #[must_use]
    pub const fn encoders(&self) -> &Encoders {
        &self.encoders
    }

    /// Schema the transforms apply to.
    #[must_use]
    pub const fn schema(&self) -> &TabularSchema {
        &self.schema
    }
}

/// Output of [`preprocess_data`].
#[derive(Debug, Clone)]
pub struct PreprocessedData {
    /// Training features.
    pub x_train: Array2<f64>,
    /// Test features.
    pub x_test: Array2<f64>,
    /// Training labels.
    pub y_train: Array1<f64>,
    /// Test labels.
    pub y_test: Array1<f64>,
    /// Scaler fitted on the training numeric columns.
    pub scaler: StandardScaler,
    /// Encoders fitted on the training categorical columns.
    pub encoders: Encoders,
    /// Feature names in matrix column order.
    pub feature_names: Vec<String>,
}

/// Fits transforms on `train` and applies them to both splits.
pub fn preprocess_data(
    train: &TabularDataset,
    test: &TabularDataset,
    schema: &TabularSchema,
    options: PreprocessOptions,
) -> Result<PreprocessedData, PreprocessError> {
    let (train, test) = if options.drop_missing {
        (
            Cow::Owned(train.without_missing()),
            Cow::Owned(test.without_missing()),
        )
    } else {
        (Cow::Borrowed(train), Cow::Borrowed(test))
    };
    if test.is_empty() {
        return Err(PreprocessError::EmptyDataset { split: "test" });
    }

    let fitted = FittedPreprocessor::fit(&train, schema)?;
    let (x_train, y_train) = fitted.transform(&train, "train")?;
    let (x_test, y_test) = fitted.transform(&test, "test")?;
    let feature_names = fitted.feature_names();
    Ok(PreprocessedData {
        x_train,
        x_test,
        y_train,
        y_test,
        scaler: fitted.scaler,
        encoders: fitted.encoders,
        feature_names,
    })
}

fn ensure_columns(
    dataset: &TabularDataset,
    schema: &TabularSchema,
    split: &'static str,
) -> Result<(), PreprocessError> {
    for name in schema.column_names() {
        if dataset.column_index(&name).is_none() {
            return Err(PreprocessError::MissingColumn {
                column: name,
                split,
            });
        }
    }
    Ok(())
}

fn parse_numeric_column(dataset: &TabularDataset, name: &str) -> Result<Vec<f64>, PreprocessError> {
    let cells = dataset
        .column(name)
        .ok_or_else(|| PreprocessError::missing(name, "train"))?;
    cells
        .enumerate()
        .map(|(row, cell)| parse_number(cell, name, row))
        .collect()
}

fn parse_number(cell: &str, column: &str, row: usize) -> Result<f64, PreprocessError> {
    cell.parse::<f64>()
        .ok()
        .filter(|value| value.is_finite())
        .ok_or_else(|| PreprocessError::InvalidNumber {
            column: column.to_string(),
            row,
            value: cell.to_string(),
        })
}

/// Errors raised while fitting or applying transforms.
#[derive(Debug, Error)]
pub enum PreprocessError {
    /// Expected column absent from a split.
    #[error("column `{column}` missing from {split}")]
    MissingColumn {
        /// Column name.
        column: String,
        /// Split or component that lacked it.
        split: &'static str,
    },
    /// Numeric cell that does not parse.
    #[error("column `{column}` row {row}: `{value}` is not a number")]
    InvalidNumber {
        /// Column name.
        column: String,
        /// 0-based row index.
        row: usize,
        /// Raw cell.
        value: String,
    },
    /// Label outside the two known classes.
    #[error("row {row}: unknown label `{value}`")]
    UnknownLabel {
        /// 0-based row index.
        row: usize,
        /// Raw label cell.
        value: String,
    },
    /// Split left without rows.
    #[error("{split} split has no rows")]
    EmptyDataset {
        /// Split name.
        split: &'static str,
    },
    /// Row whose width differs from the column count.
    #[error("row {row}: expected {expected} cells, found {found}")]
    RaggedRow {
        /// 0-based row index.
        row: usize,
        /// Expected cell count.
        expected: usize,
        /// Actual cell count.
        found: usize,
    },
    /// Persisted transforms disagree with the schema.
    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),
}

impl PreprocessError {
    fn missing(column: &str, split: &'static str) -> Self {
        Self::MissingColumn {
            column: column.to_string(),
            split,
        }
    }
}
