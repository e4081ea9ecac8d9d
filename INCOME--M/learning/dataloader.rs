use std::{
    fs,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Cell value marking a missing entry in the UCI Adult files.
pub const MISSING_VALUE: &str = "?";

/// How a feature column is interpreted by the preprocessor.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ColumnKind {
    /// Parsed as `f64` and standardized.
    Numeric,
    /// Label-encoded against the training classes.
    Categorical,
}

/// Name and kind of a single feature column.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ColumnSpec {
    /// Column name.
    pub name: String,
    /// Column kind.
    pub kind: ColumnKind,
}

impl ColumnSpec {
    fn numeric(name: &str) -> Self {
        Self {
            name: name.into(),
            kind: ColumnKind::Numeric,
        }
    }

    fn categorical(name: &str) -> Self {
        Self {
            name: name.into(),
            kind: ColumnKind::Categorical,
        }
    }
}

/// Column layout of a labelled tabular file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TabularSchema {
    /// Feature columns in file order.
    pub features: Vec<ColumnSpec>,
    /// Label column name (last column of the file).
    pub label: String,
    /// Label value mapped to class 1.
    pub positive_label: String,
    /// Label value mapped to class 0.
    pub negative_label: String,
}

impl TabularSchema {
    /// UCI Adult census schema.
    #[must_use]
    pub fn adult() -> Self {
        Self {
            features: vec![
                ColumnSpec::numeric("age"),
                ColumnSpec::categorical("workclass"),
                ColumnSpec::numeric("fnlwgt"),
                ColumnSpec::categorical("education"),
                ColumnSpec::numeric("education-num"),
                ColumnSpec::categorical("marital-status"),
                ColumnSpec::categorical("occupation"),
                ColumnSpec::categorical("relationship"),
                ColumnSpec::categorical("race"),
                ColumnSpec::categorical("sex"),
                ColumnSpec::numeric("capital-gain"),
                ColumnSpec::numeric("capital-loss"),
                ColumnSpec::numeric("hours-per-week"),
                ColumnSpec::categorical("native-country"),
            ],
            label: "income".into(),
            positive_label: ">50K".into(),
            negative_label: "<=50K".into(),
        }
    }

    /// Column names in file order, label last.
    #[must_use]
    pub fn column_names(&self) -> Vec<String> {
        self.features
            .iter()
            .map(|column| column.name.clone())
            .chain(std::iter::once(self.label.clone()))
            .collect()
    }

    /// Names of the numeric feature columns.
    #[must_use]
    pub fn numeric_columns(&self) -> Vec<&str> {
        self.columns_of(ColumnKind::Numeric)
    }

    /// Names of the categorical feature columns.
    #[must_use]
    pub fn categorical_columns(&self) -> Vec<&str> {
        self.columns_of(ColumnKind::Categorical)
    }

    fn columns_of(&self, kind: ColumnKind) -> Vec<&str> {
        self.features
            .iter()
            .filter(|column| column.kind == kind)
            .map(|column| column.name.as_str())
            .collect()
    }
}

impl Default for TabularSchema {
    fn default() -> Self {
        Self::adult()
    }
}

/// Raw, untyped rows read from a comma-separated file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TabularDataset {
    /// Column names.
    pub columns: Vec<String>,
    /// Trimmed string cells, one vector per row.
    pub rows: Vec<Vec<String>>,
    /// File the rows were read from, if any.
    pub source: Option<PathBuf>,
}

impl TabularDataset {
    /// Builds a dataset from in-memory rows, which must match `columns` in width.
    pub fn from_rows(columns: Vec<String>, rows: Vec<Vec<String>>) -> Result<Self, DataLoaderError> {
        if let Some((row, cells)) = rows
            .iter()
            .enumerate()
            .find(|(_, cells)| cells.len() != columns.len())
        {
            return Err(DataLoaderError::RaggedRow {
                row,
                expected: columns.len(),
                found: cells.len(),
            });
        }
        Ok(Self {
            columns,
            rows,
            source: None,
        })
    }

    /// Number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the dataset has no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Position of a named column.
    #[must_use]
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|column| column == name)
    }

    /// Iterates the cells of a column, if it exists. Short rows yield `""`.
    pub fn column<'a>(&'a self, name: &str) -> Option<impl Iterator<Item = &'a str> + 'a> {
        let idx = self.column_index(name)?;
        Some(
            self.rows
                .iter()
                .map(move |row| row.get(idx).map_or("", String::as_str)),
        )
    }

    /// Returns a copy without rows holding [`MISSING_VALUE`] in any cell.
    #[must_use]
    pub fn without_missing(&self) -> Self {
        Self {
            columns: self.columns.clone(),
            rows: self
                .rows
                .iter()
                .filter(|row| row.iter().all(|cell| cell != MISSING_VALUE))
                .cloned()
                .collect(),
            source: self.source.clone(),
        }
    }
}

/// Options for [`read_table`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ReadOptions {
    /// Take column names from the first data line instead of the schema.
    pub has_header: bool,
}

/// Parses comma-separated text into a dataset.
///
/// Blank lines and lines starting with `|` are skipped; every other line
/// must carry exactly one cell per column.
pub fn parse_table(
    text: &str,
    schema: &TabularSchema,
    options: ReadOptions,
) -> Result<TabularDataset, DataLoaderError> {
    let mut columns = if options.has_header {
        Vec::new()
    } else {
        schema.column_names()
    };
    let mut rows = Vec::new();
    for (idx, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('|') {
            continue;
        }
        let cells: Vec<String> = line.split(',').map(|cell| cell.trim().to_string()).collect();
        if columns.is_empty() {
            columns = cells;
            continue;
        }
        if cells.len() != columns.len() {
            return Err(DataLoaderError::Malformed {
                line: idx + 1,
                expected: columns.len(),
                found: cells.len(),
            });
        }
        rows.push(cells);
    }
    if rows.is_empty() {
        return Err(DataLoaderError::Empty);
    }
    TabularDataset::from_rows(columns, rows)
}

/// Reads one comma-separated file.
pub fn read_table(
    path: impl AsRef<Path>,
    schema: &TabularSchema,
    options: ReadOptions,
) -> Result<TabularDataset, DataLoaderError> {
    let path = path.as_ref();
    let text = fs::read_to_string(path).map_err(|source| DataLoaderError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut dataset = parse_table(&text, schema, options).map_err(|err| err.in_file(path))?;
    dataset.source = Some(path.to_path_buf());
    Ok(dataset)
}

/// Reads the train and test splits.
pub fn load_data(
    train_path: impl AsRef<Path>,
    test_path: impl AsRef<Path>,
    schema: &TabularSchema,
    options: ReadOptions,
) -> Result<(TabularDataset, TabularDataset), DataLoaderError> {
    let train = read_table(train_path, schema, options)?;
    let test = read_table(test_path, schema, options)?;
    Ok((train, test))
}

/// Errors raised by the tabular loader.
#[derive(Debug, Error)]
pub enum DataLoaderError {
    /// File could not be read.
    #[error("reading {path:?}: {source}")]
    Io {
        /// Offending path.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },
    /// Row with the wrong number of cells.
    #[error("line {line}: expected {expected} cells, found {found}")]
    Malformed {
        /// 1-based line number.
        line: usize,
        /// Expected cell count.
        expected: usize,
        /// Actual cell count.
        found: usize,
    },
    /// In-memory row whose width differs from the column count.
    #[error("row {row}: expected {expected} cells, found {found}")]
    RaggedRow {
        /// 0-based row index.
        row: usize,
        /// Expected cell count.
        expected: usize,
        /// Actual cell count.
        found: usize,
    },
    /// No data rows.
    #[error("file contains no data rows")]
    Empty,
    /// Parse error attributed to a file.
    #[error("{path:?}: {inner}")]
    InFile {
        /// Offending path.
        path: PathBuf,
        /// Parse error.
        inner: Box<DataLoaderError>,
    },
}

impl DataLoaderError {
    fn in_file(self, path: &Path) -> Self {
        Self::InFile {
            path: path.to_path_buf(),
            inner: Box::new(self),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn tiny_schema() -> TabularSchema {
        TabularSchema {
            features: vec![ColumnSpec::numeric("age"), ColumnSpec::categorical("sex")],
            label: "income".into(),
            positive_label: ">50K".into(),
            negative_label: "<=50K".into(),
        }
    }

    #[test]
    fn parses_headerless_rows_and_skips_banner() {
        let text = "|1x3 Cross validator\n25, Male, <=50K.\n\n52, Female, >50K.\n";
        let dataset = parse_table(text, &tiny_schema(), ReadOptions::default()).unwrap();
        assert_eq!(dataset.columns, vec!["age", "sex", "income"]);
        assert_eq!(dataset.len(), 2);
        assert_eq!(dataset.rows[1], vec!["52", "Female", ">50K."]);
    }

    #[test]
    fn header_option_reads_column_names() {
        let text = "sex,age,income\nMale,30,<=50K\n";
        let options = ReadOptions { has_header: true };
        let dataset = parse_table(text, &tiny_schema(), options).unwrap();
        assert_eq!(dataset.column_index("age"), Some(1));
        assert_eq!(dataset.column("sex").unwrap().collect::<Vec<_>>(), vec!["Male"]);
    }

    #[test]
    fn ragged_row_is_malformed() {
        let text = "25, Male, <=50K\n40, Male\n";
        let err = parse_table(text, &tiny_schema(), ReadOptions::default()).unwrap_err();
        assert!(matches!(
            err,
            DataLoaderError::Malformed {
                line: 2,
                expected: 3,
                found: 2
            }
        ));
    }

    #[test]
    fn missing_file_is_io_error() {
        let dir = tempdir().unwrap();
        let err = load_data(
            dir.path().join("adult.data"),
            dir.path().join("adult.test"),
            &tiny_schema(),
            ReadOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, DataLoaderError::Io { .. }));
    }

    #[test]
    fn without_missing_drops_question_marks() {
        let text = "25, ?, <=50K\n40, Male, >50K\n";
        let dataset = parse_table(text, &tiny_schema(), ReadOptions::default()).unwrap();
        let cleaned = dataset.without_missing();
        assert_eq!(cleaned.len(), 1);
        assert_eq!(cleaned.rows[0][1], "Male");
    }

    #[test]
    fn in_memory_rows_must_match_column_count() {
        let columns = vec!["age".to_string(), "sex".to_string(), "income".to_string()];
        let rows = vec![
            vec!["25".to_string(), "Male".to_string(), "<=50K".to_string()],
            vec!["40".to_string()],
        ];
        let err = TabularDataset::from_rows(columns.clone(), rows).unwrap_err();
        assert!(matches!(
            err,
            DataLoaderError::RaggedRow {
                row: 1,
                expected: 3,
                found: 1
            }
        ));

        let mut dataset = TabularDataset::from_rows(columns, Vec::new()).unwrap();
        dataset.rows.push(vec!["33".to_string()]);
        let sexes: Vec<&str> = dataset.column("sex").unwrap().collect();
        assert_eq!(sexes, vec![""]);
    }

    #[test]
    fn adult_schema_has_fourteen_features() {
        let schema = TabularSchema::adult();
        assert_eq!(schema.features.len(), 14);
        assert_eq!(schema.numeric_columns().len(), 6);
        assert_eq!(schema.categorical_columns().len(), 8);
        assert_eq!(schema.column_names().last().unwrap(), "income");
    }
}
