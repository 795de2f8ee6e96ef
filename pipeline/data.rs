//! # Clinical Data Loading and Validation
//!
//! The exclusive entry point for user-provided data. Reads a tabular file
//! (TSV or CSV), validates it against the fixed clinical schema, and
//! converts it into the `ndarray` structures the rest of the pipeline
//! consumes.
//!
//! - Strict schema: column names are not configurable. The loader enforces
//!   the nine predictor columns plus the `cvd` label, which eliminates a
//!   class of configuration errors.
//! - User-centric errors: failures are assumed to be user-input errors and
//!   `DataError` is written to give actionable feedback.
//! - Identifier columns (`patient_id`) are recognized and dropped before any
//!   matrix is built; they never reach the model.

use ndarray::{Array1, Array2, ShapeBuilder};
use polars::prelude::*;
use std::collections::HashSet;
use std::fs::File;
use std::path::Path;
use thiserror::Error;

/// Canonical predictor order. Every matrix in the pipeline uses this column
/// order, and every report refers to features by these names.
pub const FEATURE_NAMES: [&str; 9] = [
    "htn", "trt", "smk", "dm", "gender", "age", "bmi", "tc", "sbp",
];

/// The binary outcome column.
pub const LABEL_NAME: &str = "cvd";

/// Columns that identify rather than describe a subject. Dropped at load.
const IDENTIFIER_COLUMNS: [&str; 2] = ["patient_id", "id"];

/// A container for validated clinical data ready for the pipeline.
#[derive(Debug, Clone)]
pub struct ClinicalData {
    /// Feature matrix, shape `[n_subjects, FEATURE_NAMES.len()]`,
    /// columns in `FEATURE_NAMES` order.
    pub x: Array2<f64>,
    /// Binary label vector (`1.0` = CVD present).
    pub y: Array1<f64>,
}

impl ClinicalData {
    pub fn num_records(&self) -> usize {
        self.y.len()
    }

    pub fn num_features(&self) -> usize {
        self.x.ncols()
    }
}

/// A comprehensive error type for all data loading and validation failures.
#[derive(Error, Debug)]
pub enum DataError {
    #[error("Error from the underlying Polars DataFrame library: {0}")]
    PolarsError(#[from] PolarsError),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error(
        "The required column '{0}' was not found in the input file. Please check spelling and case."
    )]
    ColumnNotFound(String),
    #[error(
        "The required column '{column_name}' could not be converted to the expected type '{expected_type}'. It contains non-numeric data. (Found type: {found_type})"
    )]
    ColumnWrongType {
        column_name: String,
        expected_type: &'static str,
        found_type: String,
    },
    #[error(
        "Missing or null values were found in the required column '{0}'. This tool requires complete data with no missing values."
    )]
    MissingValuesFound(String),
    #[error(
        "Non-finite values (NaN or Infinity) were found in the required column '{0}'. This tool requires all data to be finite."
    )]
    NonFiniteValuesFound(String),
    #[error(
        "Input file contains only {found} data rows, but at least {required} are required for a train/test split with class balancing."
    )]
    InsufficientRows { found: usize, required: usize },
    #[error(
        "The label column '{column}' must be binary (0/1), but value {value} was found at row {row}."
    )]
    LabelNotBinary {
        column: String,
        value: f64,
        row: usize,
    },
}

const MINIMUM_ROWS: usize = 20;

/// Loads and validates the clinical dataset.
///
/// The separator is inferred from the file extension: `.csv` is read as
/// comma-separated, anything else as tab-separated.
pub fn load_clinical_data(path: &str) -> Result<ClinicalData, DataError> {
    log::info!("Loading data from '{path}'");

    let separator = if Path::new(path)
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"))
    {
        b','
    } else {
        b'\t'
    };

    let mut df = CsvReader::new(File::open(Path::new(path))?)
        .with_options(
            CsvReadOptions::default()
                .with_has_header(true)
                .with_parse_options(CsvParseOptions::default().with_separator(separator)),
        )
        .finish()?;

    if df.height() < MINIMUM_ROWS {
        return Err(DataError::InsufficientRows {
            found: df.height(),
            required: MINIMUM_ROWS,
        });
    }

    let columns_set: HashSet<String> = df
        .get_column_names()
        .into_iter()
        .map(|s| s.to_string())
        .collect();

    for col_name in FEATURE_NAMES.iter().chain(std::iter::once(&LABEL_NAME)) {
        if !columns_set.contains(*col_name) {
            return Err(DataError::ColumnNotFound(col_name.to_string()));
        }
    }

    for id_col in IDENTIFIER_COLUMNS {
        if columns_set.contains(id_col) {
            log::info!("Dropping identifier column '{id_col}'");
        }
    }

    // Project down to exactly the schema columns. Identifier columns and any
    // extras fall away here.
    let mut projection: Vec<&str> = FEATURE_NAMES.to_vec();
    projection.push(LABEL_NAME);
    df = df.select(projection)?;

    let n = df.height();

    // Column-major buffer, reshaped in Fortran order so each extracted
    // column lands contiguously.
    let mut x_buffer = Vec::with_capacity(n * FEATURE_NAMES.len());
    for feature in FEATURE_NAMES {
        let mut column = extract_numeric_column(&df, feature)?;
        x_buffer.append(&mut column);
    }
    let x = Array2::from_shape_vec((n, FEATURE_NAMES.len()).f(), x_buffer)
        .expect("feature columns have consistent lengths");

    let y_vec = extract_numeric_column(&df, LABEL_NAME)?;
    for (row, &value) in y_vec.iter().enumerate() {
        if value != 0.0 && value != 1.0 {
            return Err(DataError::LabelNotBinary {
                column: LABEL_NAME.to_string(),
                value,
                row: row + 1,
            });
        }
    }
    let y = Array1::from_vec(y_vec);

    log::info!(
        "Data validation successful: {} records, {} features, all columns numeric and complete.",
        n,
        FEATURE_NAMES.len()
    );

    Ok(ClinicalData { x, y })
}

fn extract_numeric_column(df: &DataFrame, column_name: &str) -> Result<Vec<f64>, DataError> {
    let series = df.column(column_name)?;
    if series.null_count() > 0 {
        return Err(DataError::MissingValuesFound(column_name.to_string()));
    }

    let casted = match series.cast(&DataType::Float64) {
        Ok(casted) => casted,
        Err(_) => {
            return Err(DataError::ColumnWrongType {
                column_name: column_name.to_string(),
                expected_type: "f64 (numeric)",
                found_type: format!("{:?}", series.dtype()),
            });
        }
    };

    if casted.null_count() > 0 {
        return Err(DataError::ColumnWrongType {
            column_name: column_name.to_string(),
            expected_type: "f64 (numeric)",
            found_type: format!("{:?}", series.dtype()),
        });
    }

    let chunked = casted.f64()?.rechunk();
    let values: Vec<f64> = chunked.into_no_null_iter().collect();
    if values.iter().any(|&v| !v.is_finite()) {
        return Err(DataError::NonFiniteValuesFound(column_name.to_string()));
    }
    Ok(values)
}

// --- Unit Tests ---
#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use std::io::{self, Write};
    use tempfile::NamedTempFile;

    fn create_test_tsv(content: &str) -> io::Result<NamedTempFile> {
        let mut file = NamedTempFile::new()?;
        writeln!(file, "{}", content)?;
        file.flush()?;
        Ok(file)
    }

    fn header() -> String {
        let mut cols = FEATURE_NAMES.to_vec();
        cols.push(LABEL_NAME);
        cols.join("\t")
    }

    fn row(sbp: f64, label: u8) -> String {
        format!("1\t0\t1\t0\t1\t54\t27.5\t5.2\t{sbp}\t{label}")
    }

    fn generate_content(num_rows: usize) -> String {
        let mut lines = vec![header()];
        for i in 0..num_rows {
            lines.push(row(110.0 + i as f64, (i % 2) as u8));
        }
        lines.join("\n")
    }

    #[test]
    fn loads_valid_table() {
        let file = create_test_tsv(&generate_content(30)).unwrap();
        let data = load_clinical_data(file.path().to_str().unwrap()).unwrap();

        assert_eq!(data.num_records(), 30);
        assert_eq!(data.num_features(), 9);
        assert_abs_diff_eq!(data.x[[0, 8]], 110.0, epsilon = 1e-12);
        assert_abs_diff_eq!(data.x[[29, 8]], 139.0, epsilon = 1e-12);
        assert_abs_diff_eq!(data.y[0], 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(data.y[1], 1.0, epsilon = 1e-12);
    }

    #[test]
    fn drops_identifier_column() {
        let mut lines = vec![format!("patient_id\t{}", header())];
        for i in 0..25 {
            lines.push(format!("P{:04}\t{}", i, row(120.0, (i % 2) as u8)));
        }
        let file = create_test_tsv(&lines.join("\n")).unwrap();
        let data = load_clinical_data(file.path().to_str().unwrap()).unwrap();
        assert_eq!(data.num_features(), 9);
    }

    #[test]
    fn rejects_missing_column() {
        let content = generate_content(30);
        let truncated = content.replace("sbp", "pressure");
        let file = create_test_tsv(&truncated).unwrap();
        let err = load_clinical_data(file.path().to_str().unwrap()).unwrap_err();
        match err {
            DataError::ColumnNotFound(col) => assert_eq!(col, "sbp"),
            other => panic!("Expected ColumnNotFound(sbp), got {:?}", other),
        }
    }

    #[test]
    fn rejects_non_numeric_values() {
        let mut lines = vec![header()];
        for i in 0..25 {
            lines.push(row(120.0, (i % 2) as u8));
        }
        lines.push("1\t0\t1\t0\t1\tnot_a_number\t27.5\t5.2\t120\t0".to_string());
        let file = create_test_tsv(&lines.join("\n")).unwrap();
        let err = load_clinical_data(file.path().to_str().unwrap()).unwrap_err();
        match err {
            DataError::ColumnWrongType { column_name, .. } => assert_eq!(column_name, "age"),
            other => panic!("Expected ColumnWrongType(age), got {:?}", other),
        }
    }

    #[test]
    fn rejects_missing_values() {
        let mut lines = vec![header()];
        for i in 0..25 {
            lines.push(row(120.0, (i % 2) as u8));
        }
        lines.push("1\t0\t1\t0\t1\t\t27.5\t5.2\t120\t0".to_string());
        let file = create_test_tsv(&lines.join("\n")).unwrap();
        let err = load_clinical_data(file.path().to_str().unwrap()).unwrap_err();
        match err {
            DataError::MissingValuesFound(col) => assert_eq!(col, "age"),
            other => panic!("Expected MissingValuesFound(age), got {:?}", other),
        }
    }

    #[test]
    fn rejects_non_finite_values() {
        let mut lines = vec![header()];
        for i in 0..25 {
            lines.push(row(120.0, (i % 2) as u8));
        }
        lines.push("1\t0\t1\t0\t1\t54\tNaN\t5.2\t120\t0".to_string());
        let file = create_test_tsv(&lines.join("\n")).unwrap();
        let err = load_clinical_data(file.path().to_str().unwrap()).unwrap_err();
        match err {
            DataError::NonFiniteValuesFound(col) => assert_eq!(col, "bmi"),
            other => panic!("Expected NonFiniteValuesFound(bmi), got {:?}", other),
        }
    }

    #[test]
    fn rejects_non_binary_label() {
        let mut lines = vec![header()];
        for i in 0..25 {
            lines.push(row(120.0, (i % 2) as u8));
        }
        lines.push("1\t0\t1\t0\t1\t54\t27.5\t5.2\t120\t2".to_string());
        let file = create_test_tsv(&lines.join("\n")).unwrap();
        let err = load_clinical_data(file.path().to_str().unwrap()).unwrap_err();
        match err {
            DataError::LabelNotBinary { value, .. } => assert_abs_diff_eq!(value, 2.0),
            other => panic!("Expected LabelNotBinary, got {:?}", other),
        }
    }

    #[test]
    fn rejects_insufficient_rows() {
        let file = create_test_tsv(&generate_content(5)).unwrap();
        let err = load_clinical_data(file.path().to_str().unwrap()).unwrap_err();
        match err {
            DataError::InsufficientRows { found, required } => {
                assert_eq!(found, 5);
                assert_eq!(required, 20);
            }
            other => panic!("Expected InsufficientRows, got {:?}", other),
        }
    }
}
