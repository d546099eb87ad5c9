//! Data ingestion
//!
//! Loads delimited files into polars `DataFrame`s with inferred column types
//! and converts between request payloads (JSON row objects) and tables.

use crate::error::{DeployError, Result};
use polars::prelude::*;
use serde_json::{Map, Value};
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info};

/// Capability: read a dataset into an in-memory table
pub trait TableSource: Send + Sync {
    /// Load the table stored at `path`
    fn load_table(&self, path: &Path) -> Result<DataFrame>;
}

/// Delimited text reader backed by the polars CSV reader
#[derive(Debug, Clone)]
pub struct CsvTableSource {
    /// Field separator; `None` picks from the file extension
    delimiter: Option<u8>,
    /// Whether the first line carries column names
    has_header: bool,
    /// Rows scanned for type inference
    infer_schema_length: usize,
}

impl Default for CsvTableSource {
    fn default() -> Self {
        Self::new()
    }
}

impl CsvTableSource {
    pub fn new() -> Self {
        Self {
            delimiter: None,
            has_header: true,
            infer_schema_length: 1000,
        }
    }

    /// Set the field separator
    pub fn with_delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = Some(delimiter);
        self
    }

    /// Set whether the file has a header row
    pub fn with_has_header(mut self, has_header: bool) -> Self {
        self.has_header = has_header;
        self
    }

    /// Set the number of rows used for type inference
    pub fn with_infer_schema_length(mut self, rows: usize) -> Self {
        self.infer_schema_length = rows;
        self
    }

    fn delimiter_for(&self, path: &Path) -> u8 {
        if let Some(d) = self.delimiter {
            return d;
        }
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("tsv") => b'\t',
            _ => b',',
        }
    }
}

impl TableSource for CsvTableSource {
    fn load_table(&self, path: &Path) -> Result<DataFrame> {
        let start = Instant::now();
        if !path.exists() {
            return Err(DeployError::DataError(format!(
                "Input file not found: {}",
                path.display()
            )));
        }

        let parse_opts = CsvParseOptions::default().with_separator(self.delimiter_for(path));
        let df = CsvReadOptions::default()
            .with_has_header(self.has_header)
            .with_infer_schema_length(Some(self.infer_schema_length))
            .with_parse_options(parse_opts)
            .try_into_reader_with_file_path(Some(path.to_path_buf()))?
            .finish()?;

        let df = narrow_integers(df)?;
        info!(
            path = %path.display(),
            rows = df.height(),
            columns = df.width(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Loaded table"
        );
        Ok(df)
    }
}

/// Downcast `Int64` columns whose values all fit in 32 bits to `Int32`.
///
/// Type inference in the CSV reader always yields 64-bit integers; the served
/// schema distinguishes `integer` from `long`, so narrow what fits.
pub fn narrow_integers(mut df: DataFrame) -> Result<DataFrame> {
    let names: Vec<String> = df.get_column_names().iter().map(|s| s.to_string()).collect();
    for name in names {
        let narrowed = {
            let col = df.column(&name)?;
            if col.dtype() != &DataType::Int64 {
                continue;
            }
            let ca = col.i64()?;
            let fits = match (ca.min(), ca.max()) {
                (Some(lo), Some(hi)) => lo >= i32::MIN as i64 && hi <= i32::MAX as i64,
                _ => true,
            };
            if !fits {
                continue;
            }
            col.cast(&DataType::Int32)?
        };
        debug!(column = %name, "Narrowed integer column to Int32");
        df.with_column(narrowed)?;
    }
    Ok(df)
}

/// Return a copy of `df` without the named columns
pub fn drop_columns(df: &DataFrame, columns: &[&str]) -> Result<DataFrame> {
    let mut out = df.clone();
    for &name in columns {
        if out.column(name).is_err() {
            return Err(DeployError::FeatureNotFound(name.to_string()));
        }
        out = out.drop(name)?;
    }
    Ok(out)
}

/// First `n_rows` rows of `df` with the target column removed.
///
/// This is the representative request table used for schema generation and
/// for smoke-scoring a freshly persisted pipeline.
pub fn sample_input(df: &DataFrame, target: &str, n_rows: usize) -> Result<DataFrame> {
    drop_columns(&df.head(Some(n_rows)), &[target])
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum ValueKind {
    Null,
    Int,
    Float,
    Bool,
    Str,
}

impl ValueKind {
    fn of(value: &Value, column: &str) -> Result<Self> {
        match value {
            Value::Null => Ok(ValueKind::Null),
            Value::Bool(_) => Ok(ValueKind::Bool),
            Value::Number(n) if n.is_i64() || n.is_u64() => Ok(ValueKind::Int),
            Value::Number(_) => Ok(ValueKind::Float),
            Value::String(_) => Ok(ValueKind::Str),
            Value::Array(_) | Value::Object(_) => Err(DeployError::InvalidInput(format!(
                "Column '{}' has a nested value; only scalars are accepted",
                column
            ))),
        }
    }

    fn merge(self, other: ValueKind, column: &str) -> Result<ValueKind> {
        use ValueKind::*;
        match (self, other) {
            (a, b) if a == b => Ok(a),
            (Null, b) => Ok(b),
            (a, Null) => Ok(a),
            (Int, Float) | (Float, Int) => Ok(Float),
            (a, b) => Err(DeployError::InvalidInput(format!(
                "Column '{}' mixes {:?} and {:?} values",
                column, a, b
            ))),
        }
    }
}

/// Build a table from JSON row objects (field name -> value).
///
/// Column order follows first appearance across rows; fields missing from a
/// row become nulls.
pub fn rows_to_frame(rows: &[Value]) -> Result<DataFrame> {
    let mut order: Vec<String> = Vec::new();
    let mut objects: Vec<&Map<String, Value>> = Vec::with_capacity(rows.len());

    for (i, row) in rows.iter().enumerate() {
        let obj = row.as_object().ok_or_else(|| {
            DeployError::InvalidInput(format!("Row {} is not a JSON object", i))
        })?;
        for key in obj.keys() {
            if !order.iter().any(|k| k == key) {
                order.push(key.clone());
            }
        }
        objects.push(obj);
    }

    let mut columns: Vec<Column> = Vec::with_capacity(order.len());
    for name in &order {
        let values: Vec<&Value> = objects
            .iter()
            .map(|obj| obj.get(name).unwrap_or(&Value::Null))
            .collect();

        let mut kind = ValueKind::Null;
        for v in &values {
            kind = kind.merge(ValueKind::of(v, name)?, name)?;
        }

        let column = match kind {
            ValueKind::Int => {
                let data: Vec<Option<i64>> = values.iter().map(|v| v.as_i64()).collect();
                Column::new(name.as_str().into(), data)
            }
            ValueKind::Float | ValueKind::Null => {
                let data: Vec<Option<f64>> = values.iter().map(|v| v.as_f64()).collect();
                Column::new(name.as_str().into(), data)
            }
            ValueKind::Bool => {
                let data: Vec<Option<bool>> = values.iter().map(|v| v.as_bool()).collect();
                Column::new(name.as_str().into(), data)
            }
            ValueKind::Str => {
                let data: Vec<Option<String>> = values
                    .iter()
                    .map(|v| v.as_str().map(str::to_string))
                    .collect();
                Column::new(name.as_str().into(), data)
            }
        };
        columns.push(column);
    }

    if columns.is_empty() {
        return Ok(DataFrame::empty());
    }
    narrow_integers(DataFrame::new(columns)?)
}

/// Render every row of `df` as a JSON object
pub fn frame_to_rows(df: &DataFrame) -> Result<Vec<Value>> {
    let mut rows = Vec::with_capacity(df.height());
    for i in 0..df.height() {
        let mut obj = Map::new();
        for col in df.get_columns() {
            obj.insert(col.name().to_string(), any_value_to_json(col.get(i)?));
        }
        rows.push(Value::Object(obj));
    }
    Ok(rows)
}

fn any_value_to_json(value: AnyValue) -> Value {
    match value {
        AnyValue::Null => Value::Null,
        AnyValue::Boolean(v) => Value::Bool(v),
        AnyValue::Float64(v) => serde_json::json!(v),
        AnyValue::Float32(v) => serde_json::json!(v),
        AnyValue::Int64(v) => serde_json::json!(v),
        AnyValue::Int32(v) => serde_json::json!(v),
        AnyValue::UInt64(v) => serde_json::json!(v),
        AnyValue::UInt32(v) => serde_json::json!(v),
        AnyValue::String(v) => Value::String(v.to_string()),
        AnyValue::StringOwned(v) => Value::String(v.to_string()),
        other => Value::String(other.to_string()),
    }
}
