//! Typed values exchanged with instrument variables.
//!
//! Every variable in a device tree declares a [`ValueKind`]; all reads and
//! writes go through [`Value`], which carries the runtime representation.
//! Values know how to parse themselves from command-line text, how to render
//! themselves for display, and how to persist themselves to disk.

use std::fmt;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{RigError, RigResult};

// =============================================================================
// Value kinds
// =============================================================================

/// The declared type of a variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    /// Signed integer.
    Int,
    /// 64-bit floating point.
    Float,
    /// Boolean flag.
    Bool,
    /// UTF-8 text.
    Str,
    /// Raw byte string.
    Bytes,
    /// One-dimensional array of floats.
    Array,
    /// Column-labelled table of floats.
    Table,
}

impl ValueKind {
    /// Lowercase name used in configuration files and console output.
    pub const fn as_str(self) -> &'static str {
        match self {
            ValueKind::Int => "int",
            ValueKind::Float => "float",
            ValueKind::Bool => "bool",
            ValueKind::Str => "str",
            ValueKind::Bytes => "bytes",
            ValueKind::Array => "array",
            ValueKind::Table => "table",
        }
    }

    /// True for scalar numerical kinds (int and float).
    pub const fn is_numerical(self) -> bool {
        matches!(self, ValueKind::Int | ValueKind::Float)
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Tables
// =============================================================================

/// A small in-memory table of floats with named columns.
///
/// Rows are validated against the column count on insertion, so a `Table`
/// handed to a variable is always rectangular.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Vec<f64>>,
}

impl Table {
    /// Creates an empty table with the given column names.
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    /// Creates a table from column names and pre-built rows.
    pub fn from_rows(columns: Vec<String>, rows: Vec<Vec<f64>>) -> RigResult<Self> {
        let mut table = Self::new(columns);
        for row in rows {
            table.push_row(row)?;
        }
        Ok(table)
    }

    /// Appends a row, enforcing the column count.
    pub fn push_row(&mut self, row: Vec<f64>) -> RigResult<()> {
        if row.len() != self.columns.len() {
            return Err(RigError::TableShape {
                expected: self.columns.len(),
                actual: row.len(),
            });
        }
        self.rows.push(row);
        Ok(())
    }

    /// Column names, in order.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Data rows, in insertion order.
    pub fn rows(&self) -> &[Vec<f64>] {
        &self.rows
    }

    /// Number of data rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// True when the table holds no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Parses a table from CSV text with a header row.
    pub fn from_csv_str(text: &str) -> RigResult<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_reader(text.as_bytes());
        let columns = reader
            .headers()?
            .iter()
            .map(|h| h.to_string())
            .collect::<Vec<_>>();
        let mut table = Self::new(columns);
        for record in reader.records() {
            let record = record?;
            let mut row = Vec::with_capacity(record.len());
            for field in record.iter() {
                row.push(field.parse::<f64>().map_err(|_| RigError::ValueParse {
                    kind: ValueKind::Table,
                    input: field.to_string(),
                })?);
            }
            table.push_row(row)?;
        }
        Ok(table)
    }

    /// Renders the table as CSV text with a header row.
    pub fn to_csv_string(&self) -> RigResult<String> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer.write_record(&self.columns)?;
        for row in &self.rows {
            writer.write_record(row.iter().map(|v| v.to_string()))?;
        }
        let bytes = writer
            .into_inner()
            .map_err(|e| RigError::Csv(e.into_error().into()))?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_csv_string() {
            Ok(text) => f.write_str(text.trim_end()),
            Err(_) => Err(fmt::Error),
        }
    }
}

// =============================================================================
// Values
// =============================================================================

/// A runtime value read from or written to a variable.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    /// Signed integer.
    Int(i64),
    /// 64-bit floating point.
    Float(f64),
    /// Boolean flag.
    Bool(bool),
    /// UTF-8 text.
    Str(String),
    /// Raw byte string.
    Bytes(Vec<u8>),
    /// One-dimensional array of floats.
    Array(Vec<f64>),
    /// Column-labelled table of floats.
    Table(Table),
}

impl Value {
    /// The kind this value belongs to.
    pub const fn kind(&self) -> ValueKind {
        match self {
            Value::Int(_) => ValueKind::Int,
            Value::Float(_) => ValueKind::Float,
            Value::Bool(_) => ValueKind::Bool,
            Value::Str(_) => ValueKind::Str,
            Value::Bytes(_) => ValueKind::Bytes,
            Value::Array(_) => ValueKind::Array,
            Value::Table(_) => ValueKind::Table,
        }
    }

    /// Parses console text into a value of the requested kind.
    ///
    /// Booleans accept `true`/`false`, `1`/`0` and `on`/`off` in any case.
    /// Arrays accept comma or whitespace separated floats, with optional
    /// surrounding brackets. Tables expect CSV text with a header row.
    pub fn parse(kind: ValueKind, text: &str) -> RigResult<Self> {
        let parse_err = || RigError::ValueParse {
            kind,
            input: text.to_string(),
        };
        match kind {
            ValueKind::Int => text
                .trim()
                .parse::<i64>()
                .map(Value::Int)
                .map_err(|_| parse_err()),
            ValueKind::Float => text
                .trim()
                .parse::<f64>()
                .map(Value::Float)
                .map_err(|_| parse_err()),
            ValueKind::Bool => match text.trim().to_ascii_lowercase().as_str() {
                "true" | "1" | "on" => Ok(Value::Bool(true)),
                "false" | "0" | "off" => Ok(Value::Bool(false)),
                _ => Err(parse_err()),
            },
            ValueKind::Str => Ok(Value::Str(text.to_string())),
            ValueKind::Bytes => Ok(Value::Bytes(text.as_bytes().to_vec())),
            ValueKind::Array => parse_float_list(text)
                .map(Value::Array)
                .ok_or_else(parse_err),
            ValueKind::Table => Table::from_csv_str(text).map(Value::Table),
        }
    }

    /// Guesses the kind of free-form text, used when storing user variables.
    ///
    /// Tries int, then float, then bool, then a bracketed array; anything
    /// else stays text.
    pub fn infer(text: &str) -> Self {
        let trimmed = text.trim();
        if let Ok(value) = trimmed.parse::<i64>() {
            return Value::Int(value);
        }
        if let Ok(value) = trimmed.parse::<f64>() {
            return Value::Float(value);
        }
        if trimmed.eq_ignore_ascii_case("true") {
            return Value::Bool(true);
        }
        if trimmed.eq_ignore_ascii_case("false") {
            return Value::Bool(false);
        }
        if trimmed.starts_with('[') && trimmed.ends_with(']') {
            if let Some(values) = parse_float_list(trimmed) {
                return Value::Array(values);
            }
        }
        Value::Str(text.to_string())
    }

    /// Adjusts this value to the declared kind of a variable.
    ///
    /// The only coercion is int to float; any other mismatch returns `None`.
    pub fn coerce(self, kind: ValueKind) -> Option<Self> {
        if self.kind() == kind {
            return Some(self);
        }
        match (self, kind) {
            (Value::Int(value), ValueKind::Float) => Some(Value::Float(value as f64)),
            _ => None,
        }
    }

    /// Scalar numerical view of this value, if it has one.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(value) => Some(*value as f64),
            Value::Float(value) => Some(*value),
            _ => None,
        }
    }

    /// Boolean view of this value, if it is one.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(value) => Some(*value),
            _ => None,
        }
    }

    /// Writes the value to `path` using the natural format for its kind.
    ///
    /// Scalars are written as display text, byte strings raw, arrays as one
    /// float per line and tables as CSV with a header row.
    pub fn write_to(&self, path: &Path) -> RigResult<()> {
        match self {
            Value::Int(_) | Value::Float(_) | Value::Bool(_) | Value::Str(_) => {
                fs::write(path, self.to_string())?;
            }
            Value::Bytes(bytes) => {
                fs::write(path, bytes)?;
            }
            Value::Array(values) => {
                let mut text = String::new();
                for value in values {
                    text.push_str(&value.to_string());
                    text.push('\n');
                }
                fs::write(path, text)?;
            }
            Value::Table(table) => {
                let mut writer = csv::Writer::from_path(path)?;
                writer.write_record(table.columns())?;
                for row in table.rows() {
                    writer.write_record(row.iter().map(|v| v.to_string()))?;
                }
                writer.flush()?;
            }
        }
        Ok(())
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(value) => write!(f, "{value}"),
            Value::Float(value) => write!(f, "{value}"),
            Value::Bool(value) => write!(f, "{value}"),
            Value::Str(value) => f.write_str(value),
            Value::Bytes(bytes) => f.write_str(&String::from_utf8_lossy(bytes)),
            Value::Array(values) => {
                f.write_str("[")?;
                for (i, value) in values.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{value}")?;
                }
                f.write_str("]")
            }
            Value::Table(table) => table.fmt(f),
        }
    }
}

/// Parses a list of floats separated by commas or whitespace, with optional
/// surrounding brackets. Returns `None` on the first non-numeric token.
fn parse_float_list(text: &str) -> Option<Vec<f64>> {
    let inner = text.trim();
    let inner = inner.strip_prefix('[').unwrap_or(inner);
    let inner = inner.strip_suffix(']').unwrap_or(inner);
    let mut values = Vec::new();
    for token in inner.split(|c: char| c == ',' || c.is_whitespace()) {
        if token.is_empty() {
            continue;
        }
        values.push(token.parse::<f64>().ok()?);
    }
    Some(values)
}
