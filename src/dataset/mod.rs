//! Immutable tabular dataset loaded once at process start
//!
//! The base dataset is shared behind an `Arc` and never mutated; sessions
//! hold their own snapshots and replace them wholesale.

use crate::error::{Error, Result};
use chrono::NaiveDate;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

pub mod plan;

/// Semantic type of a column, used for filter/aggregate dispatch and for the
/// schema description handed to the oracle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    Text,
    Categorical,
    Numeric,
    Timestamp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub ctype: ColumnType,
}

/// A single cell value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Text(String),
    Num(f64),
    Date(NaiveDate),
    Null,
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Text(s) => write!(f, "{s}"),
            Value::Num(n) => {
                if n.fract() == 0.0 && n.abs() < 1e15 {
                    write!(f, "{}", *n as i64)
                } else {
                    write!(f, "{n:.2}")
                }
            }
            Value::Date(d) => write!(f, "{d}"),
            Value::Null => write!(f, ""),
        }
    }
}

impl Value {
    pub fn as_num(&self) -> Option<f64> {
        match self {
            Value::Num(n) => Some(*n),
            _ => None,
        }
    }

    /// JSON rendering for the wire payload.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Text(s) => serde_json::Value::String(s.clone()),
            Value::Num(n) => serde_json::Number::from_f64(*n)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Date(d) => serde_json::Value::String(d.to_string()),
            Value::Null => serde_json::Value::Null,
        }
    }
}

/// An immutable in-memory relation: ordered columns plus row-major values.
#[derive(Debug, Clone)]
pub struct Table {
    columns: Vec<Column>,
    rows: Vec<Vec<Value>>,
}

impl Table {
    pub fn new(columns: Vec<Column>, rows: Vec<Vec<Value>>) -> Self {
        Self { columns, rows }
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// First `n` rows rendered as delimited text, header included. Fed to the
    /// oracle as a data preview.
    pub fn preview_text(&self, n: usize) -> String {
        let mut out = String::new();
        out.push_str(&self.column_names().join(" | "));
        out.push('\n');
        for row in self.rows.iter().take(n) {
            let cells: Vec<String> = row.iter().map(|v| v.to_string()).collect();
            out.push_str(&cells.join(" | "));
            out.push('\n');
        }
        out
    }

    /// Schema description with semantic notes: column names, types, and the
    /// distinct values of categorical columns in their exact casing.
    pub fn schema_description(&self) -> String {
        let mut out = String::from("Columns:\n");
        for (idx, col) in self.columns.iter().enumerate() {
            let type_name = match col.ctype {
                ColumnType::Text => "string",
                ColumnType::Categorical => "categorical",
                ColumnType::Numeric => "numeric",
                ColumnType::Timestamp => "date (YYYY-MM-DD)",
            };
            out.push_str(&format!("- {}: {}", col.name, type_name));
            if col.ctype == ColumnType::Categorical {
                let values = self.distinct_strings(idx, 12);
                if !values.is_empty() {
                    out.push_str(&format!(
                        " (values, exact casing: {})",
                        values
                            .iter()
                            .map(|v| format!("\"{v}\""))
                            .collect::<Vec<_>>()
                            .join(", ")
                    ));
                }
            }
            out.push('\n');
        }
        out
    }

    /// Up to `cap` distinct display values of one column, in first-seen order.
    fn distinct_strings(&self, col: usize, cap: usize) -> Vec<String> {
        let mut seen = Vec::new();
        for row in &self.rows {
            let s = row[col].to_string();
            if !seen.contains(&s) {
                seen.push(s);
                if seen.len() > cap {
                    // Too many to be worth enumerating.
                    return Vec::new();
                }
            }
        }
        seen
    }

    /// Deterministic bounded sample: keeps at most `n` rows chosen by a
    /// seeded RNG, preserving the original row order.
    pub fn sample(mut self, n: usize, seed: u64) -> Self {
        if self.rows.len() <= n {
            return self;
        }
        let mut rng = StdRng::seed_from_u64(seed);
        let mut indices: Vec<usize> =
            rand::seq::index::sample(&mut rng, self.rows.len(), n).into_vec();
        indices.sort_unstable();
        let mut picked = Vec::with_capacity(n);
        for idx in indices {
            picked.push(self.rows[idx].clone());
        }
        self.rows = picked;
        self
    }
}

/// The fixed transaction schema. Only these columns are loaded; extras in the
/// source file are ignored.
pub fn transaction_schema() -> Vec<Column> {
    let col = |name: &str, ctype| Column {
        name: name.to_string(),
        ctype,
    };
    vec![
        col("primary_merchant", ColumnType::Text),
        col("transaction_classification_0", ColumnType::Categorical),
        col("transaction_classification_1", ColumnType::Categorical),
        col("customer_id", ColumnType::Text),
        col("account_id", ColumnType::Text),
        col("date", ColumnType::Timestamp),
        col("amount", ColumnType::Numeric),
        col("credit_debit", ColumnType::Categorical),
    ]
}

/// Load the base dataset from CSV, applying the standard cleaning filters:
/// rows with an empty merchant and rows with a multi-category classification
/// (containing `|`) are dropped.
pub fn load_csv(path: &Path) -> Result<Table> {
    let mut reader = csv::Reader::from_path(path)?;
    let headers = reader.headers()?.clone();

    let schema = transaction_schema();
    // Map each schema column to its position in the file; missing columns are
    // skipped rather than treated as fatal.
    let mut columns = Vec::new();
    let mut positions = Vec::new();
    for col in schema {
        if let Some(pos) = headers.iter().position(|h| h == col.name) {
            positions.push(pos);
            columns.push(col);
        }
    }
    if columns.is_empty() {
        return Err(Error::Dataset(format!(
            "no known columns found in {}",
            path.display()
        )));
    }

    let merchant_idx = columns.iter().position(|c| c.name == "primary_merchant");
    let class_idx = columns
        .iter()
        .position(|c| c.name == "transaction_classification_0");

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let mut row = Vec::with_capacity(columns.len());
        for (col, &pos) in columns.iter().zip(&positions) {
            let raw = record.get(pos).unwrap_or("");
            row.push(parse_cell(raw, col.ctype));
        }
        if let Some(idx) = merchant_idx {
            if matches!(&row[idx], Value::Text(s) if s.is_empty()) || row[idx] == Value::Null {
                continue;
            }
        }
        if let Some(idx) = class_idx {
            if matches!(&row[idx], Value::Text(s) if s.contains('|')) {
                continue;
            }
        }
        rows.push(row);
    }

    Ok(Table::new(columns, rows))
}

fn parse_cell(raw: &str, ctype: ColumnType) -> Value {
    let raw = raw.trim();
    if raw.is_empty() {
        return if ctype == ColumnType::Text || ctype == ColumnType::Categorical {
            Value::Text(String::new())
        } else {
            Value::Null
        };
    }
    match ctype {
        ColumnType::Numeric => raw.parse::<f64>().map(Value::Num).unwrap_or(Value::Null),
        ColumnType::Timestamp => parse_date(raw).map(Value::Date).unwrap_or(Value::Null),
        ColumnType::Text | ColumnType::Categorical => Value::Text(raw.to_string()),
    }
}

/// Dates arrive either bare (`2025-01-31`) or with a time suffix; take the
/// day part.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let day = raw.split(|c| c == 'T' || c == ' ').next().unwrap_or(raw);
    NaiveDate::parse_from_str(day, "%Y-%m-%d").ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn fixture_csv() -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "primary_merchant,transaction_classification_0,customer_id,date,amount,credit_debit"
        )
        .unwrap();
        writeln!(file, "TESCO_GENERAL,Groceries,c1,2025-01-02,12.50,debit").unwrap();
        writeln!(file, "AMAZON_MARKETPLACE,Shopping,c2,2025-01-03,40.00,debit").unwrap();
        writeln!(file, ",Shopping,c3,2025-01-04,5.00,debit").unwrap();
        writeln!(file, "ACME,Shopping|Bills,c4,2025-01-05,9.99,debit").unwrap();
        writeln!(file, "EMPLOYER_LTD,Income,c1,2025-01-06,2000.00,credit").unwrap();
        file
    }

    #[test]
    fn load_applies_cleaning_filters() {
        let file = fixture_csv();
        let table = load_csv(file.path()).unwrap();
        // Empty merchant and multi-category rows dropped.
        assert_eq!(table.row_count(), 3);
        assert_eq!(table.column_index("transaction_classification_1"), None);
        assert!(table.column_index("amount").is_some());
    }

    #[test]
    fn sampling_is_deterministic_and_bounded() {
        let file = fixture_csv();
        let a = load_csv(file.path()).unwrap().sample(2, 7);
        let b = load_csv(file.path()).unwrap().sample(2, 7);
        assert_eq!(a.row_count(), 2);
        let render = |t: &Table| t.preview_text(10);
        assert_eq!(render(&a), render(&b));
    }

    #[test]
    fn schema_description_lists_categorical_values() {
        let file = fixture_csv();
        let table = load_csv(file.path()).unwrap();
        let desc = table.schema_description();
        assert!(desc.contains("credit_debit: categorical"));
        assert!(desc.contains("\"debit\""));
        assert!(desc.contains("\"credit\""));
    }

    #[test]
    fn preview_includes_header_and_rows() {
        let file = fixture_csv();
        let table = load_csv(file.path()).unwrap();
        let preview = table.preview_text(2);
        assert!(preview.starts_with("primary_merchant | "));
        assert_eq!(preview.lines().count(), 3);
    }
}
