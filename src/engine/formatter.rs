//! Wire-shape formatting of execution outcomes

use crate::dataset::plan::PlanOutcome;
use crate::dataset::Value;
use serde_json::Map;

/// A table payload row: column name to JSON value, in column order
/// (serde_json is built with `preserve_order`).
pub type PayloadRow = Map<String, serde_json::Value>;

/// Normalize an outcome into a bounded table payload. Tables keep their
/// column order; keyed series become two-column (Category, Value) rows;
/// scalars and text produce no payload, the prose carries the answer.
pub fn format_table(outcome: &PlanOutcome, row_cap: usize) -> Option<Vec<PayloadRow>> {
    match outcome {
        PlanOutcome::Table(table) => {
            let names = table.column_names();
            let rows = table
                .rows()
                .iter()
                .take(row_cap)
                .map(|row| {
                    names
                        .iter()
                        .zip(row)
                        .map(|(name, value)| (name.to_string(), value.to_json()))
                        .collect()
                })
                .collect();
            Some(rows)
        }
        PlanOutcome::Series(entries) => {
            let rows = entries
                .iter()
                .take(row_cap)
                .map(|(key, value)| {
                    let mut row = Map::new();
                    row.insert("Category".to_string(), serde_json::Value::String(key.clone()));
                    row.insert("Value".to_string(), Value::Num(*value).to_json());
                    row
                })
                .collect();
            Some(rows)
        }
        PlanOutcome::Scalar(_) | PlanOutcome::Text(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{Column, ColumnType, Table};

    fn wide_table(rows: usize) -> Table {
        let columns = vec![
            Column {
                name: "zeta".into(),
                ctype: ColumnType::Text,
            },
            Column {
                name: "alpha".into(),
                ctype: ColumnType::Numeric,
            },
        ];
        let data = (0..rows)
            .map(|i| vec![Value::Text(format!("r{i}")), Value::Num(i as f64)])
            .collect();
        Table::new(columns, data)
    }

    #[test]
    fn table_rows_capped() {
        let outcome = PlanOutcome::Table(wide_table(100));
        let payload = format_table(&outcome, 30).unwrap();
        assert_eq!(payload.len(), 30);
    }

    #[test]
    fn column_order_preserved() {
        let outcome = PlanOutcome::Table(wide_table(1));
        let payload = format_table(&outcome, 30).unwrap();
        let keys: Vec<&String> = payload[0].keys().collect();
        assert_eq!(keys, vec!["zeta", "alpha"]);
    }

    #[test]
    fn series_becomes_two_column_rows() {
        let outcome = PlanOutcome::Series(vec![
            ("debit".to_string(), 120.0),
            ("credit".to_string(), 30.0),
        ]);
        let payload = format_table(&outcome, 30).unwrap();
        assert_eq!(payload.len(), 2);
        assert_eq!(payload[0]["Category"], "debit");
        assert_eq!(payload[0]["Value"], 120.0);
    }

    #[test]
    fn series_rows_capped() {
        let entries = (0..50).map(|i| (format!("k{i}"), i as f64)).collect();
        let payload = format_table(&PlanOutcome::Series(entries), 30).unwrap();
        assert_eq!(payload.len(), 30);
    }

    #[test]
    fn scalar_and_text_have_no_payload() {
        assert!(format_table(&PlanOutcome::Scalar(7.0), 30).is_none());
        assert!(format_table(&PlanOutcome::Text("hi".into()), 30).is_none());
    }
}
