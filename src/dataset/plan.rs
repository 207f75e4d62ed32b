//! Constrained query plans over a dataset snapshot
//!
//! The oracle is asked for a small JSON plan over an allow-listed verb set
//! (filter, select, group/aggregate, sort, limit, describe) instead of
//! arbitrary code. Evaluation is pure: it reads a snapshot and produces one
//! of four terminal outcomes, with every fault reported as a typed error.

use super::{parse_date, ColumnType, Table, Value};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QueryPlan {
    /// Conjunctive row filters, applied in order.
    #[serde(default)]
    pub filters: Vec<FilterClause>,
    /// Group rows by this column before aggregating.
    #[serde(default)]
    pub group_by: Option<String>,
    /// Aggregate over the (possibly grouped) rows.
    #[serde(default)]
    pub aggregate: Option<AggregateClause>,
    /// Project these columns, in this order.
    #[serde(default)]
    pub select: Option<Vec<String>>,
    #[serde(default)]
    pub sort: Option<SortClause>,
    #[serde(default)]
    pub limit: Option<usize>,
    /// Terminal text summary of the working set instead of a result.
    #[serde(default)]
    pub describe: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FilterClause {
    pub column: String,
    pub op: FilterOp,
    pub value: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOp {
    Eq,
    Ne,
    Contains,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl fmt::Display for FilterOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FilterOp::Eq => "==",
            FilterOp::Ne => "!=",
            FilterOp::Contains => "contains",
            FilterOp::Gt => ">",
            FilterOp::Gte => ">=",
            FilterOp::Lt => "<",
            FilterOp::Lte => "<=",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AggregateClause {
    pub op: AggregateOp,
    /// Column the aggregate reads; `count` may omit it.
    #[serde(default)]
    pub column: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateOp {
    Count,
    Sum,
    Avg,
    Min,
    Max,
    CountDistinct,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SortClause {
    pub by: String,
    #[serde(default)]
    pub descending: bool,
}

/// One of the four legal terminal states of an executed plan.
#[derive(Debug, Clone)]
pub enum PlanOutcome {
    Table(Table),
    /// Keyed numeric values, e.g. a per-category aggregate.
    Series(Vec<(String, f64)>),
    Scalar(f64),
    Text(String),
}

impl PlanOutcome {
    /// Literal rendering handed to the prose oracle and used by fallbacks.
    pub fn literal_text(&self, row_cap: usize) -> String {
        match self {
            PlanOutcome::Table(table) => {
                let shown = table.row_count().min(row_cap);
                let mut out = format!("{} rows", table.row_count());
                if shown < table.row_count() {
                    out.push_str(&format!(" (showing first {shown})"));
                }
                out.push('\n');
                out.push_str(&table.preview_text(shown));
                out
            }
            PlanOutcome::Series(entries) => {
                let mut out = String::new();
                for (key, value) in entries.iter().take(row_cap) {
                    out.push_str(&format!("{key}: {}\n", Value::Num(*value)));
                }
                if entries.len() > row_cap {
                    out.push_str(&format!("... ({} entries total)\n", entries.len()));
                }
                out
            }
            PlanOutcome::Scalar(n) => Value::Num(*n).to_string(),
            PlanOutcome::Text(s) => s.clone(),
        }
    }
}

impl QueryPlan {
    /// Evaluate against a snapshot. Returns the outcome plus step notes (the
    /// captured-output analog), or a typed error for any fault: unknown
    /// column, type mismatch, missing aggregate input.
    pub fn evaluate(&self, table: &Table) -> Result<(PlanOutcome, Vec<String>)> {
        let mut log = Vec::new();

        let mut keep: Vec<usize> = (0..table.row_count()).collect();
        for clause in &self.filters {
            let before = keep.len();
            keep = apply_filter(table, clause, keep)?;
            log.push(format!(
                "filter {} {} {}: kept {} of {} rows",
                clause.column, clause.op, clause.value, keep.len(), before
            ));
        }

        if self.describe {
            let text = format!(
                "Working set: {} rows x {} columns ({})",
                keep.len(),
                table.columns().len(),
                table.column_names().join(", ")
            );
            return Ok((PlanOutcome::Text(text), log));
        }

        if let Some(group_col) = &self.group_by {
            let aggregate = self.aggregate.as_ref().ok_or_else(|| {
                Error::Dataset("group_by requires an aggregate".to_string())
            })?;
            let series = self.grouped(table, group_col, aggregate, &keep, &mut log)?;
            return Ok((PlanOutcome::Series(series), log));
        }

        if let Some(aggregate) = &self.aggregate {
            let value = compute_aggregate(table, aggregate, &keep)?;
            log.push(format!("aggregate {:?}: {}", aggregate.op, Value::Num(value)));
            return Ok((PlanOutcome::Scalar(value), log));
        }

        let result = self.projected(table, &keep)?;
        log.push(format!("result table: {} rows", result.row_count()));
        Ok((PlanOutcome::Table(result), log))
    }

    fn grouped(
        &self,
        table: &Table,
        group_col: &str,
        aggregate: &AggregateClause,
        keep: &[usize],
        log: &mut Vec<String>,
    ) -> Result<Vec<(String, f64)>> {
        let group_idx = column_index(table, group_col)?;
        // First-seen order, then sorted below.
        let mut keys: Vec<String> = Vec::new();
        let mut buckets: Vec<Vec<usize>> = Vec::new();
        for &row in keep {
            let key = table.rows()[row][group_idx].to_string();
            match keys.iter().position(|k| *k == key) {
                Some(pos) => buckets[pos].push(row),
                None => {
                    keys.push(key);
                    buckets.push(vec![row]);
                }
            }
        }
        log.push(format!("grouped by {group_col}: {} groups", keys.len()));

        let mut series: Vec<(String, f64)> = keys
            .into_iter()
            .zip(buckets)
            .map(|(key, rows)| Ok((key, compute_aggregate(table, aggregate, &rows)?)))
            .collect::<Result<_>>()?;

        match &self.sort {
            Some(sort) if sort.by == group_col => {
                series.sort_by(|a, b| a.0.cmp(&b.0));
                if sort.descending {
                    series.reverse();
                }
            }
            Some(sort) => {
                // Any other sort key means "by the aggregated value".
                series.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
                if sort.descending {
                    series.reverse();
                }
            }
            None => {
                // Largest first is the useful default for ranked answers.
                series.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
            }
        }
        if let Some(limit) = self.limit {
            series.truncate(limit);
        }
        Ok(series)
    }

    fn projected(&self, table: &Table, keep: &[usize]) -> Result<Table> {
        let column_indices: Vec<usize> = match &self.select {
            Some(names) => names
                .iter()
                .map(|name| column_index(table, name))
                .collect::<Result<_>>()?,
            None => (0..table.columns().len()).collect(),
        };

        let mut row_order: Vec<usize> = keep.to_vec();
        if let Some(sort) = &self.sort {
            let sort_idx = column_index(table, &sort.by)?;
            row_order.sort_by(|&a, &b| {
                compare_values(&table.rows()[a][sort_idx], &table.rows()[b][sort_idx])
            });
            if sort.descending {
                row_order.reverse();
            }
        }
        if let Some(limit) = self.limit {
            row_order.truncate(limit);
        }

        let columns = column_indices
            .iter()
            .map(|&i| table.columns()[i].clone())
            .collect();
        let rows = row_order
            .into_iter()
            .map(|r| {
                column_indices
                    .iter()
                    .map(|&c| table.rows()[r][c].clone())
                    .collect()
            })
            .collect();
        Ok(Table::new(columns, rows))
    }
}

fn column_index(table: &Table, name: &str) -> Result<usize> {
    table.column_index(name).ok_or_else(|| {
        Error::Dataset(format!(
            "unknown column \"{name}\" (available: {})",
            table.column_names().join(", ")
        ))
    })
}

fn apply_filter(table: &Table, clause: &FilterClause, keep: Vec<usize>) -> Result<Vec<usize>> {
    let idx = column_index(table, &clause.column)?;
    let ctype = table.columns()[idx].ctype;

    enum Target {
        Num(f64),
        Date(chrono::NaiveDate),
        Text(String),
    }

    let target = match ctype {
        ColumnType::Numeric => {
            let n = clause
                .value
                .as_f64()
                .or_else(|| clause.value.as_str().and_then(|s| s.parse().ok()))
                .ok_or_else(|| {
                    Error::Dataset(format!(
                        "filter on numeric column \"{}\" needs a numeric value, got {}",
                        clause.column, clause.value
                    ))
                })?;
            Target::Num(n)
        }
        ColumnType::Timestamp => {
            let raw = clause.value.as_str().ok_or_else(|| {
                Error::Dataset(format!(
                    "filter on date column \"{}\" needs a YYYY-MM-DD string",
                    clause.column
                ))
            })?;
            let date = parse_date(raw).ok_or_else(|| {
                Error::Dataset(format!("\"{raw}\" is not a YYYY-MM-DD date"))
            })?;
            Target::Date(date)
        }
        ColumnType::Text | ColumnType::Categorical => {
            let s = match &clause.value {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            Target::Text(s)
        }
    };

    let matches = |value: &Value| -> bool {
        match (&target, value) {
            (Target::Num(t), Value::Num(v)) => compare_ordered(clause.op, v.partial_cmp(t)),
            (Target::Date(t), Value::Date(v)) => compare_ordered(clause.op, v.partial_cmp(t)),
            (Target::Text(t), Value::Text(v)) => match clause.op {
                FilterOp::Eq => v == t,
                FilterOp::Ne => v != t,
                FilterOp::Contains => v.to_lowercase().contains(&t.to_lowercase()),
                // Lexicographic ordering for text comparisons.
                _ => compare_ordered(clause.op, v.partial_cmp(t)),
            },
            // Nulls never match a positive predicate.
            (_, Value::Null) => clause.op == FilterOp::Ne,
            _ => false,
        }
    };

    Ok(keep
        .into_iter()
        .filter(|&row| matches(&table.rows()[row][idx]))
        .collect())
}

fn compare_ordered(op: FilterOp, ord: Option<std::cmp::Ordering>) -> bool {
    use std::cmp::Ordering::*;
    let Some(ord) = ord else { return false };
    match op {
        FilterOp::Eq => ord == Equal,
        FilterOp::Ne => ord != Equal,
        FilterOp::Gt => ord == Greater,
        FilterOp::Gte => ord != Less,
        FilterOp::Lt => ord == Less,
        FilterOp::Lte => ord != Greater,
        FilterOp::Contains => false,
    }
}

fn compare_values(a: &Value, b: &Value) -> std::cmp::Ordering {
    match (a, b) {
        (Value::Num(x), Value::Num(y)) => x.partial_cmp(y).unwrap_or(std::cmp::Ordering::Equal),
        (Value::Date(x), Value::Date(y)) => x.cmp(y),
        (Value::Text(x), Value::Text(y)) => x.cmp(y),
        (Value::Null, Value::Null) => std::cmp::Ordering::Equal,
        (Value::Null, _) => std::cmp::Ordering::Less,
        (_, Value::Null) => std::cmp::Ordering::Greater,
        _ => std::cmp::Ordering::Equal,
    }
}

fn compute_aggregate(table: &Table, clause: &AggregateClause, rows: &[usize]) -> Result<f64> {
    if clause.op == AggregateOp::Count && clause.column.is_none() {
        return Ok(rows.len() as f64);
    }
    let name = clause.column.as_deref().ok_or_else(|| {
        Error::Dataset(format!("aggregate {:?} requires a column", clause.op))
    })?;
    let idx = column_index(table, name)?;

    if clause.op == AggregateOp::CountDistinct {
        let distinct: BTreeSet<String> = rows
            .iter()
            .map(|&r| table.rows()[r][idx].to_string())
            .collect();
        return Ok(distinct.len() as f64);
    }
    if clause.op == AggregateOp::Count {
        let n = rows
            .iter()
            .filter(|&&r| table.rows()[r][idx] != Value::Null)
            .count();
        return Ok(n as f64);
    }

    if table.columns()[idx].ctype != ColumnType::Numeric {
        return Err(Error::Dataset(format!(
            "aggregate {:?} needs a numeric column, \"{name}\" is not",
            clause.op
        )));
    }
    let nums: Vec<f64> = rows
        .iter()
        .filter_map(|&r| table.rows()[r][idx].as_num())
        .collect();
    if nums.is_empty() {
        return Err(Error::Dataset(format!(
            "aggregate {:?} over \"{name}\" has no numeric values",
            clause.op
        )));
    }
    let value = match clause.op {
        AggregateOp::Sum => nums.iter().sum(),
        AggregateOp::Avg => nums.iter().sum::<f64>() / nums.len() as f64,
        AggregateOp::Min => nums.iter().cloned().fold(f64::INFINITY, f64::min),
        AggregateOp::Max => nums.iter().cloned().fold(f64::NEG_INFINITY, f64::max),
        AggregateOp::Count | AggregateOp::CountDistinct => unreachable!(),
    };
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{Column, ColumnType, Table, Value};
    use serde_json::json;

    fn sample_table() -> Table {
        let columns = vec![
            Column {
                name: "merchant".into(),
                ctype: ColumnType::Text,
            },
            Column {
                name: "category".into(),
                ctype: ColumnType::Categorical,
            },
            Column {
                name: "amount".into(),
                ctype: ColumnType::Numeric,
            },
        ];
        let row = |m: &str, c: &str, a: f64| {
            vec![
                Value::Text(m.to_string()),
                Value::Text(c.to_string()),
                Value::Num(a),
            ]
        };
        Table::new(
            columns,
            vec![
                row("TESCO", "debit", 10.0),
                row("AMAZON", "debit", 25.0),
                row("EMPLOYER", "credit", 2000.0),
                row("TESCO", "debit", 8.0),
            ],
        )
    }

    fn plan(json: serde_json::Value) -> QueryPlan {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn filter_plus_count_yields_scalar() {
        let p = plan(json!({
            "filters": [{"column": "category", "op": "eq", "value": "debit"}],
            "aggregate": {"op": "count"}
        }));
        let (outcome, log) = p.evaluate(&sample_table()).unwrap();
        match outcome {
            PlanOutcome::Scalar(n) => assert_eq!(n, 3.0),
            other => panic!("expected scalar, got {other:?}"),
        }
        assert!(log[0].contains("kept 3 of 4"));
    }

    #[test]
    fn group_by_sum_yields_sorted_series() {
        let p = plan(json!({
            "group_by": "merchant",
            "aggregate": {"op": "sum", "column": "amount"}
        }));
        let (outcome, _) = p.evaluate(&sample_table()).unwrap();
        match outcome {
            PlanOutcome::Series(entries) => {
                assert_eq!(entries[0], ("EMPLOYER".to_string(), 2000.0));
                assert_eq!(entries[1], ("AMAZON".to_string(), 25.0));
                assert_eq!(entries[2], ("TESCO".to_string(), 18.0));
            }
            other => panic!("expected series, got {other:?}"),
        }
    }

    #[test]
    fn select_sort_limit_yields_table() {
        let p = plan(json!({
            "select": ["merchant", "amount"],
            "sort": {"by": "amount", "descending": true},
            "limit": 2
        }));
        let (outcome, _) = p.evaluate(&sample_table()).unwrap();
        match outcome {
            PlanOutcome::Table(t) => {
                assert_eq!(t.column_names(), vec!["merchant", "amount"]);
                assert_eq!(t.row_count(), 2);
                assert_eq!(t.rows()[0][0], Value::Text("EMPLOYER".into()));
            }
            other => panic!("expected table, got {other:?}"),
        }
    }

    #[test]
    fn unknown_column_is_a_typed_error() {
        let p = plan(json!({
            "filters": [{"column": "nope", "op": "eq", "value": "x"}]
        }));
        let err = p.evaluate(&sample_table()).unwrap_err();
        assert!(err.to_string().contains("unknown column"));
        assert!(err.to_string().contains("merchant"));
    }

    #[test]
    fn sum_over_text_column_is_rejected() {
        let p = plan(json!({
            "aggregate": {"op": "sum", "column": "merchant"}
        }));
        assert!(p.evaluate(&sample_table()).is_err());
    }

    #[test]
    fn describe_yields_text() {
        let p = plan(json!({"describe": true}));
        let (outcome, _) = p.evaluate(&sample_table()).unwrap();
        match outcome {
            PlanOutcome::Text(s) => assert!(s.contains("4 rows")),
            other => panic!("expected text, got {other:?}"),
        }
    }

    #[test]
    fn unknown_verb_is_rejected_at_parse_time() {
        let err = serde_json::from_value::<QueryPlan>(json!({"exec": "rm -rf /"}));
        assert!(err.is_err());
    }
}
