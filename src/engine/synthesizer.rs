//! Operation synthesis: bounded context in, executable plan out
//!
//! Builds the oracle context (schema with semantic notes, data preview, row
//! count, recent history, the question) and drives the bounded retry loop:
//! one initial attempt plus up to `max_retries` corrective attempts, each
//! re-submitting the full context together with the failed plan and its
//! exact error. Stops at the first attempt that executes.

use super::executor::{self, Execution};
use crate::dataset::plan::PlanOutcome;
use crate::dataset::Table;
use crate::error::{Error, Result};
use crate::oracle::Oracle;
use std::sync::Arc;
use tracing::{debug, warn};

const PLAN_MAX_TOKENS: usize = 1024;

const SYNTH_SYSTEM: &str = r#"You are a data analyst assistant. You answer questions about a tabular transaction dataset by emitting a single JSON query plan, nothing else.

The plan object supports these fields, all optional:
- "filters": list of {"column", "op", "value"}; op is one of "eq", "ne", "contains", "gt", "gte", "lt", "lte". Filters are ANDed.
- "group_by": column name to group by (requires "aggregate").
- "aggregate": {"op", "column"}; op is one of "count", "sum", "avg", "min", "max", "count_distinct". "count" may omit the column.
- "select": list of column names to keep, in order.
- "sort": {"by": column, "descending": bool}.
- "limit": maximum rows or groups.
- "describe": true to summarize the working set instead of computing.

Rules:
1. Use only columns that exist in the schema, with their exact names.
2. Match categorical values exactly, including casing.
3. Limit large results to 30 rows or fewer.
4. Respond with ONLY the JSON object, no explanations or markdown."#;

/// A successfully synthesized and executed operation.
#[derive(Debug)]
pub struct Synthesis {
    pub plan_text: String,
    pub outcome: PlanOutcome,
    pub log: Vec<String>,
    pub attempts: u32,
}

/// Run the synthesize-execute loop against a snapshot.
///
/// Oracle failure on the mandatory first call is propagated; once at least
/// one plan exists, later oracle failures end the loop with
/// `SynthesisExhausted` instead (a degraded answer, not a server fault).
pub async fn synthesize_and_execute(
    oracle: &dyn Oracle,
    snapshot: Arc<Table>,
    history_text: &str,
    question: &str,
    preview_rows: usize,
    max_retries: u32,
) -> Result<Synthesis> {
    let context = build_context(&snapshot, history_text, question, preview_rows);

    let mut last_plan = String::new();
    let mut last_error = String::new();

    for attempt in 0..=max_retries {
        let prompt = if attempt == 0 {
            context.clone()
        } else {
            format!(
                "{context}\n\nYour previous plan:\n{last_plan}\n\nIt failed with this error:\n{last_error}\n\nRespond with a corrected JSON plan only."
            )
        };

        let reply = match oracle.generate(SYNTH_SYSTEM, &prompt, PLAN_MAX_TOKENS).await {
            Ok(reply) => reply,
            Err(e) if attempt == 0 => return Err(e),
            Err(e) => {
                warn!("synthesis oracle failed on retry {attempt}: {e}");
                last_error = e.to_string();
                break;
            }
        };

        let plan_text = strip_code_fences(&reply);
        let Execution {
            outcome,
            log,
            error,
        } = executor::execute(&plan_text, Arc::clone(&snapshot));

        match (outcome, error) {
            (Some(outcome), _) => {
                debug!(attempt, "plan executed");
                return Ok(Synthesis {
                    plan_text,
                    outcome,
                    log,
                    attempts: attempt + 1,
                });
            }
            (None, Some(error)) => {
                debug!(attempt, %error, "plan failed");
                last_plan = plan_text;
                last_error = error;
            }
            (None, None) => {
                last_plan = plan_text;
                last_error = "execution produced no result".to_string();
            }
        }
    }

    Err(Error::SynthesisExhausted {
        plan: last_plan,
        error: last_error,
    })
}

fn build_context(
    snapshot: &Table,
    history_text: &str,
    question: &str,
    preview_rows: usize,
) -> String {
    let mut out = String::new();
    out.push_str(&snapshot.schema_description());
    out.push_str(&format!("Total rows: {}\n\n", snapshot.row_count()));
    out.push_str("Data preview:\n");
    out.push_str(&snapshot.preview_text(preview_rows));
    if !history_text.is_empty() {
        out.push_str("\nRecent conversation:\n");
        out.push_str(history_text);
    }
    out.push_str(&format!("\nQuestion: {question}"));
    out
}

/// Strip markdown code fences from an untrusted oracle reply. Handles a
/// fence with any language tag, anywhere in the text; replies without fences
/// pass through trimmed.
pub fn strip_code_fences(raw: &str) -> String {
    let raw = raw.trim();
    let Some(start) = raw.find("```") else {
        return raw.to_string();
    };
    let after = &raw[start + 3..];
    let body_start = after.find('\n').map(|i| i + 1).unwrap_or(0);
    let body = &after[body_start..];
    let body = match body.rfind("```") {
        Some(end) => &body[..end],
        None => body,
    };
    body.trim().to_string()
}
