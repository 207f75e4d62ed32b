//! Sandboxed execution of oracle-authored operation text
//!
//! The operation text originates from an untrusted generative process, so
//! any fault here, from malformed JSON to an unknown column, is an ordinary
//! recoverable outcome converted to a textual error, never a process fault.
//! Execution reads its own snapshot handle, never the session's live field,
//! and the plan evaluator cannot mutate what it reads.

use crate::dataset::plan::{PlanOutcome, QueryPlan};
use crate::dataset::Table;
use std::sync::Arc;

/// Result of one execution attempt. Exactly one of `outcome` / `error` is
/// set; `log` carries the step notes the evaluator produced along the way.
pub struct Execution {
    pub outcome: Option<PlanOutcome>,
    pub log: Vec<String>,
    pub error: Option<String>,
}

pub fn execute(plan_text: &str, snapshot: Arc<Table>) -> Execution {
    let json = match extract_json_object(plan_text) {
        Some(json) => json,
        None => {
            return Execution {
                outcome: None,
                log: Vec::new(),
                error: Some("operation text contains no JSON object".to_string()),
            }
        }
    };

    let plan: QueryPlan = match serde_json::from_str(json) {
        Ok(plan) => plan,
        Err(e) => {
            return Execution {
                outcome: None,
                log: Vec::new(),
                error: Some(format!("invalid plan: {e}")),
            }
        }
    };

    match plan.evaluate(&snapshot) {
        Ok((outcome, log)) => Execution {
            outcome: Some(outcome),
            log,
            error: None,
        },
        Err(e) => Execution {
            outcome: None,
            log: Vec::new(),
            error: Some(e.to_string()),
        },
    }
}

/// Pull the first balanced-looking JSON object out of untrusted text. The
/// oracle sometimes wraps the plan in prose; a fixed-prefix strip is not
/// enough.
fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end < start {
        return None;
    }
    Some(&text[start..=end])
}
