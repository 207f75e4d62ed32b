//! Refinement-vs-new classification for incoming questions

use crate::oracle::Oracle;
use crate::session::Session;
use tracing::{debug, warn};

/// Whether a question narrows the previous result or starts over from the
/// base dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryKind {
    New,
    Refinement,
}

const ROUTER_SYSTEM: &str = "You decide whether a follow-up question refines the user's previous \
query result or starts a fresh query against the full dataset. Reply with exactly one word: \
REFINE if the question narrows, sorts, or further transforms the previous result; NEW otherwise.";

const VERDICT_MAX_TOKENS: usize = 16;

/// Classify a question relative to session state.
///
/// Deterministic floor: with no previously executed operation or fewer than
/// two history turns the verdict is always `New` and the oracle is not
/// consulted. Oracle failure or a malformed verdict also falls back to `New`:
/// a wrong `New` degrades the session to a fresh query, while a wrong
/// `Refinement` could compound a broken filter chain.
pub async fn classify(oracle: &dyn Oracle, session: &Session, question: &str) -> QueryKind {
    if session.last_plan.is_none() || session.history_len() < 2 {
        return QueryKind::New;
    }

    let prompt = format!(
        "Recent conversation:\n{history}\nCurrent working dataset: {rows} rows\nPreview:\n{preview}\nNew question: {question}\n\nREFINE or NEW?",
        history = session.history_text(6),
        rows = session.working.row_count(),
        preview = session.working.preview_text(3),
        question = question,
    );

    match oracle.generate(ROUTER_SYSTEM, &prompt, VERDICT_MAX_TOKENS).await {
        Ok(verdict) => {
            let kind = parse_verdict(&verdict);
            debug!(?kind, verdict = verdict.trim(), "routing verdict");
            kind
        }
        Err(e) => {
            warn!("routing oracle failed, defaulting to NEW: {e}");
            QueryKind::New
        }
    }
}

/// The oracle's reply is an untrusted string; accept only an exact REFINE
/// token (first word, case-insensitive, punctuation stripped). Everything
/// else is NEW.
fn parse_verdict(raw: &str) -> QueryKind {
    let token: String = raw
        .trim()
        .split_whitespace()
        .next()
        .unwrap_or("")
        .chars()
        .filter(|c| c.is_ascii_alphabetic())
        .collect();
    if token.eq_ignore_ascii_case("REFINE") {
        QueryKind::Refinement
    } else {
        QueryKind::New
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{Column, ColumnType, Table, Value};
    use crate::oracle::stub::StubOracle;
    use crate::session::SessionStore;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn first_question_is_new_despite_refine_verdict() {
        let base = Arc::new(Table::new(
            vec![Column {
                name: "amount".into(),
                ctype: ColumnType::Numeric,
            }],
            vec![vec![Value::Num(1.0)]],
        ));
        let store = SessionStore::new(base, Duration::from_secs(60), 10);
        let (_, session) = store.resolve(None).await;
        let session = session.lock().await;

        // Even an oracle scripted to say REFINE cannot override the
        // deterministic floor for a fresh session.
        let oracle = StubOracle::ok(&["REFINE"]);
        let kind = classify(&oracle, &session, "how many rows").await;
        assert_eq!(kind, QueryKind::New);
        // The oracle was never consulted.
        assert!(oracle.prompts.lock().unwrap().is_empty());
    }

    #[test]
    fn verdict_parsing_is_resilient() {
        assert_eq!(parse_verdict("REFINE"), QueryKind::Refinement);
        assert_eq!(parse_verdict("  refine.\n"), QueryKind::Refinement);
        assert_eq!(parse_verdict("REFINE: the user narrows"), QueryKind::Refinement);
        assert_eq!(parse_verdict("NEW"), QueryKind::New);
        assert_eq!(parse_verdict("REFINEMENT"), QueryKind::New);
        assert_eq!(parse_verdict(""), QueryKind::New);
        assert_eq!(parse_verdict("I think REFINE"), QueryKind::New);
    }
}
