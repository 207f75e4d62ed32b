//! Query engine orchestration
//!
//! Per request: classify the question as refinement or new, pick the dataset
//! snapshot accordingly, run the synthesize-execute retry loop, compose a
//! grounded answer, format the table payload, and record the turn. The
//! caller holds the session lock for the whole call, so the read-modify-write
//! of `working` and `history` is never interleaved with another request for
//! the same session.

use crate::dataset::plan::PlanOutcome;
use crate::dataset::Table;
use crate::error::{Error, Result};
use crate::oracle::Oracle;
use crate::session::{Role, Session};
use std::sync::Arc;
use tracing::{debug, info};

pub mod composer;
pub mod executor;
pub mod formatter;
pub mod router;
pub mod synthesizer;

pub use formatter::PayloadRow;
pub use router::QueryKind;

/// Tunables for one engine instance.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub max_retries: u32,
    pub table_row_cap: usize,
    pub preview_rows: usize,
    /// History turns included in oracle context windows.
    pub history_window: usize,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            max_retries: 2,
            table_row_cap: 30,
            preview_rows: 5,
            history_window: 6,
        }
    }
}

/// The reply for one chat turn.
#[derive(Debug)]
pub struct ChatReply {
    pub response: String,
    pub table: Option<Vec<PayloadRow>>,
}

pub struct QueryEngine {
    code_oracle: Arc<dyn Oracle>,
    prose_oracle: Arc<dyn Oracle>,
    base: Arc<Table>,
    opts: EngineOptions,
}

impl QueryEngine {
    pub fn new(
        code_oracle: Arc<dyn Oracle>,
        prose_oracle: Arc<dyn Oracle>,
        base: Arc<Table>,
        opts: EngineOptions,
    ) -> Self {
        Self {
            code_oracle,
            prose_oracle,
            base,
            opts,
        }
    }

    /// Answer one question within a session. The only errors that escape are
    /// oracle unavailability on the mandatory first synthesis call; synthesis
    /// exhaustion degrades to an apologetic answer with no table.
    pub async fn answer(&self, session: &mut Session, question: &str) -> Result<ChatReply> {
        let kind = router::classify(self.code_oracle.as_ref(), session, question).await;

        let snapshot = match kind {
            QueryKind::New => {
                // A new query always starts from the full base dataset.
                session.working = Arc::clone(&self.base);
                Arc::clone(&self.base)
            }
            QueryKind::Refinement => Arc::clone(&session.working),
        };
        debug!(?kind, rows = snapshot.row_count(), "selected snapshot");

        let history_text = session.history_text(self.opts.history_window);

        let synthesis = match synthesizer::synthesize_and_execute(
            self.code_oracle.as_ref(),
            Arc::clone(&snapshot),
            &history_text,
            question,
            self.opts.preview_rows,
            self.opts.max_retries,
        )
        .await
        {
            Ok(synthesis) => synthesis,
            Err(Error::SynthesisExhausted { plan, error }) => {
                info!(%error, last_plan = %plan, "synthesis exhausted, degrading");
                let response = format!(
                    "I wasn't able to run a working query for that question. \
                     The last attempt failed with: {error}. \
                     Try rephrasing, or asking about specific columns."
                );
                session.append_turn(Role::User, question);
                session.append_turn(Role::Assistant, response.clone());
                return Ok(ChatReply {
                    response,
                    table: None,
                });
            }
            Err(e) => return Err(e),
        };

        // A tabular result becomes the session's next working set, so a
        // follow-up refinement narrows it further.
        if let PlanOutcome::Table(table) = &synthesis.outcome {
            session.working = Arc::new(table.clone());
        }
        session.last_plan = Some(synthesis.plan_text.clone());

        let literal = synthesis.outcome.literal_text(self.opts.table_row_cap);
        let response = composer::compose(
            self.prose_oracle.as_ref(),
            question,
            &literal,
            &history_text,
        )
        .await;
        let table = formatter::format_table(&synthesis.outcome, self.opts.table_row_cap);

        session.append_turn(Role::User, question);
        session.append_turn(Role::Assistant, response.clone());

        info!(
            attempts = synthesis.attempts,
            has_table = table.is_some(),
            "answered"
        );
        Ok(ChatReply { response, table })
    }

    pub fn base(&self) -> &Arc<Table> {
        &self.base
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{Column, ColumnType, Value};
    use crate::error::Error;
    use crate::oracle::stub::StubOracle;
    use crate::session::SessionStore;
    use std::time::Duration;

    fn base() -> Arc<Table> {
        let columns = vec![
            Column {
                name: "category".into(),
                ctype: ColumnType::Categorical,
            },
            Column {
                name: "amount".into(),
                ctype: ColumnType::Numeric,
            },
        ];
        let row = |c: &str, a: f64| vec![Value::Text(c.into()), Value::Num(a)];
        Arc::new(Table::new(
            columns,
            vec![
                row("debit", 10.0),
                row("debit", 20.0),
                row("credit", 99.0),
            ],
        ))
    }

    fn engine(code: StubOracle, prose: StubOracle) -> QueryEngine {
        QueryEngine::new(Arc::new(code), Arc::new(prose), base(), EngineOptions::default())
    }

    async fn fresh_session(base: Arc<Table>) -> (SessionStore, String) {
        let store = SessionStore::new(base, Duration::from_secs(60), 10);
        let (id, _) = store.resolve(None).await;
        (store, id)
    }

    const FILTER_DEBIT: &str =
        r#"{"filters": [{"column": "category", "op": "eq", "value": "debit"}]}"#;
    const COUNT_ALL: &str = r#"{"aggregate": {"op": "count"}}"#;

    #[tokio::test]
    async fn new_resets_refinement_reuses() {
        // Turn 1: a filter narrows the working set to the 2 debit rows.
        // Turn 2: REFINE verdict, count runs over the narrowed set.
        // Turn 3: NEW verdict, count runs over the full base again.
        let code = StubOracle::ok(&[
            FILTER_DEBIT,
            "REFINE",
            COUNT_ALL,
            "NEW",
            COUNT_ALL,
        ]);
        let prose = StubOracle::ok(&["two rows", "2", "3"]);
        let engine = engine(code, prose);
        let (store, id) = fresh_session(Arc::clone(engine.base())).await;

        let (_, session) = store.resolve(Some(&id)).await;
        let mut guard = session.lock().await;

        engine.answer(&mut guard, "show debits").await.unwrap();
        assert_eq!(guard.working.row_count(), 2);

        let reply = engine.answer(&mut guard, "how many are there").await.unwrap();
        assert_eq!(reply.response, "2");

        let reply = engine.answer(&mut guard, "how many transactions total").await.unwrap();
        assert_eq!(reply.response, "3");
        // NEW reset the working set to the base before executing.
        assert_eq!(guard.working.row_count(), 3);
    }

    #[tokio::test]
    async fn first_question_skips_routing_oracle() {
        // Only one scripted reply: the plan. If the router consulted the
        // oracle it would consume it and synthesis would fail.
        let code = StubOracle::ok(&[COUNT_ALL]);
        let prose = StubOracle::ok(&["three"]);
        let engine = engine(code, prose);
        let (store, id) = fresh_session(Arc::clone(engine.base())).await;
        let (_, session) = store.resolve(Some(&id)).await;
        let mut guard = session.lock().await;

        let reply = engine.answer(&mut guard, "how many rows").await.unwrap();
        assert_eq!(reply.response, "three");
        assert!(reply.table.is_none());
    }

    #[tokio::test]
    async fn exhausted_retries_degrade() {
        let bad = r#"{"aggregate": {"op": "sum", "column": "missing"}}"#;
        let code = StubOracle::ok(&[bad, bad, bad]);
        let prose = StubOracle::ok(&[]);
        let engine = engine(code, prose);
        let (store, id) = fresh_session(Arc::clone(engine.base())).await;
        let (_, session) = store.resolve(Some(&id)).await;
        let mut guard = session.lock().await;

        let reply = engine.answer(&mut guard, "impossible question").await.unwrap();
        assert!(reply.table.is_none());
        assert!(!reply.response.is_empty());
        assert!(reply.response.contains("unknown column"));
        // No successful execution, so the next turn must still route as NEW.
        assert!(guard.last_plan.is_none());
    }

    #[tokio::test]
    async fn routing_failure_defaults_to_new() {
        let code = StubOracle::new(vec![
            Ok(FILTER_DEBIT.to_string()),
            // Routing call for turn 2 fails outright.
            Err(Error::OracleUnavailable("router down".into())),
            Ok(COUNT_ALL.to_string()),
        ]);
        let prose = StubOracle::ok(&["filtered", "3"]);
        let engine = engine(code, prose);
        let (store, id) = fresh_session(Arc::clone(engine.base())).await;
        let (_, session) = store.resolve(Some(&id)).await;
        let mut guard = session.lock().await;

        engine.answer(&mut guard, "show debits").await.unwrap();
        let reply = engine.answer(&mut guard, "and now?").await.unwrap();
        // Fell back to NEW: count ran over the full base dataset.
        assert_eq!(reply.response, "3");
        assert_eq!(guard.working.row_count(), 3);
    }

    #[tokio::test]
    async fn first_synthesis_oracle_failure_propagates() {
        let code = StubOracle::new(vec![Err(Error::OracleUnavailable("down".into()))]);
        let prose = StubOracle::ok(&[]);
        let engine = engine(code, prose);
        let (store, id) = fresh_session(Arc::clone(engine.base())).await;
        let (_, session) = store.resolve(Some(&id)).await;
        let mut guard = session.lock().await;

        let err = engine.answer(&mut guard, "anything").await.unwrap_err();
        assert!(matches!(err, Error::OracleUnavailable(_)));
    }

    #[tokio::test]
    async fn turns_are_recorded() {
        let code = StubOracle::ok(&[COUNT_ALL]);
        let prose = StubOracle::ok(&["three"]);
        let engine = engine(code, prose);
        let (store, id) = fresh_session(Arc::clone(engine.base())).await;
        let (_, session) = store.resolve(Some(&id)).await;
        let mut guard = session.lock().await;

        engine.answer(&mut guard, "how many rows").await.unwrap();
        assert_eq!(guard.history_len(), 2);
        let text = guard.history_text(4);
        assert!(text.contains("user: how many rows"));
        assert!(text.contains("assistant: three"));
    }
}
