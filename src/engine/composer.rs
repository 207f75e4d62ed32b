//! Grounded prose composition from a literal execution result

use crate::oracle::Oracle;
use tracing::warn;

const PROSE_MAX_TOKENS: usize = 512;

const COMPOSER_SYSTEM: &str = "You summarize query results for a data analytics chat. You are \
given the user's question and the literal, fully materialized result of running their query. \
Answer in one to three sentences. Cite only numbers that appear verbatim in the literal result; \
never estimate, extrapolate, or invent figures.";

/// Prefix of the deterministic fallback used when the prose oracle fails.
pub const FALLBACK_PREFIX: &str = "Here is the result of your query:";

/// Turn a literal result into a natural-language answer. Never fails: on
/// oracle failure the caller gets the literal result behind a fixed phrase
/// instead of an empty response.
pub async fn compose(
    oracle: &dyn Oracle,
    question: &str,
    literal_result: &str,
    history_text: &str,
) -> String {
    let prompt = format!(
        "Question: {question}\n\nLiteral result:\n{literal_result}\n\nRecent conversation (context only):\n{history_text}"
    );

    match oracle.generate(COMPOSER_SYSTEM, &prompt, PROSE_MAX_TOKENS).await {
        Ok(prose) if !prose.trim().is_empty() => prose.trim().to_string(),
        Ok(_) => fallback(literal_result),
        Err(e) => {
            warn!("prose oracle failed, falling back to literal result: {e}");
            fallback(literal_result)
        }
    }
}

fn fallback(literal_result: &str) -> String {
    format!("{FALLBACK_PREFIX}\n{literal_result}")
}
