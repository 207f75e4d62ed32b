//! Reasoning oracle boundary
//!
//! The engine consumes an external text-completion service through one narrow
//! contract: `generate(system, prompt, max_tokens) -> text`. The service is a
//! black box that may fail with transport or quota faults; every call site
//! gets a typed `Error::OracleUnavailable` instead of an unhandled fault.
//! Retry orchestration lives in the synthesizer, never here.

use crate::error::{Error, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const MESSAGES_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// The two oracle contracts (code generation and prose generation) share this
/// single seam so tests can substitute a scripted stand-in.
#[async_trait]
pub trait Oracle: Send + Sync {
    async fn generate(&self, system: &str, prompt: &str, max_tokens: usize) -> Result<String>;
}

/// Anthropic messages-API backed oracle.
pub struct AnthropicOracle {
    client: Client,
    api_key: String,
    model: String,
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: usize,
    system: &'a str,
    messages: Vec<Message<'a>>,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: String,
}

impl AnthropicOracle {
    pub fn new(api_key: String, model: String) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self {
            client,
            api_key,
            model,
        })
    }
}

#[async_trait]
impl Oracle for AnthropicOracle {
    async fn generate(&self, system: &str, prompt: &str, max_tokens: usize) -> Result<String> {
        let request = MessagesRequest {
            model: &self.model,
            max_tokens,
            system,
            messages: vec![Message {
                role: "user",
                content: prompt,
            }],
        };

        let response = self
            .client
            .post(MESSAGES_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::OracleUnavailable(format!("request failed: {e}")))?;

        match response.status() {
            StatusCode::OK => {
                let body: MessagesResponse = response
                    .json()
                    .await
                    .map_err(|e| Error::OracleUnavailable(format!("malformed response: {e}")))?;
                Ok(body
                    .content
                    .first()
                    .map(|c| c.text.clone())
                    .unwrap_or_default())
            }
            StatusCode::TOO_MANY_REQUESTS => {
                Err(Error::OracleUnavailable("rate limit exceeded".to_string()))
            }
            StatusCode::UNAUTHORIZED => {
                Err(Error::OracleUnavailable("invalid API key".to_string()))
            }
            status => {
                let error_text = response.text().await.unwrap_or_default();
                Err(Error::OracleUnavailable(format!(
                    "API error {status}: {error_text}"
                )))
            }
        }
    }
}

pub mod stub {
    //! Scripted oracle for tests: pops canned replies in order, errors when
    //! the script runs dry.

    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    pub struct StubOracle {
        replies: Mutex<VecDeque<Result<String>>>,
        pub prompts: Mutex<Vec<String>>,
    }

    impl StubOracle {
        pub fn new(replies: Vec<Result<String>>) -> Self {
            Self {
                replies: Mutex::new(replies.into_iter().collect()),
                prompts: Mutex::new(Vec::new()),
            }
        }

        pub fn ok(replies: &[&str]) -> Self {
            Self::new(replies.iter().map(|r| Ok(r.to_string())).collect())
        }
    }

    #[async_trait]
    impl Oracle for StubOracle {
        async fn generate(&self, _system: &str, prompt: &str, _max_tokens: usize) -> Result<String> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(Error::OracleUnavailable("script exhausted".to_string())))
        }
    }
}
