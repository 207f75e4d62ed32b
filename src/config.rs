//! Runtime configuration for the chat engine and server

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Environment variable holding the oracle credential.
pub const API_KEY_ENV: &str = "ANTHROPIC_API_KEY";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Port the HTTP server binds to.
    pub port: u16,
    /// Path to the transaction CSV loaded at startup.
    pub data_path: PathBuf,
    /// Optional bound on how many rows of the dataset to keep in memory.
    /// Sampling is deterministic for a given `sample_seed`.
    pub sample_size: Option<usize>,
    pub sample_seed: u64,
    /// Oracle credential. Populated from `ANTHROPIC_API_KEY`; when absent the
    /// server still starts but every /chat call fails with a configuration
    /// error.
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
    /// Model used for operation synthesis and routing verdicts.
    pub code_model: String,
    /// Model used for prose composition.
    pub prose_model: String,
    /// Corrective synthesis attempts after the initial one.
    pub max_retries: u32,
    /// Most recent turns kept per session.
    pub history_cap: usize,
    /// Idle seconds before a session is evicted.
    pub session_timeout_secs: u64,
    /// Maximum rows in a /chat table payload.
    pub table_row_cap: usize,
    /// Rows of the working dataset shown to the oracle as a preview.
    pub preview_rows: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8000,
            data_path: PathBuf::from("data/transactions.csv"),
            sample_size: None,
            sample_seed: 42,
            api_key: None,
            code_model: "claude-sonnet-4-20250514".to_string(),
            prose_model: "claude-sonnet-4-20250514".to_string(),
            max_retries: 2,
            history_cap: 10,
            session_timeout_secs: 1800,
            table_row_cap: 30,
            preview_rows: 5,
        }
    }
}

impl Config {
    /// Build a config with the credential picked up from the environment.
    pub fn from_env() -> Self {
        Self {
            api_key: std::env::var(API_KEY_ENV).ok().filter(|k| !k.is_empty()),
            ..Self::default()
        }
    }
}
