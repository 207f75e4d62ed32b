//! # Datachat
//!
//! Session-scoped natural-language query engine over a tabular transaction
//! dataset. Free-text questions are classified as refinements of the
//! previous result or fresh queries, turned into constrained query plans by
//! an external reasoning oracle, executed against a per-session working copy
//! of the data with bounded retries, and answered with grounded prose.
//!
//! ## Modules
//!
//! - `config` - Runtime configuration and the oracle credential
//! - `dataset` - Immutable base dataset, CSV loading, the constrained plan evaluator
//! - `engine` - Router, synthesizer, sandbox executor, composer, formatter
//! - `oracle` - The reasoning-oracle boundary (code and prose contracts)
//! - `session` - Session store: bounded history, working snapshots, lazy eviction
//! - `server` - Axum HTTP surface: POST /chat, GET /health
pub mod config;
pub mod dataset;
pub mod engine;
pub mod error;
pub mod oracle;
pub mod server;
pub mod session;
