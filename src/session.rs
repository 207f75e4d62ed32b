//! Session lifecycle: creation, bounded history, working snapshot, eviction
//!
//! The store owns every session. Each session sits behind its own async
//! mutex so a request holds exclusive access to its session's working
//! snapshot and history for the full read-modify-write, while requests
//! against different sessions proceed in parallel. Eviction is lazy: expired
//! entries are purged at resolve time, before any session lock is taken.

use crate::dataset::Table;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

/// Per-caller conversation state. Owned by the store; reached only through
/// its `Arc<Mutex<_>>` handle.
pub struct Session {
    pub id: String,
    history: VecDeque<Turn>,
    history_cap: usize,
    /// Session-private snapshot. Replaced wholesale, never mutated, so prior
    /// snapshots stay valid for concurrent readers.
    pub working: Arc<Table>,
    /// Most recent successfully executed operation text.
    pub last_plan: Option<String>,
}

impl Session {
    fn new(id: String, base: Arc<Table>, history_cap: usize) -> Self {
        Self {
            id,
            history: VecDeque::new(),
            history_cap,
            working: base,
            last_plan: None,
        }
    }

    /// Append a turn, silently dropping the oldest beyond the cap.
    pub fn append_turn(&mut self, role: Role, content: impl Into<String>) {
        self.history.push_back(Turn {
            role,
            content: content.into(),
        });
        while self.history.len() > self.history_cap {
            self.history.pop_front();
        }
    }

    pub fn history(&self) -> impl Iterator<Item = &Turn> {
        self.history.iter()
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    /// Recent turns rendered for an oracle context window.
    pub fn history_text(&self, last_n: usize) -> String {
        let skip = self.history.len().saturating_sub(last_n);
        let mut out = String::new();
        for turn in self.history.iter().skip(skip) {
            let role = match turn.role {
                Role::User => "user",
                Role::Assistant => "assistant",
            };
            out.push_str(&format!("{role}: {}\n", turn.content));
        }
        out
    }
}

struct Entry {
    session: Arc<Mutex<Session>>,
    last_access: Instant,
}

/// Owns session lifecycle. No other component touches a session's working
/// dataset except through the handle this store returns.
pub struct SessionStore {
    base: Arc<Table>,
    timeout: Duration,
    history_cap: usize,
    inner: Mutex<HashMap<String, Entry>>,
}

impl SessionStore {
    pub fn new(base: Arc<Table>, timeout: Duration, history_cap: usize) -> Self {
        Self {
            base,
            timeout,
            history_cap,
            inner: Mutex::new(HashMap::new()),
        }
    }

    /// Resolve a caller-supplied id to a live session, minting a fresh one
    /// when the id is absent, unknown, or expired. Expired entries are purged
    /// before lookup, so an expired id behaves exactly like no id.
    pub async fn resolve(&self, session_id: Option<&str>) -> (String, Arc<Mutex<Session>>) {
        let mut map = self.inner.lock().await;

        let now = Instant::now();
        map.retain(|id, entry| {
            let live = now.duration_since(entry.last_access) <= self.timeout;
            if !live {
                debug!(session_id = %id, "evicting idle session");
            }
            live
        });

        if let Some(id) = session_id {
            if let Some(entry) = map.get_mut(id) {
                entry.last_access = now;
                return (id.to_string(), Arc::clone(&entry.session));
            }
        }

        let id = uuid::Uuid::new_v4().to_string();
        let session = Arc::new(Mutex::new(Session::new(
            id.clone(),
            Arc::clone(&self.base),
            self.history_cap,
        )));
        map.insert(
            id.clone(),
            Entry {
                session: Arc::clone(&session),
                last_access: now,
            },
        );
        debug!(session_id = %id, "created session");
        (id, session)
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }
}
