//! Per-conversation execution sessions.
//!
//! A session is one conversation's persistent namespace: variables bound by
//! one exec are visible to the next. Sessions are created lazily on first
//! use and evicted opportunistically on lookup — TTL-expired sessions
//! first, then oldest-updated-first once the store is over capacity.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;

use crate::interp::Scope;
use crate::value::Value;

/// One conversation's sandbox state.
pub struct ExecSession {
    /// Owning conversation.
    pub conversation_id: String,
    /// The persistent namespace. Callers serialize execs per conversation;
    /// the store never holds this lock itself.
    pub namespace: Mutex<Scope>,
    created_at: Instant,
    last_used_at: Mutex<Instant>,
}

impl ExecSession {
    fn new(conversation_id: &str) -> Self {
        let now = Instant::now();
        Self {
            conversation_id: conversation_id.to_string(),
            namespace: Mutex::new(Scope::new()),
            created_at: now,
            last_used_at: Mutex::new(now),
        }
    }

    /// How long this session has existed.
    #[must_use]
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    fn idle(&self) -> Duration {
        self.last_used_at.lock().elapsed()
    }

    fn touch(&self) {
        *self.last_used_at.lock() = Instant::now();
    }
}

/// Store of live sessions, keyed by conversation id.
pub struct SessionStore {
    sessions: DashMap<String, Arc<ExecSession>>,
    capacity: usize,
    ttl: Duration,
}

impl SessionStore {
    /// Store with the given capacity and idle TTL.
    #[must_use]
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            sessions: DashMap::new(),
            capacity: capacity.max(1),
            ttl,
        }
    }

    /// Number of live sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether the store holds no sessions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Fetch the session for `conversation_id`, creating it if absent.
    ///
    /// Runs eviction first so a busy store converges back under capacity.
    pub fn session(&self, conversation_id: &str) -> Arc<ExecSession> {
        self.evict(conversation_id);
        let session = self
            .sessions
            .entry(conversation_id.to_string())
            .or_insert_with(|| Arc::new(ExecSession::new(conversation_id)))
            .clone();
        session.touch();
        session
    }

    /// Drop a conversation's session outright.
    pub fn remove(&self, conversation_id: &str) {
        let _ = self.sessions.remove(conversation_id);
    }

    fn evict(&self, incoming: &str) {
        let mut idle: Vec<(String, Duration)> = Vec::new();
        let mut expired: Vec<String> = Vec::new();
        for entry in &self.sessions {
            let session_idle = entry.value().idle();
            if session_idle >= self.ttl {
                expired.push(entry.key().clone());
            } else if entry.key() != incoming {
                idle.push((entry.key().clone(), session_idle));
            }
        }
        for key in &expired {
            let _ = self.sessions.remove(key);
        }
        if !expired.is_empty() {
            tracing::debug!(count = expired.len(), "evicted expired sandbox sessions");
        }

        // Room must exist for the lookup that triggered eviction, unless
        // that conversation already has a session.
        let reserve = usize::from(!self.sessions.contains_key(incoming));
        let mut over = (self.sessions.len() + reserve).saturating_sub(self.capacity);
        if over > 0 {
            idle.sort_by(|a, b| b.1.cmp(&a.1));
            for (key, _) in idle {
                if over == 0 {
                    break;
                }
                let _ = self.sessions.remove(&key);
                over -= 1;
                tracing::debug!(conversation_id = %key, "evicted sandbox session over capacity");
            }
        }
        metrics::gauge!("delver_sandbox_sessions").set(self.sessions.len() as f64);
    }

    /// Bind caller-provided variables into a conversation's namespace.
    ///
    /// Names must be valid identifiers without a leading underscore;
    /// offenders are skipped. Returns the names actually seeded.
    pub fn seed_variables(
        &self,
        conversation_id: &str,
        variables: serde_json::Map<String, serde_json::Value>,
    ) -> Vec<String> {
        let session = self.session(conversation_id);
        let mut namespace = session.namespace.lock();
        let mut seeded = Vec::new();
        for (name, value) in variables {
            if !valid_identifier(&name) {
                tracing::warn!(name = %name, "skipped invalid seed variable name");
                continue;
            }
            let _ = namespace.insert(name.clone(), Value::from_json(value));
            seeded.push(name);
        }
        seeded
    }
}

fn valid_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
