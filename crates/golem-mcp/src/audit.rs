//! Audit log: a bounded, append-only ring of invocation/denial records
//! with top-level argument redaction (§4.7).

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Default ring capacity.
pub const DEFAULT_CAPACITY: usize = 10_000;

/// Default number of entries returned by [`AuditLog::recent`] when no count
/// is given.
pub const DEFAULT_RECENT_COUNT: usize = 50;

const REDACTED_KEY_SUBSTRINGS: &[&str] = &[
    "password",
    "secret",
    "token",
    "api_key",
    "apikey",
    "authorization",
];

/// Outcome of an invocation, when known.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvocationResult {
    /// The tool call completed without error.
    Success,
    /// The tool call failed or was flagged as an error by the server.
    Failure,
}

/// What an audit entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditAction {
    /// A tool invocation was attempted.
    Invoke,
    /// A tool invocation was denied by the permission guard.
    Deny,
    /// An unrecoverable error occurred while processing the request.
    Error,
}

/// A single immutable audit record (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    /// When the event occurred.
    pub timestamp: DateTime<Utc>,
    /// Server the event concerns.
    pub server: String,
    /// Tool the event concerns.
    pub tool: String,
    /// What kind of event this is.
    pub action: AuditAction,
    /// Redacted arguments, if recorded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Value>,
    /// Invocation outcome, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<InvocationResult>,
    /// Human-readable reason, for denials.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Wall-clock duration of the call, in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

/// Redact sensitive top-level argument keys (§4.7). Redaction is shallow:
/// only top-level keys are inspected.
#[must_use]
pub fn redact_arguments(args: &Value) -> Value {
    let Value::Object(map) = args else {
        return args.clone();
    };
    let mut redacted = serde_json::Map::new();
    for (key, value) in map {
        let lower = key.to_lowercase();
        if REDACTED_KEY_SUBSTRINGS.iter().any(|s| lower.contains(s)) {
            redacted.insert(key.clone(), Value::String("[REDACTED]".to_string()));
        } else {
            redacted.insert(key.clone(), value.clone());
        }
    }
    Value::Object(redacted)
}

/// A bounded, append-only ring buffer of [`AuditEntry`] records.
#[derive(Debug)]
pub struct AuditLog {
    capacity: usize,
    entries: VecDeque<AuditEntry>,
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl AuditLog {
    /// A log with the given capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: VecDeque::new(),
        }
    }

    /// Append an entry, evicting the oldest entries if over capacity.
    pub fn record(&mut self, entry: AuditEntry) {
        self.entries.push_back(entry);
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
    }

    /// Record a tool invocation, redacting `arguments` first.
    pub fn log_invocation(
        &mut self,
        server: impl Into<String>,
        tool: impl Into<String>,
        arguments: Option<Value>,
        result: Option<InvocationResult>,
        duration_ms: Option<u64>,
    ) {
        self.record(AuditEntry {
            timestamp: Utc::now(),
            server: server.into(),
            tool: tool.into(),
            action: AuditAction::Invoke,
            arguments: arguments.map(|a| redact_arguments(&a)),
            result,
            reason: None,
            duration_ms,
        });
    }

    /// Record a permission denial.
    pub fn log_denial(&mut self, server: impl Into<String>, tool: impl Into<String>, reason: impl Into<String>) {
        self.record(AuditEntry {
            timestamp: Utc::now(),
            server: server.into(),
            tool: tool.into(),
            action: AuditAction::Deny,
            arguments: None,
            result: None,
            reason: Some(reason.into()),
            duration_ms: None,
        });
    }

    /// The last `count` entries (default 50) in insertion order.
    #[must_use]
    pub fn recent(&self, count: Option<usize>) -> Vec<AuditEntry> {
        let count = count.unwrap_or(DEFAULT_RECENT_COUNT);
        let skip = self.entries.len().saturating_sub(count);
        self.entries.iter().skip(skip).cloned().collect()
    }

    /// All entries recorded for a given server, in insertion order.
    #[must_use]
    pub fn for_server(&self, name: &str) -> Vec<AuditEntry> {
        self.entries.iter().filter(|e| e.server == name).cloned().collect()
    }

    /// Current number of stored entries.
    #[must_use]
    pub fn count(&self) -> usize {
        self.entries.len()
    }
}
