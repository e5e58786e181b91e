use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Caller identity resolved by the authentication layer upstream of this
/// core. All quota and data scoping keys off `org_id`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthContext {
    pub org_id: String,
    pub user_id: String,
    pub role: Role,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Manager,
    Analyst,
    Member,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Manager => "manager",
            Self::Analyst => "analyst",
            Self::Member => "member",
        }
    }

    /// Unknown role strings resolve to the least-privileged role.
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "admin" => Self::Admin,
            "manager" => Self::Manager,
            "analyst" => Self::Analyst,
            _ => Self::Member,
        }
    }
}

/// Cooperative cancellation flag shared between the turn's worker and
/// whoever owns the session. Cancelling suppresses the final response;
/// quota already recorded is never rolled back.
#[derive(Clone, Debug, Default)]
pub struct CancellationFlag {
    cancelled: Arc<AtomicBool>,
}

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Per-turn execution state. Created once per inbound message, owned
/// exclusively by that turn's task, discarded at turn end.
#[derive(Clone, Debug)]
pub struct ExecutionContext {
    pub auth: AuthContext,
    pub session_id: String,
    pub message_id: String,
    pub token_budget: u64,
    pub tokens_used: u64,
    pub max_tool_calls: u32,
    pub tool_calls_made: u32,
    pub timeout: Duration,
    pub started_at: DateTime<Utc>,
    pub cancellation: CancellationFlag,
}

impl ExecutionContext {
    pub fn new(auth: AuthContext, session_id: impl Into<String>, message_id: impl Into<String>) -> Self {
        Self {
            auth,
            session_id: session_id.into(),
            message_id: message_id.into(),
            token_budget: 10_000,
            tokens_used: 0,
            max_tool_calls: 10,
            tool_calls_made: 0,
            timeout: Duration::from_secs(60),
            started_at: Utc::now(),
            cancellation: CancellationFlag::new(),
        }
    }

    pub fn install_budget(&mut self, agent_budget: u64) {
        self.token_budget = agent_budget;
    }

    pub fn consume_tokens(&mut self, tokens: u64) {
        self.tokens_used = self.tokens_used.saturating_add(tokens);
    }

    pub fn budget_exhausted(&self) -> bool {
        self.tokens_used >= self.token_budget
    }

    pub fn deadline_exceeded(&self) -> bool {
        let elapsed = Utc::now().signed_duration_since(self.started_at);
        elapsed.to_std().map(|e| e >= self.timeout).unwrap_or(false)
    }

    pub fn register_tool_call(&mut self) {
        self.tool_calls_made = self.tool_calls_made.saturating_add(1);
    }

    pub fn tool_calls_exhausted(&self) -> bool {
        self.tool_calls_made >= self.max_tool_calls
    }
}
