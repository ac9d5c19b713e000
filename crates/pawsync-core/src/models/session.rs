//! Sync session model

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// What caused a sync cycle to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncTrigger {
    ConnectivityRestored,
    Timer,
    Manual,
}

impl SyncTrigger {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ConnectivityRestored => "connectivity_restored",
            Self::Timer => "timer",
            Self::Manual => "manual",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Self {
        match value {
            "connectivity_restored" => Self::ConnectivityRestored,
            "timer" => Self::Timer,
            _ => Self::Manual,
        }
    }
}

/// How a cycle ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionOutcome {
    /// Pull, merge and push all ran
    Completed,
    /// Pull failed; cursor untouched, retried on the next trigger
    PullFailed,
    /// Cancelled at a state boundary
    Cancelled,
}

impl SessionOutcome {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::PullFailed => "pull_failed",
            Self::Cancelled => "cancelled",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "completed" => Some(Self::Completed),
            "pull_failed" => Some(Self::PullFailed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

/// One run of the sync engine, kept for observability only
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncSession {
    pub id: String,
    pub trigger: SyncTrigger,
    /// Unix ms
    pub started_at: i64,
    /// Unix ms, `None` while running
    pub completed_at: Option<i64>,
    pub pulled_count: u32,
    pub pushed_count: u32,
    pub failure_count: u32,
    pub outcome: Option<SessionOutcome>,
}

impl SyncSession {
    #[must_use]
    pub fn start(trigger: SyncTrigger) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            trigger,
            started_at: chrono::Utc::now().timestamp_millis(),
            completed_at: None,
            pulled_count: 0,
            pushed_count: 0,
            failure_count: 0,
            outcome: None,
        }
    }

    pub fn finish(&mut self, outcome: SessionOutcome) {
        self.completed_at = Some(chrono::Utc::now().timestamp_millis());
        self.outcome = Some(outcome);
    }

    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.outcome == Some(SessionOutcome::Completed) && self.failure_count == 0
    }
}

impl fmt::Display for SyncSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}] pulled={} pushed={} failures={} outcome={}",
            self.id,
            self.trigger.as_str(),
            self.pulled_count,
            self.pushed_count,
            self.failure_count,
            self.outcome.map_or("running", SessionOutcome::as_str)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_lifecycle() {
        let mut session = SyncSession::start(SyncTrigger::Manual);
        assert!(session.completed_at.is_none());
        assert!(!session.is_clean());

        session.finish(SessionOutcome::Completed);
        assert!(session.completed_at.is_some());
        assert!(session.is_clean());

        session.failure_count = 1;
        assert!(!session.is_clean());
    }

    #[test]
    fn test_trigger_parse_defaults_to_manual() {
        assert_eq!(SyncTrigger::parse("timer"), SyncTrigger::Timer);
        assert_eq!(SyncTrigger::parse("bogus"), SyncTrigger::Manual);
    }
}
