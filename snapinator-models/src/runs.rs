use std::{collections::VecDeque, fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a task's execution slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    #[default]
    Idle,
    Running,
    Succeeded,
    Failed,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunStatus::Idle => "idle",
            RunStatus::Running => "running",
            RunStatus::Succeeded => "succeeded",
            RunStatus::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "idle" => Ok(RunStatus::Idle),
            "running" => Ok(RunStatus::Running),
            "succeeded" => Ok(RunStatus::Succeeded),
            "failed" => Ok(RunStatus::Failed),
            other => Err(format!("unknown run status: {other}")),
        }
    }
}

/// What caused a run to be admitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunTrigger {
    #[default]
    Scheduled,
    Manual,
}

impl fmt::Display for RunTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunTrigger::Scheduled => "scheduled",
            RunTrigger::Manual => "manual",
        };
        write!(f, "{s}")
    }
}

/// Final result of one admitted run.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Succeeded { artifact: String },
    Failed { error: String },
}

impl RunOutcome {
    pub fn failed(error: impl Into<String>) -> Self {
        RunOutcome::Failed {
            error: error.into(),
        }
    }

    pub fn status(&self) -> RunStatus {
        match self {
            RunOutcome::Succeeded { .. } => RunStatus::Succeeded,
            RunOutcome::Failed { .. } => RunStatus::Failed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub status: RunStatus,
    #[serde(default)]
    pub trigger: RunTrigger,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RunRecord {
    pub fn duration_ms(&self) -> i64 {
        (self.finished_at - self.started_at).num_milliseconds()
    }
}

/// Runtime state of a single task, owned by the run coordinator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunState {
    pub status: RunStatus,
    #[serde(default)]
    pub last_run_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub next_run_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_error: Option<String>,
    #[serde(default)]
    pub history: VecDeque<RunRecord>,
}

impl RunState {
    pub fn last_record(&self) -> Option<&RunRecord> {
        self.history.back()
    }

    /// Appends `record`, dropping the oldest entries beyond `limit`.
    pub fn push_record(&mut self, record: RunRecord, limit: usize) {
        self.history.push_back(record);
        while self.history.len() > limit.max(1) {
            self.history.pop_front();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(minute: u32) -> RunRecord {
        let at = DateTime::parse_from_rfc3339(&format!("2024-05-01T10:{minute:02}:00Z"))
            .unwrap()
            .with_timezone(&Utc);
        RunRecord {
            started_at: at,
            finished_at: at,
            status: RunStatus::Succeeded,
            trigger: RunTrigger::Scheduled,
            artifact: Some(format!("/tmp/{minute}.png")),
            error: None,
        }
    }

    #[test]
    fn history_evicts_oldest_first() {
        let mut state = RunState::default();
        for minute in 0..5 {
            state.push_record(record(minute), 3);
        }
        assert_eq!(state.history.len(), 3);
        assert_eq!(state.history.front(), Some(&record(2)));
        assert_eq!(state.last_record(), Some(&record(4)));
    }

    #[test]
    fn status_parses_its_own_display() {
        for status in [
            RunStatus::Idle,
            RunStatus::Running,
            RunStatus::Succeeded,
            RunStatus::Failed,
        ] {
            assert_eq!(status.to_string().parse::<RunStatus>(), Ok(status));
        }
        assert!("paused".parse::<RunStatus>().is_err());
    }

    #[test]
    fn trigger_display_matches_its_serialized_name() {
        for trigger in [RunTrigger::Scheduled, RunTrigger::Manual] {
            let json = serde_json::to_string(&trigger).unwrap();
            assert_eq!(json, format!("\"{trigger}\""));
        }
        assert_eq!(RunTrigger::Manual.to_string(), "manual");
    }
}
