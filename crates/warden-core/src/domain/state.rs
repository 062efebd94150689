//! State - run の状態と、ログレベル

use std::fmt;

use serde::{Deserialize, Serialize};

/// RunState は Registry 上の run の状態
///
/// # 状態遷移（Registry 側が権威）
/// - Scheduled -> Running -> Completed / Failed / Crashed
/// - Scheduled / Running -> Cancelled
///
/// Completed, Failed, Cancelled, Crashed は終端状態。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunState {
    Scheduled,
    Running,
    Completed,
    Failed,
    Cancelled,
    Crashed,
}

impl RunState {
    /// Is this a terminal state (no further transitions)?
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunState::Completed | RunState::Failed | RunState::Cancelled | RunState::Crashed
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RunState::Scheduled => "SCHEDULED",
            RunState::Running => "RUNNING",
            RunState::Completed => "COMPLETED",
            RunState::Failed => "FAILED",
            RunState::Cancelled => "CANCELLED",
            RunState::Crashed => "CRASHED",
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Level of an entry appended to a run's log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}
