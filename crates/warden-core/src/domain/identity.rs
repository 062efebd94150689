//! Identity of the running watchdog invocation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::RunId;

/// Who "self" is for one invocation.
///
/// Captured once when the invocation starts and never changed afterwards:
/// self-exclusion and the late-start check both read it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchdogIdentity {
    run_id: RunId,
    scheduled_start_time: DateTime<Utc>,
}

impl WatchdogIdentity {
    pub fn new(run_id: RunId, scheduled_start_time: DateTime<Utc>) -> Self {
        Self {
            run_id,
            scheduled_start_time,
        }
    }

    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    pub fn scheduled_start_time(&self) -> DateTime<Utc> {
        self.scheduled_start_time
    }
}
