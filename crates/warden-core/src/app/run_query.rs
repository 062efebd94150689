//! RunQuery - Registry から候補 run を取得
//!
//! 1 回の query に per-call timeout をかけ、時間切れは
//! `RegistryError::Unavailable` として返します。リトライはしません。

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::domain::{RegistryError, RunFilter, RunRecord, ThresholdWindow};
use crate::ports::RunRegistry;

#[derive(Clone)]
pub struct RunQuery {
    registry: Arc<dyn RunRegistry>,
    timeout: Duration,
}

impl RunQuery {
    pub fn new(registry: Arc<dyn RunRegistry>, timeout: Duration) -> Self {
        Self { registry, timeout }
    }

    pub async fn find_runs(&self, filter: &RunFilter) -> Result<Vec<RunRecord>, RegistryError> {
        match tokio::time::timeout(self.timeout, self.registry.query_runs(filter)).await {
            Ok(result) => result,
            Err(_) => Err(RegistryError::unavailable(
                "query_runs",
                format!("no answer within {}s", self.timeout.as_secs_f64()),
            )),
        }
    }

    /// Candidates for `window` as of `now`.
    pub async fn scan(
        &self,
        window: &ThresholdWindow,
        now: DateTime<Utc>,
    ) -> Result<Vec<RunRecord>, RegistryError> {
        self.find_runs(&window.filter(now)).await
    }
}
