//! ReaperLoop - watchdog を一定間隔で起動する
//!
//! # フロー（tick ごと）
//! 1. `InvocationSource::next_invocation` で自分の run を用意
//! 2. `Reaper::invoke`
//! 3. `InvocationSource::finish_invocation` で結果を自分の run に反映
//!
//! 予定時刻は `first + k * interval` の名目値です。前の invocation が
//! 長引いて tick が遅れた場合、その遅れは late-start 判定にそのまま効きます。

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{info, warn};

use super::reaper::Reaper;
use crate::domain::{InvocationReport, WardenError};
use crate::ports::{Clock, InvocationSource};

/// Longest accepted interval between invocations.
pub const MAX_INTERVAL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

pub struct ReaperLoop {
    reaper: Arc<Reaper>,
    source: Arc<dyn InvocationSource>,
    clock: Arc<dyn Clock>,
}

impl ReaperLoop {
    pub fn new(
        reaper: Arc<Reaper>,
        source: Arc<dyn InvocationSource>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            reaper,
            source,
            clock,
        }
    }

    /// One invocation scheduled for `scheduled_at`.
    pub async fn run_once(
        &self,
        scheduled_at: DateTime<Utc>,
    ) -> Result<InvocationReport, WardenError> {
        let identity = self.source.next_invocation(scheduled_at).await?;
        let report = self.reaper.invoke(identity).await;
        self.source
            .finish_invocation(&identity, &report.outcome)
            .await?;
        Ok(report)
    }

    /// Tick every `interval` until `shutdown` flips to true (or its sender
    /// is dropped). Returns the number of invocations started.
    pub async fn run(
        &self,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<usize, WardenError> {
        if interval.is_zero() || interval > MAX_INTERVAL {
            return Err(WardenError::InvalidInterval { interval });
        }
        let step = chrono::Duration::from_std(interval)
            .map_err(|_| WardenError::InvalidInterval { interval })?;

        let mut ticker = tokio::time::interval(interval);
        let mut scheduled_at = self.clock.now();
        let mut started = 0usize;

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
                _ = ticker.tick() => {}
            }

            started += 1;
            match self.run_once(scheduled_at).await {
                Ok(report) => info!(
                    watchdog = %report.watchdog,
                    cancelled = report.cancelled(),
                    "invocation done"
                ),
                Err(err) => warn!(%scheduled_at, error = %err, "invocation could not run"),
            }

            let Some(next) = scheduled_at.checked_add_signed(step) else {
                warn!(%scheduled_at, "schedule left the representable time range; stopping");
                break;
            };
            scheduled_at = next;
        }
        Ok(started)
    }
}
