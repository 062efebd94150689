//! RunRegistry port - run の正本（source of truth）
//!
//! Registry はリモートのワークフロー実行サービスです。watchdog は
//! run を読むか、状態遷移をリクエストするだけで、ローカルには何も
//! キャッシュしません。
//!
//! # 設計原則
//! - `set_run_state` は同一 run への並行呼び出しに対して安全であること
//!   （accept / reject を Registry が決める）
//! - 「見つからない」はエラーではなく `Option::None`
//! - transport は実装側の関心事（HTTP, gRPC, in-memory ...）

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{LogLevel, RegistryError, RunFilter, RunId, RunRecord, RunState};

/// Registry's answer to a state transition request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionResult {
    pub accepted: bool,
    /// State of the run after the request, when the registry reports it.
    pub state: Option<RunState>,
}

impl TransitionResult {
    pub fn accepted(state: RunState) -> Self {
        Self {
            accepted: true,
            state: Some(state),
        }
    }

    pub fn rejected(state: Option<RunState>) -> Self {
        Self {
            accepted: false,
            state,
        }
    }
}

#[async_trait]
pub trait RunRegistry: Send + Sync {
    /// Runs matching `filter` (strictly before its cutoff). No ordering.
    async fn query_runs(&self, filter: &RunFilter) -> Result<Vec<RunRecord>, RegistryError>;

    /// Request a transition. `force` overrides the run's own guards, but the
    /// registry still decides whether the transition is legal.
    async fn set_run_state(
        &self,
        run_id: RunId,
        state: RunState,
        message: &str,
        force: bool,
    ) -> Result<TransitionResult, RegistryError>;

    /// Append an entry to a run's log.
    async fn append_log(
        &self,
        run_id: RunId,
        level: LogLevel,
        message: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<(), RegistryError>;

    /// Look up a single run.
    async fn read_run(&self, run_id: RunId) -> Result<Option<RunRecord>, RegistryError>;
}
