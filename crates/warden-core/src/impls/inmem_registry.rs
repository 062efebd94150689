//! InMemoryRunRegistry - 開発・テスト用の Registry
//!
//! # 役割
//! - RunRegistry の参照実装（状態遷移ルールは Registry 側が決める）
//! - 呼び出し記録（append_log / set_run_state / query_runs）
//! - 障害注入（query 失敗、遅延、audit 書き込み失敗）
//!
//! # 遷移ルール
//! - 終端状態からの遷移は拒否（同じ run の二重 cancel は accepted=false）
//! - RUNNING の cancel は force=true のときだけ受理
//! - 存在しない run への遷移は `RegistryError::RunNotFound`

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::domain::{
    FlowId, InvocationOutcome, LogLevel, RegistryError, RunFilter, RunId, RunRecord, RunState,
    WatchdogIdentity,
};
use crate::ports::{
    Clock, IdGenerator, InvocationSource, RunRegistry, TransitionResult, UlidGenerator,
};

/// One entry of a run's log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub level: LogLevel,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// A recorded `set_run_state` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionCall {
    pub run_id: RunId,
    pub target: RunState,
    pub message: String,
    pub force: bool,
    pub accepted: bool,
}

#[derive(Debug, Default)]
struct Faults {
    /// Every call fails with `Unavailable`.
    unavailable: bool,
    /// Queries whose filter includes one of these states fail.
    failing_query_states: HashSet<RunState>,
    query_delay: Option<Duration>,
    transition_delays: HashMap<RunId, Duration>,
    log_delays: HashMap<RunId, Duration>,
    failing_audit_runs: HashSet<RunId>,
    /// Rejections omit the run's current state.
    hide_rejected_state: bool,
}

struct RegistryState {
    runs: HashMap<RunId, RunRecord>,
    logs: HashMap<RunId, Vec<LogEntry>>,
    transitions: Vec<TransitionCall>,
    queries: Vec<RunFilter>,
    faults: Faults,
}

impl RegistryState {
    fn new() -> Self {
        Self {
            runs: HashMap::new(),
            logs: HashMap::new(),
            transitions: Vec::new(),
            queries: Vec::new(),
            faults: Faults::default(),
        }
    }

    fn check_available(&self, operation: &'static str) -> Result<(), RegistryError> {
        if self.faults.unavailable {
            return Err(RegistryError::unavailable(operation, "injected outage"));
        }
        Ok(())
    }

    /// Apply the transition rules. Returns the registry's verdict.
    fn transition(
        &mut self,
        run_id: RunId,
        target: RunState,
        force: bool,
        now: DateTime<Utc>,
    ) -> Result<TransitionResult, RegistryError> {
        let record = self
            .runs
            .get_mut(&run_id)
            .ok_or(RegistryError::RunNotFound(run_id))?;
        let current = record.state;

        let legal = match (current, target) {
            (from, _) if from.is_terminal() => false,
            (from, to) if from == to => false,
            (RunState::Scheduled, RunState::Cancelled) => true,
            (RunState::Running, RunState::Cancelled) => force,
            (RunState::Scheduled, RunState::Running) => true,
            (RunState::Running, to) => to.is_terminal(),
            _ => false,
        };

        if !legal {
            let state = (!self.faults.hide_rejected_state).then_some(current);
            return Ok(TransitionResult::rejected(state));
        }

        if target == RunState::Running {
            record.actual_start_time = Some(now);
        }
        record.state = target;
        Ok(TransitionResult::accepted(target))
    }
}

/// In-memory registry.
///
/// 内部ロックは各メソッドの中で完結します（ロックを保持したまま await しない）。
/// 注入された遅延はロックを外してから sleep します。
pub struct InMemoryRunRegistry {
    state: Arc<Mutex<RegistryState>>,
    clock: Arc<dyn Clock>,
    ids: Box<dyn IdGenerator>,
    watchdog_flow: FlowId,
}

impl InMemoryRunRegistry {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        let ids: Box<dyn IdGenerator> = Box::new(UlidGenerator::new(Arc::clone(&clock)));
        Self::with_id_generator(clock, ids)
    }

    pub fn with_id_generator(clock: Arc<dyn Clock>, ids: Box<dyn IdGenerator>) -> Self {
        let watchdog_flow = ids.generate_flow_id();
        Self {
            state: Arc::new(Mutex::new(RegistryState::new())),
            clock,
            ids,
            watchdog_flow,
        }
    }

    /// Flow id under which watchdog invocations are registered.
    pub fn watchdog_flow(&self) -> FlowId {
        self.watchdog_flow
    }

    pub fn new_flow_id(&self) -> FlowId {
        self.ids.generate_flow_id()
    }

    /// Insert (or replace) a run as-is, e.g. from a snapshot.
    pub async fn insert(&self, record: RunRecord) -> RunId {
        let id = record.id;
        self.state.lock().await.runs.insert(id, record);
        id
    }

    /// Create a SCHEDULED run with a registry-assigned id.
    pub async fn schedule_run(
        &self,
        flow_id: FlowId,
        name: impl Into<String>,
        scheduled_start_time: DateTime<Utc>,
    ) -> RunId {
        let record = RunRecord {
            id: self.ids.generate_run_id(),
            flow_id,
            name: name.into(),
            state: RunState::Scheduled,
            scheduled_start_time: Some(scheduled_start_time),
            actual_start_time: None,
        };
        self.insert(record).await
    }

    /// Create a RUNNING run that started at `started_at`.
    pub async fn start_run(
        &self,
        flow_id: FlowId,
        name: impl Into<String>,
        scheduled_start_time: DateTime<Utc>,
        started_at: DateTime<Utc>,
    ) -> RunId {
        let record = RunRecord {
            id: self.ids.generate_run_id(),
            flow_id,
            name: name.into(),
            state: RunState::Running,
            scheduled_start_time: Some(scheduled_start_time),
            actual_start_time: Some(started_at),
        };
        self.insert(record).await
    }

    pub async fn run(&self, run_id: RunId) -> Option<RunRecord> {
        self.state.lock().await.runs.get(&run_id).cloned()
    }

    pub async fn runs(&self) -> Vec<RunRecord> {
        self.state.lock().await.runs.values().cloned().collect()
    }

    // ---- inspection ----

    pub async fn logs_for(&self, run_id: RunId) -> Vec<LogEntry> {
        let state = self.state.lock().await;
        state.logs.get(&run_id).cloned().unwrap_or_default()
    }

    pub async fn transitions(&self) -> Vec<TransitionCall> {
        self.state.lock().await.transitions.clone()
    }

    pub async fn transitions_for(&self, run_id: RunId) -> Vec<TransitionCall> {
        let state = self.state.lock().await;
        state
            .transitions
            .iter()
            .filter(|t| t.run_id == run_id)
            .cloned()
            .collect()
    }

    pub async fn queries(&self) -> Vec<RunFilter> {
        self.state.lock().await.queries.clone()
    }

    // ---- fault injection ----

    pub async fn set_unavailable(&self, unavailable: bool) {
        self.state.lock().await.faults.unavailable = unavailable;
    }

    /// Queries whose state filter includes `state` fail with `Unavailable`.
    pub async fn fail_queries_for(&self, state: RunState) {
        self.state
            .lock()
            .await
            .faults
            .failing_query_states
            .insert(state);
    }

    pub async fn delay_queries(&self, delay: Duration) {
        self.state.lock().await.faults.query_delay = Some(delay);
    }

    /// `set_run_state` for `run_id` sleeps for `delay` before answering.
    pub async fn delay_transitions_for(&self, run_id: RunId, delay: Duration) {
        self.state
            .lock()
            .await
            .faults
            .transition_delays
            .insert(run_id, delay);
    }

    /// `append_log` for `run_id` sleeps for `delay` before writing.
    pub async fn delay_logs_for(&self, run_id: RunId, delay: Duration) {
        self.state
            .lock()
            .await
            .faults
            .log_delays
            .insert(run_id, delay);
    }

    /// Rejected transitions answer without the run's current state.
    pub async fn hide_rejected_state(&self, hide: bool) {
        self.state.lock().await.faults.hide_rejected_state = hide;
    }

    /// `append_log` for `run_id` fails with `Unavailable`.
    pub async fn fail_audit_for(&self, run_id: RunId) {
        self.state
            .lock()
            .await
            .faults
            .failing_audit_runs
            .insert(run_id);
    }
}

#[async_trait]
impl RunRegistry for InMemoryRunRegistry {
    async fn query_runs(&self, filter: &RunFilter) -> Result<Vec<RunRecord>, RegistryError> {
        let delay = {
            let mut state = self.state.lock().await;
            state.queries.push(filter.clone());
            state.check_available("query_runs")?;
            if filter
                .states()
                .iter()
                .any(|s| state.faults.failing_query_states.contains(s))
            {
                return Err(RegistryError::unavailable(
                    "query_runs",
                    "injected query failure",
                ));
            }
            state.faults.query_delay
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let state = self.state.lock().await;
        Ok(state
            .runs
            .values()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect())
    }

    async fn set_run_state(
        &self,
        run_id: RunId,
        target: RunState,
        message: &str,
        force: bool,
    ) -> Result<TransitionResult, RegistryError> {
        let delay = {
            let state = self.state.lock().await;
            state.check_available("set_run_state")?;
            state.faults.transition_delays.get(&run_id).copied()
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let now = self.clock.now();
        let mut state = self.state.lock().await;
        let result = state.transition(run_id, target, force, now)?;
        state.transitions.push(TransitionCall {
            run_id,
            target,
            message: message.to_string(),
            force,
            accepted: result.accepted,
        });
        Ok(result)
    }

    async fn append_log(
        &self,
        run_id: RunId,
        level: LogLevel,
        message: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<(), RegistryError> {
        let delay = {
            let state = self.state.lock().await;
            state.check_available("append_log")?;
            state.faults.log_delays.get(&run_id).copied()
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock().await;
        if state.faults.failing_audit_runs.contains(&run_id) {
            return Err(RegistryError::unavailable(
                "append_log",
                "injected log failure",
            ));
        }
        state.logs.entry(run_id).or_default().push(LogEntry {
            level,
            message: message.to_string(),
            timestamp,
        });
        Ok(())
    }

    async fn read_run(&self, run_id: RunId) -> Result<Option<RunRecord>, RegistryError> {
        let state = self.state.lock().await;
        state.check_available("read_run")?;
        Ok(state.runs.get(&run_id).cloned())
    }
}

#[async_trait]
impl InvocationSource for InMemoryRunRegistry {
    async fn next_invocation(
        &self,
        scheduled_at: DateTime<Utc>,
    ) -> Result<WatchdogIdentity, RegistryError> {
        self.state.lock().await.check_available("next_invocation")?;
        let started_at = self.clock.now();
        let run_id = self
            .start_run(self.watchdog_flow, "watchdog", scheduled_at, started_at)
            .await;
        Ok(WatchdogIdentity::new(run_id, scheduled_at))
    }

    async fn finish_invocation(
        &self,
        identity: &WatchdogIdentity,
        outcome: &InvocationOutcome,
    ) -> Result<(), RegistryError> {
        let (target, message) = match outcome {
            InvocationOutcome::Completed => (RunState::Completed, "watchdog finished"),
            // 自己退去済み: 既に CANCELLED
            InvocationOutcome::SelfEvicted { .. } => return Ok(()),
            InvocationOutcome::BudgetExceeded { .. } => {
                (RunState::Cancelled, "cancelled: exceeded time budget")
            }
            InvocationOutcome::RegistryUnavailable { .. } => {
                (RunState::Failed, "registry unavailable during scan")
            }
        };
        self.set_run_state(identity.run_id(), target, message, true)
            .await
            .map(|_| ())
    }
}
