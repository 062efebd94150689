//! Reaper - 1 回の watchdog invocation を実行
//!
//! # フロー
//! ```text
//! SELF_CHECK → late:    SELF_CANCEL
//!            → on time: STALE_SCAN → STALE_CANCEL → LONGRUN_SCAN → LONGRUN_CANCEL
//! ```
//!
//! - 全体を `overall_timeout` で制限（超えたら残りの phase は実行しない）
//! - deadline を過ぎたら新しい cancel は dispatch しない
//! - 自分の run ログへの書き込みも deadline の内側に収める
//! - query の失敗はその時点で invocation を終了（完了済みの phase は有効）
//! - cancel は scan ごとに並行実行し、全件の解決を待ってから次へ進む

use std::sync::Arc;

use tokio::time::Instant;

use super::canceller::Canceller;
use super::classifier;
use super::run_query::RunQuery;
use super::self_filter::exclude_self;
use crate::config::ReaperConfig;
use crate::domain::{
    InvocationOutcome, InvocationReport, LogLevel, Phase, ReaperEvent, RunId, ScanReport,
    ThresholdWindow, WatchdogIdentity,
};
use crate::ports::{Clock, EventSink, RunRegistry};

const SELF_CANCEL_REASON: &str = "watchdog started late; a timely invocation takes over";

/// The reaper. Stateless between invocations; build it with `ReaperBuilder`.
pub struct Reaper {
    pub(crate) registry: Arc<dyn RunRegistry>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) events: Arc<dyn EventSink>,
    pub(crate) config: ReaperConfig,
    pub(crate) stale: ThresholdWindow,
    pub(crate) long_running: ThresholdWindow,
}

/// Per-invocation collaborators.
struct Invocation {
    identity: WatchdogIdentity,
    canceller: Canceller,
    query: RunQuery,
    deadline: Instant,
    scans: Vec<ScanReport>,
}

impl Reaper {
    pub fn config(&self) -> &ReaperConfig {
        &self.config
    }

    /// Run one invocation on behalf of `identity`.
    pub async fn invoke(&self, identity: WatchdogIdentity) -> InvocationReport {
        let watchdog = identity.run_id();
        let mut invocation = Invocation {
            identity,
            canceller: Canceller::new(
                Arc::clone(&self.registry),
                Arc::clone(&self.clock),
                Arc::clone(&self.events),
                watchdog,
                self.config.per_cancel_timeout(),
            ),
            query: RunQuery::new(Arc::clone(&self.registry), self.config.per_query_timeout()),
            deadline: Instant::now() + self.config.overall_timeout(),
            scans: Vec::new(),
        };

        let outcome = self.run_phases(&mut invocation).await;
        let report = InvocationReport {
            watchdog,
            outcome,
            scans: invocation.scans,
        };

        let cancelled = report.cancelled();
        self.events.emit(ReaperEvent::InvocationFinished {
            watchdog,
            outcome: report.outcome.clone(),
            cancelled,
        });
        let (level, summary) = match &report.outcome {
            InvocationOutcome::Completed => (
                LogLevel::Info,
                format!("watchdog finished; {cancelled} runs cancelled"),
            ),
            InvocationOutcome::SelfEvicted { .. } => {
                (LogLevel::Warning, "cancelled: watchdog was stale".to_string())
            }
            InvocationOutcome::BudgetExceeded { phase } => (
                LogLevel::Warning,
                format!("cancelled: exceeded time budget during {phase}"),
            ),
            InvocationOutcome::RegistryUnavailable { phase, error } => (
                LogLevel::Error,
                format!("stopped during {phase}: {error}"),
            ),
        };
        // 終了後の記録なので deadline ではなく per-query timeout だけで制限
        let limit = Instant::now() + self.config.per_query_timeout();
        self.note(watchdog, level, &summary, limit).await;
        report
    }

    async fn run_phases(&self, inv: &mut Invocation) -> InvocationOutcome {
        let watchdog = inv.identity.run_id();

        // SELF_CHECK
        let now = self.clock.now();
        let lateness = classifier::lateness(&inv.identity, now);
        self.events.emit(ReaperEvent::InvocationStarted {
            watchdog,
            scheduled_start_time: inv.identity.scheduled_start_time(),
            lateness,
        });

        if classifier::is_late(&inv.identity, now, self.config.grace()) {
            self.events.emit(ReaperEvent::SelfLate {
                watchdog,
                lateness,
                grace: self.config.grace(),
            });
            self.note(
                watchdog,
                LogLevel::Warning,
                &format!(
                    "watchdog started {} minutes late; cancelling itself",
                    lateness.num_minutes()
                ),
                inv.deadline,
            )
            .await;

            // SELF_CANCEL
            if Instant::now() >= inv.deadline {
                return self.budget_exceeded(Phase::SelfCancel);
            }
            let cancel = inv.canceller.cancel(watchdog, SELF_CANCEL_REASON);
            return match tokio::time::timeout_at(inv.deadline, cancel).await {
                Ok(cancellation) => InvocationOutcome::SelfEvicted { cancellation },
                Err(_) => self.budget_exceeded(Phase::SelfCancel),
            };
        }

        for window in [self.stale, self.long_running] {
            if let Err(outcome) = self.scan_and_cancel(inv, window).await {
                return outcome;
            }
        }
        InvocationOutcome::Completed
    }

    async fn scan_and_cancel(
        &self,
        inv: &mut Invocation,
        window: ThresholdWindow,
    ) -> Result<(), InvocationOutcome> {
        let kind = window.kind;
        let watchdog = inv.identity.run_id();
        let now = self.clock.now();
        let cutoff = window.cutoff(now);
        self.events.emit(ReaperEvent::ScanStarted { kind, cutoff });

        // *_SCAN
        let scan = inv.query.scan(&window, now);
        let found = match tokio::time::timeout_at(inv.deadline, scan).await {
            Err(_) => return Err(self.budget_exceeded(Phase::scan(kind))),
            Ok(Err(error)) => {
                self.events.emit(ReaperEvent::ScanFailed {
                    kind,
                    error: error.clone(),
                });
                return Err(InvocationOutcome::RegistryUnavailable {
                    phase: Phase::scan(kind),
                    error: error.to_string(),
                });
            }
            Ok(Ok(found)) => found,
        };

        let total = found.len();
        let filtered = exclude_self(found, watchdog);
        let candidates: Vec<RunId> = filtered.kept.iter().map(|r| r.id).collect();
        self.events.emit(ReaperEvent::ScanCompleted {
            kind,
            found: total,
            self_excluded: filtered.excluded,
            candidates: candidates.clone(),
        });

        let listing: Vec<String> = filtered
            .kept
            .iter()
            .map(|r| format!("{} ({})", r.name, r.id))
            .collect();
        self.note(
            watchdog,
            LogLevel::Info,
            &format!(
                "found {} {kind} runs (> {} hours)\n {}",
                candidates.len(),
                window.threshold_hours,
                listing.join("\n ")
            ),
            inv.deadline,
        )
        .await;

        // *_CANCEL
        if Instant::now() >= inv.deadline {
            inv.scans.push(ScanReport {
                kind,
                cutoff,
                found: total,
                self_excluded: filtered.excluded,
                outcomes: Vec::new(),
                abandoned: 0,
            });
            return Err(self.budget_exceeded(Phase::cancel(kind)));
        }
        let reason = kind.cancel_reason(window.threshold_hours);
        let fan_out = inv
            .canceller
            .cancel_all(Some(kind), candidates, &reason, inv.deadline)
            .await;
        let abandoned = fan_out.abandoned;
        inv.scans.push(ScanReport {
            kind,
            cutoff,
            found: total,
            self_excluded: filtered.excluded,
            outcomes: fan_out.outcomes,
            abandoned,
        });

        if abandoned > 0 {
            return Err(self.budget_exceeded(Phase::cancel(kind)));
        }
        Ok(())
    }

    fn budget_exceeded(&self, phase: Phase) -> InvocationOutcome {
        self.events.emit(ReaperEvent::BudgetExceeded {
            phase,
            budget: self.config.overall_timeout(),
        });
        InvocationOutcome::BudgetExceeded { phase }
    }

    /// Best-effort entry in the watchdog's own run log, given up at the
    /// earlier of `deadline` and the per-query timeout.
    async fn note(&self, watchdog: RunId, level: LogLevel, message: &str, deadline: Instant) {
        let limit = deadline.min(Instant::now() + self.config.per_query_timeout());
        let append = self
            .registry
            .append_log(watchdog, level, message, self.clock.now());
        match tokio::time::timeout_at(limit, append).await {
            Ok(Ok(())) => {}
            Ok(Err(error)) => self.events.emit(ReaperEvent::SelfLogFailed { error }),
            Err(_) => self.events.emit(ReaperEvent::SelfLogFailed {
                error: crate::domain::RegistryError::unavailable(
                    "append_log",
                    "timed out writing own run log",
                ),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::ReaperBuilder;
    use crate::domain::{Disposition, RunRecord, RunState, ScanKind};
    use crate::impls::{InMemoryRunRegistry, RecordingEventSink};
    use crate::ports::{FixedClock, InvocationSource};
    use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
    use rstest::rstest;
    use std::time::Duration;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    struct Fixture {
        registry: Arc<InMemoryRunRegistry>,
        events: Arc<RecordingEventSink>,
        reaper: Reaper,
    }

    fn fixture(config: ReaperConfig) -> Fixture {
        let clock: Arc<dyn Clock> = Arc::new(FixedClock::new(t0()));
        let registry = Arc::new(InMemoryRunRegistry::new(Arc::clone(&clock)));
        let events = Arc::new(RecordingEventSink::new());
        let reaper = ReaperBuilder::new()
            .registry(registry.clone())
            .clock(clock)
            .events(events.clone())
            .config(config)
            .build()
            .unwrap();
        Fixture {
            registry,
            events,
            reaper,
        }
    }

    #[tokio::test]
    async fn stale_run_is_cancelled_with_audit_trail() {
        let f = fixture(ReaperConfig::default());
        let flow = f.registry.new_flow_id();
        let stale = f
            .registry
            .schedule_run(flow, "nightly", t0() - ChronoDuration::hours(13))
            .await;
        let fresh = f
            .registry
            .schedule_run(flow, "hourly", t0() - ChronoDuration::hours(1))
            .await;
        let me = f.registry.next_invocation(t0()).await.unwrap();

        let report = f.reaper.invoke(me).await;

        assert_eq!(report.outcome, InvocationOutcome::Completed);
        let scan = report.scan(ScanKind::Stale).unwrap();
        assert_eq!(scan.found, 1);
        assert_eq!(scan.accepted(), 1);
        assert_eq!(report.cancelled(), 1);

        assert_eq!(f.registry.logs_for(stale).await.len(), 2);
        let transitions = f.registry.transitions_for(stale).await;
        assert_eq!(transitions.len(), 1);
        assert!(transitions[0].accepted);
        assert_eq!(
            transitions[0].message,
            "scheduled run did not start within 12 hours"
        );
        assert_eq!(
            f.registry.run(fresh).await.unwrap().state,
            RunState::Scheduled
        );
    }

    #[tokio::test]
    async fn own_run_is_never_cancelled() {
        let f = fixture(ReaperConfig::default());
        let flow = f.registry.new_flow_id();
        let other = f
            .registry
            .start_run(
                flow,
                "etl",
                t0() - ChronoDuration::hours(3),
                t0() - ChronoDuration::hours(3),
            )
            .await;
        let own = f
            .registry
            .insert(RunRecord {
                id: RunId::from_ulid(ulid::Ulid::new()),
                flow_id: f.registry.watchdog_flow(),
                name: "watchdog".to_string(),
                state: RunState::Running,
                scheduled_start_time: Some(t0()),
                actual_start_time: Some(t0() - ChronoDuration::hours(2)),
            })
            .await;

        let report = f.reaper.invoke(WatchdogIdentity::new(own, t0())).await;

        let scan = report.scan(ScanKind::LongRunning).unwrap();
        assert_eq!(scan.found, 2);
        assert_eq!(scan.self_excluded, 1);
        assert_eq!(scan.outcomes.len(), 1);
        assert_eq!(scan.outcomes[0].run_id(), other);
        assert!(f.registry.transitions_for(own).await.is_empty());
        assert_eq!(f.registry.run(own).await.unwrap().state, RunState::Running);
    }

    #[tokio::test]
    async fn late_watchdog_cancels_itself_without_scanning() {
        let f = fixture(ReaperConfig::default());
        let flow = f.registry.new_flow_id();
        let stale = f
            .registry
            .schedule_run(flow, "nightly", t0() - ChronoDuration::hours(13))
            .await;
        let me = f
            .registry
            .next_invocation(t0() - ChronoDuration::minutes(45))
            .await
            .unwrap();

        let report = f.reaper.invoke(me).await;

        match &report.outcome {
            InvocationOutcome::SelfEvicted { cancellation } => {
                assert_eq!(cancellation.run_id(), me.run_id());
                assert_eq!(cancellation.disposition(), &Disposition::Accepted);
            }
            other => panic!("expected self eviction, got {other:?}"),
        }
        assert!(report.scans.is_empty());
        assert!(f.registry.queries().await.is_empty());
        assert_eq!(
            f.registry.run(stale).await.unwrap().state,
            RunState::Scheduled
        );
        assert_eq!(
            f.registry.run(me.run_id()).await.unwrap().state,
            RunState::Cancelled
        );
        assert!(f
            .events
            .events()
            .iter()
            .any(|e| matches!(e, ReaperEvent::SelfLate { .. })));
    }

    #[rstest]
    #[case::well_within_grace(10, false)]
    #[case::one_minute_short(29, false)]
    #[case::exactly_grace(30, true)]
    #[case::past_grace(31, true)]
    #[tokio::test]
    async fn grace_boundary_decides_self_eviction(
        #[case] minutes_late: i64,
        #[case] evicted: bool,
    ) {
        let f = fixture(ReaperConfig::default());
        let me = f
            .registry
            .next_invocation(t0() - ChronoDuration::minutes(minutes_late))
            .await
            .unwrap();

        let report = f.reaper.invoke(me).await;

        assert_eq!(
            matches!(report.outcome, InvocationOutcome::SelfEvicted { .. }),
            evicted
        );
    }

    #[tokio::test]
    async fn query_failure_keeps_completed_stale_phase() {
        let f = fixture(ReaperConfig::default());
        let flow = f.registry.new_flow_id();
        let stale = f
            .registry
            .schedule_run(flow, "nightly", t0() - ChronoDuration::hours(13))
            .await;
        f.registry.fail_queries_for(RunState::Running).await;
        let me = f.registry.next_invocation(t0()).await.unwrap();

        let report = f.reaper.invoke(me).await;

        assert!(matches!(
            report.outcome,
            InvocationOutcome::RegistryUnavailable {
                phase: Phase::LongRunScan,
                ..
            }
        ));
        assert_eq!(report.scan(ScanKind::Stale).unwrap().accepted(), 1);
        assert!(report.scan(ScanKind::LongRunning).is_none());
        assert_eq!(
            f.registry.run(stale).await.unwrap().state,
            RunState::Cancelled
        );
    }

    #[tokio::test(start_paused = true)]
    async fn slow_query_counts_as_unavailable() {
        let f = fixture(ReaperConfig::default());
        f.registry.delay_queries(Duration::from_secs(40)).await;
        let me = f.registry.next_invocation(t0()).await.unwrap();

        let report = f.reaper.invoke(me).await;

        assert!(matches!(
            report.outcome,
            InvocationOutcome::RegistryUnavailable {
                phase: Phase::StaleScan,
                ..
            }
        ));
        assert_eq!(f.registry.queries().await.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn budget_exceeded_during_scan() {
        let f = fixture(ReaperConfig {
            overall_timeout_seconds: 10,
            ..ReaperConfig::default()
        });
        f.registry.delay_queries(Duration::from_secs(20)).await;
        let me = f.registry.next_invocation(t0()).await.unwrap();

        let report = f.reaper.invoke(me).await;

        assert_eq!(
            report.outcome,
            InvocationOutcome::BudgetExceeded {
                phase: Phase::StaleScan
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn budget_exceeded_stops_before_long_running_scan() {
        let f = fixture(ReaperConfig {
            overall_timeout_seconds: 5,
            ..ReaperConfig::default()
        });
        let flow = f.registry.new_flow_id();
        let stale = f
            .registry
            .schedule_run(flow, "nightly", t0() - ChronoDuration::hours(13))
            .await;
        f.registry
            .delay_transitions_for(stale, Duration::from_secs(10))
            .await;
        let long = f
            .registry
            .start_run(
                flow,
                "etl",
                t0() - ChronoDuration::hours(3),
                t0() - ChronoDuration::hours(3),
            )
            .await;
        let me = f.registry.next_invocation(t0()).await.unwrap();

        let start = Instant::now();
        let report = f.reaper.invoke(me).await;

        assert!(start.elapsed() < Duration::from_secs(10));
        assert_eq!(
            report.outcome,
            InvocationOutcome::BudgetExceeded {
                phase: Phase::StaleCancel
            }
        );
        assert_eq!(report.scan(ScanKind::Stale).unwrap().abandoned, 1);
        assert_eq!(f.registry.queries().await.len(), 1);
        assert_eq!(f.registry.run(long).await.unwrap().state, RunState::Running);
    }

    #[tokio::test]
    async fn events_bracket_the_invocation() {
        let f = fixture(ReaperConfig::default());
        let me = f.registry.next_invocation(t0()).await.unwrap();

        f.reaper.invoke(me).await;

        let events = f.events.events();
        assert!(matches!(
            events.first(),
            Some(ReaperEvent::InvocationStarted { .. })
        ));
        assert!(matches!(
            events.last(),
            Some(ReaperEvent::InvocationFinished { cancelled: 0, .. })
        ));
        let scans = events
            .iter()
            .filter(|e| matches!(e, ReaperEvent::ScanCompleted { .. }))
            .count();
        assert_eq!(scans, 2);
    }

    #[tokio::test]
    async fn own_log_failure_does_not_stop_the_sweep() {
        let f = fixture(ReaperConfig::default());
        let flow = f.registry.new_flow_id();
        let stale = f
            .registry
            .schedule_run(flow, "nightly", t0() - ChronoDuration::hours(13))
            .await;
        let me = f.registry.next_invocation(t0()).await.unwrap();
        f.registry.fail_audit_for(me.run_id()).await;

        let report = f.reaper.invoke(me).await;

        assert_eq!(report.outcome, InvocationOutcome::Completed);
        assert_eq!(
            f.registry.run(stale).await.unwrap().state,
            RunState::Cancelled
        );
        assert!(f
            .events
            .events()
            .iter()
            .any(|e| matches!(e, ReaperEvent::SelfLogFailed { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_own_log_cannot_push_cancellations_past_the_budget() {
        let f = fixture(ReaperConfig {
            overall_timeout_seconds: 5,
            ..ReaperConfig::default()
        });
        let flow = f.registry.new_flow_id();
        let stale = f
            .registry
            .schedule_run(flow, "nightly", t0() - ChronoDuration::hours(13))
            .await;
        let me = f.registry.next_invocation(t0()).await.unwrap();
        f.registry
            .delay_logs_for(me.run_id(), Duration::from_secs(8))
            .await;

        let start = Instant::now();
        let report = f.reaper.invoke(me).await;

        assert_eq!(
            report.outcome,
            InvocationOutcome::BudgetExceeded {
                phase: Phase::StaleCancel
            }
        );
        // the own-log write is cut off at the 5s deadline; the closing
        // summary entry gets its own (8s) attempt afterwards
        assert!(start.elapsed() < Duration::from_secs(16));
        let scan = report.scan(ScanKind::Stale).unwrap();
        assert_eq!(scan.found, 1);
        assert!(scan.outcomes.is_empty());

        // nothing was dispatched after the deadline, not even in the background
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(f.registry.transitions_for(stale).await.is_empty());
        assert!(f.registry.logs_for(stale).await.is_empty());
        assert_eq!(
            f.registry.run(stale).await.unwrap().state,
            RunState::Scheduled
        );
        assert!(f
            .events
            .events()
            .iter()
            .any(|e| matches!(e, ReaperEvent::SelfLogFailed { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_own_log_on_late_start_skips_self_cancel() {
        let f = fixture(ReaperConfig {
            overall_timeout_seconds: 5,
            ..ReaperConfig::default()
        });
        let me = f
            .registry
            .next_invocation(t0() - ChronoDuration::minutes(45))
            .await
            .unwrap();
        f.registry
            .delay_logs_for(me.run_id(), Duration::from_secs(8))
            .await;

        let report = f.reaper.invoke(me).await;

        assert_eq!(
            report.outcome,
            InvocationOutcome::BudgetExceeded {
                phase: Phase::SelfCancel
            }
        );
        assert!(f.registry.transitions_for(me.run_id()).await.is_empty());
    }

    #[tokio::test]
    async fn largest_valid_settings_run_without_overflow() {
        let f = fixture(ReaperConfig {
            stale_threshold_hours: crate::domain::MAX_THRESHOLD_HOURS,
            long_running_threshold_hours: crate::domain::MAX_THRESHOLD_HOURS,
            grace_minutes: crate::config::MAX_GRACE_MINUTES,
            overall_timeout_seconds: crate::config::MAX_TIMEOUT_SECONDS,
            per_query_timeout_seconds: crate::config::MAX_TIMEOUT_SECONDS,
            per_cancel_timeout_seconds: crate::config::MAX_TIMEOUT_SECONDS,
        });
        let flow = f.registry.new_flow_id();
        let stale = f
            .registry
            .schedule_run(flow, "nightly", t0() - ChronoDuration::hours(13))
            .await;
        let me = f.registry.next_invocation(t0()).await.unwrap();

        let report = f.reaper.invoke(me).await;

        // on time, and nothing is a century old
        assert_eq!(report.outcome, InvocationOutcome::Completed);
        assert_eq!(report.cancelled(), 0);
        assert_eq!(
            f.registry.run(stale).await.unwrap().state,
            RunState::Scheduled
        );
    }
}
