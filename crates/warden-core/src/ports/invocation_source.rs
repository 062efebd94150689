//! InvocationSource port - watchdog 実行コンテキストの払い出し
//!
//! 1 回の invocation ごとに、Registry 上の watchdog 自身の run を
//! 用意して `WatchdogIdentity` を返します。ReaperLoop が tick ごとに使います。
//! 終了時には invocation の結果を watchdog 自身の run 状態に反映します
//! （時間切れは CANCELLED、query 失敗は FAILED）。

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{InvocationOutcome, RegistryError, WatchdogIdentity};

#[async_trait]
pub trait InvocationSource: Send + Sync {
    /// Start the watchdog run that was scheduled for `scheduled_at`.
    async fn next_invocation(
        &self,
        scheduled_at: DateTime<Utc>,
    ) -> Result<WatchdogIdentity, RegistryError>;

    /// Record how the invocation ended on the watchdog's own run.
    async fn finish_invocation(
        &self,
        identity: &WatchdogIdentity,
        outcome: &InvocationOutcome,
    ) -> Result<(), RegistryError>;
}
