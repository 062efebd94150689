//! IdGenerator port - ID 生成の抽象化
//!
//! Run の ID は Registry が払い出します。in-memory Registry はこの
//! IdGenerator を使って ID を作ります。
//!
//! # 実装
//! - **UlidGenerator**: ULID ベース（Clock の時刻を timestamp 部に使う）

use crate::domain::ids::{FlowId, RunId};
use crate::ports::Clock;
use ulid::Ulid;

/// IdGenerator は分散システムで使える ID を生成
///
/// # Thread Safety
/// - `Send + Sync` を要求（複数タスクから使える）
pub trait IdGenerator: Send + Sync {
    /// Run ID を生成
    fn generate_run_id(&self) -> RunId;

    /// Flow ID を生成
    fn generate_flow_id(&self) -> FlowId;
}

/// UlidGenerator は ULID ベースの ID 生成器
///
/// FixedClock を使うと timestamp 部分が決定的になります。
pub struct UlidGenerator<C> {
    clock: C,
}

impl<C: Clock> UlidGenerator<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }

    fn next_ulid(&self) -> Ulid {
        let timestamp_ms = self.clock.now().timestamp_millis() as u64;
        Ulid::from_parts(timestamp_ms, rand::random())
    }
}

impl<C: Clock> IdGenerator for UlidGenerator<C> {
    fn generate_run_id(&self) -> RunId {
        RunId::from(self.next_ulid())
    }

    fn generate_flow_id(&self) -> FlowId {
        FlowId::from(self.next_ulid())
    }
}
