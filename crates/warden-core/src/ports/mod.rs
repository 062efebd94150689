//! Ports - 抽象化レイヤー
//!
//! Hexagonal Architecture の「ポート」を定義します。
//! watchdog が外部に求めるのは Registry と時計だけです。
//!
//! # 設計原則
//! - Registry が source of truth（watchdog は stateless）
//! - 時刻は Clock 経由（テストで差し替え可能）
//! - 出力は EventSink 経由（グローバル logger なし）

pub mod clock;
pub mod event_sink;
pub mod id_generator;
pub mod invocation_source;
pub mod run_registry;

// 主要な trait を再エクスポート
pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::event_sink::EventSink;
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::invocation_source::InvocationSource;
pub use self::run_registry::{RunRegistry, TransitionResult};
