//! Impls - ports の実装
//!
//! # 含まれる実装
//! - **InMemoryRunRegistry**: 開発・テスト用の Registry（障害注入つき）
//! - **TracingEventSink**: 本番用の EventSink
//! - **RecordingEventSink**: テスト用の EventSink
//!
//! 本番の Registry（HTTP クライアントなど）は別クレートに置く想定です。

pub mod inmem_registry;
pub mod recording_sink;
pub mod tracing_sink;

// 主要な型を再エクスポート
pub use self::inmem_registry::{InMemoryRunRegistry, LogEntry, TransitionCall};
pub use self::recording_sink::RecordingEventSink;
pub use self::tracing_sink::TracingEventSink;
