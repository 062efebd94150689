//! EventSink port - watchdog のイベント出力先
//!
//! プロセス全体のグローバル logger は使わず、各コンポーネントは
//! 構築時に `Arc<dyn EventSink>` を受け取ります。
//!
//! # 実装
//! - TracingEventSink: tracing の構造化ログに変換（本番用）
//! - RecordingEventSink: 受け取ったイベントを保持（テスト用）

use crate::domain::ReaperEvent;

pub trait EventSink: Send + Sync {
    fn emit(&self, event: ReaperEvent);
}
