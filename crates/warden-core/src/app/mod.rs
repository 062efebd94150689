//! App - アプリケーション層
//!
//! ports を組み合わせて watchdog の 1 回分の処理と、その定期実行を実装します。
//!
//! # 主要コンポーネント
//! - **ReaperBuilder**: Reaper の構築とワイヤリング（起動時検証つき）
//! - **Reaper**: 1 回の invocation（self-check → stale → long-running）
//! - **ReaperLoop**: invocation の定期実行
//! - **Canceller**: audit ログつきの cancel と並行 fan-out
//! - **RunQuery**: timeout つきの候補取得

pub mod builder;
pub mod canceller;
pub mod classifier;
pub mod reaper;
pub mod reaper_loop;
pub mod run_query;
pub mod self_filter;

// 主要な型を再エクスポート
pub use self::builder::{BuildError, ReaperBuilder};
pub use self::canceller::{Canceller, FanOut};
pub use self::reaper::Reaper;
pub use self::reaper_loop::{MAX_INTERVAL, ReaperLoop};
pub use self::run_query::RunQuery;
pub use self::self_filter::{Filtered, exclude_self};
