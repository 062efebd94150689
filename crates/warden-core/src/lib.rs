//! warden-core
//!
//! Building blocks for a watchdog that reaps stuck runs from a job registry.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, state, run, outcome, report, errors, events）
//! - **ports**: 抽象化レイヤー（RunRegistry, InvocationSource, Clock, EventSink, IdGenerator）
//! - **app**: アプリケーションロジック（builder, reaper, reaper_loop, canceller, など）
//! - **impls**: 実装（InMemoryRunRegistry, TracingEventSink など）
//! - **config**: 閾値と timeout の設定

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod ports;
