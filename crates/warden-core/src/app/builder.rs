//! ReaperBuilder - Reaper の構築とワイヤリング
//!
//! # 起動時検証（Fail-fast）
//! - Registry が未設定なら `BuildError::MissingRegistry`
//! - 閾値・timeout が不正なら `BuildError::InvalidConfig`
//!
//! Clock / EventSink / 設定は省略するとデフォルト
//! （`SystemClock`, `TracingEventSink`, `ReaperConfig::default()`）。

use std::sync::Arc;

use super::reaper::Reaper;
use crate::config::{ConfigError, ReaperConfig};
use crate::impls::TracingEventSink;
use crate::ports::{Clock, EventSink, RunRegistry, SystemClock};

/// ```ignore
/// let reaper = ReaperBuilder::new()
///     .registry(registry)
///     .config(config)
///     .build()?;
/// ```
#[derive(Default)]
pub struct ReaperBuilder {
    registry: Option<Arc<dyn RunRegistry>>,
    clock: Option<Arc<dyn Clock>>,
    events: Option<Arc<dyn EventSink>>,
    config: Option<ReaperConfig>,
}

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("no run registry configured; call ReaperBuilder::registry before build")]
    MissingRegistry,

    #[error("invalid reaper configuration: {0}")]
    InvalidConfig(#[from] ConfigError),
}

impl ReaperBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn registry(mut self, registry: Arc<dyn RunRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn config(mut self, config: ReaperConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn build(self) -> Result<Reaper, BuildError> {
        let registry = self.registry.ok_or(BuildError::MissingRegistry)?;
        let config = self.config.unwrap_or_default();
        config.validate()?;

        let stale = config.stale_window().map_err(ConfigError::from)?;
        let long_running = config.long_running_window().map_err(ConfigError::from)?;

        Ok(Reaper {
            registry,
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            events: self
                .events
                .unwrap_or_else(|| Arc::new(TracingEventSink::new())),
            config,
            stale,
            long_running,
        })
    }
}
