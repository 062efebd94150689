//! Errors - ドメインエラー
//!
//! Registry 呼び出しの失敗（`RegistryError`）と、入力検証の失敗
//! （`WardenError`）を分けて表現します。cancel が拒否されたことは
//! エラーではなく `Disposition::Rejected` として扱います。

use super::ids::RunId;
use super::run::ScanKind;

/// Failure of a single registry call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// The call timed out or the service could not be reached.
    #[error("registry unavailable during {operation}: {reason}")]
    Unavailable {
        operation: &'static str,
        reason: String,
    },

    /// A mutation targeted a run the registry does not know.
    #[error("run {0} not found")]
    RunNotFound(RunId),
}

impl RegistryError {
    pub fn unavailable(operation: &'static str, reason: impl Into<String>) -> Self {
        RegistryError::Unavailable {
            operation,
            reason: reason.into(),
        }
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, RegistryError::Unavailable { .. })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum WardenError {
    #[error("run filter needs at least one state")]
    EmptyStateFilter,

    #[error("{kind} threshold must be a positive number of hours up to {max}, got {hours}", max = super::run::MAX_THRESHOLD_HOURS)]
    InvalidThreshold { kind: ScanKind, hours: f64 },

    #[error("invocation interval must be greater than zero and at most one week, got {interval:?}")]
    InvalidInterval { interval: std::time::Duration },

    #[error(transparent)]
    Registry(#[from] RegistryError),
}
