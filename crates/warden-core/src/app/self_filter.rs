//! SelfFilter - 候補から watchdog 自身の run を除外
//!
//! 比較するのは「候補の run id」と「watchdog の run id」です。
//! flow 定義の id（`FlowId`）は型が違うので比較に使えません。

use crate::domain::{RunId, RunRecord};

/// Candidates left after removing the watchdog's own run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filtered {
    pub kept: Vec<RunRecord>,
    pub excluded: usize,
}

pub fn exclude_self(candidates: Vec<RunRecord>, self_id: RunId) -> Filtered {
    let before = candidates.len();
    let kept: Vec<RunRecord> = candidates.into_iter().filter(|r| r.id != self_id).collect();
    Filtered {
        excluded: before - kept.len(),
        kept,
    }
}
