//! Classifier - 遅れて起動した watchdog の判定
//!
//! 予定時刻から `grace` 以上遅れて起動した invocation は、もっと時間どおりの
//! invocation が動いている（または動く）とみなし、他の run を刈らずに
//! 自分自身を cancel します。ロックの代わりにこの自己退去ルールで
//! watchdog 同士の競合を避けます。

use chrono::{DateTime, Duration, Utc};

use crate::domain::WatchdogIdentity;

/// How long after its scheduled time the invocation is running at `now`.
pub fn lateness(identity: &WatchdogIdentity, now: DateTime<Utc>) -> Duration {
    now - identity.scheduled_start_time()
}

/// `true` iff the invocation is at least `grace` late (inclusive).
pub fn is_late(identity: &WatchdogIdentity, now: DateTime<Utc>, grace: Duration) -> bool {
    lateness(identity, now) >= grace
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::RunId;
    use chrono::TimeZone;
    use rstest::rstest;
    use ulid::Ulid;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    #[rstest]
    #[case::well_before(Duration::minutes(29), false)]
    #[case::exactly_grace(Duration::minutes(30), true)]
    #[case::just_after(Duration::minutes(31), true)]
    #[case::one_second_short(Duration::minutes(30) - Duration::seconds(1), false)]
    #[case::very_late(Duration::minutes(45), true)]
    #[case::scheduled_in_future(Duration::minutes(-5), false)]
    fn late_start_boundary(#[case] behind: Duration, #[case] expected: bool) {
        let identity = WatchdogIdentity::new(RunId::from_ulid(Ulid::new()), now() - behind);
        assert_eq!(is_late(&identity, now(), Duration::minutes(30)), expected);
    }

    #[test]
    fn lateness_is_signed() {
        let identity =
            WatchdogIdentity::new(RunId::from_ulid(Ulid::new()), now() + Duration::minutes(1));
        assert_eq!(lateness(&identity, now()), Duration::minutes(-1));
    }
}
