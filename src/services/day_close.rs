use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, FixedOffset, NaiveDate, Utc};
use metrics::gauge;
use tokio::time::{interval, Duration};

use crate::metrics::OPEN_LEFTOVERS;
use crate::models::Scope;
use crate::services::reconciler::Reconciler;
use crate::store::LedgerStore;

/// The local day that ended most recently at `now`.
pub fn previous_local_day(now: DateTime<Utc>, offset: FixedOffset) -> NaiveDate {
    (now.with_timezone(&offset) - ChronoDuration::days(1)).date_naive()
}

/// Periodically close the previous local day: run its range with carryover
/// so the remainders flow into the next day. Each day is closed once per
/// process; a failed close is retried on the next tick.
pub async fn run_day_close_loop<S: LedgerStore>(reconciler: Arc<Reconciler<S>>, interval_secs: u64) {
    let mut ticker = interval(Duration::from_secs(interval_secs.max(1)));
    let mut last_closed: Option<NaiveDate> = None;

    loop {
        ticker.tick().await;

        let day = previous_local_day(Utc::now(), reconciler.config().offset);
        if last_closed.is_some_and(|closed| closed >= day) {
            continue;
        }

        tracing::info!(%day, "Day close: running previous local day");
        match reconciler.run_matching(Scope::day(day)).await {
            Ok(run) => {
                last_closed = Some(day);
                tracing::info!(
                    %day,
                    total_profit = %run.total_profit,
                    carried_forward = run.unresolved.len(),
                    "Day close complete"
                );
            }
            Err(e) if e.is_retryable() => {
                tracing::warn!(%day, error = %e, "Day close deferred");
                continue;
            }
            Err(e) => {
                tracing::error!(%day, error = %e, "Day close failed");
                continue;
            }
        }

        match reconciler.store().open_leftovers().await {
            Ok(open) => gauge!(OPEN_LEFTOVERS).set(open.len() as f64),
            Err(e) => tracing::error!(error = %e, "Failed to count open leftovers"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_previous_local_day_crosses_midnight_locally() {
        let bangkok = FixedOffset::east_opt(7 * 3600).unwrap();
        // 18:30 UTC on the 10th is already 01:30 on the 11th in Bangkok.
        let now = Utc.with_ymd_and_hms(2025, 3, 10, 18, 30, 0).unwrap();
        assert_eq!(
            previous_local_day(now, bangkok),
            NaiveDate::from_ymd_opt(2025, 3, 10).unwrap()
        );

        let morning = Utc.with_ymd_and_hms(2025, 3, 10, 10, 0, 0).unwrap();
        assert_eq!(
            previous_local_day(morning, bangkok),
            NaiveDate::from_ymd_opt(2025, 3, 9).unwrap()
        );
    }
}
