//! Countdown refresh for displays.
//!
//! Re-invokes [`evaluate`] on a fixed period and publishes each result on a
//! `watch` channel. The evaluator itself stays timer-free.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::debug;

use fleet_state::AccessKeyRecord;

use crate::validity::{ValidityState, evaluate};

/// Publish the validity of `record` every `period` using the system clock.
///
/// See [`watch_validity_with`].
pub fn watch_validity(record: AccessKeyRecord, period: Duration) -> watch::Receiver<ValidityState> {
    watch_validity_with(record, period, Utc::now)
}

/// Publish the validity of `record` every `period`, reading time from `now`.
///
/// The receiver starts with the state at call time. Only an `Active` key
/// changes over time, so a refresh task is spawned only in that case; it
/// exits once the key leaves `Active` or every receiver is dropped.
/// Must be called inside a tokio runtime when the key is `Active`.
pub fn watch_validity_with<F>(
    record: AccessKeyRecord,
    period: Duration,
    now: F,
) -> watch::Receiver<ValidityState>
where
    F: Fn() -> DateTime<Utc> + Send + 'static,
{
    let initial = evaluate(&record, now());
    let (tx, rx) = watch::channel(initial);
    if !initial.is_counting_down() {
        return rx;
    }

    let period = period.max(Duration::from_millis(1));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick completes immediately; `initial` covers it.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = tx.closed() => {
                    debug!(key_id = record.id, "validity watchers gone");
                    break;
                }
            }

            let state = evaluate(&record, now());
            tx.send_replace(state);
            if !state.is_counting_down() {
                debug!(key_id = record.id, state = state.name(), "validity countdown finished");
                break;
            }
        }
    });

    rx
}
