//! Background-index progress tracking and the convergence wait.
//!
//! clangd reports indexing through `$/progress` notifications under the
//! `backgroundIndexProgress` token. The reader task feeds them into an
//! [`IndexProgressTracker`]; waiters watch the latest snapshot through a
//! `tokio::sync::watch` channel.

use std::time::Duration;

use serde_json::Value;
use tokio::sync::watch;
use tokio::time::Instant;

/// Progress token clangd uses for its background index.
pub const BACKGROUND_INDEX_TOKEN: &str = "backgroundIndexProgress";

/// Latest known state of the background index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexProgress {
    /// Last reported percentage, `None` until the first report.
    pub percentage: Option<u32>,
    /// When `percentage` last changed (or when tracking began).
    pub last_change: Instant,
}

impl IndexProgress {
    pub fn is_complete(&self) -> bool {
        self.percentage.is_some_and(|p| p >= 100)
    }
}

/// Writer side, owned by the session's reader task.
#[derive(Debug)]
pub struct IndexProgressTracker {
    tx: watch::Sender<IndexProgress>,
}

impl IndexProgressTracker {
    pub fn new() -> (Self, watch::Receiver<IndexProgress>) {
        let (tx, rx) = watch::channel(IndexProgress {
            percentage: None,
            last_change: Instant::now(),
        });
        (Self { tx }, rx)
    }

    /// Apply the params of one `$/progress` notification.
    ///
    /// Returns `false` for other tokens, which are left alone.
    pub fn observe(&self, params: &Value) -> bool {
        if params.get("token").and_then(Value::as_str) != Some(BACKGROUND_INDEX_TOKEN) {
            return false;
        }
        let value = params.get("value").unwrap_or(&Value::Null);
        let kind = value.get("kind").and_then(Value::as_str).unwrap_or_default();
        let reported = value
            .get("percentage")
            .and_then(Value::as_u64)
            .map(|p| p.min(100) as u32);

        let next = match kind {
            "begin" => Some(reported.unwrap_or(0)),
            "report" => reported,
            "end" => Some(100),
            _ => None,
        };
        let Some(next) = next else {
            return true;
        };

        self.tx.send_if_modified(|progress| {
            if progress.percentage == Some(next) {
                return false;
            }
            tracing::debug!(percentage = next, "background index progress");
            progress.percentage = Some(next);
            progress.last_change = Instant::now();
            true
        });
        true
    }
}

/// Budget for [`wait_for_convergence`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitOptions {
    /// Give up after this long in total.
    pub max_total_wait: Duration,
    /// Give up if the percentage has not moved for this long.
    pub max_stale_time: Duration,
    pub initial_interval: Duration,
    pub max_interval: Duration,
}

impl WaitOptions {
    pub fn from_config(config: &diffscope_config::IndexingConfig) -> Self {
        Self {
            max_total_wait: config.max_total_wait(),
            max_stale_time: config.max_stale_time(),
            initial_interval: config.initial_interval(),
            max_interval: config.max_interval(),
        }
    }
}

/// How an indexing wait ended. Only `Complete` means the index reported 100%.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexingOutcome {
    Complete,
    /// No progress change for `max_stale_time`; carries the last value seen.
    Stalled { percentage: Option<u32> },
    TimedOut { percentage: Option<u32> },
}

/// The progress channel closed before the wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("progress channel closed")]
pub struct ProgressClosed;

/// Poll progress with exponential backoff until the index completes, stalls,
/// or the total budget runs out.
///
/// Staleness is measured from the later of the wait's start and the last
/// change. Progress changes wake the wait early.
pub async fn wait_for_convergence(
    rx: &mut watch::Receiver<IndexProgress>,
    options: &WaitOptions,
) -> Result<IndexingOutcome, ProgressClosed> {
    let start = Instant::now();
    let total_deadline = start + options.max_total_wait;
    let mut interval = options.initial_interval;
    let mut closed = false;

    loop {
        let progress = *rx.borrow_and_update();
        if progress.is_complete() {
            tracing::info!(elapsed = ?start.elapsed(), "background index complete");
            return Ok(IndexingOutcome::Complete);
        }

        let now = Instant::now();
        if now >= total_deadline {
            tracing::warn!(
                percentage = ?progress.percentage,
                waited = ?options.max_total_wait,
                "background index did not finish in time; continuing with partial index"
            );
            return Ok(IndexingOutcome::TimedOut {
                percentage: progress.percentage,
            });
        }
        let stale_deadline = progress.last_change.max(start) + options.max_stale_time;
        if now >= stale_deadline {
            tracing::warn!(
                percentage = ?progress.percentage,
                stale_for = ?options.max_stale_time,
                "background index stopped making progress; continuing with partial index"
            );
            return Ok(IndexingOutcome::Stalled {
                percentage: progress.percentage,
            });
        }

        let wake = (now + interval).min(total_deadline).min(stale_deadline);
        if closed {
            return Err(ProgressClosed);
        }
        tokio::select! {
            _ = tokio::time::sleep_until(wake) => {
                interval = (interval * 2).min(options.max_interval);
            }
            changed = rx.changed() => {
                if changed.is_err() {
                    closed = true;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn params(kind: &str, percentage: Option<u32>) -> Value {
        let mut value = json!({"kind": kind, "title": "indexing"});
        if let Some(p) = percentage {
            value["percentage"] = json!(p);
        }
        json!({"token": BACKGROUND_INDEX_TOKEN, "value": value})
    }

    fn quick() -> WaitOptions {
        WaitOptions {
            max_total_wait: Duration::from_millis(400),
            max_stale_time: Duration::from_millis(150),
            initial_interval: Duration::from_millis(5),
            max_interval: Duration::from_millis(20),
        }
    }

    #[test]
    fn test_observe_begin_report_end() {
        let (tracker, rx) = IndexProgressTracker::new();
        assert!(tracker.observe(&params("begin", None)));
        assert_eq!(rx.borrow().percentage, Some(0));
        tracker.observe(&params("report", Some(42)));
        assert_eq!(rx.borrow().percentage, Some(42));
        tracker.observe(&params("report", None));
        assert_eq!(rx.borrow().percentage, Some(42));
        tracker.observe(&params("end", None));
        assert!(rx.borrow().is_complete());
    }

    #[test]
    fn test_observe_ignores_other_tokens() {
        let (tracker, rx) = IndexProgressTracker::new();
        let other = json!({"token": "other", "value": {"kind": "end"}});
        assert!(!tracker.observe(&other));
        assert_eq!(rx.borrow().percentage, None);
    }

    #[test]
    fn test_repeated_value_keeps_last_change() {
        let (tracker, rx) = IndexProgressTracker::new();
        tracker.observe(&params("report", Some(10)));
        let first = rx.borrow().last_change;
        tracker.observe(&params("report", Some(10)));
        assert_eq!(rx.borrow().last_change, first);
    }

    #[tokio::test]
    async fn test_wait_completes_when_end_arrives() {
        let (tracker, mut rx) = IndexProgressTracker::new();
        let feeder = tokio::spawn(async move {
            for p in [10, 50, 90] {
                tokio::time::sleep(Duration::from_millis(10)).await;
                tracker.observe(&params("report", Some(p)));
            }
            tracker.observe(&params("end", None));
            tracker
        });
        let outcome = wait_for_convergence(&mut rx, &quick()).await.unwrap();
        assert_eq!(outcome, IndexingOutcome::Complete);
        let _tracker = feeder.await.unwrap();
    }

    #[test_log::test(tokio::test)]
    async fn test_wait_stalls_without_progress() {
        let (_tracker, mut rx) = IndexProgressTracker::new();
        let started = Instant::now();
        let outcome = wait_for_convergence(&mut rx, &quick()).await.unwrap();
        assert_eq!(outcome, IndexingOutcome::Stalled { percentage: None });
        assert!(started.elapsed() >= Duration::from_millis(150));
        assert!(started.elapsed() < Duration::from_millis(400));
    }

    #[test_log::test(tokio::test)]
    async fn test_wait_times_out_while_progress_keeps_moving() {
        let (tracker, mut rx) = IndexProgressTracker::new();
        let feeder = tokio::spawn(async move {
            for p in 1..99 {
                tokio::time::sleep(Duration::from_millis(20)).await;
                tracker.observe(&params("report", Some(p)));
            }
        });
        let outcome = wait_for_convergence(&mut rx, &quick()).await.unwrap();
        assert!(matches!(outcome, IndexingOutcome::TimedOut { percentage: Some(_) }));
        feeder.abort();
    }

    #[tokio::test]
    async fn test_wait_reports_closed_channel() {
        let (tracker, mut rx) = IndexProgressTracker::new();
        drop(tracker);
        assert_eq!(
            wait_for_convergence(&mut rx, &quick()).await,
            Err(ProgressClosed)
        );
    }
}
