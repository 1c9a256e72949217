//! Periodic and crontab callbacks feeding into the same commit pipeline as
//! [`crate::dispatcher::ChangeDispatcher`].
//!
//! Grounded in the original framework's `timer_handler.py` (the
//! `interval > 0.01` assertion) and `crontab_handler.py`
//! (`CrontabDetail`'s format + optional timezone).

use crate::dispatcher::{HandlerFuture, PendingCommit};
use crate::error::DispatchError;
use gs_broker::commit;
use chrono::Utc;
use chrono_tz::Tz;
use cron::Schedule;
use std::str::FromStr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub type TickFuture = Arc<dyn Fn() -> HandlerFuture + Send + Sync>;

const MIN_INTERVAL_SECS: f64 = 0.01;

async fn run_commits(label: &str, commits: Vec<PendingCommit>) {
    for mut pending in commits {
        if let Err(err) = commit::commit(
            &mut pending.entity,
            &pending.publishing_stream,
            pending.saving_stream.as_ref(),
        )
        .await
        {
            tracing::error!(callback = %label, %err, "commit from scheduled callback failed");
        }
    }
}

/// Register a periodic callback. Ticks never overlap: a slow callback
/// delays the next tick rather than being invoked again while still
/// running.
pub fn spawn_periodic(
    label: impl Into<String>,
    interval_secs: f64,
    cancel: CancellationToken,
    callback: TickFuture,
) -> Result<(), DispatchError> {
    if interval_secs < MIN_INTERVAL_SECS {
        return Err(DispatchError::IntervalTooShort(interval_secs));
    }
    let label = label.into();
    let mut interval = tokio::time::interval(std::time::Duration::from_secs_f64(interval_secs));
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    match callback().await {
                        Ok(commits) => run_commits(&label, commits).await,
                        Err(err) => tracing::error!(callback = %label, %err, "periodic callback failed"),
                    }
                }
            }
        }
    });
    Ok(())
}

/// Register a crontab callback with an optional IANA timezone (defaults to
/// UTC when absent).
pub fn spawn_crontab(
    label: impl Into<String>,
    expression: &str,
    timezone: Option<&str>,
    cancel: CancellationToken,
    callback: TickFuture,
) -> Result<(), DispatchError> {
    let schedule =
        Schedule::from_str(expression).map_err(|e| DispatchError::InvalidCron(e.to_string()))?;
    let tz: Tz = timezone
        .map(|t| t.parse().map_err(|_| DispatchError::InvalidCron(t.to_string())))
        .transpose()?
        .unwrap_or(chrono_tz::UTC);
    let label = label.into();

    tokio::spawn(async move {
        loop {
            let now = Utc::now().with_timezone(&tz);
            let Some(next) = schedule.upcoming(tz).next() else {
                break;
            };
            let wait = (next - now).to_std().unwrap_or(std::time::Duration::ZERO);
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(wait) => {
                    match callback().await {
                        Ok(commits) => run_commits(&label, commits).await,
                        Err(err) => tracing::error!(callback = %label, %err, "crontab callback failed"),
                    }
                }
            }
        }
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_interval_below_minimum() {
        let cancel = CancellationToken::new();
        let err = spawn_periodic("t", 0.001, cancel, Arc::new(|| Box::pin(async { Ok(Vec::new()) })))
            .unwrap_err();
        assert!(matches!(err, DispatchError::IntervalTooShort(_)));
    }

    #[test]
    fn rejects_invalid_cron_expression() {
        let cancel = CancellationToken::new();
        let err = spawn_crontab(
            "t",
            "not a cron expression",
            None,
            cancel,
            Arc::new(|| Box::pin(async { Ok(Vec::new()) })),
        )
        .unwrap_err();
        assert!(matches!(err, DispatchError::InvalidCron(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn periodic_callback_fires_after_interval() {
        let cancel = CancellationToken::new();
        let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let calls2 = calls.clone();
        spawn_periodic(
            "t",
            0.01,
            cancel.clone(),
            Arc::new(move || {
                let calls = calls2.clone();
                Box::pin(async move {
                    calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                    Ok(Vec::new())
                })
            }),
        )
        .unwrap();
        tokio::time::advance(std::time::Duration::from_millis(25)).await;
        tokio::task::yield_now().await;
        cancel.cancel();
        assert!(calls.load(std::sync::atomic::Ordering::SeqCst) >= 1);
    }
}
