//! # Repository Monitor
//!
//! Background loop that re-syncs every active monitored repository on a
//! fixed cadence. The first tick fires immediately. A repository that keeps
//! failing is logged and skipped; it never delays or blocks the rest of the
//! set. Per-repository retry policy lives here, not in the sync service.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use metrics::{counter, gauge, histogram};
use sea_orm::DatabaseConnection;
use tokio::time::{Instant, MissedTickBehavior, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use crate::repositories::MonitoredStore;
use crate::sync::SyncService;

/// Floor for the tick cadence; anything lower is a misconfiguration.
pub const MIN_MONITOR_INTERVAL: Duration = Duration::from_secs(3600);

/// Per-repository sync attempts within one tick.
const MAX_SYNC_ATTEMPTS: u32 = 3;

pub struct Monitor {
    service: Arc<SyncService>,
    db: DatabaseConnection,
    interval: Duration,
    shutdown: CancellationToken,
}

impl Monitor {
    pub fn new(
        service: Arc<SyncService>,
        db: DatabaseConnection,
        interval: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        let interval = if interval < MIN_MONITOR_INTERVAL {
            warn!(
                configured_secs = interval.as_secs(),
                floor_secs = MIN_MONITOR_INTERVAL.as_secs(),
                "Monitor interval below floor, clamping"
            );
            MIN_MONITOR_INTERVAL
        } else {
            interval
        };

        Self {
            service,
            db,
            interval,
            shutdown,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Runs until the shutdown token fires. The underlying ticker yields
    /// immediately on the first tick.
    #[instrument(skip_all)]
    pub async fn run(self) {
        info!(interval_secs = self.interval.as_secs(), "Starting repository monitor");

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("Repository monitor shutdown requested");
                    break;
                }
                _ = ticker.tick() => {
                    let started = Instant::now();
                    self.tick().await;
                    histogram!("monitor_tick_duration_ms")
                        .record(started.elapsed().as_secs_f64() * 1_000.0);
                }
            }
        }

        info!("Repository monitor stopped");
    }

    pub(crate) async fn tick(&self) {
        let repos = match MonitoredStore::list(&self.db).await {
            Ok(repos) => repos,
            Err(err) => {
                error!(error = ?err, "Failed to load monitored repositories");
                return;
            }
        };

        gauge!("monitor_repositories").set(repos.len() as f64);

        for repo in repos {
            if self.shutdown.is_cancelled() {
                return;
            }

            let Some((owner, name)) = split_full_name(&repo.full_name) else {
                warn!(full_name = %repo.full_name, "Skipping malformed repository name");
                continue;
            };

            let since = repo.last_sync_time.with_timezone(&Utc);
            if self.sync_with_retry(owner, name, since).await {
                if let Err(err) =
                    MonitoredStore::update_sync(&self.db, &repo.full_name, Utc::now()).await
                {
                    error!(
                        full_name = %repo.full_name,
                        error = ?err,
                        "Failed to record sync time"
                    );
                }
            }
        }
    }

    /// Up to three attempts with quadratic (attempt² seconds) backoff between
    /// them. Backoffs abort promptly on shutdown.
    async fn sync_with_retry(
        &self,
        owner: &str,
        name: &str,
        since: chrono::DateTime<Utc>,
    ) -> bool {
        for attempt in 1..=MAX_SYNC_ATTEMPTS {
            match self.service.sync_repository(owner, name, Some(since)).await {
                Ok(()) => {
                    counter!("monitor_syncs_total").increment(1);
                    return true;
                }
                Err(err) if attempt == MAX_SYNC_ATTEMPTS => {
                    error!(
                        owner,
                        name,
                        attempts = MAX_SYNC_ATTEMPTS,
                        error = %err,
                        "Giving up on repository sync until next tick"
                    );
                    counter!("monitor_sync_failures_total").increment(1);
                    return false;
                }
                Err(err) => {
                    let backoff = Duration::from_secs(u64::from(attempt * attempt));
                    warn!(
                        owner,
                        name,
                        attempt,
                        backoff_secs = backoff.as_secs(),
                        error = %err,
                        "Repository sync attempt failed, retrying"
                    );
                    tokio::select! {
                        _ = self.shutdown.cancelled() => return false,
                        _ = sleep(backoff) => {}
                    }
                }
            }
        }

        false
    }
}

/// Splits a canonical `owner/name` identity; rejects anything without
/// exactly one separator.
pub(crate) fn split_full_name(full_name: &str) -> Option<(&str, &str)> {
    let (owner, name) = full_name.split_once('/')?;
    if owner.is_empty() || name.is_empty() || name.contains('/') {
        return None;
    }
    Some((owner, name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::test_support::{MockUpstream, test_db};

    #[test]
    fn split_accepts_exactly_one_separator() {
        assert_eq!(split_full_name("golang/example"), Some(("golang", "example")));
        assert_eq!(split_full_name("no-separator"), None);
        assert_eq!(split_full_name("a/b/c"), None);
        assert_eq!(split_full_name("/name"), None);
        assert_eq!(split_full_name("owner/"), None);
    }

    #[tokio::test]
    async fn interval_is_floored_at_one_hour() {
        let db = test_db().await;
        let mock = Arc::new(MockUpstream::with_commit_count(0));
        let service = Arc::new(SyncService::new(db.clone(), mock, &AppConfig::default()));

        let monitor = Monitor::new(
            service,
            db,
            Duration::from_secs(5),
            CancellationToken::new(),
        );
        assert_eq!(monitor.interval(), MIN_MONITOR_INTERVAL);
    }

    #[tokio::test]
    async fn tick_syncs_every_repository_and_records_sync_time() {
        let db = test_db().await;
        let mock = Arc::new(MockUpstream::with_commit_count(2));
        let service = Arc::new(SyncService::new(db.clone(), mock.clone(), &AppConfig::default()));

        let hour = Duration::from_secs(3600);
        MonitoredStore::add(&db, "golang/example", hour).await.unwrap();
        let before = MonitoredStore::list(&db).await.unwrap()[0]
            .last_sync_time
            .timestamp_micros();

        let monitor = Monitor::new(service, db.clone(), hour, CancellationToken::new());
        monitor.tick().await;

        assert_eq!(mock.repository_calls(), 1);
        let after = MonitoredStore::list(&db).await.unwrap()[0]
            .last_sync_time
            .timestamp_micros();
        assert!(after >= before);
    }

    #[tokio::test]
    async fn failing_repository_does_not_block_the_rest() {
        let db = test_db().await;
        let mock = Arc::new(MockUpstream::with_commit_count(1));
        // First repository burns all three attempts, second succeeds.
        mock.fail_repository_times(3);
        let service = Arc::new(SyncService::new(db.clone(), mock.clone(), &AppConfig::default()));

        let hour = Duration::from_secs(3600);
        MonitoredStore::add(&db, "golang/broken", hour).await.unwrap();
        MonitoredStore::add(&db, "golang/example", hour).await.unwrap();

        let monitor = Monitor::new(service, db.clone(), hour, CancellationToken::new());
        monitor.tick().await;

        // 3 failed attempts for the first repository + 1 success for the second.
        assert_eq!(mock.repository_calls(), 4);
        assert_eq!(mock.commits_calls(), 1);
    }

    #[tokio::test]
    async fn malformed_names_are_skipped() {
        let db = test_db().await;
        let mock = Arc::new(MockUpstream::with_commit_count(0));
        let service = Arc::new(SyncService::new(db.clone(), mock.clone(), &AppConfig::default()));

        let hour = Duration::from_secs(3600);
        MonitoredStore::add(&db, "not-a-full-name", hour).await.unwrap();
        MonitoredStore::add(&db, "golang/example", hour).await.unwrap();

        let monitor = Monitor::new(service, db.clone(), hour, CancellationToken::new());
        monitor.tick().await;

        assert_eq!(mock.repository_calls(), 1);
    }
}
