use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::broadcast;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use taskhub_domain::{CronEntry, CronRepository, RegistrySnapshot, RunRepository};
use taskhub_errors::{TaskHubError, TaskHubResult};

use crate::cron_utils::CronSchedule;

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub tick_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(1),
        }
    }
}

/// Singleton loop converting due cron entries into queued runs.
///
/// Missed ticks coalesce: the next fire time is always computed from the
/// current instant, so an outage yields at most one catch-up run per entry.
pub struct SchedulerService {
    run_repo: Arc<dyn RunRepository>,
    cron_repo: Arc<dyn CronRepository>,
    snapshot: RegistrySnapshot,
    config: SchedulerConfig,
}

impl SchedulerService {
    pub fn new(
        run_repo: Arc<dyn RunRepository>,
        cron_repo: Arc<dyn CronRepository>,
        snapshot: RegistrySnapshot,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            run_repo,
            cron_repo,
            snapshot,
            config,
        }
    }

    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!(
            tick_ms = self.config.tick_interval.as_millis(),
            "scheduler started"
        );

        let mut ticker = interval(self.config.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.tick().await {
                        error!(error = %e, "scheduler tick failed");
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("scheduler shutting down");
                    break;
                }
            }
        }
    }

    /// One pass over the due entries. Public so tests can drive it directly.
    pub async fn tick(&self) -> TaskHubResult<()> {
        let now = Utc::now();
        let due = self.cron_repo.poll_due_cron(now).await?;

        for entry in due {
            if let Err(e) = self.fire_entry(&entry).await {
                error!(cron_id = %entry.cron_id, error = %e, "cron entry failed to fire");
                // Best-effort advance so a broken entry cannot wedge the loop
                // in a permanently-due state.
                if let Some(next) = next_fire(&entry) {
                    let _ = self.cron_repo.advance_cron(&entry.cron_id, now, next).await;
                }
            }
        }
        Ok(())
    }

    async fn fire_entry(&self, entry: &CronEntry) -> TaskHubResult<()> {
        let now = Utc::now();
        let next = next_fire(entry).ok_or_else(|| TaskHubError::InvalidCron {
            expr: entry.cron_expression.clone(),
            message: "no future fire time".to_string(),
        })?;

        match self
            .run_repo
            .enqueue_run(
                &entry.task_id,
                entry.params.clone(),
                &self.snapshot,
                Some(&entry.cron_id),
            )
            .await
        {
            Ok(run) => {
                info!(
                    cron_id = %entry.cron_id,
                    run_id = %run.run_id,
                    task_id = %entry.task_id,
                    next = %next,
                    "cron entry fired"
                );
            }
            // The entry still advances: a disabled or vanished task must not
            // pin the entry in the due set forever.
            Err(TaskHubError::UnknownTask { .. }) => {
                warn!(cron_id = %entry.cron_id, task_id = %entry.task_id, "cron references unknown task, skipping fire");
            }
            Err(TaskHubError::TaskDisabled { .. }) => {
                debug!(cron_id = %entry.cron_id, task_id = %entry.task_id, "task disabled, skipping fire");
            }
            Err(e) => return Err(e),
        }

        self.cron_repo.advance_cron(&entry.cron_id, now, next).await
    }
}

/// Next fire time computed from *now* (coalescing policy).
fn next_fire(entry: &CronEntry) -> Option<chrono::DateTime<Utc>> {
    CronSchedule::parse(&entry.cron_expression)
        .ok()?
        .next_after(Utc::now())
}
