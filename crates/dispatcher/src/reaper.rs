use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use tokio::sync::broadcast;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, warn};

use taskhub_common::pgroup;
use taskhub_domain::{EventRepository, ExpiredLease, RunRepository, WorkerRepository};
use taskhub_errors::TaskHubResult;

#[derive(Debug, Clone)]
pub struct ReaperConfig {
    pub sweep_interval: Duration,
    /// Pause between SIGTERM and SIGKILL on an orphaned process group.
    pub term_grace: Duration,
    /// Lease duration, used to derive the worker-registry pruning horizon.
    pub lease_duration: Duration,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(60),
            term_grace: Duration::from_secs(1),
            lease_duration: Duration::from_secs(60),
        }
    }
}

/// Periodic sweeper reclaiming runs whose worker died.
///
/// Only runs with an already-expired lease are ever touched; the store
/// re-checks expiry inside the abandon transaction, so a worker that renews
/// between the scan and the abandonment keeps its run.
pub struct ReaperService {
    run_repo: Arc<dyn RunRepository>,
    event_repo: Arc<dyn EventRepository>,
    worker_repo: Arc<dyn WorkerRepository>,
    config: ReaperConfig,
}

impl ReaperService {
    pub fn new(
        run_repo: Arc<dyn RunRepository>,
        event_repo: Arc<dyn EventRepository>,
        worker_repo: Arc<dyn WorkerRepository>,
        config: ReaperConfig,
    ) -> Self {
        Self {
            run_repo,
            event_repo,
            worker_repo,
            config,
        }
    }

    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!(
            sweep_ms = self.config.sweep_interval.as_millis(),
            "reaper started"
        );

        let mut ticker = interval(self.config.sweep_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep().await {
                        error!(error = %e, "reaper sweep failed");
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("reaper shutting down");
                    break;
                }
            }
        }
    }

    /// One sweep. Public so tests can drive it directly.
    pub async fn sweep(&self) -> TaskHubResult<()> {
        let now = Utc::now();
        let expired = self.run_repo.reap_expired(now).await?;

        for lease in expired {
            if let Err(e) = self.reap_one(&lease).await {
                error!(run_id = %lease.run_id, error = %e, "failed to reap run");
            }
        }

        let horizon = now
            - chrono::Duration::from_std(self.config.lease_duration * 3)
                .unwrap_or_else(|_| chrono::Duration::seconds(180));
        let pruned = self.worker_repo.prune_workers(horizon).await?;
        if pruned > 0 {
            info!(pruned, "pruned stale worker registrations");
        }

        Ok(())
    }

    async fn reap_one(&self, lease: &ExpiredLease) -> TaskHubResult<()> {
        let owner = lease.lease_owner.as_deref().unwrap_or("unknown");
        warn!(
            run_id = %lease.run_id,
            owner,
            pgid = ?lease.pgid,
            "expired lease found"
        );

        let mut group_killed = false;
        if let Some(pgid) = lease.pgid {
            if pgroup::group_exists(pgid) {
                // The worker died but its child survived. TERM first so the
                // child may flush, then KILL the whole group.
                if let Err(e) = pgroup::terminate_group(pgid) {
                    warn!(pgid, error = %e, "SIGTERM to orphan group failed");
                }
                tokio::time::sleep(self.config.term_grace).await;
                if let Err(e) = pgroup::kill_group(pgid) {
                    warn!(pgid, error = %e, "SIGKILL to orphan group failed");
                }
                group_killed = true;
            }
        }

        let reason = format!("lease_expired by reaper, original_owner={owner}");
        let abandoned = self.run_repo.abandon_run(&lease.run_id, &reason).await?;

        if abandoned {
            self.event_repo
                .append_event(
                    &lease.run_id,
                    "system",
                    json!({
                        "action": "reaped",
                        "reason": reason,
                        "pgid": lease.pgid,
                        "group_killed": group_killed,
                    }),
                )
                .await?;
            info!(run_id = %lease.run_id, "run abandoned after lease expiry");
        }

        Ok(())
    }
}
