//! The worker main loop: register, claim, supervise, repeat.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tracing::{error, info, warn};

use taskhub_domain::{
    ArtifactRepository, EventRepository, Run, RunRepository, WorkerInfo, WorkerRepository,
    WorkerStatus,
};
use taskhub_errors::{TaskHubError, TaskHubResult};
use taskhub_registry::Registry;

use crate::supervisor::{Supervisor, SupervisorConfig, SupervisorOutcome};

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub hostname: String,
    pub data_dir: PathBuf,
    pub lease_duration: Duration,
    pub idle_poll: Duration,
    pub error_backoff: Duration,
    pub soft_grace: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            hostname: "localhost".to_string(),
            data_dir: PathBuf::from("data"),
            lease_duration: Duration::from_secs(60),
            idle_poll: Duration::from_millis(500),
            error_backoff: Duration::from_secs(5),
            soft_grace: Duration::from_secs(10),
        }
    }
}

/// A long-lived worker process. Handles one run at a time; parallelism comes
/// from running more worker processes, with the store's claim admission
/// enforcing global concurrency limits.
pub struct WorkerService {
    worker: WorkerInfo,
    registry: Arc<Registry>,
    run_repo: Arc<dyn RunRepository>,
    worker_repo: Arc<dyn WorkerRepository>,
    supervisor: Supervisor,
    config: WorkerConfig,
}

impl WorkerService {
    pub fn new(
        registry: Arc<Registry>,
        run_repo: Arc<dyn RunRepository>,
        event_repo: Arc<dyn EventRepository>,
        artifact_repo: Arc<dyn ArtifactRepository>,
        worker_repo: Arc<dyn WorkerRepository>,
        config: WorkerConfig,
    ) -> Self {
        let worker = WorkerInfo::new(&config.hostname, std::process::id() as i32);
        let supervisor = Supervisor::new(
            worker.worker_id.clone(),
            Arc::clone(&registry),
            Arc::clone(&run_repo),
            event_repo,
            artifact_repo,
            SupervisorConfig {
                data_dir: config.data_dir.clone(),
                soft_grace: config.soft_grace,
                ..SupervisorConfig::default()
            },
        );
        Self {
            worker,
            registry,
            run_repo,
            worker_repo,
            supervisor,
            config,
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.worker.worker_id
    }

    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) -> TaskHubResult<()> {
        self.worker_repo.upsert_worker(&self.worker).await?;
        info!(worker_id = %self.worker.worker_id, "worker registered");

        let snapshot = self.registry.snapshot();

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!(worker_id = %self.worker.worker_id, "worker shutting down");
                    break;
                }
                claimed = self.run_repo.claim_next(
                    &self.worker.worker_id,
                    self.config.lease_duration,
                    &snapshot,
                ) => {
                    match claimed {
                        Ok(Some(run)) => {
                            self.execute(run, &mut shutdown_rx).await;
                        }
                        Ok(None) => {
                            let _ = self
                                .worker_repo
                                .worker_heartbeat(&self.worker.worker_id, WorkerStatus::Idle, None)
                                .await;
                            tokio::select! {
                                _ = sleep(self.config.idle_poll) => {}
                                _ = shutdown_rx.recv() => {
                                    info!(worker_id = %self.worker.worker_id, "worker shutting down");
                                    break;
                                }
                            }
                        }
                        Err(e) => {
                            // One poisoned iteration must not kill the loop.
                            error!(worker_id = %self.worker.worker_id, error = %e, "claim failed");
                            sleep(self.config.error_backoff).await;
                        }
                    }
                }
            }
        }

        Ok(())
    }

    async fn execute(&self, run: Run, shutdown_rx: &mut broadcast::Receiver<()>) {
        info!(
            worker_id = %self.worker.worker_id,
            run_id = %run.run_id,
            task_id = %run.task_id,
            "run claimed"
        );
        let _ = self
            .worker_repo
            .worker_heartbeat(
                &self.worker.worker_id,
                WorkerStatus::Busy,
                Some(&run.run_id),
            )
            .await;

        let (heartbeat, lease_lost) = self.spawn_heartbeat(run.run_id.clone());

        let outcome = self
            .supervisor
            .supervise(&run, lease_lost, shutdown_rx.resubscribe())
            .await;
        heartbeat.abort();

        match outcome {
            SupervisorOutcome::Finished(status) => {
                info!(run_id = %run.run_id, status = status.as_str(), "run complete");
            }
            SupervisorOutcome::LeaseLost => {
                warn!(run_id = %run.run_id, "run abandoned after lost lease");
            }
        }

        let _ = self
            .worker_repo
            .worker_heartbeat(&self.worker.worker_id, WorkerStatus::Idle, None)
            .await;
    }

    /// Renew the lease every `lease / 3`. Flips the returned watch channel
    /// when renewal reports the lease gone, at which point the supervisor
    /// hard-kills the child and stops touching the run.
    fn spawn_heartbeat(&self, run_id: String) -> (JoinHandle<()>, watch::Receiver<bool>) {
        let (tx, rx) = watch::channel(false);
        let run_repo = Arc::clone(&self.run_repo);
        let worker_repo = Arc::clone(&self.worker_repo);
        let worker_id = self.worker.worker_id.clone();
        let lease = self.config.lease_duration;
        let beat_every = lease / 3;

        let handle = tokio::spawn(async move {
            let mut ticker = interval(beat_every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick fires immediately; skip it, the lease is fresh.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match run_repo.renew_lease(&run_id, &worker_id, lease).await {
                    Ok(()) => {
                        let _ = worker_repo
                            .worker_heartbeat(&worker_id, WorkerStatus::Busy, Some(&run_id))
                            .await;
                    }
                    Err(TaskHubError::LostLease { .. }) => {
                        warn!(run_id = %run_id, worker_id = %worker_id, "lease renewal refused");
                        let _ = tx.send(true);
                        break;
                    }
                    Err(e) => {
                        // Transient store trouble: keep trying, the lease
                        // outlives several missed beats.
                        warn!(run_id = %run_id, error = %e, "lease renewal failed");
                    }
                }
            }
        });

        (handle, rx)
    }
}
