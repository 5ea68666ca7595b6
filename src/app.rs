use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::info;

use taskhub_api::{create_routes, AppState};
use taskhub_dispatcher::{ReaperConfig, ReaperService, SchedulerConfig, SchedulerService};
use taskhub_registry::Registry;
use taskhub_store::{
    DatabaseManager, SqliteArtifactStore, SqliteCronStore, SqliteEventStore, SqliteRunStore,
    SqliteWorkerStore,
};
use taskhub_worker::{WorkerConfig, WorkerService};

use crate::config::AppConfig;
use crate::shutdown::ShutdownManager;

pub enum AppMode {
    Api { host: String, port: u16 },
    Worker,
    Scheduler { tick_seconds: u64 },
    Reaper { interval_seconds: Option<u64> },
}

pub struct Application {
    config: AppConfig,
}

impl Application {
    pub fn new(config: AppConfig) -> Self {
        Self { config }
    }

    pub async fn run(self, mode: AppMode) -> Result<()> {
        if let Some(parent) = std::path::Path::new(&self.config.db_path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("cannot create database directory {parent:?}"))?;
            }
        }

        let manager = DatabaseManager::open(&self.config.db_path, 10).await?;
        manager.migrate().await?;
        let pool = manager.pool().clone();

        let run_repo = Arc::new(SqliteRunStore::new(pool.clone()));
        let event_repo = Arc::new(SqliteEventStore::new(pool.clone()));
        let artifact_repo = Arc::new(SqliteArtifactStore::new(pool.clone()));
        let worker_repo = Arc::new(SqliteWorkerStore::new(pool.clone()));
        let cron_repo = Arc::new(SqliteCronStore::new(pool));

        let registry = Arc::new(Registry::with_builtin_tasks());
        info!(tasks = registry.len(), "task registry loaded");

        let shutdown = ShutdownManager::new();
        shutdown.listen_for_signals();

        match mode {
            AppMode::Api { host, port } => {
                let state = AppState {
                    registry,
                    run_repo,
                    event_repo,
                    artifact_repo,
                    worker_repo,
                    cron_repo,
                    data_dir: self.config.data_dir.clone(),
                };
                let router = create_routes(state);

                let listener = tokio::net::TcpListener::bind((host.as_str(), port))
                    .await
                    .with_context(|| format!("cannot bind {host}:{port}"))?;
                info!(%host, port, "api server listening");

                let mut shutdown_rx = shutdown.subscribe();
                axum::serve(listener, router)
                    .with_graceful_shutdown(async move {
                        let _ = shutdown_rx.recv().await;
                    })
                    .await
                    .context("api server failed")?;
            }
            AppMode::Worker => {
                let service = WorkerService::new(
                    registry,
                    run_repo,
                    event_repo,
                    artifact_repo,
                    worker_repo,
                    WorkerConfig {
                        hostname: self.config.hostname.clone(),
                        data_dir: self.config.data_dir.clone(),
                        lease_duration: self.config.lease_duration,
                        soft_grace: self.config.soft_grace,
                        ..WorkerConfig::default()
                    },
                );
                info!(worker_id = %service.worker_id(), "starting worker");
                service.run(shutdown.subscribe()).await?;
            }
            AppMode::Scheduler { tick_seconds } => {
                let service = SchedulerService::new(
                    run_repo,
                    cron_repo,
                    registry.snapshot(),
                    SchedulerConfig {
                        tick_interval: Duration::from_secs(tick_seconds.max(1)),
                    },
                );
                service.run(shutdown.subscribe()).await;
            }
            AppMode::Reaper { interval_seconds } => {
                let sweep_interval = interval_seconds
                    .map(Duration::from_secs)
                    .unwrap_or(self.config.reaper_interval);
                let service = ReaperService::new(
                    run_repo,
                    event_repo,
                    worker_repo,
                    ReaperConfig {
                        sweep_interval,
                        lease_duration: self.config.lease_duration,
                        ..ReaperConfig::default()
                    },
                );
                service.run(shutdown.subscribe()).await;
            }
        }

        manager.close().await;
        info!("shutdown complete");
        Ok(())
    }
}
