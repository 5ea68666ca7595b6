use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use tokio::sync::broadcast;

use taskhub_dispatcher::{ReaperConfig, ReaperService, SchedulerConfig, SchedulerService};
use taskhub_domain::{
    CronEntry, CronRepository, EventRepository, RegistrySnapshot, RunFilter, RunRepository,
    RunStatus, TaskDescriptor, WorkerInfo, WorkerRepository,
};
use taskhub_store::{
    DatabaseManager, SqliteCronStore, SqliteEventStore, SqliteRunStore, SqliteWorkerStore,
};

struct Stores {
    runs: Arc<SqliteRunStore>,
    events: Arc<SqliteEventStore>,
    workers: Arc<SqliteWorkerStore>,
    cron: Arc<SqliteCronStore>,
}

async fn setup() -> Stores {
    let manager = DatabaseManager::open("sqlite::memory:", 1).await.unwrap();
    manager.migrate().await.unwrap();
    let pool = manager.pool().clone();
    Stores {
        runs: Arc::new(SqliteRunStore::new(pool.clone())),
        events: Arc::new(SqliteEventStore::new(pool.clone())),
        workers: Arc::new(SqliteWorkerStore::new(pool.clone())),
        cron: Arc::new(SqliteCronStore::new(pool)),
    }
}

fn snapshot(task_id: &str, enabled: bool) -> RegistrySnapshot {
    RegistrySnapshot::new(vec![TaskDescriptor {
        task_id: task_id.to_string(),
        version: "1.0.0".into(),
        schema_hash: "hash".into(),
        is_enabled: enabled,
        concurrency_limit: None,
        timeout_seconds: None,
    }])
}

fn scheduler(stores: &Stores, snapshot: RegistrySnapshot) -> SchedulerService {
    SchedulerService::new(
        stores.runs.clone(),
        stores.cron.clone(),
        snapshot,
        SchedulerConfig::default(),
    )
}

fn reaper(stores: &Stores) -> ReaperService {
    ReaperService::new(
        stores.runs.clone(),
        stores.events.clone(),
        stores.workers.clone(),
        ReaperConfig {
            sweep_interval: Duration::from_secs(60),
            term_grace: Duration::from_millis(10),
            lease_duration: Duration::from_secs(60),
        },
    )
}

#[tokio::test]
async fn overdue_entry_fires_exactly_once() {
    let stores = setup().await;
    let scheduler = scheduler(&stores, snapshot("demo", true));

    // Ten minutes of missed every-minute fires coalesce into one run.
    let entry = CronEntry::new(
        "demo",
        "minutely",
        "* * * * *",
        json!({"n": 1}),
        Utc::now() - chrono::Duration::minutes(10),
    );
    stores.cron.create_cron(&entry).await.unwrap();

    scheduler.tick().await.unwrap();

    let runs = stores.runs.list_runs(&RunFilter::default()).await.unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].cron_id.as_deref(), Some(entry.cron_id.as_str()));
    assert_eq!(runs[0].params, json!({"n": 1}));

    let advanced = stores.cron.get_cron(&entry.cron_id).await.unwrap().unwrap();
    assert!(advanced.next_run_at > Utc::now());
    assert!(advanced.last_run_at.is_some());

    // Entry is no longer due, so a second tick enqueues nothing.
    scheduler.tick().await.unwrap();
    let runs = stores.runs.list_runs(&RunFilter::default()).await.unwrap();
    assert_eq!(runs.len(), 1);
}

#[tokio::test]
async fn disabled_task_still_advances_its_entry() {
    let stores = setup().await;
    let scheduler = scheduler(&stores, snapshot("demo", false));

    let entry = CronEntry::new(
        "demo",
        "minutely",
        "* * * * *",
        json!({}),
        Utc::now() - chrono::Duration::minutes(1),
    );
    stores.cron.create_cron(&entry).await.unwrap();

    scheduler.tick().await.unwrap();

    // No run materialized, but the entry moved on instead of staying due.
    assert!(stores
        .runs
        .list_runs(&RunFilter::default())
        .await
        .unwrap()
        .is_empty());
    let advanced = stores.cron.get_cron(&entry.cron_id).await.unwrap().unwrap();
    assert!(advanced.next_run_at > Utc::now());
}

#[tokio::test]
async fn unknown_task_does_not_wedge_the_loop() {
    let stores = setup().await;
    let scheduler = scheduler(&stores, snapshot("other", true));

    let entry = CronEntry::new(
        "vanished",
        "minutely",
        "* * * * *",
        json!({}),
        Utc::now() - chrono::Duration::minutes(1),
    );
    stores.cron.create_cron(&entry).await.unwrap();

    scheduler.tick().await.unwrap();
    assert!(stores.cron.poll_due_cron(Utc::now()).await.unwrap().is_empty());
}

#[tokio::test]
async fn reaper_abandons_expired_lease_and_records_event() {
    let stores = setup().await;
    let snap = snapshot("demo", true);

    stores
        .runs
        .enqueue_run("demo", json!({}), &snap, None)
        .await
        .unwrap();
    let run = stores
        .runs
        .claim_next("w-dead", Duration::from_millis(10), &snap)
        .await
        .unwrap()
        .unwrap();
    // A pgid no live process group can have, so the kill path is a no-op.
    stores
        .runs
        .set_pgid(&run.run_id, "w-dead", 2_000_000_000)
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(30)).await;
    reaper(&stores).sweep().await.unwrap();

    let failed = stores.runs.get_run(&run.run_id).await.unwrap().unwrap();
    assert_eq!(failed.status, RunStatus::Failed);
    let error = failed.error.unwrap();
    assert!(error.contains("lease_expired"));
    assert!(error.contains("w-dead"));
    assert!(failed.lease_owner.is_none());
    assert!(failed.pgid.is_none());

    let events = stores.events.list_events(&run.run_id, 0, 10).await.unwrap();
    assert!(events
        .items
        .iter()
        .any(|e| e.event_type == "system" && e.data["action"] == "reaped"));
}

#[tokio::test]
async fn reaper_leaves_valid_leases_alone() {
    let stores = setup().await;
    let snap = snapshot("demo", true);

    stores
        .runs
        .enqueue_run("demo", json!({}), &snap, None)
        .await
        .unwrap();
    let run = stores
        .runs
        .claim_next("w-alive", Duration::from_secs(60), &snap)
        .await
        .unwrap()
        .unwrap();

    reaper(&stores).sweep().await.unwrap();

    let untouched = stores.runs.get_run(&run.run_id).await.unwrap().unwrap();
    assert_eq!(untouched.status, RunStatus::Running);
    assert_eq!(untouched.lease_owner.as_deref(), Some("w-alive"));
    assert!(stores
        .events
        .list_events(&run.run_id, 0, 10)
        .await
        .unwrap()
        .items
        .is_empty());
}

#[tokio::test]
async fn reaper_prunes_stale_worker_rows() {
    let stores = setup().await;

    let mut stale = WorkerInfo::new("host-a", 1);
    stale.last_heartbeat = Utc::now() - chrono::Duration::minutes(30);
    stores.workers.upsert_worker(&stale).await.unwrap();

    let fresh = WorkerInfo::new("host-b", 2);
    stores.workers.upsert_worker(&fresh).await.unwrap();

    reaper(&stores).sweep().await.unwrap();

    let left = stores.workers.list_workers().await.unwrap();
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].worker_id, fresh.worker_id);
}

#[tokio::test]
async fn scheduler_loop_stops_on_shutdown() {
    let stores = setup().await;
    let scheduler = scheduler(&stores, snapshot("demo", true));
    let (tx, rx) = broadcast::channel(1);

    let handle = tokio::spawn(async move { scheduler.run(rx).await });
    tokio::time::sleep(Duration::from_millis(50)).await;
    tx.send(()).unwrap();

    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("scheduler did not stop")
        .unwrap();
}
