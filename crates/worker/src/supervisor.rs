//! Child-process supervision: spawn in a fresh process group, drain output
//! into logs and the event store, enforce cancellation escalation, classify
//! the outcome.

use std::path::{Component, Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::{json, Value};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use taskhub_common::pgroup;
use taskhub_domain::{Artifact, ArtifactRepository, EventRepository, Run, RunRepository, RunStatus};
use taskhub_errors::TaskHubError;
use taskhub_registry::Registry;

use crate::stream::read_capped_line;
use crate::wire;

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub data_dir: PathBuf,
    /// Pause between SIGTERM and SIGKILL during cancellation.
    pub soft_grace: Duration,
    /// How often the cancel flag and the deadline are checked.
    pub cancel_poll: Duration,
    /// Per-line byte cap; longer lines are truncated and flagged.
    pub max_line_len: usize,
    /// Capacity of the in-process event queue per supervised run.
    pub event_buffer: usize,
    /// How long a queue send may stall before lines start coalescing.
    pub send_stall: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            soft_grace: Duration::from_secs(10),
            cancel_poll: Duration::from_millis(500),
            max_line_len: 8192,
            event_buffer: 4096,
            send_stall: Duration::from_secs(5),
        }
    }
}

/// How a supervised run ended, from the worker's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorOutcome {
    Finished(RunStatus),
    /// The reaper took the run; nothing was written to the run row.
    LeaseLost,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CancelKind {
    User,
    Timeout,
    Shutdown,
}

#[derive(Debug, Clone, Copy)]
enum StreamKind {
    Stdout,
    Stderr,
}

impl StreamKind {
    fn event_type(self) -> &'static str {
        match self {
            StreamKind::Stdout => wire::EVENT_STDOUT,
            StreamKind::Stderr => wire::EVENT_STDERR,
        }
    }

    fn name(self) -> &'static str {
        match self {
            StreamKind::Stdout => "stdout",
            StreamKind::Stderr => "stderr",
        }
    }
}

enum WriterMsg {
    Structured { event_type: String, data: Value },
    Plain { stream: StreamKind, line: String, truncated: bool },
    Overflow { stream: StreamKind, coalesced: u64 },
}

pub struct Supervisor {
    worker_id: String,
    registry: Arc<Registry>,
    run_repo: Arc<dyn RunRepository>,
    event_repo: Arc<dyn EventRepository>,
    artifact_repo: Arc<dyn ArtifactRepository>,
    config: SupervisorConfig,
}

impl Supervisor {
    pub fn new(
        worker_id: String,
        registry: Arc<Registry>,
        run_repo: Arc<dyn RunRepository>,
        event_repo: Arc<dyn EventRepository>,
        artifact_repo: Arc<dyn ArtifactRepository>,
        config: SupervisorConfig,
    ) -> Self {
        Self {
            worker_id,
            registry,
            run_repo,
            event_repo,
            artifact_repo,
            config,
        }
    }

    /// Drive a freshly claimed run to a terminal state.
    ///
    /// `lease_lost` flips when the heartbeat discovers the reaper took the
    /// run; `shutdown_rx` fires on graceful worker shutdown.
    pub async fn supervise(
        &self,
        run: &Run,
        mut lease_lost: watch::Receiver<bool>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> SupervisorOutcome {
        let argv = match self.build_argv(run) {
            Ok(argv) => argv,
            Err(message) => return self.fail_early(run, &message).await,
        };

        let run_dir = self.config.data_dir.join("runs").join(&run.run_id);
        if let Err(e) = fs::create_dir_all(run_dir.join("artifacts")).await {
            return self
                .fail_early(run, &format!("spawn_failed: cannot create run dir: {e}"))
                .await;
        }
        let stdout_log = match open_append(run_dir.join("stdout.log")).await {
            Ok(f) => f,
            Err(e) => {
                return self
                    .fail_early(run, &format!("spawn_failed: cannot open stdout.log: {e}"))
                    .await
            }
        };
        let stderr_log = match open_append(run_dir.join("stderr.log")).await {
            Ok(f) => f,
            Err(e) => {
                return self
                    .fail_early(run, &format!("spawn_failed: cannot open stderr.log: {e}"))
                    .await
            }
        };

        let mut cmd = Command::new(&argv[0]);
        cmd.args(&argv[1..])
            .current_dir(&run_dir)
            .env("TASKHUB_RUN_ID", &run.run_id)
            .env("TASKHUB_ARTIFACTS_DIR", run_dir.join("artifacts"))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => return self.fail_early(run, &format!("spawn_failed: {e}")).await,
        };

        // With process_group(0) the child leads its own group: pgid == pid.
        let pgid = child.id().map(|id| id as i32).unwrap_or_default();
        if let Err(e) = self.run_repo.set_pgid(&run.run_id, &self.worker_id, pgid).await {
            warn!(run_id = %run.run_id, error = %e, "lost run before child startup, killing group");
            let _ = pgroup::kill_group(pgid);
            let _ = child.wait().await;
            return SupervisorOutcome::LeaseLost;
        }
        debug!(run_id = %run.run_id, pgid, command = %argv[0], "child spawned");

        let (stdout, stderr) = match (child.stdout.take(), child.stderr.take()) {
            (Some(out), Some(err)) => (out, err),
            _ => {
                let _ = pgroup::kill_group(pgid);
                let _ = child.wait().await;
                return self
                    .fail_early(run, "spawn_failed: child pipes unavailable")
                    .await;
            }
        };

        let (tx, rx) = mpsc::channel::<WriterMsg>(self.config.event_buffer);
        let stdout_task = tokio::spawn(drain_stream(
            BufReader::new(stdout),
            stdout_log,
            StreamKind::Stdout,
            tx.clone(),
            self.config.max_line_len,
            self.config.send_stall,
        ));
        let stderr_task = tokio::spawn(drain_stream(
            BufReader::new(stderr),
            stderr_log,
            StreamKind::Stderr,
            tx,
            self.config.max_line_len,
            self.config.send_stall,
        ));
        let writer_task = tokio::spawn(event_writer(
            rx,
            WriterCtx {
                run_id: run.run_id.clone(),
                run_dir: run_dir.clone(),
                event_repo: Arc::clone(&self.event_repo),
                artifact_repo: Arc::clone(&self.artifact_repo),
            },
        ));

        let mut poll = interval(self.config.cancel_poll);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut cancel: Option<CancelKind> = None;
        // Disabled once the corresponding channel closes, so a dropped
        // sender neither spins the loop nor fakes a shutdown.
        let mut watch_lease = true;
        let mut watch_shutdown = true;

        let exit_status = loop {
            tokio::select! {
                status = child.wait() => break status.ok(),
                _ = poll.tick() => {
                    if let Some(kind) = self.poll_cancel(run).await {
                        cancel = Some(kind);
                        self.emit_cancel_event(&run.run_id, kind).await;
                        break self.escalate(&mut child, pgid).await;
                    }
                }
                changed = lease_lost.changed(), if watch_lease => {
                    match changed {
                        Ok(()) if *lease_lost.borrow() => {
                            warn!(run_id = %run.run_id, "lease lost mid-run, hard-killing child");
                            let _ = pgroup::kill_group(pgid);
                            let _ = child.wait().await;
                            // The run belongs to the reaper now; drop all output.
                            stdout_task.abort();
                            stderr_task.abort();
                            writer_task.abort();
                            return SupervisorOutcome::LeaseLost;
                        }
                        Ok(()) => {}
                        Err(_) => watch_lease = false,
                    }
                }
                received = shutdown_rx.recv(), if watch_shutdown => {
                    match received {
                        Ok(()) | Err(broadcast::error::RecvError::Lagged(_)) => {
                            cancel = Some(CancelKind::Shutdown);
                            self.emit_cancel_event(&run.run_id, CancelKind::Shutdown).await;
                            break self.escalate(&mut child, pgid).await;
                        }
                        Err(broadcast::error::RecvError::Closed) => watch_shutdown = false,
                    }
                }
            }
        };

        // Child is gone; the drains finish at pipe EOF, then the writer
        // drains the queue and exits.
        let _ = stdout_task.await;
        let _ = stderr_task.await;
        let _ = writer_task.await;

        self.finalize(run, cancel, exit_status).await
    }

    fn build_argv(&self, run: &Run) -> Result<Vec<String>, String> {
        let Some(spec) = self.registry.get(&run.task_id) else {
            return Err(format!(
                "build_command_failed: task {} not in registry",
                run.task_id
            ));
        };
        match spec.build_command(&run.params) {
            Ok(argv) if argv.is_empty() => {
                Err("build_command_failed: empty command".to_string())
            }
            Ok(argv) => Ok(argv),
            Err(e) => Err(format!("build_command_failed: {e}")),
        }
    }

    async fn poll_cancel(&self, run: &Run) -> Option<CancelKind> {
        if let Some(deadline) = run.deadline_at {
            if Utc::now() >= deadline {
                return Some(CancelKind::Timeout);
            }
        }
        match self.run_repo.get_run(&run.run_id).await {
            Ok(Some(current)) if current.cancel_requested => Some(CancelKind::User),
            Ok(_) => None,
            Err(e) => {
                warn!(run_id = %run.run_id, error = %e, "cancel poll failed");
                None
            }
        }
    }

    /// SIGTERM the group, give it `soft_grace`, then SIGKILL.
    async fn escalate(&self, child: &mut Child, pgid: i32) -> Option<std::process::ExitStatus> {
        if let Err(e) = pgroup::terminate_group(pgid) {
            warn!(pgid, error = %e, "SIGTERM failed");
        }
        match timeout(self.config.soft_grace, child.wait()).await {
            Ok(result) => result.ok(),
            Err(_) => {
                warn!(pgid, "soft grace elapsed, sending SIGKILL");
                if let Err(e) = pgroup::kill_group(pgid) {
                    warn!(pgid, error = %e, "SIGKILL failed");
                }
                child.wait().await.ok()
            }
        }
    }

    async fn emit_cancel_event(&self, run_id: &str, kind: CancelKind) {
        let reason = match kind {
            CancelKind::User => "cancel_requested",
            CancelKind::Timeout => "timeout",
            CancelKind::Shutdown => "worker_shutdown",
        };
        if let Err(e) = self
            .event_repo
            .append_event(run_id, wire::EVENT_SYSTEM, json!({"action": "cancel", "reason": reason}))
            .await
        {
            warn!(run_id, error = %e, "failed to record cancel event");
        }
    }

    async fn finalize(
        &self,
        run: &Run,
        cancel: Option<CancelKind>,
        exit_status: Option<std::process::ExitStatus>,
    ) -> SupervisorOutcome {
        // The flag may have been set between polls while the child exited on
        // its own; classification depends only on cancel_requested.
        let flag_set = match self.run_repo.get_run(&run.run_id).await {
            Ok(Some(current)) => current.cancel_requested,
            _ => false,
        };
        let exit_code = exit_status.and_then(|s| s.code());

        let (status, exit_code, error) = if matches!(cancel, Some(CancelKind::Shutdown)) {
            (RunStatus::Canceled, exit_code, Some("worker_shutdown".to_string()))
        } else if matches!(cancel, Some(CancelKind::User)) || flag_set {
            (RunStatus::Canceled, exit_code, Some("canceled".to_string()))
        } else if matches!(cancel, Some(CancelKind::Timeout)) {
            (RunStatus::Failed, exit_code, Some("timeout".to_string()))
        } else {
            match exit_status {
                Some(status) if status.success() => (RunStatus::Succeeded, Some(0), None),
                Some(status) => match status.code() {
                    Some(code) => (
                        RunStatus::Failed,
                        Some(code),
                        Some(format!("exit_code={code}")),
                    ),
                    None => (
                        RunStatus::Failed,
                        None,
                        Some(format!("killed by signal {}", exit_signal(&status))),
                    ),
                },
                None => (
                    RunStatus::Failed,
                    None,
                    Some("wait for child failed".to_string()),
                ),
            }
        };

        match self
            .run_repo
            .finish_run(&run.run_id, &self.worker_id, status, exit_code, error.as_deref())
            .await
        {
            Ok(_) => {
                info!(
                    run_id = %run.run_id,
                    status = status.as_str(),
                    exit_code = ?exit_code,
                    "run finalized"
                );
                SupervisorOutcome::Finished(status)
            }
            Err(TaskHubError::LostLease { .. }) => {
                warn!(run_id = %run.run_id, "run was reaped before finalization");
                SupervisorOutcome::LeaseLost
            }
            Err(e) => {
                error!(run_id = %run.run_id, error = %e, "failed to finalize run");
                SupervisorOutcome::Finished(status)
            }
        }
    }

    /// Finalize a run that never produced a child worth supervising.
    async fn fail_early(&self, run: &Run, message: &str) -> SupervisorOutcome {
        warn!(run_id = %run.run_id, message, "run failed before execution");
        match self
            .run_repo
            .finish_run(
                &run.run_id,
                &self.worker_id,
                RunStatus::Failed,
                None,
                Some(message),
            )
            .await
        {
            Ok(_) => SupervisorOutcome::Finished(RunStatus::Failed),
            Err(TaskHubError::LostLease { .. }) => SupervisorOutcome::LeaseLost,
            Err(e) => {
                error!(run_id = %run.run_id, error = %e, "failed to record early failure");
                SupervisorOutcome::Finished(RunStatus::Failed)
            }
        }
    }
}

#[cfg(unix)]
fn exit_signal(status: &std::process::ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status.signal().unwrap_or_default()
}

#[cfg(not(unix))]
fn exit_signal(_status: &std::process::ExitStatus) -> i32 {
    0
}

async fn open_append(path: PathBuf) -> std::io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path).await
}

/// Copy one pipe into its log file and feed parsed lines to the writer.
///
/// A full queue pauses reads (backpressure through `send`); a send stalled
/// past `send_stall` switches to coalescing: lines keep landing in the log
/// but are only counted, and one overflow marker is emitted once the queue
/// drains. Nothing is dropped silently.
async fn drain_stream<R>(
    mut reader: BufReader<R>,
    mut log: File,
    stream: StreamKind,
    tx: mpsc::Sender<WriterMsg>,
    max_line_len: usize,
    send_stall: Duration,
) where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut coalesced: u64 = 0;

    loop {
        let (line, truncated) = match read_capped_line(&mut reader, max_line_len).await {
            Ok(Some(item)) => item,
            Ok(None) => break,
            Err(e) => {
                warn!(stream = stream.name(), error = %e, "pipe read failed");
                break;
            }
        };

        if let Err(e) = log.write_all(line.as_bytes()).await {
            warn!(stream = stream.name(), error = %e, "log write failed");
        } else {
            let _ = log.write_all(b"\n").await;
        }

        let msg = match stream {
            StreamKind::Stdout => match wire::parse_structured(&line) {
                Some((event_type, data)) => WriterMsg::Structured { event_type, data },
                None => WriterMsg::Plain {
                    stream,
                    line,
                    truncated,
                },
            },
            StreamKind::Stderr => WriterMsg::Plain {
                stream,
                line,
                truncated,
            },
        };

        if coalesced > 0 {
            // Still recovering from a stall: only resume once there is room
            // for the overflow marker.
            match tx.try_reserve() {
                Ok(permit) => {
                    permit.send(WriterMsg::Overflow { stream, coalesced });
                    coalesced = 0;
                }
                Err(_) => {
                    coalesced += 1;
                    continue;
                }
            }
        }

        match timeout(send_stall, tx.send(msg)).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => break, // writer gone
            Err(_) => coalesced += 1,
        }
    }

    if coalesced > 0 {
        let _ = tx.send(WriterMsg::Overflow { stream, coalesced }).await;
    }
    let _ = log.flush().await;
}

struct WriterCtx {
    run_id: String,
    run_dir: PathBuf,
    event_repo: Arc<dyn EventRepository>,
    artifact_repo: Arc<dyn ArtifactRepository>,
}

/// Single consumer of the per-run event queue; the only database writer for
/// this run's stream output.
async fn event_writer(mut rx: mpsc::Receiver<WriterMsg>, ctx: WriterCtx) {
    while let Some(msg) = rx.recv().await {
        let result = match msg {
            WriterMsg::Structured { event_type, data } => {
                if event_type == wire::EVENT_ARTIFACT {
                    record_artifact(&ctx, data).await
                } else {
                    ctx.event_repo
                        .append_event(&ctx.run_id, &event_type, data)
                        .await
                        .map(|_| ())
                }
            }
            WriterMsg::Plain {
                stream,
                line,
                truncated,
            } => ctx
                .event_repo
                .append_event(
                    &ctx.run_id,
                    stream.event_type(),
                    wire::line_payload(&line, truncated),
                )
                .await
                .map(|_| ()),
            WriterMsg::Overflow { stream, coalesced } => ctx
                .event_repo
                .append_event(
                    &ctx.run_id,
                    wire::EVENT_SYSTEM,
                    json!({
                        "action": "overflow",
                        "stream": stream.name(),
                        "coalesced_lines": coalesced,
                    }),
                )
                .await
                .map(|_| ()),
        };
        if let Err(e) = result {
            error!(run_id = %ctx.run_id, error = %e, "event write failed");
        }
    }
}

/// Verify an artifact manifest and persist both the row and the event.
async fn record_artifact(ctx: &WriterCtx, data: Value) -> Result<(), TaskHubError> {
    let path = data.get("path").and_then(Value::as_str).unwrap_or_default();

    let Some(relative) = sanitize_relative(path) else {
        ctx.event_repo
            .append_event(
                &ctx.run_id,
                wire::EVENT_SYSTEM,
                json!({
                    "action": "artifact_rejected",
                    "reason": "path escapes run directory",
                    "path": path,
                }),
            )
            .await?;
        return Ok(());
    };

    let absolute = ctx.run_dir.join(&relative);
    let size_bytes = match fs::metadata(&absolute).await {
        Ok(meta) if meta.is_file() => meta.len() as i64,
        _ => {
            ctx.event_repo
                .append_event(
                    &ctx.run_id,
                    wire::EVENT_SYSTEM,
                    json!({
                        "action": "artifact_rejected",
                        "reason": "file not found in run directory",
                        "path": path,
                    }),
                )
                .await?;
            return Ok(());
        }
    };

    let title = data.get("title").and_then(Value::as_str).unwrap_or(path);
    let kind = data.get("kind").and_then(Value::as_str).unwrap_or("binary");
    let mime = data
        .get("mime")
        .and_then(Value::as_str)
        .unwrap_or("application/octet-stream");
    let file_id = data
        .get("file_id")
        .and_then(Value::as_str)
        .map(String::from)
        .unwrap_or_else(|| {
            let rand = Uuid::new_v4().simple().to_string();
            format!("f-{}", &rand[..8])
        });

    let artifact = Artifact::new(
        &ctx.run_id,
        &file_id,
        title,
        kind,
        mime,
        &relative.to_string_lossy(),
        size_bytes,
    );
    ctx.artifact_repo.insert_artifact(&artifact).await?;
    ctx.event_repo
        .append_event(&ctx.run_id, wire::EVENT_ARTIFACT, data)
        .await?;
    Ok(())
}

/// Normalize a manifest path; reject absolute paths and parent traversal.
fn sanitize_relative(path: &str) -> Option<PathBuf> {
    if path.is_empty() {
        return None;
    }
    let raw = Path::new(path);
    if raw.is_absolute() {
        return None;
    }
    let mut clean = PathBuf::new();
    for component in raw.components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir => {}
            _ => return None,
        }
    }
    if clean.as_os_str().is_empty() {
        None
    } else {
        Some(clean)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_accepts_nested_relative_paths() {
        assert_eq!(
            sanitize_relative("files/report.html").unwrap(),
            PathBuf::from("files/report.html")
        );
        assert_eq!(
            sanitize_relative("./files/a.csv").unwrap(),
            PathBuf::from("files/a.csv")
        );
    }

    #[test]
    fn sanitize_rejects_escapes() {
        assert!(sanitize_relative("/etc/passwd").is_none());
        assert!(sanitize_relative("../outside.txt").is_none());
        assert!(sanitize_relative("files/../../outside.txt").is_none());
        assert!(sanitize_relative("").is_none());
        assert!(sanitize_relative(".").is_none());
    }
}
