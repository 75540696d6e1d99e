use std::collections::{HashMap, VecDeque};
use std::env;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use serde::Serialize;

use crate::core::error::{Error, Result};
use crate::core::events::{self, EventBus};

use super::gate::{CancelToken, ResumeGate};
use super::task::{DownloadRequest, DownloadTask, TaskId, TaskStatus};
use super::transfer::{run_transfer, TransferEvent, TransferJob, TransferOutcome};
use super::transport::Transport;

const PROGRESS_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy)]
pub struct OrchestratorConfig {
    pub max_concurrent: usize,
    /// Terminal tasks listed by `status()`.
    pub recent_history: usize,
    /// Terminal tasks kept queryable before the oldest are pruned.
    pub retained_terminal: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 3,
            recent_history: 10,
            retained_terminal: 100,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TerminalTotals {
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestratorStatus {
    pub queue_depth: usize,
    pub active_tasks: Vec<DownloadTask>,
    /// Most recent first.
    pub recent_completed: Vec<DownloadTask>,
    pub totals: TerminalTotals,
}

struct TaskEntry {
    order: u64,
    /// Normalized target used for the one-writer-per-file check.
    target_key: PathBuf,
    task: DownloadTask,
    gate: Arc<ResumeGate>,
    cancel: CancelToken,
    started: Option<Instant>,
    last_sample: Option<Instant>,
}

#[derive(Default)]
struct TaskTable {
    entries: HashMap<TaskId, TaskEntry>,
    finished: VecDeque<TaskId>,
    totals: TerminalTotals,
    next_order: u64,
}

impl TaskTable {
    /// Moves a task into a terminal state and records it in the history.
    fn settle(&mut self, id: &str, status: TaskStatus, events: &EventBus) -> bool {
        let Some(entry) = self.entries.get_mut(id) else {
            return false;
        };
        if !entry.task.transition(status) {
            return false;
        }
        match status {
            TaskStatus::Completed => self.totals.completed += 1,
            TaskStatus::Failed => self.totals.failed += 1,
            _ => self.totals.cancelled += 1,
        }
        events::emit_download_finished(events, &entry.task);
        self.finished.push_back(id.to_string());
        true
    }

    fn prune(&mut self, retained: usize) {
        while self.finished.len() > retained {
            if let Some(id) = self.finished.pop_front() {
                self.entries.remove(&id);
            }
        }
    }
}

struct Shared {
    table: Mutex<TaskTable>,
    transport: Arc<dyn Transport>,
    events: Arc<EventBus>,
    config: OrchestratorConfig,
}

struct StartedJob {
    url: String,
    target: PathBuf,
    headers: Vec<(String, String)>,
    gate: Arc<ResumeGate>,
    cancel: CancelToken,
}

/// Bounded pool of download workers fed from a FIFO queue.
///
/// Callers hold the orchestrator and talk to tasks only by id; the task table
/// is the single source of truth for status snapshots.
pub struct DownloadOrchestrator {
    shared: Arc<Shared>,
    sender: Mutex<Option<Sender<TaskId>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl DownloadOrchestrator {
    pub fn new(
        transport: Arc<dyn Transport>,
        events: Arc<EventBus>,
        config: OrchestratorConfig,
    ) -> Self {
        let (sender, receiver) = unbounded();
        let shared = Arc::new(Shared {
            table: Mutex::new(TaskTable::default()),
            transport,
            events,
            config,
        });
        let workers = (0..config.max_concurrent.max(1))
            .map(|_| {
                let shared = shared.clone();
                let receiver = receiver.clone();
                thread::spawn(move || worker_loop(shared, receiver))
            })
            .collect();
        Self {
            shared,
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(workers),
        }
    }

    pub fn events(&self) -> Arc<EventBus> {
        self.shared.events.clone()
    }

    pub fn config(&self) -> OrchestratorConfig {
        self.shared.config
    }

    /// Queues a download. The duplicate-target check and the insertion happen
    /// under one lock, so at most one live task ever writes a given path.
    pub fn enqueue(&self, mut request: DownloadRequest) -> Result<TaskId> {
        let sender = self.sender.lock();
        let Some(sender) = sender.as_ref() else {
            return Err(Error::ShutDown);
        };
        if request.filename.is_empty() {
            request.filename = request
                .target_path
                .file_name()
                .and_then(|name| name.to_str())
                .unwrap_or_default()
                .to_string();
        }

        let target_key = target_key(&request.target_path);
        let mut table = self.shared.table.lock();
        let taken = table
            .entries
            .values()
            .any(|entry| !entry.task.status.is_terminal() && entry.target_key == target_key);
        if taken {
            return Err(Error::DuplicateTarget(request.target_path));
        }

        let task = DownloadTask::queued(request);
        let id = task.id.clone();
        let order = table.next_order;
        table.next_order += 1;
        tracing::info!("Queued {} -> {}", task.source_url, task.target_path.display());
        events::emit_download_queued(&self.shared.events, &task);
        table.entries.insert(
            id.clone(),
            TaskEntry {
                order,
                target_key,
                task,
                gate: Arc::new(ResumeGate::new()),
                cancel: CancelToken::new(),
                started: None,
                last_sample: None,
            },
        );
        if sender.send(id.clone()).is_err() {
            table.entries.remove(&id);
            return Err(Error::ShutDown);
        }
        Ok(id)
    }

    /// Enqueues each request independently; one failure does not stop the rest.
    pub fn enqueue_all<I>(&self, requests: I) -> Vec<Result<TaskId>>
    where
        I: IntoIterator<Item = DownloadRequest>,
    {
        requests
            .into_iter()
            .map(|request| self.enqueue(request))
            .collect()
    }

    pub fn pause(&self, id: &str) -> Result<bool> {
        let mut table = self.shared.table.lock();
        let entry = table
            .entries
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        if entry.task.status != TaskStatus::Downloading {
            return Ok(false);
        }
        entry.gate.close();
        entry.task.transition(TaskStatus::Paused);
        tracing::info!("Paused {} at {} bytes", id, entry.task.downloaded_bytes);
        events::emit_download_paused(&self.shared.events, &entry.task);
        Ok(true)
    }

    pub fn resume(&self, id: &str) -> Result<bool> {
        let mut table = self.shared.table.lock();
        let entry = table
            .entries
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        if entry.task.status != TaskStatus::Paused {
            return Ok(false);
        }
        entry.task.transition(TaskStatus::Downloading);
        entry.gate.open();
        tracing::info!("Resumed {id}");
        events::emit_download_resumed(&self.shared.events, &entry.task);
        Ok(true)
    }

    /// Queued tasks are cancelled on the spot; running ones are signalled and
    /// settle within one chunk.
    pub fn cancel(&self, id: &str) -> Result<bool> {
        let mut table = self.shared.table.lock();
        let entry = table
            .entries
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        let status = entry.task.status;
        match status {
            status if status.is_terminal() => Ok(false),
            TaskStatus::Queued => {
                let settled = table.settle(id, TaskStatus::Cancelled, &self.shared.events);
                table.prune(self.shared.config.retained_terminal);
                Ok(settled)
            }
            _ => {
                entry.cancel.cancel();
                entry.gate.wake();
                tracing::info!("Cancelling {id}");
                Ok(true)
            }
        }
    }

    pub fn task_status(&self, id: &str) -> Result<DownloadTask> {
        self.shared
            .table
            .lock()
            .entries
            .get(id)
            .map(|entry| entry.task.clone())
            .ok_or_else(|| Error::NotFound(id.to_string()))
    }

    /// Every task still in the table, oldest first.
    pub fn tasks(&self) -> Vec<DownloadTask> {
        let table = self.shared.table.lock();
        let mut entries: Vec<&TaskEntry> = table.entries.values().collect();
        entries.sort_by_key(|entry| entry.order);
        entries.into_iter().map(|entry| entry.task.clone()).collect()
    }

    pub fn status(&self) -> OrchestratorStatus {
        let table = self.shared.table.lock();
        let queue_depth = table
            .entries
            .values()
            .filter(|entry| entry.task.status == TaskStatus::Queued)
            .count();
        let mut active: Vec<&TaskEntry> = table
            .entries
            .values()
            .filter(|entry| entry.task.status.is_active())
            .collect();
        active.sort_by_key(|entry| entry.order);
        let active_tasks = active.into_iter().map(|entry| entry.task.clone()).collect();
        let recent_completed = table
            .finished
            .iter()
            .rev()
            .filter_map(|id| table.entries.get(id))
            .take(self.shared.config.recent_history)
            .map(|entry| entry.task.clone())
            .collect();
        OrchestratorStatus {
            queue_depth,
            active_tasks,
            recent_completed,
            totals: table.totals,
        }
    }

    /// Stops accepting work, cancels everything in flight and joins the
    /// workers.
    pub fn shutdown(&self) {
        self.stop();
        let workers = std::mem::take(&mut *self.workers.lock());
        for worker in workers {
            if worker.join().is_err() {
                tracing::warn!("Download worker panicked during shutdown");
            }
        }
    }

    fn stop(&self) {
        drop(self.sender.lock().take());
        let mut table = self.shared.table.lock();
        let pending: Vec<TaskId> = table
            .entries
            .iter()
            .filter(|(_, entry)| !entry.task.status.is_terminal())
            .map(|(id, _)| id.clone())
            .collect();
        for id in pending {
            let queued = table
                .entries
                .get(&id)
                .map(|entry| entry.task.status == TaskStatus::Queued)
                .unwrap_or(false);
            if queued {
                table.settle(&id, TaskStatus::Cancelled, &self.shared.events);
            } else if let Some(entry) = table.entries.get(&id) {
                entry.cancel.cancel();
                entry.gate.wake();
            }
        }
    }
}

impl Drop for DownloadOrchestrator {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Absolute, lexically cleaned form of `path`, with the parent directory
/// canonicalized when it exists so symlinked aliases compare equal too.
fn target_key(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        env::current_dir().map(|cwd| cwd.join(path)).unwrap_or_else(|_| path.to_path_buf())
    };
    let mut cleaned = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                cleaned.pop();
            }
            other => cleaned.push(other),
        }
    }
    match (cleaned.parent(), cleaned.file_name()) {
        (Some(parent), Some(name)) => match parent.canonicalize() {
            Ok(parent) => parent.join(name),
            Err(_) => cleaned,
        },
        _ => cleaned,
    }
}

fn worker_loop(shared: Arc<Shared>, receiver: Receiver<TaskId>) {
    for id in receiver.iter() {
        let Some(job) = shared.start(&id) else {
            continue;
        };
        let outcome = run_transfer(
            shared.transport.as_ref(),
            &TransferJob {
                url: &job.url,
                target: &job.target,
                headers: &job.headers,
                gate: &job.gate,
                cancel: &job.cancel,
            },
            |event| shared.on_transfer_event(&id, event),
        );
        shared.finish(&id, outcome);
    }
}

impl Shared {
    fn start(&self, id: &str) -> Option<StartedJob> {
        let mut table = self.table.lock();
        let entry = table.entries.get_mut(id)?;
        if entry.task.status != TaskStatus::Queued {
            return None;
        }
        entry.task.transition(TaskStatus::Downloading);
        entry.started = Some(Instant::now());
        tracing::info!("Downloading {} from {}", entry.task.filename, entry.task.source_url);
        events::emit_download_started(&self.events, &entry.task);
        Some(StartedJob {
            url: entry.task.source_url.clone(),
            target: entry.task.target_path.clone(),
            headers: entry.task.headers.clone(),
            gate: entry.gate.clone(),
            cancel: entry.cancel.clone(),
        })
    }

    fn on_transfer_event(&self, id: &str, event: TransferEvent) {
        let mut table = self.table.lock();
        let Some(entry) = table.entries.get_mut(id) else {
            return;
        };
        match event {
            TransferEvent::Opened {
                resumed_from,
                total,
            } => {
                entry.task.resumed_from = resumed_from;
                entry.task.advance(resumed_from);
                entry.task.learn_total(total);
            }
            TransferEvent::Progress { downloaded } => {
                entry.task.advance(downloaded);
                let now = Instant::now();
                let due = entry
                    .last_sample
                    .map_or(true, |last| now.duration_since(last) >= PROGRESS_INTERVAL);
                if due {
                    let elapsed = entry
                        .started
                        .map(|started| now.duration_since(started).as_secs_f64())
                        .unwrap_or_default();
                    entry.task.update_rates(elapsed);
                    entry.last_sample = Some(now);
                    events::emit_download_progress(&self.events, &entry.task);
                }
            }
        }
    }

    fn finish(&self, id: &str, outcome: Result<TransferOutcome>) {
        let mut table = self.table.lock();
        let Some(entry) = table.entries.get_mut(id) else {
            return;
        };
        if let Some(started) = entry.started {
            entry.task.update_rates(started.elapsed().as_secs_f64());
        }
        let status = match outcome {
            Ok(outcome) => {
                entry.task.advance(outcome.downloaded);
                entry.task.learn_total(outcome.total);
                tracing::info!(
                    "Completed {} ({} bytes)",
                    outcome.path.display(),
                    outcome.downloaded
                );
                TaskStatus::Completed
            }
            Err(error) if error.is_cancelled() => {
                tracing::info!("Cancelled {id} at {} bytes", entry.task.downloaded_bytes);
                TaskStatus::Cancelled
            }
            Err(error) => {
                tracing::warn!("Download {id} failed: {error}");
                entry.task.error = Some(error.to_string());
                TaskStatus::Failed
            }
        };
        table.settle(id, status, &self.events);
        table.prune(self.config.retained_terminal);
    }
}
