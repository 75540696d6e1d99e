use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

pub type TaskId = String;

static TASK_SEQUENCE: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum TaskStatus {
    Queued,
    Downloading,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    #[must_use]
    pub fn is_active(self) -> bool {
        matches!(self, TaskStatus::Downloading | TaskStatus::Paused)
    }
}

/// What to fetch and where to put it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DownloadRequest {
    pub filename: String,
    pub url: String,
    pub target_path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_hint: Option<u64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub headers: Vec<(String, String)>,
}

impl DownloadRequest {
    #[must_use]
    pub fn new(filename: impl Into<String>, url: impl Into<String>, target_path: impl Into<PathBuf>) -> Self {
        Self {
            filename: filename.into(),
            url: url.into(),
            target_path: target_path.into(),
            size_hint: None,
            headers: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_size_hint(mut self, size_hint: Option<u64>) -> Self {
        self.size_hint = size_hint;
        self
    }

    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// Snapshot-able state of one transfer. Only the orchestrator mutates it.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DownloadTask {
    pub id: TaskId,
    pub filename: String,
    pub source_url: String,
    pub target_path: PathBuf,
    pub status: TaskStatus,
    pub downloaded_bytes: u64,
    pub total_bytes: Option<u64>,
    pub size_hint: Option<u64>,
    /// Offset the transfer resumed from, zero for fresh downloads.
    pub resumed_from: u64,
    pub speed_bytes_per_sec: f64,
    pub eta_seconds: Option<f64>,
    pub error: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub started_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub completed_at: Option<OffsetDateTime>,
    #[serde(skip)]
    pub headers: Vec<(String, String)>,
}

impl DownloadTask {
    pub(crate) fn queued(request: DownloadRequest) -> Self {
        let created_at = OffsetDateTime::now_utc();
        Self {
            id: task_id(&request.filename, created_at),
            filename: request.filename,
            source_url: request.url,
            target_path: request.target_path,
            status: TaskStatus::Queued,
            downloaded_bytes: 0,
            total_bytes: None,
            size_hint: request.size_hint,
            resumed_from: 0,
            speed_bytes_per_sec: 0.0,
            eta_seconds: None,
            error: None,
            created_at,
            started_at: None,
            completed_at: None,
            headers: request.headers,
        }
    }

    /// Applies a status change unless the task already reached a terminal
    /// state. Returns whether the status changed.
    pub(crate) fn transition(&mut self, next: TaskStatus) -> bool {
        if self.status.is_terminal() || self.status == next {
            return false;
        }
        self.status = next;
        match next {
            TaskStatus::Downloading if self.started_at.is_none() => {
                self.started_at = Some(OffsetDateTime::now_utc());
            }
            status if status.is_terminal() => {
                self.completed_at = Some(OffsetDateTime::now_utc());
                self.eta_seconds = None;
            }
            _ => {}
        }
        true
    }

    /// Records the first server-reported total; later reports are ignored.
    pub(crate) fn learn_total(&mut self, total: Option<u64>) {
        if self.total_bytes.is_none() {
            self.total_bytes = total;
        }
    }

    pub(crate) fn advance(&mut self, downloaded: u64) {
        self.downloaded_bytes = self.downloaded_bytes.max(downloaded);
    }

    pub(crate) fn update_rates(&mut self, elapsed_secs: f64) {
        let transferred = self.downloaded_bytes.saturating_sub(self.resumed_from);
        self.speed_bytes_per_sec = if elapsed_secs > 0.0 {
            transferred as f64 / elapsed_secs
        } else {
            0.0
        };
        self.eta_seconds = match self.total_bytes {
            Some(total) if self.speed_bytes_per_sec > 0.0 => Some(
                total.saturating_sub(self.downloaded_bytes) as f64 / self.speed_bytes_per_sec,
            ),
            _ => None,
        };
    }

    #[must_use]
    pub fn progress_fraction(&self) -> Option<f64> {
        match self.total_bytes {
            Some(total) if total > 0 => {
                Some((self.downloaded_bytes as f64 / total as f64).clamp(0.0, 1.0))
            }
            _ => None,
        }
    }
}

fn task_id(filename: &str, at: OffsetDateTime) -> TaskId {
    let seq = TASK_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    format!(
        "{filename}_{}.{:06}-{seq}",
        at.unix_timestamp(),
        at.microsecond()
    )
}
