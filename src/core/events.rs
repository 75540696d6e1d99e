use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use serde::Serialize;

use crate::downloads::DownloadTask;

pub const EVENT_DOWNLOAD_QUEUED: &str = "download-queued";
pub const EVENT_DOWNLOAD_STARTED: &str = "download-started";
pub const EVENT_DOWNLOAD_PROGRESS: &str = "download-progress";
pub const EVENT_DOWNLOAD_PAUSED: &str = "download-paused";
pub const EVENT_DOWNLOAD_RESUMED: &str = "download-resumed";
pub const EVENT_DOWNLOAD_FINISHED: &str = "download-finished";

#[derive(Debug, Clone, Serialize)]
pub struct DownloadEvent {
    pub kind: &'static str,
    pub task: DownloadTask,
}

/// Fans download snapshots out to every live subscriber.
#[derive(Debug, Default)]
pub struct EventBus {
    subscribers: Mutex<Vec<Sender<DownloadEvent>>>,
}

impl EventBus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Receiver<DownloadEvent> {
        let (sender, receiver) = unbounded();
        self.subscribers.lock().push(sender);
        receiver
    }

    pub fn emit(&self, kind: &'static str, task: &DownloadTask) {
        let mut subscribers = self.subscribers.lock();
        if subscribers.is_empty() {
            return;
        }
        let event = DownloadEvent {
            kind,
            task: task.clone(),
        };
        subscribers.retain(|subscriber| subscriber.send(event.clone()).is_ok());
    }
}

pub fn emit_download_queued(bus: &EventBus, task: &DownloadTask) {
    bus.emit(EVENT_DOWNLOAD_QUEUED, task);
}

pub fn emit_download_started(bus: &EventBus, task: &DownloadTask) {
    bus.emit(EVENT_DOWNLOAD_STARTED, task);
}

pub fn emit_download_progress(bus: &EventBus, task: &DownloadTask) {
    bus.emit(EVENT_DOWNLOAD_PROGRESS, task);
}

pub fn emit_download_paused(bus: &EventBus, task: &DownloadTask) {
    bus.emit(EVENT_DOWNLOAD_PAUSED, task);
}

pub fn emit_download_resumed(bus: &EventBus, task: &DownloadTask) {
    bus.emit(EVENT_DOWNLOAD_RESUMED, task);
}

pub fn emit_download_finished(bus: &EventBus, task: &DownloadTask) {
    bus.emit(EVENT_DOWNLOAD_FINISHED, task);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::downloads::{DownloadRequest, DownloadTask};

    #[test]
    fn dropped_subscribers_are_pruned() {
        let bus = EventBus::new();
        let kept = bus.subscribe();
        drop(bus.subscribe());
        let task = DownloadTask::queued(DownloadRequest::new("a", "http://h/a", "/m/a"));

        emit_download_queued(&bus, &task);
        assert_eq!(bus.subscribers.lock().len(), 1);
        let event = kept.try_recv().unwrap();
        assert_eq!(event.kind, EVENT_DOWNLOAD_QUEUED);
        assert_eq!(event.task.id, task.id);
    }
}
