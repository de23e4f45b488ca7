use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EntryStatus {
    Pending,
    Resolving,
    Transferring,
    Completed,
    Failed,
}

impl EntryStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, EntryStatus::Completed | EntryStatus::Failed)
    }

    pub fn is_active(&self) -> bool {
        matches!(self, EntryStatus::Resolving | EntryStatus::Transferring)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct QueueEntryInfo {
    pub id: String,
    pub title: String,
    pub platform: String,
    pub url: String,
    pub status: EntryStatus,
    pub progress: u8,
    pub filename: String,
    pub error: Option<String>,
    pub adapter: Option<String>,
    pub bytes: Option<u64>,
    pub output_path: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueueEntryProgress {
    pub id: String,
    pub title: String,
    pub adapter: String,
    pub progress: u8,
    pub received_bytes: u64,
    pub total_bytes: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueueSnapshot {
    pub entries: Vec<QueueEntryInfo>,
    pub is_running: bool,
    pub cancelled: bool,
    pub total: usize,
    pub completed_count: usize,
    pub failed_count: usize,
    pub pending_count: usize,
    pub active_id: Option<String>,
    pub overall_progress: u8,
}

impl QueueSnapshot {
    pub fn entry(&self, id: &str) -> Option<&QueueEntryInfo> {
        self.entries.iter().find(|e| e.id == id)
    }

    pub fn is_settled(&self) -> bool {
        !self.is_running && self.entries.iter().all(|e| e.status.is_terminal())
    }
}

/// Observer for queue activity. `emit_queue_state` fires on every entry
/// transition; `emit_progress` fires on (throttled) byte progress.
pub trait EventEmitter: Send + Sync + Clone + 'static {
    fn emit_queue_state(&self, snapshot: &QueueSnapshot);
    fn emit_progress(&self, progress: &QueueEntryProgress);
}

#[derive(Debug, Clone)]
pub enum QueueEvent {
    State(QueueSnapshot),
    Progress(QueueEntryProgress),
}

/// Fan-out emitter for callers that prefer a subscription over a callback.
/// Slow subscribers lag and lose the oldest events.
#[derive(Clone)]
pub struct ChannelEmitter {
    tx: broadcast::Sender<QueueEvent>,
}

impl ChannelEmitter {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.tx.subscribe()
    }
}

impl EventEmitter for ChannelEmitter {
    fn emit_queue_state(&self, snapshot: &QueueSnapshot) {
        let _ = self.tx.send(QueueEvent::State(snapshot.clone()));
    }

    fn emit_progress(&self, progress: &QueueEntryProgress) {
        let _ = self.tx.send(QueueEvent::Progress(progress.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_snapshot() -> QueueSnapshot {
        QueueSnapshot {
            entries: Vec::new(),
            is_running: false,
            cancelled: false,
            total: 0,
            completed_count: 0,
            failed_count: 0,
            pending_count: 0,
            active_id: None,
            overall_progress: 0,
        }
    }

    #[test]
    fn terminal_and_active_statuses() {
        assert!(EntryStatus::Completed.is_terminal());
        assert!(EntryStatus::Failed.is_terminal());
        assert!(!EntryStatus::Pending.is_terminal());
        assert!(EntryStatus::Resolving.is_active());
        assert!(EntryStatus::Transferring.is_active());
        assert!(!EntryStatus::Pending.is_active());
    }

    #[test]
    fn status_serializes_lowercase() {
        let json = serde_json::to_string(&EntryStatus::Transferring).unwrap();
        assert_eq!(json, "\"transferring\"");
    }

    #[tokio::test]
    async fn channel_emitter_delivers_to_subscribers() {
        let emitter = ChannelEmitter::new(8);
        let mut rx = emitter.subscribe();
        emitter.emit_queue_state(&empty_snapshot());
        match rx.recv().await.unwrap() {
            QueueEvent::State(s) => assert!(s.is_settled()),
            QueueEvent::Progress(_) => panic!("expected state event"),
        }
    }

    #[test]
    fn channel_emitter_without_subscribers_does_not_fail() {
        let emitter = ChannelEmitter::new(1);
        emitter.emit_queue_state(&empty_snapshot());
    }
}
