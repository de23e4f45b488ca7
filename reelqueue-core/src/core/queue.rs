use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use crate::core::error::CANCELLED_BY_USER;
use crate::core::events::{EntryStatus, QueueEntryInfo, QueueSnapshot};
use crate::models::source::SourceRef;

pub struct QueueEntry {
    pub id: String,
    pub source: SourceRef,
    pub status: EntryStatus,
    pub progress: u8,
    pub filename: String,
    pub error: Option<String>,
    pub adapter: Option<String>,
    pub bytes: Option<u64>,
    pub output_path: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancel_token: CancellationToken,
}

impl QueueEntry {
    pub fn new(source: SourceRef, filename: String) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            source,
            status: EntryStatus::Pending,
            progress: 0,
            filename,
            error: None,
            adapter: None,
            bytes: None,
            output_path: None,
            started_at: None,
            completed_at: None,
            cancel_token: CancellationToken::new(),
        }
    }

    pub fn to_info(&self) -> QueueEntryInfo {
        QueueEntryInfo {
            id: self.id.clone(),
            title: self.source.title.clone(),
            platform: self.source.platform.to_string(),
            url: self.source.url.clone(),
            status: self.status,
            progress: self.progress,
            filename: self.filename.clone(),
            error: self.error.clone(),
            adapter: self.adapter.clone(),
            bytes: self.bytes,
            output_path: self.output_path.clone(),
            started_at: self.started_at,
            completed_at: self.completed_at,
        }
    }

    fn fail(&mut self, message: &str) {
        self.cancel_token.cancel();
        self.status = EntryStatus::Failed;
        self.error = Some(message.to_string());
        self.completed_at = Some(Utc::now());
    }
}

/// Token and generation of one drain run. A stale run (superseded by
/// `clear` and a new batch) cannot close the current one.
#[derive(Debug, Clone)]
pub struct RunHandle {
    pub generation: u64,
    pub token: CancellationToken,
}

/// Batch state. Only the orchestrator mutates it, always through these
/// transition functions.
pub struct DownloadQueue {
    pub entries: Vec<QueueEntry>,
    pub is_running: bool,
    pub cancelled: bool,
    generation: u64,
    run_token: CancellationToken,
}

impl Default for DownloadQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl DownloadQueue {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            is_running: false,
            cancelled: false,
            generation: 0,
            run_token: CancellationToken::new(),
        }
    }

    /// Replaces the batch with one pending entry per item, in order.
    pub fn load_batch(&mut self, items: Vec<(SourceRef, String)>) -> Vec<String> {
        self.run_token.cancel();
        self.entries = items
            .into_iter()
            .map(|(source, filename)| QueueEntry::new(source, filename))
            .collect();
        self.cancelled = false;
        self.entries.iter().map(|e| e.id.clone()).collect()
    }

    pub fn begin_run(&mut self) -> RunHandle {
        self.generation += 1;
        self.run_token = CancellationToken::new();
        self.is_running = true;
        self.cancelled = false;
        RunHandle {
            generation: self.generation,
            token: self.run_token.clone(),
        }
    }

    pub fn finish_run(&mut self, run: &RunHandle) -> bool {
        if run.generation != self.generation || !self.is_running {
            return false;
        }
        self.is_running = false;
        true
    }

    pub fn entry(&self, id: &str) -> Option<&QueueEntry> {
        self.entries.iter().find(|e| e.id == id)
    }

    fn entry_mut(&mut self, id: &str) -> Option<&mut QueueEntry> {
        self.entries.iter_mut().find(|e| e.id == id)
    }

    pub fn has_pending(&self, ids: &[String]) -> bool {
        ids.iter().any(|id| {
            self.entry(id)
                .map(|e| e.status == EntryStatus::Pending)
                .unwrap_or(false)
        })
    }

    /// Moves a pending entry into the run. Returns the entry's token, or
    /// `None` when the entry is gone or no longer pending.
    pub fn begin_entry(&mut self, id: &str) -> Option<CancellationToken> {
        if self.run_token.is_cancelled() {
            return None;
        }
        let token = self.run_token.child_token();
        let entry = self.entry_mut(id)?;
        if entry.status != EntryStatus::Pending {
            return None;
        }
        entry.status = EntryStatus::Resolving;
        entry.started_at = Some(Utc::now());
        entry.cancel_token = token.clone();
        Some(token)
    }

    /// Switches an in-flight entry to `adapter`. Progress restarts per adapter.
    pub fn mark_resolving(&mut self, id: &str, adapter: &str) -> bool {
        match self.entry_mut(id) {
            Some(entry) if entry.status.is_active() => {
                entry.status = EntryStatus::Resolving;
                entry.adapter = Some(adapter.to_string());
                entry.progress = 0;
                true
            }
            _ => false,
        }
    }

    pub fn mark_transferring(&mut self, id: &str) -> bool {
        match self.entry_mut(id) {
            Some(entry) if entry.status.is_active() => {
                entry.status = EntryStatus::Transferring;
                true
            }
            _ => false,
        }
    }

    pub fn update_progress(&mut self, id: &str, percent: u8) -> bool {
        match self.entry_mut(id) {
            Some(entry) if entry.status.is_active() && percent > entry.progress => {
                entry.progress = percent.min(100);
                true
            }
            _ => false,
        }
    }

    pub fn mark_completed(
        &mut self,
        id: &str,
        adapter: &str,
        bytes: u64,
        output_path: Option<String>,
    ) -> bool {
        match self.entry_mut(id) {
            Some(entry) if entry.status.is_active() => {
                entry.status = EntryStatus::Completed;
                entry.progress = 100;
                entry.error = None;
                entry.adapter = Some(adapter.to_string());
                entry.bytes = Some(bytes);
                entry.output_path = output_path;
                entry.completed_at = Some(Utc::now());
                true
            }
            _ => false,
        }
    }

    /// No-op on terminal entries, so a cancellation recorded earlier keeps
    /// its message.
    pub fn mark_failed(&mut self, id: &str, error: &str) -> bool {
        match self.entry_mut(id) {
            Some(entry) if !entry.status.is_terminal() => {
                entry.fail(error);
                true
            }
            _ => false,
        }
    }

    /// Fails every pending and in-flight entry and stops the run.
    pub fn cancel_all(&mut self) -> usize {
        self.cancelled = true;
        self.run_token.cancel();
        let mut count = 0;
        for entry in self.entries.iter_mut().filter(|e| !e.status.is_terminal()) {
            entry.fail(CANCELLED_BY_USER);
            count += 1;
        }
        count
    }

    pub fn cancel_one(&mut self, id: &str) -> bool {
        self.mark_failed(id, CANCELLED_BY_USER)
    }

    /// Failed entries back to pending, in original order.
    pub fn reset_failed(&mut self) -> Vec<String> {
        let mut ids = Vec::new();
        for entry in self
            .entries
            .iter_mut()
            .filter(|e| e.status == EntryStatus::Failed)
        {
            entry.status = EntryStatus::Pending;
            entry.error = None;
            entry.progress = 0;
            entry.adapter = None;
            entry.bytes = None;
            entry.output_path = None;
            entry.started_at = None;
            entry.completed_at = None;
            entry.cancel_token = CancellationToken::new();
            ids.push(entry.id.clone());
        }
        ids
    }

    pub fn clear(&mut self) {
        self.run_token.cancel();
        self.entries.clear();
        self.is_running = false;
        self.cancelled = false;
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        let total = self.entries.len();
        let completed_count = self
            .entries
            .iter()
            .filter(|e| e.status == EntryStatus::Completed)
            .count();
        let failed_count = self
            .entries
            .iter()
            .filter(|e| e.status == EntryStatus::Failed)
            .count();
        let pending_count = self
            .entries
            .iter()
            .filter(|e| e.status == EntryStatus::Pending)
            .count();
        let active_id = self
            .entries
            .iter()
            .find(|e| e.status.is_active())
            .map(|e| e.id.clone());

        QueueSnapshot {
            entries: self.entries.iter().map(|e| e.to_info()).collect(),
            is_running: self.is_running,
            cancelled: self.cancelled,
            total,
            completed_count,
            failed_count,
            pending_count,
            active_id,
            overall_progress: overall_progress(completed_count, total),
        }
    }
}

pub fn overall_progress(completed: usize, total: usize) -> u8 {
    if total == 0 {
        return 0;
    }
    (100.0 * completed as f64 / total as f64).round() as u8
}

pub struct ProgressThrottle {
    last_emit: std::time::Instant,
    min_interval: std::time::Duration,
}

impl ProgressThrottle {
    pub fn new(min_interval_ms: u64) -> Self {
        let min_interval = std::time::Duration::from_millis(min_interval_ms);
        let now = std::time::Instant::now();
        Self {
            last_emit: now.checked_sub(min_interval).unwrap_or(now),
            min_interval,
        }
    }

    pub fn should_emit(&mut self) -> bool {
        let now = std::time::Instant::now();
        if now.duration_since(self.last_emit) >= self.min_interval {
            self.last_emit = now;
            true
        } else {
            false
        }
    }
}
