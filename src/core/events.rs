use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use reelqueue_core::core::events::{EntryStatus, EventEmitter, QueueEntryProgress, QueueSnapshot};

/// Observer for terminal runs: logs each entry transition once and
/// progress at debug level.
#[derive(Clone, Default)]
pub struct LogEventEmitter {
    seen: Arc<Mutex<HashMap<String, EntryStatus>>>,
}

impl LogEventEmitter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl EventEmitter for LogEventEmitter {
    fn emit_queue_state(&self, snapshot: &QueueSnapshot) {
        let Ok(mut seen) = self.seen.lock() else {
            return;
        };

        for (index, entry) in snapshot.entries.iter().enumerate() {
            if seen.get(&entry.id) == Some(&entry.status) {
                continue;
            }
            seen.insert(entry.id.clone(), entry.status);

            let position = format!("{}/{}", index + 1, snapshot.total);
            match entry.status {
                EntryStatus::Pending => {}
                EntryStatus::Resolving | EntryStatus::Transferring => {
                    tracing::info!(
                        "[{}] {} {:?} via {}",
                        position,
                        entry.title,
                        entry.status,
                        entry.adapter.as_deref().unwrap_or("-")
                    );
                }
                EntryStatus::Completed => {
                    tracing::info!("[{}] {} saved as {}", position, entry.title, entry.filename);
                }
                EntryStatus::Failed => {
                    tracing::warn!(
                        "[{}] {} failed: {}",
                        position,
                        entry.title,
                        entry.error.as_deref().unwrap_or("unknown error")
                    );
                }
            }
        }

        if snapshot.entries.is_empty() {
            seen.clear();
        }
        tracing::debug!(
            "overall {}% ({} done, {} failed, {} pending)",
            snapshot.overall_progress,
            snapshot.completed_count,
            snapshot.failed_count,
            snapshot.pending_count
        );
    }

    fn emit_progress(&self, progress: &QueueEntryProgress) {
        tracing::debug!(
            "{} [{}] {}% ({} bytes)",
            progress.title,
            progress.adapter,
            progress.progress,
            progress.received_bytes
        );
    }
}
