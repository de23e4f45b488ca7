use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::core::error::{FetchError, CANCELLED_BY_USER};
use crate::core::events::{EventEmitter, QueueEntryProgress, QueueSnapshot};
use crate::core::filename::compute_filename_with_ext;
use crate::core::manifest::ManifestExporter;
use crate::core::probe::AvailabilityProbe;
use crate::core::queue::{DownloadQueue, ProgressThrottle, RunHandle};
use crate::core::transfer::{SinkProvider, TransferEngine, TransferOutcome, TransferProgress};
use crate::models::settings::{AppSettings, PacingSettings, Quality};
use crate::models::source::SourceRef;
use crate::resolvers::traits::{AdapterClass, ResolveContext, Resolver};

const PROGRESS_INTERVAL_MS: u64 = 150;
const FORWARDER_GRACE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
    pub quality: Quality,
    pub audio_only: bool,
    pub pacing: PacingSettings,
    pub progress_interval_ms: u64,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self::from_settings(&AppSettings::default())
    }
}

impl OrchestratorOptions {
    pub fn from_settings(settings: &AppSettings) -> Self {
        Self {
            quality: settings.download.quality,
            audio_only: settings.download.audio_only,
            pacing: settings.pacing.clone(),
            progress_interval_ms: PROGRESS_INTERVAL_MS,
        }
    }

    pub fn pacing_for(&self, class: AdapterClass) -> Duration {
        let ms = match class {
            AdapterClass::BatchCapable => self.pacing.batch_capable_ms,
            AdapterClass::RemoteConversion => self.pacing.remote_conversion_ms,
            AdapterClass::DirectProxy => self.pacing.direct_proxy_ms,
        };
        Duration::from_millis(ms)
    }

    fn extension(&self) -> &'static str {
        if self.audio_only {
            "mp3"
        } else {
            "mp4"
        }
    }
}

/// Batch-capable adapters lead when preferred (probe passed and more than one
/// entry to run); otherwise they go last. Relative order within each group is kept.
pub fn order_chain(resolvers: &[Arc<dyn Resolver>], prefer_batch: bool) -> Vec<Arc<dyn Resolver>> {
    let (batch, single): (Vec<_>, Vec<_>) = resolvers
        .iter()
        .cloned()
        .partition(|r| r.class() == AdapterClass::BatchCapable);
    if prefer_batch {
        batch.into_iter().chain(single).collect()
    } else {
        single.into_iter().chain(batch).collect()
    }
}

/// Drives a batch strictly one entry at a time through the adapter chain and
/// the transfer engine. Share it behind an `Arc` so another task can cancel.
pub struct QueueOrchestrator<E: EventEmitter> {
    queue: Arc<Mutex<DownloadQueue>>,
    resolvers: Vec<Arc<dyn Resolver>>,
    probe: Arc<dyn AvailabilityProbe>,
    engine: Arc<TransferEngine>,
    sinks: Arc<dyn SinkProvider>,
    manifest: Option<Arc<dyn ManifestExporter>>,
    emitter: E,
    options: OrchestratorOptions,
}

impl<E: EventEmitter> QueueOrchestrator<E> {
    pub fn new(
        resolvers: Vec<Arc<dyn Resolver>>,
        probe: Arc<dyn AvailabilityProbe>,
        engine: Arc<TransferEngine>,
        sinks: Arc<dyn SinkProvider>,
        emitter: E,
        options: OrchestratorOptions,
    ) -> Self {
        Self {
            queue: Arc::new(Mutex::new(DownloadQueue::new())),
            resolvers,
            probe,
            engine,
            sinks,
            manifest: None,
            emitter,
            options,
        }
    }

    pub fn with_manifest(mut self, exporter: Arc<dyn ManifestExporter>) -> Self {
        self.manifest = Some(exporter);
        self
    }

    pub async fn snapshot(&self) -> QueueSnapshot {
        self.queue.lock().await.snapshot()
    }

    /// Runs a whole batch and returns once every entry is terminal or the
    /// run was cancelled. Empty input, or a batch already running, is a no-op.
    pub async fn start_batch(&self, items: Vec<SourceRef>) {
        if items.is_empty() {
            tracing::debug!("[queue] empty batch ignored");
            return;
        }

        let (ids, run) = {
            let mut q = self.queue.lock().await;
            if q.is_running {
                tracing::warn!("[queue] batch already running, start ignored");
                return;
            }

            if let Some(exporter) = &self.manifest {
                if let Err(e) = exporter.export(&items) {
                    tracing::warn!("[queue] manifest export failed: {}", e);
                }
            }

            let ext = self.options.extension();
            let prepared = items
                .into_iter()
                .map(|source| {
                    let filename = compute_filename_with_ext(&source, ext);
                    (source, filename)
                })
                .collect();
            let ids = q.load_batch(prepared);
            let run = q.begin_run();
            self.emitter.emit_queue_state(&q.snapshot());
            (ids, run)
        };

        tracing::info!("[queue] batch started with {} entries", ids.len());
        self.run(ids, run).await;
    }

    /// Re-runs failed entries in their original order. No-op when nothing
    /// failed or a run is in progress.
    pub async fn retry_failed(&self) {
        let (ids, run) = {
            let mut q = self.queue.lock().await;
            if q.is_running {
                tracing::warn!("[queue] retry ignored while a batch is running");
                return;
            }
            let ids = q.reset_failed();
            if ids.is_empty() {
                return;
            }
            let run = q.begin_run();
            self.emitter.emit_queue_state(&q.snapshot());
            (ids, run)
        };

        tracing::info!("[queue] retrying {} failed entries", ids.len());
        self.run(ids, run).await;
    }

    pub async fn cancel_all(&self) {
        let mut q = self.queue.lock().await;
        let count = q.cancel_all();
        tracing::info!("[queue] cancel all: {} entries stopped", count);
        self.emitter.emit_queue_state(&q.snapshot());
    }

    pub async fn cancel_one(&self, id: &str) -> bool {
        let mut q = self.queue.lock().await;
        let cancelled = q.cancel_one(id);
        if cancelled {
            tracing::info!("[queue] entry {} cancelled", id);
            self.emitter.emit_queue_state(&q.snapshot());
        }
        cancelled
    }

    pub async fn clear_queue(&self) {
        let mut q = self.queue.lock().await;
        q.clear();
        tracing::info!("[queue] cleared");
        self.emitter.emit_queue_state(&q.snapshot());
    }

    async fn run(&self, ids: Vec<String>, run: RunHandle) {
        // A lone entry gains nothing from the batch-capable backend's startup cost.
        let healthy = self.probe.check().await;
        let prefer_batch = healthy && ids.len() > 1;
        let chain = order_chain(&self.resolvers, prefer_batch);
        tracing::debug!(
            "[queue] adapter chain: {}",
            chain.iter().map(|r| r.id()).collect::<Vec<_>>().join(" -> ")
        );

        for (index, id) in ids.iter().enumerate() {
            if run.token.is_cancelled() {
                break;
            }

            let started = {
                let mut q = self.queue.lock().await;
                let token = q.begin_entry(id);
                let details = token.and_then(|token| {
                    q.entry(id)
                        .map(|e| (e.source.clone(), e.filename.clone(), token))
                });
                if details.is_some() {
                    self.emitter.emit_queue_state(&q.snapshot());
                }
                details
            };
            let Some((source, filename, token)) = started else {
                continue;
            };

            let used = self.process_entry(id, &source, &filename, &chain, &token).await;

            let remaining = &ids[index + 1..];
            let more = !remaining.is_empty() && self.queue.lock().await.has_pending(remaining);
            if let (Some(class), true) = (used, more) {
                let delay = self.options.pacing_for(class);
                tracing::debug!("[queue] pacing {}ms", delay.as_millis());
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = run.token.cancelled() => break,
                }
            }
        }

        let mut q = self.queue.lock().await;
        if q.finish_run(&run) {
            let snap = q.snapshot();
            tracing::info!(
                "[queue] run finished: {} completed, {} failed of {}",
                snap.completed_count,
                snap.failed_count,
                snap.total
            );
            self.emitter.emit_queue_state(&snap);
        }
    }

    async fn transition<F>(&self, f: F) -> bool
    where
        F: FnOnce(&mut DownloadQueue) -> bool,
    {
        let mut q = self.queue.lock().await;
        let changed = f(&mut q);
        if changed {
            self.emitter.emit_queue_state(&q.snapshot());
        }
        changed
    }

    /// Tries each adapter in turn. Returns the class of the last adapter that
    /// was attempted, which decides the pacing delay.
    async fn process_entry(
        &self,
        id: &str,
        source: &SourceRef,
        filename: &str,
        chain: &[Arc<dyn Resolver>],
        token: &CancellationToken,
    ) -> Option<AdapterClass> {
        let mut used = None;
        let mut last_error: Option<String> = None;

        for resolver in chain {
            if token.is_cancelled() {
                break;
            }
            if !self.transition(|q| q.mark_resolving(id, resolver.id())).await {
                break;
            }
            used = Some(resolver.class());
            tracing::info!("[queue] {} via {}", source.title, resolver.id());

            match self.attempt(id, source, filename, resolver.as_ref(), token).await {
                Ok(outcome) => {
                    let path = outcome
                        .output_path
                        .as_ref()
                        .map(|p| p.to_string_lossy().to_string());
                    self.transition(|q| q.mark_completed(id, resolver.id(), outcome.bytes, path))
                        .await;
                    tracing::info!(
                        "[queue] {} completed via {} ({} bytes)",
                        source.title,
                        resolver.id(),
                        outcome.bytes
                    );
                    return used;
                }
                Err(e) if e.is_cancelled() || token.is_cancelled() => break,
                Err(e) => {
                    tracing::warn!("[queue] {} failed via {}: {}", source.title, resolver.id(), e);
                    last_error = Some(format!("{}: {}", resolver.id(), e));
                }
            }
        }

        if token.is_cancelled() {
            self.transition(|q| q.mark_failed(id, CANCELLED_BY_USER)).await;
        } else {
            let message = last_error.unwrap_or_else(|| "no adapter available".to_string());
            tracing::error!("[queue] {} failed: {}", source.title, message);
            self.transition(|q| q.mark_failed(id, &message)).await;
        }
        used
    }

    async fn attempt(
        &self,
        id: &str,
        source: &SourceRef,
        filename: &str,
        resolver: &dyn Resolver,
        token: &CancellationToken,
    ) -> Result<TransferOutcome, FetchError> {
        let (tx, rx) = mpsc::channel::<TransferProgress>(64);
        let mut forwarder = self.spawn_progress_forwarder(id, &source.title, resolver.id(), rx);

        let result = self
            .resolve_and_transfer(id, source, filename, resolver, token, tx)
            .await;

        if tokio::time::timeout(FORWARDER_GRACE, &mut forwarder).await.is_err() {
            forwarder.abort();
        }
        result
    }

    async fn resolve_and_transfer(
        &self,
        id: &str,
        source: &SourceRef,
        filename: &str,
        resolver: &dyn Resolver,
        token: &CancellationToken,
        progress: mpsc::Sender<TransferProgress>,
    ) -> Result<TransferOutcome, FetchError> {
        let ctx = ResolveContext::new(self.options.quality, self.options.audio_only, token.clone())
            .with_progress(progress.clone());

        let resolved = tokio::select! {
            r = resolver.resolve(source, &ctx) => r?,
            _ = token.cancelled() => return Err(FetchError::Cancelled),
        };
        tracing::debug!(
            "[queue] {} resolved by {} to {}",
            source.id,
            resolver.id(),
            resolved.location.describe()
        );
        if let Some(name) = &resolved.suggested_filename {
            tracing::debug!("[queue] upstream suggested '{}', keeping '{}'", name, filename);
        }

        if !self.transition(|q| q.mark_transferring(id)).await {
            return Err(FetchError::Cancelled);
        }

        let mut sink = self.sinks.open(filename);
        self.engine
            .transfer(resolved.location, sink.as_mut(), &progress, token)
            .await
    }

    fn spawn_progress_forwarder(
        &self,
        id: &str,
        title: &str,
        adapter: &str,
        mut rx: mpsc::Receiver<TransferProgress>,
    ) -> JoinHandle<()> {
        let queue = self.queue.clone();
        let emitter = self.emitter.clone();
        let interval = self.options.progress_interval_ms;
        let id = id.to_string();
        let title = title.to_string();
        let adapter = adapter.to_string();

        tokio::spawn(async move {
            let mut throttle = ProgressThrottle::new(interval);

            while let Some(p) = rx.recv().await {
                if !throttle.should_emit() && p.percent < 100 {
                    continue;
                }

                let applied = queue.lock().await.update_progress(&id, p.percent);
                if applied {
                    emitter.emit_progress(&QueueEntryProgress {
                        id: id.clone(),
                        title: title.clone(),
                        adapter: adapter.clone(),
                        progress: p.percent,
                        received_bytes: p.received_bytes,
                        total_bytes: p.total_bytes,
                    });
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::FetchError;
    use crate::resolvers::traits::ResolvedStream;
    use async_trait::async_trait;

    struct Named(&'static str, AdapterClass);

    #[async_trait]
    impl Resolver for Named {
        fn id(&self) -> &str {
            self.0
        }

        fn class(&self) -> AdapterClass {
            self.1
        }

        async fn resolve(
            &self,
            _source: &SourceRef,
            _ctx: &ResolveContext,
        ) -> Result<ResolvedStream, FetchError> {
            Err(FetchError::Unavailable("unused".into()))
        }
    }

    fn ids(chain: &[Arc<dyn Resolver>]) -> Vec<&str> {
        chain.iter().map(|r| r.id()).collect()
    }

    fn resolvers() -> Vec<Arc<dyn Resolver>> {
        vec![
            Arc::new(Named("cobalt", AdapterClass::RemoteConversion)),
            Arc::new(Named("ytdlp", AdapterClass::BatchCapable)),
            Arc::new(Named("direct", AdapterClass::DirectProxy)),
        ]
    }

    #[test]
    fn healthy_probe_puts_batch_capable_first() {
        let chain = order_chain(&resolvers(), true);
        assert_eq!(ids(&chain), vec!["ytdlp", "cobalt", "direct"]);
    }

    #[test]
    fn failed_probe_puts_batch_capable_last() {
        let chain = order_chain(&resolvers(), false);
        assert_eq!(ids(&chain), vec!["cobalt", "direct", "ytdlp"]);
    }

    #[test]
    fn pacing_follows_adapter_class() {
        let opts = OrchestratorOptions::default();
        assert_eq!(opts.pacing_for(AdapterClass::BatchCapable), Duration::from_secs(8));
        assert_eq!(opts.pacing_for(AdapterClass::RemoteConversion), Duration::from_secs(3));
        assert_eq!(opts.pacing_for(AdapterClass::DirectProxy), Duration::from_secs(2));
    }

    #[test]
    fn audio_only_switches_extension() {
        let mut opts = OrchestratorOptions::default();
        assert_eq!(opts.extension(), "mp4");
        opts.audio_only = true;
        assert_eq!(opts.extension(), "mp3");
    }
}
