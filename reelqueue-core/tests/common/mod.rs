#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use reelqueue_core::core::error::FetchError;
use reelqueue_core::core::events::{EventEmitter, QueueEntryProgress, QueueSnapshot};
use reelqueue_core::core::manifest::ManifestExporter;
use reelqueue_core::core::orchestrator::{OrchestratorOptions, QueueOrchestrator};
use reelqueue_core::core::probe::StaticProbe;
use reelqueue_core::core::queue::overall_progress;
use reelqueue_core::core::transfer::{
    MemorySinkProvider, StreamLocation, TempMedia, TransferEngine, MIN_MEDIA_BYTES,
};
use reelqueue_core::models::settings::{PacingSettings, Quality};
use reelqueue_core::models::source::SourceRef;
use reelqueue_core::resolvers::traits::{AdapterClass, ResolveContext, ResolvedStream, Resolver};

pub const MEDIA_BYTES: usize = 64 * 1024;

#[derive(Clone)]
pub enum Behavior {
    Succeed,
    Fail(&'static str),
    Block,
    Remote(String),
    Hang,
}

/// Resolver whose outcome per item is scripted up front.
pub struct FakeResolver {
    id: &'static str,
    class: AdapterClass,
    default: Behavior,
    overrides: HashMap<String, Behavior>,
    fail_first: Mutex<HashMap<String, usize>>,
    calls: Arc<Mutex<Vec<String>>>,
    dir: Arc<tempfile::TempDir>,
    counter: AtomicUsize,
}

impl FakeResolver {
    pub fn new(id: &'static str, class: AdapterClass) -> Self {
        Self {
            id,
            class,
            default: Behavior::Succeed,
            overrides: HashMap::new(),
            fail_first: Mutex::new(HashMap::new()),
            calls: Arc::new(Mutex::new(Vec::new())),
            dir: Arc::new(tempfile::tempdir().unwrap()),
            counter: AtomicUsize::new(0),
        }
    }

    pub fn default_behavior(mut self, behavior: Behavior) -> Self {
        self.default = behavior;
        self
    }

    pub fn on(mut self, source_id: &str, behavior: Behavior) -> Self {
        self.overrides.insert(source_id.to_string(), behavior);
        self
    }

    pub fn fail_first(self, source_id: &str, times: usize) -> Self {
        self.fail_first
            .lock()
            .unwrap()
            .insert(source_id.to_string(), times);
        self
    }

    pub fn calls(&self) -> Arc<Mutex<Vec<String>>> {
        self.calls.clone()
    }
}

#[async_trait]
impl Resolver for FakeResolver {
    fn id(&self) -> &str {
        self.id
    }

    fn class(&self) -> AdapterClass {
        self.class
    }

    async fn resolve(
        &self,
        source: &SourceRef,
        ctx: &ResolveContext,
    ) -> Result<ResolvedStream, FetchError> {
        self.calls.lock().unwrap().push(source.id.clone());

        {
            let mut remaining = self.fail_first.lock().unwrap();
            if let Some(n) = remaining.get_mut(&source.id) {
                if *n > 0 {
                    *n -= 1;
                    return Err(FetchError::Unavailable("scripted failure".into()));
                }
            }
        }

        let behavior = self
            .overrides
            .get(&source.id)
            .cloned()
            .unwrap_or_else(|| self.default.clone());

        match behavior {
            Behavior::Succeed => {
                let n = self.counter.fetch_add(1, Ordering::SeqCst);
                let path = self.dir.path().join(format!("{}-{}.bin", self.id, n));
                std::fs::write(&path, vec![0u8; MEDIA_BYTES]).unwrap();
                Ok(ResolvedStream {
                    location: StreamLocation::LocalFile(TempMedia::new(path)),
                    suggested_filename: None,
                })
            }
            Behavior::Fail(msg) => Err(FetchError::Unavailable(msg.to_string())),
            Behavior::Block => Err(FetchError::Blocked("scripted block page".into())),
            Behavior::Remote(url) => Ok(ResolvedStream {
                location: StreamLocation::remote(url),
                suggested_filename: None,
            }),
            Behavior::Hang => {
                ctx.cancel.cancelled().await;
                Err(FetchError::Cancelled)
            }
        }
    }
}

/// Observer that keeps every snapshot and progress event. Each progress
/// event remembers how many snapshots had been emitted before it.
#[derive(Clone, Default)]
pub struct RecordingEmitter {
    states: Arc<Mutex<Vec<QueueSnapshot>>>,
    progress: Arc<Mutex<Vec<(usize, QueueEntryProgress)>>>,
}

impl RecordingEmitter {
    pub fn states(&self) -> Vec<QueueSnapshot> {
        self.states.lock().unwrap().clone()
    }

    pub fn state_count(&self) -> usize {
        self.states.lock().unwrap().len()
    }

    pub fn progress(&self) -> Vec<QueueEntryProgress> {
        self.progress
            .lock()
            .unwrap()
            .iter()
            .map(|(_, p)| p.clone())
            .collect()
    }

    pub fn positioned_progress(&self) -> Vec<(usize, QueueEntryProgress)> {
        self.progress.lock().unwrap().clone()
    }

    /// Sequential execution and completion-ratio invariants over the given
    /// snapshots.
    pub fn assert_invariants(states: &[QueueSnapshot]) {
        let mut last_overall = 0;
        for snap in states {
            let active = snap.entries.iter().filter(|e| e.status.is_active()).count();
            assert!(active <= 1, "more than one active entry: {:?}", snap.entries);
            assert_eq!(
                snap.overall_progress,
                overall_progress(snap.completed_count, snap.total)
            );
            assert!(snap.overall_progress >= last_overall);
            last_overall = snap.overall_progress;
        }
    }
}

impl EventEmitter for RecordingEmitter {
    fn emit_queue_state(&self, snapshot: &QueueSnapshot) {
        self.states.lock().unwrap().push(snapshot.clone());
    }

    fn emit_progress(&self, progress: &QueueEntryProgress) {
        let position = self.state_count();
        self.progress.lock().unwrap().push((position, progress.clone()));
    }
}

/// Manifest exporter that records how many snapshots had been emitted when
/// it ran.
pub struct RecordingManifest {
    emitter: RecordingEmitter,
    pub exports: Mutex<Vec<(usize, Vec<String>)>>,
}

impl RecordingManifest {
    pub fn new(emitter: RecordingEmitter) -> Self {
        Self {
            emitter,
            exports: Mutex::new(Vec::new()),
        }
    }
}

impl ManifestExporter for RecordingManifest {
    fn export(&self, items: &[SourceRef]) -> Result<(), FetchError> {
        let ids = items.iter().map(|s| s.id.clone()).collect();
        self.exports
            .lock()
            .unwrap()
            .push((self.emitter.state_count(), ids));
        Ok(())
    }
}

pub fn no_pacing() -> PacingSettings {
    PacingSettings {
        batch_capable_ms: 0,
        remote_conversion_ms: 0,
        direct_proxy_ms: 0,
    }
}

pub fn options(pacing: PacingSettings) -> OrchestratorOptions {
    OrchestratorOptions {
        quality: Quality::P720,
        audio_only: false,
        pacing,
        progress_interval_ms: 0,
    }
}

pub fn engine() -> Arc<TransferEngine> {
    Arc::new(TransferEngine::with_limits(
        reqwest::Client::new(),
        MIN_MEDIA_BYTES,
        Duration::from_secs(30),
    ))
}

pub fn build(
    resolvers: Vec<Arc<dyn Resolver>>,
    probe_healthy: bool,
    pacing: PacingSettings,
) -> (QueueOrchestrator<RecordingEmitter>, RecordingEmitter, MemorySinkProvider) {
    let emitter = RecordingEmitter::default();
    let sinks = MemorySinkProvider::new();
    let orch = QueueOrchestrator::new(
        resolvers,
        Arc::new(StaticProbe(probe_healthy)),
        engine(),
        Arc::new(sinks.clone()),
        emitter.clone(),
        options(pacing),
    );
    (orch, emitter, sinks)
}

pub fn items(n: usize) -> Vec<SourceRef> {
    (1..=n)
        .map(|i| {
            let mut s = SourceRef::youtube(&format!("vid{}", i), &format!("Video {}", i));
            s.views = 1000 * i as u64;
            s
        })
        .collect()
}

pub async fn wait_for<E, F>(orch: &QueueOrchestrator<E>, mut pred: F)
where
    E: EventEmitter,
    F: FnMut(&QueueSnapshot) -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        if pred(&orch.snapshot().await) {
            return;
        }
        assert!(tokio::time::Instant::now() < deadline, "condition not reached");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

pub fn dynr<R: Resolver + 'static>(resolver: &Arc<R>) -> Arc<dyn Resolver> {
    resolver.clone()
}
