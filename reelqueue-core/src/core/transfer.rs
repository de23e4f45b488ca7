use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;

use crate::core::error::FetchError;
use crate::models::settings::TransferSettings;

pub const MIN_MEDIA_BYTES: u64 = 50_000;
const UNKNOWN_SIZE_CAP: u8 = 95;
const UNKNOWN_SIZE_KNEE: f64 = 500_000.0;

/// Temporary media file produced by a local conversion. The file and its
/// `.part` sibling are removed when the guard drops, whatever happened to the
/// transfer. A guard built with [`TempMedia::owning_stem`] also removes every
/// `<stem>.*` file next to it, which covers intermediate formats a converter
/// leaves behind when it is killed mid-run.
#[derive(Debug)]
pub struct TempMedia {
    path: PathBuf,
    stem: Option<String>,
}

impl TempMedia {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            stem: None,
        }
    }

    pub fn owning_stem(path: impl Into<PathBuf>, stem: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            stem: Some(stem.into()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn stem_siblings(&self) -> Vec<PathBuf> {
        let (Some(stem), Some(dir)) = (&self.stem, self.path.parent()) else {
            return Vec::new();
        };
        let prefix = format!("{}.", stem);
        let Ok(entries) = std::fs::read_dir(dir) else {
            return Vec::new();
        };
        entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_name().to_string_lossy().starts_with(&prefix))
            .map(|entry| entry.path())
            .collect()
    }
}

fn remove_quietly(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!("[transfer] failed to remove temp file {}: {}", path.display(), e);
        }
    }
}

impl Drop for TempMedia {
    fn drop(&mut self) {
        remove_quietly(&self.path);
        remove_quietly(&part_path_for(&self.path));
        for sibling in self.stem_siblings() {
            remove_quietly(&sibling);
        }
    }
}

#[derive(Debug)]
pub enum StreamLocation {
    Remote {
        url: String,
        headers: reqwest::header::HeaderMap,
    },
    LocalFile(TempMedia),
}

impl StreamLocation {
    pub fn remote(url: impl Into<String>) -> Self {
        StreamLocation::Remote {
            url: url.into(),
            headers: reqwest::header::HeaderMap::new(),
        }
    }

    pub fn describe(&self) -> String {
        match self {
            StreamLocation::Remote { url, .. } => url.clone(),
            StreamLocation::LocalFile(temp) => temp.path().display().to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferProgress {
    pub percent: u8,
    pub received_bytes: u64,
    pub total_bytes: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferOutcome {
    pub bytes: u64,
    pub output_path: Option<PathBuf>,
}

/// Destination for transferred bytes. `cleanup` must leave nothing behind.
#[async_trait]
pub trait TransferSink: Send {
    async fn write_chunk(&mut self, chunk: &[u8]) -> Result<(), FetchError>;
    async fn finish(&mut self) -> Result<Option<PathBuf>, FetchError>;
    async fn cleanup(&mut self);
}

pub trait SinkProvider: Send + Sync {
    fn open(&self, filename: &str) -> Box<dyn TransferSink>;
}

fn part_path_for(output: &Path) -> PathBuf {
    let mut part = output.as_os_str().to_owned();
    part.push(".part");
    PathBuf::from(part)
}

/// Writes to `<name>.part` and renames into place on success.
pub struct FileSink {
    final_path: PathBuf,
    part_path: PathBuf,
    file: Option<tokio::io::BufWriter<tokio::fs::File>>,
}

impl FileSink {
    pub fn new(final_path: impl Into<PathBuf>) -> Self {
        let final_path = final_path.into();
        let part_path = part_path_for(&final_path);
        Self {
            final_path,
            part_path,
            file: None,
        }
    }

    async fn writer(&mut self) -> Result<&mut tokio::io::BufWriter<tokio::fs::File>, FetchError> {
        if self.file.is_none() {
            if let Some(parent) = self.part_path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            let file = tokio::fs::File::create(&self.part_path).await?;
            self.file = Some(tokio::io::BufWriter::with_capacity(256 * 1024, file));
        }
        self.file
            .as_mut()
            .ok_or_else(|| FetchError::Unavailable("sink file not open".into()))
    }
}

#[async_trait]
impl TransferSink for FileSink {
    async fn write_chunk(&mut self, chunk: &[u8]) -> Result<(), FetchError> {
        let writer = self.writer().await?;
        writer.write_all(chunk).await?;
        Ok(())
    }

    async fn finish(&mut self) -> Result<Option<PathBuf>, FetchError> {
        let mut writer = match self.file.take() {
            Some(w) => w,
            None => return Err(FetchError::InvalidResponse("no data written".into())),
        };
        writer.flush().await?;
        drop(writer);
        tokio::fs::rename(&self.part_path, &self.final_path).await?;
        Ok(Some(self.final_path.clone()))
    }

    async fn cleanup(&mut self) {
        self.file = None;
        let _ = tokio::fs::remove_file(&self.part_path).await;
    }
}

pub struct DirectorySink {
    dir: PathBuf,
}

impl DirectorySink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl SinkProvider for DirectorySink {
    fn open(&self, filename: &str) -> Box<dyn TransferSink> {
        let name = sanitize_filename::sanitize(filename);
        Box::new(FileSink::new(self.dir.join(name)))
    }
}

pub type MemoryStore = Arc<Mutex<HashMap<String, Vec<u8>>>>;

/// Buffers the payload and publishes it under its filename on `finish`.
pub struct MemorySink {
    name: String,
    buf: Vec<u8>,
    store: MemoryStore,
}

#[async_trait]
impl TransferSink for MemorySink {
    async fn write_chunk(&mut self, chunk: &[u8]) -> Result<(), FetchError> {
        self.buf.extend_from_slice(chunk);
        Ok(())
    }

    async fn finish(&mut self) -> Result<Option<PathBuf>, FetchError> {
        let data = std::mem::take(&mut self.buf);
        if let Ok(mut store) = self.store.lock() {
            store.insert(self.name.clone(), data);
        }
        Ok(None)
    }

    async fn cleanup(&mut self) {
        self.buf = Vec::new();
    }
}

#[derive(Clone, Default)]
pub struct MemorySinkProvider {
    store: MemoryStore,
}

impl MemorySinkProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, filename: &str) -> Option<Vec<u8>> {
        self.store.lock().ok()?.get(filename).cloned()
    }

    pub fn len(&self) -> usize {
        self.store.lock().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SinkProvider for MemorySinkProvider {
    fn open(&self, filename: &str) -> Box<dyn TransferSink> {
        Box::new(MemorySink {
            name: filename.to_string(),
            buf: Vec::new(),
            store: self.store.clone(),
        })
    }
}

/// Percent reporter: exact when the size is known, otherwise an asymptotic
/// estimate that never passes 95 until `complete`. Never goes backwards.
#[derive(Debug)]
pub struct ProgressTracker {
    total: Option<u64>,
    received: u64,
    last: u8,
}

impl ProgressTracker {
    pub fn new(total: Option<u64>) -> Self {
        Self {
            total: total.filter(|t| *t > 0),
            received: 0,
            last: 0,
        }
    }

    pub fn received(&self) -> u64 {
        self.received
    }

    /// Returns the new percent when it changed.
    pub fn advance(&mut self, bytes: u64) -> Option<u8> {
        self.received += bytes;
        let percent = match self.total {
            Some(total) => {
                let p = (100.0 * self.received as f64 / total as f64).round();
                p.min(100.0) as u8
            }
            None => {
                let p = (100.0 * self.received as f64 / (self.received as f64 + UNKNOWN_SIZE_KNEE)).round();
                (p as u8).min(UNKNOWN_SIZE_CAP)
            }
        };
        if percent > self.last {
            self.last = percent;
            Some(percent)
        } else {
            None
        }
    }

    pub fn complete(&mut self) -> u8 {
        self.last = 100;
        100
    }
}

pub fn is_html(content_type: &str) -> bool {
    content_type.to_ascii_lowercase().contains("text/html")
}

pub struct TransferEngine {
    client: reqwest::Client,
    min_size: u64,
    stall_timeout: Duration,
}

impl TransferEngine {
    pub fn new(client: reqwest::Client, settings: &TransferSettings) -> Self {
        Self::with_limits(client, settings.min_size_bytes, settings.stall_timeout())
    }

    pub fn with_limits(client: reqwest::Client, min_size: u64, stall_timeout: Duration) -> Self {
        Self {
            client,
            min_size,
            stall_timeout,
        }
    }

    /// Pulls the stream into `sink`. On any failure, cancellation included,
    /// the sink is cleaned up before the error is returned.
    pub async fn transfer(
        &self,
        location: StreamLocation,
        sink: &mut dyn TransferSink,
        progress: &mpsc::Sender<TransferProgress>,
        cancel: &CancellationToken,
    ) -> Result<TransferOutcome, FetchError> {
        let result = self.run(location, sink, progress, cancel).await;
        if let Err(e) = &result {
            tracing::debug!("[transfer] aborted: {}", e);
            sink.cleanup().await;
        }
        result
    }

    async fn run(
        &self,
        location: StreamLocation,
        sink: &mut dyn TransferSink,
        progress: &mpsc::Sender<TransferProgress>,
        cancel: &CancellationToken,
    ) -> Result<TransferOutcome, FetchError> {
        if cancel.is_cancelled() {
            return Err(FetchError::Cancelled);
        }

        match location {
            StreamLocation::Remote { url, headers } => {
                let request = self.client.get(&url).headers(headers);
                let response = tokio::select! {
                    r = request.send() => r?,
                    _ = cancel.cancelled() => return Err(FetchError::Cancelled),
                };

                let status = response.status();
                if !status.is_success() {
                    return Err(FetchError::from_status(status, "media host"));
                }

                if let Some(ct) = response
                    .headers()
                    .get(reqwest::header::CONTENT_TYPE)
                    .and_then(|v| v.to_str().ok())
                {
                    if is_html(ct) {
                        return Err(FetchError::InvalidResponse(
                            "server returned an HTML page instead of media".into(),
                        ));
                    }
                }

                let total = response.content_length();
                self.check_declared_size(total)?;

                let stream = response
                    .bytes_stream()
                    .map(|r| r.map_err(FetchError::from));
                self.pump(stream, total, sink, progress, cancel).await
            }
            StreamLocation::LocalFile(temp) => {
                let file = tokio::fs::File::open(temp.path()).await?;
                let total = file.metadata().await?.len();
                self.check_declared_size(Some(total))?;

                let stream = ReaderStream::new(file).map(|r| r.map_err(FetchError::from));
                let result = self.pump(stream, Some(total), sink, progress, cancel).await;
                drop(temp);
                result
            }
        }
    }

    fn check_declared_size(&self, total: Option<u64>) -> Result<(), FetchError> {
        match total {
            Some(t) if t > 0 && t < self.min_size => Err(FetchError::InvalidResponse(format!(
                "payload too small ({} KB), likely an error page",
                t / 1024
            ))),
            _ => Ok(()),
        }
    }

    async fn pump<S, B>(
        &self,
        stream: S,
        total: Option<u64>,
        sink: &mut dyn TransferSink,
        progress: &mpsc::Sender<TransferProgress>,
        cancel: &CancellationToken,
    ) -> Result<TransferOutcome, FetchError>
    where
        S: Stream<Item = Result<B, FetchError>>,
        B: AsRef<[u8]>,
    {
        tokio::pin!(stream);
        let mut tracker = ProgressTracker::new(total);

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(FetchError::Cancelled),
                n = tokio::time::timeout(self.stall_timeout, stream.next()) => n,
            };

            match next {
                Ok(Some(Ok(chunk))) => {
                    let data = chunk.as_ref();
                    sink.write_chunk(data).await?;
                    if let Some(percent) = tracker.advance(data.len() as u64) {
                        let _ = progress
                            .send(TransferProgress {
                                percent,
                                received_bytes: tracker.received(),
                                total_bytes: total,
                            })
                            .await;
                    }
                }
                Ok(Some(Err(e))) => return Err(e),
                Ok(None) => break,
                Err(_) => {
                    return Err(FetchError::Unavailable(format!(
                        "stalled: no data received for {} seconds",
                        self.stall_timeout.as_secs()
                    )))
                }
            }
        }

        let received = tracker.received();
        if received < self.min_size {
            return Err(FetchError::InvalidResponse(format!(
                "incomplete payload ({} KB)",
                received / 1024
            )));
        }

        let output_path = sink.finish().await?;
        let _ = progress
            .send(TransferProgress {
                percent: tracker.complete(),
                received_bytes: received,
                total_bytes: total,
            })
            .await;

        tracing::debug!("[transfer] finished {} bytes", received);
        Ok(TransferOutcome {
            bytes: received,
            output_path,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn engine() -> TransferEngine {
        TransferEngine::with_limits(reqwest::Client::new(), MIN_MEDIA_BYTES, Duration::from_secs(5))
    }

    async fn serve(body: Vec<u8>, content_type: &str) -> (MockServer, String) {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/media.mp4"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", content_type)
                    .set_body_bytes(body),
            )
            .mount(&server)
            .await;
        let url = format!("{}/media.mp4", server.uri());
        (server, url)
    }

    fn drain(mut rx: mpsc::Receiver<TransferProgress>) -> Vec<u8> {
        let mut seen = Vec::new();
        while let Ok(p) = rx.try_recv() {
            seen.push(p.percent);
        }
        seen
    }

    #[test]
    fn part_path_appends_suffix() {
        assert_eq!(part_path_for(Path::new("a/video.mp4")), PathBuf::from("a/video.mp4.part"));
    }

    #[test]
    fn temp_media_drop_removes_partial_and_stem_siblings() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("ytdl_1.mp4");
        for name in ["ytdl_1.mp4.part", "ytdl_1.f137.mp4", "ytdl_1.webm", "other.mp4"] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }

        drop(TempMedia::owning_stem(&out, "ytdl_1"));

        let mut left: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        left.sort();
        assert_eq!(left, vec!["other.mp4"]);
    }

    #[test]
    fn plain_temp_media_leaves_neighbours_alone() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("clip.mp4");
        std::fs::write(&out, b"x").unwrap();
        std::fs::write(dir.path().join("clip.mp4.part"), b"x").unwrap();
        std::fs::write(dir.path().join("clip.webm"), b"x").unwrap();

        drop(TempMedia::new(&out));

        assert!(!out.exists());
        assert!(!dir.path().join("clip.mp4.part").exists());
        assert!(dir.path().join("clip.webm").exists());
    }

    #[test]
    fn tracker_known_total_rounds() {
        let mut t = ProgressTracker::new(Some(200));
        assert_eq!(t.advance(0), None);
        assert_eq!(t.advance(100), Some(50));
        assert_eq!(t.advance(0), None);
        assert_eq!(t.advance(100), Some(100));
    }

    #[test]
    fn tracker_unknown_total_caps_at_95() {
        let mut t = ProgressTracker::new(None);
        let mut last = 0;
        for _ in 0..200 {
            if let Some(p) = t.advance(1_000_000) {
                assert!(p > last);
                last = p;
            }
        }
        assert_eq!(last, 95);
        assert_eq!(t.complete(), 100);
    }

    #[test]
    fn tracker_zero_total_is_unknown() {
        let mut t = ProgressTracker::new(Some(0));
        assert_eq!(t.advance(500_000), Some(50));
    }

    #[test]
    fn html_content_type_detection() {
        assert!(is_html("text/html; charset=utf-8"));
        assert!(is_html("TEXT/HTML"));
        assert!(!is_html("video/mp4"));
    }

    #[tokio::test]
    async fn transfers_into_memory_with_progress() {
        let body = vec![7u8; 120_000];
        let (_server, url) = serve(body.clone(), "video/mp4").await;
        let provider = MemorySinkProvider::new();
        let mut sink = provider.open("clip.mp4");
        let (tx, rx) = mpsc::channel(1024);

        let outcome = engine()
            .transfer(StreamLocation::remote(url), sink.as_mut(), &tx, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.bytes, 120_000);
        assert_eq!(outcome.output_path, None);
        assert_eq!(provider.get("clip.mp4").unwrap(), body);

        let seen = drain(rx);
        assert_eq!(seen.last(), Some(&100));
        assert!(seen.windows(2).all(|w| w[0] <= w[1]));
    }

    #[tokio::test]
    async fn rejects_html_content_type() {
        let (_server, url) = serve(vec![b'<'; 200_000], "text/html; charset=utf-8").await;
        let provider = MemorySinkProvider::new();
        let mut sink = provider.open("blocked.mp4");
        let (tx, _rx) = mpsc::channel(16);

        let err = engine()
            .transfer(StreamLocation::remote(url), sink.as_mut(), &tx, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, FetchError::InvalidResponse(_)));
        assert!(provider.is_empty());
    }

    #[tokio::test]
    async fn rejects_undersized_payload() {
        let (_server, url) = serve(vec![1u8; 10_000], "video/mp4").await;
        let provider = MemorySinkProvider::new();
        let mut sink = provider.open("tiny.mp4");
        let (tx, _rx) = mpsc::channel(16);

        let err = engine()
            .transfer(StreamLocation::remote(url), sink.as_mut(), &tx, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, FetchError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn maps_404_to_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        let provider = MemorySinkProvider::new();
        let mut sink = provider.open("gone.mp4");
        let (tx, _rx) = mpsc::channel(16);

        let err = engine()
            .transfer(
                StreamLocation::remote(format!("{}/gone", server.uri())),
                sink.as_mut(),
                &tx,
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, FetchError::NotFound(_)));
    }

    #[tokio::test]
    async fn file_sink_renames_part_on_success() {
        let dir = tempfile::tempdir().unwrap();
        let (_server, url) = serve(vec![3u8; 60_000], "application/octet-stream").await;
        let provider = DirectorySink::new(dir.path());
        let mut sink = provider.open("out.mp4");
        let (tx, _rx) = mpsc::channel(1024);

        let outcome = engine()
            .transfer(StreamLocation::remote(url), sink.as_mut(), &tx, &CancellationToken::new())
            .await
            .unwrap();

        let final_path = dir.path().join("out.mp4");
        assert_eq!(outcome.output_path, Some(final_path.clone()));
        assert_eq!(std::fs::metadata(&final_path).unwrap().len(), 60_000);
        assert!(!dir.path().join("out.mp4.part").exists());
    }

    #[tokio::test]
    async fn local_file_is_streamed_and_removed() {
        let dir = tempfile::tempdir().unwrap();
        let temp_path = dir.path().join("ytdl_tmp.mp4");
        std::fs::write(&temp_path, vec![9u8; 80_000]).unwrap();
        let provider = MemorySinkProvider::new();
        let mut sink = provider.open("local.mp4");
        let (tx, _rx) = mpsc::channel(1024);

        let outcome = engine()
            .transfer(
                StreamLocation::LocalFile(TempMedia::new(&temp_path)),
                sink.as_mut(),
                &tx,
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(outcome.bytes, 80_000);
        assert!(!temp_path.exists());
    }

    #[tokio::test]
    async fn cancelled_transfer_removes_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let temp_path = dir.path().join("src.mp4");
        std::fs::write(&temp_path, vec![1u8; 80_000]).unwrap();
        let provider = DirectorySink::new(dir.path().join("out"));
        let mut sink = provider.open("cancel.mp4");
        let (tx, _rx) = mpsc::channel(1024);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = engine()
            .transfer(
                StreamLocation::LocalFile(TempMedia::new(&temp_path)),
                sink.as_mut(),
                &tx,
                &cancel,
            )
            .await
            .unwrap_err();

        assert!(err.is_cancelled());
        assert!(!dir.path().join("out").join("cancel.mp4.part").exists());
        assert!(!dir.path().join("out").join("cancel.mp4").exists());
        assert!(!temp_path.exists());
    }
}
