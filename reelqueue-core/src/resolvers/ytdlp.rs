use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::{mpsc, OnceCell};

use crate::core::error::FetchError;
use crate::core::process;
use crate::core::transfer::{StreamLocation, TempMedia, TransferProgress};
use crate::models::settings::{Quality, SubprocessSettings};
use crate::models::source::SourceRef;
use crate::resolvers::traits::{AdapterClass, ResolveContext, ResolvedStream, Resolver};

static PERCENT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(\d+\.?\d*)%").unwrap());

/// Conversion progress is mapped into 0..=90 so the copy out of the temp
/// file still has room to move the bar.
const CONVERSION_SHARE: f64 = 0.9;
const STDERR_TAIL_LINES: usize = 40;

pub async fn find_ytdlp() -> Option<PathBuf> {
    process::find_tool("yt-dlp", "--version").await
}

pub fn format_selector(quality: Quality) -> String {
    match quality.max_height() {
        None => "bestvideo[ext=mp4]+bestaudio[ext=m4a]/best[ext=mp4]/best".to_string(),
        Some(h) => format!(
            "bestvideo[height<={h}][ext=mp4]+bestaudio[ext=m4a]/best[height<={h}][ext=mp4]/best[height<={h}]"
        ),
    }
}

pub fn parse_percent(line: &str) -> Option<f64> {
    let caps = PERCENT_RE.captures(line)?;
    let pct: f64 = caps.get(1)?.as_str().parse().ok()?;
    (0.0..=100.0).contains(&pct).then_some(pct)
}

/// Reads the tool's stderr to decide which failure class a non-zero exit is.
pub fn classify_failure(stderr: &str, code: Option<i32>) -> FetchError {
    let lower = stderr.to_lowercase();
    let detail = stderr
        .lines()
        .rev()
        .find(|l| l.contains("ERROR"))
        .or_else(|| stderr.lines().rev().find(|l| !l.trim().is_empty()))
        .map(|l| l.trim().chars().take(300).collect::<String>())
        .unwrap_or_else(|| match code {
            Some(c) => format!("yt-dlp exited with code {}", c),
            None => "yt-dlp terminated by signal".to_string(),
        });

    if lower.contains("sign in to confirm")
        || lower.contains("not a bot")
        || lower.contains("429")
        || lower.contains("too many requests")
    {
        FetchError::Blocked(detail)
    } else if lower.contains("unavailable")
        || lower.contains("404")
        || lower.contains("private")
        || lower.contains("not found")
    {
        FetchError::NotFound(detail)
    } else {
        FetchError::Unavailable(detail)
    }
}

/// Arguments for one conversion run.
#[derive(Debug, Clone)]
pub struct YtdlpRequest {
    pub url: String,
    pub quality: Quality,
    pub audio_only: bool,
    pub output_template: PathBuf,
    pub cookies_file: Option<PathBuf>,
}

impl YtdlpRequest {
    pub fn validate(&self) -> Result<(), FetchError> {
        let parsed = url::Url::parse(&self.url)
            .map_err(|e| FetchError::InvalidResponse(format!("bad source URL: {}", e)))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(FetchError::InvalidResponse(format!(
                "unsupported scheme: {}",
                parsed.scheme()
            )));
        }
        Ok(())
    }

    pub fn args(&self) -> Vec<String> {
        let mut args = Vec::new();

        if self.audio_only {
            args.extend([
                "-f".to_string(),
                "bestaudio/best".to_string(),
                "-x".to_string(),
                "--audio-format".to_string(),
                "mp3".to_string(),
            ]);
        } else {
            args.extend([
                "-f".to_string(),
                format_selector(self.quality),
                "--merge-output-format".to_string(),
                "mp4".to_string(),
            ]);
        }

        if let Some(cookies) = &self.cookies_file {
            args.push("--cookies".to_string());
            args.push(cookies.to_string_lossy().to_string());
        }

        args.extend([
            "--no-warnings".to_string(),
            "--no-playlist".to_string(),
            "--newline".to_string(),
            "-o".to_string(),
            self.output_template.to_string_lossy().to_string(),
            self.url.clone(),
        ]);
        args
    }
}

async fn pump_lines<R>(
    reader: R,
    progress: Option<mpsc::Sender<TransferProgress>>,
    keep_tail: bool,
) -> Vec<String>
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    let mut tail = Vec::new();

    while let Ok(Some(line)) = lines.next_line().await {
        if let Some(pct) = parse_percent(&line) {
            if let Some(tx) = &progress {
                let _ = tx.try_send(TransferProgress {
                    percent: (pct * CONVERSION_SHARE).round() as u8,
                    received_bytes: 0,
                    total_bytes: None,
                });
            }
        } else {
            tracing::debug!("[ytdlp] {}", line);
        }
        if keep_tail {
            tail.push(line);
            if tail.len() > STDERR_TAIL_LINES {
                tail.remove(0);
            }
        }
    }

    tail
}

/// Local conversion through a yt-dlp child process. The output lands in a
/// temp file that is removed when the returned location is dropped.
pub struct YtdlpResolver {
    tool_override: Option<PathBuf>,
    tool: OnceCell<Option<PathBuf>>,
    timeout: Duration,
    cookies_file: Option<PathBuf>,
    temp_dir: PathBuf,
}

impl YtdlpResolver {
    pub fn new(settings: &SubprocessSettings) -> Self {
        Self {
            tool_override: settings.tool_path.clone(),
            tool: OnceCell::new(),
            timeout: settings.timeout(),
            cookies_file: settings.cookies_file.clone(),
            temp_dir: std::env::temp_dir(),
        }
    }

    pub fn with_temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = dir.into();
        self
    }

    async fn tool(&self) -> Result<PathBuf, FetchError> {
        if let Some(path) = &self.tool_override {
            return Ok(path.clone());
        }
        self.tool
            .get_or_init(find_ytdlp)
            .await
            .clone()
            .ok_or_else(|| FetchError::Unavailable("yt-dlp not found".into()))
    }

    async fn run(
        &self,
        tool: &Path,
        request: &YtdlpRequest,
        ctx: &ResolveContext,
    ) -> Result<(), FetchError> {
        let mut child = process::command(tool)
            .args(request.args())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| FetchError::Unavailable(format!("failed to start yt-dlp: {}", e)))?;

        let stdout_task = child
            .stdout
            .take()
            .map(|out| tokio::spawn(pump_lines(out, ctx.progress.clone(), false)));
        let stderr_task = child
            .stderr
            .take()
            .map(|err| tokio::spawn(pump_lines(err, ctx.progress.clone(), true)));

        let status = tokio::select! {
            s = child.wait() => s?,
            _ = ctx.cancel.cancelled() => {
                let _ = child.kill().await;
                tracing::info!("[ytdlp] killed on cancel");
                return Err(FetchError::Cancelled);
            }
            _ = tokio::time::sleep(self.timeout) => {
                let _ = child.kill().await;
                return Err(FetchError::Unavailable(format!(
                    "yt-dlp timed out after {}s",
                    self.timeout.as_secs()
                )));
            }
        };

        if let Some(task) = stdout_task {
            let _ = task.await;
        }
        let stderr_tail = match stderr_task {
            Some(task) => task.await.unwrap_or_default().join("\n"),
            None => String::new(),
        };

        if !status.success() {
            return Err(classify_failure(&stderr_tail, status.code()));
        }
        Ok(())
    }
}

#[async_trait]
impl Resolver for YtdlpResolver {
    fn id(&self) -> &str {
        "ytdlp"
    }

    fn class(&self) -> AdapterClass {
        AdapterClass::BatchCapable
    }

    async fn resolve(
        &self,
        source: &SourceRef,
        ctx: &ResolveContext,
    ) -> Result<ResolvedStream, FetchError> {
        if ctx.cancel.is_cancelled() {
            return Err(FetchError::Cancelled);
        }

        let tool = self.tool().await?;
        let stem = format!("ytdl_{}", uuid::Uuid::new_v4());
        let (template, output) = if ctx.audio_only {
            (
                self.temp_dir.join(format!("{}.%(ext)s", stem)),
                self.temp_dir.join(format!("{}.mp3", stem)),
            )
        } else {
            let path = self.temp_dir.join(format!("{}.mp4", stem));
            (path.clone(), path)
        };

        let request = YtdlpRequest {
            url: source.url.clone(),
            quality: ctx.quality,
            audio_only: ctx.audio_only,
            output_template: template,
            cookies_file: self.cookies_file.clone(),
        };
        request.validate()?;

        // Guard first: it also fires when this future is dropped mid-run.
        let temp = TempMedia::owning_stem(&output, &stem);
        tracing::debug!("[ytdlp] {} -> {}", source.id, output.display());

        self.run(&tool, &request, ctx).await?;

        let size = tokio::fs::metadata(&output).await.map(|m| m.len()).unwrap_or(0);
        if size == 0 {
            return Err(FetchError::InvalidResponse(
                "yt-dlp finished but produced no output".into(),
            ));
        }

        Ok(ResolvedStream {
            location: StreamLocation::LocalFile(temp),
            suggested_filename: None,
        })
    }
}
