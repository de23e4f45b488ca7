use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use reelqueue_core::core::events::EntryStatus;
use reelqueue_core::core::manifest::CsvManifest;
use reelqueue_core::models::settings::{AppSettings, Quality};
use reelqueue_core::models::source::SourceRef;
use reelqueue_core::resolvers::ytdlp::find_ytdlp;

use crate::core::events::LogEventEmitter;
use crate::core::pipeline::{build_orchestrator, build_probe};
use crate::storage::config;

pub fn load_catalog(path: &Path) -> anyhow::Result<Vec<SourceRef>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading catalog {}", path.display()))?;
    let items: Vec<SourceRef> = serde_json::from_str(&raw)
        .with_context(|| format!("parsing catalog {}", path.display()))?;
    Ok(items)
}

fn apply_overrides(
    settings: &mut AppSettings,
    output: Option<PathBuf>,
    quality: Option<Quality>,
    audio_only: bool,
) {
    if let Some(dir) = output {
        settings.download.output_dir = dir;
    }
    if let Some(q) = quality {
        settings.download.quality = q;
    }
    if audio_only {
        settings.download.audio_only = true;
    }
}

pub async fn run_download(
    catalog: &Path,
    output: Option<PathBuf>,
    quality: Option<Quality>,
    audio_only: bool,
    retries: u32,
) -> anyhow::Result<()> {
    let mut settings = config::load_settings();
    apply_overrides(&mut settings, output, quality, audio_only);

    let items = load_catalog(catalog)?;
    if items.is_empty() {
        println!("Catalog is empty, nothing to download.");
        return Ok(());
    }

    tracing::info!(
        "downloading {} items to {}",
        items.len(),
        settings.download.output_dir.display()
    );

    let orchestrator = Arc::new(build_orchestrator(&settings, LogEventEmitter::new())?);

    let interrupt = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupt received, cancelling batch");
                orchestrator.cancel_all().await;
            }
        })
    };

    orchestrator.start_batch(items).await;

    for attempt in 1..=retries {
        let snap = orchestrator.snapshot().await;
        if snap.cancelled || snap.failed_count == 0 {
            break;
        }
        tracing::info!("retry {}/{} for {} failed entries", attempt, retries, snap.failed_count);
        orchestrator.retry_failed().await;
    }
    interrupt.abort();

    let snap = orchestrator.snapshot().await;
    println!(
        "{} of {} downloaded ({}%)",
        snap.completed_count, snap.total, snap.overall_progress
    );
    for entry in snap.entries.iter().filter(|e| e.status == EntryStatus::Failed) {
        println!(
            "  failed: {} ({})",
            entry.title,
            entry.error.as_deref().unwrap_or("unknown error")
        );
    }

    if snap.failed_count > 0 {
        bail!("{} of {} downloads failed", snap.failed_count, snap.total);
    }
    Ok(())
}

pub async fn run_check() -> anyhow::Result<()> {
    let settings = config::load_settings();
    let healthy = build_probe(&settings)?.check().await;

    match find_ytdlp().await {
        Some(path) => println!("yt-dlp: {}", path.display()),
        None => println!("yt-dlp: not found"),
    }
    if healthy {
        println!("probe: healthy, local conversion leads the chain");
    } else {
        println!("probe: unavailable, remote conversion leads the chain");
    }
    Ok(())
}

pub fn run_manifest(catalog: &Path, output: Option<PathBuf>) -> anyhow::Result<()> {
    let settings = config::load_settings();
    let items = load_catalog(catalog)?;
    let dir = output.unwrap_or(settings.download.output_dir);
    let path = CsvManifest::new(dir).write(&items)?;
    println!("{}", path.display());
    Ok(())
}

pub fn run_config(init: bool) -> anyhow::Result<()> {
    let settings = config::load_settings();
    println!("{}", serde_json::to_string_pretty(&settings)?);
    if init {
        let path = config::save_settings(&settings)?;
        println!("saved to {}", path.display());
    }
    Ok(())
}
