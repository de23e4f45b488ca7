use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::core::process;
use crate::models::settings::ProbeSettings;

/// Pre-flight health check run once per batch. Never errors: anything other
/// than a clear "healthy" reads as `false`.
#[async_trait]
pub trait AvailabilityProbe: Send + Sync {
    async fn check(&self) -> bool;
}

/// Healthy when the conversion tool and its merging companion both answer
/// within the timeout.
pub struct ToolProbe {
    timeout: Duration,
    tool_path: Option<PathBuf>,
}

impl ToolProbe {
    pub fn new(settings: &ProbeSettings, tool_path: Option<PathBuf>) -> Self {
        Self {
            timeout: settings.timeout(),
            tool_path,
        }
    }

    async fn tool_ready(&self) -> bool {
        match &self.tool_path {
            Some(path) => process::command(path)
                .arg("--version")
                .stdout(std::process::Stdio::null())
                .stderr(std::process::Stdio::null())
                .status()
                .await
                .map(|s| s.success())
                .unwrap_or(false),
            None => process::find_tool("yt-dlp", "--version").await.is_some(),
        }
    }
}

#[async_trait]
impl AvailabilityProbe for ToolProbe {
    async fn check(&self) -> bool {
        let checks = async {
            let (tool, ffmpeg) = tokio::join!(
                self.tool_ready(),
                process::find_tool("ffmpeg", "-version")
            );
            tool && ffmpeg.is_some()
        };

        match tokio::time::timeout(self.timeout, checks).await {
            Ok(healthy) => {
                tracing::info!("[probe] local tools {}", if healthy { "ready" } else { "missing" });
                healthy
            }
            Err(_) => {
                tracing::warn!("[probe] tool check timed out after {}s", self.timeout.as_secs());
                false
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct HealthBody {
    #[serde(default)]
    ready: bool,
}

/// GETs a health endpoint that answers `{"ready": true}`.
pub struct HttpProbe {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl HttpProbe {
    pub fn new(client: reqwest::Client, url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client,
            url: url.into(),
            timeout,
        }
    }

    async fn fetch(&self) -> Result<bool, reqwest::Error> {
        let response = self
            .client
            .get(&self.url)
            .timeout(self.timeout)
            .send()
            .await?
            .error_for_status()?;
        let body: HealthBody = response.json().await?;
        Ok(body.ready)
    }
}

#[async_trait]
impl AvailabilityProbe for HttpProbe {
    async fn check(&self) -> bool {
        match self.fetch().await {
            Ok(ready) => {
                tracing::info!("[probe] {} ready={}", self.url, ready);
                ready
            }
            Err(e) => {
                tracing::warn!("[probe] {} failed: {}", self.url, e);
                false
            }
        }
    }
}

/// Fixed answer, for wiring without a real backend.
pub struct StaticProbe(pub bool);

#[async_trait]
impl AvailabilityProbe for StaticProbe {
    async fn check(&self) -> bool {
        self.0
    }
}
