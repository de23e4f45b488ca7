use std::time::Duration;

use async_trait::async_trait;
use rand::RngExt;
use serde::Deserialize;

use crate::core::error::FetchError;
use crate::core::transfer::{is_html, StreamLocation};
use crate::models::settings::RemoteSettings;
use crate::models::source::SourceRef;
use crate::resolvers::traits::{AdapterClass, ResolveContext, ResolvedStream, Resolver};

#[derive(Debug, Deserialize)]
struct CobaltResponse {
    status: String,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    filename: Option<String>,
    #[serde(default)]
    picker: Vec<PickerOption>,
    #[serde(default)]
    error: Option<CobaltErrorBody>,
}

#[derive(Debug, Deserialize)]
struct PickerOption {
    url: String,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CobaltErrorBody {
    Coded { code: String },
    Text(String),
}

impl CobaltErrorBody {
    fn code(&self) -> &str {
        match self {
            CobaltErrorBody::Coded { code } => code,
            CobaltErrorBody::Text(text) => text,
        }
    }
}

/// Maps a conversion-service error code onto the taxonomy.
fn classify_error_code(code: &str) -> FetchError {
    let lower = code.to_ascii_lowercase();
    if lower.contains("rate") || lower.contains("login") || lower.contains("captcha") {
        FetchError::Blocked(code.to_string())
    } else if lower.contains("unavailable")
        || lower.contains("empty")
        || lower.contains("private")
        || lower.contains("not_found")
    {
        FetchError::NotFound(code.to_string())
    } else {
        FetchError::Unavailable(code.to_string())
    }
}

fn interpret(data: CobaltResponse) -> Result<ResolvedStream, FetchError> {
    match data.status.as_str() {
        "redirect" | "tunnel" => {
            let url = data
                .url
                .filter(|u| !u.is_empty())
                .ok_or_else(|| FetchError::InvalidResponse(format!("{} without url", data.status)))?;
            Ok(ResolvedStream {
                location: StreamLocation::remote(url),
                suggested_filename: data.filename,
            })
        }
        "picker" => {
            let first = data
                .picker
                .into_iter()
                .next()
                .ok_or_else(|| FetchError::NotFound("picker returned no options".into()))?;
            Ok(ResolvedStream {
                location: StreamLocation::remote(first.url),
                suggested_filename: data.filename,
            })
        }
        "error" => {
            let code = data
                .error
                .as_ref()
                .map(|e| e.code().to_string())
                .unwrap_or_else(|| "error".to_string());
            Err(classify_error_code(&code))
        }
        other => Err(FetchError::InvalidResponse(format!(
            "unexpected status: {}",
            other
        ))),
    }
}

/// Challenge pages sometimes arrive without an HTML content type.
fn looks_like_html(body: &str) -> bool {
    let head: String = body.trim_start().chars().take(16).collect::<String>().to_lowercase();
    head.starts_with("<!doctype") || head.starts_with("<html")
}

/// Remote conversion service client. Instances are tried in order; each one
/// gets up to `max_attempts` tries while it answers with a block page.
pub struct CobaltResolver {
    client: reqwest::Client,
    instances: Vec<String>,
    timeout: Duration,
    max_attempts: u32,
    backoff_ms: u64,
}

impl CobaltResolver {
    pub fn new(client: reqwest::Client, settings: &RemoteSettings) -> Self {
        Self {
            client,
            instances: settings.instances.clone(),
            timeout: settings.timeout(),
            max_attempts: settings.max_attempts.max(1),
            backoff_ms: settings.backoff_ms,
        }
    }

    fn request_body(source: &SourceRef, ctx: &ResolveContext) -> serde_json::Value {
        if ctx.audio_only {
            serde_json::json!({
                "url": source.url,
                "downloadMode": "audio",
                "audioFormat": "mp3",
            })
        } else {
            serde_json::json!({
                "url": source.url,
                "downloadMode": "auto",
                "videoQuality": ctx.quality.remote_label(),
            })
        }
    }

    async fn request_once(
        &self,
        instance: &str,
        body: &serde_json::Value,
    ) -> Result<ResolvedStream, FetchError> {
        let endpoint = format!("{}/", instance.trim_end_matches('/'));
        let response = self
            .client
            .post(&endpoint)
            .header(reqwest::header::ACCEPT, "application/json")
            .json(body)
            .timeout(self.timeout)
            .send()
            .await?;

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        let status = response.status();
        let text = response.text().await?;

        if is_html(&content_type) || looks_like_html(&text) {
            return Err(FetchError::Blocked(format!("{}: block page", instance)));
        }
        if !status.is_success() {
            return Err(FetchError::from_status(status, instance));
        }

        let data: CobaltResponse = serde_json::from_str(&text)
            .map_err(|e| FetchError::InvalidResponse(format!("{}: {}", instance, e)))?;
        interpret(data)
    }

    async fn try_instance(
        &self,
        instance: &str,
        body: &serde_json::Value,
        ctx: &ResolveContext,
    ) -> Result<ResolvedStream, FetchError> {
        let mut last_err = FetchError::Unavailable(format!("{}: not attempted", instance));

        for attempt in 0..self.max_attempts {
            if attempt > 0 {
                let base = self.backoff_ms * attempt as u64;
                let jitter = rand::rng().random_range(0..=base / 2);
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_millis(base + jitter)) => {}
                    _ = ctx.cancel.cancelled() => return Err(FetchError::Cancelled),
                }
            }

            let outcome = tokio::select! {
                r = self.request_once(instance, body) => r,
                _ = ctx.cancel.cancelled() => return Err(FetchError::Cancelled),
            };

            match outcome {
                Ok(resolved) => return Ok(resolved),
                Err(e @ FetchError::Blocked(_)) => {
                    tracing::warn!(
                        "[cobalt] attempt {}/{} on {} blocked: {}",
                        attempt + 1,
                        self.max_attempts,
                        instance,
                        e
                    );
                    last_err = e;
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_err)
    }
}

#[async_trait]
impl Resolver for CobaltResolver {
    fn id(&self) -> &str {
        "cobalt"
    }

    fn class(&self) -> AdapterClass {
        AdapterClass::RemoteConversion
    }

    async fn resolve(
        &self,
        source: &SourceRef,
        ctx: &ResolveContext,
    ) -> Result<ResolvedStream, FetchError> {
        if ctx.cancel.is_cancelled() {
            return Err(FetchError::Cancelled);
        }
        if self.instances.is_empty() {
            return Err(FetchError::Unavailable("no conversion instances configured".into()));
        }

        let body = Self::request_body(source, ctx);
        let mut last_err = None;

        for instance in &self.instances {
            match self.try_instance(instance, &body, ctx).await {
                Ok(resolved) => {
                    tracing::debug!("[cobalt] {} resolved via {}", source.id, instance);
                    return Ok(resolved);
                }
                Err(FetchError::Cancelled) => return Err(FetchError::Cancelled),
                Err(e) => {
                    tracing::warn!("[cobalt] {} failed on {}: {}", source.id, instance, e);
                    last_err = Some(e);
                }
            }
        }

        Err(last_err.unwrap_or_else(|| FetchError::Unavailable("all instances failed".into())))
    }
}
