use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, REFERER, USER_AGENT};

use crate::core::error::FetchError;
use crate::core::transfer::StreamLocation;
use crate::models::source::SourceRef;
use crate::resolvers::traits::{AdapterClass, ResolveContext, ResolvedStream, Resolver};

/// Re-streams the raw CDN asset with browser-like headers. Nothing is
/// fetched here; the transfer engine performs the single GET.
pub struct DirectResolver {
    user_agent: String,
}

impl DirectResolver {
    pub fn new(user_agent: impl Into<String>) -> Self {
        Self {
            user_agent: user_agent.into(),
        }
    }

    fn headers(&self, source: &SourceRef) -> Result<HeaderMap, FetchError> {
        let mut headers = HeaderMap::new();
        let ua = HeaderValue::from_str(&self.user_agent)
            .map_err(|e| FetchError::InvalidResponse(format!("bad user agent: {}", e)))?;
        headers.insert(USER_AGENT, ua);
        headers.insert(REFERER, HeaderValue::from_static(source.platform.referer()));
        Ok(headers)
    }
}

#[async_trait]
impl Resolver for DirectResolver {
    fn id(&self) -> &str {
        "direct"
    }

    fn class(&self) -> AdapterClass {
        AdapterClass::DirectProxy
    }

    async fn resolve(
        &self,
        source: &SourceRef,
        ctx: &ResolveContext,
    ) -> Result<ResolvedStream, FetchError> {
        if ctx.cancel.is_cancelled() {
            return Err(FetchError::Cancelled);
        }
        if ctx.audio_only {
            return Err(FetchError::NotFound("no audio-only CDN asset".into()));
        }

        let raw = source
            .media_url
            .as_deref()
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| FetchError::NotFound(format!("no media URL for {}", source.id)))?;

        let parsed = url::Url::parse(raw)
            .map_err(|e| FetchError::InvalidResponse(format!("bad media URL: {}", e)))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(FetchError::InvalidResponse(format!(
                "unsupported scheme: {}",
                parsed.scheme()
            )));
        }

        tracing::debug!("[direct] {} -> {}", source.id, parsed.host_str().unwrap_or("?"));

        Ok(ResolvedStream {
            location: StreamLocation::Remote {
                url: parsed.to_string(),
                headers: self.headers(source)?,
            },
            suggested_filename: None,
        })
    }
}
