use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::core::error::FetchError;
use crate::core::transfer::{StreamLocation, TransferProgress};
use crate::models::settings::Quality;
use crate::models::source::SourceRef;

/// Backend family, used for chain ordering and for the pacing delay that
/// follows an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AdapterClass {
    BatchCapable,
    RemoteConversion,
    DirectProxy,
}

#[derive(Debug, Clone)]
pub struct ResolveContext {
    pub quality: Quality,
    pub audio_only: bool,
    pub cancel: CancellationToken,
    /// Optional sink for progress reported while resolving (local conversion).
    pub progress: Option<mpsc::Sender<TransferProgress>>,
}

impl ResolveContext {
    pub fn new(quality: Quality, audio_only: bool, cancel: CancellationToken) -> Self {
        Self {
            quality,
            audio_only,
            cancel,
            progress: None,
        }
    }

    pub fn with_progress(mut self, progress: mpsc::Sender<TransferProgress>) -> Self {
        self.progress = Some(progress);
        self
    }
}

#[derive(Debug)]
pub struct ResolvedStream {
    pub location: StreamLocation,
    pub suggested_filename: Option<String>,
}

#[async_trait]
pub trait Resolver: Send + Sync {
    fn id(&self) -> &str;
    fn class(&self) -> AdapterClass;
    async fn resolve(
        &self,
        source: &SourceRef,
        ctx: &ResolveContext,
    ) -> Result<ResolvedStream, FetchError>;
}
