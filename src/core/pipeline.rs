use std::sync::Arc;

use reelqueue_core::core::events::EventEmitter;
use reelqueue_core::core::http_client::build_client;
use reelqueue_core::core::manifest::CsvManifest;
use reelqueue_core::core::orchestrator::{OrchestratorOptions, QueueOrchestrator};
use reelqueue_core::core::probe::{AvailabilityProbe, HttpProbe, ToolProbe};
use reelqueue_core::core::transfer::{DirectorySink, TransferEngine};
use reelqueue_core::models::settings::AppSettings;
use reelqueue_core::resolvers::cobalt::CobaltResolver;
use reelqueue_core::resolvers::direct::DirectResolver;
use reelqueue_core::resolvers::traits::Resolver;
use reelqueue_core::resolvers::ytdlp::YtdlpResolver;

pub fn build_probe(settings: &AppSettings) -> anyhow::Result<Arc<dyn AvailabilityProbe>> {
    let probe: Arc<dyn AvailabilityProbe> = match &settings.probe.check_url {
        Some(url) => {
            let client = build_client(&settings.download.user_agent, &settings.proxy, None)?;
            Arc::new(HttpProbe::new(client, url.clone(), settings.probe.timeout()))
        }
        None => Arc::new(ToolProbe::new(
            &settings.probe,
            settings.subprocess.tool_path.clone(),
        )),
    };
    Ok(probe)
}

pub fn build_resolvers(settings: &AppSettings) -> anyhow::Result<Vec<Arc<dyn Resolver>>> {
    let api_client = build_client(
        &settings.download.user_agent,
        &settings.proxy,
        Some(settings.remote.timeout()),
    )?;
    let resolvers: Vec<Arc<dyn Resolver>> = vec![
        Arc::new(YtdlpResolver::new(&settings.subprocess)),
        Arc::new(CobaltResolver::new(api_client, &settings.remote)),
        Arc::new(DirectResolver::new(settings.download.user_agent.clone())),
    ];
    Ok(resolvers)
}

/// Wires one orchestrator from settings: files land in the output dir, the
/// manifest beside them when enabled.
pub fn build_orchestrator<E: EventEmitter>(
    settings: &AppSettings,
    emitter: E,
) -> anyhow::Result<QueueOrchestrator<E>> {
    let stream_client = build_client(&settings.download.user_agent, &settings.proxy, None)?;
    let engine = Arc::new(TransferEngine::new(stream_client, &settings.transfer));
    let output = settings.download.output_dir.clone();

    let orchestrator = QueueOrchestrator::new(
        build_resolvers(settings)?,
        build_probe(settings)?,
        engine,
        Arc::new(DirectorySink::new(&output)),
        emitter,
        OrchestratorOptions::from_settings(settings),
    );

    if settings.download.export_manifest {
        Ok(orchestrator.with_manifest(Arc::new(CsvManifest::new(output))))
    } else {
        Ok(orchestrator)
    }
}
