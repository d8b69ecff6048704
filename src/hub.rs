use std::sync::Arc;

use anyhow::Result;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, info, warn};

use crate::adsb_ingestor::{PositionIngestor, PositionIngestorConfig};
use crate::aircraft_registry::{AircraftRegistry, RegistryHandle, spawn_registry};
use crate::config::HubConfig;
use crate::datalink_ingestor::{DatalinkIngestor, DatalinkPipeline};
use crate::datalink_sources::ZmqDatalinkSource;
use crate::decoder::{NoopDecoder, TextDecoder};
use crate::iata::IataResolver;
use crate::ingestor::IngestorHandle;
use crate::message::MessageType;
use crate::normalizer::Normalizer;
use crate::stats::{
    IngestCounters, LogStatsSink, MetricsStatsSink, StatsSink, run_stats_task,
};

/// Every running task of the service
///
/// Ingestors, the stats task and the registry worker each run under a child
/// of one root cancellation token.
pub struct Hub {
    cancel: CancellationToken,
    ingestors: Vec<IngestorHandle>,
    registry: RegistryHandle,
    registry_task: JoinHandle<()>,
    background: Vec<JoinHandle<()>>,
}

async fn build_resolver(config: &HubConfig) -> IataResolver {
    match &config.iata_table {
        Some(path) => IataResolver::load(path, &config.iata_overrides).await,
        None => {
            let mut resolver = IataResolver::empty();
            resolver.apply_overrides(&config.iata_overrides);
            resolver
        }
    }
}

impl Hub {
    pub async fn start(config: HubConfig) -> Result<Self> {
        Self::start_with_decoder(config, Arc::new(NoopDecoder)).await
    }

    /// Validate the configuration, then start the registry worker, every
    /// enabled ingestor and the stats task
    pub async fn start_with_decoder(
        config: HubConfig,
        decoder: Arc<dyn TextDecoder>,
    ) -> Result<Self> {
        config.validate()?;

        let cancel = CancellationToken::new();
        let mut background = Vec::new();

        if let Some(port) = config.metrics_port {
            crate::metrics::install_prometheus_exporter(port)?;
            crate::metrics::initialize_hub_metrics();
            background.push(tokio::spawn(
                crate::metrics::process_metrics_task(cancel.child_token())
                    .instrument(tracing::info_span!("process_metrics")),
            ));
        }

        let resolver = Arc::new(build_resolver(&config).await);
        info!("IATA resolver loaded with {} airlines", resolver.len());
        let normalizer = Arc::new(Normalizer::new(resolver));

        let registry = AircraftRegistry::new(decoder, config.retention);
        let (registry_handle, registry_task) = spawn_registry(registry, cancel.child_token());

        let mut ingestors = Vec::new();
        let mut stats_sources: Vec<(MessageType, Arc<IngestCounters>)> = Vec::new();

        let datalink_feeds = [
            (MessageType::Acars, config.enable_acars, &config.acars_sources),
            (MessageType::Vdlm2, config.enable_vdlm2, &config.vdlm2_sources),
        ];
        for (message_type, enabled, sources) in datalink_feeds {
            if !enabled {
                continue;
            }
            for address in sources {
                let pipeline =
                    DatalinkPipeline::new(message_type, normalizer.clone(), registry_handle.clone());
                stats_sources.push((message_type, pipeline.counters()));

                let source = Box::new(ZmqDatalinkSource::new(address));
                let ingestor = DatalinkIngestor::new(source, pipeline);
                ingestors.push(ingestor.spawn(cancel.child_token()));
            }
        }

        if config.enable_adsb
            && let Some(host) = &config.adsb_host
        {
            let adsb_config = PositionIngestorConfig::new(host.trim(), config.adsb_port);
            let ingestor = PositionIngestor::new(adsb_config, registry_handle.clone());
            ingestors.push(ingestor.spawn(cancel.child_token()));
        }

        if !stats_sources.is_empty() {
            let mut sinks: Vec<Arc<dyn StatsSink>> = vec![Arc::new(LogStatsSink)];
            if config.metrics_port.is_some() {
                sinks.push(Arc::new(MetricsStatsSink));
            }
            background.push(tokio::spawn(
                run_stats_task(
                    stats_sources,
                    sinks,
                    config.stats_interval,
                    cancel.child_token(),
                )
                .instrument(tracing::info_span!("stats")),
            ));
        }

        info!("Hub started with {} ingestors", ingestors.len());

        Ok(Self {
            cancel,
            ingestors,
            registry: registry_handle,
            registry_task,
            background,
        })
    }

    pub fn registry(&self) -> RegistryHandle {
        self.registry.clone()
    }

    pub fn ingestor_names(&self) -> Vec<&str> {
        self.ingestors.iter().map(IngestorHandle::name).collect()
    }

    /// Close every ingestor, then stop timers and the registry worker
    pub async fn shutdown(self) {
        info!("Shutting down {} ingestors", self.ingestors.len());
        for ingestor in self.ingestors {
            ingestor.close().await;
        }

        self.cancel.cancel();
        for task in self.background {
            if let Err(e) = task.await {
                warn!("Background task failed: {}", e);
            }
        }
        if let Err(e) = self.registry_task.await {
            warn!("Registry worker failed: {}", e);
        }
        info!("Hub stopped");
    }
}
