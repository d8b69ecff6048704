use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};

use acarshub::aircraft_registry::AircraftRegistry;
use acarshub::config::RetentionConfig;
use acarshub::datalink_sources::{DatalinkSource, FileDatalinkSource};
use acarshub::decoder::NoopDecoder;
use acarshub::iata::{IataOverride, IataResolver};
use acarshub::normalizer::Normalizer;
use acarshub::stats::IngestCounters;

/// Replay a capture through the normalizer and a registry, then print the
/// resulting aircraft
pub async fn handle_replay(
    file: PathBuf,
    iata_table: Option<PathBuf>,
    iata_overrides: Vec<IataOverride>,
    pretty: bool,
) -> Result<()> {
    let resolver = match iata_table {
        Some(path) => IataResolver::load(path, &iata_overrides).await,
        None => {
            let mut resolver = IataResolver::empty();
            resolver.apply_overrides(&iata_overrides);
            resolver
        }
    };
    let normalizer = Normalizer::new(Arc::new(resolver));
    let mut registry = AircraftRegistry::new(Arc::new(NoopDecoder), RetentionConfig::default());
    let counters = IngestCounters::new();

    let mut source = FileDatalinkSource::from_file(&file).await?;
    info!("Replaying {}", source.describe());

    while let Some(payload) = source.next_message().await? {
        match normalizer.normalize_json(&payload) {
            Ok(message) => {
                counters.record_accepted();
                registry.process_message(message);
            }
            Err(e) => {
                counters.record_rejected();
                warn!("Line {}: {}", source.lines_read(), e);
            }
        }
    }

    info!(
        "Replayed {} messages ({} rejected) into {} aircraft",
        counters.total(),
        counters.rejected(),
        registry.aircraft_count()
    );

    let summaries = registry.summaries();
    let output = if pretty {
        serde_json::to_string_pretty(&summaries)
    } else {
        serde_json::to_string(&summaries)
    }
    .context("Failed to serialize aircraft")?;
    println!("{}", output);

    Ok(())
}
