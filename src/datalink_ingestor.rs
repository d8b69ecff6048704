use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, trace, warn};

use crate::aircraft_registry::RegistryHandle;
use crate::datalink_sources::DatalinkSource;
use crate::ingestor::IngestorHandle;
use crate::message::MessageType;
use crate::normalizer::Normalizer;
use crate::stats::IngestCounters;

/// Delay before re-establishing a failed subscription
pub const RECONNECT_DELAY: Duration = Duration::from_secs(5);
/// Interval of the ingest summary log line
pub const LOG_STATS_INTERVAL: Duration = Duration::from_secs(300);

enum Event {
    Cancelled,
    LogTick,
    Received(Result<Option<String>>),
}

/// Normalizes payloads of one feed and hands them to the registry
#[derive(Clone)]
pub struct DatalinkPipeline {
    message_type: MessageType,
    normalizer: Arc<Normalizer>,
    registry: RegistryHandle,
    counters: Arc<IngestCounters>,
}

impl DatalinkPipeline {
    pub fn new(
        message_type: MessageType,
        normalizer: Arc<Normalizer>,
        registry: RegistryHandle,
    ) -> Self {
        Self {
            message_type,
            normalizer,
            registry,
            counters: Arc::new(IngestCounters::new()),
        }
    }

    pub fn message_type(&self) -> MessageType {
        self.message_type
    }

    /// Shared with the stats task, which drains the stats window
    pub fn counters(&self) -> Arc<IngestCounters> {
        self.counters.clone()
    }

    /// Normalize one payload and hand it to the registry
    ///
    /// Malformed payloads are logged and counted, never returned as errors.
    /// Messages with a non-zero decoder error count are kept and also
    /// counted as errors. An error means the registry worker is gone.
    pub async fn handle_payload(&self, payload: &str) -> Result<()> {
        let message_type = self.message_type.as_str();
        metrics::counter!("datalink.messages.received_total", "type" => message_type).increment(1);

        let message = match self.normalizer.normalize_json(payload) {
            Ok(message) => message,
            Err(e) => {
                warn!("Dropping malformed {} payload: {}", message_type, e);
                trace!("Malformed payload: {}", payload);
                self.counters.record_rejected();
                metrics::counter!("datalink.messages.rejected_total", "type" => message_type)
                    .increment(1);
                return Ok(());
            }
        };

        if message.message_type != self.message_type {
            debug!(
                "{} subscription delivered a {} message",
                self.message_type, message.message_type
            );
        }

        self.counters.record_accepted();
        if message.error_count > 0 {
            self.counters.record_flagged();
        }
        self.registry.process_message(message).await
    }
}

/// Drives one datalink subscription through a [`DatalinkPipeline`]
pub struct DatalinkIngestor {
    source: Box<dyn DatalinkSource>,
    pipeline: DatalinkPipeline,
    reconnect_delay: Duration,
    log_interval: Duration,
}

impl DatalinkIngestor {
    pub fn new(source: Box<dyn DatalinkSource>, pipeline: DatalinkPipeline) -> Self {
        Self {
            source,
            pipeline,
            reconnect_delay: RECONNECT_DELAY,
            log_interval: LOG_STATS_INTERVAL,
        }
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    pub fn with_log_interval(mut self, interval: Duration) -> Self {
        self.log_interval = interval;
        self
    }

    pub fn pipeline(&self) -> &DatalinkPipeline {
        &self.pipeline
    }

    fn log_window(&self) {
        let counters = &self.pipeline.counters;
        let window = counters.take_log_window();
        info!(
            "{} from {}: {} messages ({} errors) in the last {:?}, {} total",
            self.pipeline.message_type,
            self.source.describe(),
            window.total,
            window.errors,
            self.log_interval,
            counters.total()
        );
    }

    /// Run until cancelled or the source ends
    pub async fn run(mut self, cancel: CancellationToken) {
        let source_name = self.source.describe();
        let message_type = self.pipeline.message_type;
        info!("Starting {} ingest from {}", message_type, source_name);

        let mut log_ticker = tokio::time::interval(self.log_interval);
        log_ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        log_ticker.tick().await;

        loop {
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => Event::Cancelled,
                _ = log_ticker.tick() => Event::LogTick,
                result = self.source.next_message() => Event::Received(result),
            };

            match event {
                Event::Cancelled => {
                    info!("{} ingest from {} cancelled", message_type, source_name);
                    break;
                }
                Event::LogTick => self.log_window(),
                Event::Received(Ok(Some(payload))) => {
                    if let Err(e) = self.pipeline.handle_payload(&payload).await {
                        error!("Stopping {} ingest from {}: {}", message_type, source_name, e);
                        break;
                    }
                }
                Event::Received(Ok(None)) => {
                    info!("{} source {} ended", message_type, source_name);
                    break;
                }
                Event::Received(Err(e)) => {
                    metrics::counter!("datalink.connection.errors_total", "type" => message_type.as_str())
                        .increment(1);
                    warn!(
                        "{} source {} failed: {:#} - reconnecting in {:?}",
                        message_type, source_name, e, self.reconnect_delay
                    );

                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(self.reconnect_delay) => {}
                    }

                    let reconnected = tokio::select! {
                        _ = cancel.cancelled() => break,
                        result = self.source.reconnect() => result,
                    };
                    if let Err(e) = reconnected {
                        warn!("Reconnect to {} failed: {:#}", source_name, e);
                    }
                }
            }
        }

        info!(
            "{} ingest from {} stopped after {} messages ({} rejected)",
            message_type,
            source_name,
            self.pipeline.counters.total(),
            self.pipeline.counters.rejected()
        );
    }

    pub fn spawn(self, cancel: CancellationToken) -> IngestorHandle {
        let message_type = self.pipeline.message_type;
        let name = format!("{} {}", message_type, self.source.describe());
        let span = tracing::info_span!("datalink_ingest", kind = %message_type);
        let join = tokio::spawn(self.run(cancel.clone()).instrument(span));
        IngestorHandle::new(name, cancel, join)
    }
}
