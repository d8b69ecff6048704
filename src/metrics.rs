use std::net::{Ipv4Addr, SocketAddr};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::message::MessageType;

/// Install the Prometheus recorder with its own HTTP scrape listener
///
/// Must be called from within a tokio runtime.
pub fn install_prometheus_exporter(port: u16) -> Result<()> {
    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .with_context(|| format!("Failed to install Prometheus exporter on {}", addr))?;
    info!("Prometheus metrics available on http://{}/metrics", addr);
    Ok(())
}

/// Background task to update process metrics
/// Updates uptime and memory usage every 5 seconds
pub async fn process_metrics_task(cancel: CancellationToken) {
    let start_time = Instant::now();

    loop {
        metrics::gauge!("process.uptime.seconds").set(start_time.elapsed().as_secs() as f64);
        metrics::gauge!("process.is_up").set(1.0);

        #[cfg(target_os = "linux")]
        {
            if let Ok(status) = std::fs::read_to_string("/proc/self/status")
                && let Some(line) = status.lines().find(|l| l.starts_with("VmRSS:"))
                && let Some(kb_str) = line.split_whitespace().nth(1)
                && let Ok(kb) = kb_str.parse::<f64>()
            {
                metrics::gauge!("process.memory.bytes").set(kb * 1024.0);
            }
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(Duration::from_secs(5)) => {}
        }
    }
}

/// Initialize hub metrics to zero so they are exported before the first event
pub fn initialize_hub_metrics() {
    for message_type in [MessageType::Acars, MessageType::Vdlm2] {
        let label = message_type.as_str();
        metrics::counter!("datalink.messages.received_total", "type" => label).absolute(0);
        metrics::counter!("datalink.messages.rejected_total", "type" => label).absolute(0);
        metrics::counter!("datalink.connection.errors_total", "type" => label).absolute(0);
    }
    metrics::counter!("datalink.messages.invalid_utf8_total").absolute(0);
    metrics::gauge!("datalink.stats.acars_messages").set(0.0);
    metrics::gauge!("datalink.stats.vdlm2_messages").set(0.0);
    metrics::gauge!("datalink.stats.total_messages").set(0.0);
    metrics::gauge!("datalink.stats.error_messages").set(0.0);

    metrics::counter!("adsb.positions.received_total").absolute(0);
    metrics::counter!("adsb.positions.rejected_total").absolute(0);
    metrics::counter!("adsb.bytes.received_total").absolute(0);
    metrics::counter!("adsb.connection.failed_total").absolute(0);
    metrics::counter!("adsb.connection.operation_failed_total").absolute(0);
    metrics::gauge!("adsb.connection.connected").set(0.0);

    metrics::counter!("registry.aircraft.created_total").absolute(0);
    metrics::counter!("registry.aircraft.evicted_total").absolute(0);
    metrics::counter!("registry.positions.rate_limited_total").absolute(0);
    metrics::gauge!("registry.aircraft.tracked").set(0.0);
    metrics::gauge!("registry.aircraft.fresh_positions").set(0.0);
    metrics::gauge!("registry.aircraft.fresh_messages").set(0.0);
    metrics::gauge!("registry.aircraft.fresh_both").set(0.0);
    metrics::gauge!("registry.index.keys").set(0.0);
    metrics::gauge!("registry.queue_depth").set(0.0);

    metrics::counter!("iata.table.load_failed_total").absolute(0);
}
