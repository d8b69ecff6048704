//! Datalink ingest counters and the periodic stats sink
//!
//! Each datalink ingestor owns an [`IngestCounters`]. Two independent windows
//! are kept: one drained by the ingestor's own periodic log line, one drained
//! by the stats task that pushes a [`StatsSample`] to every [`StatsSink`].

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::message::MessageType;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WindowCounts {
    pub total: u64,
    pub errors: u64,
}

#[derive(Debug, Default)]
pub struct IngestCounters {
    total: AtomicU64,
    rejected: AtomicU64,
    flagged: AtomicU64,
    log_window_total: AtomicU64,
    log_window_errors: AtomicU64,
    stats_window_total: AtomicU64,
    stats_window_errors: AtomicU64,
}

impl IngestCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_accepted(&self) {
        self.total.fetch_add(1, Ordering::Relaxed);
        self.log_window_total.fetch_add(1, Ordering::Relaxed);
        self.stats_window_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts a message that arrived but could not be used
    pub fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
        self.log_window_errors.fetch_add(1, Ordering::Relaxed);
        self.stats_window_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts an accepted message its decoder reported transmission errors on
    pub fn record_flagged(&self) {
        self.flagged.fetch_add(1, Ordering::Relaxed);
        self.log_window_errors.fetch_add(1, Ordering::Relaxed);
        self.stats_window_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    pub fn flagged(&self) -> u64 {
        self.flagged.load(Ordering::Relaxed)
    }

    /// Window drained by the ingestor's periodic log line
    pub fn take_log_window(&self) -> WindowCounts {
        WindowCounts {
            total: self.log_window_total.swap(0, Ordering::Relaxed),
            errors: self.log_window_errors.swap(0, Ordering::Relaxed),
        }
    }

    /// Window drained by the stats task
    pub fn take_stats_window(&self) -> WindowCounts {
        WindowCounts {
            total: self.stats_window_total.swap(0, Ordering::Relaxed),
            errors: self.stats_window_errors.swap(0, Ordering::Relaxed),
        }
    }
}

/// Per-interval message counts across every datalink ingestor
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSample {
    pub acars: u64,
    pub vdlm2: u64,
    pub total: u64,
    pub errors: u64,
}

pub trait StatsSink: Send + Sync {
    fn publish(&self, sample: &StatsSample);
}

/// Publishes samples as gauges on the installed `metrics` recorder
#[derive(Debug, Default)]
pub struct MetricsStatsSink;

impl StatsSink for MetricsStatsSink {
    fn publish(&self, sample: &StatsSample) {
        metrics::gauge!("datalink.stats.acars_messages").set(sample.acars as f64);
        metrics::gauge!("datalink.stats.vdlm2_messages").set(sample.vdlm2 as f64);
        metrics::gauge!("datalink.stats.total_messages").set(sample.total as f64);
        metrics::gauge!("datalink.stats.error_messages").set(sample.errors as f64);
    }
}

#[derive(Debug, Default)]
pub struct LogStatsSink;

impl StatsSink for LogStatsSink {
    fn publish(&self, sample: &StatsSample) {
        info!(
            acars = sample.acars,
            vdlm2 = sample.vdlm2,
            errors = sample.errors,
            "Datalink messages this interval: {}",
            sample.total
        );
    }
}

/// Drain the stats window of every source into one sample
pub fn collect_sample(sources: &[(MessageType, Arc<IngestCounters>)]) -> StatsSample {
    let mut sample = StatsSample::default();
    for (message_type, counters) in sources {
        let window = counters.take_stats_window();
        match message_type {
            MessageType::Acars => sample.acars += window.total,
            MessageType::Vdlm2 => sample.vdlm2 += window.total,
        }
        sample.total += window.total;
        sample.errors += window.errors;
    }
    sample
}

pub async fn run_stats_task(
    sources: Vec<(MessageType, Arc<IngestCounters>)>,
    sinks: Vec<Arc<dyn StatsSink>>,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let sample = collect_sample(&sources);
                for sink in &sinks {
                    sink.publish(&sample);
                }
            }
        }
    }
    debug!("Stats task stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        samples: Mutex<Vec<StatsSample>>,
    }

    impl StatsSink for RecordingSink {
        fn publish(&self, sample: &StatsSample) {
            self.samples.lock().unwrap().push(*sample);
        }
    }

    #[test]
    fn test_windows_are_independent() {
        let counters = IngestCounters::new();
        counters.record_accepted();
        counters.record_accepted();
        counters.record_rejected();

        assert_eq!(
            counters.take_log_window(),
            WindowCounts {
                total: 2,
                errors: 1
            }
        );
        assert_eq!(counters.take_log_window(), WindowCounts::default());

        assert_eq!(
            counters.take_stats_window(),
            WindowCounts {
                total: 2,
                errors: 1
            }
        );
        assert_eq!(counters.total(), 2);
        assert_eq!(counters.rejected(), 1);
    }

    #[test]
    fn test_flagged_messages_count_as_errors() {
        let counters = IngestCounters::new();
        counters.record_accepted();
        counters.record_accepted();
        counters.record_flagged();

        assert_eq!(
            counters.take_stats_window(),
            WindowCounts {
                total: 2,
                errors: 1
            }
        );
        assert_eq!(counters.flagged(), 1);
        assert_eq!(counters.rejected(), 0);
    }

    #[test]
    fn test_collect_sample_groups_by_type() {
        let acars_a = Arc::new(IngestCounters::new());
        let acars_b = Arc::new(IngestCounters::new());
        let vdlm2 = Arc::new(IngestCounters::new());
        acars_a.record_accepted();
        acars_b.record_accepted();
        acars_b.record_rejected();
        vdlm2.record_accepted();

        let sources = vec![
            (MessageType::Acars, acars_a),
            (MessageType::Acars, acars_b),
            (MessageType::Vdlm2, vdlm2),
        ];
        assert_eq!(
            collect_sample(&sources),
            StatsSample {
                acars: 2,
                vdlm2: 1,
                total: 3,
                errors: 1
            }
        );
        assert_eq!(collect_sample(&sources), StatsSample::default());
    }

    #[tokio::test]
    async fn test_stats_task_publishes_until_cancelled() {
        let counters = Arc::new(IngestCounters::new());
        counters.record_accepted();
        let sink = Arc::new(RecordingSink::default());
        let cancel = CancellationToken::new();

        let task = tokio::spawn(run_stats_task(
            vec![(MessageType::Vdlm2, counters.clone())],
            vec![sink.clone() as Arc<dyn StatsSink>],
            Duration::from_millis(20),
            cancel.clone(),
        ));

        tokio::time::sleep(Duration::from_millis(70)).await;
        cancel.cancel();
        task.await.unwrap();

        let samples = sink.samples.lock().unwrap();
        assert!(!samples.is_empty());
        assert_eq!(samples[0].vdlm2, 1);
        assert_eq!(samples.iter().map(|s| s.total).sum::<u64>(), 1);
    }
}
